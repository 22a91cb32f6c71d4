//! The typed record threaded through every pipeline stage.
//!
//! Stages take a [`PipelineState`] by value and return the next one through
//! the `with_*` transforms, so a state is never shared between turns or
//! mutated behind another stage's back.

use serde::Serialize;

use crate::models::DocumentRef;
use crate::router::Category;

/// Maximum characters of document text that may enter generation.
pub const MAX_FILE_CHARS: usize = 12_000;

/// Per-turn pipeline state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineState {
    task: String,
    category: Category,
    messages: Vec<String>,
    file_content: String,
    file_name: String,
    file_path: String,
    max_file_chars: usize,
}

impl PipelineState {
    /// Start a turn for `task`, classified as `category`.
    pub fn new(task: impl Into<String>, category: Category) -> Self {
        Self {
            task: task.into(),
            category,
            messages: Vec::new(),
            file_content: String::new(),
            file_name: String::new(),
            file_path: String::new(),
            max_file_chars: MAX_FILE_CHARS,
        }
    }

    /// Attach the active document's identifiers.
    pub fn with_document(mut self, document: &DocumentRef) -> Self {
        self.file_name = document.file_name.clone();
        self.file_path = document.file_path.clone();
        self
    }

    /// Override the document text cap (defaults to [`MAX_FILE_CHARS`]).
    pub fn with_max_file_chars(mut self, max_file_chars: usize) -> Self {
        self.max_file_chars = max_file_chars;
        self.file_content = truncate_chars(&self.file_content, max_file_chars).to_string();
        self
    }

    /// Clear per-turn outputs, keeping task and document identifiers.
    pub fn reset(mut self) -> Self {
        self.messages.clear();
        self.file_content.clear();
        self
    }

    /// Set the document text, truncated to the cap.
    pub fn with_file_content(mut self, content: &str) -> Self {
        self.file_content = truncate_chars(content, self.max_file_chars).to_string();
        self
    }

    /// Append a generation result.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.messages.push(message.into());
        self
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn file_content(&self) -> &str {
        &self.file_content
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    pub fn has_document(&self) -> bool {
        !self.file_path.is_empty()
    }

    /// The last generation result, i.e. the answer once the pipeline ends.
    pub fn last_message(&self) -> Option<&str> {
        self.messages.last().map(String::as_str)
    }
}

/// Longest prefix of `text` holding at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}
