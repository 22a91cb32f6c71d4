//! Document text extraction for uploads (PDF, plain text, CSV).
//!
//! [`FileExtractor`] is the default [`DocumentReader`]: it never fails, and
//! reports problems as a diagnostic string that the pipeline carries as the
//! document content.

use std::path::Path;

use thiserror::Error;

use personaplex_core::reader::{DocumentReader, ReadOutcome};

pub const UNSUPPORTED_FORMAT: &str = "Unsupported file format.";

/// Extensions [`extract_text`] understands.
pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["pdf", "txt", "csv"];

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file extension: '{0}'")]
    Unsupported(String),
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("CSV parsing failed: {0}")]
    Csv(#[from] csv::Error),
}

/// Extract plain text from `bytes` according to the lowercase `extension`.
pub fn extract_text(bytes: &[u8], extension: &str) -> Result<String, ExtractError> {
    match extension {
        "pdf" => extract_pdf(bytes),
        "txt" => Ok(String::from_utf8_lossy(bytes).into_owned()),
        "csv" => render_csv(bytes),
        other => Err(ExtractError::Unsupported(other.to_string())),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

/// Render a CSV file as a left-aligned text table, header row first.
fn render_csv(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut rows: Vec<Vec<String>> = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(|field| field.trim().to_string()).collect());
    }

    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut widths = vec![0usize; columns];
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let lines: Vec<String> = rows
        .iter()
        .map(|row| {
            let cells: Vec<String> = (0..columns)
                .map(|i| {
                    let cell = row.get(i).map(String::as_str).unwrap_or("");
                    format!("{:<width$}", cell, width = widths[i])
                })
                .collect();
            cells.join("  ").trim_end().to_string()
        })
        .collect();

    Ok(lines.join("\n"))
}

/// Reads uploaded documents from the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileExtractor;

impl FileExtractor {
    fn try_read(&self, path: &Path, extension: &str) -> Result<String, ExtractError> {
        if !SUPPORTED_EXTENSIONS.contains(&extension) {
            return Err(ExtractError::Unsupported(extension.to_string()));
        }
        let bytes = std::fs::read(path)?;
        extract_text(&bytes, extension)
    }
}

impl DocumentReader for FileExtractor {
    fn read(&self, path: &Path, extension: &str) -> ReadOutcome {
        if path.as_os_str().is_empty() {
            return ReadOutcome::Text(String::new());
        }
        match self.try_read(path, extension) {
            Ok(text) => ReadOutcome::Text(text),
            Err(ExtractError::Unsupported(_)) => ReadOutcome::Degraded(UNSUPPORTED_FORMAT.into()),
            Err(e) => ReadOutcome::Degraded(format!("File reading error: {}", e)),
        }
    }
}
