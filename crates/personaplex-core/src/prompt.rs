//! Prompt templates for the Generation and Refinement stages.
//!
//! The router's [`Category`] picks the Generation template; Refinement uses a
//! single template for every category.

use crate::router::Category;

/// Placeholder used when a turn has neither retrieved context nor document
/// text.
pub const NO_DOCUMENT: &str = "No document available.";

/// Answer the QA template asks for when the document lacks the information.
pub const NOT_FOUND_ANSWER: &str = "The document does not contain this information.";

/// Inputs to a Generation prompt.
#[derive(Debug, Clone, Copy)]
pub struct GenerationInput<'a> {
    pub category: Category,
    pub task: &'a str,
    pub file_name: &'a str,
    /// Retrieved context when available, otherwise the bounded file content.
    pub material: &'a str,
}

/// Prompt builder for pipeline stages
pub struct PromptBuilder;

impl PromptBuilder {
    /// Build the Generation prompt for the input's category.
    pub fn generation(input: &GenerationInput<'_>) -> String {
        let material = if input.material.trim().is_empty() {
            NO_DOCUMENT
        } else {
            input.material
        };

        match input.category {
            Category::Qa => Self::qa(material, input.task),
            Category::Citation => Self::citation(material, input.task),
            Category::Ats => Self::ats(material, input.task),
            Category::Summary => Self::analyst(
                input.file_name,
                material,
                input.task,
                "Give a clear structured summary of the main points.",
            ),
            Category::Explanation => Self::analyst(
                input.file_name,
                material,
                input.task,
                "Explain the meaning and themes clearly, in a structured answer.",
            ),
        }
    }

    /// Build the Refinement prompt around a draft answer.
    pub fn refinement(draft: &str) -> String {
        format!(
            "Improve and clean the answer below.\n\
             Remove markdown symbols like *, **, ###.\n\
             Make it professional plain text.\n\n\
             {draft}\n"
        )
    }

    fn analyst(file_name: &str, content: &str, task: &str, instruction: &str) -> String {
        let file_name = if file_name.is_empty() { "(none)" } else { file_name };
        format!(
            "You are a document analysis AI.\n\n\
             Document:\n{file_name}\n\n\
             Content:\n{content}\n\n\
             Task:\n{task}\n\n\
             {instruction}\n"
        )
    }

    fn qa(context: &str, question: &str) -> String {
        format!(
            "Answer strictly from the document.\n\n\
             Context:\n{context}\n\n\
             Question:\n{question}\n\n\
             If not found, say:\n\"{NOT_FOUND_ANSWER}\"\n"
        )
    }

    fn citation(context: &str, question: &str) -> String {
        format!(
            "Answer with references.\n\n\
             Context:\n{context}\n\n\
             Question:\n{question}\n\n\
             Format:\n\n\
             Answer...\n\n\
             References:\n\
             - Section 1\n\
             - Section 2\n"
        )
    }

    // The uploaded document is treated as the resume and the question as the
    // job description to score against.
    fn ats(resume: &str, job_description: &str) -> String {
        format!(
            "You are an ATS system.\n\n\
             Resume:\n{resume}\n\n\
             Job Description:\n{job_description}\n\n\
             Return:\n\
             - ATS score %\n\
             - Matching skills\n\
             - Missing skills\n\
             - Suggestions\n"
        )
    }
}
