//! Text-generation capability.
//!
//! The pipeline only needs `prompt -> completion`. Concrete backends (Groq,
//! OpenAI, Ollama) live in the `personaplex` app crate.

use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait Generator: Send + Sync {
    /// Backend name for logs (e.g. `"groq"`).
    fn name(&self) -> &str;

    /// Complete `prompt`. Timeouts are applied by the caller.
    async fn generate(&self, prompt: &str) -> Result<String>;
}
