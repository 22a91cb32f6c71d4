//! Generation backends.
//!
//! Implements [`personaplex_core::generation::Generator`] for:
//! - **[`ChatCompletionsGenerator`]**: any OpenAI-compatible
//!   `/chat/completions` endpoint. Used for `"groq"` (default) and `"openai"`.
//! - **[`OllamaGenerator`]**: a local Ollama instance's `/api/generate`.
//! - **[`DisabledGenerator`]**: fails every call, so turns complete with an
//!   `Agent error: …` answer instead of contacting a model.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use personaplex_core::generation::Generator;

use crate::config::GenerationConfig;
use crate::http;

const GROQ_URL: &str = "https://api.groq.com/openai/v1";
const OPENAI_URL: &str = "https://api.openai.com/v1";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn name(&self) -> &str {
        "disabled"
    }
    async fn generate(&self, _prompt: &str) -> Result<String> {
        bail!("Generation provider is disabled")
    }
}

/// OpenAI-compatible chat completions client.
pub struct ChatCompletionsGenerator {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_retries: u32,
    client: reqwest::Client,
}

impl ChatCompletionsGenerator {
    /// `provider` selects the default base URL and the API key variable:
    /// `"groq"` → `GROQ_API_KEY`, `"openai"` → `OPENAI_API_KEY`.
    pub fn new(provider: &str, config: &GenerationConfig) -> Result<Self> {
        let (default_url, key_var) = match provider {
            "groq" => (GROQ_URL, "GROQ_API_KEY"),
            "openai" => (OPENAI_URL, "OPENAI_API_KEY"),
            other => bail!("Not a chat completions provider: {}", other),
        };
        let api_key = std::env::var(key_var)
            .map_err(|_| anyhow::anyhow!("{} environment variable not set", key_var))?;

        Ok(Self {
            name: provider.to_string(),
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| default_url.to_string()),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl Generator for ChatCompletionsGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [{"role": "user", "content": prompt}],
        });
        let json = http::post_json(
            &self.client,
            &format!("{}/chat/completions", self.base_url.trim_end_matches('/')),
            Some(&self.api_key),
            &body,
            self.max_retries,
            &self.name,
        )
        .await?;
        parse_chat_completion(&json)
    }
}

fn parse_chat_completion(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid chat completion response: missing content"))
}

/// Generator backed by Ollama's `/api/generate` (non-streaming).
pub struct OllamaGenerator {
    url: String,
    model: String,
    temperature: f32,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        Ok(Self {
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OLLAMA_DEFAULT_URL.to_string()),
            model: config.model.clone(),
            temperature: config.temperature,
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {"temperature": self.temperature},
        });
        let json = http::post_json(
            &self.client,
            &format!("{}/api/generate", self.url.trim_end_matches('/')),
            None,
            &body,
            self.max_retries,
            "Ollama",
        )
        .await?;
        json.get("response")
            .and_then(|r| r.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing response field"))
    }
}

/// Build the configured generator.
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "groq" | "openai" => Ok(Arc::new(ChatCompletionsGenerator::new(
            &config.provider,
            config,
        )?)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}
