//! TOML configuration.
//!
//! Loaded from `./config/plex.toml` by default. Every section except `[db]`
//! may be omitted; omitted keys fall back to the defaults below.
//!
//! ```toml
//! [db]
//! path = "./data/plex.sqlite"
//!
//! [chunking]
//! chunk_size = 800
//! overlap = 150
//!
//! [retrieval]
//! top_k = 5
//! timeout_secs = 30
//!
//! [embedding]
//! provider = "ollama"        # disabled | openai | ollama | local
//! model = "nomic-embed-text"
//! dims = 768
//!
//! [generation]
//! provider = "groq"          # disabled | groq | openai | ollama
//! model = "llama-3.1-8b-instant"
//! temperature = 0.3
//!
//! [pipeline]
//! max_file_chars = 12000
//! title_chars = 60
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use personaplex_core::chunk::{ChunkParams, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use personaplex_core::conversation::DEFAULT_TITLE_CHARS;
use personaplex_core::retrieval::DEFAULT_TOP_K;
use personaplex_core::state::MAX_FILE_CHARS;

pub const DEFAULT_CONFIG_PATH: &str = "./config/plex.toml";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkingConfig {
    pub fn params(&self) -> Result<ChunkParams> {
        ChunkParams::new(self.chunk_size, self.overlap)
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            timeout_secs: 30,
        }
    }
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (Ollama defaults to `http://localhost:11434`).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    /// Base URL override for the chosen provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Per-call timeout applied by the pipeline.
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    /// HTTP-level retries on 429/5xx/network errors.
    #[serde(default = "default_generation_max_retries")]
    pub max_retries: u32,
    /// Extra attempts after a stage call times out.
    #[serde(default = "default_timeout_retries")]
    pub timeout_retries: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: default_generation_model(),
            url: None,
            temperature: default_temperature(),
            timeout_secs: default_generation_timeout_secs(),
            max_retries: default_generation_max_retries(),
            timeout_retries: default_timeout_retries(),
        }
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_generation_model() -> String {
    "llama-3.1-8b-instant".to_string()
}
fn default_temperature() -> f32 {
    0.3
}
fn default_generation_timeout_secs() -> u64 {
    60
}
fn default_generation_max_retries() -> u32 {
    2
}
fn default_timeout_retries() -> u32 {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_max_file_chars")]
    pub max_file_chars: usize,
    #[serde(default = "default_title_chars")]
    pub title_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_file_chars: MAX_FILE_CHARS,
            title_chars: DEFAULT_TITLE_CHARS,
        }
    }
}

fn default_max_file_chars() -> usize {
    MAX_FILE_CHARS
}
fn default_title_chars() -> usize {
    DEFAULT_TITLE_CHARS
}

impl Config {
    /// All-defaults configuration with the database at `db_path`.
    pub fn minimal(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.chunking
            .params()
            .context("Invalid [chunking] section")?;

        if self.retrieval.top_k < 1 {
            anyhow::bail!("retrieval.top_k must be >= 1");
        }
        if self.retrieval.timeout_secs == 0 {
            anyhow::bail!("retrieval.timeout_secs must be > 0");
        }

        match self.embedding.provider.as_str() {
            "disabled" | "openai" | "ollama" | "local" => {}
            other => anyhow::bail!(
                "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
                other
            ),
        }
        if self.embedding.is_enabled() && self.embedding.provider != "local" {
            if self.embedding.dims.is_none() || self.embedding.dims == Some(0) {
                anyhow::bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    self.embedding.provider
                );
            }
            if self.embedding.model.is_none() {
                anyhow::bail!(
                    "embedding.model must be specified when provider is '{}'",
                    self.embedding.provider
                );
            }
        }
        if self.embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be > 0");
        }

        match self.generation.provider.as_str() {
            "disabled" | "groq" | "openai" | "ollama" => {}
            other => anyhow::bail!(
                "Unknown generation provider: '{}'. Must be disabled, groq, openai, or ollama.",
                other
            ),
        }
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            anyhow::bail!("generation.temperature must be in [0.0, 2.0]");
        }
        if self.generation.timeout_secs == 0 {
            anyhow::bail!("generation.timeout_secs must be > 0");
        }

        if self.pipeline.max_file_chars == 0 {
            anyhow::bail!("pipeline.max_file_chars must be > 0");
        }
        if self.pipeline.title_chars == 0 {
            anyhow::bail!("pipeline.title_chars must be > 0");
        }

        Ok(())
    }
}

/// Parse and validate a config from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content).with_context(|| format!("Invalid config: {}", path.display()))
}
