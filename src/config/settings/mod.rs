
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::embeddings::chunking::{ChunkingConfig, ChunkingStrategy};
use crate::index::IndexPaths;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub parser: ParserConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// Locations of source documents, persisted artifacts and knowledge base files
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub knowledge_dir: PathBuf,
    /// Lower-case file extensions picked up by the directory scan, without the dot
    pub extensions: Vec<String>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("knowledge/data"),
            output_dir: PathBuf::from("knowledge/vector_store"),
            knowledge_dir: PathBuf::from("knowledge/base"),
            extensions: vec!["pdf".to_string(), "txt".to_string()],
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingMethod {
    /// Local TF-IDF, fitted on the corpus
    Simple,
    /// OpenAI-compatible embedding endpoint
    Remote,
    /// Remote first, local TF-IDF on failure
    Hybrid,
}

impl EmbeddingMethod {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Remote => "remote",
            Self::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for EmbeddingMethod {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub method: EmbeddingMethod,
    pub max_features: usize,
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub batch_size: u32,
    pub timeout_seconds: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            method: EmbeddingMethod::Simple,
            max_features: 1000,
            base_url: "https://api-inference.modelscope.cn/v1".to_string(),
            model: "Qwen/Qwen3-Embedding-8B".to_string(),
            api_key_env: "MODELSCOPE_API_KEY".to_string(),
            batch_size: 16,
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PdfBackend {
    Local,
    Remote,
    /// Remote when an API key is available, local otherwise
    Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ParserConfig {
    pub pdf_backend: PdfBackend,
    pub base_url: String,
    pub api_key_env: String,
    pub model_version: String,
    pub poll_interval_ms: u64,
    pub max_polls: u32,
    pub local_fallback: bool,
    pub timeout_seconds: u64,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            pdf_backend: PdfBackend::Local,
            base_url: "https://mineru.net/api/v4".to_string(),
            api_key_env: "MINERU_API_KEY".to_string(),
            model_version: "vlm".to_string(),
            poll_interval_ms: 3000,
            max_polls: 200,
            local_fallback: true,
            timeout_seconds: 60,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid chunk size: {0} (must be greater than 0)")]
    InvalidChunkSize(usize),
    #[error("Invalid chunk overlap: {overlap} (must be smaller than chunk size {size})")]
    InvalidOverlap { overlap: usize, size: usize },
    #[error("Invalid semantic chunk bounds: min {min} must not exceed max {max}")]
    InvalidSemanticBounds { min: usize, max: usize },
    #[error("Invalid max features: {0} (must be between 1 and 100000)")]
    InvalidMaxFeatures(usize),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid timeout: {0} (must be between 1 and 600 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid poll interval: {0} ms (must be greater than 0)")]
    InvalidPollInterval(u64),
    #[error("Invalid max polls: {0} (must be greater than 0)")]
    InvalidMaxPolls(u32),
    #[error("At least one file extension must be configured")]
    NoExtensions,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Default for Config {
    #[inline]
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            parser: ParserConfig::default(),
            base_dir: Self::config_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }
}

impl Config {
    /// Default configuration directory, `~/.knowledge-rag`
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::home_dir()
            .map(|home| home.join(".knowledge-rag"))
            .or_else(|| dirs::data_dir().map(|data| data.join("knowledge-rag")))
            .ok_or(ConfigError::DirectoryError)
    }

    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self {
                base_dir: config_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Get the base directory for the application
    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    /// Paths of the persisted index artifacts inside the output directory
    #[inline]
    pub fn index_paths(&self) -> IndexPaths {
        IndexPaths::in_dir(&self.paths.output_dir)
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_chunking_config()?;
        self.embedding.validate()?;
        self.parser.validate()?;

        if self.paths.extensions.is_empty() {
            return Err(ConfigError::NoExtensions);
        }

        Ok(())
    }

    fn validate_chunking_config(&self) -> Result<(), ConfigError> {
        let config = &self.chunking;

        match config.strategy {
            ChunkingStrategy::Fixed => {
                if config.chunk_size == 0 {
                    return Err(ConfigError::InvalidChunkSize(config.chunk_size));
                }
                if config.chunk_overlap >= config.chunk_size {
                    return Err(ConfigError::InvalidOverlap {
                        overlap: config.chunk_overlap,
                        size: config.chunk_size,
                    });
                }
            }
            ChunkingStrategy::Semantic => {
                if config.max_chunk_size == 0 {
                    return Err(ConfigError::InvalidChunkSize(config.max_chunk_size));
                }
                if config.min_chunk_size > config.max_chunk_size {
                    return Err(ConfigError::InvalidSemanticBounds {
                        min: config.min_chunk_size,
                        max: config.max_chunk_size,
                    });
                }
            }
        }

        Ok(())
    }
}

impl EmbeddingConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100_000).contains(&self.max_features) {
            return Err(ConfigError::InvalidMaxFeatures(self.max_features));
        }

        if self.method == EmbeddingMethod::Simple {
            return Ok(());
        }

        Url::parse(&self.base_url).map_err(|_| ConfigError::InvalidUrl(self.base_url.clone()))?;

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        if !(1..=600).contains(&self.timeout_seconds) {
            return Err(ConfigError::InvalidTimeout(self.timeout_seconds));
        }

        Ok(())
    }

    /// API key read from the configured environment variable, if set and non-empty
    #[inline]
    pub fn api_key(&self) -> Option<String> {
        read_secret(&self.api_key_env)
    }
}

impl ParserConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pdf_backend == PdfBackend::Local {
            return Ok(());
        }

        Url::parse(&self.base_url).map_err(|_| ConfigError::InvalidUrl(self.base_url.clone()))?;

        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidPollInterval(self.poll_interval_ms));
        }

        if self.max_polls == 0 {
            return Err(ConfigError::InvalidMaxPolls(self.max_polls));
        }

        if !(1..=600).contains(&self.timeout_seconds) {
            return Err(ConfigError::InvalidTimeout(self.timeout_seconds));
        }

        Ok(())
    }

    #[inline]
    pub fn api_key(&self) -> Option<String> {
        read_secret(&self.api_key_env)
    }
}

fn read_secret(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
