//! Configuration for scout.
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! `SCOUT__SECTION__KEY` environment variables.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Environment, File, FileFormat};
use scout_retrieval::corpus::{DEFAULT_EXCLUDED_DIR_MARKERS, DEFAULT_EXTENSIONS, DEFAULT_IGNORE_FILE};
use scout_retrieval::DEFAULT_TOP_K;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use scout_retrieval::{Similarity, SummaryFailurePolicy};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "SCOUT";

/// Config file name under the user config directory.
pub const CONFIG_FILE: &str = "config.toml";

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub extensions: Vec<String>,
    pub excluded_dir_markers: Vec<String>,
    pub ignore_file: String,
    pub extra_ignore_patterns: Vec<String>,
    pub similarity: Similarity,
    pub batch_size: usize,
    pub progress_interval: usize,
    pub summarize: bool,
    pub summary_failure: SummaryFailurePolicy,
    pub summary_timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            excluded_dir_markers: DEFAULT_EXCLUDED_DIR_MARKERS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ignore_file: DEFAULT_IGNORE_FILE.to_string(),
            extra_ignore_patterns: Vec::new(),
            similarity: Similarity::Dot,
            batch_size: 1,
            progress_interval: 10,
            summarize: true,
            summary_failure: SummaryFailurePolicy::Placeholder,
            summary_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingsConfig {
    pub base_url: String,
    pub model: String,
    pub dimensions: usize,
    pub timeout_secs: u64,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
            dimensions: 768,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    pub base_url: String,
    pub model: String,
    /// 0 sends the whole file
    pub max_input_chars: usize,
    pub timeout_secs: u64,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3".to_string(),
            max_input_chars: 0,
            timeout_secs: 300,
        }
    }
}

impl SummarizerConfig {
    pub fn max_input_chars(&self) -> Option<usize> {
        (self.max_input_chars > 0).then_some(self.max_input_chars)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub retrieval: RetrievalConfig,
    pub embeddings: EmbeddingsConfig,
    pub summarizer: SummarizerConfig,
}

impl Config {
    /// Load configuration.
    ///
    /// An explicit `path` must exist. Without one, the user config file is
    /// read if present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder().add_source(
            config::Config::try_from(&Config::default()).context("failed to encode defaults")?,
        );

        match path {
            Some(path) => {
                let path = expand_path(&path.to_string_lossy())?;
                builder =
                    builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
            }
            None => {
                if let Some(path) = default_config_path() {
                    builder = builder
                        .add_source(File::from(path).format(FileFormat::Toml).required(false));
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("retrieval.extensions")
                .with_list_parse_key("retrieval.excluded_dir_markers")
                .with_list_parse_key("retrieval.extra_ignore_patterns"),
        );

        let config: Config = builder
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document layered over the defaults.
    pub fn from_toml(source: &str) -> Result<Self> {
        let config: Config = toml::from_str(source).context("invalid TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize configuration")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retrieval.extensions.is_empty() {
            return Err(ConfigError::Invalid {
                key: "retrieval.extensions",
                reason: "at least one extension is required".to_string(),
            });
        }
        if self.retrieval.batch_size == 0 {
            return Err(ConfigError::Invalid {
                key: "retrieval.batch_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.retrieval.summary_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "retrieval.summary_timeout_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.embeddings.model.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "embeddings.model",
                reason: "model name is empty".to_string(),
            });
        }
        if self.summarizer.model.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "summarizer.model",
                reason: "model name is empty".to_string(),
            });
        }
        Ok(())
    }
}

/// `$XDG_CONFIG_HOME/scout/config.toml` or the platform equivalent.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("scout").join(CONFIG_FILE))
}

/// Expand `~` and environment variables in a path.
pub fn expand_path(raw: &str) -> Result<PathBuf> {
    let expanded =
        shellexpand::full(raw).with_context(|| format!("failed to expand path `{raw}`"))?;
    Ok(PathBuf::from(expanded.as_ref()))
}
