//! Configuration management for re2-prep
//!
//! Settings live in an optional TOML file (`--config`, or
//! `~/.config/re2-prep/config.toml`). Every field has a default, so running
//! from the benchmark checkout with no file at all works. The API key is
//! only ever read from the environment.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variables checked for the OpenRouter key, in order.
const API_KEY_VARS: [&str; 2] = ["OPEN_ROUTER_KEY", "OPENROUTER_API_KEY"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub inference: InferenceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Holds `<task>/<difficulty>/*.json` trace files
    pub dataset_root: PathBuf,
    /// Source snippets; defaults to `<dataset_root>/code`
    pub code_dir: Option<PathBuf>,
    pub prompts_root: PathBuf,
    pub results_root: PathBuf,
    /// Worked examples, `<templates_root>/<task>_prediction/<family>.txt`
    pub templates_root: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            dataset_root: PathBuf::from("dataset/re2-bench"),
            code_dir: None,
            prompts_root: PathBuf::from("prompts"),
            results_root: PathBuf::from("results"),
            templates_root: PathBuf::from("prompts_icl_examples"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub base_url: String,
    /// Per-request timeout
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_tokens: u32,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api/v1".to_string(),
            timeout_secs: 300,
            max_retries: 5,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            max_tokens: 4096,
        }
    }
}

impl Config {
    /// Get the config directory path
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("re2-prep"))
    }

    /// Get the default config file path
    pub fn default_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.toml"))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("Invalid config file")
    }

    /// Load an explicit config file, or the default one if it exists.
    ///
    /// An explicit path must exist; a missing default file yields defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.is_file() => path,
                _ => {
                    tracing::debug!("No config file found; using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let text = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_toml(&text)
            .with_context(|| format!("Failed to load {}", path.display()))?;
        tracing::debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    pub fn code_dir(&self) -> PathBuf {
        self.paths
            .code_dir
            .clone()
            .unwrap_or_else(|| self.paths.dataset_root.join("code"))
    }
}

/// Get the OpenRouter API key from the environment, if set.
pub fn api_key() -> Option<String> {
    API_KEY_VARS
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .map(|key| key.trim().to_string())
        .find(|key| !key.is_empty())
}
