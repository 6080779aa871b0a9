//! Configuration management for the quote evaluator
//!
//! Loads judge, store and evaluation settings from TOML files and provides
//! runtime access.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::judge::{JudgeConfig, ReasoningEffort};

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub judge: JudgeSection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub evaluation: EvaluationSection,
}

/// Semantic judge and the text-generation service behind it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeSection {
    #[serde(default = "default_judge_model")]
    pub model: String,
    #[serde(default)]
    pub reasoning_effort: ReasoningEffort,
    /// Must stay 0; retry policy belongs above the judge
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Requests per minute
    #[serde(default = "default_rpm")]
    pub rpm: u32,
    /// Tokens per minute
    #[serde(default = "default_tpm")]
    pub tpm: u32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// Per-call timeout; unset means a call may block its worker indefinitely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// Document store location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSection {
    #[serde(default = "default_store_path")]
    pub path: String,
}

/// Batch run settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSection {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Competing models to score; empty means every model present in the store
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub force: bool,
}

// Default value functions
fn default_judge_model() -> String { "o4-mini".to_string() }
fn default_base_url() -> String { "https://api.openai.com/v1".to_string() }
fn default_api_key_env() -> String { "OPENAI_API_KEY".to_string() }
fn default_rpm() -> u32 { 500 }
fn default_tpm() -> u32 { 200_000 }
fn default_max_output_tokens() -> u32 { 4096 }
fn default_store_path() -> String { "data/quote-eval.sqlite".to_string() }
fn default_max_workers() -> usize { 5 }

impl Default for JudgeSection {
    fn default() -> Self {
        Self {
            model: default_judge_model(),
            reasoning_effort: ReasoningEffort::default(),
            max_retries: 0,
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            rpm: default_rpm(),
            tpm: default_tpm(),
            max_output_tokens: default_max_output_tokens(),
            timeout_ms: None,
        }
    }
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl Default for EvaluationSection {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            models: Vec::new(),
            force: false,
        }
    }
}

impl JudgeSection {
    /// Option set handed to the semantic judge
    pub fn judge_config(&self) -> JudgeConfig {
        JudgeConfig {
            model: self.model.clone(),
            reasoning_effort: self.reasoning_effort,
            max_retries: self.max_retries,
            max_output_tokens: self.max_output_tokens,
            timeout_ms: self.timeout_ms,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from default config location or return defaults
    pub fn load_or_default() -> Self {
        let config_paths = ["config/quote-eval.toml", "../config/quote-eval.toml"];

        for path in &config_paths {
            match Self::from_file(path) {
                Ok(config) => {
                    tracing::info!("Loaded configuration from {}", path);
                    return config;
                }
                Err(ConfigError::Io(_)) => {}
                Err(e) => tracing::warn!("Ignoring {}: {}", path, e),
            }
        }

        tracing::info!("Using default configuration");
        Self::default()
    }

    /// Save configuration to a TOML file
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        if let Some(parent) = path.as_ref().parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }
        fs::write(path, content)
            .map_err(|e| ConfigError::Io(e.to_string()))?;
        Ok(())
    }

    /// Reject settings the evaluator cannot honour
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.judge.max_retries != 0 {
            return Err(ConfigError::Invalid(format!(
                "judge.max_retries must be 0, got {}",
                self.judge.max_retries
            )));
        }
        if self.judge.model.trim().is_empty() {
            return Err(ConfigError::Invalid("judge.model must not be empty".to_string()));
        }
        if self.store.path.trim().is_empty() {
            return Err(ConfigError::Invalid("store.path must not be empty".to_string()));
        }
        Ok(())
    }

    /// Explicit model list, `None` when every stored model should be scored
    pub fn models(&self) -> Option<&[String]> {
        (!self.evaluation.models.is_empty()).then_some(self.evaluation.models.as_slice())
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Invalid(e) => write!(f, "Invalid configuration: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}
