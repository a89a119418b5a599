//! Configuration (layered: code > env > file).
//!
//! ```toml
//! ending_message = "好的，再见！"
//! max_cascade = 4
//!
//! [backend]
//! model = "gpt-4o-mini"
//! temperature = 0.3
//! ```

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};

/// Spoken when a decision routes to the end sentinel and no message is set.
pub const DEFAULT_ENDING_MESSAGE: &str = "感谢您的接听，祝您生活愉快，再见！";

/// Default bound on agent turns driven for one external input.
pub const DEFAULT_MAX_CASCADE: usize = 8;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Orchestration settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub ending_message: Option<String>,
    /// Maximum agent turns per external input, handoff cascades included.
    pub max_cascade: usize,
    /// Backend settings, when loaded from a combined file.
    pub backend: Option<BackendConfig>,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            ending_message: None,
            max_cascade: DEFAULT_MAX_CASCADE,
            backend: None,
        }
    }
}

impl FlowConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ending_message(mut self, message: impl Into<String>) -> Self {
        self.ending_message = Some(message.into());
        self
    }

    pub fn with_max_cascade(mut self, max_cascade: usize) -> Self {
        self.max_cascade = max_cascade;
        self
    }

    /// The configured ending message or the fixed default.
    pub fn ending_message(&self) -> &str {
        self.ending_message.as_deref().unwrap_or(DEFAULT_ENDING_MESSAGE)
    }

    /// Parse from TOML text.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)
            .map_err(|e| FlowError::Configuration(format!("invalid flow config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    /// Load from environment variables (`CALLFLOW_ENDING_MESSAGE`, `CALLFLOW_MAX_CASCADE`).
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        let mut config = Self::default();
        if let Ok(message) = std::env::var("CALLFLOW_ENDING_MESSAGE") {
            if !message.trim().is_empty() {
                config.ending_message = Some(message);
            }
        }
        if let Ok(raw) = std::env::var("CALLFLOW_MAX_CASCADE") {
            config.max_cascade = raw.trim().parse().map_err(|_| {
                FlowError::Configuration(format!(
                    "CALLFLOW_MAX_CASCADE must be a positive integer, got '{raw}'"
                ))
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.max_cascade == 0 {
            return Err(FlowError::Configuration(
                "max_cascade must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Settings for an OpenAI-compatible chat-completions backend.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub request_timeout_secs: u64,
    /// Tool-execution round trips allowed within one turn.
    pub max_tool_rounds: usize,
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| ".."))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_tool_rounds", &self.max_tool_rounds)
            .finish()
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: None,
            temperature: None,
            request_timeout_secs: 60,
            max_tool_rounds: 4,
        }
    }
}

impl BackendConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Load from environment variables (`OPENAI_API_KEY`, `OPENAI_BASE_URL`, `CALLFLOW_MODEL`).
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            config.api_key = Some(key);
        }
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            config.base_url = url;
        }
        if let Ok(model) = std::env::var("CALLFLOW_MODEL") {
            config.model = model;
        }
        config
    }

    /// Full URL of the chat-completions endpoint.
    pub fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}
