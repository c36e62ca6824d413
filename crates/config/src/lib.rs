//! Configuration loading and validation for larkrelay.
//!
//! Loads configuration from `config.toml` with environment variable
//! overrides. Validates all settings at startup. API keys and app secrets
//! never appear in Debug output.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `config.toml`.
#[derive(Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Model API configuration
    #[serde(default)]
    pub model: ModelConfig,

    /// Messaging platform configuration
    #[serde(default)]
    pub lark: LarkConfig,

    /// Tool host configuration
    #[serde(default)]
    pub toolhost: ToolHostConfig,

    /// HTTP gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Idempotency store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Conversation driver configuration
    #[serde(default)]
    pub agent: AgentConfig,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("model", &self.model)
            .field("lark", &self.lark)
            .field("toolhost", &self.toolhost)
            .field("gateway", &self.gateway)
            .field("store", &self.store)
            .field("agent", &self.agent)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// API key for the model endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// OpenAI-compatible base URL
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Chat model identifier
    #[serde(default = "default_chat_model")]
    pub chat_model: String,

    /// Timeout for one completion call, in seconds
    #[serde(default = "default_model_timeout")]
    pub timeout_secs: u64,

    /// Completion attempts before failing the request (1 = no retry)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".into()
}
fn default_chat_model() -> String {
    "gpt-4o-mini".into()
}
fn default_model_timeout() -> u64 {
    120
}
fn default_max_attempts() -> u32 {
    3
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: default_api_base(),
            chat_model: default_chat_model(),
            timeout_secs: default_model_timeout(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_base", &self.api_base)
            .field("chat_model", &self.chat_model)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct LarkConfig {
    /// Platform app id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,

    /// Platform app secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_secret: Option<String>,

    /// Open-platform API base URL
    #[serde(default = "default_lark_base")]
    pub api_base: String,
}

fn default_lark_base() -> String {
    "https://open.feishu.cn".into()
}

impl Default for LarkConfig {
    fn default() -> Self {
        Self {
            app_id: None,
            app_secret: None,
            api_base: default_lark_base(),
        }
    }
}

impl std::fmt::Debug for LarkConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LarkConfig")
            .field("app_id", &self.app_id)
            .field("app_secret", &redact(&self.app_secret))
            .field("api_base", &self.api_base)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolHostConfig {
    /// Command that launches the tool host process
    #[serde(default = "default_toolhost_command")]
    pub command: String,

    /// Arguments passed to the command
    #[serde(default = "default_toolhost_args")]
    pub args: Vec<String>,

    /// Timeout for one tool call, in seconds
    #[serde(default = "default_tool_timeout")]
    pub call_timeout_secs: u64,
}

fn default_toolhost_command() -> String {
    "npx".into()
}
fn default_toolhost_args() -> Vec<String> {
    vec!["@playwright/mcp@latest".into(), "--headless".into()]
}
fn default_tool_timeout() -> u64 {
    180
}

impl Default for ToolHostConfig {
    fn default() -> Self {
        Self {
            command: default_toolhost_command(),
            args: default_toolhost_args(),
            call_timeout_secs: default_tool_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8090
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String {
    "db.sqlite3".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum reasoning/tool rounds per request
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,

    /// Character cap on tool-result narration
    #[serde(default = "default_narration_cap")]
    pub narration_cap: usize,
}

fn default_max_rounds() -> u32 {
    10
}
fn default_narration_cap() -> usize {
    1000
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            narration_cap: default_narration_cap(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `config.toml` in the working directory,
    /// with environment variable overrides.
    ///
    /// Environment variables (highest priority):
    /// - `OPENAI_API_KEY`, `OPENAI_API_BASE`, `CHAT_MODEL`
    /// - `FEISHU_APP_ID`, `FEISHU_APP_SECRET`
    /// - `LARKRELAY_DB_PATH`
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(Path::new("config.toml"))?;

        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            config.model.api_key = Some(key);
        }
        if let Ok(base) = std::env::var("OPENAI_API_BASE") {
            config.model.api_base = base;
        }
        if let Ok(model) = std::env::var("CHAT_MODEL") {
            config.model.chat_model = model;
        }
        if let Ok(app_id) = std::env::var("FEISHU_APP_ID") {
            config.lark.app_id = Some(app_id);
        }
        if let Ok(secret) = std::env::var("FEISHU_APP_SECRET") {
            config.lark.app_secret = Some(secret);
        }
        if let Ok(path) = std::env::var("LARKRELAY_DB_PATH") {
            config.store.db_path = path;
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.max_rounds == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_rounds must be at least 1".into(),
            ));
        }
        if self.model.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "model.max_attempts must be at least 1".into(),
            ));
        }
        if self.toolhost.command.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "toolhost.command must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Whether the model side is usable (an API key is present).
    pub fn has_model_key(&self) -> bool {
        self.model.api_key.is_some()
    }

    /// Whether the platform side is usable (app credentials are present).
    pub fn has_lark_credentials(&self) -> bool {
        self.lark.app_id.is_some() && self.lark.app_secret.is_some()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.agent.max_rounds, 10);
        assert_eq!(config.agent.narration_cap, 1000);
        assert_eq!(config.gateway.port, 8090);
        assert_eq!(config.model.chat_model, "gpt-4o-mini");
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.model.chat_model, config.model.chat_model);
        assert_eq!(parsed.gateway.port, config.gateway.port);
        assert_eq!(parsed.toolhost.command, config.toolhost.command);
    }

    #[test]
    fn zero_rounds_rejected() {
        let config = AppConfig {
            agent: AgentConfig {
                max_rounds: 0,
                ..AgentConfig::default()
            },
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        assert_eq!(result.unwrap().store.db_path, "db.sqlite3");
    }

    #[test]
    fn partial_config_file_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[model]
chat_model = "gpt-4o"

[gateway]
port = 9000
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.model.chat_model, "gpt-4o");
        assert_eq!(config.gateway.port, 9000);
        // Untouched sections keep defaults
        assert_eq!(config.agent.max_rounds, 10);
    }

    #[test]
    fn secrets_redacted_in_debug() {
        let config = AppConfig {
            model: ModelConfig {
                api_key: Some("sk-secret".into()),
                ..ModelConfig::default()
            },
            lark: LarkConfig {
                app_id: Some("cli_123".into()),
                app_secret: Some("topsecret".into()),
                ..LarkConfig::default()
            },
            ..AppConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(!debug.contains("topsecret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toolhost_is_playwright() {
        let config = AppConfig::default();
        assert_eq!(config.toolhost.command, "npx");
        assert!(config.toolhost.args.iter().any(|a| a.contains("playwright")));
    }
}
