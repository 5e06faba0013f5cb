//! Configuration system (layered: code > env > config file > defaults).

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent_loop::controller::DEFAULT_FALLBACK_MESSAGE;
use crate::error::ScriptoriumError;
use crate::util::retry::RetryPolicy;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptoriumConfig {
    pub endpoint: EndpointConfig,
    pub agent: AgentConfig,
    pub tools: ToolConfig,
}

/// Model endpoint settings.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub connect_timeout_ms: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            connect_timeout_ms: 10_000,
        }
    }
}

impl fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[redacted]"))
            .field("model", &self.model)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .finish()
    }
}

/// Turn loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub max_passes: usize,
    pub parallel_tool_calls: bool,
    pub stream_idle_timeout_ms: u64,
    pub identity_timeout_ms: u64,
    pub fallback_message: String,
    pub system_prompt: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_passes: 8,
            parallel_tool_calls: true,
            stream_idle_timeout_ms: 120_000,
            identity_timeout_ms: 2_000,
            fallback_message: DEFAULT_FALLBACK_MESSAGE.to_string(),
            system_prompt: None,
            temperature: None,
            max_tokens: None,
        }
    }
}

/// Tool execution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub timeout_ms: u64,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 2_000,
            timeout_ms: 60_000,
        }
    }
}

impl ScriptoriumConfig {
    /// Load the config file (explicit path, else `~/.scriptorium/config.toml`
    /// if present), then apply `.env` and environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ScriptoriumError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = Self::default_path();
                if default.is_file() {
                    Self::from_file(&default)?
                } else {
                    Self::default()
                }
            }
        };
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        config.apply_env_from(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ScriptoriumError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ScriptoriumError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn default_path() -> PathBuf {
        directories::UserDirs::new()
            .map(|dirs| dirs.home_dir().join(".scriptorium"))
            .unwrap_or_else(|| PathBuf::from(".scriptorium"))
            .join("config.toml")
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ScriptoriumError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = first_set(&lookup, &["SCRIPTORIUM_API_KEY", "OPENAI_API_KEY"]) {
            self.endpoint.api_key = Some(key);
        }
        if let Some(url) = first_set(&lookup, &["SCRIPTORIUM_BASE_URL", "OPENAI_BASE_URL"]) {
            self.endpoint.base_url = url;
        }
        if let Some(model) = first_set(&lookup, &["SCRIPTORIUM_MODEL"]) {
            self.endpoint.model = model;
        }
        if let Some(raw) = first_set(&lookup, &["SCRIPTORIUM_MAX_PASSES"]) {
            self.agent.max_passes = parse_env("SCRIPTORIUM_MAX_PASSES", &raw)?;
        }
        if let Some(raw) = first_set(&lookup, &["SCRIPTORIUM_TOOL_MAX_ATTEMPTS"]) {
            self.tools.max_attempts = parse_env("SCRIPTORIUM_TOOL_MAX_ATTEMPTS", &raw)?;
        }
        if let Some(raw) = first_set(&lookup, &["SCRIPTORIUM_TOOL_TIMEOUT_MS"]) {
            self.tools.timeout_ms = parse_env("SCRIPTORIUM_TOOL_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = first_set(&lookup, &["SCRIPTORIUM_IDENTITY_TIMEOUT_MS"]) {
            self.agent.identity_timeout_ms = parse_env("SCRIPTORIUM_IDENTITY_TIMEOUT_MS", &raw)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ScriptoriumError> {
        if self.agent.max_passes == 0 {
            return Err(ScriptoriumError::Configuration(
                "agent.max_passes must be at least 1".to_string(),
            ));
        }
        if self.tools.max_attempts == 0 {
            return Err(ScriptoriumError::Configuration(
                "tools.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.endpoint.model.trim().is_empty() {
            return Err(ScriptoriumError::Configuration(
                "endpoint.model must not be empty".to_string(),
            ));
        }
        if self.tools.initial_backoff_ms > self.tools.max_backoff_ms {
            return Err(ScriptoriumError::Configuration(
                "tools.initial_backoff_ms must not exceed tools.max_backoff_ms".to_string(),
            ));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.tools.max_attempts,
            initial_backoff: Duration::from_millis(self.tools.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.tools.max_backoff_ms),
            ..RetryPolicy::default()
        }
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.tools.timeout_ms)
    }
}

fn first_set<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    keys.iter()
        .find_map(|k| lookup(k).filter(|v| !v.trim().is_empty()))
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ScriptoriumError> {
    raw.trim()
        .parse()
        .map_err(|_| ScriptoriumError::Configuration(format!("{key} must be a non-negative integer, got {raw:?}")))
}
