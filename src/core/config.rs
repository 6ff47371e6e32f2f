use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use thiserror::Error;

use crate::core::providers::ratelimit::HeaderConvention;
use crate::core::providers::{CostTier, RateLimitProfile};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default = "default_history_display")]
    pub history_display: usize,
    /// Capacity percentage a provider must exceed to outrank one below it.
    #[serde(default = "default_capacity_threshold")]
    pub capacity_threshold: f64,
    /// Tokens charged to the daily counter for each counted probe.
    #[serde(default = "default_token_estimate")]
    pub token_estimate: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,
}

fn default_bind() -> String {
    "127.0.0.1:3457".to_string()
}
fn default_interval_secs() -> u64 {
    30
}
fn default_probe_timeout_secs() -> u64 {
    5
}
fn default_history_capacity() -> usize {
    100
}
fn default_history_display() -> usize {
    20
}
fn default_capacity_threshold() -> f64 {
    20.0
}
fn default_token_estimate() -> u64 {
    25
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            interval_secs: default_interval_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            history_capacity: default_history_capacity(),
            history_display: default_history_display(),
            capacity_threshold: default_capacity_threshold(),
            token_estimate: default_token_estimate(),
            state_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_scheme")]
    pub scheme: String,
    pub host: String,
    #[serde(default = "default_path")]
    pub path: String,
    pub model: String,
    /// Name of the environment variable holding the API key. `None` for
    /// local backends that need no credential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    pub tier: CostTier,
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub headers: HeaderConvention,
    #[serde(default)]
    pub rate_limit: RateLimitProfile,
}

fn default_true() -> bool {
    true
}
fn default_scheme() -> String {
    "https".to_string()
}
fn default_path() -> String {
    "/v1/chat/completions".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            settings: Settings::default(),
            providers: vec![
                ProviderConfig {
                    id: "groq".into(),
                    name: "Groq (Llama 3.3 70B)".into(),
                    enabled: true,
                    scheme: "https".into(),
                    host: "api.groq.com".into(),
                    path: "/openai/v1/chat/completions".into(),
                    model: "llama-3.3-70b-versatile".into(),
                    api_key_env: Some("GROQ_API_KEY".into()),
                    tier: CostTier::Free,
                    priority: 2,
                    headers: HeaderConvention::OpenAi,
                    rate_limit: RateLimitProfile {
                        requests_per_day: Some(14_400),
                        ..RateLimitProfile::default()
                    },
                },
                ProviderConfig {
                    id: "grok".into(),
                    name: "Grok (xAI)".into(),
                    enabled: true,
                    scheme: "https".into(),
                    host: "api.x.ai".into(),
                    path: "/v1/chat/completions".into(),
                    model: "grok-2-latest".into(),
                    api_key_env: Some("XAI_API_KEY".into()),
                    tier: CostTier::Paid,
                    priority: 4,
                    headers: HeaderConvention::Auto,
                    rate_limit: RateLimitProfile::default(),
                },
                ProviderConfig {
                    id: "kimi".into(),
                    name: "KIMI K2.5 (NVIDIA)".into(),
                    enabled: true,
                    scheme: "https".into(),
                    host: "integrate.api.nvidia.com".into(),
                    path: "/v1/chat/completions".into(),
                    model: "moonshotai/kimi-k2.5".into(),
                    api_key_env: Some("NVIDIA_API_KEY".into()),
                    tier: CostTier::Free,
                    priority: 3,
                    headers: HeaderConvention::Generic,
                    rate_limit: RateLimitProfile {
                        requests_per_minute: Some(40),
                        ..RateLimitProfile::default()
                    },
                },
                ProviderConfig {
                    id: "radeon".into(),
                    name: "LLaMA 3 8B (Radeon Local)".into(),
                    enabled: true,
                    scheme: "http".into(),
                    host: "localhost:8080".into(),
                    path: "/v1/chat/completions".into(),
                    model: "llama-3-8b".into(),
                    api_key_env: None,
                    tier: CostTier::Local,
                    priority: 1,
                    headers: HeaderConvention::Auto,
                    rate_limit: RateLimitProfile::default(),
                },
            ],
        }
    }
}

impl AppConfig {
    /// Get the config file path, respecting XDG_CONFIG_HOME
    pub fn config_path() -> PathBuf {
        let config_dir = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("~"))
                    .join(".config")
            });
        config_dir.join("llmwatch").join("config.toml")
    }

    /// Where quota counters are persisted: the configured `state_file`, else
    /// under XDG_STATE_HOME.
    pub fn state_path(&self) -> PathBuf {
        if let Some(path) = &self.settings.state_file {
            return path.clone();
        }
        let state_dir = std::env::var("XDG_STATE_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("~"))
                    .join(".local")
                    .join("state")
            });
        state_dir.join("llmwatch").join("quota.json")
    }

    /// Load config from the default path, falling back to defaults if not found
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Serialize and write this config to the config file path.
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = Self::config_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Invalid(format!("cannot serialize config: {}", e)))?;
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Flip the `enabled` flag of a provider. Returns `false` if the id is unknown.
    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> bool {
        match self.providers.iter_mut().find(|p| p.id == id) {
            Some(p) => {
                p.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// `validate` as an error, for commands that must not run on a bad config.
    pub fn ensure_valid(&self) -> Result<(), ConfigError> {
        let issues = self.validate();
        if issues.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(issues.join("; ")))
        }
    }

    /// Validate the config
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        let s = &self.settings;
        if s.interval_secs == 0 {
            issues.push("interval_secs must be greater than 0".to_string());
        }
        if s.probe_timeout_secs == 0 {
            issues.push("probe_timeout_secs must be greater than 0".to_string());
        }
        if s.history_capacity == 0 {
            issues.push("history_capacity must be greater than 0".to_string());
        }
        if !(0.0..=100.0).contains(&s.capacity_threshold) {
            issues.push(format!(
                "Invalid capacity_threshold: {} (must be between 0 and 100)",
                s.capacity_threshold
            ));
        }
        if s.bind.parse::<std::net::SocketAddr>().is_err() {
            issues.push(format!("Invalid bind address: '{}'", s.bind));
        }

        let mut seen = HashSet::new();
        for p in &self.providers {
            if p.id.trim().is_empty() {
                issues.push("Provider with empty id".to_string());
            } else if !seen.insert(p.id.as_str()) {
                issues.push(format!("Duplicate provider id: '{}'", p.id));
            }
            if !["http", "https"].contains(&p.scheme.as_str()) {
                issues.push(format!(
                    "Provider '{}': invalid scheme '{}' (must be http|https)",
                    p.id, p.scheme
                ));
            }
            if p.host.trim().is_empty() {
                issues.push(format!("Provider '{}': empty host", p.id));
            }
            if !p.path.starts_with('/') {
                issues.push(format!(
                    "Provider '{}': path '{}' must start with '/'",
                    p.id, p.path
                ));
            }
        }
        issues
    }
}
