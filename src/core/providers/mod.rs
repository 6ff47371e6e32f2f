pub mod ratelimit;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::core::config::{AppConfig, ConfigError, ProviderConfig};
use ratelimit::HeaderConvention;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostTier {
    Free,
    Paid,
    Local,
}

impl std::fmt::Display for CostTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Free => write!(f, "FREE"),
            Self::Paid => write!(f, "PAID"),
            Self::Local => write!(f, "LOCAL"),
        }
    }
}

/// Declared rate limits. Any subset may be known.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_day: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_minute: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_per_minute: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_per_day: Option<u64>,
}

impl RateLimitProfile {
    pub fn is_unlimited(&self) -> bool {
        *self == Self::default()
    }
}

/// One backend the watchdog can probe. Fixed for the process lifetime.
#[derive(Debug, Clone, Serialize)]
pub struct Provider {
    pub id: String,
    pub name: String,
    pub scheme: String,
    pub host: String,
    pub path: String,
    pub model: String,
    pub api_key_env: Option<String>,
    pub tier: CostTier,
    pub rate_limit: RateLimitProfile,
    pub priority: u32,
    pub headers: HeaderConvention,
}

impl Provider {
    pub fn from_config(cfg: &ProviderConfig) -> Self {
        Self {
            id: cfg.id.clone(),
            name: cfg.name.clone(),
            scheme: cfg.scheme.clone(),
            host: cfg.host.clone(),
            path: cfg.path.clone(),
            model: cfg.model.clone(),
            api_key_env: cfg.api_key_env.clone(),
            tier: cfg.tier,
            rate_limit: cfg.rate_limit,
            priority: cfg.priority,
            headers: cfg.headers,
        }
    }

    pub fn url(&self) -> String {
        format!("{}://{}{}", self.scheme, self.host, self.path)
    }

    /// Short human description of the declared limits, e.g. "14400/day".
    pub fn describe_limits(&self) -> String {
        let rl = &self.rate_limit;
        if rl.is_unlimited() {
            return "unlimited".to_string();
        }
        let mut parts = Vec::new();
        if let Some(n) = rl.requests_per_day {
            parts.push(format!("{}/day", n));
        }
        if let Some(n) = rl.requests_per_minute {
            parts.push(format!("{}/min", n));
        }
        if let Some(n) = rl.tokens_per_day {
            parts.push(format!("{} tok/day", n));
        }
        if let Some(n) = rl.tokens_per_minute {
            parts.push(format!("{} tok/min", n));
        }
        parts.join(", ")
    }
}

/// Read-only lookup table of providers, in configuration order.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    providers: Vec<Provider>,
    index: HashMap<String, usize>,
}

impl Registry {
    pub fn new(providers: Vec<Provider>) -> Result<Self, ConfigError> {
        let mut index = HashMap::with_capacity(providers.len());
        for (i, p) in providers.iter().enumerate() {
            if index.insert(p.id.clone(), i).is_some() {
                return Err(ConfigError::Invalid(format!(
                    "duplicate provider id '{}'",
                    p.id
                )));
            }
        }
        Ok(Self { providers, index })
    }

    /// Build from the enabled providers of a config, keeping file order.
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        Self::new(
            config
                .providers
                .iter()
                .filter(|p| p.enabled)
                .map(Provider::from_config)
                .collect(),
        )
    }

    pub fn all(&self) -> &[Provider] {
        &self.providers
    }

    pub fn get(&self, id: &str) -> Option<&Provider> {
        self.index.get(id).map(|&i| &self.providers[i])
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Where API keys come from. The watchdog only asks whether a named
/// credential is present; it never stores or rotates keys.
pub trait CredentialSource: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;
}

/// Reads credentials from environment variables. Empty values count as absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentials;

impl CredentialSource for EnvCredentials {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.trim().is_empty())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn registry_preserves_config_order_and_skips_disabled() {
        let mut config = AppConfig::default();
        config.set_enabled("grok", false);
        let registry = Registry::from_config(&config).unwrap();
        let ids: Vec<&str> = registry.all().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["groq", "kimi", "radeon"]);
        assert!(registry.get("grok").is_none());
    }

    #[test]
    fn registry_rejects_duplicate_ids() {
        let p = provider("a", CostTier::Free, 1, RateLimitProfile::default());
        let err = Registry::new(vec![p.clone(), p]).unwrap_err();
        assert!(err.to_string().contains("duplicate provider id"));
    }

    #[test]
    fn lookup_returns_profile_and_tier() {
        let registry = Registry::new(vec![
            provider("a", CostTier::Free, 1, daily(100)),
            provider("b", CostTier::Local, 2, RateLimitProfile::default()),
        ])
        .unwrap();
        let a = registry.get("a").unwrap();
        assert_eq!(a.rate_limit.requests_per_day, Some(100));
        assert_eq!(a.tier, CostTier::Free);
        assert_eq!(registry.get("b").unwrap().tier, CostTier::Local);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn url_includes_port_and_path() {
        let config = AppConfig::default();
        let registry = Registry::from_config(&config).unwrap();
        assert_eq!(
            registry.get("radeon").unwrap().url(),
            "http://localhost:8080/v1/chat/completions"
        );
        assert_eq!(
            registry.get("groq").unwrap().url(),
            "https://api.groq.com/openai/v1/chat/completions"
        );
    }

    #[test]
    fn describe_limits_lists_declared_windows() {
        let mut p = provider("a", CostTier::Free, 1, daily(14_400));
        assert_eq!(p.describe_limits(), "14400/day");
        p.rate_limit.requests_per_minute = Some(40);
        assert_eq!(p.describe_limits(), "14400/day, 40/min");
        p.rate_limit = RateLimitProfile::default();
        assert_eq!(p.describe_limits(), "unlimited");
        assert!(p.rate_limit.is_unlimited());
    }

    #[test]
    fn env_credentials_ignore_empty_values() {
        std::env::set_var("LLMWATCH_TEST_EMPTY_KEY", "  ");
        assert!(EnvCredentials.get("LLMWATCH_TEST_EMPTY_KEY").is_none());
        std::env::set_var("LLMWATCH_TEST_EMPTY_KEY", "sk-123");
        assert_eq!(EnvCredentials.get("LLMWATCH_TEST_EMPTY_KEY").as_deref(), Some("sk-123"));
        std::env::remove_var("LLMWATCH_TEST_EMPTY_KEY");
    }

    #[test]
    fn cost_tier_display() {
        assert_eq!(CostTier::Free.to_string(), "FREE");
        assert_eq!(CostTier::Local.to_string(), "LOCAL");
    }
}
