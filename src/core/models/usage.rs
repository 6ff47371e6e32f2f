use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted per-provider counters for the current calendar day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaUsage {
    /// Requests sent today. Never decreases except on day rollover or reset.
    #[serde(default)]
    pub requests_used: u64,
    /// Approximate: a fixed estimate is charged per probe.
    #[serde(default)]
    pub tokens_used: u64,
    /// Last remaining-requests figure reported by the vendor, if any.
    #[serde(default)]
    pub requests_remaining: Option<u64>,
    #[serde(default)]
    pub tokens_remaining: Option<u64>,
    /// Opaque vendor reset hint, e.g. "2m59.56s".
    #[serde(default)]
    pub reset_at: Option<String>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl QuotaUsage {
    /// Percentage of a daily request limit already consumed, capped at 100.
    pub fn used_percent(&self, requests_per_day: Option<u64>) -> Option<f64> {
        let limit = requests_per_day.filter(|&l| l > 0)?;
        let used = match self.requests_remaining {
            Some(remaining) => limit.saturating_sub(remaining).max(self.requests_used),
            None => self.requests_used,
        };
        Some((used as f64 / limit as f64 * 100.0).min(100.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn used_percent_without_limit_is_none() {
        let usage = QuotaUsage {
            requests_used: 10,
            ..QuotaUsage::default()
        };
        assert!(usage.used_percent(None).is_none());
        assert!(usage.used_percent(Some(0)).is_none());
    }

    #[test]
    fn used_percent_from_counter() {
        let usage = QuotaUsage {
            requests_used: 95,
            ..QuotaUsage::default()
        };
        assert!((usage.used_percent(Some(100)).unwrap() - 95.0).abs() < 1e-10);
    }

    #[test]
    fn used_percent_caps_at_100() {
        let usage = QuotaUsage {
            requests_used: 250,
            ..QuotaUsage::default()
        };
        assert!((usage.used_percent(Some(100)).unwrap() - 100.0).abs() < 1e-10);
    }

    #[test]
    fn deserialize_partial_record_defaults_missing_fields() {
        let usage: QuotaUsage = serde_json::from_str(r#"{"requests_used": 3}"#).unwrap();
        assert_eq!(usage.requests_used, 3);
        assert_eq!(usage.tokens_used, 0);
        assert!(usage.requests_remaining.is_none());
    }
}
