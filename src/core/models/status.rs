use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::providers::ratelimit::RateLimitHeaders;

/// Classification of one probe. Only the failure variants carry a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum ProbeOutcome {
    /// Completed and parsed with no error field. `response` is a truncated
    /// sample of the reply, diagnostic only.
    Online { response: String },
    /// Completed, but the body signalled an error or could not be parsed.
    Error { error: String },
    /// No response within the timeout budget.
    Timeout { error: String },
    /// Transport failure: refused connection, DNS, TLS.
    Offline { error: String },
    /// The provider's credential is not configured; nothing was sent.
    NoKey { credential: String },
}

impl ProbeOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Online { .. } => "online",
            Self::Error { .. } => "error",
            Self::Timeout { .. } => "timeout",
            Self::Offline { .. } => "offline",
            Self::NoKey { .. } => "no-key",
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, Self::Online { .. })
    }

    /// Whether a request left the process, i.e. whether it costs quota.
    pub fn counts_against_quota(&self) -> bool {
        !matches!(self, Self::NoKey { .. })
    }

    /// Whether a response arrived, so its metadata is meaningful.
    pub fn completed(&self) -> bool {
        matches!(self, Self::Online { .. } | Self::Error { .. })
    }

    pub fn error_detail(&self) -> Option<String> {
        match self {
            Self::Online { .. } => None,
            Self::Error { error } | Self::Timeout { error } | Self::Offline { error } => {
                Some(error.clone())
            }
            Self::NoKey { credential } => Some(format!("Missing {}", credential)),
        }
    }
}

impl std::fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Latest probe result for one provider, replaced wholesale every batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderStatus {
    #[serde(flatten)]
    pub outcome: ProbeOutcome,
    pub latency_ms: u64,
    pub checked_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "RateLimitHeaders::is_empty")]
    pub rate_limit: RateLimitHeaders,
}
