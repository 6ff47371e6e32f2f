//! Synthetic health probe: one tiny completion request per provider.

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::core::models::status::{ProbeOutcome, ProviderStatus};
use crate::core::providers::ratelimit::{collect_headers, RateLimitHeaders};
use crate::core::providers::{CredentialSource, Provider};

const PROBE_PROMPT: &str = "Say \"OK\" and nothing else.";
const PROBE_MAX_TOKENS: u32 = 10;
const SAMPLE_CHARS: usize = 100;

pub struct Prober {
    client: reqwest::Client,
    timeout: Duration,
    credentials: Arc<dyn CredentialSource>,
}

impl Prober {
    pub fn new(timeout: Duration, credentials: Arc<dyn CredentialSource>) -> Result<Self> {
        // The hard cutoff is applied around the whole exchange in `probe`.
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            timeout,
            credentials,
        })
    }

    /// Probe one provider. Always yields a status; failures are outcomes.
    pub async fn probe(&self, provider: &Provider) -> ProviderStatus {
        let api_key = match &provider.api_key_env {
            Some(name) => match self.credentials.get(name) {
                Some(key) => Some(key),
                None => {
                    return ProviderStatus {
                        outcome: ProbeOutcome::NoKey {
                            credential: name.clone(),
                        },
                        latency_ms: 0,
                        checked_at: Utc::now(),
                        rate_limit: RateLimitHeaders::new(),
                    };
                }
            },
            None => None,
        };

        let started = Instant::now();
        // Dropping the exchange future on expiry discards any late response.
        let result = tokio::time::timeout(self.timeout, self.exchange(provider, api_key)).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let (outcome, rate_limit, latency_ms) = match result {
            Ok((outcome, headers)) => (outcome, headers, latency_ms),
            Err(_) => (
                ProbeOutcome::Timeout {
                    error: format!("Request timed out ({}s)", self.timeout.as_secs_f64()),
                },
                RateLimitHeaders::new(),
                self.timeout.as_millis() as u64,
            ),
        };

        debug!(
            provider = %provider.id,
            outcome = outcome.label(),
            latency_ms,
            headers = rate_limit.len(),
            "probe finished"
        );

        ProviderStatus {
            outcome,
            latency_ms,
            checked_at: Utc::now(),
            rate_limit,
        }
    }

    async fn exchange(
        &self,
        provider: &Provider,
        api_key: Option<String>,
    ) -> (ProbeOutcome, RateLimitHeaders) {
        let body = json!({
            "model": provider.model,
            "messages": [{ "role": "user", "content": PROBE_PROMPT }],
            "max_tokens": PROBE_MAX_TOKENS,
            "temperature": 0,
        });

        let mut request = self
            .client
            .post(provider.url())
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => return (transport_outcome(&e), RateLimitHeaders::new()),
        };

        let status = response.status();
        let headers = collect_headers(response.headers());
        let text = match response.text().await {
            Ok(t) => t,
            Err(e) => return (transport_outcome(&e), headers),
        };

        (classify_body(status, &text), headers)
    }
}

fn transport_outcome(err: &reqwest::Error) -> ProbeOutcome {
    if err.is_timeout() {
        ProbeOutcome::Timeout {
            error: error_chain(err),
        }
    } else {
        ProbeOutcome::Offline {
            error: error_chain(err),
        }
    }
}

/// Flatten an error and its sources into one line.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut msg = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        msg.push_str(": ");
        msg.push_str(&inner.to_string());
        source = inner.source();
    }
    msg
}

/// Classify a completed response body.
fn classify_body(status: reqwest::StatusCode, text: &str) -> ProbeOutcome {
    let json: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => {
            return ProbeOutcome::Error {
                error: format!("Parse error: {}", truncate(text, SAMPLE_CHARS)),
            };
        }
    };

    if let Some(err) = json.get("error").filter(|e| !e.is_null()) {
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| err.as_str().map(str::to_string))
            .unwrap_or_else(|| err.to_string());
        return ProbeOutcome::Error { error: message };
    }

    if !status.is_success() {
        return ProbeOutcome::Error {
            error: format!("HTTP {}", status.as_u16()),
        };
    }

    let content = json
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .unwrap_or_default();
    ProbeOutcome::Online {
        response: truncate(content, SAMPLE_CHARS),
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
