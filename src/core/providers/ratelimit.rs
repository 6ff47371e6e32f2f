//! Rate-limit metadata extraction.
//!
//! Vendors expose remaining capacity under different header names. Each
//! convention is a [`RateLimitParser`]; the one used for a provider is picked
//! from its configured [`HeaderConvention`].

use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raw rate-limit headers captured from one response, lower-cased keys.
pub type RateLimitHeaders = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderConvention {
    /// Try the OpenAI-style headers first, then the generic counter.
    #[default]
    Auto,
    /// `x-ratelimit-remaining-requests` / `-tokens` / `x-ratelimit-reset-requests`.
    #[serde(rename = "openai")]
    OpenAi,
    /// A single `*ratelimit-remaining` or `*quota-remaining` counter.
    Generic,
}

/// Remaining capacity normalized across vendor conventions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemainingCapacity {
    pub requests_remaining: Option<u64>,
    pub tokens_remaining: Option<u64>,
    pub reset_at: Option<String>,
}

impl RemainingCapacity {
    pub fn is_empty(&self) -> bool {
        self.requests_remaining.is_none()
            && self.tokens_remaining.is_none()
            && self.reset_at.is_none()
    }
}

pub trait RateLimitParser: Send + Sync {
    fn extract(&self, headers: &RateLimitHeaders) -> RemainingCapacity;
}

pub struct OpenAiHeaders;

impl RateLimitParser for OpenAiHeaders {
    fn extract(&self, headers: &RateLimitHeaders) -> RemainingCapacity {
        RemainingCapacity {
            requests_remaining: headers
                .get("x-ratelimit-remaining-requests")
                .and_then(|v| parse_count(v)),
            tokens_remaining: headers
                .get("x-ratelimit-remaining-tokens")
                .and_then(|v| parse_count(v)),
            reset_at: headers.get("x-ratelimit-reset-requests").cloned(),
        }
    }
}

pub struct GenericHeaders;

impl RateLimitParser for GenericHeaders {
    fn extract(&self, headers: &RateLimitHeaders) -> RemainingCapacity {
        let mut out = RemainingCapacity::default();
        for (key, value) in headers {
            if key.ends_with("ratelimit-remaining") || key.ends_with("quota-remaining") {
                if out.requests_remaining.is_none() {
                    out.requests_remaining = parse_count(value);
                }
            } else if key.ends_with("ratelimit-reset") || key.ends_with("quota-reset") {
                if out.reset_at.is_none() {
                    out.reset_at = Some(value.clone());
                }
            }
        }
        out
    }
}

pub struct AutoHeaders;

impl RateLimitParser for AutoHeaders {
    fn extract(&self, headers: &RateLimitHeaders) -> RemainingCapacity {
        let openai = OpenAiHeaders.extract(headers);
        if !openai.is_empty() {
            return openai;
        }
        GenericHeaders.extract(headers)
    }
}

pub fn parser_for(convention: HeaderConvention) -> &'static dyn RateLimitParser {
    match convention {
        HeaderConvention::Auto => &AutoHeaders,
        HeaderConvention::OpenAi => &OpenAiHeaders,
        HeaderConvention::Generic => &GenericHeaders,
    }
}

/// Capture every header whose name mentions `ratelimit` or `quota`.
pub fn collect_headers(headers: &HeaderMap) -> RateLimitHeaders {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let key = name.as_str().to_ascii_lowercase();
            if !(key.contains("ratelimit") || key.contains("quota")) {
                return None;
            }
            let value = value.to_str().ok()?.trim().to_string();
            Some((key, value))
        })
        .collect()
}

/// Parse a header count, tolerating whitespace and decimal forms ("12.0").
fn parse_count(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if let Ok(n) = raw.parse::<u64>() {
        return Some(n);
    }
    match raw.parse::<f64>() {
        Ok(f) if f.is_finite() && f >= 0.0 => Some(f.floor() as u64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderName, HeaderValue};

    fn headers(pairs: &[(&str, &str)]) -> RateLimitHeaders {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn openai_convention_reads_requests_tokens_and_reset() {
        let h = headers(&[
            ("x-ratelimit-limit-requests", "14400"),
            ("x-ratelimit-remaining-requests", "14370"),
            ("x-ratelimit-remaining-tokens", "5980"),
            ("x-ratelimit-reset-requests", "2m59.56s"),
        ]);
        let cap = OpenAiHeaders.extract(&h);
        assert_eq!(cap.requests_remaining, Some(14370));
        assert_eq!(cap.tokens_remaining, Some(5980));
        assert_eq!(cap.reset_at.as_deref(), Some("2m59.56s"));
    }

    #[test]
    fn generic_convention_reads_single_counter() {
        let h = headers(&[("x-ratelimit-remaining", "37"), ("x-ratelimit-reset", "1700000000")]);
        let cap = GenericHeaders.extract(&h);
        assert_eq!(cap.requests_remaining, Some(37));
        assert_eq!(cap.tokens_remaining, None);
        assert_eq!(cap.reset_at.as_deref(), Some("1700000000"));
    }

    #[test]
    fn generic_convention_accepts_quota_counter() {
        let h = headers(&[("x-quota-remaining", "8")]);
        assert_eq!(GenericHeaders.extract(&h).requests_remaining, Some(8));
    }

    #[test]
    fn openai_parser_ignores_generic_headers() {
        let h = headers(&[("x-ratelimit-remaining", "37")]);
        assert!(OpenAiHeaders.extract(&h).is_empty());
    }

    #[test]
    fn auto_falls_back_to_generic() {
        let h = headers(&[("ratelimit-remaining", "12")]);
        let cap = parser_for(HeaderConvention::Auto).extract(&h);
        assert_eq!(cap.requests_remaining, Some(12));
    }

    #[test]
    fn auto_prefers_openai_when_present() {
        let h = headers(&[
            ("x-ratelimit-remaining", "1"),
            ("x-ratelimit-remaining-requests", "99"),
        ]);
        let cap = parser_for(HeaderConvention::Auto).extract(&h);
        assert_eq!(cap.requests_remaining, Some(99));
    }

    #[test]
    fn unparseable_counts_are_dropped() {
        let h = headers(&[("x-ratelimit-remaining-requests", "lots")]);
        assert_eq!(OpenAiHeaders.extract(&h).requests_remaining, None);
    }

    #[test]
    fn parse_count_tolerates_decimals_and_whitespace() {
        assert_eq!(parse_count(" 42 "), Some(42));
        assert_eq!(parse_count("12.7"), Some(12));
        assert_eq!(parse_count("-3"), None);
        assert_eq!(parse_count(""), None);
    }

    #[test]
    fn collect_headers_filters_case_insensitively() {
        let mut map = HeaderMap::new();
        map.insert(
            HeaderName::from_static("x-ratelimit-remaining-requests"),
            HeaderValue::from_static("10"),
        );
        map.insert(HeaderName::from_static("x-quota-left"), HeaderValue::from_static("3"));
        map.insert(
            HeaderName::from_static("content-type"),
            HeaderValue::from_static("application/json"),
        );
        let collected = collect_headers(&map);
        assert_eq!(collected.len(), 2);
        assert_eq!(collected.get("x-ratelimit-remaining-requests").map(String::as_str), Some("10"));
        assert!(collected.contains_key("x-quota-left"));
        assert!(!collected.contains_key("content-type"));
    }

    #[test]
    fn header_convention_deserializes_from_config_names() {
        #[derive(Deserialize)]
        struct W {
            headers: HeaderConvention,
        }
        let w: W = toml::from_str(r#"headers = "openai""#).unwrap();
        assert_eq!(w.headers, HeaderConvention::OpenAi);
        let w: W = toml::from_str(r#"headers = "generic""#).unwrap();
        assert_eq!(w.headers, HeaderConvention::Generic);
    }
}
