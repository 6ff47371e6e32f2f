//! Ranking of online providers into a best-provider recommendation.
//!
//! Pure function of registry, statuses and quota counters; recomputed on
//! every request and never cached.

use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::core::models::status::ProviderStatus;
use crate::core::models::usage::QuotaUsage;
use crate::core::providers::{CostTier, Provider, RateLimitProfile, Registry};

/// Estimated share of a provider's daily quota still available.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Capacity {
    /// No daily limit declared (local backends, pay-as-you-go).
    Unlimited,
    Percent(f64),
}

impl Capacity {
    pub fn from_usage(limits: &RateLimitProfile, usage: &QuotaUsage) -> Self {
        let requests = limits
            .requests_per_day
            .filter(|&l| l > 0)
            .map(|limit| remaining_percent(limit, usage.requests_remaining, usage.requests_used));
        let tokens = limits
            .tokens_per_day
            .filter(|&l| l > 0)
            .map(|limit| remaining_percent(limit, usage.tokens_remaining, usage.tokens_used));

        match (requests, tokens) {
            (Some(r), Some(t)) => Self::Percent(r.min(t)),
            (Some(p), None) | (None, Some(p)) => Self::Percent(p),
            (None, None) => Self::Unlimited,
        }
    }

    /// Strictly above `threshold` percent. Unlimited always is.
    pub fn exceeds(&self, threshold: f64) -> bool {
        match self {
            Self::Unlimited => true,
            Self::Percent(p) => *p > threshold,
        }
    }
}

fn remaining_percent(limit: u64, remaining: Option<u64>, used: u64) -> f64 {
    let left = match remaining {
        Some(r) => r.min(limit),
        None => limit.saturating_sub(used),
    };
    left as f64 * 100.0 / limit as f64
}

impl std::fmt::Display for Capacity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unlimited => write!(f, "unlimited"),
            Self::Percent(p) => write!(f, "{:.0}%", p),
        }
    }
}

impl Serialize for Capacity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Unlimited => serializer.serialize_str("unlimited"),
            Self::Percent(p) => serializer.serialize_f64(*p),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub id: String,
    pub name: String,
    pub tier: CostTier,
    pub capacity: Capacity,
    pub latency_ms: u64,
    pub priority: u32,
}

/// Online providers, best first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Recommendation {
    pub candidates: Vec<Candidate>,
}

impl Recommendation {
    pub fn best(&self) -> Option<&Candidate> {
        self.candidates.first()
    }
}

/// Rank every online provider.
///
/// Order: local tier first, then capacity strictly above `threshold`, then
/// ascending priority. Remaining ties keep registry order.
pub fn recommend(
    registry: &Registry,
    statuses: &HashMap<String, ProviderStatus>,
    quotas: &HashMap<String, QuotaUsage>,
    threshold: f64,
) -> Recommendation {
    let mut candidates: Vec<Candidate> = registry
        .all()
        .iter()
        .filter_map(|p| {
            let status = statuses.get(&p.id).filter(|s| s.outcome.is_online())?;
            Some(candidate(p, status, quotas.get(&p.id)))
        })
        .collect();

    // sort_by is stable, so equal candidates stay in registry order.
    candidates.sort_by(|a, b| compare(a, b, threshold));

    Recommendation { candidates }
}

fn candidate(p: &Provider, status: &ProviderStatus, usage: Option<&QuotaUsage>) -> Candidate {
    let usage = usage.cloned().unwrap_or_default();
    Candidate {
        id: p.id.clone(),
        name: p.name.clone(),
        tier: p.tier,
        capacity: Capacity::from_usage(&p.rate_limit, &usage),
        latency_ms: status.latency_ms,
        priority: p.priority,
    }
}

fn compare(a: &Candidate, b: &Candidate, threshold: f64) -> Ordering {
    let local = |c: &Candidate| c.tier == CostTier::Local;
    local(b)
        .cmp(&local(a))
        .then_with(|| b.capacity.exceeds(threshold).cmp(&a.capacity.exceeds(threshold)))
        .then_with(|| a.priority.cmp(&b.priority))
}
