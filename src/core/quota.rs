//! Persisted per-provider quota counters with daily rollover.
//!
//! Each provider's counters sit behind their own mutex; writing the file is
//! serialized separately so concurrent probes never lose an update.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::models::status::ProbeOutcome;
use crate::core::models::usage::QuotaUsage;
use crate::core::providers::ratelimit::{parser_for, RateLimitHeaders};
use crate::core::providers::{Provider, Registry};

#[derive(Error, Debug)]
pub enum QuotaError {
    #[error("Failed to access quota file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed quota file: {0}")]
    Json(#[from] serde_json::Error),
}

/// On-disk record: the day the counters apply to plus every provider's usage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaFile {
    pub date: NaiveDate,
    #[serde(default)]
    pub providers: BTreeMap<String, QuotaUsage>,
}

pub struct QuotaStore {
    path: Option<PathBuf>,
    token_estimate: u64,
    date: Mutex<NaiveDate>,
    entries: HashMap<String, Mutex<QuotaUsage>>,
    persist_lock: Mutex<()>,
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    // A panicked writer leaves plain counters behind, which are still usable.
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl QuotaStore {
    /// Load counters from `path`. Unreadable or stale files fall back to zero.
    pub fn load(path: PathBuf, registry: &Registry, token_estimate: u64, today: NaiveDate) -> Self {
        let stored = match read_file(&path) {
            Ok(Some(file)) => Some(file),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Could not read quota file, starting from zero");
                None
            }
        };
        let store = Self::build(Some(path), registry, token_estimate, today, stored);
        store.day_rollover_check(today);
        store
    }

    /// Store with no backing file. Used by one-shot commands and tests.
    pub fn in_memory(registry: &Registry, token_estimate: u64, today: NaiveDate) -> Self {
        Self::build(None, registry, token_estimate, today, None)
    }

    fn build(
        path: Option<PathBuf>,
        registry: &Registry,
        token_estimate: u64,
        today: NaiveDate,
        stored: Option<QuotaFile>,
    ) -> Self {
        let (date, mut saved) = match stored {
            Some(file) => (file.date, file.providers),
            None => (today, BTreeMap::new()),
        };
        // Counters for providers no longer registered are dropped here.
        let entries = registry
            .all()
            .iter()
            .map(|p| {
                let usage = saved.remove(&p.id).unwrap_or_default();
                (p.id.clone(), Mutex::new(usage))
            })
            .collect();
        Self {
            path,
            token_estimate,
            date: Mutex::new(date),
            entries,
            persist_lock: Mutex::new(()),
        }
    }

    pub fn date(&self) -> NaiveDate {
        *lock(&self.date)
    }

    /// Zero every counter if the stored day differs from `today`. Returns
    /// whether a rollover happened.
    pub fn day_rollover_check(&self, today: NaiveDate) -> bool {
        {
            let mut date = lock(&self.date);
            if *date == today {
                return false;
            }
            let previous = *date;
            info!(%previous, %today, "Quota day rollover, zeroing counters");
            *date = today;
            for entry in self.entries.values() {
                *lock(entry) = QuotaUsage::default();
            }
        }
        self.persist();
        true
    }

    /// Fold one probe result into the provider's counters and persist.
    ///
    /// `no-key` outcomes leave the counters untouched. Every other outcome
    /// charges one request and the token estimate; vendor metadata, when
    /// present, then raises the counters to what the vendor reports.
    pub fn apply_probe_result(
        &self,
        provider: &Provider,
        outcome: &ProbeOutcome,
        metadata: &RateLimitHeaders,
        now: DateTime<Utc>,
    ) {
        if !outcome.counts_against_quota() {
            return;
        }
        let Some(entry) = self.entries.get(&provider.id) else {
            warn!(provider = %provider.id, "Quota update for unregistered provider ignored");
            return;
        };

        {
            let mut usage = lock(entry);
            usage.requests_used = usage.requests_used.saturating_add(1);
            usage.tokens_used = usage.tokens_used.saturating_add(self.token_estimate);

            if outcome.completed() && !metadata.is_empty() {
                let capacity = parser_for(provider.headers).extract(metadata);
                let limits = &provider.rate_limit;

                if let Some(remaining) = capacity.requests_remaining {
                    usage.requests_remaining = Some(remaining);
                    if let Some(daily) = limits.requests_per_day {
                        usage.requests_used = usage.requests_used.max(daily.saturating_sub(remaining));
                    } else if let Some(per_minute) = limits.requests_per_minute {
                        // Lower bound only: a minute window cannot be projected
                        // onto a whole day.
                        usage.requests_used =
                            usage.requests_used.max(per_minute.saturating_sub(remaining));
                    }
                }
                if let Some(remaining) = capacity.tokens_remaining {
                    usage.tokens_remaining = Some(remaining);
                    if let Some(daily) = limits.tokens_per_day {
                        usage.tokens_used = usage.tokens_used.max(daily.saturating_sub(remaining));
                    } else if let Some(per_minute) = limits.tokens_per_minute {
                        usage.tokens_used = usage.tokens_used.max(per_minute.saturating_sub(remaining));
                    }
                }
                if capacity.reset_at.is_some() {
                    usage.reset_at = capacity.reset_at;
                }
            }
            usage.last_updated = Some(now);
            debug!(
                provider = %provider.id,
                requests_used = usage.requests_used,
                requests_remaining = ?usage.requests_remaining,
                "quota updated"
            );
        }
        self.persist();
    }

    pub fn current_usage(&self, provider_id: &str) -> Option<QuotaUsage> {
        self.entries.get(provider_id).map(|e| lock(e).clone())
    }

    /// Copy of every provider's counters.
    pub fn snapshot(&self) -> HashMap<String, QuotaUsage> {
        self.entries
            .iter()
            .map(|(id, e)| (id.clone(), lock(e).clone()))
            .collect()
    }

    /// Zero all counters and clear remaining/reset hints, then persist.
    pub fn reset_all(&self, now: DateTime<Utc>) {
        for entry in self.entries.values() {
            *lock(entry) = QuotaUsage {
                last_updated: Some(now),
                ..QuotaUsage::default()
            };
        }
        info!("Quota counters reset");
        self.persist();
    }

    fn to_file(&self) -> QuotaFile {
        QuotaFile {
            date: self.date(),
            providers: self
                .entries
                .iter()
                .map(|(id, e)| (id.clone(), lock(e).clone()))
                .collect(),
        }
    }

    /// Write the current state. Failures are logged, never fatal.
    fn persist(&self) {
        let Some(path) = &self.path else {
            return;
        };
        let _guard = lock(&self.persist_lock);
        if let Err(e) = write_file(path, &self.to_file()) {
            warn!(error = %e, "Failed to persist quota counters");
        }
    }
}

fn read_file(path: &Path) -> Result<Option<QuotaFile>, QuotaError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(QuotaError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn write_file(path: &Path, file: &QuotaFile) -> Result<(), QuotaError> {
    let io_err = |source| QuotaError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let json = serde_json::to_string_pretty(file)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)?;
    Ok(())
}
