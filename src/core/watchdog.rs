//! The coordinator that owns all mutable watchdog state.
//!
//! Probing, quota accounting and history all flow through [`Watchdog`]. A
//! batch replaces every provider's status in one write, so readers never see
//! a half-finished batch, and at most one batch runs at a time.

use anyhow::Result;
use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

use crate::core::config::AppConfig;
use crate::core::history::{HistoryEntry, HistoryRing};
use crate::core::models::status::{ProbeOutcome, ProviderStatus};
use crate::core::models::usage::QuotaUsage;
use crate::core::probe::Prober;
use crate::core::providers::ratelimit::RateLimitHeaders;
use crate::core::providers::{CredentialSource, Provider, Registry};
use crate::core::quota::QuotaStore;
use crate::core::recommend::{recommend, Candidate, Recommendation};

/// Result of asking for a batch.
#[derive(Debug, Clone)]
pub enum BatchOutcome {
    /// This call ran the batch.
    Ran(BTreeMap<String, ProviderStatus>),
    /// Another batch finished while this call waited; its results are returned.
    Coalesced(BTreeMap<String, ProviderStatus>),
}

impl BatchOutcome {
    pub fn results(&self) -> &BTreeMap<String, ProviderStatus> {
        match self {
            Self::Ran(r) | Self::Coalesced(r) => r,
        }
    }

    pub fn was_coalesced(&self) -> bool {
        matches!(self, Self::Coalesced(_))
    }
}

/// One provider as shown by the status report.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderView {
    #[serde(flatten)]
    pub provider: Provider,
    pub limits: String,
    pub status: Option<ProviderStatus>,
    pub quota: QuotaUsage,
    pub usage_percent: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub providers: Vec<ProviderView>,
    pub recommendations: Vec<Candidate>,
    pub best: Option<Candidate>,
    pub last_check: Option<DateTime<Utc>>,
    pub history: Vec<HistoryEntry>,
}

struct BatchState {
    statuses: HashMap<String, ProviderStatus>,
    last_check: Option<DateTime<Utc>>,
    history: HistoryRing,
}

pub struct Watchdog {
    registry: Arc<Registry>,
    prober: Arc<Prober>,
    quota: Arc<QuotaStore>,
    state: RwLock<BatchState>,
    batch_guard: tokio::sync::Mutex<()>,
    generation: AtomicU64,
    capacity_threshold: f64,
    history_display: usize,
}

fn local_today() -> NaiveDate {
    Local::now().date_naive()
}

impl Watchdog {
    pub fn new(
        registry: Registry,
        prober: Prober,
        quota: QuotaStore,
        history_capacity: usize,
        history_display: usize,
        capacity_threshold: f64,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            prober: Arc::new(prober),
            quota: Arc::new(quota),
            state: RwLock::new(BatchState {
                statuses: HashMap::new(),
                last_check: None,
                history: HistoryRing::new(history_capacity),
            }),
            batch_guard: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
            capacity_threshold,
            history_display,
        }
    }

    /// Wire up registry, prober and the persisted quota store from config.
    pub fn from_config(config: &AppConfig, credentials: Arc<dyn CredentialSource>) -> Result<Self> {
        let s = &config.settings;
        let registry = Registry::from_config(config)?;
        let prober = Prober::new(Duration::from_secs(s.probe_timeout_secs), credentials)?;
        let quota = QuotaStore::load(config.state_path(), &registry, s.token_estimate, local_today());
        Ok(Self::new(
            registry,
            prober,
            quota,
            s.history_capacity,
            s.history_display,
            s.capacity_threshold,
        ))
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn quota(&self) -> &QuotaStore {
        &self.quota
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, BatchState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, BatchState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Probe every provider concurrently and publish the results atomically.
    ///
    /// Callers arriving while a batch is in flight wait for it and get its
    /// results instead of starting a second one. The batch runs on its own
    /// task, so dropping the returned future neither cancels it nor lets a
    /// second batch start early.
    pub async fn run_batch(self: &Arc<Self>) -> BatchOutcome {
        let seen = self.generation.load(Ordering::Acquire);
        let this = Arc::clone(self);
        match tokio::spawn(async move { this.batch_task(seen).await }).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Batch task failed");
                BatchOutcome::Coalesced(self.latest_results())
            }
        }
    }

    async fn batch_task(&self, seen: u64) -> BatchOutcome {
        let _guard = self.batch_guard.lock().await;
        if self.generation.load(Ordering::Acquire) != seen {
            debug!("Batch request coalesced with the batch that just finished");
            return BatchOutcome::Coalesced(self.latest_results());
        }

        self.quota.day_rollover_check(local_today());
        let started = Utc::now();
        info!(providers = self.registry.len(), "Testing all providers");

        let handles: Vec<_> = self
            .registry
            .all()
            .iter()
            .cloned()
            .map(|provider| {
                let prober = Arc::clone(&self.prober);
                let quota = Arc::clone(&self.quota);
                tokio::spawn(async move { probe_and_account(&prober, quota, provider).await })
            })
            .collect();
        let results = collect_results(self.registry.all(), handles).await;

        {
            let mut state = self.write_state();
            state.statuses = results.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            state.last_check = Some(started);
            state.history.append(HistoryEntry {
                timestamp: started,
                results: results.clone(),
            });
        }
        self.generation.fetch_add(1, Ordering::AcqRel);
        BatchOutcome::Ran(results)
    }

    /// Probe a single provider outside the batch cycle. Updates its status
    /// and quota but not history. `None` if the id is not registered.
    pub async fn test_one(self: &Arc<Self>, id: &str) -> Option<ProviderStatus> {
        let provider = self.registry.get(id)?.clone();
        let this = Arc::clone(self);
        let task = tokio::spawn(async move {
            let _guard = this.batch_guard.lock().await;
            this.quota.day_rollover_check(local_today());

            let status = probe_and_account(&this.prober, Arc::clone(&this.quota), provider.clone()).await;
            log_status(&provider, &status);
            this.write_state().statuses.insert(provider.id.clone(), status.clone());
            status
        });
        Some(status_or_failure(task.await, "Probe task failed"))
    }

    /// Zero all quota counters. Status and history are left alone.
    pub fn reset_quotas(&self) {
        self.quota.reset_all(Utc::now());
    }

    fn latest_results(&self) -> BTreeMap<String, ProviderStatus> {
        self.read_state()
            .history
            .recent(1)
            .into_iter()
            .next()
            .map(|e| e.results)
            .unwrap_or_default()
    }

    pub fn statuses(&self) -> HashMap<String, ProviderStatus> {
        self.read_state().statuses.clone()
    }

    pub fn history(&self, n: usize) -> Vec<HistoryEntry> {
        self.read_state().history.recent(n)
    }

    /// Rank online providers from the current status and quota snapshot.
    pub fn recommend(&self) -> Recommendation {
        recommend(
            &self.registry,
            &self.statuses(),
            &self.quota.snapshot(),
            self.capacity_threshold,
        )
    }

    pub fn best_provider(&self) -> Option<Candidate> {
        self.recommend().best().cloned()
    }

    pub fn status_report(&self) -> StatusReport {
        let (statuses, last_check, history) = {
            let state = self.read_state();
            (
                state.statuses.clone(),
                state.last_check,
                state.history.recent(self.history_display),
            )
        };
        let quotas = self.quota.snapshot();
        let ranked = recommend(&self.registry, &statuses, &quotas, self.capacity_threshold);

        let providers = self
            .registry
            .all()
            .iter()
            .map(|p| {
                let quota = quotas.get(&p.id).cloned().unwrap_or_default();
                ProviderView {
                    provider: p.clone(),
                    limits: p.describe_limits(),
                    status: statuses.get(&p.id).cloned(),
                    usage_percent: quota.used_percent(p.rate_limit.requests_per_day),
                    quota,
                }
            })
            .collect();

        StatusReport {
            providers,
            best: ranked.best().cloned(),
            recommendations: ranked.candidates,
            last_check,
            history,
        }
    }
}

async fn probe_and_account(prober: &Prober, quota: Arc<QuotaStore>, provider: Provider) -> ProviderStatus {
    let status = prober.probe(&provider).await;
    // Persisting touches the filesystem, keep it off the async workers.
    let accounted = tokio::task::spawn_blocking(move || {
        quota.apply_probe_result(&provider, &status.outcome, &status.rate_limit, status.checked_at);
        status
    })
    .await;
    status_or_failure(accounted, "Quota update failed")
}

/// Join the per-provider tasks in registry order. A task that panicked or
/// was cancelled still yields one `error` status for its provider.
async fn collect_results(
    providers: &[Provider],
    handles: Vec<JoinHandle<ProviderStatus>>,
) -> BTreeMap<String, ProviderStatus> {
    let mut results = BTreeMap::new();
    for (provider, handle) in providers.iter().zip(handles) {
        let joined = handle.await;
        if let Err(e) = &joined {
            warn!(provider = %provider.id, error = %e, "Probe task failed");
        }
        let status = status_or_failure(joined, "Probe task failed");
        log_status(provider, &status);
        results.insert(provider.id.clone(), status);
    }
    results
}

fn status_or_failure(joined: Result<ProviderStatus, JoinError>, context: &str) -> ProviderStatus {
    match joined {
        Ok(status) => status,
        Err(e) => failed_status(format!("{}: {}", context, e)),
    }
}

fn failed_status(error: String) -> ProviderStatus {
    ProviderStatus {
        outcome: ProbeOutcome::Error { error },
        latency_ms: 0,
        checked_at: Utc::now(),
        rate_limit: RateLimitHeaders::new(),
    }
}

fn log_status(provider: &Provider, status: &ProviderStatus) {
    match &status.outcome {
        ProbeOutcome::Online { .. } => info!(
            provider = %provider.id,
            latency_ms = status.latency_ms,
            "online"
        ),
        other => info!(
            provider = %provider.id,
            outcome = other.label(),
            latency_ms = status.latency_ms,
            detail = other.error_detail().unwrap_or_default(),
            "unavailable"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::providers::testing::{daily, provider, StaticCredentials};
    use crate::core::providers::{CostTier, RateLimitProfile};
    use serde_json::json;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn ok_server(delay_ms: u64, headers: &[(&str, &str)]) -> MockServer {
        let server = MockServer::start().await;
        let mut template = ResponseTemplate::new(200)
            .set_body_json(json!({ "choices": [{ "message": { "content": "OK" } }] }))
            .set_delay(Duration::from_millis(delay_ms));
        for (k, v) in headers {
            template = template.insert_header(*k, *v);
        }
        Mock::given(method("POST")).respond_with(template).mount(&server).await;
        server
    }

    fn at(server: &MockServer, mut p: Provider) -> Provider {
        p.host = server.address().to_string();
        p
    }

    fn watchdog(providers: Vec<Provider>, creds: StaticCredentials, timeout_ms: u64) -> Arc<Watchdog> {
        let registry = Registry::new(providers).unwrap();
        let prober = Prober::new(Duration::from_millis(timeout_ms), Arc::new(creds)).unwrap();
        let quota = QuotaStore::in_memory(&registry, 25, local_today());
        Arc::new(Watchdog::new(registry, prober, quota, 100, 20, 20.0))
    }

    #[tokio::test]
    async fn batch_yields_one_status_per_provider() {
        let fast = ok_server(0, &[]).await;
        let mut keyed = provider("keyed", CostTier::Paid, 2, RateLimitProfile::default());
        keyed.api_key_env = Some("MISSING_KEY".into());
        let wd = watchdog(
            vec![
                at(&fast, provider("local", CostTier::Local, 1, RateLimitProfile::default())),
                keyed,
                provider("dead", CostTier::Free, 3, daily(100)),
            ],
            StaticCredentials::default(),
            1000,
        );
        // "dead" points at the discard port from the test helper.
        let outcome = wd.run_batch().await;
        assert!(!outcome.was_coalesced());
        let results = outcome.results();
        assert_eq!(results.len(), 3);
        assert!(results["local"].outcome.is_online());
        assert_eq!(results["keyed"].outcome.label(), "no-key");
        assert!(matches!(results["dead"].outcome.label(), "offline" | "timeout"));

        assert_eq!(wd.statuses().len(), 3);
        assert_eq!(wd.history(20).len(), 1);
        assert!(wd.status_report().last_check.is_some());
        assert_eq!(wd.quota().current_usage("keyed").unwrap(), QuotaUsage::default());
        assert_eq!(wd.quota().current_usage("local").unwrap().requests_used, 1);
    }

    #[tokio::test]
    async fn slow_provider_does_not_hold_up_others() {
        let fast = ok_server(0, &[]).await;
        let slow = ok_server(3000, &[]).await;
        let wd = watchdog(
            vec![
                at(&slow, provider("slow", CostTier::Free, 1, RateLimitProfile::default())),
                at(&fast, provider("fast", CostTier::Free, 2, RateLimitProfile::default())),
            ],
            StaticCredentials::default(),
            300,
        );
        let started = std::time::Instant::now();
        let outcome = wd.run_batch().await;
        assert!(started.elapsed() < Duration::from_millis(2000));
        assert_eq!(outcome.results()["slow"].outcome.label(), "timeout");
        assert!(outcome.results()["fast"].outcome.is_online());
        assert_eq!(wd.best_provider().unwrap().id, "fast");
    }

    #[tokio::test]
    async fn concurrent_triggers_are_coalesced() {
        let server = ok_server(200, &[]).await;
        let wd = watchdog(
            vec![at(&server, provider("p", CostTier::Free, 1, RateLimitProfile::default()))],
            StaticCredentials::default(),
            2000,
        );
        let first = {
            let wd = Arc::clone(&wd);
            tokio::spawn(async move { wd.run_batch().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = wd.run_batch().await;
        let first = first.await.unwrap();

        assert!(!first.was_coalesced());
        assert!(second.was_coalesced());
        assert_eq!(second.results(), first.results());
        assert_eq!(wd.history(10).len(), 1);
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn abandoned_trigger_still_completes_its_batch() {
        let server = ok_server(400, &[]).await;
        let wd = watchdog(
            vec![at(&server, provider("p", CostTier::Free, 1, RateLimitProfile::default()))],
            StaticCredentials::default(),
            2000,
        );
        // The caller gives up long before the provider answers.
        let abandoned = tokio::time::timeout(Duration::from_millis(100), wd.run_batch()).await;
        assert!(abandoned.is_err());

        let second = wd.run_batch().await;
        assert!(second.was_coalesced());
        assert!(second.results()["p"].outcome.is_online());

        let batches = wd.history(10).len();
        assert_eq!(batches, 1);
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
        assert_eq!(
            wd.quota().current_usage("p").unwrap().requests_used,
            batches as u64
        );
        assert!(wd.statuses()["p"].outcome.is_online());
    }

    async fn exploding_task() -> ProviderStatus {
        panic!("task blew up")
    }

    #[tokio::test]
    async fn panicked_provider_task_is_recorded_as_error() {
        let providers = vec![
            provider("ok", CostTier::Free, 1, RateLimitProfile::default()),
            provider("boom", CostTier::Free, 2, RateLimitProfile::default()),
        ];
        let handles = vec![
            tokio::spawn(async {
                ProviderStatus {
                    outcome: ProbeOutcome::Online { response: "OK".into() },
                    latency_ms: 12,
                    checked_at: Utc::now(),
                    rate_limit: RateLimitHeaders::new(),
                }
            }),
            tokio::spawn(exploding_task()),
        ];

        let results = collect_results(&providers, handles).await;
        assert_eq!(results.len(), 2);
        assert!(results["ok"].outcome.is_online());
        assert_eq!(results["boom"].outcome.label(), "error");
        let detail = results["boom"].outcome.error_detail().unwrap();
        assert!(detail.starts_with("Probe task failed"), "got {}", detail);
    }

    #[tokio::test]
    async fn failed_quota_update_is_recorded_as_error() {
        let joined = tokio::task::spawn_blocking(|| -> ProviderStatus { panic!("disk gone") }).await;
        let status = status_or_failure(joined, "Quota update failed");
        assert_eq!(status.outcome.label(), "error");
        assert_eq!(status.latency_ms, 0);
        assert!(status
            .outcome
            .error_detail()
            .unwrap()
            .starts_with("Quota update failed"));
    }

    #[tokio::test]
    async fn rate_limit_headers_feed_quota_and_ranking() {
        let nearly_spent = ok_server(0, &[("x-ratelimit-remaining-requests", "5")]).await;
        let roomy = ok_server(0, &[("x-ratelimit-remaining-requests", "990")]).await;
        let wd = watchdog(
            vec![
                at(&nearly_spent, provider("p2", CostTier::Free, 1, daily(100))),
                at(&roomy, provider("p3", CostTier::Paid, 2, daily(1000))),
            ],
            StaticCredentials::default(),
            2000,
        );
        wd.run_batch().await;
        assert_eq!(wd.quota().current_usage("p2").unwrap().requests_used, 95);
        let report = wd.status_report();
        assert_eq!(report.best.as_ref().unwrap().id, "p3");
        let p2 = report.providers.iter().find(|v| v.provider.id == "p2").unwrap();
        assert!((p2.usage_percent.unwrap() - 95.0).abs() < 1e-10);
    }

    #[tokio::test]
    async fn reset_leaves_status_and_history() {
        let server = ok_server(0, &[]).await;
        let wd = watchdog(
            vec![at(&server, provider("p", CostTier::Free, 1, daily(100)))],
            StaticCredentials::default(),
            2000,
        );
        wd.run_batch().await;
        assert_eq!(wd.quota().current_usage("p").unwrap().requests_used, 1);

        wd.reset_quotas();
        let usage = wd.quota().current_usage("p").unwrap();
        assert_eq!(usage.requests_used, 0);
        assert_eq!(usage.tokens_used, 0);
        assert!(wd.statuses()["p"].outcome.is_online());
        assert_eq!(wd.history(10).len(), 1);
    }

    #[tokio::test]
    async fn test_one_updates_status_without_history() {
        let server = ok_server(0, &[]).await;
        let wd = watchdog(
            vec![at(&server, provider("p", CostTier::Free, 1, RateLimitProfile::default()))],
            StaticCredentials::default(),
            2000,
        );
        let status = wd.test_one("p").await.unwrap();
        assert!(status.outcome.is_online());
        assert!(wd.statuses()["p"].outcome.is_online());
        assert!(wd.history(10).is_empty());
        assert!(wd.test_one("missing").await.is_none());
    }

    #[tokio::test]
    async fn no_batch_yet_means_no_recommendation() {
        let wd = watchdog(
            vec![provider("p", CostTier::Local, 1, RateLimitProfile::default())],
            StaticCredentials::default(),
            2000,
        );
        assert!(wd.best_provider().is_none());
        let report = wd.status_report();
        assert!(report.best.is_none());
        assert!(report.providers[0].status.is_none());
        assert!(report.last_check.is_none());
    }

    #[tokio::test]
    async fn status_report_serializes_expected_shape() {
        let server = ok_server(0, &[]).await;
        let wd = watchdog(
            vec![at(&server, provider("p", CostTier::Local, 1, RateLimitProfile::default()))],
            StaticCredentials::default(),
            2000,
        );
        wd.run_batch().await;
        let json = serde_json::to_value(wd.status_report()).unwrap();
        assert_eq!(json["providers"][0]["id"], "p");
        assert_eq!(json["providers"][0]["status"]["status"], "online");
        assert_eq!(json["providers"][0]["limits"], "unlimited");
        assert_eq!(json["best"]["capacity"], "unlimited");
        assert_eq!(json["history"].as_array().unwrap().len(), 1);
        assert!(json["last_check"].is_string());
    }
}
