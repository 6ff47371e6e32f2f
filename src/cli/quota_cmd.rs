use anyhow::Result;
use chrono::{Local, Utc};
use serde::Serialize;

use crate::cli::output::OutputOptions;
use crate::cli::renderer;
use crate::core::config::AppConfig;
use crate::core::models::usage::QuotaUsage;
use crate::core::providers::Registry;
use crate::core::quota::QuotaStore;

#[derive(Serialize)]
struct QuotaEntry<'a> {
    id: &'a str,
    limits: String,
    usage_percent: Option<f64>,
    #[serde(flatten)]
    quota: QuotaUsage,
}

fn open_store(config: &AppConfig) -> Result<(Registry, QuotaStore)> {
    config.ensure_valid()?;
    let registry = Registry::from_config(config)?;
    let store = QuotaStore::load(
        config.state_path(),
        &registry,
        config.settings.token_estimate,
        Local::now().date_naive(),
    );
    Ok((registry, store))
}

/// Show persisted counters without sending any probe.
pub fn show(opts: &OutputOptions) -> Result<()> {
    let config = AppConfig::load()?;
    let (registry, store) = open_store(&config)?;
    let snapshot = store.snapshot();

    if opts.is_json() {
        let entries: Vec<QuotaEntry> = registry
            .all()
            .iter()
            .map(|p| {
                let quota = snapshot.get(&p.id).cloned().unwrap_or_default();
                QuotaEntry {
                    id: &p.id,
                    limits: p.describe_limits(),
                    usage_percent: quota.used_percent(p.rate_limit.requests_per_day),
                    quota,
                }
            })
            .collect();
        return opts.print_json(&serde_json::json!({
            "date": store.date(),
            "providers": entries,
        }));
    }

    let mut sections = vec![format!(" Quota for {}", store.date())];
    for p in registry.all() {
        let quota = snapshot.get(&p.id).cloned().unwrap_or_default();
        sections.push(renderer::render_quota(p, &quota, opts.use_color));
    }
    println!("{}", sections.join("\n\n"));
    Ok(())
}

/// Zero every persisted counter.
pub fn reset(opts: &OutputOptions) -> Result<()> {
    let config = AppConfig::load()?;
    let (_, store) = open_store(&config)?;
    store.reset_all(Utc::now());

    if opts.is_json() {
        opts.print_json(&serde_json::json!({ "success": true }))
    } else {
        println!("Quota counters reset ({})", config.state_path().display());
        Ok(())
    }
}
