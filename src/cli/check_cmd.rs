use anyhow::{bail, Result};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;

use crate::cli::output::OutputOptions;
use crate::cli::renderer;
use crate::core::config::AppConfig;
use crate::core::providers::EnvCredentials;
use crate::core::watchdog::Watchdog;

fn build_watchdog() -> Result<Arc<Watchdog>> {
    let config = AppConfig::load()?;
    config.ensure_valid()?;
    let watchdog = Arc::new(Watchdog::from_config(&config, Arc::new(EnvCredentials))?);
    if watchdog.registry().is_empty() {
        bail!("No providers enabled. Run `llmwatch config init` to set up providers.");
    }
    Ok(watchdog)
}

/// Probe everything once (or just `provider`) and print the result.
pub async fn run(provider: Option<String>, opts: &OutputOptions) -> Result<()> {
    let watchdog = build_watchdog()?;

    if let Some(id) = provider {
        let Some(status) = watchdog.test_one(&id).await else {
            bail!("Unknown or disabled provider: '{}'", id);
        };
        if opts.is_json() {
            return opts.print_json(&json!({ "id": id, "result": status }));
        }
        let report = watchdog.status_report();
        if let Some(view) = report.providers.iter().find(|v| v.provider.id == id) {
            println!("{}", renderer::render_provider(view, &Utc::now(), opts.use_color));
        }
        return Ok(());
    }

    watchdog.run_batch().await;
    let report = watchdog.status_report();
    if opts.is_json() {
        opts.print_json(&report)
    } else {
        println!("{}", renderer::render_report(&report, &Utc::now(), opts.use_color));
        Ok(())
    }
}

/// Probe everything once and print only the best pick. Exits 1 when no
/// provider is online.
pub async fn best(opts: &OutputOptions) -> Result<()> {
    let watchdog = build_watchdog()?;
    watchdog.run_batch().await;
    let best = watchdog.best_provider();

    if opts.is_json() {
        opts.print_json(&json!({ "best": best }))?;
    } else if let Some(candidate) = &best {
        println!("{}", renderer::render_best(candidate, opts.use_color));
    } else {
        eprintln!("No provider online");
    }

    if best.is_none() {
        std::process::exit(1);
    }
    Ok(())
}
