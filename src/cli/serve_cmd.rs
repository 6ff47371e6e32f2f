use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::api::server;
use crate::core::config::AppConfig;
use crate::core::providers::EnvCredentials;
use crate::core::scheduler;
use crate::core::watchdog::Watchdog;

/// Run the API server and the periodic scheduler until Ctrl-C.
pub async fn run(bind: Option<String>, interval: Option<u64>) -> Result<()> {
    let mut config = AppConfig::load()?;
    if let Some(bind) = bind {
        config.settings.bind = bind;
    }
    if let Some(interval) = interval {
        config.settings.interval_secs = interval;
    }
    config.ensure_valid()?;

    let watchdog = Arc::new(Watchdog::from_config(&config, Arc::new(EnvCredentials))?);
    if watchdog.registry().is_empty() {
        warn!("No providers enabled; every batch will be empty");
    }
    info!(
        providers = watchdog.registry().len(),
        interval_secs = config.settings.interval_secs,
        state = %config.state_path().display(),
        "Starting watchdog"
    );

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let scheduler = tokio::spawn(scheduler::run(
        Arc::clone(&watchdog),
        Duration::from_secs(config.settings.interval_secs),
        async move {
            let _ = stop_rx.await;
        },
    ));

    let served = server::serve(&config.settings.bind, watchdog, shutdown_signal()).await;
    let _ = stop_tx.send(());
    if let Err(e) = scheduler.await {
        warn!(error = %e, "Scheduler task ended abnormally");
    }
    served
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Could not listen for Ctrl-C, serving until killed");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
