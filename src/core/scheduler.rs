use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::core::watchdog::Watchdog;

/// Run a batch immediately and then every `period` until `shutdown` resolves.
///
/// Manual triggers go through the same [`Watchdog::run_batch`], which keeps
/// batches from overlapping.
pub async fn run<F>(watchdog: Arc<Watchdog>, period: Duration, shutdown: F)
where
    F: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Scheduler stopped");
                return;
            }
            _ = ticker.tick() => {
                watchdog.run_batch().await;
            }
        }
    }
}
