use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, MissedTickBehavior};

use crate::reconciler::RenewalReconciler;

/// Runs the renewal sweep every `interval_secs` inside the server process.
/// The first tick fires immediately.
pub fn spawn(reconciler: RenewalReconciler, interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match reconciler.run_sweep(Utc::now()).await {
                Ok(report) if !report.errors.is_empty() => {
                    tracing::warn!(
                        errors = report.errors.len(),
                        "scheduled renewal sweep finished with errors"
                    );
                }
                Ok(_) => {}
                Err(err) => tracing::warn!(?err, "scheduled renewal sweep failed"),
            }
        }
    })
}
