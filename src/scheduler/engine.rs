use crate::detect::engine::AnomalyEngine;
use crate::scheduler::DetectionSchedule;
use crate::storage::{self, Pool};
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Datapoint pruning performed after each run when the local store is in use.
#[derive(Clone)]
pub struct Retention {
    pub pool: Pool,
    pub days: u32,
}

/// Main scheduler execution loop.
/// Sleeps until each cron tick and performs one detection run. Runs never overlap.
pub async fn run_detection_loop(engine: Arc<AnomalyEngine>, schedule: DetectionSchedule, retention: Option<Retention>) {
    info!(cron = schedule.expr(), "Scheduler engine started");

    loop {
        let now = Utc::now();
        let Some(next) = schedule.next_after(now) else {
            warn!(cron = schedule.expr(), "Schedule has no upcoming runs, stopping");
            return;
        };
        let wait = (next - now).to_std().unwrap_or_default();
        info!(next_run = %next, "Waiting for next detection run");
        tokio::time::sleep(wait).await;

        let report = engine.run().await;
        info!(
            run_id = %report.run_id,
            anomalies = report.anomalies.len(),
            alert_delivered = ?report.alert_delivered,
            "Scheduled detection complete"
        );

        if let Some(r) = retention.clone() {
            let result = tokio::task::spawn_blocking(move || storage::prune_older_than(&r.pool, r.days, Utc::now())).await;
            match result {
                Ok(Ok(removed)) if removed > 0 => info!(removed, "Pruned old datapoints"),
                Ok(Ok(_)) => {}
                Ok(Err(e)) => error!("Failed to prune datapoints: {}", e),
                Err(e) => error!("Prune task panicked: {}", e),
            }
        }
    }
}
