use crate::engine::{AlertEngine, MaintenanceStats};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;

/// Retention worker that periodically prunes alert history, drops expired
/// correlation keys and archives old resolved instances
pub struct RetentionWorker {
    engine: Arc<AlertEngine>,
    interval: Duration,
    archive_after_ms: i64,
    running: Arc<AtomicBool>,
}

impl RetentionWorker {
    pub fn new(engine: Arc<AlertEngine>, interval: Duration, archive_after_ms: i64) -> Self {
        Self {
            engine,
            interval,
            archive_after_ms,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the background worker
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            tracing::info!("Retention worker started with interval {:?}", self.interval);

            let mut interval = time::interval(self.interval);

            while self.running.load(Ordering::SeqCst) {
                interval.tick().await;

                let stats = run_retention(&self.engine, self.archive_after_ms);
                if stats.sweep.history_pruned > 0
                    || stats.sweep.correlations_expired > 0
                    || stats.instances_archived > 0
                {
                    tracing::info!(
                        history_pruned = stats.sweep.history_pruned,
                        correlations_expired = stats.sweep.correlations_expired,
                        instances_archived = stats.instances_archived,
                        "Retention pass"
                    );
                }
            }

            tracing::info!("Retention worker stopped");
        })
    }

    /// Stop the worker after its current pass
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Run one retention pass (for manual/testing use)
pub fn run_retention(engine: &AlertEngine, archive_after_ms: i64) -> MaintenanceStats {
    engine.run_maintenance(archive_after_ms)
}
