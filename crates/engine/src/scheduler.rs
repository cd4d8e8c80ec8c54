//! Periodic background jobs: timeout sweep, optional auto-retry,
//! retention cleanup, metrics push.

use std::sync::Arc;

use chrono::Utc;
use saga_store::SagaStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::SchedulerConfig;
use crate::orchestrator::Orchestrator;

/// Runs the orchestrator's named periodic jobs until shutdown.
pub struct Scheduler<S> {
    orchestrator: Arc<Orchestrator<S>>,
    config: SchedulerConfig,
}

impl<S: SagaStore + Clone + Send + Sync + 'static> Scheduler<S> {
    /// Creates a scheduler over the facade.
    pub fn new(orchestrator: Arc<Orchestrator<S>>, config: SchedulerConfig) -> Self {
        Self {
            orchestrator,
            config,
        }
    }

    /// Spawns the job loops. Each loop stops when `shutdown` flips to true.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        // Timeout sweep.
        {
            let orchestrator = Arc::clone(&self.orchestrator);
            let mut shutdown = shutdown.clone();
            let interval = self.config.timeout_sweep_interval;
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            match orchestrator.sweep_timed_out().await {
                                Ok(0) => {}
                                Ok(count) => tracing::info!(count, "timed out sagas swept"),
                                Err(err) => tracing::warn!(error = %err, "timeout sweep failed"),
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
            }));
        }

        // Retry sweep (off by default).
        if self.config.auto_retry {
            let orchestrator = Arc::clone(&self.orchestrator);
            let mut shutdown = shutdown.clone();
            let interval = self.config.retry_sweep_interval;
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            match orchestrator.sweep_retryable().await {
                                Ok(0) => {}
                                Ok(count) => tracing::info!(count, "failed sagas re-enqueued"),
                                Err(err) => tracing::warn!(error = %err, "retry sweep failed"),
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
            }));
        }

        // Retention cleanup.
        {
            let orchestrator = Arc::clone(&self.orchestrator);
            let mut shutdown = shutdown.clone();
            let interval = self.config.cleanup_interval;
            let retention = self.config.retention;
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let cutoff = Utc::now()
                                - chrono::Duration::from_std(retention)
                                    .unwrap_or(chrono::Duration::days(7));
                            if let Err(err) = orchestrator.cleanup_terminal(cutoff).await {
                                tracing::warn!(error = %err, "retention cleanup failed");
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
            }));
        }

        // Metrics push.
        {
            let orchestrator = Arc::clone(&self.orchestrator);
            let mut shutdown = shutdown.clone();
            let interval = self.config.metrics_push_interval;
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            orchestrator.publish_metrics_snapshot().await;
                        }
                        _ = shutdown.changed() => break,
                    }
                }
            }));
        }

        handles
    }
}
