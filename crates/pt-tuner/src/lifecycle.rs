//! Lifecycle Manager - background tasks of the tuner
//!
//! Handles:
//! - Metric recording: sample every registered pool and append to the sink
//! - Gauge export: publish pool snapshots through the `metrics` facade
//! - Graceful shutdown coordination

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::exporter;
use crate::registry::PoolRegistry;
use crate::sampler::MetricsSampler;
use crate::sink::MetricsSink;

/// Configuration for the lifecycle manager
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub recorder_enabled: bool,
    /// Interval between metric samples
    pub recorder_interval: Duration,
    pub exporter_enabled: bool,
    /// Interval between gauge refreshes
    pub exporter_interval: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            recorder_enabled: true,
            recorder_interval: Duration::from_secs(5),
            exporter_enabled: true,
            exporter_interval: Duration::from_secs(15),
        }
    }
}

/// Manages background tasks for the tuner
pub struct LifecycleManager {
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl LifecycleManager {
    /// Start all enabled lifecycle tasks
    pub fn start(registry: Arc<PoolRegistry>, sink: Arc<dyn MetricsSink>, config: LifecycleConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let mut tasks = Vec::new();

        // Metric recorder
        if config.recorder_enabled {
            let registry = registry.clone();
            let mut shutdown_rx = shutdown_tx.subscribe();
            let interval = config.recorder_interval;

            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let registry = registry.clone();
                            let sink = sink.clone();
                            match tokio::task::spawn_blocking(move || record_all(&registry, sink.as_ref())).await {
                                Ok(recorded) => debug!(pools = recorded, "Recorded pool metrics"),
                                Err(e) => error!(error = %e, "Metric recorder pass failed"),
                            }
                        }
                        _ = shutdown_rx.recv() => {
                            info!("Metric recorder shutting down");
                            break;
                        }
                    }
                }
            }));
        }

        // Gauge exporter
        if config.exporter_enabled {
            let registry = registry.clone();
            let mut shutdown_rx = shutdown_tx.subscribe();
            let interval = config.exporter_interval;

            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let exported = exporter::export_all(&registry);
                            debug!(pools = exported, "Exported pool gauges");
                        }
                        _ = shutdown_rx.recv() => {
                            info!("Gauge exporter shutting down");
                            break;
                        }
                    }
                }
            }));
        }

        info!(
            recorder = config.recorder_enabled,
            exporter = config.exporter_enabled,
            "Lifecycle tasks started"
        );

        Self { shutdown_tx, tasks }
    }

    /// Signal every task to stop and wait for them to finish
    pub async fn shutdown(self) {
        info!("Initiating lifecycle shutdown");
        let _ = self.shutdown_tx.send(());
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Lifecycle task ended abnormally");
            }
        }
        info!("Lifecycle shutdown complete");
    }
}

/// Sample every registered pool once and append the records to the sink.
///
/// A failing append is logged and does not stop the other pools from being
/// recorded. Returns the number of records appended.
pub fn record_all(registry: &PoolRegistry, sink: &dyn MetricsSink) -> usize {
    let mut recorded = 0;
    for name in registry.names() {
        let Ok(entry) = registry.lookup(&name) else {
            continue;
        };
        let record = MetricsSampler::record_now(&entry);
        match sink.append(&name, record) {
            Ok(()) => recorded += 1,
            Err(e) => error!(pool = %name, error = %e, "Failed to record pool metrics"),
        }
    }
    recorded
}
