//! Pooltune Control Server
//!
//! Hosts the configured worker pools, records their metrics, tunes them on a
//! schedule and exposes the control API over HTTP.

mod api;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use pt_common::PoolBounds;
use pt_config::AppConfig;
use pt_tuner::{
    ChatCompletionConfig, ChatCompletionSource, CsvFileSink, InMemoryMetricsSink, LifecycleConfig,
    LifecycleManager, MetricsSink, PoolController, PoolRegistry, SchedulerConfig, TuningScheduler,
    WorkerPool, WorkerPoolConfig,
};

use api::{create_router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    pt_common::logging::init_logging("pt-server");

    info!("Starting Pooltune control server");

    let config = AppConfig::load()?;
    info!(
        pools = config.pools.len(),
        interval_secs = config.tuning.interval_secs,
        sink = %config.recorder.sink,
        "Configuration loaded"
    );

    // 1. Metrics recorder
    let metrics = if config.metrics.enabled {
        match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "Failed to install Prometheus recorder, metrics disabled");
                None
            }
        }
    } else {
        None
    };

    // 2. Pools
    let registry = Arc::new(PoolRegistry::new());
    let pools = register_pools(&config, &registry)?;

    // 3. Metric history
    let sink = build_sink(&config);

    // 4. Recommendation source and scheduler
    let recommendation = &config.recommendation;
    if recommendation.api_key.is_empty() {
        warn!(endpoint = %recommendation.endpoint, "No recommendation API key configured, requests are sent unauthenticated");
    }
    let source = Arc::new(ChatCompletionSource::new(ChatCompletionConfig {
        endpoint: recommendation.endpoint.clone(),
        model: recommendation.model.clone(),
        api_key: (!recommendation.api_key.is_empty()).then(|| recommendation.api_key.clone()),
        timeout: Duration::from_secs(recommendation.request_timeout_secs),
        connect_timeout: Duration::from_secs(recommendation.connect_timeout_secs),
    }));

    let scheduler = Arc::new(TuningScheduler::new(
        registry.clone(),
        sink.clone(),
        source,
        SchedulerConfig {
            interval: Duration::from_secs(config.tuning.interval_secs),
            timeout: Duration::from_secs(config.tuning.timeout_secs),
            cooldown: Duration::from_secs(config.tuning.cooldown_secs),
        },
    ));

    // 5. Background recorder and exporter
    let lifecycle = LifecycleManager::start(
        registry.clone(),
        sink,
        LifecycleConfig {
            recorder_enabled: config.recorder.enabled,
            recorder_interval: Duration::from_secs(config.recorder.interval_secs),
            exporter_enabled: metrics.is_some(),
            exporter_interval: Duration::from_secs(config.metrics.refresh_interval_secs),
        },
    );

    let controller = Arc::new(PoolController::new(registry.clone(), scheduler.clone()));

    if config.tuning.auto_start {
        for name in registry.names() {
            controller.start_tuning(&name)?;
        }
    }

    // 6. HTTP API
    let app = create_router(AppState {
        controller,
        metrics: metrics.clone(),
    })
    .layer(TraceLayer::new_for_http())
    .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));

    let addr: SocketAddr = format!("{}:{}", config.http.host, config.http.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    log_startup_summary(&addr, &registry, metrics.as_ref());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 7. Graceful shutdown
    info!("Stopping tuning schedules");
    scheduler.stop_all();
    lifecycle.shutdown().await;

    for pool in &pools {
        pool.shutdown();
    }
    let terminated = tokio::task::spawn_blocking(move || {
        pools
            .iter()
            .all(|pool| pool.await_termination(Duration::from_secs(10)))
    })
    .await
    .unwrap_or(false);
    if !terminated {
        warn!("Some pool workers did not terminate in time");
    }

    info!("Pooltune control server stopped");
    Ok(())
}

/// Build a worker pool for every configured definition, register it and apply
/// its initial sizing through the bounds clamp.
fn register_pools(config: &AppConfig, registry: &PoolRegistry) -> Result<Vec<Arc<WorkerPool>>> {
    let mut pools = Vec::with_capacity(config.pools.len());

    for definition in &config.pools {
        let bounds = PoolBounds::new(definition.min_core, definition.max_core, definition.max_queue);
        let pool = Arc::new(WorkerPool::new(
            WorkerPoolConfig::new(
                definition.name.clone(),
                definition.initial_core(),
                definition.initial_max(),
                definition.initial_queue_capacity() as usize,
            )
            .with_keep_alive(Duration::from_secs(definition.keep_alive_secs)),
        ));

        registry.register(&definition.name, pool.clone(), bounds)?;
        let applied = registry.adjust(
            &definition.name,
            definition.initial_core() as i64,
            definition.initial_max() as i64,
        )?;
        let capacity = registry.adjust_queue_capacity(
            &definition.name,
            definition.initial_queue_capacity() as i64,
        )?;

        info!(
            pool = %definition.name,
            min_core = bounds.min_core,
            max_core = bounds.max_core,
            max_queue = bounds.max_queue,
            %applied,
            queue_capacity = capacity,
            "Pool registered"
        );
        pools.push(pool);
    }

    Ok(pools)
}

fn build_sink(config: &AppConfig) -> Arc<dyn MetricsSink> {
    let retention = config.recorder.retention;
    match config.recorder.sink.as_str() {
        "memory" => {
            info!(retention, "Recording metric history in memory");
            Arc::new(InMemoryMetricsSink::new(retention))
        }
        _ => {
            info!(log_dir = %config.recorder.log_dir, retention, "Recording metric history to files");
            Arc::new(CsvFileSink::new(&config.recorder.log_dir, retention))
        }
    }
}

fn log_startup_summary(addr: &SocketAddr, registry: &PoolRegistry, metrics: Option<&PrometheusHandle>) {
    info!("========================================");
    info!("Pooltune control server started");
    info!(%addr, "HTTP API listening");
    info!(swagger = "/swagger-ui", "API documentation available");
    info!(enabled = metrics.is_some(), "Prometheus metrics at /metrics");
    for snapshot in registry.snapshot_all() {
        info!(
            pool = %snapshot.name,
            core = snapshot.current_core,
            max = snapshot.current_max,
            queue_capacity = snapshot.queue_capacity,
            "Pool ready"
        );
    }
    info!("========================================");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
