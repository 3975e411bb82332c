//! TuningScheduler Tests
//!
//! Tests for:
//! - Applying recommendations through the registry clamp
//! - Timeout and failure handling (pool left unchanged)
//! - Idempotent start / stop and periodic execution
//! - Cancellation of in-flight cycles
//! - Fault isolation between pools
//! - Cooldown and the controller facade

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use pt_common::{MetricRecord, PoolBounds, PoolSizing, Recommendation};
use pt_tuner::{
    CycleOutcome, InMemoryMetricsSink, MetricsSink, PoolController, PoolHandle, PoolRegistry,
    RecommendationError, RecommendationSource, SchedulerConfig, SkipReason, TunerError,
    TuningScheduler, WorkerPool, WorkerPoolConfig,
};

/// Mock recommendation source with configurable answer, delay and failure
struct MockSource {
    answer: Mutex<Recommendation>,
    delay: Duration,
    should_fail: bool,
    calls: AtomicU32,
    /// Length of the history passed on the last call
    last_history_len: Mutex<Option<usize>>,
}

impl MockSource {
    fn new(core: i64, max: i64) -> Self {
        Self {
            answer: Mutex::new(Recommendation::new(core, max)),
            delay: Duration::ZERO,
            should_fail: false,
            calls: AtomicU32::new(0),
            last_history_len: Mutex::new(None),
        }
    }

    fn with_delay(core: i64, max: i64, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new(core, max)
        }
    }

    fn failing() -> Self {
        Self {
            should_fail: true,
            ..Self::new(0, 0)
        }
    }

    fn set_answer(&self, core: i64, max: i64) {
        *self.answer.lock() = Recommendation::new(core, max);
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecommendationSource for MockSource {
    async fn recommend(
        &self,
        pool: &str,
        history: &[MetricRecord],
        _bounds: &PoolBounds,
    ) -> Result<Recommendation, RecommendationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_history_len.lock() = Some(history.len());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.should_fail {
            return Err(RecommendationError::Status {
                status: 503,
                body: format!("no model for {}", pool),
            });
        }
        Ok(*self.answer.lock())
    }
}

/// Source answering differently per pool
struct PerPoolSource;

#[async_trait]
impl RecommendationSource for PerPoolSource {
    async fn recommend(
        &self,
        pool: &str,
        _history: &[MetricRecord],
        _bounds: &PoolBounds,
    ) -> Result<Recommendation, RecommendationError> {
        match pool {
            "failing" => Err(RecommendationError::Malformed("garbage".to_string())),
            "slow" => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(Recommendation::new(8, 8))
            }
            _ => Ok(Recommendation::new(8, 8)),
        }
    }
}

fn p1_registry() -> Arc<PoolRegistry> {
    let registry = Arc::new(PoolRegistry::new());
    let pool = Arc::new(WorkerPool::new(WorkerPoolConfig::new("p1", 4, 16, 100)));
    registry.register("p1", pool, PoolBounds::new(4, 16, 100)).unwrap();
    registry
}

fn fast_config() -> SchedulerConfig {
    SchedulerConfig {
        interval: Duration::from_millis(20),
        timeout: Duration::from_millis(100),
        cooldown: Duration::ZERO,
    }
}

fn scheduler(
    registry: &Arc<PoolRegistry>,
    source: Arc<dyn RecommendationSource>,
    config: SchedulerConfig,
) -> TuningScheduler {
    let sink: Arc<dyn MetricsSink> = Arc::new(InMemoryMetricsSink::default());
    TuningScheduler::new(registry.clone(), sink, source, config)
}

fn sizing_of(registry: &PoolRegistry, pool: &str) -> PoolSizing {
    registry.snapshot(pool).unwrap().sizing()
}

#[tokio::test]
async fn test_end_to_end_p1_scenario() {
    let registry = p1_registry();

    assert_eq!(registry.adjust("p1", 2, 20).unwrap(), PoolSizing::new(4, 16));
    assert_eq!(sizing_of(&registry, "p1"), PoolSizing::new(4, 16));

    assert_eq!(registry.adjust("p1", 10, 5).unwrap(), PoolSizing::new(10, 10));
    assert_eq!(sizing_of(&registry, "p1"), PoolSizing::new(10, 10));

    let source = Arc::new(MockSource::new(30, 40));
    let tuner = scheduler(&registry, source.clone(), fast_config());
    let outcome = tuner.tune_once("p1").await;
    assert_eq!(
        outcome,
        CycleOutcome::Applied {
            before: PoolSizing::new(10, 10),
            after: PoolSizing::new(16, 16),
        }
    );
    assert_eq!(sizing_of(&registry, "p1"), PoolSizing::new(16, 16));
    assert_eq!(tuner.last_applied("p1"), Some(PoolSizing::new(16, 16)));

    let slow = Arc::new(MockSource::with_delay(4, 4, Duration::from_secs(5)));
    let tuner = scheduler(&registry, slow, fast_config());
    let outcome = tuner.tune_once("p1").await;
    assert_eq!(outcome, CycleOutcome::Skipped { reason: SkipReason::Timeout });
    assert_eq!(sizing_of(&registry, "p1"), PoolSizing::new(16, 16));
}

#[tokio::test]
async fn test_periodic_tuning_applies_clamped_recommendation() {
    let registry = p1_registry();
    assert_eq!(registry.adjust("p1", 10, 5).unwrap(), PoolSizing::new(10, 10));

    let source = Arc::new(MockSource::new(30, 40));
    let tuner = scheduler(&registry, source.clone(), fast_config());

    assert!(tuner.start("p1"));
    assert!(tuner.is_active("p1"));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tuner.last_applied("p1").is_none() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(sizing_of(&registry, "p1"), PoolSizing::new(16, 16));
    assert_eq!(tuner.last_applied("p1"), Some(PoolSizing::new(16, 16)));
    assert!(source.calls() >= 1);

    // Later cycles keep the pool inside its bounds
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(source.calls() >= 2);
    assert_eq!(sizing_of(&registry, "p1"), PoolSizing::new(16, 16));

    assert!(tuner.stop("p1"));
    assert!(!tuner.is_active("p1"));
}

#[tokio::test]
async fn test_history_is_passed_to_source() {
    let registry = p1_registry();
    let sink = Arc::new(InMemoryMetricsSink::new(60));
    let entry = registry.lookup("p1").unwrap();
    for _ in 0..3 {
        sink.append("p1", pt_tuner::MetricsSampler::record_now(&entry)).unwrap();
    }

    let source = Arc::new(MockSource::new(6, 12));
    let tuner = TuningScheduler::new(registry.clone(), sink, source.clone(), fast_config());
    assert!(tuner.tune_once("p1").await.is_applied());
    assert_eq!(*source.last_history_len.lock(), Some(3));
}

#[tokio::test]
async fn test_failed_recommendation_leaves_pool_unchanged() {
    let registry = p1_registry();
    let tuner = scheduler(&registry, Arc::new(MockSource::failing()), fast_config());

    let outcome = tuner.tune_once("p1").await;
    assert_eq!(outcome, CycleOutcome::Skipped { reason: SkipReason::RecommendationFailed });
    assert_eq!(sizing_of(&registry, "p1"), PoolSizing::new(4, 16));
    assert_eq!(tuner.last_applied("p1"), None);
}

#[tokio::test]
async fn test_unregistered_pool_is_skipped() {
    let registry = Arc::new(PoolRegistry::new());
    let source = Arc::new(MockSource::new(1, 1));
    let tuner = scheduler(&registry, source.clone(), fast_config());

    let outcome = tuner.tune_once("ghost").await;
    assert_eq!(outcome, CycleOutcome::Skipped { reason: SkipReason::NotRegistered });
    assert_eq!(source.calls(), 0);
}

#[tokio::test]
async fn test_unchanged_sizing_is_still_applied() {
    let registry = p1_registry();
    let tuner = scheduler(&registry, Arc::new(MockSource::new(4, 16)), fast_config());

    let outcome = tuner.tune_once("p1").await;
    assert_eq!(
        outcome,
        CycleOutcome::Applied {
            before: PoolSizing::new(4, 16),
            after: PoolSizing::new(4, 16),
        }
    );
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let registry = p1_registry();
    let source = Arc::new(MockSource::new(8, 8));
    let tuner = scheduler(&registry, source.clone(), fast_config());

    assert!(tuner.start("p1"));
    assert!(!tuner.start("p1"));
    assert!(tuner.is_active("p1"));
    assert_eq!(tuner.active_pools(), vec!["p1".to_string()]);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(tuner.is_active("p1"));
    assert!(source.calls() >= 2, "expected repeated cycles, got {}", source.calls());
    assert_eq!(sizing_of(&registry, "p1"), PoolSizing::new(8, 8));

    assert!(tuner.stop("p1"));
    assert!(!tuner.is_active("p1"));
    assert!(tuner.active_pools().is_empty());
}

#[tokio::test]
async fn test_stop_halts_cycles() {
    let registry = p1_registry();
    let source = Arc::new(MockSource::new(8, 8));
    let tuner = scheduler(&registry, source.clone(), fast_config());

    tuner.start("p1");
    tokio::time::sleep(Duration::from_millis(60)).await;
    tuner.stop("p1");
    tokio::time::sleep(Duration::from_millis(40)).await;

    let calls_after_stop = source.calls();
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(source.calls(), calls_after_stop);
}

#[tokio::test]
async fn test_stop_never_started_is_noop() {
    let registry = p1_registry();
    let tuner = scheduler(&registry, Arc::new(MockSource::new(8, 8)), fast_config());

    assert!(!tuner.stop("p1"));
    assert!(!tuner.stop("p1"));
    assert!(!tuner.is_active("p1"));
    assert_eq!(sizing_of(&registry, "p1"), PoolSizing::new(4, 16));
}

#[tokio::test]
async fn test_restart_after_stop() {
    let registry = p1_registry();
    let tuner = scheduler(&registry, Arc::new(MockSource::new(8, 8)), fast_config());

    assert!(tuner.start("p1"));
    assert!(tuner.stop("p1"));
    assert!(tuner.start("p1"));
    assert!(tuner.is_active("p1"));
    tuner.stop_all();
    assert!(!tuner.is_active("p1"));
}

#[tokio::test]
async fn test_stop_discards_in_flight_recommendation() {
    let registry = p1_registry();
    let source = Arc::new(MockSource::with_delay(16, 16, Duration::from_millis(150)));
    let config = SchedulerConfig {
        interval: Duration::from_secs(60),
        timeout: Duration::from_secs(5),
        cooldown: Duration::ZERO,
    };
    let tuner = scheduler(&registry, source.clone(), config);

    tuner.start("p1");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(source.calls(), 1);
    tuner.stop("p1");

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(sizing_of(&registry, "p1"), PoolSizing::new(4, 16));
    assert_eq!(tuner.last_applied("p1"), None);
}

#[tokio::test]
async fn test_pools_are_isolated() {
    let registry = Arc::new(PoolRegistry::new());
    for name in ["good", "failing", "slow"] {
        let pool = Arc::new(WorkerPool::new(WorkerPoolConfig::new(name, 2, 4, 10)));
        registry.register(name, pool, PoolBounds::new(2, 16, 10)).unwrap();
    }

    let tuner = scheduler(&registry, Arc::new(PerPoolSource), fast_config());
    for name in ["good", "failing", "slow"] {
        tuner.start(name);
    }

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(sizing_of(&registry, "good"), PoolSizing::new(8, 8));
    assert_eq!(sizing_of(&registry, "failing"), PoolSizing::new(2, 4));
    assert_eq!(sizing_of(&registry, "slow"), PoolSizing::new(2, 4));
    assert!(tuner.is_active("failing"));
    assert!(tuner.is_active("slow"));

    tuner.stop_all();
}

#[tokio::test]
async fn test_cooldown_skips_following_cycles() {
    let registry = p1_registry();
    let source = Arc::new(MockSource::new(8, 8));
    let config = SchedulerConfig {
        cooldown: Duration::from_secs(30),
        ..fast_config()
    };
    let tuner = scheduler(&registry, source.clone(), config);

    assert!(tuner.tune_once("p1").await.is_applied());
    source.set_answer(12, 12);

    let outcome = tuner.tune_once("p1").await;
    assert_eq!(outcome, CycleOutcome::Skipped { reason: SkipReason::CoolingDown });
    assert_eq!(sizing_of(&registry, "p1"), PoolSizing::new(8, 8));
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn test_controller_requires_registered_pool() {
    let registry = p1_registry();
    let tuner = Arc::new(scheduler(&registry, Arc::new(MockSource::new(8, 8)), fast_config()));
    let controller = PoolController::new(registry.clone(), tuner.clone());

    assert!(matches!(controller.start_tuning("nope"), Err(TunerError::NotFound(_))));
    assert!(matches!(controller.stop_tuning("nope"), Err(TunerError::NotFound(_))));
    assert!(matches!(controller.is_tuning_active("nope"), Err(TunerError::NotFound(_))));
    assert!(matches!(controller.tune_now("nope").await, Err(TunerError::NotFound(_))));
    assert!(tuner.active_pools().is_empty());

    assert!(!controller.stop_tuning("p1").unwrap());
    assert!(controller.start_tuning("p1").unwrap());
    assert!(!controller.start_tuning("p1").unwrap());
    assert!(controller.is_tuning_active("p1").unwrap());
    assert!(controller.stop_tuning("p1").unwrap());
    assert!(!controller.is_tuning_active("p1").unwrap());
}

#[tokio::test]
async fn test_controller_operations() {
    let registry = Arc::new(PoolRegistry::new());
    let tuner = Arc::new(scheduler(&registry, Arc::new(MockSource::new(30, 40)), fast_config()));
    let controller = PoolController::new(registry.clone(), tuner);

    let handle: Arc<dyn PoolHandle> = Arc::new(WorkerPool::new(WorkerPoolConfig::new("p1", 4, 16, 100)));
    tokio_test::assert_ok!(controller.register_pool("p1", PoolBounds::new(4, 16, 100), handle.clone()));
    let err = tokio_test::assert_err!(controller.register_pool("p1", PoolBounds::new(4, 16, 100), handle));
    assert!(err.is_configuration_error());

    assert_eq!(controller.adjust("p1", 10, 5).unwrap(), PoolSizing::new(10, 10));
    assert_eq!(controller.resize_queue("p1", 250).unwrap(), 100);
    assert_eq!(controller.resize_queue("p1", 50).unwrap(), 50);

    let outcome = controller.tune_now("p1").await.unwrap();
    assert!(outcome.is_applied());

    let snapshot = controller.get_snapshot("p1").unwrap();
    assert_eq!(snapshot.sizing(), PoolSizing::new(16, 16));
    assert_eq!(snapshot.queue_capacity, 50);
    assert_eq!(controller.last_applied("p1").unwrap(), Some(PoolSizing::new(16, 16)));
    assert_eq!(controller.get_all_snapshots().len(), 1);
}
