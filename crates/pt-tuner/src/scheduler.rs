//! TuningScheduler - per-pool periodic tuning loop
//!
//! Each started pool gets one tokio task that, every `interval`:
//! 1. reads the pool's metric history from the sink
//! 2. asks the recommendation source for a sizing, bounded by `timeout`
//! 3. clamps and applies the suggestion through the registry
//!
//! A failed or timed out cycle is skipped without touching the pool. Pools are
//! isolated: one pool's failures or slow recommendations never delay another.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use pt_common::{MetricRecord, PoolSizing};
use crate::recommendation::RecommendationSource;
use crate::registry::PoolRegistry;
use crate::sink::MetricsSink;
use crate::TunerError;

/// Configuration for the tuning scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between cycles of one pool. The first cycle runs immediately.
    pub interval: Duration,
    /// Upper bound on one recommendation fetch
    pub timeout: Duration,
    /// Cycles within this window after an applied change are skipped
    pub cooldown: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(10),
            cooldown: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotRegistered,
    Timeout,
    RecommendationFailed,
    HistoryUnavailable,
    CoolingDown,
    Cancelled,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NotRegistered => "not_registered",
            SkipReason::Timeout => "timeout",
            SkipReason::RecommendationFailed => "recommendation_failed",
            SkipReason::HistoryUnavailable => "history_unavailable",
            SkipReason::CoolingDown => "cooling_down",
            SkipReason::Cancelled => "cancelled",
        }
    }
}

/// Result of one tuning cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    Applied { before: PoolSizing, after: PoolSizing },
    Skipped { reason: SkipReason },
}

impl CycleOutcome {
    fn skipped(reason: SkipReason) -> Self {
        CycleOutcome::Skipped { reason }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, CycleOutcome::Applied { .. })
    }

    /// Metric label for this outcome
    pub fn label(&self) -> &'static str {
        match self {
            CycleOutcome::Applied { .. } => "applied",
            CycleOutcome::Skipped { reason } => reason.as_str(),
        }
    }
}

/// One active schedule. The cancel flag is held while a result is applied, so
/// a result that arrives after `stop` is never applied.
struct TuningState {
    task: JoinHandle<()>,
    cancelled: Arc<Mutex<bool>>,
}

#[derive(Debug, Clone, Copy)]
struct AppliedSizing {
    sizing: PoolSizing,
    changed_at: Option<Instant>,
}

struct SchedulerInner {
    registry: Arc<PoolRegistry>,
    sink: Arc<dyn MetricsSink>,
    source: Arc<dyn RecommendationSource>,
    config: SchedulerConfig,
    schedules: DashMap<String, TuningState>,
    last_applied: DashMap<String, AppliedSizing>,
    /// Serializes cycles of one pool between the periodic loop and on-demand runs
    cycle_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

pub struct TuningScheduler {
    inner: Arc<SchedulerInner>,
}

impl TuningScheduler {
    pub fn new(
        registry: Arc<PoolRegistry>,
        sink: Arc<dyn MetricsSink>,
        source: Arc<dyn RecommendationSource>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                registry,
                sink,
                source,
                config,
                schedules: DashMap::new(),
                last_applied: DashMap::new(),
                cycle_locks: DashMap::new(),
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Start periodic tuning of a pool. Returns false if it was already active.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, pool: &str) -> bool {
        match self.inner.schedules.entry(pool.to_string()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().task.is_finished() {
                    debug!(pool = %pool, "Tuning already active");
                    return false;
                }
                occupied.insert(self.spawn_schedule(pool));
            }
            Entry::Vacant(vacant) => {
                vacant.insert(self.spawn_schedule(pool));
            }
        }

        info!(
            pool = %pool,
            interval_ms = self.inner.config.interval.as_millis() as u64,
            timeout_ms = self.inner.config.timeout.as_millis() as u64,
            "Tuning started"
        );
        true
    }

    /// Stop tuning a pool, cancelling any in-flight cycle. Returns false if it was not scheduled.
    pub fn stop(&self, pool: &str) -> bool {
        let Some((_, state)) = self.inner.schedules.remove(pool) else {
            return false;
        };

        *state.cancelled.lock() = true;
        state.task.abort();
        info!(pool = %pool, "Tuning stopped");
        true
    }

    pub fn stop_all(&self) {
        let pools: Vec<String> = self.inner.schedules.iter().map(|s| s.key().clone()).collect();
        for pool in pools {
            self.stop(&pool);
        }
    }

    pub fn is_active(&self, pool: &str) -> bool {
        self.inner
            .schedules
            .get(pool)
            .map(|state| !state.task.is_finished())
            .unwrap_or(false)
    }

    /// Pools with an active schedule, sorted
    pub fn active_pools(&self) -> Vec<String> {
        let mut pools: Vec<String> = self
            .inner
            .schedules
            .iter()
            .filter(|state| !state.task.is_finished())
            .map(|state| state.key().clone())
            .collect();
        pools.sort();
        pools
    }

    /// Sizing applied by the most recent successful cycle of a pool
    pub fn last_applied(&self, pool: &str) -> Option<PoolSizing> {
        self.inner.last_applied.get(pool).map(|applied| applied.sizing)
    }

    /// Run a single cycle now, independent of any schedule
    pub async fn tune_once(&self, pool: &str) -> CycleOutcome {
        self.inner.run_cycle(pool, None).await
    }

    fn spawn_schedule(&self, pool: &str) -> TuningState {
        let inner = self.inner.clone();
        let cancelled = Arc::new(Mutex::new(false));
        let flag = cancelled.clone();
        let pool = pool.to_string();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if *flag.lock() {
                    break;
                }
                inner.run_cycle(&pool, Some(&flag)).await;
            }
        });

        TuningState { task, cancelled }
    }
}

impl SchedulerInner {
    async fn run_cycle(&self, pool: &str, cancelled: Option<&Arc<Mutex<bool>>>) -> CycleOutcome {
        let lock = self
            .cycle_locks
            .entry(pool.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _cycle = lock.lock().await;

        let outcome = self.tune(pool, cancelled).await;
        metrics::counter!(
            "pooltune_tuning_cycles_total",
            "pool" => pool.to_string(),
            "outcome" => outcome.label()
        )
        .increment(1);
        outcome
    }

    async fn tune(&self, pool: &str, cancelled: Option<&Arc<Mutex<bool>>>) -> CycleOutcome {
        let entry = match self.registry.lookup(pool) {
            Ok(entry) => entry,
            Err(_) => {
                warn!(pool = %pool, "Pool not registered, skipping tuning cycle");
                return CycleOutcome::skipped(SkipReason::NotRegistered);
            }
        };

        if self.cooling_down(pool) {
            debug!(pool = %pool, "Pool in cooldown, skipping tuning cycle");
            return CycleOutcome::skipped(SkipReason::CoolingDown);
        }

        let history = match self.history(pool).await {
            Some(history) => history,
            None => return CycleOutcome::skipped(SkipReason::HistoryUnavailable),
        };

        let bounds = entry.bounds();
        let fetch = self.source.recommend(pool, &history, &bounds);
        let recommendation = match tokio::time::timeout(self.config.timeout, fetch).await {
            Ok(Ok(recommendation)) => recommendation,
            Ok(Err(e)) => {
                error!(pool = %pool, error = %e, "Recommendation failed, skipping tuning cycle");
                return CycleOutcome::skipped(SkipReason::RecommendationFailed);
            }
            Err(_) => {
                let err = TunerError::Timeout {
                    pool: pool.to_string(),
                    after: self.config.timeout,
                };
                warn!(pool = %pool, error = %err, "Skipping tuning cycle");
                return CycleOutcome::skipped(SkipReason::Timeout);
            }
        };

        // Held across the apply so stop() cannot interleave
        let cancel_guard = cancelled.map(|flag| flag.lock());
        if cancel_guard.as_ref().is_some_and(|flag| **flag) {
            debug!(pool = %pool, "Tuning cancelled, discarding recommendation");
            return CycleOutcome::skipped(SkipReason::Cancelled);
        }

        let before = entry.handle().sizing();
        let after = match self.registry.adjust(pool, recommendation.core, recommendation.max) {
            Ok(after) => after,
            Err(e) => {
                warn!(pool = %pool, error = %e, "Failed to apply recommendation");
                return CycleOutcome::skipped(SkipReason::NotRegistered);
            }
        };
        drop(cancel_guard);

        self.record_applied(pool, before, after);

        if before == after {
            debug!(pool = %pool, %after, "Recommendation leaves pool sizing unchanged");
        } else {
            info!(
                pool = %pool,
                suggested_core = recommendation.core,
                suggested_max = recommendation.max,
                old_core = before.core,
                old_max = before.max,
                new_core = after.core,
                new_max = after.max,
                "Applied tuning recommendation"
            );
        }

        CycleOutcome::Applied { before, after }
    }

    async fn history(&self, pool: &str) -> Option<Vec<MetricRecord>> {
        let sink = self.sink.clone();
        let name = pool.to_string();
        match tokio::task::spawn_blocking(move || sink.history(&name)).await {
            Ok(Ok(history)) => Some(history),
            Ok(Err(e)) => {
                error!(pool = %pool, error = %e, "Failed to read metric history");
                None
            }
            Err(e) => {
                error!(pool = %pool, error = %e, "History read task failed");
                None
            }
        }
    }

    fn cooling_down(&self, pool: &str) -> bool {
        if self.config.cooldown.is_zero() {
            return false;
        }
        self.last_applied
            .get(pool)
            .and_then(|applied| applied.changed_at)
            .is_some_and(|at| at.elapsed() < self.config.cooldown)
    }

    fn record_applied(&self, pool: &str, before: PoolSizing, after: PoolSizing) {
        let changed_at = if before != after {
            Some(Instant::now())
        } else {
            self.last_applied.get(pool).and_then(|applied| applied.changed_at)
        };
        self.last_applied.insert(
            pool.to_string(),
            AppliedSizing {
                sizing: after,
                changed_at,
            },
        );
    }
}
