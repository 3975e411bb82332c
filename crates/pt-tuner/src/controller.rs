//! PoolController - control surface over the registry and the tuning scheduler.
//!
//! Every operation on an unknown pool fails with `NotFound`, and a failed
//! operation leaves both the registry and the tuning state untouched.

use std::sync::Arc;

use pt_common::{PoolBounds, PoolSizing, PoolSnapshot};
use crate::pool::PoolHandle;
use crate::registry::PoolRegistry;
use crate::scheduler::{CycleOutcome, SkipReason, TuningScheduler};
use crate::{Result, TunerError};

pub struct PoolController {
    registry: Arc<PoolRegistry>,
    scheduler: Arc<TuningScheduler>,
}

impl PoolController {
    pub fn new(registry: Arc<PoolRegistry>, scheduler: Arc<TuningScheduler>) -> Self {
        Self { registry, scheduler }
    }

    pub fn registry(&self) -> &Arc<PoolRegistry> {
        &self.registry
    }

    pub fn scheduler(&self) -> &Arc<TuningScheduler> {
        &self.scheduler
    }

    pub fn register_pool(&self, name: &str, bounds: PoolBounds, handle: Arc<dyn PoolHandle>) -> Result<()> {
        self.registry.register(name, handle, bounds).map(|_| ())
    }

    pub fn get_snapshot(&self, name: &str) -> Result<PoolSnapshot> {
        self.registry.snapshot(name)
    }

    pub fn get_all_snapshots(&self) -> Vec<PoolSnapshot> {
        self.registry.snapshot_all()
    }

    /// Manually resize a pool. The request is clamped exactly like a recommendation.
    pub fn adjust(&self, name: &str, core: i64, max: i64) -> Result<PoolSizing> {
        self.registry.adjust(name, core, max)
    }

    pub fn resize_queue(&self, name: &str, capacity: i64) -> Result<usize> {
        self.registry.adjust_queue_capacity(name, capacity)
    }

    /// Start tuning a registered pool. Returns false if tuning was already active.
    pub fn start_tuning(&self, name: &str) -> Result<bool> {
        self.ensure_registered(name)?;
        Ok(self.scheduler.start(name))
    }

    /// Stop tuning a registered pool. A pool that was never started is a no-op.
    pub fn stop_tuning(&self, name: &str) -> Result<bool> {
        self.ensure_registered(name)?;
        Ok(self.scheduler.stop(name))
    }

    pub fn is_tuning_active(&self, name: &str) -> Result<bool> {
        self.ensure_registered(name)?;
        Ok(self.scheduler.is_active(name))
    }

    pub fn last_applied(&self, name: &str) -> Result<Option<PoolSizing>> {
        self.ensure_registered(name)?;
        Ok(self.scheduler.last_applied(name))
    }

    /// Run one tuning cycle immediately
    pub async fn tune_now(&self, name: &str) -> Result<CycleOutcome> {
        self.ensure_registered(name)?;
        match self.scheduler.tune_once(name).await {
            CycleOutcome::Skipped { reason: SkipReason::NotRegistered } => Err(TunerError::NotFound(name.to_string())),
            outcome => Ok(outcome),
        }
    }

    fn ensure_registered(&self, name: &str) -> Result<()> {
        if self.registry.contains(name) {
            Ok(())
        } else {
            Err(TunerError::NotFound(name.to_string()))
        }
    }
}
