//! PoolRegistry - name to live pool handle plus configured bounds.
//!
//! The registry is the only writer of pool size parameters. Adjustments of one
//! pool are serialized by a per-entry lock; different pools never block each other.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info};

use pt_common::{PoolBounds, PoolSizing, PoolSnapshot};
use crate::pool::PoolHandle;
use crate::sampler::MetricsSampler;
use crate::{Result, TunerError};

/// A registered pool. Lives for the rest of the process once created.
pub struct PoolEntry {
    name: String,
    bounds: PoolBounds,
    handle: Arc<dyn PoolHandle>,
    adjust_lock: Mutex<()>,
}

impl PoolEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bounds(&self) -> PoolBounds {
        self.bounds
    }

    pub fn handle(&self) -> &Arc<dyn PoolHandle> {
        &self.handle
    }
}

impl std::fmt::Debug for PoolEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolEntry")
            .field("name", &self.name)
            .field("bounds", &self.bounds)
            .field("sizing", &self.handle.sizing())
            .finish()
    }
}

#[derive(Default)]
pub struct PoolRegistry {
    pools: DashMap<String, Arc<PoolEntry>>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pool under a unique name
    pub fn register(&self, name: &str, handle: Arc<dyn PoolHandle>, bounds: PoolBounds) -> Result<Arc<PoolEntry>> {
        if !bounds.is_valid() {
            return Err(TunerError::InvalidBounds {
                name: name.to_string(),
                min_core: bounds.min_core,
                max_core: bounds.max_core,
            });
        }

        match self.pools.entry(name.to_string()) {
            Entry::Occupied(_) => Err(TunerError::DuplicateName(name.to_string())),
            Entry::Vacant(slot) => {
                let entry = Arc::new(PoolEntry {
                    name: name.to_string(),
                    bounds,
                    handle,
                    adjust_lock: Mutex::new(()),
                });
                slot.insert(entry.clone());
                info!(
                    pool = %name,
                    min_core = bounds.min_core,
                    max_core = bounds.max_core,
                    max_queue = bounds.max_queue,
                    "Registered pool"
                );
                Ok(entry)
            }
        }
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<PoolEntry>> {
        self.pools
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TunerError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Registered pool names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pools.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn snapshot(&self, name: &str) -> Result<PoolSnapshot> {
        let entry = self.lookup(name)?;
        Ok(MetricsSampler::snapshot(&entry))
    }

    /// Snapshots of every registered pool, sorted by name
    pub fn snapshot_all(&self) -> Vec<PoolSnapshot> {
        // Collect entries first so no shard lock is held while sampling
        let entries: Vec<Arc<PoolEntry>> = self.pools.iter().map(|e| e.value().clone()).collect();
        let mut snapshots: Vec<PoolSnapshot> = entries.iter().map(|e| MetricsSampler::snapshot(e)).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Clamp the requested sizing into the pool's bounds and apply it.
    ///
    /// Returns the sizing actually applied.
    pub fn adjust(&self, name: &str, requested_core: i64, requested_max: i64) -> Result<PoolSizing> {
        let entry = self.lookup(name)?;
        let sizing = entry.bounds.clamp(requested_core, requested_max);

        let _guard = entry.adjust_lock.lock();
        entry.handle.resize(sizing);

        debug!(
            pool = %name,
            requested_core,
            requested_max,
            core = sizing.core,
            max = sizing.max,
            "Applied pool sizing"
        );
        Ok(sizing)
    }

    /// Clamp the requested queue capacity to `[1, max_queue]` and apply it.
    pub fn adjust_queue_capacity(&self, name: &str, requested: i64) -> Result<usize> {
        let entry = self.lookup(name)?;
        let ceiling = i64::from(entry.bounds.max_queue.max(1));
        let capacity = requested.clamp(1, ceiling) as usize;

        let _guard = entry.adjust_lock.lock();
        if !entry.handle.resize_queue(capacity) {
            return Err(TunerError::QueueNotResizable(name.to_string()));
        }
        Ok(capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{WorkerPool, WorkerPoolConfig};

    fn pool(name: &str, core: u32, max: u32, queue: usize) -> Arc<dyn PoolHandle> {
        Arc::new(WorkerPool::new(WorkerPoolConfig::new(name, core, max, queue)))
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = PoolRegistry::new();
        registry.register("p1", pool("p1", 4, 16, 100), PoolBounds::new(4, 16, 100)).unwrap();

        let entry = registry.lookup("p1").unwrap();
        assert_eq!(entry.name(), "p1");
        assert_eq!(entry.bounds(), PoolBounds::new(4, 16, 100));
        assert!(registry.contains("p1"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_lookup_missing() {
        let registry = PoolRegistry::new();
        assert!(matches!(registry.lookup("nope"), Err(TunerError::NotFound(_))));
        assert!(matches!(registry.adjust("nope", 1, 1), Err(TunerError::NotFound(_))));
    }

    #[test]
    fn test_invalid_bounds_rejected() {
        let registry = PoolRegistry::new();
        let err = registry.register("bad", pool("bad", 1, 1, 1), PoolBounds::new(8, 4, 10)).unwrap_err();
        assert!(err.is_configuration_error());
        assert!(!registry.contains("bad"));
    }

    #[test]
    fn test_names_sorted() {
        let registry = PoolRegistry::new();
        for name in ["c", "a", "b"] {
            registry.register(name, pool(name, 1, 1, 1), PoolBounds::new(1, 1, 1)).unwrap();
        }
        assert_eq!(registry.names(), vec!["a", "b", "c"]);
        let snapshot_names: Vec<_> = registry.snapshot_all().into_iter().map(|s| s.name).collect();
        assert_eq!(snapshot_names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_queue_capacity_clamped() {
        let registry = PoolRegistry::new();
        registry.register("p1", pool("p1", 1, 2, 50), PoolBounds::new(1, 2, 100)).unwrap();

        assert_eq!(registry.adjust_queue_capacity("p1", 500).unwrap(), 100);
        assert_eq!(registry.adjust_queue_capacity("p1", -3).unwrap(), 1);
        assert_eq!(registry.snapshot("p1").unwrap().queue_capacity, 1);
    }
}
