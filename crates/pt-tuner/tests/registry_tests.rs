//! PoolRegistry Tests
//!
//! Tests for:
//! - Registration (duplicates, invalid bounds)
//! - Clamping of adjustments, including negative and zero requests
//! - Snapshot consistency under concurrent adjustment
//! - Queue capacity adjustment on fixed and resizable queues

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use pt_common::{PoolBounds, PoolSizing};
use pt_tuner::{
    BoundedResizableQueue, CapacityAware, PoolHandle, PoolRegistry, TunerError, UNBOUNDED_CAPACITY,
};

/// Pool handle that records resizes without running anything
struct MockPool {
    sizing: Mutex<PoolSizing>,
    pool_size: AtomicU32,
    active: AtomicU32,
    queue: BoundedResizableQueue<u32>,
    resize_calls: AtomicU32,
}

impl MockPool {
    fn new(core: u32, max: u32, queue_capacity: usize) -> Self {
        Self {
            sizing: Mutex::new(PoolSizing::new(core, max)),
            pool_size: AtomicU32::new(core),
            active: AtomicU32::new(0),
            queue: BoundedResizableQueue::new(queue_capacity),
            resize_calls: AtomicU32::new(0),
        }
    }

    fn resize_calls(&self) -> u32 {
        self.resize_calls.load(Ordering::SeqCst)
    }
}

impl PoolHandle for MockPool {
    fn sizing(&self) -> PoolSizing {
        *self.sizing.lock()
    }

    fn pool_size(&self) -> u32 {
        self.pool_size.load(Ordering::SeqCst)
    }

    fn active_count(&self) -> u32 {
        self.active.load(Ordering::SeqCst)
    }

    fn queue(&self) -> &dyn CapacityAware {
        &self.queue
    }

    fn resize(&self, sizing: PoolSizing) {
        self.resize_calls.fetch_add(1, Ordering::SeqCst);
        *self.sizing.lock() = sizing;
    }

    fn resize_queue(&self, capacity: usize) -> bool {
        self.queue.set_capacity(capacity);
        true
    }
}

/// Handle over a queue that reports no capacity at all
struct OpaquePool;

struct OpaqueQueue;

impl CapacityAware for OpaqueQueue {
    fn len(&self) -> usize {
        5
    }

    fn capacity(&self) -> Option<usize> {
        None
    }

    fn remaining_capacity(&self) -> Option<usize> {
        None
    }
}

static OPAQUE_QUEUE: OpaqueQueue = OpaqueQueue;

impl PoolHandle for OpaquePool {
    fn sizing(&self) -> PoolSizing {
        PoolSizing::new(1, 1)
    }

    fn pool_size(&self) -> u32 {
        1
    }

    fn active_count(&self) -> u32 {
        1
    }

    fn queue(&self) -> &dyn CapacityAware {
        &OPAQUE_QUEUE
    }

    fn resize(&self, _sizing: PoolSizing) {}
}

fn registry_with_p1() -> (PoolRegistry, Arc<MockPool>) {
    let registry = PoolRegistry::new();
    let pool = Arc::new(MockPool::new(4, 16, 100));
    registry.register("p1", pool.clone(), PoolBounds::new(4, 16, 100)).unwrap();
    (registry, pool)
}

#[test]
fn test_duplicate_registration_keeps_original() {
    let (registry, original) = registry_with_p1();
    let other = Arc::new(MockPool::new(1, 2, 5));

    let err = registry.register("p1", other, PoolBounds::new(1, 2, 5)).unwrap_err();
    assert!(matches!(err, TunerError::DuplicateName(ref name) if name == "p1"));
    assert!(err.is_configuration_error());

    let entry = registry.lookup("p1").unwrap();
    assert_eq!(entry.bounds(), PoolBounds::new(4, 16, 100));
    assert_eq!(registry.snapshot("p1").unwrap().queue_capacity, 100);
    assert_eq!(original.resize_calls(), 0);
}

#[test]
fn test_concurrent_registration_single_winner() {
    let registry = Arc::new(PoolRegistry::new());
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = registry.clone();
            thread::spawn(move || {
                registry
                    .register("race", Arc::new(MockPool::new(1, 1, 1)), PoolBounds::new(1, 1, 1))
                    .is_ok()
            })
        })
        .collect();

    let winners = handles.into_iter().filter_map(|h| h.join().ok()).filter(|ok| *ok).count();
    assert_eq!(winners, 1);
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_invalid_bounds_rejected() {
    let registry = PoolRegistry::new();
    let err = registry
        .register("bad", Arc::new(MockPool::new(1, 1, 1)), PoolBounds::new(10, 2, 5))
        .unwrap_err();
    assert!(matches!(err, TunerError::InvalidBounds { min_core: 10, max_core: 2, .. }));
    assert!(registry.lookup("bad").is_err());
}

#[test]
fn test_adjust_clamps_into_bounds() {
    let (registry, pool) = registry_with_p1();

    assert_eq!(registry.adjust("p1", 2, 20).unwrap(), PoolSizing::new(4, 16));
    assert_eq!(pool.sizing(), PoolSizing::new(4, 16));

    assert_eq!(registry.adjust("p1", 10, 5).unwrap(), PoolSizing::new(10, 10));
    let snapshot = registry.snapshot("p1").unwrap();
    assert_eq!((snapshot.current_core, snapshot.current_max), (10, 10));

    assert_eq!(registry.adjust("p1", -7, 0).unwrap(), PoolSizing::new(4, 4));
    assert_eq!(registry.adjust("p1", 0, -1).unwrap(), PoolSizing::new(4, 4));
    assert_eq!(registry.adjust("p1", 30, 40).unwrap(), PoolSizing::new(16, 16));
}

#[test]
fn test_adjust_unknown_pool() {
    let registry = PoolRegistry::new();
    assert!(matches!(registry.adjust("missing", 1, 2), Err(TunerError::NotFound(_))));
    assert!(matches!(registry.snapshot("missing"), Err(TunerError::NotFound(_))));
}

#[test]
fn test_snapshot_reflects_load() {
    let (registry, pool) = registry_with_p1();
    for i in 0..80 {
        pool.queue.offer(i).unwrap();
    }
    pool.active.store(1, Ordering::SeqCst);

    let snapshot = registry.snapshot("p1").unwrap();
    assert_eq!(snapshot.queue_size, 80);
    assert_eq!(snapshot.queue_capacity, 100);
    assert_eq!(snapshot.queue_utilization, 0.8);
    assert_eq!(snapshot.pool_size, 4);
    assert_eq!(snapshot.idle_ratio, 0.75);
}

#[test]
fn test_snapshot_of_opaque_queue_is_unbounded() {
    let registry = PoolRegistry::new();
    registry.register("opaque", Arc::new(OpaquePool), PoolBounds::new(1, 1, 1)).unwrap();

    let snapshot = registry.snapshot("opaque").unwrap();
    assert_eq!(snapshot.queue_capacity, UNBOUNDED_CAPACITY);
    assert!(snapshot.queue_utilization < 0.0001);
    assert_eq!(snapshot.idle_ratio, 0.0);
}

#[test]
fn test_queue_capacity_on_fixed_queue() {
    let registry = PoolRegistry::new();
    registry.register("opaque", Arc::new(OpaquePool), PoolBounds::new(1, 1, 10)).unwrap();

    let err = registry.adjust_queue_capacity("opaque", 5).unwrap_err();
    assert!(matches!(err, TunerError::QueueNotResizable(_)));
}

#[test]
fn test_concurrent_adjust_never_breaks_invariants() {
    let (registry, _pool) = registry_with_p1();
    let registry = Arc::new(registry);
    let bounds = PoolBounds::new(4, 16, 100);

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let registry = registry.clone();
            thread::spawn(move || {
                for i in 0..500i64 {
                    let core = (i * 7 + t) % 40 - 10;
                    let max = (i * 13 + t) % 40 - 10;
                    registry.adjust("p1", core, max).unwrap();
                }
            })
        })
        .collect();

    let reader = {
        let registry = registry.clone();
        thread::spawn(move || {
            for _ in 0..2000 {
                let s = registry.snapshot("p1").unwrap();
                assert!(bounds.min_core <= s.current_core);
                assert!(s.current_core <= s.current_max);
                assert!(s.current_max <= bounds.max_core);
            }
        })
    };

    for writer in writers {
        writer.join().unwrap();
    }
    reader.join().unwrap();
}

#[test]
fn test_pools_adjust_independently() {
    let registry = PoolRegistry::new();
    let a = Arc::new(MockPool::new(1, 4, 10));
    let b = Arc::new(MockPool::new(2, 8, 10));
    registry.register("a", a.clone(), PoolBounds::new(1, 4, 10)).unwrap();
    registry.register("b", b.clone(), PoolBounds::new(2, 8, 10)).unwrap();

    registry.adjust("a", 3, 3).unwrap();
    assert_eq!(a.sizing(), PoolSizing::new(3, 3));
    assert_eq!(b.sizing(), PoolSizing::new(2, 8));
    assert_eq!(b.resize_calls(), 0);
}
