//! Point-in-time utilization and idle statistics of a registered pool.

use chrono::{Local, NaiveDateTime};

use pt_common::{MetricRecord, PoolSnapshot};
use crate::queue::CapacityAware;
use crate::registry::PoolEntry;

/// Capacity reported for queues that expose neither a capacity nor a remaining count
pub const UNBOUNDED_CAPACITY: usize = i32::MAX as usize;

pub struct MetricsSampler;

impl MetricsSampler {
    pub fn snapshot(entry: &PoolEntry) -> PoolSnapshot {
        let handle = entry.handle();

        // Core and max come from one read so a concurrent resize is never seen half-applied
        let sizing = handle.sizing();
        let pool_size = handle.pool_size();
        let active_workers = handle.active_count();
        let queue = handle.queue();
        let queue_size = queue.len();
        let queue_capacity = resolve_capacity(queue);

        PoolSnapshot {
            name: entry.name().to_string(),
            bounds: entry.bounds(),
            current_core: sizing.core,
            current_max: sizing.max,
            pool_size,
            active_workers,
            queue_size,
            queue_capacity,
            queue_utilization: queue_utilization(queue_size, queue_capacity),
            idle_ratio: idle_ratio(pool_size, active_workers),
        }
    }

    pub fn record(entry: &PoolEntry, timestamp: NaiveDateTime) -> MetricRecord {
        MetricRecord::from_snapshot(&Self::snapshot(entry), timestamp)
    }

    pub fn record_now(entry: &PoolEntry) -> MetricRecord {
        Self::record(entry, Local::now().naive_local())
    }
}

/// Reported capacity, else `len + remaining`, else [`UNBOUNDED_CAPACITY`]
pub fn resolve_capacity(queue: &dyn CapacityAware) -> usize {
    if let Some(capacity) = queue.capacity() {
        return capacity;
    }
    match queue.remaining_capacity() {
        Some(remaining) => queue.len().saturating_add(remaining),
        None => UNBOUNDED_CAPACITY,
    }
}

/// `min(1, size / capacity)`, 0 for a zero capacity
pub fn queue_utilization(queue_size: usize, queue_capacity: usize) -> f64 {
    if queue_capacity == 0 {
        return 0.0;
    }
    (queue_size as f64 / queue_capacity as f64).min(1.0)
}

/// Fraction of live workers not running a task, 0 for an empty pool
pub fn idle_ratio(pool_size: u32, active_workers: u32) -> f64 {
    if pool_size == 0 {
        return 0.0;
    }
    // active can briefly exceed pool_size while a worker is retiring
    let idle = pool_size.saturating_sub(active_workers);
    idle as f64 / pool_size as f64
}
