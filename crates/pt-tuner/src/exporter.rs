//! Gauge export of pool snapshots through the `metrics` facade.
//!
//! Every gauge carries a `pool` label. The server installs a Prometheus
//! recorder; without a recorder these calls are no-ops.

use metrics::gauge;

use pt_common::PoolSnapshot;
use crate::registry::PoolRegistry;

pub fn export_snapshot(snapshot: &PoolSnapshot) {
    let pool = snapshot.name.clone();

    gauge!("pooltune_pool_min_core", "pool" => pool.clone()).set(snapshot.bounds.min_core as f64);
    gauge!("pooltune_pool_max_core", "pool" => pool.clone()).set(snapshot.bounds.max_core as f64);
    gauge!("pooltune_pool_core_size", "pool" => pool.clone()).set(snapshot.current_core as f64);
    gauge!("pooltune_pool_max_size", "pool" => pool.clone()).set(snapshot.current_max as f64);
    gauge!("pooltune_pool_size", "pool" => pool.clone()).set(snapshot.pool_size as f64);
    gauge!("pooltune_pool_active_workers", "pool" => pool.clone()).set(snapshot.active_workers as f64);
    gauge!("pooltune_pool_queue_size", "pool" => pool.clone()).set(snapshot.queue_size as f64);
    gauge!("pooltune_pool_queue_capacity", "pool" => pool.clone()).set(snapshot.queue_capacity as f64);
    gauge!("pooltune_pool_queue_utilization", "pool" => pool.clone()).set(snapshot.queue_utilization);
    gauge!("pooltune_pool_idle_ratio", "pool" => pool).set(snapshot.idle_ratio);
}

/// Export gauges for every registered pool. Returns the number of pools exported.
pub fn export_all(registry: &PoolRegistry) -> usize {
    let snapshots = registry.snapshot_all();
    for snapshot in &snapshots {
        export_snapshot(snapshot);
    }
    snapshots.len()
}
