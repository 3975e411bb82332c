//! Pooltune Tuner
//!
//! This crate provides the adaptive worker-pool controller:
//! - BoundedResizableQueue: blocking FIFO queue with a runtime-adjustable capacity
//! - WorkerPool: OS-thread pool whose core/max sizes can change while it runs
//! - PoolRegistry: named pools with fixed bounds; clamps and applies resizes
//! - MetricsSampler: utilization and idle statistics from a live pool
//! - MetricsSink: bounded per-pool metric history (in memory or CSV files)
//! - RecommendationSource: external sizing oracle, with a chat completions client
//! - TuningScheduler: per-pool periodic fetch, clamp and apply loop
//! - Lifecycle: background metric recorder and gauge exporter
//! - PoolController: control surface used by the HTTP API

pub mod error;
pub mod queue;
pub mod pool;
pub mod registry;
pub mod sampler;
pub mod sink;
pub mod recommendation;
pub mod scheduler;
pub mod exporter;
pub mod lifecycle;
pub mod controller;

pub use error::{TunerError, RecommendationError};
pub use queue::{BoundedResizableQueue, CapacityAware};
pub use pool::{PoolHandle, WorkerPool, WorkerPoolConfig, Task};
pub use registry::{PoolRegistry, PoolEntry};
pub use sampler::{MetricsSampler, UNBOUNDED_CAPACITY};
pub use sink::{MetricsSink, InMemoryMetricsSink, CsvFileSink, DEFAULT_RETENTION, pool_file_stem};
pub use recommendation::{RecommendationSource, ChatCompletionSource, ChatCompletionConfig};
pub use scheduler::{TuningScheduler, SchedulerConfig, CycleOutcome, SkipReason};
pub use lifecycle::{LifecycleManager, LifecycleConfig};
pub use controller::PoolController;

pub type Result<T> = std::result::Result<T, TunerError>;
