//! WorkerPool - OS-thread execution pool whose core/max worker counts and queue
//! capacity can be changed at runtime.
//!
//! Submission follows the classic three step policy:
//! - fewer than `core` workers: start a new worker for the task
//! - otherwise queue the task if the queue has room
//! - otherwise start a worker up to `max`, or reject the task
//!
//! Workers above `core` retire after `keep_alive` without work. Workers above
//! `max` (after a shrink) retire as soon as they finish their current task.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use pt_common::PoolSizing;
use crate::queue::{BoundedResizableQueue, CapacityAware};
use crate::{Result, TunerError};

/// How often an idle core worker re-checks the pool sizing
const CORE_RECHECK_INTERVAL: Duration = Duration::from_millis(500);

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Live execution pool whose sizing is owned by the registry.
///
/// Implementations must return core and max from one consistent read in
/// [`sizing`](PoolHandle::sizing).
pub trait PoolHandle: Send + Sync {
    fn sizing(&self) -> PoolSizing;

    /// Number of live workers
    fn pool_size(&self) -> u32;

    /// Number of workers currently running a task
    fn active_count(&self) -> u32;

    fn queue(&self) -> &dyn CapacityAware;

    fn queue_len(&self) -> usize {
        self.queue().len()
    }

    /// Apply a new core/max pair. Callers pass an already clamped sizing.
    fn resize(&self, sizing: PoolSizing);

    /// Change the queue capacity ceiling. Returns false if the queue is fixed.
    fn resize_queue(&self, capacity: usize) -> bool {
        let _ = capacity;
        false
    }
}

/// Construction parameters for a [`WorkerPool`]
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub name: String,
    pub sizing: PoolSizing,
    pub queue_capacity: usize,
    pub keep_alive: Duration,
}

impl WorkerPoolConfig {
    pub fn new(name: impl Into<String>, core: u32, max: u32, queue_capacity: usize) -> Self {
        Self {
            name: name.into(),
            sizing: PoolSizing::new(core, max.max(core)),
            queue_capacity,
            keep_alive: Duration::from_secs(60),
        }
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }
}

struct Shared {
    name: String,
    sizing: RwLock<PoolSizing>,
    queue: BoundedResizableQueue<Task>,
    keep_alive: Duration,
    running: AtomicBool,
    /// Live workers, including reserved slots whose thread is starting
    pool_size: AtomicU32,
    active_workers: AtomicU32,
    completed_tasks: AtomicU64,
    worker_seq: AtomicU32,
}

impl Shared {
    /// Reserve a worker slot if fewer than `limit` workers are live
    fn reserve_worker(&self, limit: u32) -> bool {
        let mut current = self.pool_size.load(Ordering::SeqCst);
        loop {
            if current >= limit {
                return false;
            }
            match self.pool_size.compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Release a worker slot only while more than `floor` workers are live
    fn retire_above(&self, floor: u32) -> bool {
        let mut current = self.pool_size.load(Ordering::SeqCst);
        loop {
            if current <= floor {
                return false;
            }
            match self.pool_size.compare_exchange(current, current - 1, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn spawn_worker(self: &Arc<Self>, first: Option<Task>) -> std::io::Result<()> {
        let seq = self.worker_seq.fetch_add(1, Ordering::Relaxed);
        let shared = self.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}-{}", self.name, seq))
            .spawn(move || shared.run_worker(first));

        if let Err(e) = spawned {
            self.pool_size.fetch_sub(1, Ordering::SeqCst);
            return Err(e);
        }
        debug!(pool = %self.name, worker = seq, "Worker started");
        Ok(())
    }

    fn run_worker(self: Arc<Self>, first: Option<Task>) {
        let mut next = first;
        loop {
            if let Some(task) = next.take() {
                self.active_workers.fetch_add(1, Ordering::SeqCst);
                if catch_unwind(AssertUnwindSafe(task)).is_err() {
                    warn!(pool = %self.name, "Task panicked");
                }
                self.active_workers.fetch_sub(1, Ordering::SeqCst);
                self.completed_tasks.fetch_add(1, Ordering::Relaxed);
            }

            match self.next_task() {
                Some(task) => next = Some(task),
                None => break,
            }
        }
        debug!(pool = %self.name, "Worker retired");
    }

    /// Fetch the next task, or `None` once this worker has released its slot
    fn next_task(&self) -> Option<Task> {
        loop {
            let sizing = *self.sizing.read();

            if self.retire_above(sizing.max.max(1)) {
                return None;
            }

            let timed = self.pool_size.load(Ordering::SeqCst) > sizing.core;
            let wait = if timed { self.keep_alive } else { CORE_RECHECK_INTERVAL };

            if let Some(task) = self.queue.dequeue_timeout(wait) {
                return Some(task);
            }

            if self.queue.is_closed() {
                self.pool_size.fetch_sub(1, Ordering::SeqCst);
                return None;
            }

            if timed && self.retire_above(self.sizing.read().core) {
                return None;
            }
        }
    }
}

/// Thread pool implementing [`PoolHandle`] over a [`BoundedResizableQueue`]
pub struct WorkerPool {
    shared: Arc<Shared>,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig) -> Self {
        info!(
            pool = %config.name,
            core = config.sizing.core,
            max = config.sizing.max,
            queue_capacity = config.queue_capacity,
            "Creating worker pool"
        );

        Self {
            shared: Arc::new(Shared {
                name: config.name,
                sizing: RwLock::new(config.sizing),
                queue: BoundedResizableQueue::new(config.queue_capacity),
                keep_alive: config.keep_alive,
                running: AtomicBool::new(true),
                pool_size: AtomicU32::new(0),
                active_workers: AtomicU32::new(0),
                completed_tasks: AtomicU64::new(0),
                worker_seq: AtomicU32::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Submit a task. Returns `CapacityRejection` when all workers are busy and
    /// the queue is full; rejected tasks are never retried.
    pub fn submit<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.shared.running.load(Ordering::SeqCst) {
            return Err(TunerError::ShutdownInProgress);
        }

        let task: Task = Box::new(task);
        let sizing = *self.shared.sizing.read();

        if self.shared.reserve_worker(sizing.core) {
            self.shared.spawn_worker(Some(task))?;
            return Ok(());
        }

        let task = match self.shared.queue.offer(task) {
            Ok(()) => {
                // A pool with core 0 still needs one worker to drain the queue
                if self.shared.pool_size.load(Ordering::SeqCst) == 0 && self.shared.reserve_worker(1) {
                    self.shared.spawn_worker(None)?;
                }
                return Ok(());
            }
            Err(task) => task,
        };

        if self.shared.reserve_worker(sizing.max) {
            self.shared.spawn_worker(Some(task))?;
            return Ok(());
        }

        metrics::counter!("pooltune_tasks_rejected_total", "pool" => self.shared.name.clone()).increment(1);
        debug!(
            pool = %self.shared.name,
            max = sizing.max,
            queue_size = self.shared.queue.len(),
            "Pool at capacity, rejecting task"
        );
        Err(TunerError::CapacityRejection(self.shared.name.clone()))
    }

    pub fn completed_count(&self) -> u64 {
        self.shared.completed_tasks.load(Ordering::Relaxed)
    }

    pub fn queue_capacity(&self) -> usize {
        self.shared.queue.capacity()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Stop accepting tasks. Queued tasks are still drained by the workers.
    pub fn shutdown(&self) {
        if self.shared.running.swap(false, Ordering::SeqCst) {
            info!(pool = %self.shared.name, queued = self.shared.queue.len(), "Shutting down worker pool");
            self.shared.queue.close();
        }
    }

    /// Block until every worker has exited or the timeout elapses
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.shared.pool_size.load(Ordering::SeqCst) > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
        true
    }
}

impl PoolHandle for WorkerPool {
    fn sizing(&self) -> PoolSizing {
        *self.shared.sizing.read()
    }

    fn pool_size(&self) -> u32 {
        self.shared.pool_size.load(Ordering::SeqCst)
    }

    fn active_count(&self) -> u32 {
        self.shared.active_workers.load(Ordering::SeqCst)
    }

    fn queue(&self) -> &dyn CapacityAware {
        &self.shared.queue
    }

    fn resize(&self, sizing: PoolSizing) {
        let old = {
            let mut current = self.shared.sizing.write();
            std::mem::replace(&mut *current, sizing)
        };

        if old == sizing {
            return;
        }

        info!(
            pool = %self.shared.name,
            old_core = old.core,
            old_max = old.max,
            new_core = sizing.core,
            new_max = sizing.max,
            "Resized worker pool"
        );

        // Queued work gets new core workers right away instead of waiting for the next submit
        let backlog = self.shared.queue.len();
        let mut started = 0;
        while started < backlog && self.is_running() && self.shared.reserve_worker(sizing.core) {
            if let Err(e) = self.shared.spawn_worker(None) {
                warn!(pool = %self.shared.name, error = %e, "Failed to start worker after resize");
                break;
            }
            started += 1;
        }
    }

    fn resize_queue(&self, capacity: usize) -> bool {
        let old = self.shared.queue.capacity();
        self.shared.queue.set_capacity(capacity);
        info!(pool = %self.shared.name, old_capacity = old, new_capacity = capacity, "Resized pool queue");
        true
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
