//! BoundedResizableQueue - blocking FIFO queue with a capacity ceiling that can
//! be changed while items are queued.
//!
//! Shrinking below the current length never evicts; enqueues are rejected until
//! the length drops under the new ceiling. Growing wakes every producer blocked
//! in [`BoundedResizableQueue::enqueue_timeout`].

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use parking_lot::{Condvar, Mutex};

/// Capacity-aware view of a queue, used for sampling.
///
/// `capacity` and `remaining_capacity` return `None` when the queue cannot
/// report them; samplers fall back as documented on `MetricsSampler`.
pub trait CapacityAware: Send + Sync {
    fn len(&self) -> usize;

    fn capacity(&self) -> Option<usize>;

    fn remaining_capacity(&self) -> Option<usize>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct Inner<T> {
    items: VecDeque<T>,
    capacity: usize,
    closed: bool,
}

pub struct BoundedResizableQueue<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> BoundedResizableQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                capacity,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Enqueue without blocking. Returns the item back if the queue is full or closed.
    pub fn offer(&self, item: T) -> Result<(), T> {
        let mut inner = self.inner.lock();
        if inner.closed || inner.items.len() >= inner.capacity {
            return Err(item);
        }
        inner.items.push_back(item);
        drop(inner);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Alias of [`offer`](Self::offer)
    pub fn enqueue(&self, item: T) -> Result<(), T> {
        self.offer(item)
    }

    /// Wait up to `timeout` for space. Returns the item back on timeout or close.
    pub fn enqueue_timeout(&self, item: T, timeout: Duration) -> Result<(), T> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return Err(item);
            }
            if inner.items.len() < inner.capacity {
                inner.items.push_back(item);
                drop(inner);
                self.not_empty.notify_one();
                return Ok(());
            }
            if self.not_full.wait_until(&mut inner, deadline).timed_out() {
                if !inner.closed && inner.items.len() < inner.capacity {
                    continue;
                }
                return Err(item);
            }
        }
    }

    /// Block until an item is available. Returns `None` once closed and drained.
    pub fn dequeue(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                drop(inner);
                self.not_full.notify_one();
                return Some(item);
            }
            if inner.closed {
                return None;
            }
            self.not_empty.wait(&mut inner);
        }
    }

    /// Wait up to `timeout` for an item.
    pub fn dequeue_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                drop(inner);
                self.not_full.notify_one();
                return Some(item);
            }
            if inner.closed {
                return None;
            }
            if self.not_empty.wait_until(&mut inner, deadline).timed_out() {
                let item = inner.items.pop_front();
                if item.is_some() {
                    drop(inner);
                    self.not_full.notify_one();
                }
                return item;
            }
        }
    }

    pub fn try_dequeue(&self) -> Option<T> {
        let item = self.inner.lock().items.pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Change the capacity ceiling. Queued items are kept even when shrinking.
    pub fn set_capacity(&self, capacity: usize) {
        let mut inner = self.inner.lock();
        let grew = capacity > inner.items.len();
        inner.capacity = capacity;
        drop(inner);
        if grew {
            self.not_full.notify_all();
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remaining_capacity(&self) -> usize {
        let inner = self.inner.lock();
        inner.capacity.saturating_sub(inner.items.len())
    }

    /// Reject further enqueues and wake all blocked producers and consumers.
    /// Already queued items can still be drained.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

impl<T: Send> CapacityAware for BoundedResizableQueue<T> {
    fn len(&self) -> usize {
        BoundedResizableQueue::len(self)
    }

    fn capacity(&self) -> Option<usize> {
        Some(BoundedResizableQueue::capacity(self))
    }

    fn remaining_capacity(&self) -> Option<usize> {
        Some(BoundedResizableQueue::remaining_capacity(self))
    }
}
