use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Notify, Semaphore, TryAcquireError};
use log::debug;
use thiserror::Error;

use crate::operation::Operation;
use crate::selector::{RecomputeLock, SourceSelector};

/// The queue was closed; pending and future pushes are refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("queue closed")]
pub struct QueueClosed;

/// Queue of sequenced operations
pub type OperationQueue = BoundedQueue<Operation>;

/// Capacity-limited FIFO.
///
/// A push into a full queue waits until a pop frees a slot; waiting
/// producers are admitted in arrival order. Every occupancy change
/// happens under the recomputation lock of the selector the queue
/// belongs to, so the selector's availability flag is recomputed in
/// the same critical section as the transition that affects it.
pub struct BoundedQueue<T> {
    name: &'static str,
    capacity: usize,
    items: Mutex<VecDeque<T>>,
    /// Mirrors `items.len()`; written under the items lock
    len: AtomicUsize,
    closed: AtomicBool,
    slots: Semaphore,
    pushed: Notify,
    lock: Arc<RecomputeLock<T>>,
}

impl<T> BoundedQueue<T> {
    pub(crate) fn new(name: &'static str, capacity: usize, lock: Arc<RecomputeLock<T>>) -> Self {
        let capacity = capacity.max(1);
        BoundedQueue {
            name,
            capacity,
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            len: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            slots: Semaphore::new(capacity),
            pushed: Notify::new(),
            lock,
        }
    }

    /// A queue not attached to any selector
    pub fn standalone(name: &'static str, capacity: usize) -> Arc<Self> {
        SourceSelector::new().new_queue(name, capacity)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn shares_lock(&self, lock: &Arc<RecomputeLock<T>>) -> bool {
        Arc::ptr_eq(&self.lock, lock)
    }

    /// Append to the tail, waiting for a free slot if the queue is full.
    pub async fn push(&self, value: T) -> Result<(), QueueClosed> {
        let permit = match self.slots.try_acquire() {
            Ok(permit) => permit,
            Err(TryAcquireError::Closed) => return Err(QueueClosed),
            Err(TryAcquireError::NoPermits) => {
                debug!("{} queue full ({} items), producer waiting", self.name, self.capacity);
                self.slots.acquire().await.map_err(|_| QueueClosed)?
            }
        };
        // The slot is returned by whichever pop removes this value
        permit.forget();

        let active = self.lock.state();
        if self.is_closed() {
            return Err(QueueClosed);
        }
        let became_non_empty = {
            let mut items = lock(&self.items);
            items.push_back(value);
            self.len.store(items.len(), Ordering::Release);
            items.len() == 1
        };
        if became_non_empty {
            self.lock.recompute(&active);
        }
        drop(active);

        self.pushed.notify_one();
        Ok(())
    }

    /// Remove the head without waiting.
    pub fn try_pop(&self) -> Option<T> {
        let active = self.lock.state();
        self.pop_locked(&active)
    }

    /// Remove the head, waiting for a push if the queue is empty.
    ///
    /// Fails only once the queue has been closed.
    pub async fn pop(&self) -> Result<T, QueueClosed> {
        loop {
            let notified = self.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(value) = self.try_pop() {
                return Ok(value);
            }
            if self.is_closed() {
                return Err(QueueClosed);
            }
            notified.await;
        }
    }

    /// Pop with the recomputation lock already held.
    pub(crate) fn pop_locked(&self, active: &Option<Arc<BoundedQueue<T>>>) -> Option<T> {
        let (value, became_empty) = {
            let mut items = lock(&self.items);
            let value = items.pop_front()?;
            self.len.store(items.len(), Ordering::Release);
            (value, items.is_empty())
        };
        if became_empty {
            self.lock.recompute(active);
        }
        self.slots.add_permits(1);
        Some(value)
    }

    /// Refuse further pushes, wake blocked producers and drop everything
    /// still queued. Returns how many items were discarded.
    pub fn close(&self) -> usize {
        self.slots.close();

        let active = self.lock.state();
        self.closed.store(true, Ordering::Release);
        let discarded: Vec<T> = {
            let mut items = lock(&self.items);
            self.len.store(0, Ordering::Release);
            items.drain(..).collect()
        };
        self.lock.recompute(&active);
        drop(active);

        self.pushed.notify_waiters();
        if !discarded.is_empty() {
            debug!("{} queue closed, discarded {} items", self.name, discarded.len());
        }
        discarded.len()
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
