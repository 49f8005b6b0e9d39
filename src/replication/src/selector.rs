use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use log::debug;

use crate::queue::{lock, BoundedQueue};

type Active<T> = Option<Arc<BoundedQueue<T>>>;

/// Lock shared by a selector and every queue created from it.
///
/// It guards the selector's active source; queues take it around each
/// occupancy transition. The availability flag is only written while it
/// is held, so the flag always equals "active queue is non-empty".
pub(crate) struct RecomputeLock<T> {
    active: Mutex<Active<T>>,
    available: watch::Sender<bool>,
}

impl<T> RecomputeLock<T> {
    fn new() -> Self {
        let (available, _) = watch::channel(false);
        RecomputeLock {
            active: Mutex::new(None),
            available,
        }
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, Active<T>> {
        lock(&self.active)
    }

    /// Must be called with `state()` held.
    pub(crate) fn recompute(&self, active: &Active<T>) {
        let now = active.as_ref().is_some_and(|queue| !queue.is_empty());
        self.available.send_if_modified(|available| {
            if *available == now {
                false
            } else {
                *available = now;
                true
            }
        });
    }
}

/// Forwards to exactly one active queue, or to none.
///
/// Consumers wait on [`subscribe`](Self::subscribe) for the availability
/// flag to turn true, then pull with
/// [`try_produce_next_value`](Self::try_produce_next_value). Swapping the
/// active queue redirects every consumer at once.
pub struct SourceSelector<T> {
    lock: Arc<RecomputeLock<T>>,
}

impl<T> SourceSelector<T> {
    pub fn new() -> Self {
        SourceSelector {
            lock: Arc::new(RecomputeLock::new()),
        }
    }

    /// Create a queue this selector can draw from.
    pub fn new_queue(&self, name: &'static str, capacity: usize) -> Arc<BoundedQueue<T>> {
        Arc::new(BoundedQueue::new(name, capacity, Arc::clone(&self.lock)))
    }

    /// Make `source` the active queue, or detach when `None`.
    ///
    /// Availability is recomputed from the new source before the lock is
    /// released. Panics if the queue was created by another selector.
    pub fn set_source(&self, source: Option<&Arc<BoundedQueue<T>>>) {
        if let Some(queue) = source {
            assert!(
                queue.shares_lock(&self.lock),
                "queue {} belongs to another selector",
                queue.name()
            );
        }

        let mut active = self.lock.state();
        *active = source.cloned();
        self.lock.recompute(&active);
        debug!(
            "Selector source set to {} (available={})",
            source.map(|q| q.name()).unwrap_or("none"),
            *self.lock.available.borrow()
        );
    }

    /// Name of the active queue, if any
    pub fn source_name(&self) -> Option<&'static str> {
        self.lock.state().as_ref().map(|queue| queue.name())
    }

    /// Cached availability flag
    pub fn available(&self) -> bool {
        *self.lock.available.borrow()
    }

    /// Watch the availability flag. It only changes on a real transition,
    /// so a receiver is woken once per edge. Dropping it unsubscribes.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.lock.available.subscribe()
    }

    /// Pop from the active queue if the selector is available.
    ///
    /// With several consumers, a wakeup does not guarantee an item is left;
    /// callers re-check through this method rather than trusting the flag.
    pub fn try_produce_next_value(&self) -> Option<T> {
        self.try_produce_next_value_with(|_| ()).map(|(value, ())| value)
    }

    /// Like [`try_produce_next_value`](Self::try_produce_next_value), running
    /// `claim` on the popped value before the recomputation lock is released.
    pub(crate) fn try_produce_next_value_with<R>(&self, claim: impl FnOnce(&T) -> R) -> Option<(T, R)> {
        let active = self.lock.state();
        if !*self.lock.available.borrow() {
            return None;
        }
        let queue = Arc::clone(active.as_ref()?);
        let value = queue.pop_locked(&active)?;
        let claimed = claim(&value);
        Some((value, claimed))
    }

    /// Make `source` the active queue if `ready` holds, evaluated under the
    /// recomputation lock. Returns whether the source was switched.
    pub(crate) fn switch_source_if(&self, source: &Arc<BoundedQueue<T>>, ready: impl FnOnce() -> bool) -> bool {
        assert!(
            source.shares_lock(&self.lock),
            "queue {} belongs to another selector",
            source.name()
        );

        let mut active = self.lock.state();
        if !ready() {
            return false;
        }
        *active = Some(Arc::clone(source));
        self.lock.recompute(&active);
        debug!(
            "Selector source switched to {} (available={})",
            source.name(),
            *self.lock.available.borrow()
        );
        true
    }

    /// Pop from the active queue.
    ///
    /// Calling this while [`available`](Self::available) is false is a bug.
    pub fn produce_next_value(&self) -> T {
        match self.try_produce_next_value() {
            Some(value) => value,
            None => unreachable!("produce_next_value called while the selector is unavailable"),
        }
    }
}

impl<T> Default for SourceSelector<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for SourceSelector<T> {
    fn drop(&mut self) {
        // The active queue holds the lock, which holds the active queue
        *self.lock.state() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_availability_tracks_active_queue() {
        let selector = SourceSelector::new();
        let queue = selector.new_queue("a", 8);
        assert!(!selector.available());

        selector.set_source(Some(&queue));
        assert!(!selector.available());

        // Sample the flag after every push and pop
        for i in 0..3 {
            queue.push(i).await.unwrap();
            assert_eq!(selector.available(), !queue.is_empty());
        }
        while queue.try_pop().is_some() {
            assert_eq!(selector.available(), !queue.is_empty());
        }
        assert!(!selector.available());
    }

    #[tokio::test]
    async fn test_set_source_recomputes_immediately() {
        let selector = SourceSelector::new();
        let full = selector.new_queue("full", 4);
        let empty = selector.new_queue("empty", 4);
        full.push(1).await.unwrap();

        selector.set_source(Some(&full));
        assert!(selector.available());
        assert_eq!(selector.source_name(), Some("full"));

        selector.set_source(Some(&empty));
        assert!(!selector.available());

        // Pushes to a detached queue do not affect the flag
        full.push(2).await.unwrap();
        assert!(!selector.available());

        selector.set_source(None);
        assert!(!selector.available());
        assert_eq!(selector.source_name(), None);

        selector.set_source(Some(&full));
        assert_eq!(selector.produce_next_value(), 1);
        assert_eq!(selector.produce_next_value(), 2);
        assert!(!selector.available());
    }

    #[tokio::test]
    async fn test_subscriber_woken_on_rising_edge() {
        let selector = SourceSelector::new();
        let queue = selector.new_queue("a", 4);
        selector.set_source(Some(&queue));

        let mut rx = selector.subscribe();
        assert!(!*rx.borrow_and_update());

        let waiter = tokio::spawn(async move {
            rx.changed().await.unwrap();
            *rx.borrow_and_update()
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        queue.push(1).await.unwrap();
        assert!(timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn test_switch_source_if_checks_under_lock() {
        let selector = SourceSelector::new();
        let first = selector.new_queue("first", 4);
        let second = selector.new_queue("second", 4);
        selector.set_source(Some(&first));
        second.push(7).await.unwrap();

        assert!(!selector.switch_source_if(&second, || false));
        assert_eq!(selector.source_name(), Some("first"));

        assert!(selector.switch_source_if(&second, || first.is_empty()));
        assert_eq!(selector.source_name(), Some("second"));
        assert!(selector.available());

        let (value, claimed) = selector.try_produce_next_value_with(|v| *v * 2).unwrap();
        assert_eq!((value, claimed), (7, 14));
        assert!(!selector.available());
    }

    #[tokio::test]
    async fn test_try_produce_when_unavailable() {
        let selector: SourceSelector<u32> = SourceSelector::new();
        assert_eq!(selector.try_produce_next_value(), None);

        let queue = selector.new_queue("a", 4);
        selector.set_source(Some(&queue));
        assert_eq!(selector.try_produce_next_value(), None);
    }

    #[test]
    #[should_panic(expected = "selector is unavailable")]
    fn test_produce_while_unavailable_panics() {
        let selector: SourceSelector<u32> = SourceSelector::new();
        selector.produce_next_value();
    }

    #[test]
    #[should_panic(expected = "belongs to another selector")]
    fn test_foreign_queue_rejected() {
        let selector: SourceSelector<u32> = SourceSelector::new();
        let other = SourceSelector::new();
        let queue = other.new_queue("foreign", 1);
        selector.set_source(Some(&queue));
    }
}
