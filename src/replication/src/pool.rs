use std::sync::Arc;
use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use log::{debug, trace};

use crate::error::{Result, SequencerError};
use crate::selector::SourceSelector;

/// Executes one pulled value to completion
#[async_trait]
pub trait OperationHandler<T>: Send + Sync + 'static {
    /// Whatever the handler tracks per dequeued value
    type Claim: Send + 'static;

    /// Called as `value` leaves the selector, before any other worker can
    /// dequeue the next one. Claims are therefore taken in dequeue order.
    fn claim(&self, value: &T) -> Self::Claim;

    async fn handle(&self, value: T, claim: Self::Claim) -> Result<()>;
}

/// Fixed set of workers draining a selector, one value in flight each.
///
/// A handler error cancels the whole pool; it is never retried.
pub struct WorkerPool {
    workers: JoinSet<Result<()>>,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Spawn `size` workers on the current runtime.
    pub fn spawn<T, H>(
        size: usize,
        selector: Arc<SourceSelector<T>>,
        handler: Arc<H>,
        cancel: CancellationToken,
    ) -> Self
    where
        T: Send + 'static,
        H: OperationHandler<T>,
    {
        let mut workers = JoinSet::new();
        for id in 0..size.max(1) {
            workers.spawn(worker_loop(
                id,
                Arc::clone(&selector),
                Arc::clone(&handler),
                cancel.clone(),
            ));
        }
        debug!("Started {} replication workers", size.max(1));

        WorkerPool { workers, cancel }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for every worker to exit, returning the first failure.
    ///
    /// Workers only exit once the pool is cancelled.
    pub async fn join(&mut self) -> Result<()> {
        let mut first_error = None;
        while let Some(joined) = self.workers.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => Err(SequencerError::WorkerPanicked(e.to_string())),
            };
            if let Err(e) = outcome {
                self.cancel.cancel();
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

async fn worker_loop<T, H>(
    id: usize,
    selector: Arc<SourceSelector<T>>,
    handler: Arc<H>,
    cancel: CancellationToken,
) -> Result<()>
where
    T: Send + 'static,
    H: OperationHandler<T>,
{
    let mut available = selector.subscribe();

    loop {
        let (value, claim) = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = next_value(&selector, &*handler, &mut available) => next,
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Worker {} abandoned an in-flight operation", id);
                break;
            }
            outcome = handler.handle(value, claim) => {
                if let Err(e) = outcome {
                    cancel.cancel();
                    return Err(e);
                }
            }
        }
    }

    trace!("Worker {} exiting", id);
    Ok(())
}

async fn next_value<T, H>(
    selector: &SourceSelector<T>,
    handler: &H,
    available: &mut watch::Receiver<bool>,
) -> (T, H::Claim)
where
    H: OperationHandler<T>,
{
    loop {
        if let Some(next) = selector.try_produce_next_value_with(|value| handler.claim(value)) {
            return next;
        }
        // The sender lives as long as the selector we hold
        let closed = available.wait_for(|available| *available).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }
}
