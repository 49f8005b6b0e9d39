use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use log::{info, trace, warn};
use storage::{
    AppendPrependKind, BackfillAtom, Castime, IncrDecrKind, Mutation, OrderToken, ReplTimestamp,
    SarcMutation,
};

use crate::config::SequencerConfig;
use crate::error::{Result, SequencerError};
use crate::gate::{ApplyGate, Ticket};
use crate::metrics::{MetricsSnapshot, SequencerMetrics};
use crate::operation::{Operation, Origin};
use crate::pool::{OperationHandler, WorkerPool};
use crate::queue::{lock, OperationQueue};
use crate::selector::SourceSelector;
use crate::store::TargetStore;

/// Which queue the workers are draining
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Realtime,
    Backfilling,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Realtime => write!(f, "realtime"),
            Mode::Backfilling => write!(f, "backfilling"),
        }
    }
}

struct ModeState {
    mode: Mode,
    backfill_started: Option<Instant>,
    backlog_warned: bool,
}

/// Stores a backfill stream and a realtime stream into one target store.
///
/// Backfill and realtime operations are queued separately. While a
/// backfill is in progress only the backfill queue is drained; realtime
/// operations wait in their own queue until the `backfill_done` marker has
/// been applied. Within each queue operations are applied in arrival
/// order, each exactly once.
///
/// A store failure aborts the session: the workers stop, queued
/// operations are discarded and the error is reported by
/// [`shutdown`](Self::shutdown) and [`wait_for_failure`](Self::wait_for_failure).
pub struct BackfillStorer<S: TargetStore> {
    session: Arc<Session<S>>,
    pool: WorkerPool,
}

struct Session<S> {
    store: Arc<S>,
    config: SequencerConfig,
    mode: Mutex<ModeState>,
    selector: Arc<SourceSelector<Operation>>,
    backfill_queue: Arc<OperationQueue>,
    realtime_queue: Arc<OperationQueue>,
    gate: Arc<ApplyGate>,
    metrics: SequencerMetrics,
    cancel: CancellationToken,
    failure: Mutex<Option<SequencerError>>,
}

impl<S: TargetStore> BackfillStorer<S> {
    /// Create a storer and start its workers.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(store: Arc<S>, config: SequencerConfig) -> Self {
        let selector = Arc::new(SourceSelector::new());
        let backfill_queue = selector.new_queue("backfill", config.backfill_queue_capacity);
        let realtime_queue = selector.new_queue("realtime", config.realtime_queue_capacity);
        selector.set_source(Some(&realtime_queue));

        let cancel = CancellationToken::new();
        let workers = config.workers;
        info!(
            "Backfill storer started ({} workers, backfill capacity {}, realtime capacity {})",
            workers,
            backfill_queue.capacity(),
            realtime_queue.capacity()
        );

        let session = Arc::new(Session {
            store,
            config,
            mode: Mutex::new(ModeState {
                mode: Mode::Realtime,
                backfill_started: None,
                backlog_warned: false,
            }),
            selector: Arc::clone(&selector),
            backfill_queue,
            realtime_queue,
            gate: ApplyGate::new(),
            metrics: SequencerMetrics::new(),
            cancel: cancel.clone(),
            failure: Mutex::new(None),
        });
        let pool = WorkerPool::spawn(workers, selector, Arc::clone(&session), cancel);

        BackfillStorer { session, pool }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.session.store
    }

    pub fn mode(&self) -> Mode {
        lock(&self.session.mode).mode
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        let session = &self.session;
        MetricsSnapshot::capture(
            &session.metrics,
            self.mode(),
            session.backfill_queue.len(),
            session.realtime_queue.len(),
        )
    }

    pub async fn backfill_delete_everything(&self, token: OrderToken) -> Result<()> {
        self.session.push_backfill(Operation::BackfillDeleteEverything { token }).await
    }

    pub async fn backfill_deletion(&self, key: &str, token: OrderToken) -> Result<()> {
        let key = key.to_string();
        self.session.push_backfill(Operation::BackfillDelete { key, token }).await
    }

    pub async fn backfill_set(&self, atom: BackfillAtom, token: OrderToken) -> Result<()> {
        self.session.push_backfill(Operation::BackfillSet { atom, token }).await
    }

    /// Queue the end-of-backfill marker.
    ///
    /// Realtime draining resumes once every backfill operation queued
    /// before it has been applied and `timestamp` has been recorded.
    pub async fn backfill_done(&self, timestamp: ReplTimestamp, token: OrderToken) -> Result<()> {
        self.session.push_backfill(Operation::BackfillDone { timestamp, token }).await
    }

    pub async fn realtime_get_cas(&self, key: &str, castime: Castime, token: OrderToken) -> Result<()> {
        let mutation = Mutation::GetCas { key: key.to_string() };
        self.session.push_realtime(Operation::RealtimeChange { mutation, castime, token }).await
    }

    pub async fn realtime_sarc(&self, mutation: SarcMutation, castime: Castime, token: OrderToken) -> Result<()> {
        let mutation = Mutation::Sarc(mutation);
        self.session.push_realtime(Operation::RealtimeChange { mutation, castime, token }).await
    }

    pub async fn realtime_incr_decr(
        &self,
        kind: IncrDecrKind,
        key: &str,
        amount: u64,
        castime: Castime,
        token: OrderToken,
    ) -> Result<()> {
        let mutation = Mutation::IncrDecr { kind, key: key.to_string(), amount };
        self.session.push_realtime(Operation::RealtimeChange { mutation, castime, token }).await
    }

    pub async fn realtime_append_prepend(
        &self,
        kind: AppendPrependKind,
        key: &str,
        data: Vec<u8>,
        castime: Castime,
        token: OrderToken,
    ) -> Result<()> {
        let mutation = Mutation::AppendPrepend { kind, key: key.to_string(), data };
        self.session.push_realtime(Operation::RealtimeChange { mutation, castime, token }).await
    }

    pub async fn realtime_delete_key(&self, key: &str, timestamp: ReplTimestamp, token: OrderToken) -> Result<()> {
        let mutation = Mutation::Delete { key: key.to_string() };
        let castime = Castime::new(0, timestamp);
        self.session.push_realtime(Operation::RealtimeChange { mutation, castime, token }).await
    }

    pub async fn realtime_time_barrier(&self, timestamp: ReplTimestamp, token: OrderToken) -> Result<()> {
        self.session.push_realtime(Operation::RealtimeTimeBarrier { timestamp, token }).await
    }

    /// Abort the session: interrupt in-flight operations and discard
    /// everything still queued.
    pub fn cancel(&self) {
        if !self.session.cancel.is_cancelled() {
            info!("Replication session cancelled");
        }
        self.session.abort(None);
    }

    pub fn is_cancelled(&self) -> bool {
        self.session.cancel.is_cancelled()
    }

    /// Resolve once the session has stopped, with the failure that stopped
    /// it, or `None` if it was cancelled.
    pub async fn wait_for_failure(&self) -> Option<SequencerError> {
        self.session.cancel.cancelled().await;
        lock(&self.session.failure).clone()
    }

    /// Stop the workers and report the first failure, if any.
    pub async fn shutdown(mut self) -> Result<()> {
        self.session.abort(None);
        self.pool.join().await?;
        match lock(&self.session.failure).clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<S: TargetStore> Drop for BackfillStorer<S> {
    fn drop(&mut self) {
        self.pool.cancel();
    }
}

impl<S: TargetStore> Session<S> {
    async fn push_backfill(&self, op: Operation) -> Result<()> {
        self.check_open()?;
        trace!("Queueing {} {}", op.kind(), op.token());
        self.backfill_queue.push(op).await.map_err(|_| self.closed_error())?;
        self.ensure_backfilling();
        Ok(())
    }

    async fn push_realtime(&self, op: Operation) -> Result<()> {
        self.check_open()?;
        trace!("Queueing {} {}", op.kind(), op.token());
        self.realtime_queue.push(op).await.map_err(|_| self.closed_error())?;
        self.check_realtime_backlog();
        Ok(())
    }

    /// Switch to draining the backfill queue if not already doing so.
    fn ensure_backfilling(&self) {
        let mut state = lock(&self.mode);
        if state.mode == Mode::Backfilling {
            return;
        }
        state.mode = Mode::Backfilling;
        state.backfill_started = Some(Instant::now());
        state.backlog_warned = false;
        self.selector.set_source(Some(&self.backfill_queue));
        info!(
            "Backfill started, holding {} queued realtime operations",
            self.realtime_queue.len()
        );
    }

    /// Runs after the `backfill_done` marker holding `marker` has been applied.
    fn finish_backfill(&self, marker: &Ticket) {
        let mut state = lock(&self.mode);
        self.metrics.sessions_completed.fetch_add(1, Ordering::Relaxed);
        let elapsed = state.backfill_started.map(|t| t.elapsed()).unwrap_or_default();

        // Operations queued or dequeued behind the marker belong to the next backfill
        let switched = self.selector.switch_source_if(&self.realtime_queue, || {
            self.backfill_queue.is_empty() && self.gate.is_sole(marker, Origin::Backfill)
        });
        if !switched {
            info!(
                "Backfill finished after {:?}, next backfill already queued ({} operations waiting)",
                elapsed,
                self.backfill_queue.len()
            );
            state.backfill_started = Some(Instant::now());
            state.backlog_warned = false;
            return;
        }

        state.mode = Mode::Realtime;
        state.backfill_started = None;
        info!(
            "Backfill finished after {:?}, resuming {} queued realtime operations",
            elapsed,
            self.realtime_queue.len()
        );
    }

    fn check_realtime_backlog(&self) {
        let threshold = self.config.realtime_backlog_warning;
        let queued = self.realtime_queue.len();
        if threshold == 0 || queued < threshold {
            return;
        }

        let mut state = lock(&self.mode);
        if state.mode == Mode::Backfilling && !state.backlog_warned {
            state.backlog_warned = true;
            let elapsed = state.backfill_started.map(|t| t.elapsed()).unwrap_or_default();
            warn!(
                "{} realtime operations queued behind a backfill running for {:?}; backfill is falling behind live traffic",
                queued, elapsed
            );
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(self.closed_error())
        } else {
            Ok(())
        }
    }

    fn closed_error(&self) -> SequencerError {
        if lock(&self.failure).is_some() {
            SequencerError::Aborted
        } else {
            SequencerError::Cancelled
        }
    }

    fn abort(&self, failure: Option<SequencerError>) {
        if let Some(e) = failure {
            lock(&self.failure).get_or_insert(e);
        }
        self.cancel.cancel();

        let discarded = self.backfill_queue.close() + self.realtime_queue.close();
        if discarded > 0 {
            self.metrics.discarded.fetch_add(discarded, Ordering::Relaxed);
            info!("Discarded {} queued operations", discarded);
        }
    }
}

#[async_trait]
impl<S: TargetStore> OperationHandler<Operation> for Session<S> {
    type Claim = Ticket;

    fn claim(&self, op: &Operation) -> Ticket {
        self.gate.issue(op.origin())
    }

    async fn handle(&self, op: Operation, ticket: Ticket) -> Result<()> {
        let origin = op.origin();
        let kind = op.kind();
        let token = op.token();
        let done = op.is_backfill_done();

        // The marker also waits for every earlier backfill operation
        self.gate.wait_turn(&ticket, done).await;
        trace!("Applying {} {}", kind, token);

        if let Err(source) = op.apply(self.store.as_ref()).await {
            warn!("{} {} failed, aborting replication session: {}", kind, token, source);
            let error = SequencerError::Store { operation: kind, source };
            self.abort(Some(error.clone()));
            return Err(error);
        }

        if done {
            self.finish_backfill(&ticket);
        }
        self.metrics.record_applied(origin);
        Ok(())
    }
}
