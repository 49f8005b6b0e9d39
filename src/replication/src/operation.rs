use storage::{BackfillAtom, Castime, Mutation, OrderToken, ReplTimestamp, StoreError};

use crate::store::TargetStore;

/// Which producer an operation came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Backfill,
    Realtime,
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Origin::Backfill => write!(f, "backfill"),
            Origin::Realtime => write!(f, "realtime"),
        }
    }
}

/// A queued unit of work, applied exactly once to the target store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    BackfillDeleteEverything {
        token: OrderToken,
    },
    BackfillDelete {
        key: String,
        token: OrderToken,
    },
    BackfillSet {
        atom: BackfillAtom,
        token: OrderToken,
    },
    /// End-of-backfill marker. Applying it commits the final timestamp
    /// and hands the selector back to the realtime queue.
    BackfillDone {
        timestamp: ReplTimestamp,
        token: OrderToken,
    },
    RealtimeChange {
        mutation: Mutation,
        castime: Castime,
        token: OrderToken,
    },
    RealtimeTimeBarrier {
        timestamp: ReplTimestamp,
        token: OrderToken,
    },
}

impl Operation {
    pub fn origin(&self) -> Origin {
        match self {
            Operation::BackfillDeleteEverything { .. }
            | Operation::BackfillDelete { .. }
            | Operation::BackfillSet { .. }
            | Operation::BackfillDone { .. } => Origin::Backfill,
            Operation::RealtimeChange { .. } | Operation::RealtimeTimeBarrier { .. } => Origin::Realtime,
        }
    }

    pub fn token(&self) -> OrderToken {
        match self {
            Operation::BackfillDeleteEverything { token }
            | Operation::BackfillDelete { token, .. }
            | Operation::BackfillSet { token, .. }
            | Operation::BackfillDone { token, .. }
            | Operation::RealtimeChange { token, .. }
            | Operation::RealtimeTimeBarrier { token, .. } => *token,
        }
    }

    /// Short name for logs and error reports
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::BackfillDeleteEverything { .. } => "backfill_delete_everything",
            Operation::BackfillDelete { .. } => "backfill_delete",
            Operation::BackfillSet { .. } => "backfill_set",
            Operation::BackfillDone { .. } => "backfill_done",
            Operation::RealtimeChange { mutation, .. } => match mutation {
                Mutation::GetCas { .. } => "realtime_get_cas",
                Mutation::Sarc(_) => "realtime_sarc",
                Mutation::IncrDecr { .. } => "realtime_incr_decr",
                Mutation::AppendPrepend { .. } => "realtime_append_prepend",
                Mutation::Delete { .. } => "realtime_delete",
            },
            Operation::RealtimeTimeBarrier { .. } => "realtime_time_barrier",
        }
    }

    pub fn is_backfill_done(&self) -> bool {
        matches!(self, Operation::BackfillDone { .. })
    }

    /// Issue the single store call this operation stands for.
    pub(crate) async fn apply<S: TargetStore + ?Sized>(self, store: &S) -> Result<(), StoreError> {
        match self {
            Operation::BackfillDeleteEverything { token } => {
                store.delete_all_keys_for_backfill(token).await
            }
            Operation::BackfillDelete { key, token } => store.backfill_delete(&key, token).await,
            Operation::BackfillSet { atom, token } => store.backfill_set(atom, token).await,
            Operation::BackfillDone { timestamp, token } => {
                store.set_replication_clock(timestamp, token).await
            }
            Operation::RealtimeChange { mutation, castime, token } => {
                let result = store.change(&mutation, castime, token).await?;
                log::trace!("{} {:?} -> {:?}", token, mutation.key(), result);
                Ok(())
            }
            Operation::RealtimeTimeBarrier { timestamp, token } => {
                store.set_replication_clock(timestamp, token).await
            }
        }
    }
}
