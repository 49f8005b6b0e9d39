use storage::StoreError;
use thiserror::Error;

/// Errors surfaced to the owner of a replication session
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SequencerError {
    /// The store rejected an operation; the session was aborted
    #[error("{operation} failed: {source}")]
    Store {
        operation: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("replication session cancelled")]
    Cancelled,

    /// A call arrived after an earlier failure aborted the session
    #[error("replication session aborted")]
    Aborted,

    #[error("replication worker panicked: {0}")]
    WorkerPanicked(String),
}

pub type Result<T> = std::result::Result<T, SequencerError>;
