pub mod config;
pub mod error;
mod gate;
pub mod metrics;
pub mod operation;
pub mod pool;
pub mod queue;
pub mod selector;
pub mod store;
pub mod storer;

// Re-exports for convenience
pub use config::SequencerConfig;
pub use error::{Result, SequencerError};
pub use metrics::{MetricsSnapshot, SequencerMetrics};
pub use operation::{Operation, Origin};
pub use pool::{OperationHandler, WorkerPool};
pub use queue::{BoundedQueue, OperationQueue, QueueClosed};
pub use selector::SourceSelector;
pub use store::TargetStore;
pub use storer::{BackfillStorer, Mode};
