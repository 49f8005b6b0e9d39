pub mod types;
pub mod config;
pub mod error;
pub mod storage;

// Re-export main types for convenience
pub use types::{
    AppendPrependKind, BackfillAtom, Castime, IncrDecrKind, Mutation, MutationResult, OrderToken,
    ReplTimestamp, SarcMutation, SetPolicy, StoredValue, MAX_KEY_SIZE,
};
pub use config::StorageConfig;
pub use error::StoreError;
pub use storage::Storage;
