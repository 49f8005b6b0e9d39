use thiserror::Error;

/// Failure raised by the store while applying a mutation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("value for key {key:?} is {size} bytes, limit is {max}")]
    ValueTooLarge { key: String, size: usize, max: usize },

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}
