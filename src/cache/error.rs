use thiserror::Error;

use super::keys::KeyError;
use super::store::StoreError;

/// Failures of the cache layer.
///
/// Only [`CacheError::InvalidationFailure`] ever reaches a caller; every other
/// variant is logged and the request continues as if the cache were absent.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),
    #[error("cache store failed: {0}")]
    Store(#[source] StoreError),
    #[error("cache payload could not be serialized: {0}")]
    Serialization(String),
    #[error("cache key could not be derived: {0}")]
    InvalidKeyDerivation(#[from] KeyError),
    #[error("invalidation of {target} could not be confirmed: {reason}")]
    InvalidationFailure { target: String, reason: String },
}

impl CacheError {
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    pub fn invalidation(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidationFailure {
            target: target.into(),
            reason: reason.into(),
        }
    }
}

impl From<StoreError> for CacheError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Unavailable(_) => Self::StoreUnavailable(error),
            StoreError::Corrupt { .. } => Self::Serialization(error.to_string()),
            StoreError::Backend(_) => Self::Store(error),
        }
    }
}
