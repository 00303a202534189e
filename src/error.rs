//! Cache error types

use std::fmt;
use std::time::Duration;

use redis::RedisError;

/// Result alias used throughout the crate
pub type CacheResult<T> = Result<T, CacheError>;

/// Which of the two stores an error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreSide {
    Fast,
    Durable,
}

impl fmt::Display for StoreSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreSide::Fast => f.write_str("fast"),
            StoreSide::Durable => f.write_str("durable"),
        }
    }
}

/// Errors raised by a single store adapter
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Key {key} holds a value of the wrong type")]
    WrongType { key: String },

    #[error("Backend error: {0}")]
    Backend(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    /// Network and timeout failures may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, StoreError::WrongType { .. })
    }
}

/// Errors surfaced by [`HybridCache`](crate::HybridCache) and
/// [`EvictionManager`](crate::EvictionManager)
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Fast store error: {0}")]
    FastStore(#[source] StoreError),

    #[error("Durable store error: {0}")]
    DurableStore(#[source] StoreError),

    /// One store accepted the operation and the other did not.
    #[error("Partial failure, {failed} store failed: {source}")]
    PartialFailure {
        failed: StoreSide,
        #[source]
        source: StoreError,
    },

    #[error("Both stores failed (fast: {fast}; durable: {durable})")]
    BothStores {
        fast: StoreError,
        durable: StoreError,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CacheError {
    pub fn is_retryable(&self) -> bool {
        match self {
            CacheError::FastStore(e) | CacheError::DurableStore(e) => e.is_retryable(),
            CacheError::PartialFailure { source, .. } => source.is_retryable(),
            CacheError::BothStores { fast, durable } => {
                fast.is_retryable() && durable.is_retryable()
            }
            CacheError::Config(_) | CacheError::Serialization(_) => false,
        }
    }

    /// The store that rejected the operation, if exactly one did
    pub fn failed_side(&self) -> Option<StoreSide> {
        match self {
            CacheError::FastStore(_) => Some(StoreSide::Fast),
            CacheError::DurableStore(_) => Some(StoreSide::Durable),
            CacheError::PartialFailure { failed, .. } => Some(*failed),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let timeout = CacheError::FastStore(StoreError::Timeout(Duration::from_millis(50)));
        assert!(timeout.is_retryable());
        assert_eq!(timeout.failed_side(), Some(StoreSide::Fast));

        let wrong_type = CacheError::PartialFailure {
            failed: StoreSide::Durable,
            source: StoreError::WrongType {
                key: "k".to_owned(),
            },
        };
        assert!(!wrong_type.is_retryable());
        assert_eq!(wrong_type.failed_side(), Some(StoreSide::Durable));

        let config = CacheError::Config("bad".to_owned());
        assert!(!config.is_retryable());
        assert_eq!(config.failed_side(), None);
    }

    #[test]
    fn test_partial_failure_message_names_side() {
        let err = CacheError::PartialFailure {
            failed: StoreSide::Durable,
            source: StoreError::Backend("connection reset".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("durable store failed"));
        assert!(msg.contains("connection reset"));
    }
}
