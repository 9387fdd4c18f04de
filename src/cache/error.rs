//! Error taxonomy for cache operations
//!
//! Single-tier failures surface as `TierUnavailable` at the store level;
//! the coordinator degrades past them and only reports `CacheUnavailable`
//! when no enabled tier could answer. Loader failures keep their own
//! variants so `remember` callers can tell a cache problem from an
//! upstream one.

use thiserror::Error;

use crate::cache::tier::TierKind;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheOperationError {
    /// One tier's store is down or refused the operation.
    #[error("{0} tier unavailable")]
    TierUnavailable(TierKind),

    /// No enabled tier could answer; at least one failed.
    #[error("no cache tier available")]
    CacheUnavailable,

    /// A `remember` loader failed; nothing was cached.
    #[error("loader failed: {0}")]
    LoaderError(String),

    /// A waiter gave up on another caller's in-flight loader.
    #[error("timed out waiting for in-flight loader")]
    LoaderTimeout,

    /// The key violates the raw-key rules or the structured key format.
    #[error("invalid cache key: {0}")]
    InvalidKey(String),

    /// The invalidation index disagrees with tier contents.
    #[error("cache index drift detected ({0} issues)")]
    ValidationDrift(usize),

    /// The persistent tier's backend rejected or corrupted a record.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl CacheOperationError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    pub fn loader(message: impl Into<String>) -> Self {
        Self::LoaderError(message.into())
    }

    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey(message.into())
    }

    /// Whether retrying the same operation can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TierUnavailable(_) | Self::CacheUnavailable | Self::LoaderTimeout
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_tier() {
        let e = CacheOperationError::TierUnavailable(TierKind::Persistent);
        assert_eq!(e.to_string(), "persistent tier unavailable");
    }

    #[test]
    fn retryable_classification() {
        assert!(CacheOperationError::LoaderTimeout.is_retryable());
        assert!(CacheOperationError::CacheUnavailable.is_retryable());
        assert!(!CacheOperationError::loader("boom").is_retryable());
        assert!(!CacheOperationError::invalid_key("bad").is_retryable());
    }
}
