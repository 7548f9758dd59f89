//! Error types for rate limiting.

use crate::storage::StorageError;

/// Errors that can occur while setting up rate limiting.
///
/// Request-time store failures never surface as errors, the policy fails open instead.
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    /// Storage backend error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}
