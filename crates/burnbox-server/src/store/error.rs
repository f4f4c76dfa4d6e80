use thiserror::Error;

use crate::handle::HandleError;

/// Failures of `SecretStore` operations. An unavailable secret is not an
/// error: `consume` reports it as `ConsumeResult::NotFound`.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Bad creation input. Not retryable.
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error(transparent)]
    EntropyUnavailable(#[from] HandleError),

    #[error(transparent)]
    Persistence(#[from] anyhow::Error),
}

impl StoreError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::ValidationFailed(reason.into())
    }
}
