//! Error types for the reconciliation engine.

/// Why a redeploy did not happen.
#[derive(Debug, thiserror::Error)]
pub enum RedeployError {
    /// A lookup or the deploy command failed; try again next tick.
    #[error("redeploy failed, will retry: {0}")]
    Retryable(#[source] fleetsync_core::Error),

    /// The deployment can never be restored; the intent should be dropped.
    #[error("redeploy impossible: {reason}")]
    Terminal {
        /// Why the redeploy cannot succeed.
        reason: String,
    },
}

impl RedeployError {
    /// Returns true if a later attempt may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}
