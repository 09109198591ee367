//! Consumer errors.

/// Why the consumer stopped.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// A command kept failing until the retry timeout and the failure policy
    /// declared it fatal.
    #[error("event at offset {offset} failed after {attempts} attempts")]
    RetryTimeout {
        /// Offset of the failed record.
        offset: u64,
        /// Attempts made before the timeout.
        attempts: u32,
        /// Error of the last attempt.
        #[source]
        last_error: Option<fleetsync_core::Error>,
    },

    /// Reading from or committing to the stream failed.
    #[error(transparent)]
    Stream(#[from] fleetsync_core::Error),
}

/// Result alias for the consumer.
pub type Result<T, E = EventError> = std::result::Result<T, E>;
