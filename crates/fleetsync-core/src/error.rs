//! Error types and result aliases for fleetsync.
//!
//! This module defines the error type shared by the catalog, the sync
//! protocol and the reconciliation engine. Variants map onto the error
//! taxonomy the service acts on: transient infrastructure failures are
//! [`Error::Storage`] and [`Error::Transport`], malformed inbound data is
//! [`Error::InvalidTopic`] or [`Error::Serialization`], and startup problems
//! are [`Error::Configuration`].

use std::fmt;

/// The result type used throughout fleetsync.
pub type Result<T> = std::result::Result<T, Error>;

/// One failed broker inside an aggregated transport error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerFailure {
    /// Name of the broker endpoint.
    pub broker: String,
    /// Failure reported by that broker.
    pub message: String,
}

impl fmt::Display for BrokerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.broker, self.message)
    }
}

/// Errors that can occur in fleetsync operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A network identifier or record identifier was rejected.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of what made the ID invalid.
        message: String,
    },

    /// An inbound topic did not match the expected layout.
    #[error("invalid topic '{topic}': {reason}")]
    InvalidTopic {
        /// The topic as received.
        topic: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A broker operation failed.
    #[error("transport error: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
        /// Per-broker failures when the operation was fanned out.
        failures: Vec<BrokerFailure>,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// The requested record was not found.
    #[error("not found: {resource_type} with id {id}")]
    ResourceNotFound {
        /// The type of record that was not found.
        resource_type: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration is missing or inconsistent.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An internal error occurred that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a new storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source cause.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a transport error for a single broker.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            failures: Vec::new(),
        }
    }

    /// Creates an aggregated transport error from per-broker failures.
    #[must_use]
    pub fn transport_aggregate(operation: &str, failures: Vec<BrokerFailure>) -> Self {
        let names: Vec<&str> = failures.iter().map(|f| f.broker.as_str()).collect();
        Self::Transport {
            message: format!(
                "{operation} failed on {} broker(s): {}",
                failures.len(),
                names.join(", ")
            ),
            failures,
        }
    }

    /// Creates an invalid topic error.
    #[must_use]
    pub fn invalid_topic(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTopic {
            topic: topic.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new resource not found error.
    #[must_use]
    pub fn resource_not_found(resource_type: &'static str, id: impl fmt::Display) -> Self {
        Self::ResourceNotFound {
            resource_type,
            id: id.to_string(),
        }
    }

    /// Creates a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true for failures that are expected to heal on a later attempt.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Storage { .. } | Self::Transport { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn storage_error_with_source() {
        let source = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::storage_with_source("failed to read catalog", source);
        assert!(err.to_string().contains("storage error"));
        assert!(StdError::source(&err).is_some());
        assert!(err.is_transient());
    }

    #[test]
    fn aggregate_transport_error_names_failed_brokers() {
        let err = Error::transport_aggregate(
            "publish",
            vec![
                BrokerFailure {
                    broker: "mqtt-a".into(),
                    message: "connection refused".into(),
                },
                BrokerFailure {
                    broker: "mqtt-c".into(),
                    message: "timeout".into(),
                },
            ],
        );
        let msg = err.to_string();
        assert!(msg.contains("2 broker(s)"));
        assert!(msg.contains("mqtt-a, mqtt-c"));
        assert!(err.is_transient());
    }

    #[test]
    fn invalid_topic_is_not_transient() {
        let err = Error::invalid_topic("processes//state/deployment", "empty network id");
        assert!(err.to_string().contains("empty network id"));
        assert!(!err.is_transient());
    }

    #[test]
    fn serde_errors_convert_to_serialization() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Serialization { .. }));
    }
}
