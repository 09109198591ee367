//! Network identifiers.
//!
//! A network id is embedded as one path segment of every pub/sub topic, so
//! it must not be empty and must not contain topic separators or wildcards.

use crate::error::{Error, Result};

/// Characters that would change the meaning of a topic segment.
const FORBIDDEN: [char; 4] = ['/', '+', '#', '$'];

/// Validates a network identifier.
///
/// # Errors
///
/// Returns [`Error::InvalidId`] if the id is empty, has surrounding
/// whitespace, or contains a topic separator or wildcard.
pub fn validate_network_id(network_id: &str) -> Result<()> {
    if network_id.is_empty() {
        return Err(Error::InvalidId {
            message: "network id cannot be empty".to_string(),
        });
    }
    if network_id.trim() != network_id {
        return Err(Error::InvalidId {
            message: format!("network id '{network_id}' has surrounding whitespace"),
        });
    }
    if let Some(c) = network_id.chars().find(|c| FORBIDDEN.contains(c)) {
        return Err(Error::InvalidId {
            message: format!("network id '{network_id}' contains reserved character '{c}'"),
        });
    }
    Ok(())
}
