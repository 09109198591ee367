//! Event-stream payloads.

use serde::{Deserialize, Serialize};

/// A device-group command consumed from the event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceGroupCommand {
    /// Command name.
    pub command: String,
    /// Subject id.
    pub id: String,
    /// Owning tenant or user.
    pub owner: String,
    /// Target device group.
    pub device_group: String,
}

/// Completion notice produced once a command was handled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoneNotification {
    /// Command that was handled.
    pub command: String,
    /// Subject id.
    pub id: String,
    /// Name of the handler that ran it.
    pub handler: String,
}

impl DoneNotification {
    /// Builds the notice for `command` handled by `handler`.
    #[must_use]
    pub fn for_command(command: &DeviceGroupCommand, handler: &str) -> Self {
        Self {
            command: command.command.clone(),
            id: command.id.clone(),
            handler: handler.to_string(),
        }
    }
}

/// One raw record read from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    /// Position in the stream; committing it acknowledges every record up to
    /// and including it.
    pub offset: u64,
    /// Encoded [`DeviceGroupCommand`].
    pub payload: Vec<u8>,
}

impl EventRecord {
    /// Decodes the payload.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if the payload is not a command.
    pub fn decode(&self) -> serde_json::Result<DeviceGroupCommand> {
        serde_json::from_slice(&self.payload)
    }
}
