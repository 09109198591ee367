//! # fleetsync-sync
//!
//! State synchronization between the cloud catalog and disconnect-prone
//! agents.
//!
//! ## Overview
//!
//! - [`topics`]: State and command topic layout
//! - [`transport`]: Broker abstraction with in-memory, MQTT and fan-out
//!   implementations
//! - [`protocol`]: Upsert, delete and known-ids handlers ([`StateSync`])
//! - [`lifecycle`]: Placeholder and tombstone bookkeeping
//!   ([`PlaceholderLifecycle`])
//! - [`commands`]: Outbound agent commands ([`CommandPublisher`])
//! - [`resync`]: The periodic pass that resends lost commands
//!
//! ## Data Flow
//!
//! ```text
//! API create ──▶ PlaceholderLifecycle ──cmd──▶ agent
//!                      ▲                          │
//!                      └── StateSync ◀──state─────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod commands;
pub mod lifecycle;
pub mod protocol;
pub mod resync;
pub mod topics;
pub mod transport;

pub use commands::{CommandPublisher, StartCommand};
pub use lifecycle::{DeleteOutcome, NewDeployment, NoWarden, PlaceholderLifecycle, WardenDelegate};
pub use protocol::StateSync;
pub use resync::{Resync, ResyncReport};
pub use topics::{CommandKind, EntityType, StateKind, StateTopic};
pub use transport::{Broker, InboundMessage, MessageHandler};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::commands::CommandPublisher;
    pub use crate::lifecycle::{PlaceholderLifecycle, WardenDelegate};
    pub use crate::protocol::StateSync;
    pub use crate::transport::fanout::FanoutBroker;
    pub use crate::transport::memory::InMemoryBroker;
    pub use crate::transport::{Broker, MessageHandler};
}
