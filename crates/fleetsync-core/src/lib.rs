//! # fleetsync-core
//!
//! Shared primitives for the fleetsync service, the cloud-side counterpart of
//! a fleet of intermittently connected process-execution agents ("networks").
//!
//! This crate provides the foundation every other fleetsync crate builds on:
//!
//! - **Error Types**: The shared [`Error`] enum and [`Result`] alias
//! - **Observability**: Logging initialization and span helpers
//! - **Metrics**: Metric names and label keys used across components
//! - **Networks**: Validation of network identifiers used in topic paths
//! - **Ticker**: The fixed-rate, drop-on-overrun periodic task runner
//!
//! ## Example
//!
//! ```rust
//! use fleetsync_core::network::validate_network_id;
//!
//! assert!(validate_network_id("plant-7").is_ok());
//! assert!(validate_network_id("a/b").is_err());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod metrics;
pub mod network;
pub mod observability;
pub mod ticker;

pub use error::{Error, Result};
pub use network::validate_network_id;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::network::validate_network_id;
    pub use crate::observability::{LogFormat, init_logging};
    pub use crate::ticker::spawn_periodic;
}
