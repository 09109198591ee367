//! # fleetsync-events
//!
//! Consumer for the device-group notification stream.
//!
//! ## Overview
//!
//! - [`message`]: the consumed command and the produced completion notice
//! - [`consumer`]: [`EventConsumer`] and the source, handler and sink traits
//! - [`retry`]: [`RetryPolicy`], bounded retry with an overall timeout
//! - [`memory`]: in-memory source and sink
//!
//! Delivery is at-least-once: a record is committed only after it was
//! handled, and a skipped failure holds the commit back until a restart
//! redelivers it.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod consumer;
pub mod error;
pub mod memory;
pub mod message;
pub mod retry;

pub use consumer::{
    ConsumerReport, EventConsumer, EventHandler, EventSink, EventSource, FailureHandler,
    FailurePolicy,
};
pub use error::{EventError, Result};
pub use message::{DeviceGroupCommand, DoneNotification, EventRecord};
pub use retry::{RetryExhausted, RetryPolicy};
