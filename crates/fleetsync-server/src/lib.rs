//! # fleetsync-server
//!
//! Wiring of the fleetsync service: environment configuration, the
//! Prometheus recorder and the health endpoints. The binary in `main.rs`
//! connects the brokers, subscribes the state-sync handler and starts the
//! reconciliation and re-sync loops.
//!
//! ## Endpoints
//!
//! - `GET /health` - Shallow liveness check (always 200)
//! - `GET /ready` - 200 once subscriptions and loops are running
//! - `GET /metrics` - Prometheus exposition

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod metrics;
pub mod server;

pub use config::{Config, MqttSettings};
pub use server::{AppState, router, serve};
