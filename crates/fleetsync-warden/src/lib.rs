//! # fleetsync-warden
//!
//! Periodic reconciliation that keeps every network running what the
//! catalog says it should.
//!
//! ## Overview
//!
//! - [`traits`]: the entity family and the two capability traits the engine
//!   is generic over
//! - [`engine`]: [`Warden`], its two audit loops and per-record decisions
//! - [`catalog`]: capabilities over the mirrored catalog and agent commands
//! - [`age`]: the age gate
//!
//! ## Decision Flow
//!
//! ```text
//! WardenInfo ──▶ instances? ──0──▶ histories? ──none──▶ (redeploy) ─▶ Start
//!                     │                  └──some──▶ incidents? ─none─▶ Remove
//!                     │                                   └──some──▶ Start
//!                     ├──1──▶ healthy
//!                     └──n──▶ Stop all but the oldest
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod age;
pub mod catalog;
pub mod engine;
pub mod error;
pub mod traits;

#[cfg(test)]
mod testing;

pub use catalog::{CatalogEngine, CatalogTypes, CatalogWarden, WARDEN_KEY_PREFIX, catalog_engine};
pub use engine::{LoopReport, Warden, WardenConfig, WardenOutcome};
pub use error::RedeployError;
pub use traits::{DesiredStateStore, Intent, RuntimeStateProvider, WardenTypes};
