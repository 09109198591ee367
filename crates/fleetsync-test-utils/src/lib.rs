//! Shared test utilities for fleetsync integration tests.
//!
//! This crate provides:
//! - [`TestContext`]: An in-memory catalog and a unique network id
//! - Factory functions for catalog records
//! - Assertion helpers for placeholder lifecycle states
//!
//! # Example
//!
//! ```rust,ignore
//! use fleetsync_test_utils::{TestContext, fixtures};
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let ctx = TestContext::new();
//!     let deployment = fixtures::deployment(&ctx.network_id, "d1");
//!     // ... run test ...
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod assertions;
pub mod fixtures;

pub use assertions::*;
pub use fixtures::TestContext;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("fleetsync=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
