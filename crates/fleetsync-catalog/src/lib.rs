//! # fleetsync-catalog
//!
//! The cloud-side catalog of what every network runs and what it should run.
//!
//! ## Overview
//!
//! - [`model`]: mirrored entities, intent records and their placeholder
//!   bookkeeping
//! - [`store`]: the [`Database`] contract and an in-memory implementation
//! - [`cursor`]: forward-only paginated streams over a table
//!
//! ## Example
//!
//! ```rust
//! use fleetsync_catalog::{Database, InMemoryDatabase, Query};
//! use fleetsync_catalog::model::{Deployment, SyncInfo};
//!
//! # tokio_test::block_on(async {
//! let db = InMemoryDatabase::new();
//! let deployment = Deployment {
//!     id: "d1".into(),
//!     name: "pump control".into(),
//!     source: String::new(),
//!     deployment_time: None,
//!     tenant_id: None,
//!     network_id: "n1".into(),
//!     sync_info: SyncInfo::confirmed(chrono::Utc::now()),
//! };
//! db.save(&deployment).await.unwrap();
//! let all: Vec<Deployment> = db.list_all(&Query::network("n1")).await.unwrap();
//! assert_eq!(all.len(), 1);
//! # });
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod cursor;
pub mod model;
pub mod store;

pub use cursor::{DEFAULT_PAGE_SIZE, stream_all};
pub use model::{CatalogEntity, RecordState, SyncInfo, Synced, Table};
pub use store::memory::InMemoryDatabase;
pub use store::{Database, Page, Query};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::cursor::stream_all;
    pub use crate::model::{
        CatalogEntity, Deployment, DeploymentCommand, DeploymentMetadata, DeploymentWardenInfo,
        HistoricProcessInstance, Incident, LastNetworkContact, ProcessDefinition, ProcessInstance,
        RecordState, SyncInfo, Synced, WardenInfo,
    };
    pub use crate::store::{Database, Query};
}
