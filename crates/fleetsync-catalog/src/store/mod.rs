//! Pluggable persistence for the catalog.
//!
//! The [`Database`] trait is the only contract the sync protocol and the
//! reconciliation engine need from the persistence engine: per-record
//! read/replace/remove keyed by `(network_id, id)`, filtered paginated
//! listing, and the known-ids prune.
//!
//! ## Design Principles
//!
//! - **Atomic replace**: `save` replaces a whole record; it is the only
//!   serialization point between concurrent message handlers
//! - **Idempotent**: every operation can be repeated with the same outcome
//! - **Testability**: [`memory::InMemoryDatabase`] for tests and development

pub mod memory;

use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::Value;

use fleetsync_core::Result;

use crate::model::{CatalogEntity, fields};

/// Filter and page window for [`Database::list`].
///
/// Field filters are equality matches on top-level JSON fields of the
/// stored record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// Restrict to one network.
    pub network_id: Option<String>,
    /// Top-level field equality filters.
    pub fields: Vec<(String, Value)>,
    /// Only records whose `(network_id, id)` key sorts after this one.
    pub after: Option<(String, String)>,
    /// Number of matching records to skip.
    pub offset: usize,
    /// Maximum number of records to return.
    pub limit: Option<usize>,
}

impl Query {
    /// Matches every record of the table.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches every record of one network.
    #[must_use]
    pub fn network(network_id: impl Into<String>) -> Self {
        Self {
            network_id: Some(network_id.into()),
            ..Self::default()
        }
    }

    /// Adds a field equality filter.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    /// Restricts to placeholder records.
    #[must_use]
    pub fn placeholders(self) -> Self {
        self.field(fields::IS_PLACEHOLDER, true)
    }

    /// Restricts to records marked for delete.
    #[must_use]
    pub fn marked_for_delete(self) -> Self {
        self.field(fields::MARKED_FOR_DELETE, true)
    }

    /// Restricts to records marked as missing.
    #[must_use]
    pub fn marked_as_missing(self) -> Self {
        self.field(fields::MARKED_AS_MISSING, true)
    }

    /// Starts the listing after the `(network_id, id)` key.
    ///
    /// Unlike an offset this stays stable when earlier records are removed
    /// between page fetches.
    #[must_use]
    pub fn after(mut self, network_id: impl Into<String>, id: impl Into<String>) -> Self {
        self.after = Some((network_id.into(), id.into()));
        self
    }

    /// Sets the page window.
    #[must_use]
    pub const fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    /// Returns true if a stored JSON record matches the filters.
    #[must_use]
    pub fn matches(&self, network_id: &str, record: &Value) -> bool {
        if self
            .network_id
            .as_deref()
            .is_some_and(|wanted| wanted != network_id)
        {
            return false;
        }
        self.fields
            .iter()
            .all(|(name, expected)| record.get(name) == Some(expected))
    }
}

/// One page of a [`Database::list`] result.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<E> {
    /// Records in `(network_id, id)` order.
    pub items: Vec<E>,
    /// Offset of the next page, `None` on the last page.
    pub next_offset: Option<usize>,
}

/// Storage abstraction for the catalog.
///
/// ## Thread Safety
///
/// All methods are `Send + Sync`; inbound message handlers call them
/// concurrently from transport callbacks.
#[async_trait]
pub trait Database: Send + Sync {
    /// Reads one record.
    ///
    /// Returns `None` if the record does not exist.
    async fn read<E: CatalogEntity>(&self, network_id: &str, id: &str) -> Result<Option<E>>;

    /// Inserts or replaces one record.
    async fn save<E: CatalogEntity>(&self, record: &E) -> Result<()>;

    /// Removes one record. Returns true if it existed.
    async fn remove<E: CatalogEntity>(&self, network_id: &str, id: &str) -> Result<bool>;

    /// Lists matching records in `(network_id, id)` order, starting after
    /// [`Query::after`] when set.
    async fn list<E: CatalogEntity>(&self, query: &Query) -> Result<Page<E>>;

    /// Removes every record of `network_id` whose id is not in `known`.
    ///
    /// Returns the removed records. Records whose id is in `known` are left
    /// untouched.
    async fn remove_unknown<E: CatalogEntity>(
        &self,
        network_id: &str,
        known: &HashSet<String>,
    ) -> Result<Vec<E>>;

    /// Lists every matching record without a page window.
    async fn list_all<E: CatalogEntity>(&self, query: &Query) -> Result<Vec<E>> {
        let mut query = query.clone();
        query.offset = 0;
        query.limit = None;
        Ok(self.list::<E>(&query).await?.items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn query_matches_network_and_fields() {
        let record = json!({"id": "i1", "businessKey": "bk1", "isPlaceholder": true});
        let query = Query::network("n1").field("businessKey", "bk1").placeholders();
        assert!(query.matches("n1", &record));
        assert!(!query.matches("n2", &record));
        assert!(!Query::all().marked_for_delete().matches("n1", &record));
    }

    #[test]
    fn missing_field_does_not_match() {
        let record = json!({"id": "i1"});
        assert!(!Query::all().field("businessKey", "bk1").matches("n1", &record));
    }
}
