//! In-memory catalog implementation.
//!
//! This module provides [`InMemoryDatabase`], an implementation of the
//! [`Database`] trait for tests and single-process development.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: No durability, no cross-process coordination
//! - **No persistence**: All state is lost when the process exits
//!
//! Records are stored as JSON documents, so a record that is never written
//! again stays byte-for-byte identical.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use fleetsync_core::{Error, Result};

use super::{Database, Page, Query};
use crate::model::{CatalogEntity, Table};

type Rows = BTreeMap<(String, String), Value>;

/// In-memory document store keyed by table and `(network_id, id)`.
#[derive(Debug, Default)]
pub struct InMemoryDatabase {
    tables: RwLock<HashMap<Table, Rows>>,
    failing: RwLock<HashSet<Table>>,
}

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("catalog lock poisoned")
}

fn decode<E: CatalogEntity>(value: &Value) -> Result<E> {
    serde_json::from_value(value.clone()).map_err(|e| Error::Serialization {
        message: format!("corrupt {} row: {e}", E::TABLE.as_str()),
    })
}

impl InMemoryDatabase {
    /// Creates an empty database.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every operation on `table` fail with a storage error.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn inject_failure(&self, table: Table) -> Result<()> {
        self.failing.write().map_err(poison_err)?.insert(table);
        Ok(())
    }

    /// Clears all injected failures.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn clear_failures(&self) -> Result<()> {
        self.failing.write().map_err(poison_err)?.clear();
        Ok(())
    }

    /// Returns the number of rows stored in `table`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn row_count(&self, table: Table) -> Result<usize> {
        let tables = self.tables.read().map_err(poison_err)?;
        Ok(tables.get(&table).map_or(0, BTreeMap::len))
    }

    /// Returns the raw stored document, for byte-level comparisons.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn raw(&self, table: Table, network_id: &str, id: &str) -> Result<Option<Value>> {
        let tables = self.tables.read().map_err(poison_err)?;
        Ok(tables
            .get(&table)
            .and_then(|rows| rows.get(&(network_id.to_string(), id.to_string())))
            .cloned())
    }

    fn check_failure(&self, table: Table) -> Result<()> {
        let failing = self.failing.read().map_err(poison_err)?;
        if failing.contains(&table) {
            return Err(Error::storage(format!(
                "injected failure for table {}",
                table.as_str()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Database for InMemoryDatabase {
    async fn read<E: CatalogEntity>(&self, network_id: &str, id: &str) -> Result<Option<E>> {
        self.check_failure(E::TABLE)?;
        let value = {
            let tables = self.tables.read().map_err(poison_err)?;
            tables
                .get(&E::TABLE)
                .and_then(|rows| rows.get(&(network_id.to_string(), id.to_string())))
                .cloned()
        };
        value.as_ref().map(decode::<E>).transpose()
    }

    async fn save<E: CatalogEntity>(&self, record: &E) -> Result<()> {
        self.check_failure(E::TABLE)?;
        let value = serde_json::to_value(record)?;
        let key = (record.network_id().to_string(), record.id().to_string());
        {
            let mut tables = self.tables.write().map_err(poison_err)?;
            tables.entry(E::TABLE).or_default().insert(key, value);
        }
        Ok(())
    }

    async fn remove<E: CatalogEntity>(&self, network_id: &str, id: &str) -> Result<bool> {
        self.check_failure(E::TABLE)?;
        let removed = {
            let mut tables = self.tables.write().map_err(poison_err)?;
            tables
                .get_mut(&E::TABLE)
                .and_then(|rows| rows.remove(&(network_id.to_string(), id.to_string())))
        };
        Ok(removed.is_some())
    }

    async fn list<E: CatalogEntity>(&self, query: &Query) -> Result<Page<E>> {
        self.check_failure(E::TABLE)?;
        let (values, has_more) = {
            let tables = self.tables.read().map_err(poison_err)?;
            let Some(rows) = tables.get(&E::TABLE) else {
                drop(tables);
                return Ok(Page {
                    items: Vec::new(),
                    next_offset: None,
                });
            };
            let mut matching = rows
                .iter()
                .filter(|(key, _)| query.after.as_ref().is_none_or(|after| *key > after))
                .filter(|((network_id, _), value)| query.matches(network_id, value))
                .skip(query.offset);
            let values: Vec<Value> = match query.limit {
                Some(limit) => matching.by_ref().take(limit).map(|(_, v)| v.clone()).collect(),
                None => matching.by_ref().map(|(_, v)| v.clone()).collect(),
            };
            let has_more = matching.next().is_some();
            (values, has_more)
        };

        let next_offset = has_more.then(|| query.offset + values.len());
        let items = values.iter().map(decode::<E>).collect::<Result<Vec<_>>>()?;
        Ok(Page { items, next_offset })
    }

    async fn remove_unknown<E: CatalogEntity>(
        &self,
        network_id: &str,
        known: &HashSet<String>,
    ) -> Result<Vec<E>> {
        self.check_failure(E::TABLE)?;
        let removed: Vec<Value> = {
            let mut tables = self.tables.write().map_err(poison_err)?;
            let Some(rows) = tables.get_mut(&E::TABLE) else {
                return Ok(Vec::new());
            };
            let doomed: Vec<(String, String)> = rows
                .keys()
                .filter(|(row_network, id)| row_network == network_id && !known.contains(id))
                .cloned()
                .collect();
            doomed.iter().filter_map(|key| rows.remove(key)).collect()
        };
        if !removed.is_empty() {
            tracing::debug!(
                table = E::TABLE.as_str(),
                network_id,
                removed = removed.len(),
                "removed records missing from known ids"
            );
        }
        removed.iter().map(decode::<E>).collect()
    }
}
