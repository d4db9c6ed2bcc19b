use std::collections::HashMap;

use async_trait::async_trait;
use cspann_common::ConditionalSync;
use thiserror::Error;

/// Errors that occur while describing an index
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// No table with the requested id exists
    #[error("Table {0} not found")]
    TableNotFound(u32),

    /// The table exists but has no index with the requested id
    #[error("Index {index} not found on table {table}")]
    IndexNotFound {
        /// The table that was searched
        table: u32,
        /// The index that was requested
        index: u32,
    },

    /// The catalog itself could not be read
    #[error("Catalog error: {0}")]
    Backend(String),
}

/// Locates the rows of a table that lives in another tenant's keyspace
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExternalRowData {
    /// The tenant whose keyspace holds the rows
    pub tenant_id: u64,
    /// The id of the table within that tenant
    pub table_id: u32,
}

/// What the store needs to know about a table in order to locate the rows
/// of one of its vector indexes
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableDescriptor {
    /// The tenant that owns the table
    pub tenant_id: u64,
    /// The id of the table
    pub table_id: u32,
    /// The ids of the table's vector indexes
    pub index_ids: Vec<u32>,
    /// Set when the table's rows live elsewhere; such tables are read-only
    pub external: Option<ExternalRowData>,
}

impl TableDescriptor {
    /// The tenant and table under which rows of this table are stored
    pub fn row_location(&self) -> (u64, u32) {
        match &self.external {
            Some(external) => (external.tenant_id, external.table_id),
            None => (self.tenant_id, self.table_id),
        }
    }
}

/// Looks up table descriptors by id.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait IndexCatalog: ConditionalSync {
    /// Describe the table with the given id
    async fn table(&self, table_id: u32) -> Result<TableDescriptor, CatalogError>;
}

/// An [IndexCatalog] over a fixed set of descriptors
#[derive(Clone, Debug, Default)]
pub struct StaticCatalog {
    tables: HashMap<u32, TableDescriptor>,
}

impl StaticCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a table
    pub fn with_table(mut self, table: TableDescriptor) -> Self {
        self.tables.insert(table.table_id, table);
        self
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl IndexCatalog for StaticCatalog {
    async fn table(&self, table_id: u32) -> Result<TableDescriptor, CatalogError> {
        self.tables
            .get(&table_id)
            .cloned()
            .ok_or(CatalogError::TableNotFound(table_id))
    }
}
