//! Schema catalog and snapshot publishing.
//!
//! A [`SchemaCatalog`] is immutable once built. Reloads build a fresh catalog
//! with [`CatalogBuilder`] and publish it through [`SchemaStore::reload`];
//! readers holding an older snapshot keep seeing it unchanged.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{SchemaError, SchemaResult};
use crate::relation::Relation;
use crate::table::TableRef;

/// A column as the gateway sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: String,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub array: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableEntry {
    pub table: TableRef,
    #[serde(default)]
    pub columns: Vec<ColumnDef>,
}

impl TableEntry {
    pub fn new(table: TableRef) -> Self {
        Self {
            table,
            columns: Vec::new(),
        }
    }

    pub fn with_columns(table: TableRef, columns: Vec<ColumnDef>) -> Self {
        Self { table, columns }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Tables plus a directed multi-graph of relations between them.
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    tables: Vec<TableEntry>,
    index: HashMap<TableRef, usize>,
    relations: Vec<Relation>,
}

impl SchemaCatalog {
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::default()
    }

    pub fn table(&self, database: &str, schema: &str, name: &str) -> Option<&TableEntry> {
        let key = TableRef::new(database, schema, name);
        self.index.get(&key).map(|&i| &self.tables[i])
    }

    pub fn entry(&self, table: &TableRef) -> Option<&TableEntry> {
        self.index.get(table).map(|&i| &self.tables[i])
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableEntry> {
        self.tables.iter()
    }

    pub fn relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations.iter()
    }

    /// Relations with `table` on either side, in insertion order. A
    /// self-referencing relation is yielded once.
    pub fn relations_for<'a>(&'a self, table: &'a TableRef) -> impl Iterator<Item = &'a Relation> {
        self.relations.iter().filter(move |r| r.touches(table))
    }

    pub fn outgoing<'a>(&'a self, table: &'a TableRef) -> impl Iterator<Item = &'a Relation> {
        self.relations.iter().filter(move |r| r.left.table == *table)
    }

    pub fn incoming<'a>(&'a self, table: &'a TableRef) -> impl Iterator<Item = &'a Relation> {
        self.relations.iter().filter(move |r| r.right.table == *table)
    }

    pub fn cross_database_relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations.iter().filter(|r| r.is_cross_database())
    }

    /// Distinct named databases, sorted. The default database is not listed.
    pub fn databases(&self) -> Vec<&str> {
        let set: BTreeSet<&str> = self
            .tables
            .iter()
            .map(|t| t.table.database.as_str())
            .filter(|d| !d.is_empty())
            .collect();
        set.into_iter().collect()
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    pub fn relation_count(&self) -> usize {
        self.relations.len()
    }
}

/// Builds a [`SchemaCatalog`].
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    catalog: SchemaCatalog,
}

impl CatalogBuilder {
    pub fn add_table(&mut self, entry: TableEntry) -> SchemaResult<&mut Self> {
        if self.catalog.index.contains_key(&entry.table) {
            return Err(SchemaError::DuplicateTable(entry.table.to_string()));
        }
        let idx = self.catalog.tables.len();
        self.catalog.index.insert(entry.table.clone(), idx);
        self.catalog.tables.push(entry);
        Ok(self)
    }

    /// Adds one directed edge. Both tables must already be registered.
    pub fn add_relation(&mut self, relation: Relation) -> SchemaResult<&mut Self> {
        for side in [&relation.left, &relation.right] {
            if !self.catalog.index.contains_key(&side.table) {
                return Err(SchemaError::UnknownTable(side.table.to_string()));
            }
        }
        self.catalog.relations.push(relation);
        Ok(self)
    }

    pub fn build(self) -> SchemaCatalog {
        self.catalog
    }
}

/// Publishes immutable catalog snapshots.
#[derive(Debug, Default)]
pub struct SchemaStore {
    current: RwLock<Arc<SchemaCatalog>>,
}

impl SchemaStore {
    pub fn new(catalog: SchemaCatalog) -> Self {
        Self {
            current: RwLock::new(Arc::new(catalog)),
        }
    }

    pub fn snapshot(&self) -> Arc<SchemaCatalog> {
        self.current.read().clone()
    }

    /// Swaps in a new catalog and returns the one it replaced.
    pub fn reload(&self, catalog: SchemaCatalog) -> Arc<SchemaCatalog> {
        let next = Arc::new(catalog);
        tracing::info!(
            "Schema reloaded: {} tables, {} relations",
            next.table_count(),
            next.relation_count()
        );
        std::mem::replace(&mut *self.current.write(), next)
    }
}
