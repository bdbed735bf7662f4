pub mod schema;

pub use schema::{CellType, Column, Schema};

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use log::debug;

use crate::{
    btree::BTree,
    buffer::BufferPoolManager,
    error::{Error, Result},
    storage::{TableHeap, Tuple},
    types::{IndexOid, TableOid},
    utils::HandyRwLock,
};

pub struct TableInfo {
    pub oid: TableOid,
    pub name: String,
    pub schema: Schema,
    pub heap: Arc<TableHeap>,
}

pub struct IndexInfo {
    pub oid: IndexOid,
    pub name: String,
    pub table_name: String,
    /// Column of the indexed table the key is drawn from.
    pub key_column: usize,
    pub index: Arc<BTree<i64>>,
}

impl IndexInfo {
    /// Extract the index key from a row of the indexed table.
    pub fn key_of(&self, tuple: &Tuple) -> Result<i64> {
        tuple
            .cell_at(self.key_column)
            .as_i64()
            .ok_or_else(|| Error::execution("index key column is not an int64"))
    }
}

struct CatalogInner {
    tables: HashMap<TableOid, Arc<TableInfo>>,
    table_names: HashMap<String, TableOid>,
    indexes: HashMap<IndexOid, Arc<IndexInfo>>,
    table_indexes: HashMap<String, Vec<IndexOid>>,
    next_table_oid: TableOid,
    next_index_oid: IndexOid,
}

/// Read-mostly registry of tables and indexes. Owns the table heaps and
/// index objects; executors borrow them per query.
pub struct Catalog {
    inner: RwLock<CatalogInner>,
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(CatalogInner {
                tables: HashMap::new(),
                table_names: HashMap::new(),
                indexes: HashMap::new(),
                table_indexes: HashMap::new(),
                next_table_oid: 1,
                next_index_oid: 1,
            }),
        }
    }

    pub fn create_table(&self, name: &str, schema: Schema) -> Result<Arc<TableInfo>> {
        let mut inner = self.inner.wl();
        if inner.table_names.contains_key(name) {
            return Err(Error::execution(&format!("table {} already exists", name)));
        }

        let oid = inner.next_table_oid;
        inner.next_table_oid += 1;

        let info = Arc::new(TableInfo {
            oid,
            name: name.to_string(),
            schema,
            heap: Arc::new(TableHeap::new(oid)),
        });
        inner.tables.insert(oid, Arc::clone(&info));
        inner.table_names.insert(name.to_string(), oid);
        inner.table_indexes.entry(name.to_string()).or_default();

        debug!("created table {} (oid {})", name, oid);
        Ok(info)
    }

    /// Create a single-column B+ tree index and backfill it from the
    /// table's current rows.
    pub fn create_index(
        &self,
        index_name: &str,
        table_name: &str,
        key_column: usize,
        bpm: Arc<BufferPoolManager>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Arc<IndexInfo>> {
        let table = self
            .get_table_by_name(table_name)
            .ok_or_else(|| Error::execution(&format!("table {} does not exist", table_name)))?;

        let index = Arc::new(BTree::<i64>::new(
            index_name,
            bpm,
            leaf_max_size,
            internal_max_size,
        )?);

        let mut inner = self.inner.wl();
        let oid = inner.next_index_oid;
        inner.next_index_oid += 1;

        let info = Arc::new(IndexInfo {
            oid,
            name: index_name.to_string(),
            table_name: table_name.to_string(),
            key_column,
            index,
        });

        for (rid, tuple) in table.heap.scan() {
            let key = info.key_of(&tuple)?;
            info.index.insert(&key, rid)?;
        }

        inner.indexes.insert(oid, Arc::clone(&info));
        inner
            .table_indexes
            .entry(table_name.to_string())
            .or_default()
            .push(oid);

        debug!("created index {} on {} (oid {})", index_name, table_name, oid);
        Ok(info)
    }

    pub fn get_table(&self, oid: TableOid) -> Option<Arc<TableInfo>> {
        self.inner.rl().tables.get(&oid).cloned()
    }

    pub fn get_table_by_name(&self, name: &str) -> Option<Arc<TableInfo>> {
        let inner = self.inner.rl();
        let oid = inner.table_names.get(name)?;
        inner.tables.get(oid).cloned()
    }

    pub fn get_index(&self, oid: IndexOid) -> Option<Arc<IndexInfo>> {
        self.inner.rl().indexes.get(&oid).cloned()
    }

    pub fn get_table_indexes(&self, table_name: &str) -> Vec<Arc<IndexInfo>> {
        let inner = self.inner.rl();
        match inner.table_indexes.get(table_name) {
            Some(oids) => oids
                .iter()
                .filter_map(|oid| inner.indexes.get(oid).cloned())
                .collect(),
            None => Vec::new(),
        }
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}
