//! Top-level registry of tables.
//!
//! A [`Database`] owns exactly one [`InMemoryBufferPool`] and one
//! [`LockManager`], shared by every [`Table`] it holds, plus a name→table
//! map so repeated `get_table` calls are O(1) instead of a linear scan.


use ahash::RandomState;
use buffer::InMemoryBufferPool;
use common::{Config, RowError, RowResult};
use hashbrown::HashMap;
use log::{debug, info};
use lstore_lock::{LockManager, TransactionId};
use lstore_query::Query;
use lstore_table::Table;
use std::sync::Mutex;

/// Registry mapping table name to [`Table`], holding the one buffer pool
/// and one lock manager every table in this database shares.
pub struct Database {
    tables: HashMap<String, Table, RandomState>,
    buffer_pool: Mutex<InMemoryBufferPool>,
    lock_manager: LockManager,
    config: Config,
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl Database {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            tables: HashMap::default(),
            buffer_pool: Mutex::new(InMemoryBufferPool::new()),
            lock_manager: LockManager::new(),
            config,
        }
    }

    /// Create a table and register a point index for every column. Rejects
    /// a duplicate name.
    pub fn create_table(&mut self, name: &str, num_columns: usize, key_index: usize) -> RowResult<()> {
        if self.tables.contains_key(name) {
            return Err(RowError::Duplicate(format!("table {name} already exists")));
        }
        if key_index >= num_columns {
            return Err(RowError::OutOfBounds(format!(
                "key_index {key_index} out of range for {num_columns} columns"
            )));
        }
        let mut table = Table::new(name, num_columns, key_index, self.config.clone());
        for column in 0..num_columns {
            table.index.create_index(column);
        }
        self.tables.insert(name.to_string(), table);
        debug!("create_table: registered {name} ({num_columns} columns, key={key_index})");
        Ok(())
    }

    /// Drop every column index, then remove the table.
    pub fn drop_table(&mut self, name: &str) -> RowResult<()> {
        let table = self
            .tables
            .get_mut(name)
            .ok_or_else(|| RowError::NotFound(format!("table {name} does not exist")))?;
        for column in 0..table.num_columns {
            table.index.drop_index(column);
        }
        self.tables.remove(name);
        info!("drop_table: removed {name}");
        Ok(())
    }

    pub fn get_table(&self, name: &str) -> RowResult<&Table> {
        self.tables.get(name).ok_or_else(|| RowError::NotFound(format!("table {name} does not exist")))
    }

    pub fn get_table_mut(&mut self, name: &str) -> RowResult<&mut Table> {
        self.tables.get_mut(name).ok_or_else(|| RowError::NotFound(format!("table {name} does not exist")))
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Build a non-transactional [`Query`] over `name`.
    pub fn query(&mut self, name: &str) -> RowResult<Query<'_, InMemoryBufferPool>> {
        let table = self.tables.get_mut(name).ok_or_else(|| RowError::NotFound(format!("table {name} does not exist")))?;
        Ok(Query::new(table, &self.buffer_pool))
    }

    /// Build a transactional [`Query`] over `name`, scoped to `tx_id` and
    /// backed by this database's shared [`LockManager`].
    pub fn query_with_transaction(&mut self, name: &str, tx_id: TransactionId) -> RowResult<Query<'_, InMemoryBufferPool>> {
        let table = self.tables.get_mut(name).ok_or_else(|| RowError::NotFound(format!("table {name} does not exist")))?;
        Ok(Query::with_transaction(table, &self.buffer_pool, &self.lock_manager, tx_id))
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.lock_manager
    }

    /// Load persisted table data from `path`. No disk-backed storage layer
    /// exists underneath this registry yet; kept as a no-op so the
    /// programmatic API surface has a stable signature for a future
    /// disk-backed implementation to fill in.
    pub fn open(&mut self, _path: &str) -> RowResult<()> {
        Ok(())
    }

    /// Persist nothing: see [`Database::open`].
    pub fn close(&mut self) -> RowResult<()> {
        Ok(())
    }
}
