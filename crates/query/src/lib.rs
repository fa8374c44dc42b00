//! The query engine: the only mutator of a [`Table`].
//!
//! `Query` wraps one table plus (optionally) a transaction id and a shared
//! [`LockManager`]. Every public method follows the same error-handling
//! contract: an `..._inner` helper returns a `RowResult<T>`, and the public
//! method maps `Err` to the operation's documented failure value
//! (`false`/`[]`/`0`) while logging the cause at `debug!` — nothing ever
//! propagates or panics past this boundary.

#[cfg(test)]
mod tests;

use std::collections::HashSet;
use std::sync::Mutex;

use buffer::{BufferPageId, BufferPool, PageData};
use common::{next_timestamp, Indirection, Record, Rid, RowError, RowResult};
use log::debug;
use lstore_lock::{LockManager, LockMode, TransactionId};
use lstore_table::{historical_in_range, MergeStats, Table};

/// One-shot 0/1 flags selecting which columns a caller wants back.
pub type Projection<'a> = &'a [u8];

/// The query engine over one table, optionally scoped to a transaction.
pub struct Query<'a, B: BufferPool> {
    table: &'a mut Table,
    buffer_pool: &'a Mutex<B>,
    tx: Option<(&'a LockManager, TransactionId)>,
}

impl<'a, B: BufferPool> Query<'a, B> {
    pub fn new(table: &'a mut Table, buffer_pool: &'a Mutex<B>) -> Self {
        Self { table, buffer_pool, tx: None }
    }

    pub fn with_transaction(table: &'a mut Table, buffer_pool: &'a Mutex<B>, lock_manager: &'a LockManager, tx_id: TransactionId) -> Self {
        Self { table, buffer_pool, tx: Some((lock_manager, tx_id)) }
    }

    fn try_lock(&self, key: i64, mode: LockMode) -> bool {
        match self.tx {
            Some((lock_manager, tx_id)) => lock_manager.acquire_lock(tx_id, &self.table.name, key, mode),
            None => true,
        }
    }

    fn pool(&self) -> std::sync::MutexGuard<'_, B> {
        self.buffer_pool.lock().expect("buffer pool mutex poisoned")
    }

    // ---- §4.H.1 insert ----------------------------------------------

    pub fn insert(&mut self, columns: &[i64]) -> bool {
        self.insert_inner(columns).unwrap_or(false)
    }

    fn insert_inner(&mut self, columns: &[i64]) -> RowResult<bool> {
        if columns.len() != self.table.num_columns {
            return Err(RowError::OutOfBounds("insert: wrong column count".into()));
        }
        let key = columns[self.table.key_column];
        if !self.table.index.locate(self.table.key_column, key).is_empty() {
            return Err(RowError::Duplicate(format!("key {key} already exists")));
        }
        if !self.try_lock(key, LockMode::Insert) {
            return Err(RowError::LockConflict(format!("insert: could not lock key {key}")));
        }
        let mut pool = self.pool();
        self.table.insert_record(columns, &mut *pool)?;
        Ok(true)
    }

    // ---- §4.H.2 delete ------------------------------------------------

    pub fn delete(&mut self, primary_key: i64) -> bool {
        self.delete_inner(primary_key).unwrap_or(false)
    }

    fn delete_inner(&mut self, primary_key: i64) -> RowResult<bool> {
        let rids = self.table.index.locate(self.table.key_column, primary_key);
        let Some(&rid) = rids.first() else {
            return Err(RowError::NotFound(format!("no record for key {primary_key}")));
        };
        if !self.try_lock(primary_key, LockMode::Delete) {
            return Err(RowError::LockConflict(format!("delete: could not lock key {primary_key}")));
        }
        let range = self
            .table
            .page_ranges
            .get_mut(rid.page_range)
            .ok_or_else(|| RowError::OutOfBounds(format!("no page range for {rid:?}")))?;
        let base_page = range
            .base_page_mut(rid.page)
            .ok_or_else(|| RowError::OutOfBounds(format!("no base page for {rid:?}")))?;
        base_page.set_indirection(rid.slot, Indirection::Deleted)?;

        self.table.page_directory.remove(&rid);
        self.table.index.delete(self.table.key_column, primary_key, rid);

        let page_id = BufferPageId::base(rid.page_range, rid.page);
        let mut pool = self.pool();
        if let Ok(mut data) = pool.get_page(page_id, &self.table.name, self.table.num_columns) {
            if let Some(entry) = data.indirection.get_mut(rid.slot) {
                *entry = Indirection::Deleted;
            }
            pool.set_page(page_id, &self.table.name, data).ok();
        }
        pool.unpin_page(page_id, &self.table.name).ok();
        Ok(true)
    }

    // ---- chain walking, shared by select/select_version/sum -----------

    /// Resolve the latest non-tombstoned version for `start`: a single hop
    /// from a base RID through its forward indirection pointer, mirroring
    /// `lstore_table::latest_in_range`. Only a base record's indirection
    /// field points forward to the newest tail; each tail's own
    /// indirection field points backward into the reverse log of
    /// superseded versions, so a tail reached directly (e.g. via the
    /// index after a key-changing update) is already its own latest
    /// version and must not be chased further. Faults the page in
    /// through the buffer pool, falling back to direct page access on a
    /// miss.
    fn resolve_latest(&self, start: Rid) -> Rid {
        if start.is_tail() {
            return start;
        }
        let page_id = BufferPageId::new(start.kind, start.page_range, start.page);
        let indirection = {
            let mut pool = self.pool();
            match pool.get_page(page_id, &self.table.name, self.table.num_columns) {
                Ok(data) => {
                    let ind = data.indirection.get(start.slot).copied();
                    pool.unpin_page(page_id, &self.table.name).ok();
                    ind
                }
                Err(_) => None,
            }
        };
        let indirection = indirection.or_else(|| {
            self.table
                .page_ranges
                .get(start.page_range)
                .and_then(|range| range.base_page(start.page))
                .and_then(|page| page.indirection_at(start.slot).ok())
        });
        match indirection {
            None | Some(Indirection::None) | Some(Indirection::Deleted) => start,
            Some(Indirection::Forward(next)) => next,
        }
    }

    /// Scan the page directory for the most recently written tail RID
    /// whose materialized key matches `search_key` — the *last* hit in
    /// insertion order, since the page directory is append-ordered and a
    /// key-changing update's successor tail always sorts after the one it
    /// superseded. Compensates for key-changing updates, which can detach
    /// the old chain from the new key's current image.
    fn page_directory_override(&self, search_key: i64) -> Option<Rid> {
        self.table
            .page_directory
            .iter()
            .filter(|(rid, record)| rid.is_tail() && record.key == search_key)
            .last()
            .map(|(rid, _)| *rid)
    }

    fn read_column(&self, rid: Rid, column: usize) -> i64 {
        let page_id = BufferPageId::new(rid.kind, rid.page_range, rid.page);
        let mut pool = self.pool();
        if let Ok(data) = pool.get_page(page_id, &self.table.name, self.table.num_columns) {
            let value = data.columns.get(column).and_then(|c| c.get(rid.slot)).copied();
            pool.unpin_page(page_id, &self.table.name).ok();
            if let Some(value) = value {
                return value;
            }
        }
        self.table
            .page_ranges
            .get(rid.page_range)
            .and_then(|range| if rid.is_base() { range.base_page(rid.page) } else { range.tail_page(rid.page) })
            .and_then(|page| page.read_column(column, rid.slot).ok())
            .unwrap_or(0)
    }

    fn materialize(&self, rid: Rid, key: i64, projection: Projection) -> Record {
        if let Some(record) = self.table.page_directory.get(&rid) {
            let columns = projection
                .iter()
                .enumerate()
                .filter(|&(_, &flag)| flag == 1)
                .map(|(i, _)| record.columns.get(i).copied().unwrap_or(0))
                .collect();
            return Record::new(rid, key, columns);
        }
        let columns = projection
            .iter()
            .enumerate()
            .filter(|&(_, &flag)| flag == 1)
            .map(|(i, _)| self.read_column(rid, i))
            .collect();
        Record::new(rid, key, columns)
    }

    // ---- §4.H.3 select --------------------------------------------------

    pub fn select(&mut self, search_key: i64, search_key_index: usize, projection: Projection) -> Vec<Record> {
        self.select_inner(search_key, search_key_index, projection).unwrap_or_default()
    }

    fn select_inner(&mut self, search_key: i64, search_key_index: usize, projection: Projection) -> RowResult<Vec<Record>> {
        let rids = self.table.index.locate(search_key_index, search_key);
        if rids.is_empty() {
            return Ok(Vec::new());
        }
        if !self.try_lock(search_key, LockMode::Read) {
            return Ok(Vec::new());
        }

        let mut out = Vec::with_capacity(rids.len());
        for rid in rids {
            let mut latest = self.resolve_latest(rid);
            if let Some(override_rid) = self.page_directory_override(search_key) {
                latest = override_rid;
            }
            out.push(self.materialize(latest, search_key, projection));
        }
        Ok(out)
    }

    // ---- §4.H.4 select_version -------------------------------------------

    pub fn select_version(&mut self, search_key: i64, search_key_index: usize, projection: Projection, v: i64) -> Vec<Record> {
        self.select_version_inner(search_key, search_key_index, projection, v).unwrap_or_default()
    }

    fn select_version_inner(
        &mut self,
        search_key: i64,
        search_key_index: usize,
        projection: Projection,
        v: i64,
    ) -> RowResult<Vec<Record>> {
        if v > 0 {
            // Positive relative_version is unsupported — only the latest (0),
            // the base (-1), or a step-back count is meaningful here.
            return Ok(Vec::new());
        }
        let rids = self.table.index.locate(search_key_index, search_key);
        if rids.is_empty() {
            return Ok(Vec::new());
        }
        if !self.try_lock(search_key, LockMode::Read) {
            return Ok(Vec::new());
        }
        let base_rid = rids.iter().find(|rid| rid.is_base()).copied().unwrap_or(rids[0]);

        if v == -1 {
            return Ok(vec![self.materialize(base_rid, search_key, projection)]);
        }
        if v == 0 {
            let mut latest = self.resolve_latest(base_rid);
            if let Some(override_rid) = self.page_directory_override(search_key) {
                latest = override_rid;
            }
            return Ok(vec![self.materialize(latest, search_key, projection)]);
        }

        let latest = self.resolve_latest(base_rid);
        // `-1` is the special-cased base jump above; `-k` for k >= 2 means
        // "k-1 hops back from latest" (the base itself already absorbs the
        // k=1 slot).
        let steps_back = v.unsigned_abs() as usize - 1;
        let target = if latest == base_rid {
            base_rid
        } else {
            let range = self
                .table
                .page_ranges
                .get(base_rid.page_range)
                .ok_or_else(|| RowError::OutOfBounds(format!("no page range for {base_rid:?}")))?;
            historical_in_range(range, base_rid, latest, steps_back)?
        };
        Ok(vec![self.materialize(target, search_key, projection)])
    }

    // ---- §4.H.5 update ----------------------------------------------------

    pub fn update(&mut self, primary_key: i64, columns: &[Option<i64>]) -> bool {
        self.update_inner(primary_key, columns).unwrap_or(false)
    }

    fn update_inner(&mut self, primary_key: i64, columns: &[Option<i64>]) -> RowResult<bool> {
        if columns.len() != self.table.num_columns {
            return Err(RowError::OutOfBounds("update: wrong column count".into()));
        }
        let rids = self.table.index.locate(self.table.key_column, primary_key);
        let Some(&base_rid) = rids.first() else {
            return Err(RowError::NotFound(format!("no record for key {primary_key}")));
        };
        if !self.try_lock(primary_key, LockMode::Update) {
            return Err(RowError::LockConflict(format!("update: could not lock key {primary_key}")));
        }

        let latest_rid = self.resolve_latest(base_rid);
        let current_record = self
            .table
            .page_directory
            .get(&latest_rid)
            .or_else(|| self.table.page_directory.get(&base_rid))
            .cloned()
            .ok_or_else(|| RowError::NotFound(format!("no image for {latest_rid:?}")))?;

        let pr_idx = base_rid.page_range;
        let range = self
            .table
            .page_ranges
            .get_mut(pr_idx)
            .ok_or_else(|| RowError::OutOfBounds(format!("no page range for {base_rid:?}")))?;
        if !range.has_tail_capacity() {
            range.add_tail_page();
        }
        let tail_page_idx = range.tail_pages().len() - 1;

        let mut supplied = vec![false; self.table.num_columns];
        let mut row = vec![0i64; self.table.num_columns];
        for i in 0..self.table.num_columns {
            row[i] = if i == self.table.key_column {
                current_record.key
            } else if let Some(value) = columns[i] {
                supplied[i] = true;
                value
            } else {
                current_record.columns.get(i).copied().unwrap_or(0)
            };
        }
        if let Some(value) = columns[self.table.key_column] {
            supplied[self.table.key_column] = true;
            row[self.table.key_column] = value;
        }
        let schema_encoding = storage::schema_encoding_of(&supplied);
        let timestamp = next_timestamp();

        let tail_page = range.tail_page_mut(tail_page_idx).expect("just ensured");
        let slot = tail_page.num_records();
        let tail_rid = Rid::tail(pr_idx, tail_page_idx, slot);
        tail_page.append(&row, tail_rid, timestamp.clone(), schema_encoding.clone(), Indirection::Forward(latest_rid))?;

        // Tail must be fully written before the base's forward pointer
        // swaps to it.
        let base_page = range
            .base_page_mut(base_rid.page)
            .ok_or_else(|| RowError::OutOfBounds(format!("no base page for {base_rid:?}")))?;
        base_page.set_indirection(base_rid.slot, Indirection::Forward(tail_rid))?;

        self.sync_page_to_pool(pr_idx, base_rid.page, true);
        self.sync_page_to_pool(pr_idx, tail_page_idx, false);

        let new_key = row[self.table.key_column];
        self.table.page_directory.insert(Record::new(tail_rid, new_key, row));

        if new_key != primary_key {
            self.table.page_directory.remove(&latest_rid);
            self.table.index.delete(self.table.key_column, primary_key, latest_rid);
            self.table.index.insert(self.table.key_column, new_key, tail_rid);
        }

        self.table.merge_counter += 1;
        if self.table.merge_counter >= self.table.config.merge_threshold {
            self.table.merge_counter = 0;
            let mut pool = self.pool();
            let stats: MergeStats = self.table.trigger_merge(&mut *pool);
            debug!("update: merge triggered, {stats:?}");
        }
        Ok(true)
    }

    fn sync_page_to_pool(&self, pr_idx: usize, page_idx: usize, is_base: bool) {
        let Some(range) = self.table.page_ranges.get(pr_idx) else { return };
        let Some(page) = (if is_base { range.base_page(page_idx) } else { range.tail_page(page_idx) }) else { return };
        let data = page_to_data(page);
        let page_id = if is_base { BufferPageId::base(pr_idx, page_idx) } else { BufferPageId::tail(pr_idx, page_idx) };
        let mut pool = self.pool();
        pool.set_page(page_id, &self.table.name, data).ok();
    }

    // ---- §4.H.6 sum -------------------------------------------------------

    pub fn sum(&mut self, lo: i64, hi: i64, agg_col: usize) -> Option<i64> {
        self.sum_inner(lo, hi, agg_col).ok()
    }

    fn sum_inner(&mut self, lo: i64, hi: i64, agg_col: usize) -> RowResult<i64> {
        let rids = self.table.index.locate_range(self.table.key_column, lo, hi);
        if rids.is_empty() {
            return Err(RowError::NotFound("sum: no records in range".into()));
        }
        let mut total = 0i64;
        let mut seen = HashSet::new();
        for rid in rids {
            let latest = self.resolve_latest(rid);
            let key_value = self.read_column(latest, self.table.key_column);
            if key_value < lo || key_value > hi || !seen.insert(key_value) {
                continue;
            }
            total += self.read_column(latest, agg_col);
        }
        Ok(total)
    }

    // ---- §4.H.7 sum_version -------------------------------------------------

    pub fn sum_version(&mut self, lo: i64, hi: i64, agg_col: usize, v: i64) -> i64 {
        self.sum_version_inner(lo, hi, agg_col, v).unwrap_or(0)
    }

    fn sum_version_inner(&mut self, lo: i64, hi: i64, agg_col: usize, v: i64) -> RowResult<i64> {
        if v > 0 {
            return Ok(0);
        }
        let rids = self.table.index.locate_range(self.table.key_column, lo, hi);
        if rids.is_empty() {
            return Ok(0);
        }
        let mut total = 0i64;
        let mut seen = HashSet::new();
        for base_rid in rids {
            // Dedup and range-filter on the *base* key, since version
            // resolution happens after.
            let base_key = self.read_column(base_rid, self.table.key_column);
            if base_key < lo || base_key > hi || !seen.insert(base_key) {
                continue;
            }
            let target = if v == -1 {
                base_rid
            } else {
                let latest = self.resolve_latest(base_rid);
                if latest == base_rid {
                    base_rid
                } else if v == 0 {
                    let mut resolved = latest;
                    if let Some(override_rid) = self.page_directory_override(base_key) {
                        resolved = override_rid;
                    }
                    resolved
                } else {
                    let range = self
                        .table
                        .page_ranges
                        .get(base_rid.page_range)
                        .ok_or_else(|| RowError::OutOfBounds(format!("no page range for {base_rid:?}")))?;
                    historical_in_range(range, base_rid, latest, v.unsigned_abs() as usize - 1)?
                }
            };
            total += self.read_column(target, agg_col);
        }
        Ok(total)
    }

    // ---- §4.H.8 increment ---------------------------------------------------

    pub fn increment(&mut self, key: i64, column: usize) -> bool {
        let projection = vec![1u8; self.table.num_columns];
        let rows = self.select(key, self.table.key_column, &projection);
        let Some(row) = rows.into_iter().next() else {
            return false;
        };
        let Some(&current) = row.columns.get(column) else {
            return false;
        };
        let mut updates = vec![None; self.table.num_columns];
        updates[column] = Some(current + 1);
        self.update(key, &updates)
    }
}

fn page_to_data(page: &storage::ColumnPage) -> PageData {
    let mut columns = vec![Vec::with_capacity(page.num_records()); page.num_columns()];
    for slot in 0..page.num_records() {
        for (c, col) in columns.iter_mut().enumerate() {
            col.push(page.read_column(c, slot).unwrap_or(0));
        }
    }
    PageData {
        columns,
        rid: page.rids().to_vec(),
        timestamp: (0..page.num_records()).map(|slot| page.timestamp_at(slot).unwrap_or_default().to_string()).collect(),
        schema_encoding: (0..page.num_records()).map(|slot| page.schema_encoding_at(slot).unwrap_or_default().to_string()).collect(),
        indirection: page.indirections().to_vec(),
    }
}
