//! Page ranges, the table's page directory, and periodic merge.
//!
//! A [`Table`] owns its [`PageRange`]s, a [`PageDirectory`] (the "most
//! recently written image per RID" lookaside cache), and a [`TableIndex`].
//! Everything here operates on in-memory page structures directly; the
//! `Query` engine layers buffer-pool access on top for the paths that
//! should go through the pool (chain walks, column materialization).


use ahash::RandomState;
use buffer::{BufferPageId, BufferPool, PageData};
use common::{next_timestamp, Config, Indirection, Record, Rid, RowError, RowResult, MAX_CHAIN_ITERATIONS};
use hashbrown::HashMap;
use log::info;
use lstore_index::TableIndex;
use storage::{schema_encoding_of, ColumnPage};

/// Insertion-ordered `Rid -> Record` map.
///
/// Grounded on `catalog::Catalog`'s `Vec` + lookaside-`HashMap` pattern: a
/// `Vec` keeps deterministic, reproducible iteration order (needed for the
/// page-directory scan in `Query::select`'s "first-found" override), while
/// the `HashMap` gives O(1) point lookups.
#[derive(Default)]
pub struct PageDirectory {
    entries: Vec<(Rid, Record)>,
    index: HashMap<Rid, usize, RandomState>,
}

impl PageDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the image at `record.rid`.
    pub fn insert(&mut self, record: Record) {
        if let Some(&i) = self.index.get(&record.rid) {
            self.entries[i].1 = record;
        } else {
            self.index.insert(record.rid, self.entries.len());
            self.entries.push((record.rid, record));
        }
    }

    pub fn get(&self, rid: &Rid) -> Option<&Record> {
        self.index.get(rid).map(|&i| &self.entries[i].1)
    }

    pub fn contains(&self, rid: &Rid) -> bool {
        self.index.contains_key(rid)
    }

    /// Remove the entry for `rid`, if present, preserving the remaining
    /// entries' relative order.
    pub fn remove(&mut self, rid: &Rid) -> Option<Record> {
        let i = self.index.remove(rid)?;
        let (_, record) = self.entries.remove(i);
        for idx in self.index.values_mut() {
            if *idx > i {
                *idx -= 1;
            }
        }
        Some(record)
    }

    /// Iterate entries in insertion order — the order `select`'s
    /// page-directory override scan relies on for deterministic
    /// first-found behavior.
    pub fn iter(&self) -> impl Iterator<Item = (&Rid, &Record)> {
        self.entries.iter().map(|(rid, record)| (rid, record))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Bounded base pages plus unbounded tail pages (spec §4.C).
pub struct PageRange {
    base_pages: Vec<ColumnPage>,
    tail_pages: Vec<ColumnPage>,
    num_columns: usize,
    page_capacity: usize,
    range_base_pages: usize,
}

impl PageRange {
    pub fn new(num_columns: usize, page_capacity: usize, range_base_pages: usize) -> Self {
        let mut range = Self {
            base_pages: Vec::new(),
            tail_pages: Vec::new(),
            num_columns,
            page_capacity,
            range_base_pages,
        };
        range.base_pages.push(ColumnPage::new(num_columns, page_capacity));
        range
    }

    /// True while the range can still accept a base-page insert: either
    /// the last base page has room, or a fresh base page can still be
    /// appended without exceeding `range_base_pages`. Once the last base
    /// page is full *and* the range is already at its page cap, the table
    /// must roll over to a new `PageRange` (spec §4.G step 1).
    pub fn has_base_capacity(&self) -> bool {
        self.base_pages.last().is_some_and(ColumnPage::has_capacity)
            || self.base_pages.len() < self.range_base_pages
    }

    /// Ensure the last base page has room, appending a fresh one if not
    /// (caller must have already checked `has_base_capacity`). Returns the
    /// index of the base page to write into.
    pub fn ensure_base_page(&mut self) -> usize {
        if !self.base_pages.last().is_some_and(ColumnPage::has_capacity) {
            self.base_pages.push(ColumnPage::new(self.num_columns, self.page_capacity));
        }
        self.base_pages.len() - 1
    }

    pub fn has_tail_capacity(&self) -> bool {
        self.tail_pages.last().is_some_and(ColumnPage::has_capacity)
    }

    pub fn add_tail_page(&mut self) -> usize {
        self.tail_pages.push(ColumnPage::new(self.num_columns, self.page_capacity));
        self.tail_pages.len() - 1
    }

    pub fn base_pages(&self) -> &[ColumnPage] {
        &self.base_pages
    }

    pub fn tail_pages(&self) -> &[ColumnPage] {
        &self.tail_pages
    }

    pub fn base_page(&self, idx: usize) -> Option<&ColumnPage> {
        self.base_pages.get(idx)
    }

    pub fn base_page_mut(&mut self, idx: usize) -> Option<&mut ColumnPage> {
        self.base_pages.get_mut(idx)
    }

    pub fn tail_page(&self, idx: usize) -> Option<&ColumnPage> {
        self.tail_pages.get(idx)
    }

    pub fn tail_page_mut(&mut self, idx: usize) -> Option<&mut ColumnPage> {
        self.tail_pages.get_mut(idx)
    }

    fn page(&self, rid: Rid) -> Option<&ColumnPage> {
        if rid.is_base() {
            self.base_page(rid.page)
        } else {
            self.tail_page(rid.page)
        }
    }
}

/// Walk the indirection chain from `start` to its terminal node
/// (`Indirection::None` or `Indirection::Deleted`), defending against
/// cycles with a visited set and `MAX_CHAIN_ITERATIONS` hard cap (spec §3:
/// "readers defend against cycles by tracking visited RIDs and a bounded
/// iteration cap"). Operates purely on in-memory pages — this is the
/// direct-access fallback the buffer-pool-backed walk in `query` falls
/// back to on a cache miss.
pub fn latest_in_range(range: &PageRange, start: Rid) -> RowResult<Rid> {
    // Only a base record's indirection field is a forward pointer: every
    // update overwrites it to point at the newest tail. A tail's own
    // indirection field points backward, to the version it superseded, so a
    // tail reached directly (e.g. via the index after a key-changing update)
    // is already its own latest version and must not be chased further.
    if start.is_tail() {
        return Ok(start);
    }
    let page = range
        .page(start)
        .ok_or_else(|| RowError::OutOfBounds(format!("no page for {start:?}")))?;
    match page.indirection_at(start.slot)? {
        Indirection::None | Indirection::Deleted => Ok(start),
        Indirection::Forward(tail_rid) => Ok(tail_rid),
    }
}

/// Walk backward from `latest` toward `base`, `steps_back` hops, clamping to
/// `base` if the chain is shorter (spec §3 version semantics). A tail's
/// indirection field points backward to the version it superseded, so this
/// walks back through time by following that field from `latest` down to
/// `base` — the reverse direction of `latest_in_range`'s one-hop lookup.
pub fn historical_in_range(
    range: &PageRange,
    base: Rid,
    latest: Rid,
    steps_back: usize,
) -> RowResult<Rid> {
    if steps_back == 0 {
        return Ok(latest);
    }
    let mut chain = vec![latest];
    let mut current = latest;
    let mut visited = std::collections::HashSet::new();
    visited.insert(current);
    for _ in 0..MAX_CHAIN_ITERATIONS {
        if current == base || chain.len() > steps_back {
            break;
        }
        let page = range
            .page(current)
            .ok_or_else(|| RowError::OutOfBounds(format!("no page for {current:?}")))?;
        match page.indirection_at(current.slot)? {
            Indirection::Forward(prev) if !visited.contains(&prev) => {
                chain.push(prev);
                visited.insert(prev);
                current = prev;
            }
            _ => break,
        }
    }
    if chain.len() <= steps_back {
        Ok(base)
    } else {
        Ok(chain[steps_back])
    }
}

/// Outcome of a single `trigger_merge` call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeStats {
    pub page_ranges_merged: usize,
    pub records_rewritten: usize,
}

/// Owns page ranges, the page directory, the per-column index, and the
/// merge counter for one table (spec §4.G).
pub struct Table {
    pub name: String,
    pub num_columns: usize,
    pub key_column: usize,
    pub page_ranges: Vec<PageRange>,
    pub page_directory: PageDirectory,
    pub index: TableIndex,
    pub merge_counter: u64,
    pub config: Config,
}

impl Table {
    pub fn new(name: impl Into<String>, num_columns: usize, key_column: usize, config: Config) -> Self {
        Self {
            name: name.into(),
            num_columns,
            key_column,
            page_ranges: Vec::new(),
            page_directory: PageDirectory::new(),
            index: TableIndex::new(key_column),
            merge_counter: 0,
            config,
        }
    }

    /// Insert a fresh base record, syncing both the in-memory page and the
    /// buffer pool's view of it (spec §4.G `insert_record`).
    pub fn insert_record(&mut self, columns: &[i64], buffer_pool: &mut dyn BufferPool) -> RowResult<Rid> {
        if columns.len() != self.num_columns {
            return Err(RowError::OutOfBounds(format!(
                "expected {} columns, got {}",
                self.num_columns,
                columns.len()
            )));
        }

        if self.page_ranges.is_empty() || !self.page_ranges.last().unwrap().has_base_capacity() {
            self.page_ranges
                .push(PageRange::new(self.num_columns, self.config.page_capacity, self.config.range_base_pages));
        }
        let pr_idx = self.page_ranges.len() - 1;
        let range = &mut self.page_ranges[pr_idx];
        let bp_idx = range.ensure_base_page();

        let timestamp = next_timestamp();
        let schema_encoding = schema_encoding_of(&vec![true; self.num_columns]);
        let page = range.base_page_mut(bp_idx).expect("just ensured");
        let slot = page.num_records();
        let rid = Rid::base(pr_idx, bp_idx, slot);
        page.append(columns, rid, timestamp.clone(), schema_encoding.clone(), Indirection::None)?;

        let page_id = BufferPageId::base(pr_idx, bp_idx);
        let mut data = buffer_pool.get_page(page_id, &self.name, self.num_columns)?;
        for (c, value) in columns.iter().enumerate() {
            data.columns[c].push(*value);
        }
        data.rid.push(rid);
        data.timestamp.push(timestamp);
        data.schema_encoding.push(schema_encoding);
        data.indirection.push(Indirection::None);
        buffer_pool.set_page(page_id, &self.name, data)?;
        buffer_pool.unpin_page(page_id, &self.name)?;

        let key = columns[self.key_column];
        self.page_directory.insert(Record::new(rid, key, columns.to_vec()));
        for (c, value) in columns.iter().enumerate() {
            self.index.insert(c, *value, rid);
        }
        Ok(rid)
    }

    /// Consolidate every page range with accumulated tail updates into
    /// fresh base pages holding each slot's latest image, then rewire
    /// RIDs through the page directory and key-column index.
    ///
    /// The copy-and-swap here only replaces `self`'s fields once the new
    /// state is fully built; callers running this under a table-wide
    /// write lock get the "pre- or post-merge view, never a hybrid"
    /// guarantee the spec requires (§4.G, §5).
    pub fn trigger_merge(&mut self, buffer_pool: &mut dyn BufferPool) -> MergeStats {
        let mut stats = MergeStats::default();
        for pr_idx in 0..self.page_ranges.len() {
            if self.page_ranges[pr_idx].tail_pages.is_empty() {
                continue;
            }
            self.merge_page_range(pr_idx, buffer_pool, &mut stats);
        }
        if stats.page_ranges_merged > 0 {
            info!(
                "merge[{}]: consolidated {} page range(s), rewrote {} record(s)",
                self.name, stats.page_ranges_merged, stats.records_rewritten
            );
        }
        stats
    }

    fn merge_page_range(&mut self, pr_idx: usize, buffer_pool: &mut dyn BufferPool, stats: &mut MergeStats) {
        let old_range = &self.page_ranges[pr_idx];
        let num_base_pages = old_range.base_pages.len();
        let mut new_pages: Vec<ColumnPage> =
            (0..num_base_pages).map(|_| ColumnPage::new(self.num_columns, self.config.page_capacity)).collect();
        let mut redirects: Vec<(Rid, Rid, i64)> = Vec::new();
        let mut tombstones: Vec<Rid> = Vec::new();
        let mut merged_records: Vec<Record> = Vec::new();

        // Pages are append-only, so each page's rows must be written back
        // in ascending slot order — real and tombstoned slots alike — or
        // a slot's physical position would drift from its Rid.
        for bp_idx in 0..num_base_pages {
            let base_page = old_range.base_page(bp_idx).expect("bounded by num_base_pages");
            for slot in 0..base_page.num_records() {
                let base_rid = Rid::base(pr_idx, bp_idx, slot);
                let indirection = base_page.indirection_at(slot).unwrap_or(Indirection::None);
                if indirection == Indirection::Deleted {
                    let schema = schema_encoding_of(&vec![false; self.num_columns]);
                    let _ = new_pages[bp_idx].append(
                        &vec![0; self.num_columns],
                        base_rid,
                        next_timestamp(),
                        schema,
                        Indirection::Deleted,
                    );
                    tombstones.push(base_rid);
                    continue;
                }
                let latest_rid = latest_in_range(old_range, base_rid).unwrap_or(base_rid);
                let row = match self.page_directory.get(&latest_rid) {
                    Some(record) => record.clone(),
                    None => {
                        let columns = old_range
                            .page(latest_rid)
                            .and_then(|p| p.read_row(latest_rid.slot).ok())
                            .unwrap_or_else(|| vec![0; self.num_columns]);
                        let key = columns.get(self.key_column).copied().unwrap_or(0);
                        Record::new(latest_rid, key, columns)
                    }
                };
                if latest_rid != base_rid {
                    redirects.push((latest_rid, base_rid, row.key));
                }
                let schema = schema_encoding_of(&vec![true; self.num_columns]);
                let _ = new_pages[bp_idx].append(&row.columns, base_rid, next_timestamp(), schema, Indirection::None);
                merged_records.push(Record::new(base_rid, row.key, row.columns));
            }
        }

        let old_tail_count = old_range.tail_pages.len();
        let range = &mut self.page_ranges[pr_idx];
        range.base_pages = new_pages;
        range.tail_pages = Vec::new();

        for record in merged_records {
            stats.records_rewritten += 1;
            buffer_pool
                .set_page(
                    BufferPageId::base(pr_idx, record.rid.page),
                    &self.name,
                    page_data_from(range.base_page(record.rid.page).expect("just built")),
                )
                .ok();
            self.page_directory.insert(record);
        }
        for rid in &tombstones {
            self.page_directory.remove(rid);
        }
        for tail_idx in 0..old_tail_count {
            buffer_pool.try_evict(BufferPageId::tail(pr_idx, tail_idx), &self.name);
        }
        // Drop page-directory entries for tail RIDs now physically gone.
        let stale: Vec<Rid> = self
            .page_directory
            .iter()
            .map(|(rid, _)| *rid)
            .filter(|rid| rid.is_tail() && rid.page_range == pr_idx)
            .collect();
        for rid in stale {
            self.page_directory.remove(&rid);
        }
        for (old_rid, new_rid, key) in redirects {
            self.index.delete(self.key_column, key, old_rid);
            self.index.insert(self.key_column, key, new_rid);
        }
        stats.page_ranges_merged += 1;
    }
}

fn page_data_from(page: &ColumnPage) -> PageData {
    let mut columns = vec![Vec::with_capacity(page.num_records()); page.num_columns()];
    for slot in 0..page.num_records() {
        for (c, col) in columns.iter_mut().enumerate() {
            col.push(page.read_column(c, slot).unwrap_or(0));
        }
    }
    PageData {
        columns,
        rid: page.rids().to_vec(),
        timestamp: (0..page.num_records())
            .map(|slot| page.timestamp_at(slot).unwrap_or_default().to_string())
            .collect(),
        schema_encoding: (0..page.num_records())
            .map(|slot| page.schema_encoding_at(slot).unwrap_or_default().to_string())
            .collect(),
        indirection: page.indirections().to_vec(),
    }
}
