//! Per-column value → RID index, plus an ordered range index over the key
//! column.
//!
//! Grounded on `catalog`'s `Map<K, V>` alias (`ahash::RandomState`-keyed
//! `hashbrown::HashMap`) for the point-lookup maps, and on `hash::HashIndex`'s
//! value → `Vec<Rid>` multimap shape for `locate`. The key column additionally
//! needs ordered range scans, which a hash map can't give, so that one map is
//! a `BTreeMap` instead (no on-disk B-tree page format is needed since the
//! index lives in memory only).


use ahash::RandomState;
use common::Rid;
use hashbrown::{HashMap, HashSet};
use std::collections::BTreeMap;

type Map<K, V> = HashMap<K, V, RandomState>;

/// A single column's point-lookup index: `value -> {rid, ...}`.
#[derive(Debug, Default)]
struct PointIndex {
    entries: Map<i64, HashSet<Rid>>,
}

impl PointIndex {
    fn insert(&mut self, value: i64, rid: Rid) {
        self.entries.entry(value).or_default().insert(rid);
    }

    fn delete(&mut self, value: i64, rid: Rid) {
        if let Some(rids) = self.entries.get_mut(&value) {
            rids.remove(&rid);
            if rids.is_empty() {
                self.entries.remove(&value);
            }
        }
    }

    fn locate(&self, value: i64) -> Vec<Rid> {
        self.entries
            .get(&value)
            .map(|rids| rids.iter().copied().collect())
            .unwrap_or_default()
    }
}

/// An ordered index over the key column: `value -> {rid, ...}`, supporting
/// inclusive range scans in addition to point lookup.
#[derive(Debug, Default)]
struct RangeIndex {
    entries: BTreeMap<i64, HashSet<Rid>>,
}

impl RangeIndex {
    fn insert(&mut self, value: i64, rid: Rid) {
        self.entries.entry(value).or_default().insert(rid);
    }

    fn delete(&mut self, value: i64, rid: Rid) {
        if let Some(rids) = self.entries.get_mut(&value) {
            rids.remove(&rid);
            if rids.is_empty() {
                self.entries.remove(&value);
            }
        }
    }

    fn locate(&self, value: i64) -> Vec<Rid> {
        self.entries
            .get(&value)
            .map(|rids| rids.iter().copied().collect())
            .unwrap_or_default()
    }

    fn locate_range(&self, lo: i64, hi: i64) -> Vec<Rid> {
        self.entries
            .range(lo..=hi)
            .flat_map(|(_, rids)| rids.iter().copied())
            .collect()
    }
}

enum AnyIndex {
    Point(PointIndex),
    Range(RangeIndex),
}

/// Per-table collection of column indexes. Column `key_column` gets a
/// range-capable index; every other indexed column gets a point-only index.
///
/// Policy: the index stores the base RID at insert time and is only
/// mutated again when a primary-key-changing update or a delete happens.
/// Non-key updates never touch the index — readers chase indirection for
/// current column values instead.
#[derive(Default)]
pub struct TableIndex {
    key_column: Option<usize>,
    columns: HashMap<usize, AnyIndex, RandomState>,
}

impl TableIndex {
    pub fn new(key_column: usize) -> Self {
        let mut columns = HashMap::default();
        columns.insert(key_column, AnyIndex::Range(RangeIndex::default()));
        Self {
            key_column: Some(key_column),
            columns,
        }
    }

    pub fn create_index(&mut self, column: usize) {
        if Some(column) == self.key_column {
            return;
        }
        self.columns
            .entry(column)
            .or_insert_with(|| AnyIndex::Point(PointIndex::default()));
    }

    pub fn drop_index(&mut self, column: usize) {
        if Some(column) == self.key_column {
            return;
        }
        self.columns.remove(&column);
    }

    pub fn insert(&mut self, column: usize, value: i64, rid: Rid) {
        match self.columns.get_mut(&column) {
            Some(AnyIndex::Point(idx)) => idx.insert(value, rid),
            Some(AnyIndex::Range(idx)) => idx.insert(value, rid),
            None => {}
        }
    }

    pub fn delete(&mut self, column: usize, value: i64, rid: Rid) {
        match self.columns.get_mut(&column) {
            Some(AnyIndex::Point(idx)) => idx.delete(value, rid),
            Some(AnyIndex::Range(idx)) => idx.delete(value, rid),
            None => {}
        }
    }

    /// All RIDs whose column `column` currently maps to `value`; empty if
    /// the column isn't indexed or there's no match.
    pub fn locate(&self, column: usize, value: i64) -> Vec<Rid> {
        match self.columns.get(&column) {
            Some(AnyIndex::Point(idx)) => idx.locate(value),
            Some(AnyIndex::Range(idx)) => idx.locate(value),
            None => Vec::new(),
        }
    }

    /// RIDs whose key-column value lies inclusively in `[lo, hi]`. Only
    /// the key column supports this; any other column returns empty.
    pub fn locate_range(&self, column: usize, lo: i64, hi: i64) -> Vec<Rid> {
        if Some(column) != self.key_column {
            return Vec::new();
        }
        match self.columns.get(&column) {
            Some(AnyIndex::Range(idx)) => idx.locate_range(lo, hi),
            _ => Vec::new(),
        }
    }

    pub fn key_column(&self) -> Option<usize> {
        self.key_column
    }
}
