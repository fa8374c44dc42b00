//! Shared types for the L-Store style columnar storage engine: record
//! identifiers, the indirection sum type, the materialized `Record` the
//! page directory stores, the engine-wide error type, and runtime config.

pub mod pretty;


use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Index of a page range within a table's `page_ranges` list.
pub type PageRangeIndex = usize;
/// Index of a base or tail page within its page range.
pub type PageIndex = usize;
/// Index of a slot (record) within a base or tail page.
pub type SlotIndex = usize;
/// Ordinal index of a column within a table schema.
pub type ColumnIndex = usize;

/// Which half of a page range a [`Rid`] addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageKind {
    Base,
    Tail,
}

/// Record Identifier: `(page_range_index, page_index, slot_index, kind)`.
///
/// Stable for the lifetime of the slot; a merge reissues slots into fresh
/// base pages but the table's page directory keeps RIDs addressable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rid {
    pub page_range: PageRangeIndex,
    pub page: PageIndex,
    pub slot: SlotIndex,
    pub kind: PageKind,
}

impl Rid {
    pub fn new(page_range: PageRangeIndex, page: PageIndex, slot: SlotIndex, kind: PageKind) -> Self {
        Self {
            page_range,
            page,
            slot,
            kind,
        }
    }

    pub fn base(page_range: PageRangeIndex, page: PageIndex, slot: SlotIndex) -> Self {
        Self::new(page_range, page, slot, PageKind::Base)
    }

    pub fn tail(page_range: PageRangeIndex, page: PageIndex, slot: SlotIndex) -> Self {
        Self::new(page_range, page, slot, PageKind::Tail)
    }

    pub fn is_base(&self) -> bool {
        matches!(self.kind, PageKind::Base)
    }

    pub fn is_tail(&self) -> bool {
        matches!(self.kind, PageKind::Tail)
    }
}

/// Per-slot forward pointer: no newer version, a tombstone, or the RID of
/// the next version in the chain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Indirection {
    #[default]
    None,
    Deleted,
    Forward(Rid),
}

impl Indirection {
    /// True for the two terminal states a chain walk can stop on.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Indirection::None | Indirection::Deleted)
    }

    pub fn forward(&self) -> Option<Rid> {
        match self {
            Indirection::Forward(rid) => Some(*rid),
            _ => None,
        }
    }
}

/// The materialized image written at a single slot.
///
/// This is a lookaside cache of "most recently written image at this RID",
/// owned by the table's page directory. It is NOT a version resolver: the
/// `Query` engine is responsible for walking indirection to decide which
/// RID's `Record` is the one a caller actually wants.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub rid: Rid,
    pub key: i64,
    pub columns: Vec<i64>,
}

impl Record {
    pub fn new(rid: Rid, key: i64, columns: Vec<i64>) -> Self {
        Self { rid, key, columns }
    }
}

/// Canonical error type shared across the engine's subsystems.
///
/// All errors are recovered locally at the `Query`/`Table`/`Database`
/// boundary (see spec §7); nothing here is meant to propagate to a caller.
#[derive(Error, Debug)]
pub enum RowError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("duplicate key: {0}")]
    Duplicate(String),
    #[error("lock conflict: {0}")]
    LockConflict(String),
    #[error("out of bounds: {0}")]
    OutOfBounds(String),
    #[error("capacity exhausted: {0}")]
    CapacityExhausted(String),
    #[error("indirection chain cycle: {0}")]
    ChainCycle(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result alias that carries a [`RowError`].
pub type RowResult<T> = Result<T, RowError>;

/// Runtime-tunable constants governing page, range, and merge sizing.
///
/// # Example
/// ```
/// use common::Config;
///
/// let config = Config::builder()
///     .page_capacity(1024)
///     .range_base_pages(8)
///     .merge_threshold(50)
///     .build();
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, bon::Builder)]
pub struct Config {
    /// K: fixed capacity of a single physical page, in records.
    #[builder(default = 512)]
    pub page_capacity: usize,
    /// M: fixed number of base pages per page range.
    #[builder(default = 16)]
    pub range_base_pages: usize,
    /// Update count per table at which a merge is scheduled.
    #[builder(default = 100)]
    pub merge_threshold: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            page_capacity: 512,
            range_base_pages: 16,
            merge_threshold: 100,
        }
    }
}

/// Hard cap on indirection-chain hops a reader will walk before giving up
/// and returning the last-known-good RID. Defends against corrupted cycles
/// per spec §3 ("the chain must be acyclic; readers defend against cycles
/// by tracking visited RIDs and a bounded iteration cap").
pub const MAX_CHAIN_ITERATIONS: usize = 1000;

static TIMESTAMP_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Produce an opaque, monotonically increasing timestamp string.
///
/// The spec treats the per-slot timestamp as opaque to the engine (a
/// YYYYMMDDHHMMSS string suffices); rather than depend on wall-clock time,
/// which would make merge/update ordering non-deterministic in tests, this
/// formats a monotonic counter into a fixed-width 14-digit field so it
/// sorts and displays exactly like the wall-clock format would.
pub fn next_timestamp() -> String {
    let n = TIMESTAMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{n:014}")
}

/// Convenient re-exports for downstream crates.
pub mod prelude {
    pub use crate::{Config, Indirection, PageKind, Record, Rid, RowError, RowResult};
}
