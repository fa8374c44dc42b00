//! Pin-counted page cache sitting between the `Table`/`Query` layers and
//! page storage.
//!
//! Persistence to disk is out of scope for this engine, so there is no
//! backing file to reload from on a miss: `InMemoryBufferPool` itself is
//! the authoritative store of page contents (spec: "the buffer pool is the
//! authoritative view"). `get_page` pins and returns a page's structured
//! view (creating an empty one on first touch), `set_page` installs a
//! mutated snapshot, and `try_evict` removes an entry but only when its pin
//! count has dropped to zero.


use common::{Indirection, PageKind, Rid, RowError, RowResult};
use hashbrown::HashMap;

/// Identifies a page within one table: which half of a page range, which
/// range, and which page within it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferPageId {
    pub kind: PageKind,
    pub page_range: usize,
    pub page: usize,
}

impl BufferPageId {
    pub fn new(kind: PageKind, page_range: usize, page: usize) -> Self {
        Self { kind, page_range, page }
    }

    pub fn base(page_range: usize, page: usize) -> Self {
        Self::new(PageKind::Base, page_range, page)
    }

    pub fn tail(page_range: usize, page: usize) -> Self {
        Self::new(PageKind::Tail, page_range, page)
    }
}

/// Structured, slot-aligned view of one page's contents.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PageData {
    pub columns: Vec<Vec<i64>>,
    pub rid: Vec<Rid>,
    pub timestamp: Vec<String>,
    pub schema_encoding: Vec<String>,
    pub indirection: Vec<Indirection>,
}

impl PageData {
    fn empty(num_columns: usize) -> Self {
        Self {
            columns: vec![Vec::new(); num_columns],
            rid: Vec::new(),
            timestamp: Vec::new(),
            schema_encoding: Vec::new(),
            indirection: Vec::new(),
        }
    }

    pub fn num_records(&self) -> usize {
        self.rid.len()
    }
}

/// Pin-counted cache over table-scoped pages.
///
/// Every `get_page` must be paired with an `unpin_page` on every exit path
/// (success, error, or early return) — the pin count is the only thing
/// standing between a live reader/writer and `try_evict` reclaiming a page.
pub trait BufferPool {
    fn get_page(&mut self, id: BufferPageId, table: &str, num_columns: usize) -> RowResult<PageData>;
    fn unpin_page(&mut self, id: BufferPageId, table: &str) -> RowResult<()>;
    fn set_page(&mut self, id: BufferPageId, table: &str, data: PageData) -> RowResult<()>;
    /// Evict the page if its pin count is zero. Returns whether it was
    /// evicted; never an error — an eviction attempt on a pinned or absent
    /// page is a normal, expected outcome, not a failure.
    fn try_evict(&mut self, id: BufferPageId, table: &str) -> bool;
}

#[derive(Debug)]
struct PooledPage {
    data: PageData,
    pin_count: u32,
}

/// In-memory `BufferPool`. No disk backing: a `get_page` miss synthesizes
/// an empty page rather than reading from storage — there is no crash
/// recovery or file persistence layer underneath it.
#[derive(Debug, Default)]
pub struct InMemoryBufferPool {
    pages: HashMap<(String, BufferPageId), PooledPage>,
}

impl InMemoryBufferPool {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BufferPool for InMemoryBufferPool {
    fn get_page(&mut self, id: BufferPageId, table: &str, num_columns: usize) -> RowResult<PageData> {
        let key = (table.to_string(), id);
        let entry = self.pages.entry(key).or_insert_with(|| PooledPage {
            data: PageData::empty(num_columns),
            pin_count: 0,
        });
        entry.pin_count += 1;
        Ok(entry.data.clone())
    }

    fn unpin_page(&mut self, id: BufferPageId, table: &str) -> RowResult<()> {
        let key = (table.to_string(), id);
        let entry = self
            .pages
            .get_mut(&key)
            .ok_or_else(|| RowError::NotFound(format!("no pinned page {id:?} for table {table}")))?;
        entry.pin_count = entry.pin_count.saturating_sub(1);
        Ok(())
    }

    fn set_page(&mut self, id: BufferPageId, table: &str, data: PageData) -> RowResult<()> {
        let key = (table.to_string(), id);
        match self.pages.get_mut(&key) {
            Some(entry) => entry.data = data,
            None => {
                self.pages.insert(key, PooledPage { data, pin_count: 0 });
            }
        }
        Ok(())
    }

    fn try_evict(&mut self, id: BufferPageId, table: &str) -> bool {
        let key = (table.to_string(), id);
        match self.pages.get(&key) {
            Some(entry) if entry.pin_count == 0 => {
                self.pages.remove(&key);
                true
            }
            _ => false,
        }
    }
}
