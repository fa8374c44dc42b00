//! Physical pages and base/tail row groups for the columnar engine.
//!
//! A [`PhysicalPage`] is a fixed-capacity append-only integer column chunk.
//! A [`ColumnPage`] groups `num_columns` of them into one row group, plus
//! four parallel per-slot vectors (rid, timestamp, schema_encoding,
//! indirection) needed to resolve versions and ownership. Base and tail
//! pages share this exact shape — the only thing that distinguishes them
//! is the `PageKind` tag carried on each slot's `Rid`.

#[cfg(test)]
mod tests;

use common::{Indirection, Rid, RowError, RowResult};

/// A fixed-capacity, append-only integer column chunk.
#[derive(Debug, Clone)]
pub struct PhysicalPage {
    capacity: usize,
    values: Vec<i64>,
}

impl PhysicalPage {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            values: Vec::with_capacity(capacity),
        }
    }

    pub fn has_capacity(&self) -> bool {
        self.values.len() < self.capacity
    }

    pub fn num_records(&self) -> usize {
        self.values.len()
    }

    /// Append `value`, returning the slot index it landed in.
    pub fn write(&mut self, value: i64) -> RowResult<usize> {
        if !self.has_capacity() {
            return Err(RowError::CapacityExhausted(
                "physical page at capacity".into(),
            ));
        }
        self.values.push(value);
        Ok(self.values.len() - 1)
    }

    /// Read `count` contiguous values starting at `slot`.
    pub fn read(&self, slot: usize, count: usize) -> RowResult<Vec<i64>> {
        let end = slot
            .checked_add(count)
            .filter(|&end| end <= self.values.len())
            .ok_or_else(|| {
                RowError::OutOfBounds(format!(
                    "read [{slot}, {slot}+{count}) exceeds {} records",
                    self.values.len()
                ))
            })?;
        Ok(self.values[slot..end].to_vec())
    }

    pub fn read_one(&self, slot: usize) -> RowResult<i64> {
        self.values
            .get(slot)
            .copied()
            .ok_or_else(|| RowError::OutOfBounds(format!("slot {slot} out of range")))
    }
}

/// A row group containing `num_columns` [`PhysicalPage`]s plus four
/// parallel per-slot vectors, all kept at equal length: the four vectors
/// and each `PhysicalPage`'s record count always agree.
#[derive(Debug, Clone)]
pub struct ColumnPage {
    columns: Vec<PhysicalPage>,
    rid: Vec<Rid>,
    timestamp: Vec<String>,
    schema_encoding: Vec<String>,
    indirection: Vec<Indirection>,
}

/// Base and tail pages have identical internal shape; only the `PageKind`
/// carried on each slot's RID distinguishes them.
pub type BasePage = ColumnPage;
pub type TailPage = ColumnPage;

impl ColumnPage {
    pub fn new(num_columns: usize, capacity: usize) -> Self {
        Self {
            columns: (0..num_columns).map(|_| PhysicalPage::new(capacity)).collect(),
            rid: Vec::new(),
            timestamp: Vec::new(),
            schema_encoding: Vec::new(),
            indirection: Vec::new(),
        }
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn num_records(&self) -> usize {
        self.rid.len()
    }

    /// `has_capacity()` equals the first sub-page's `has_capacity()` (spec
    /// §4.B) since every sub-page is written to in lockstep by `append`.
    pub fn has_capacity(&self) -> bool {
        self.columns.first().is_some_and(PhysicalPage::has_capacity)
    }

    /// Push one logical row onto every sub-page and all four side vectors
    /// as a single unit: either everything below succeeds or nothing is
    /// mutated.
    pub fn append(
        &mut self,
        columns: &[i64],
        rid: Rid,
        timestamp: String,
        schema_encoding: String,
        indirection: Indirection,
    ) -> RowResult<usize> {
        if columns.len() != self.columns.len() {
            return Err(RowError::OutOfBounds(format!(
                "expected {} columns, got {}",
                self.columns.len(),
                columns.len()
            )));
        }
        if self.columns.iter().any(|page| !page.has_capacity()) {
            return Err(RowError::CapacityExhausted("page at capacity".into()));
        }
        for (page, value) in self.columns.iter_mut().zip(columns) {
            page.write(*value)?;
        }
        self.rid.push(rid);
        self.timestamp.push(timestamp);
        self.schema_encoding.push(schema_encoding);
        self.indirection.push(indirection);

        debug_assert_eq!(self.rid.len(), self.timestamp.len());
        debug_assert_eq!(self.rid.len(), self.schema_encoding.len());
        debug_assert_eq!(self.rid.len(), self.indirection.len());
        Ok(self.rid.len() - 1)
    }

    pub fn read_column(&self, column: usize, slot: usize) -> RowResult<i64> {
        self.columns
            .get(column)
            .ok_or_else(|| RowError::OutOfBounds(format!("column {column} out of range")))?
            .read_one(slot)
    }

    pub fn read_row(&self, slot: usize) -> RowResult<Vec<i64>> {
        if slot >= self.num_records() {
            return Err(RowError::OutOfBounds(format!("slot {slot} out of range")));
        }
        self.columns.iter().map(|page| page.read_one(slot)).collect()
    }

    pub fn rid_at(&self, slot: usize) -> RowResult<Rid> {
        self.rid
            .get(slot)
            .copied()
            .ok_or_else(|| RowError::OutOfBounds(format!("slot {slot} out of range")))
    }

    pub fn indirection_at(&self, slot: usize) -> RowResult<Indirection> {
        self.indirection
            .get(slot)
            .copied()
            .ok_or_else(|| RowError::OutOfBounds(format!("slot {slot} out of range")))
    }

    pub fn set_indirection(&mut self, slot: usize, indirection: Indirection) -> RowResult<()> {
        let entry = self
            .indirection
            .get_mut(slot)
            .ok_or_else(|| RowError::OutOfBounds(format!("slot {slot} out of range")))?;
        *entry = indirection;
        Ok(())
    }

    pub fn timestamp_at(&self, slot: usize) -> RowResult<&str> {
        self.timestamp
            .get(slot)
            .map(String::as_str)
            .ok_or_else(|| RowError::OutOfBounds(format!("slot {slot} out of range")))
    }

    pub fn schema_encoding_at(&self, slot: usize) -> RowResult<&str> {
        self.schema_encoding
            .get(slot)
            .map(String::as_str)
            .ok_or_else(|| RowError::OutOfBounds(format!("slot {slot} out of range")))
    }

    pub fn rids(&self) -> &[Rid] {
        &self.rid
    }

    pub fn indirections(&self) -> &[Indirection] {
        &self.indirection
    }
}

/// Build a schema-encoding bitstring: one `'1'` per column a writer
/// actually supplied, `'0'` elsewhere.
pub fn schema_encoding_of(supplied: &[bool]) -> String {
    supplied.iter().map(|&set| if set { '1' } else { '0' }).collect()
}
