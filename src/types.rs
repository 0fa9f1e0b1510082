use crate::constants::*;
use crate::error::{Error, Result};

/// Policy entries: either owned (built in memory) or memory-mapped (loaded
/// from a native policy file).
pub enum PolicyEntries {
    Owned(Vec<u8>),
    Mmap {
        mmap: memmap2::Mmap,
        data_start: usize,
        len: usize,
    },
}

impl PolicyEntries {
    #[inline(always)]
    pub fn as_slice(&self) -> &[u8] {
        match self {
            PolicyEntries::Owned(v) => v.as_slice(),
            PolicyEntries::Mmap {
                mmap,
                data_start,
                len,
            } => &mmap[*data_start..*data_start + *len],
        }
    }
}

/// Precomputed decision table: `table[mask][item_type]` = recommended slot.
///
/// Row `mask` encodes the set of free slots as its bit pattern, so the table
/// has exactly `2^slot_count` rows. Immutable after construction; share it
/// between episodes with `Arc<PolicyTable>`.
pub struct PolicyTable {
    slot_count: usize,
    type_count: usize,
    entries: PolicyEntries,
}

impl std::fmt::Debug for PolicyTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyTable")
            .field("slot_count", &self.slot_count)
            .field("type_count", &self.type_count)
            .field("mmap", &matches!(self.entries, PolicyEntries::Mmap { .. }))
            .finish()
    }
}

/// Validate the row count and derive the slot count.
pub(crate) fn slot_count_for_shape(rows: usize) -> Result<usize> {
    let m = exact_log2(rows).ok_or_else(|| {
        Error::format(format!(
            "policy row count {} is not a power of two (expected 2^slot_count rows)",
            rows
        ))
    })?;
    if m > MAX_SLOT_COUNT {
        return Err(Error::format(format!(
            "policy has {} slots, at most {} are supported",
            m, MAX_SLOT_COUNT
        )));
    }
    Ok(m)
}

impl PolicyTable {
    /// Build from a row-major slice of integers with the given shape.
    ///
    /// Entries that name no slot (negative, or `>= slot_count`) are kept as
    /// [`NO_SLOT`]; an assigner reaching one falls back to the smallest free
    /// slot.
    pub fn from_flat<I>(rows: usize, cols: usize, values: I) -> Result<Self>
    where
        I: IntoIterator<Item = i64>,
    {
        let slot_count = slot_count_for_shape(rows)?;
        let expected = rows
            .checked_mul(cols)
            .ok_or_else(|| Error::format(format!("policy shape {}x{} is too large", rows, cols)))?;
        let mut entries = Vec::with_capacity(expected);
        for v in values {
            if (0..slot_count as i64).contains(&v) {
                entries.push(v as u8);
            } else {
                entries.push(NO_SLOT);
            }
        }
        if entries.len() != expected {
            return Err(Error::format(format!(
                "policy has {} entries, shape {}x{} needs {}",
                entries.len(),
                rows,
                cols,
                expected
            )));
        }
        Ok(Self {
            slot_count,
            type_count: cols,
            entries: PolicyEntries::Owned(entries),
        })
    }

    /// Build from nested rows (`rows[mask][item_type]`). Ragged input is a
    /// format error: the table must be exactly two-dimensional.
    pub fn from_rows(rows: &[Vec<i64>]) -> Result<Self> {
        let cols = rows.first().map_or(0, Vec::len);
        if let Some((i, r)) = rows.iter().enumerate().find(|(_, r)| r.len() != cols) {
            return Err(Error::format(format!(
                "policy is not two-dimensional: row {} has {} columns, row 0 has {}",
                i,
                r.len(),
                cols
            )));
        }
        Self::from_flat(rows.len(), cols, rows.iter().flatten().copied())
    }

    /// Wrap a mapped native policy file. `data_start..data_start + rows * cols`
    /// must lie inside the mapping.
    pub(crate) fn from_mmap(
        mmap: memmap2::Mmap,
        data_start: usize,
        rows: usize,
        cols: usize,
    ) -> Result<Self> {
        let slot_count = slot_count_for_shape(rows)?;
        let len = rows * cols;
        if mmap.len() != data_start + len {
            return Err(Error::format(format!(
                "policy file size mismatch: expected {}, got {}",
                data_start + len,
                mmap.len()
            )));
        }
        let entries = PolicyEntries::Mmap {
            mmap,
            data_start,
            len,
        };
        Ok(Self {
            slot_count,
            type_count: cols,
            entries,
        })
    }

    #[inline(always)]
    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    #[inline(always)]
    pub fn type_count(&self) -> usize {
        self.type_count
    }

    /// Number of rows, `2^slot_count`.
    #[inline(always)]
    pub fn row_count(&self) -> usize {
        1 << self.slot_count
    }

    #[inline(always)]
    pub fn full_mask(&self) -> u32 {
        full_mask(self.slot_count)
    }

    /// Whether the entries are served from a memory map.
    pub fn is_mapped(&self) -> bool {
        matches!(self.entries, PolicyEntries::Mmap { .. })
    }

    /// Row-major entries.
    #[inline(always)]
    pub fn entries(&self) -> &[u8] {
        self.entries.as_slice()
    }

    /// Recommended slot for `item_type` when the free slots are `mask`.
    ///
    /// Panics if `mask` or `item_type` is out of range; callers validate first.
    #[inline(always)]
    pub fn get(&self, mask: u32, item_type: usize) -> usize {
        debug_assert!((mask as usize) < self.row_count());
        debug_assert!(item_type < self.type_count);
        self.entries()[mask as usize * self.type_count + item_type] as usize
    }

    /// All recommendations for one free-slot mask.
    pub fn row(&self, mask: u32) -> &[u8] {
        let start = mask as usize * self.type_count;
        &self.entries()[start..start + self.type_count]
    }

    /// Entries of non-empty masks that recommend a slot which is not free in
    /// their own mask, as `(mask, item_type, slot)`.
    ///
    /// Row 0 (nothing free) is never consulted and is skipped.
    pub fn inconsistent_entries(&self) -> impl Iterator<Item = (u32, usize, usize)> + '_ {
        (1..self.row_count() as u32).flat_map(move |mask| {
            self.row(mask)
                .iter()
                .enumerate()
                .filter(move |&(_, &slot)| !is_slot_free(mask, slot as usize))
                .map(move |(t, &slot)| (mask, t, slot as usize))
        })
    }

    /// Reject a table whose recommendations can name occupied slots.
    ///
    /// Not applied on load: an assigner tolerates such entries by falling back
    /// to the smallest free slot.
    pub fn check_consistency(&self) -> Result<()> {
        match self.inconsistent_entries().next() {
            None => Ok(()),
            Some((mask, t, slot)) => Err(Error::format(format!(
                "policy recommends occupied slot {} at mask {:#b} type {}",
                slot, mask, t
            ))),
        }
    }
}

/// Dense row-major value matrix: `get(item, slot)` is the value of assigning
/// an item of that row to that slot.
#[derive(Clone, Debug, PartialEq)]
pub struct ValueMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl ValueMatrix {
    pub fn new(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(Error::value(format!(
                "value matrix has {} entries, shape {}x{} needs {}",
                data.len(),
                rows,
                cols,
                rows * cols
            )));
        }
        if let Some(pos) = data.iter().position(|v| !v.is_finite()) {
            return Err(Error::value(format!(
                "value matrix entry ({}, {}) is not finite",
                pos / cols,
                pos % cols
            )));
        }
        Ok(Self { rows, cols, data })
    }

    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        let cols = rows.first().map_or(0, Vec::len);
        if let Some((i, r)) = rows.iter().enumerate().find(|(_, r)| r.len() != cols) {
            return Err(Error::value(format!(
                "value matrix row {} has {} columns, row 0 has {}",
                i,
                r.len(),
                cols
            )));
        }
        let n = rows.len();
        Self::new(n, cols, rows.into_iter().flatten().collect())
    }

    #[inline(always)]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline(always)]
    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.cols == 0
    }

    #[inline(always)]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.cols + col]
    }

    /// Range-checked lookup.
    pub fn try_get(&self, row: usize, col: usize) -> Result<f64> {
        if row >= self.rows {
            return Err(Error::Range {
                what: "value row",
                index: row,
                len: self.rows,
            });
        }
        if col >= self.cols {
            return Err(Error::Range {
                what: "value column",
                index: col,
                len: self.cols,
            });
        }
        Ok(self.get(row, col))
    }

    pub fn row(&self, row: usize) -> &[f64] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    /// Largest entry, or `None` for an empty matrix.
    pub fn max(&self) -> Option<f64> {
        self.data.iter().copied().reduce(f64::max)
    }

    pub fn min(&self) -> Option<f64> {
        self.data.iter().copied().reduce(f64::min)
    }

    /// Sub-matrix made of the given rows, in the given order.
    pub fn select_rows(&self, rows: &[usize]) -> Self {
        let mut data = Vec::with_capacity(rows.len() * self.cols);
        for &r in rows {
            data.extend_from_slice(self.row(r));
        }
        Self {
            rows: rows.len(),
            cols: self.cols,
            data,
        }
    }

    pub fn transpose(&self) -> Self {
        let mut data = Vec::with_capacity(self.data.len());
        for c in 0..self.cols {
            for r in 0..self.rows {
                data.push(self.get(r, c));
            }
        }
        Self {
            rows: self.cols,
            cols: self.rows,
            data,
        }
    }
}
