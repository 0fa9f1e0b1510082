//! Slot limits, file-format constants and free-mask helpers.
//!
//! The live state of an episode is a free-slot bitmask: bit `b` set means slot
//! `b` is still available. A policy table has one row per possible mask, so a
//! problem with `m` slots has exactly `2^m` rows and the full mask
//! `2^m - 1` addresses the last row.

/// Largest supported slot count. Beyond this the dense `2^m` row layout stops
/// being practical and a sparse mask-keyed map would be needed.
pub const MAX_SLOT_COUNT: usize = 20;

/// Stored in place of a policy entry that names no slot (negative or
/// `>= slot_count`). Never free in any mask, so lookups fall back.
pub const NO_SLOT: u8 = u8::MAX;

/// Native policy file magic number: "SPOL" in hex (little-endian).
pub const POLICY_FILE_MAGIC: u32 = 0x4C4F5053;

/// Native policy file version.
pub const POLICY_FILE_VERSION: u32 = 1;

/// Default location of the policy artifact, relative to the base path.
pub const DEFAULT_POLICY_PATH: &str = "data/policy.npy";

/// Mask with all `slot_count` low bits set (every slot free).
#[inline(always)]
pub fn full_mask(slot_count: usize) -> u32 {
    debug_assert!(slot_count <= MAX_SLOT_COUNT);
    ((1u64 << slot_count) - 1) as u32
}

/// Test whether `slot` is still free in `mask`.
#[inline(always)]
pub fn is_slot_free(mask: u32, slot: usize) -> bool {
    slot < 32 && (mask >> slot) & 1 == 1
}

/// Exact base-2 logarithm of `rows`, or `None` if `rows` is not a power of two.
///
/// Validated by round-trip: `1 << log2(rows) == rows`.
pub fn exact_log2(rows: usize) -> Option<usize> {
    if rows == 0 {
        return None;
    }
    let m = rows.trailing_zeros() as usize;
    if 1usize.checked_shl(m as u32) == Some(rows) {
        Some(m)
    } else {
        None
    }
}

/// Ascending slot indices whose bit is set in `mask`.
pub fn slots_in_mask(mask: u32, slot_count: usize) -> impl Iterator<Item = usize> {
    (0..slot_count).filter(move |&b| is_slot_free(mask, b))
}
