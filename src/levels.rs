// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Constants and helpers for navigating the level hierarchy of a 4 KiB-granule, 64-bit ARM
//! translation table tree.
//!
//! Level numbering follows the architecture: level 0 is the shallowest (largest span, fewest
//! levels below it), level 3 is the deepest and only ever holds page descriptors.

/// Page size in bytes, and the size of one translation table (512 eight-byte descriptors).
pub const GRANULE_SHIFT: u32 = 12;

/// `1 << GRANULE_SHIFT`.
pub const GRANULE_SIZE: u64 = 1 << GRANULE_SHIFT;

/// Number of descriptor slots in a full (non-base) translation table.
pub const ENTRIES_PER_TABLE: usize = 512;

/// Number of VA bits consumed by each level below the base level.
pub const INDEX_BITS: u32 = 9;

/// The deepest level; only page or invalid descriptors may appear here.
pub const DEEPEST_LEVEL: u8 = 3;

/// The shallowest level at which a block descriptor is architecturally permitted for a 4 KiB
/// granule. Level 0 entries span 512 GiB, too large to be represented as a block.
pub const MIN_BLOCK_LEVEL: u8 = 1;

/// Returns the number of bits of VA consumed by the page offset plus every level from `level` to
/// [`DEEPEST_LEVEL`] inclusive; equivalently, `log2` of the span of one entry at `level`.
pub const fn level_shift(level: u8) -> u32 {
    GRANULE_SHIFT + INDEX_BITS * (DEEPEST_LEVEL - level) as u32
}

/// Returns the size in bytes of the VA range mapped by a single entry at `level`.
pub const fn level_span(level: u8) -> u64 {
    1 << level_shift(level)
}

/// Extracts the table index for `level` out of a virtual address.
pub const fn level_index(va: u64, level: u8) -> usize {
    ((va >> level_shift(level)) & (ENTRIES_PER_TABLE as u64 - 1)) as usize
}

/// Returns whether `addr` is aligned to the span of one entry at `level`, i.e. whether it is a
/// legal destination for a block or page descriptor at that level.
pub const fn is_level_aligned(addr: u64, level: u8) -> bool {
    addr & (level_span(level) - 1) == 0
}

/// Given the number of VA bits a context must cover, returns the base (shallowest) lookup level
/// and the number of entries in the base table.
///
/// A VA width that is not an exact multiple of [`INDEX_BITS`] above the granule offset yields a
/// base table with fewer than [`ENTRIES_PER_TABLE`] entries, exactly as a real `TTBRn_EL1`/`TCR`
/// configuration with a non-512-GiB-aligned `T0SZ` would.
pub const fn base_level_for_va_bits(va_bits: u32) -> (u8, usize) {
    let bits_above_page = va_bits - GRANULE_SHIFT;
    let total_levels = bits_above_page.div_ceil(INDEX_BITS);
    let base_level = (DEEPEST_LEVEL as u32 + 1 - total_levels) as u8;
    let lower_levels = total_levels - 1;
    let base_index_bits = bits_above_page - INDEX_BITS * lower_levels;
    (base_level, 1usize << base_index_bits)
}
