// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The recursive table-tree builder (§4.2).

use crate::{
    descriptor::{Descriptor, DescriptorKind},
    hooks::{ExceptionLevel, Hooks},
    levels::{self, DEEPEST_LEVEL, ENTRIES_PER_TABLE, MIN_BLOCK_LEVEL},
    region::Region,
    table::{entry_descriptor, set_entry, PageTable, TablePool, TableRef},
};

/// How a table entry's VA interval relates to the region being built or torn down.
///
/// Computed as an explicit three-way predicate rather than relying on evaluation order between a
/// "fully inside" check and an imprecise overlap check (see `SPEC_FULL.md`'s REDESIGN FLAGS entry
/// about the reference implementation's `xlat_tables_map_region_action`).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Relation {
    /// The entry's VA interval does not intersect the region's at all.
    Disjoint,
    /// The entry's VA interval is fully inside the region's (or equal to it).
    Contained,
    /// The entry's VA interval intersects the region's but is not fully contained in it.
    Overlapping,
}

pub(crate) fn relation(entry_lo: u64, entry_hi: u64, region_lo: u64, region_hi: u64) -> Relation {
    if entry_hi < region_lo || region_hi < entry_lo {
        Relation::Disjoint
    } else if region_lo <= entry_lo && entry_hi <= region_hi {
        Relation::Contained
    } else {
        Relation::Overlapping
    }
}

/// Builds `region` into the tree rooted at `base_table`.
///
/// Returns `Ok(())` if every page in the region now has a leaf descriptor, or `Err(va)` with the
/// virtual address at which the pool was exhausted (§4.2 "Return value"). The caller (normally
/// [`crate::TranslationContext::add_dynamic`]) compares this against the region's end VA to detect
/// a partial failure and is responsible for rolling back via [`crate::unmapper::unmap_region`].
pub(crate) fn map_region<H: Hooks, const N: usize>(
    base_table: &mut PageTable,
    pool: &mut TablePool<N>,
    base_level: u8,
    base_entry_count: usize,
    region: &Region,
    el: ExceptionLevel,
) -> Result<(), u64> {
    map_table::<H, N>(
        base_table,
        pool,
        TableRef::Base,
        base_level,
        0,
        base_entry_count,
        region,
        el,
    )
}

#[allow(clippy::too_many_arguments)]
fn map_table<H: Hooks, const N: usize>(
    base_table: &mut PageTable,
    pool: &mut TablePool<N>,
    table_ref: TableRef,
    level: u8,
    table_base_va: u64,
    entry_count: usize,
    region: &Region,
    el: ExceptionLevel,
) -> Result<(), u64> {
    #[cfg(feature = "dynamic-regions")]
    if let TableRef::Sub(handle) = table_ref {
        pool.increment_refcount(handle);
    }

    let span = levels::level_span(level);
    for index in 0..entry_count {
        let entry_lo = table_base_va + index as u64 * span;
        let entry_hi = entry_lo + span - 1;
        let rel = relation(entry_lo, entry_hi, region.base_va(), region.end_va());
        if rel == Relation::Disjoint {
            continue;
        }

        let current = entry_descriptor(base_table, pool, table_ref, index);
        let kind = current.kind(level);
        // Only valid to compute once `rel` is known to be `Contained`: an `Overlapping` entry can
        // start before the region does, which would underflow this subtraction.
        let dest_pa = |entry_lo: u64| region.base_pa() + (entry_lo - region.base_va());

        match (rel, kind) {
            (Relation::Contained, DescriptorKind::Invalid) if level == DEEPEST_LEVEL => {
                let descriptor = Descriptor::leaf::<H>(dest_pa(entry_lo), level, region.attrs(), el);
                set_entry(base_table, pool, table_ref, index, descriptor);
                log::trace!("Wrote page descriptor at level {level} index {index} for VA {entry_lo:#x}");
            }
            (Relation::Contained, DescriptorKind::Page) if level == DEEPEST_LEVEL => {
                // A finer mapping is already present; the builder never overwrites it.
            }
            (Relation::Contained, DescriptorKind::Table) => {
                let handle = current.table_handle();
                map_table::<H, N>(
                    base_table,
                    pool,
                    TableRef::Sub(handle),
                    level + 1,
                    entry_lo,
                    ENTRIES_PER_TABLE,
                    region,
                    el,
                )?;
            }
            (Relation::Contained, DescriptorKind::Invalid) => {
                if level >= MIN_BLOCK_LEVEL
                    && levels::is_level_aligned(dest_pa(entry_lo), level)
                    && region.granularity() >= span
                {
                    let descriptor = Descriptor::leaf::<H>(dest_pa(entry_lo), level, region.attrs(), el);
                    set_entry(base_table, pool, table_ref, index, descriptor);
                    log::trace!("Wrote block descriptor at level {level} index {index} for VA {entry_lo:#x}");
                } else {
                    let handle = pool.allocate().map_err(|_| entry_lo)?;
                    set_entry(base_table, pool, table_ref, index, Descriptor::table(handle));
                    map_table::<H, N>(
                        base_table,
                        pool,
                        TableRef::Sub(handle),
                        level + 1,
                        entry_lo,
                        ENTRIES_PER_TABLE,
                        region,
                        el,
                    )?;
                }
            }
            (Relation::Contained, DescriptorKind::Block) => {
                // A coarser mapping from an earlier, outer region already covers this entry.
            }
            (Relation::Overlapping, DescriptorKind::Invalid) => {
                debug_assert!(level < DEEPEST_LEVEL, "overlap at the deepest level violates page alignment");
                let handle = pool.allocate().map_err(|_| entry_lo)?;
                set_entry(base_table, pool, table_ref, index, Descriptor::table(handle));
                map_table::<H, N>(
                    base_table,
                    pool,
                    TableRef::Sub(handle),
                    level + 1,
                    entry_lo,
                    ENTRIES_PER_TABLE,
                    region,
                    el,
                )?;
            }
            (Relation::Overlapping, DescriptorKind::Table) => {
                debug_assert!(level < DEEPEST_LEVEL, "overlap at the deepest level violates page alignment");
                let handle = current.table_handle();
                map_table::<H, N>(
                    base_table,
                    pool,
                    TableRef::Sub(handle),
                    level + 1,
                    entry_lo,
                    ENTRIES_PER_TABLE,
                    region,
                    el,
                )?;
            }
            (relation, kind) => unreachable!(
                "region-list validation should prevent relation {relation:?} with descriptor kind {kind:?}"
            ),
        }
    }
    Ok(())
}
