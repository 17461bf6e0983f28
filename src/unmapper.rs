// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The recursive table-tree unmapper (§4.3), mirroring [`crate::builder`].

use crate::{
    builder::{relation, Relation},
    descriptor::{Descriptor, DescriptorKind},
    hooks::{ExceptionLevel, Hooks},
    levels::{self, ENTRIES_PER_TABLE},
    region::Region,
    table::{entry_descriptor, set_entry, PageTable, TablePool, TableRef},
};

/// Tears down every leaf descriptor `region` contributed, invalidating the TLB for each page or
/// block as it is cleared, and reclaiming any sub-table whose refcount drops to zero.
///
/// Unlike [`crate::builder::map_region`] this cannot fail: every descriptor it walks was put there
/// by a previous, successful `map_region` call for this same region, so the tree it finds always
/// has the shape the region implies.
pub(crate) fn unmap_region<H: Hooks, const N: usize>(
    base_table: &mut PageTable,
    pool: &mut TablePool<N>,
    base_level: u8,
    base_entry_count: usize,
    region: &Region,
    el: ExceptionLevel,
) {
    unmap_table::<H, N>(
        base_table,
        pool,
        TableRef::Base,
        base_level,
        0,
        base_entry_count,
        region,
        el,
    );
}

#[allow(clippy::too_many_arguments)]
fn unmap_table<H: Hooks, const N: usize>(
    base_table: &mut PageTable,
    pool: &mut TablePool<N>,
    table_ref: TableRef,
    level: u8,
    table_base_va: u64,
    entry_count: usize,
    region: &Region,
    el: ExceptionLevel,
) {
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

        match (rel, kind) {
            (_, DescriptorKind::Invalid) => {
                // This index was never reached by the region being unmapped (it was contained in
                // a sibling's range instead); nothing to do.
            }
            (Relation::Contained, DescriptorKind::Page | DescriptorKind::Block) => {
                set_entry(base_table, pool, table_ref, index, Descriptor::INVALID);
                H::invalidate_tlb_by_va(entry_lo, el);
                log::trace!("Unmapped leaf at level {level} index {index} for VA {entry_lo:#x}");
            }
            (Relation::Contained | Relation::Overlapping, DescriptorKind::Table) => {
                let handle = current.table_handle();
                unmap_table::<H, N>(
                    base_table,
                    pool,
                    TableRef::Sub(handle),
                    level + 1,
                    entry_lo,
                    ENTRIES_PER_TABLE,
                    region,
                    el,
                );
                #[cfg(feature = "dynamic-regions")]
                if pool.decrement_refcount(handle) == 0 {
                    set_entry(base_table, pool, table_ref, index, Descriptor::INVALID);
                    pool.reclaim(handle);
                    H::invalidate_tlb_by_va(entry_lo, el);
                    log::trace!("Reclaimed sub-table at level {level} index {index}");
                }
            }
            (relation, kind) => unreachable!(
                "region-list validation should prevent relation {relation:?} with descriptor kind {kind:?}"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        attributes::{AccessPermission, Executability, MemoryType, RegionAttributes, Security},
        builder::map_region,
        hooks::FakeHooks,
        table::TablePool,
    };

    fn rw_normal() -> RegionAttributes {
        RegionAttributes::new(
            MemoryType::Cacheable,
            AccessPermission::ReadWrite,
            Security::NonSecure,
            Executability::ExecuteNever,
        )
        .unwrap()
    }

    /// A 32-bit VA configuration: level 1 is the base level, with 4 entries of 1 GiB each.
    const BASE_LEVEL: u8 = 1;
    const BASE_ENTRY_COUNT: usize = 4;

    #[test]
    fn unmapping_a_block_invalidates_the_tlb_and_clears_the_descriptor() {
        let _guard = FakeHooks::lock_for_test();
        FakeHooks::reset();
        let mut base_table = PageTable::EMPTY;
        let mut pool: TablePool<4> = TablePool::new();
        // Exactly one base-table entry's span, so it lands as a block in the base table itself.
        let region = Region::new(0x4000_0000, 0x4000_0000, 0x4000_0000, rw_normal(), 0x4000_0000);

        map_region::<FakeHooks, 4>(&mut base_table, &mut pool, BASE_LEVEL, BASE_ENTRY_COUNT, &region, ExceptionLevel::El1)
            .unwrap();
        let index = levels::level_index(0x4000_0000, BASE_LEVEL);
        assert_eq!(base_table.get(index).kind(BASE_LEVEL), DescriptorKind::Block);

        unmap_region::<FakeHooks, 4>(&mut base_table, &mut pool, BASE_LEVEL, BASE_ENTRY_COUNT, &region, ExceptionLevel::El1);

        assert_eq!(base_table.get(index).kind(BASE_LEVEL), DescriptorKind::Invalid);
        assert!(!FakeHooks::invalidations().is_empty());
    }

    #[cfg(feature = "dynamic-regions")]
    #[test]
    fn unmapping_reclaims_an_emptied_sub_table() {
        let _guard = FakeHooks::lock_for_test();
        FakeHooks::reset();
        let mut base_table = PageTable::EMPTY;
        let mut pool: TablePool<4> = TablePool::new();
        // Two 4 KiB pages, smaller than a block, force level-2 and level-3 sub-tables.
        let region = Region::new(0x1000, 0x1000, 0x2000, rw_normal(), 0x1000);

        map_region::<FakeHooks, 4>(&mut base_table, &mut pool, BASE_LEVEL, BASE_ENTRY_COUNT, &region, ExceptionLevel::El1)
            .unwrap();
        let l1_index = levels::level_index(0x1000, 1);
        let l2_index = levels::level_index(0x1000, 2);
        let l1_handle = base_table.get(l1_index).table_handle();
        let l2_handle = pool.table(l1_handle).get(l2_index).table_handle();
        assert_eq!(pool.refcount(l2_handle), 1);

        unmap_region::<FakeHooks, 4>(&mut base_table, &mut pool, BASE_LEVEL, BASE_ENTRY_COUNT, &region, ExceptionLevel::El1);

        // Every level that only existed for this region is now reclaimed back to Invalid.
        assert_eq!(pool.table(l1_handle).get(l2_index).kind(2), DescriptorKind::Invalid);
        assert_eq!(base_table.get(l1_index).kind(1), DescriptorKind::Invalid);
        // Reclaiming the now-empty level-1 sub-table must itself invalidate the VA the erased
        // parent table descriptor covered, not just the two leaf pages.
        let l1_base_va = levels::level_index(0x1000, 1) as u64 * levels::level_span(BASE_LEVEL);
        assert!(FakeHooks::invalidations().iter().any(|entry| entry.va == l1_base_va));
    }
}
