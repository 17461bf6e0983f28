// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The in-place attribute mutator (§4.6 "Attribute mutation").
//!
//! Changing the attributes of a live mapping is a two-pass tree walk: the first pass confirms
//! every byte in the requested range is backed by an existing leaf descriptor whose boundaries
//! line up exactly with the request (splitting an existing block to change only part of it is not
//! supported), and only once that has succeeded for the whole range does the second pass rewrite
//! the descriptors and invalidate the TLB. This keeps a failed request from leaving the tree in a
//! half-mutated state.

use crate::{
    attributes::RegionAttributes,
    builder::{relation, Relation},
    descriptor::DescriptorKind,
    error::XlatError,
    hooks::{ExceptionLevel, Hooks},
    levels::{self, ENTRIES_PER_TABLE, GRANULE_SIZE},
    table::{entry_descriptor, set_entry, PageTable, TablePool, TableRef},
};

/// Changes the attributes of every page in `[base_va, base_va + size)` to `new_attrs`.
///
/// `base_va` and `size` must be granule-aligned; every page in the range must already be mapped
/// by a page-level leaf descriptor. A request that resolves to a block descriptor anywhere in the
/// range — whether the range splits the block or matches it exactly — is rejected with
/// [`XlatError::InvalidArgument`], and a request that touches any unmapped byte is rejected with
/// [`XlatError::NotFound`]. Neither case mutates anything.
#[allow(clippy::too_many_arguments)]
pub(crate) fn change_attributes<H: Hooks, const N: usize>(
    base_table: &mut PageTable,
    pool: &mut TablePool<N>,
    base_level: u8,
    base_entry_count: usize,
    base_va: u64,
    size: u64,
    new_attrs: &RegionAttributes,
    el: ExceptionLevel,
) -> Result<(), XlatError> {
    if size == 0 || base_va % GRANULE_SIZE != 0 || size % GRANULE_SIZE != 0 {
        return Err(XlatError::InvalidArgument {
            reason: "attribute-change VA range must be non-zero and granule-aligned",
        });
    }
    let end_va = base_va.checked_add(size - 1).ok_or(XlatError::OutOfRange {
        address: base_va,
        limit: u64::MAX,
    })?;

    verify_range(base_table, pool, TableRef::Base, base_level, 0, base_entry_count, base_va, end_va)?;
    mutate_range::<H, N>(
        base_table,
        pool,
        TableRef::Base,
        base_level,
        0,
        base_entry_count,
        base_va,
        end_va,
        new_attrs,
        el,
    );
    H::tlb_sync();
    log::debug!("Changed attributes for VA {base_va:#x}..={end_va:#x}");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn verify_range<const N: usize>(
    base_table: &PageTable,
    pool: &TablePool<N>,
    table_ref: TableRef,
    level: u8,
    table_base_va: u64,
    entry_count: usize,
    va_lo: u64,
    va_hi: u64,
) -> Result<(), XlatError> {
    let span = levels::level_span(level);
    for index in 0..entry_count {
        let entry_lo = table_base_va + index as u64 * span;
        let entry_hi = entry_lo + span - 1;
        let rel = relation(entry_lo, entry_hi, va_lo, va_hi);
        if rel == Relation::Disjoint {
            continue;
        }

        let current = entry_descriptor(base_table, pool, table_ref, index);
        match current.kind(level) {
            DescriptorKind::Invalid => {
                return Err(XlatError::NotFound {
                    base_va: entry_lo,
                    size: span,
                });
            }
            DescriptorKind::Block => {
                // Per §4.6, a page in the requested range backed by a block (coarser-than-page)
                // descriptor is rejected outright, even if the block's own span matches the
                // request exactly: the mutator only ever rewrites page-level leaves.
                return Err(XlatError::InvalidArgument {
                    reason: "attribute change requires an existing page-level mapping, found a block",
                });
            }
            DescriptorKind::Page => {
                // Page descriptors only occur at the deepest level, where entry span equals one
                // granule; alignment checked above means this is always `Contained`, never
                // `Overlapping`.
            }
            DescriptorKind::Table => {
                let handle = current.table_handle();
                verify_range(
                    base_table,
                    pool,
                    TableRef::Sub(handle),
                    level + 1,
                    entry_lo,
                    ENTRIES_PER_TABLE,
                    va_lo,
                    va_hi,
                )?;
            }
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn mutate_range<H: Hooks, const N: usize>(
    base_table: &mut PageTable,
    pool: &mut TablePool<N>,
    table_ref: TableRef,
    level: u8,
    table_base_va: u64,
    entry_count: usize,
    va_lo: u64,
    va_hi: u64,
    new_attrs: &RegionAttributes,
    el: ExceptionLevel,
) {
    let span = levels::level_span(level);
    for index in 0..entry_count {
        let entry_lo = table_base_va + index as u64 * span;
        let entry_hi = entry_lo + span - 1;
        let rel = relation(entry_lo, entry_hi, va_lo, va_hi);
        if rel == Relation::Disjoint {
            continue;
        }

        let current = entry_descriptor(base_table, pool, table_ref, index);
        match current.kind(level) {
            DescriptorKind::Page => {
                let descriptor =
                    current.with_access_and_xn::<H>(new_attrs.access(), new_attrs.effective_execute_never(), el);
                set_entry(base_table, pool, table_ref, index, descriptor);
                H::invalidate_tlb_by_va(entry_lo, el);
            }
            DescriptorKind::Table => {
                let handle = current.table_handle();
                mutate_range::<H, N>(
                    base_table,
                    pool,
                    TableRef::Sub(handle),
                    level + 1,
                    entry_lo,
                    ENTRIES_PER_TABLE,
                    va_lo,
                    va_hi,
                    new_attrs,
                    el,
                );
            }
            DescriptorKind::Invalid | DescriptorKind::Block => {
                unreachable!("verify_range already rejected any unmapped byte or block mapping in range")
            }
        }
    }
}
