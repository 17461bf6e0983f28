// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Encoding and decoding of architectural 64-bit descriptors (§4.5 "Descriptor encoding").
//!
//! A descriptor is either invalid, a table descriptor pointing at a sub-table, a block descriptor
//! directly mapping a large range, or a page descriptor (architecturally the same encoding as a
//! table descriptor, but only ever found at [`crate::levels::DEEPEST_LEVEL`]).

use crate::{
    attributes::{AccessPermission, MemoryType, RegionAttributes, Security},
    hooks::{ExceptionLevel, Hooks},
    levels::{self, DEEPEST_LEVEL},
    table::TableHandle,
};
use bitflags::bitflags;
use core::fmt::{self, Debug, Formatter};

bitflags! {
    /// The low-order flag bits of an ARMv8-A long-descriptor, i.e. everything except the output
    /// address and the execute-never bits (which live at bit 53/54, outside this `u64`'s natural
    /// low-bits grouping, and are OR'd in separately via [`Hooks::xn_mask`]).
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    struct DescriptorFlags: u64 {
        /// Bit 0: set on every non-invalid descriptor.
        const VALID = 1 << 0;
        /// Bit 1: set on table descriptors (any level) and page descriptors (level 3); clear on
        /// block descriptors. The single bit that architecturally distinguishes a block from a
        /// table/page encoding.
        const TABLE_OR_PAGE = 1 << 1;
        /// Bit 5 (NS): the region is non-secure.
        const NON_SECURE = 1 << 5;
        /// Bit 7 (AP\[2\]): when set, the region is read-only.
        const AP_READ_ONLY = 1 << 7;
        /// Bits \[9:8\] (SH): outer-shareable.
        const SH_OUTER = 0b10 << 8;
        /// Bits \[9:8\] (SH): inner-shareable.
        const SH_INNER = 0b11 << 8;
        /// Bit 10 (AF): the access flag. Always set, since the engine does not implement
        /// access-flag faults.
        const ACCESSED = 1 << 10;
    }
}

const ATTR_INDEX_SHIFT: u32 = 2;
const ATTR_INDEX_MASK: u64 = 0b111 << ATTR_INDEX_SHIFT;
/// Bits `[47:12]` of a descriptor hold the output address (block/page) or the physical address of
/// the next-level table.
const OUTPUT_ADDRESS_MASK: u64 = 0x0000_ffff_ffff_f000;
/// Bits 53 (PXN) and 54 (UXN): the execute-never bits, outside `DescriptorFlags`' natural low-bits
/// grouping. Cleared as a pair before OR-ing in whatever subset `Hooks::xn_mask` returns for a
/// given exception level, so a descriptor never retains a stale XN bit from a different regime.
const XN_BITS: u64 = (1 << 53) | (1 << 54);

/// What kind of entry a descriptor represents.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DescriptorKind {
    /// No mapping.
    Invalid,
    /// Points at a sub-table; only possible at levels shallower than [`DEEPEST_LEVEL`].
    Table,
    /// Directly maps a large, naturally aligned range; only possible at levels shallower than
    /// [`DEEPEST_LEVEL`].
    Block,
    /// Maps one page; only possible at [`DEEPEST_LEVEL`].
    Page,
}

/// A raw 64-bit architectural descriptor.
#[derive(Clone, Copy, Eq, PartialEq, zerocopy::FromBytes, zerocopy::IntoBytes, zerocopy::Immutable)]
#[repr(transparent)]
pub struct Descriptor(u64);

impl Debug for Descriptor {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "Descriptor({:#018x})", self.0)
    }
}

impl Descriptor {
    /// The all-zero, invalid descriptor.
    pub const INVALID: Self = Self(0);

    /// Returns the raw bit pattern.
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Interprets `raw` as a descriptor, with no validation.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Classifies this descriptor, given the level it was read from.
    pub fn kind(self, level: u8) -> DescriptorKind {
        let flags = DescriptorFlags::from_bits_retain(self.0);
        if !flags.contains(DescriptorFlags::VALID) {
            DescriptorKind::Invalid
        } else if flags.contains(DescriptorFlags::TABLE_OR_PAGE) {
            if level == DEEPEST_LEVEL {
                DescriptorKind::Page
            } else {
                DescriptorKind::Table
            }
        } else {
            DescriptorKind::Block
        }
    }

    /// Returns the output address (the mapped physical address, for a block or page descriptor).
    pub const fn output_address(self) -> u64 {
        self.0 & OUTPUT_ADDRESS_MASK
    }

    /// Returns the [`TableHandle`] a table descriptor points at.
    ///
    /// This is the single auditable site (§9 "Pointer-to-table inside a descriptor") where the
    /// descriptor's payload bits are reinterpreted: sub-tables live contiguously in
    /// [`crate::table::TablePool`], one [`levels::GRANULE_SIZE`] apart, starting at pool index 0,
    /// so the output address divided by the granule size recovers the pool index directly and no
    /// linear identity scan (§4.4, §9 "Pool identity lookup") is ever required.
    pub const fn table_handle(self) -> TableHandle {
        TableHandle::from_index((self.output_address() / levels::GRANULE_SIZE) as u16)
    }

    /// Builds a table descriptor pointing at `handle`.
    pub const fn table(handle: TableHandle) -> Self {
        Self(DescriptorFlags::VALID.bits() | DescriptorFlags::TABLE_OR_PAGE.bits() | (handle.index() as u64) * levels::GRANULE_SIZE)
    }

    /// Builds a leaf (block or page) descriptor mapping `pa` with `attrs`, at `level`, for a
    /// context targeting `el` whose architecture hook supplies `xn_mask`.
    ///
    /// Asserts that `pa` is aligned to the span of `level`, per §4.5.
    pub fn leaf<H: Hooks>(pa: u64, level: u8, attrs: &RegionAttributes, el: ExceptionLevel) -> Self {
        assert!(
            levels::is_level_aligned(pa, level),
            "destination PA {pa:#x} is not aligned to the block size for level {level}"
        );

        let mut flags = DescriptorFlags::VALID | DescriptorFlags::ACCESSED;
        if level == DEEPEST_LEVEL {
            flags |= DescriptorFlags::TABLE_OR_PAGE;
        }
        if attrs.security() == Security::NonSecure {
            flags |= DescriptorFlags::NON_SECURE;
        }
        if attrs.access() == crate::attributes::AccessPermission::ReadOnly {
            flags |= DescriptorFlags::AP_READ_ONLY;
        }
        flags |= match attrs.mem_type() {
            MemoryType::Device => DescriptorFlags::SH_OUTER,
            MemoryType::Cacheable => DescriptorFlags::SH_INNER,
            MemoryType::NonCacheable => DescriptorFlags::SH_OUTER,
        };

        let mut bits = flags.bits() | pa;
        bits |= (attrs.mem_type().mair_index() as u64) << ATTR_INDEX_SHIFT & ATTR_INDEX_MASK;

        if attrs.effective_execute_never() {
            bits |= H::xn_mask(el);
        }

        Self(bits)
    }

    /// Returns a copy of this leaf descriptor with only the access-permission bit and the
    /// execute-never bit(s) rewritten, leaving the output address, memory type, shareability and
    /// NS bit exactly as they were (§4.6: the attribute mutator's second pass "rewrites the
    /// access-permission bit and execute-never bit in place").
    ///
    /// Used by [`crate::mutator::change_attributes`] instead of [`Descriptor::leaf`], since
    /// rebuilding the whole descriptor from a caller-supplied attribute word would let a
    /// `change_mem_attributes` call silently change the memory type or shareability of a mapping,
    /// which that entry point is never authorized to touch.
    pub fn with_access_and_xn<H: Hooks>(self, access: AccessPermission, execute_never: bool, el: ExceptionLevel) -> Self {
        let mut bits = self.0 & !(DescriptorFlags::AP_READ_ONLY.bits() | XN_BITS);
        if access == AccessPermission::ReadOnly {
            bits |= DescriptorFlags::AP_READ_ONLY.bits();
        }
        if execute_never {
            bits |= H::xn_mask(el);
        }
        Self(bits)
    }
}
