// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The region list manager (§4.1): validates and stores the sorted list of requested mappings.

use crate::{attributes::RegionAttributes, error::XlatError, levels::GRANULE_SIZE};
use arrayvec::ArrayVec;

/// One requested mapping (§3 "Region record").
#[derive(Clone, Copy, Debug)]
pub struct Region {
    base_pa: u64,
    base_va: u64,
    size: u64,
    attrs: RegionAttributes,
    granularity: u64,
}

impl Region {
    /// Creates a new region record. This only packages the fields; alignment, bounds and overlap
    /// checking happen in [`RegionList::add_static`] and [`RegionList::add_dynamic`], since they
    /// require knowledge of the context's configured limits and the rest of the region list.
    pub fn new(base_pa: u64, base_va: u64, size: u64, attrs: RegionAttributes, granularity: u64) -> Self {
        Self {
            base_pa,
            base_va,
            size,
            attrs,
            granularity,
        }
    }

    /// The physical base address.
    pub const fn base_pa(&self) -> u64 {
        self.base_pa
    }

    /// The virtual base address.
    pub const fn base_va(&self) -> u64 {
        self.base_va
    }

    /// The size in bytes.
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// The attribute word.
    pub const fn attrs(&self) -> &RegionAttributes {
        &self.attrs
    }

    /// The finest block size the builder must split this region down to.
    pub const fn granularity(&self) -> u64 {
        self.granularity
    }

    /// The virtual address of the last byte of the region.
    pub const fn end_va(&self) -> u64 {
        self.base_va + self.size - 1
    }

    /// The physical address of the last byte of the region.
    pub const fn end_pa(&self) -> u64 {
        self.base_pa + self.size - 1
    }

    /// The constant `VA - PA` offset of this region, as a signed value wide enough that it never
    /// overflows regardless of which address is larger.
    fn va_pa_offset(&self) -> i128 {
        self.base_va as i128 - self.base_pa as i128
    }

    /// Whether this region's VA range fully contains `other`'s (or they are identical).
    fn va_contains(&self, other: &Region) -> bool {
        self.base_va <= other.base_va && other.end_va() <= self.end_va()
    }

    /// Whether this region's VA range and `other`'s are completely disjoint.
    fn va_disjoint(&self, other: &Region) -> bool {
        self.end_va() < other.base_va || other.end_va() < self.base_va
    }

    /// Whether this region's PA range and `other`'s are completely disjoint.
    fn pa_disjoint(&self, other: &Region) -> bool {
        self.end_pa() < other.base_pa || other.end_pa() < self.base_pa
    }

    /// Whether this region and `other` have exactly the same base and size.
    fn is_same_region(&self, other: &Region) -> bool {
        self.base_va == other.base_va && self.size == other.size
    }

    /// Whether this region's VA range falls entirely within `[va_lo, va_hi]`.
    fn va_within(&self, va_lo: u64, va_hi: u64) -> bool {
        va_lo <= self.base_va && self.end_va() <= va_hi
    }

    /// Replaces the stored access permission and executability, keeping memory type, security
    /// state and the dynamic flag unchanged.
    ///
    /// Used by [`RegionList::update_attributes_in_range`] to keep a region's record in sync with
    /// what [`crate::context::TranslationContext::change_mem_attributes`] wrote into the tree.
    fn set_access_and_executability(
        &mut self,
        access: crate::attributes::AccessPermission,
        exec: crate::attributes::Executability,
    ) -> Result<(), XlatError> {
        self.attrs = self.attrs.with_access_and_executability(access, exec)?;
        Ok(())
    }
}

/// The sorted, bounded list of regions a [`crate::TranslationContext`] owns.
///
/// Sorted first by ascending end-VA, then by ascending size for equal end-VA, so that outer
/// (larger or later-ending) regions are built into the tree after inner ones: the builder's
/// "don't overwrite a non-invalid descriptor" rule then causes inner regions to retain their
/// finer-grained mappings when a large outer region is walked over them (§4.1 "Sort order
/// rationale").
pub struct RegionList<const N: usize> {
    regions: ArrayVec<Region, N>,
}

impl<const N: usize> RegionList<N> {
    /// Creates an empty region list.
    pub const fn new() -> Self {
        Self {
            regions: ArrayVec::new_const(),
        }
    }

    /// Iterates over the regions in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter()
    }

    /// The number of regions currently stored.
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// The maximum `base_va + size - 1` across all current regions, or 0 if there are none.
    pub fn max_va(&self) -> u64 {
        self.regions.iter().map(Region::end_va).max().unwrap_or(0)
    }

    /// The maximum `base_pa + size - 1` across all current regions, or 0 if there are none.
    pub fn max_pa(&self) -> u64 {
        self.regions.iter().map(Region::end_pa).max().unwrap_or(0)
    }

    /// Validates `candidate` against alignment, address-space bounds, and the overlap rules of
    /// §4.1, without inserting it.
    fn validate(&self, candidate: &Region, max_va: u64, max_pa: u64) -> Result<(), XlatError> {
        if candidate.size == 0 {
            return Err(XlatError::InvalidArgument {
                reason: "region size must not be zero",
            });
        }
        let aligned = |value: u64| value % GRANULE_SIZE == 0;
        if !aligned(candidate.base_pa)
            || !aligned(candidate.base_va)
            || !aligned(candidate.size)
            || !aligned(candidate.granularity)
        {
            return Err(XlatError::InvalidArgument {
                reason: "base PA, base VA, size and granularity must all be page-aligned",
            });
        }
        if candidate.granularity == 0 {
            return Err(XlatError::InvalidArgument {
                reason: "granularity must not be zero",
            });
        }

        candidate
            .base_va
            .checked_add(candidate.size - 1)
            .ok_or(XlatError::OutOfRange {
                address: candidate.base_va,
                limit: max_va,
            })?;
        candidate
            .base_pa
            .checked_add(candidate.size - 1)
            .ok_or(XlatError::OutOfRange {
                address: candidate.base_pa,
                limit: max_pa,
            })?;
        if candidate.end_va() > max_va {
            return Err(XlatError::OutOfRange {
                address: candidate.end_va(),
                limit: max_va,
            });
        }
        if candidate.end_pa() > max_pa {
            return Err(XlatError::OutOfRange {
                address: candidate.end_pa(),
                limit: max_pa,
            });
        }

        if self.regions.len() == self.regions.capacity() {
            return Err(XlatError::OutOfMemory {
                reason: "region list is full",
            });
        }

        for existing in &self.regions {
            if candidate.attrs.is_dynamic() || existing.attrs.is_dynamic() {
                // Dynamic regions may never overlap anything, in either VA or PA.
                if !candidate.va_disjoint(existing) || !candidate.pa_disjoint(existing) {
                    return Err(XlatError::PermissionDenied {
                        reason: "dynamic regions may not overlap any other region",
                    });
                }
                continue;
            }

            let va_contained = existing.va_contains(candidate) || candidate.va_contains(existing);
            let fully_separate = candidate.va_disjoint(existing) && candidate.pa_disjoint(existing);
            if va_contained {
                if candidate.is_same_region(existing) {
                    return Err(XlatError::PermissionDenied {
                        reason: "an identical region is already present",
                    });
                }
                if candidate.va_pa_offset() != existing.va_pa_offset() {
                    return Err(XlatError::PermissionDenied {
                        reason: "nested regions must share the same VA-PA offset",
                    });
                }
            } else if !fully_separate {
                return Err(XlatError::PermissionDenied {
                    reason: "regions must be either fully nested or fully separate in both VA and PA",
                });
            }
        }

        Ok(())
    }

    /// Inserts `region`, keeping the list's sort order.
    fn insert_sorted(&mut self, region: Region) {
        let position = self
            .regions
            .iter()
            .position(|existing| {
                (existing.end_va(), existing.size) > (region.end_va(), region.size)
            })
            .unwrap_or(self.regions.len());
        self.regions.insert(position, region);
    }

    /// Validates and inserts a region that will never be added after initialization.
    ///
    /// Returns [`XlatError`] on any validation failure; per §7, the caller of a pre-init
    /// `add_static` treats that as a programming bug (typically via `.expect()`), since the
    /// system cannot proceed without a correct memory map.
    pub fn add_static(&mut self, region: Region, max_va: u64, max_pa: u64) -> Result<(), XlatError> {
        self.validate(&region, max_va, max_pa)?;
        log::debug!(
            "Adding static region VA {:#x}..={:#x} -> PA {:#x}",
            region.base_va(),
            region.end_va(),
            region.base_pa(),
        );
        self.insert_sorted(region);
        Ok(())
    }

    /// Validates and inserts a region flagged as dynamic. Does not itself drive the builder or
    /// unmapper; that orchestration lives in [`crate::TranslationContext::add_dynamic`], which is
    /// the `RegionList`'s caller.
    #[cfg(feature = "dynamic-regions")]
    pub fn prepare_dynamic(
        &self,
        mut region: Region,
        max_va: u64,
        max_pa: u64,
    ) -> Result<Region, XlatError> {
        region.attrs = region.attrs.with_dynamic();
        self.validate(&region, max_va, max_pa)?;
        Ok(region)
    }

    /// Inserts a region already prepared by [`RegionList::prepare_dynamic`].
    #[cfg(feature = "dynamic-regions")]
    pub fn insert_dynamic(&mut self, region: Region) {
        log::debug!(
            "Adding dynamic region VA {:#x}..={:#x} -> PA {:#x}",
            region.base_va(),
            region.end_va(),
            region.base_pa(),
        );
        self.insert_sorted(region);
    }

    /// Updates the stored access permission and executability of every region fully contained in
    /// `[va_lo, va_hi]`, mirroring what [`crate::mutator::change_attributes`] just wrote into the
    /// tree for that same range (§8 "Region records stay authoritative").
    ///
    /// A region only partially overlapping `[va_lo, va_hi]` is left untouched: since a `Region`
    /// holds a single attribute word, partial overlap would mean no single word could describe it
    /// accurately, and the mutator itself already refuses any range that isn't backed by whole,
    /// exactly-aligned page leaves, so no region can legitimately straddle the boundary once the
    /// tree-level change has succeeded.
    pub(crate) fn update_attributes_in_range(
        &mut self,
        va_lo: u64,
        va_hi: u64,
        access: crate::attributes::AccessPermission,
        exec: crate::attributes::Executability,
    ) -> Result<(), XlatError> {
        for region in &mut self.regions {
            if region.va_within(va_lo, va_hi) {
                region.set_access_and_executability(access, exec)?;
            }
        }
        Ok(())
    }

    /// Locates a dynamic region by exact match of `(base_va, size)` and removes it from the list.
    ///
    /// Returns [`XlatError::NotFound`] if no such region exists, or
    /// [`XlatError::PermissionDenied`] if it exists but is not dynamic.
    #[cfg(feature = "dynamic-regions")]
    pub fn remove_dynamic(&mut self, base_va: u64, size: u64) -> Result<Region, XlatError> {
        let position = self
            .regions
            .iter()
            .position(|region| region.base_va == base_va && region.size == size)
            .ok_or(XlatError::NotFound { base_va, size })?;
        if !self.regions[position].attrs.is_dynamic() {
            return Err(XlatError::PermissionDenied {
                reason: "only dynamic regions may be removed",
            });
        }
        log::debug!("Removing dynamic region VA {base_va:#x}..{:#x}", base_va + size);
        Ok(self.regions.remove(position))
    }
}

impl<const N: usize> Default for RegionList<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{AccessPermission, Executability, MemoryType, Security};

    fn normal_rw() -> RegionAttributes {
        RegionAttributes::new(
            MemoryType::Cacheable,
            AccessPermission::ReadWrite,
            Security::NonSecure,
            Executability::ExecuteNever,
        )
        .unwrap()
    }

    const MAX_VA: u64 = 0xFFFF_FFFF;
    const MAX_PA: u64 = 0xFFFF_FFFF;

    #[test]
    fn sorted_by_end_va_then_size() {
        let mut list: RegionList<8> = RegionList::new();
        list.add_static(
            Region::new(0x1000, 0x1000, 0x1000, normal_rw(), 0x1000),
            MAX_VA,
            MAX_PA,
        )
        .unwrap();
        list.add_static(
            Region::new(0x0, 0x0, 0x1000, normal_rw(), 0x1000),
            MAX_VA,
            MAX_PA,
        )
        .unwrap();
        let ends: Vec<u64> = list.iter().map(Region::end_va).collect();
        assert_eq!(ends, vec![0xfff, 0x1fff]);
    }

    #[test]
    fn rejects_partial_va_overlap() {
        let mut list: RegionList<8> = RegionList::new();
        list.add_static(
            Region::new(0x0, 0x0, 0x2000, normal_rw(), 0x1000),
            MAX_VA,
            MAX_PA,
        )
        .unwrap();
        let result = list.add_static(
            Region::new(0x1_0000, 0x1000, 0x2000, normal_rw(), 0x1000),
            MAX_VA,
            MAX_PA,
        );
        assert!(result.is_err());
    }

    #[test]
    fn rejects_nesting_with_different_offset() {
        let mut list: RegionList<8> = RegionList::new();
        list.add_static(
            Region::new(0x4000_0000, 0x4000_0000, 0x20_0000, normal_rw(), 0x20_0000),
            MAX_VA,
            MAX_PA,
        )
        .unwrap();
        // Same VA range as a sub-window of the above, but backed by different physical memory:
        // the VA-PA offsets differ, so this must be rejected even though it nests in VA.
        let result = list.add_static(
            Region::new(0x0900_0000, 0x4000_1000, 0x1000, normal_rw(), 0x1000),
            MAX_VA,
            MAX_PA,
        );
        assert_eq!(
            result,
            Err(XlatError::PermissionDenied {
                reason: "nested regions must share the same VA-PA offset",
            })
        );
    }

    #[test]
    fn accepts_properly_nested_region() {
        let mut list: RegionList<8> = RegionList::new();
        list.add_static(
            Region::new(0x4000_0000, 0x4000_0000, 0x20_0000, normal_rw(), 0x20_0000),
            MAX_VA,
            MAX_PA,
        )
        .unwrap();
        let result = list.add_static(
            Region::new(0x4000_1000, 0x4000_1000, 0x1000, normal_rw(), 0x1000),
            MAX_VA,
            MAX_PA,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn rejects_identical_region() {
        let mut list: RegionList<8> = RegionList::new();
        let region = Region::new(0x1000, 0x1000, 0x1000, normal_rw(), 0x1000);
        list.add_static(region, MAX_VA, MAX_PA).unwrap();
        let result = list.add_static(region, MAX_VA, MAX_PA);
        assert_eq!(
            result,
            Err(XlatError::PermissionDenied {
                reason: "an identical region is already present",
            })
        );
    }

    #[cfg(feature = "dynamic-regions")]
    #[test]
    fn dynamic_region_never_overlaps() {
        let mut list: RegionList<8> = RegionList::new();
        list.add_static(
            Region::new(0x4000_0000, 0x4000_0000, 0x20_0000, normal_rw(), 0x20_0000),
            MAX_VA,
            MAX_PA,
        )
        .unwrap();
        let prepared = list.prepare_dynamic(
            Region::new(0x4000_1000, 0x4000_1000, 0x1000, normal_rw(), 0x1000),
            MAX_VA,
            MAX_PA,
        );
        assert_eq!(
            prepared.err(),
            Some(XlatError::PermissionDenied {
                reason: "dynamic regions may not overlap any other region",
            })
        );
    }

    #[cfg(feature = "dynamic-regions")]
    #[test]
    fn remove_dynamic_rejects_static_region() {
        let mut list: RegionList<8> = RegionList::new();
        list.add_static(
            Region::new(0x1000, 0x1000, 0x1000, normal_rw(), 0x1000),
            MAX_VA,
            MAX_PA,
        )
        .unwrap();
        let result = list.remove_dynamic(0x1000, 0x1000);
        assert_eq!(
            result.err(),
            Some(XlatError::PermissionDenied {
                reason: "only dynamic regions may be removed",
            })
        );
    }

    #[cfg(feature = "dynamic-regions")]
    #[test]
    fn remove_dynamic_not_found() {
        let mut list: RegionList<8> = RegionList::new();
        let result = list.remove_dynamic(0x1000, 0x1000);
        assert_eq!(
            result.err(),
            Some(XlatError::NotFound {
                base_va: 0x1000,
                size: 0x1000,
            })
        );
    }

    #[test]
    fn region_ending_at_configured_max_va_succeeds() {
        let mut list: RegionList<8> = RegionList::new();
        let size = MAX_VA + 1 - 0x1000;
        let result = list.add_static(Region::new(0x1000, 0x1000, size, normal_rw(), 0x1000), MAX_VA, MAX_PA);
        assert!(result.is_ok());
        assert_eq!(list.max_va(), MAX_VA);
    }

    #[cfg(feature = "dynamic-regions")]
    #[test]
    fn static_region_spanning_the_whole_va_space_rejects_any_later_dynamic_add() {
        let mut list: RegionList<8> = RegionList::new();
        list.add_static(Region::new(0x0, 0x0, MAX_VA + 1, normal_rw(), 0x1000), MAX_VA, MAX_PA)
            .unwrap();
        // A well-formed, in-bounds candidate still fails: the static region above already covers
        // every VA, so any dynamic region (which may never overlap anything) is rejected.
        let prepared = list.prepare_dynamic(
            Region::new(0x2000_0000, 0x1000, 0x1000, normal_rw(), 0x1000),
            MAX_VA,
            MAX_PA,
        );
        assert_eq!(
            prepared.err(),
            Some(XlatError::PermissionDenied {
                reason: "dynamic regions may not overlap any other region",
            })
        );
    }

    #[test]
    fn list_full_is_out_of_memory() {
        let mut list: RegionList<1> = RegionList::new();
        list.add_static(
            Region::new(0x0, 0x0, 0x1000, normal_rw(), 0x1000),
            MAX_VA,
            MAX_PA,
        )
        .unwrap();
        let result = list.add_static(
            Region::new(0x1_0000, 0x1_0000, 0x1000, normal_rw(), 0x1000),
            MAX_VA,
            MAX_PA,
        );
        assert_eq!(
            result,
            Err(XlatError::OutOfMemory {
                reason: "region list is full",
            })
        );
    }
}
