// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! [`TranslationContext`]: the top-level type that owns one region list, base table and table
//! pool, and orchestrates the builder, unmapper and attribute mutator against them (§5 "Context
//! lifecycle").

use core::marker::PhantomData;

use crate::{
    attributes::RegionAttributes,
    builder,
    error::{XlatError, XlatResult},
    hooks::{ExceptionLevel, Hooks},
    levels,
    mutator,
    region::{Region, RegionList},
    table::{PageTable, TablePool},
};
#[cfg(feature = "dynamic-regions")]
use crate::unmapper;

/// Computes `(1 << bits) - 1` without overflowing when `bits == 64`.
const fn address_space_limit(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Owns a complete translation regime: the sorted region list, the base table, and the pool of
/// sub-tables the builder allocates from.
///
/// Generic over the [`Hooks`] implementation so the same code builds and walks tables whether it
/// is running on real hardware or under test with [`crate::hooks::FakeHooks`], over `REGIONS`, the
/// fixed capacity of the region list, and over `TABLES`, the fixed capacity of the sub-table pool.
/// Both capacities are compile-time constants (§4.4 "Table pool is fixed-size"): this crate never
/// allocates, so every resource a context will ever need is reserved in its own storage.
pub struct TranslationContext<H: Hooks, const REGIONS: usize, const TABLES: usize> {
    regions: RegionList<REGIONS>,
    base_table: PageTable,
    pool: TablePool<TABLES>,
    el: ExceptionLevel,
    va_bits: u32,
    pa_bits: u32,
    max_va: u64,
    max_pa: u64,
    base_level: u8,
    base_entry_count: usize,
    initialized: bool,
    _hooks: PhantomData<H>,
}

impl<H: Hooks, const REGIONS: usize, const TABLES: usize> TranslationContext<H, REGIONS, TABLES> {
    /// Creates a context targeting `el`'s translation regime, with `va_bits` bits of virtual
    /// address space and `pa_bits` bits of physical address space.
    ///
    /// Does not yet build anything: call [`TranslationContext::add_static`] to populate the
    /// region list, then [`TranslationContext::init`] to build the base table and every static
    /// region into it.
    pub const fn new(el: ExceptionLevel, va_bits: u32, pa_bits: u32) -> Self {
        let (base_level, base_entry_count) = levels::base_level_for_va_bits(va_bits);
        Self {
            regions: RegionList::new(),
            base_table: PageTable::EMPTY,
            pool: TablePool::new(),
            el,
            va_bits,
            pa_bits,
            max_va: address_space_limit(va_bits),
            max_pa: address_space_limit(pa_bits),
            base_level,
            base_entry_count,
            initialized: false,
            _hooks: PhantomData,
        }
    }

    /// Registers a region that is never added or removed after [`TranslationContext::init`].
    ///
    /// Must be called before `init`; returns [`XlatError::PermissionDenied`] otherwise.
    pub fn add_static(
        &mut self,
        base_pa: u64,
        base_va: u64,
        size: u64,
        attrs: RegionAttributes,
        granularity: u64,
    ) -> XlatResult<()> {
        if self.initialized {
            return Err(XlatError::PermissionDenied {
                reason: "static regions may only be added before init",
            });
        }
        let region = Region::new(base_pa, base_va, size, attrs, granularity);
        self.regions.add_static(region, self.max_va, self.max_pa)
    }

    /// Builds every registered static region into the base table.
    ///
    /// Returns [`XlatError::OutOfRange`] if `pa_bits` exceeds what [`Hooks::max_supported_pa_bits`]
    /// reports for the current CPU, and [`XlatError::OutOfMemory`] if the sub-table pool is
    /// exhausted while building (at which point the memory map the caller requested cannot be
    /// realized at all; per §7 this is treated as a fatal configuration error, not something to
    /// partially roll back, since there is no completed prior state to return to).
    pub fn init(&mut self) -> XlatResult<()> {
        let supported = H::max_supported_pa_bits();
        if self.pa_bits > supported {
            return Err(XlatError::OutOfRange {
                address: self.pa_bits as u64,
                limit: supported as u64,
            });
        }

        let regions: arrayvec::ArrayVec<Region, REGIONS> = self.regions.iter().copied().collect();
        for region in &regions {
            builder::map_region::<H, TABLES>(
                &mut self.base_table,
                &mut self.pool,
                self.base_level,
                self.base_entry_count,
                region,
                self.el,
            )
            .map_err(|_| XlatError::OutOfMemory {
                reason: "sub-table pool exhausted while building static regions",
            })?;
        }
        self.initialized = true;
        log::info!(
            "Translation context initialized: {} static region(s), VA width {}, PA width {}",
            regions.len(),
            self.va_bits,
            self.pa_bits,
        );
        Ok(())
    }

    /// Registers a region that may be removed later with [`TranslationContext::remove_dynamic`].
    ///
    /// Permitted both before and after [`TranslationContext::init`] (§4.1): before `init`, this
    /// only validates and inserts the region into the list, the same as [`TranslationContext::
    /// add_static`], and the region is built into the tree when `init` subsequently runs. After
    /// `init`, it additionally drives the builder immediately, rolling back any partial work (and
    /// issuing a DSB) if the sub-table pool is exhausted partway through.
    ///
    /// Only compiled in with the `dynamic-regions` feature (on by default): without it, the
    /// sub-table pool has no refcount bookkeeping to reclaim, so this method is absent from the
    /// type entirely rather than present but runtime-rejected (§2.1, §8 "Ambient-stack
    /// properties").
    #[cfg(feature = "dynamic-regions")]
    pub fn add_dynamic(
        &mut self,
        base_pa: u64,
        base_va: u64,
        size: u64,
        attrs: RegionAttributes,
        granularity: u64,
    ) -> XlatResult<()> {
        let candidate = Region::new(base_pa, base_va, size, attrs, granularity);
        let region = self.regions.prepare_dynamic(candidate, self.max_va, self.max_pa)?;

        if !self.initialized {
            self.regions.insert_dynamic(region);
            return Ok(());
        }

        let result = builder::map_region::<H, TABLES>(
            &mut self.base_table,
            &mut self.pool,
            self.base_level,
            self.base_entry_count,
            &region,
            self.el,
        );
        if result.is_err() {
            unmapper::unmap_region::<H, TABLES>(
                &mut self.base_table,
                &mut self.pool,
                self.base_level,
                self.base_entry_count,
                &region,
                self.el,
            );
            H::tlb_sync();
            return Err(XlatError::OutOfMemory {
                reason: "sub-table pool exhausted while building dynamic region",
            });
        }

        self.regions.insert_dynamic(region);
        H::tlb_sync();
        Ok(())
    }

    /// Tears down a region previously added with [`TranslationContext::add_dynamic`].
    #[cfg(feature = "dynamic-regions")]
    pub fn remove_dynamic(&mut self, base_va: u64, size: u64) -> XlatResult<()> {
        let region = self.regions.remove_dynamic(base_va, size)?;
        unmapper::unmap_region::<H, TABLES>(
            &mut self.base_table,
            &mut self.pool,
            self.base_level,
            self.base_entry_count,
            &region,
            self.el,
        );
        H::tlb_sync();
        Ok(())
    }

    /// Changes the attributes of every page in `[base_va, base_va + size)`, which must line up
    /// exactly with the boundaries of existing leaf descriptor(s) (§4.6).
    pub fn change_mem_attributes(&mut self, base_va: u64, size: u64, new_attrs: RegionAttributes) -> XlatResult<()> {
        if !self.initialized {
            return Err(XlatError::PermissionDenied {
                reason: "attributes may only be changed after init",
            });
        }
        mutator::change_attributes::<H, TABLES>(
            &mut self.base_table,
            &mut self.pool,
            self.base_level,
            self.base_entry_count,
            base_va,
            size,
            &new_attrs,
            self.el,
        )?;
        // Keep the region list's attribute words in sync with what the tree now holds (§8): only
        // the AP and XN bits actually changed in the descriptors, so only those two fields of the
        // matching region(s) are updated here.
        let end_va = base_va + size - 1;
        self.regions
            .update_attributes_in_range(base_va, end_va, new_attrs.access(), new_attrs.executability())
    }

    /// The physical address of the base table, for a caller that needs to program `TTBRn_ELx`.
    ///
    /// The engine itself never writes this register; programming the translation regime on is an
    /// architecture-level action outside this crate's scope (§1 "Non-goals").
    pub fn base_table_address(&self) -> u64 {
        core::ptr::addr_of!(self.base_table) as u64
    }

    /// The configured maximum virtual address this context was created with (`2^va_bits - 1`).
    ///
    /// This is the address-space *bound* every region is validated against, not the highest VA
    /// actually mapped right now; see [`TranslationContext::max_mapped_va`] for that.
    pub const fn configured_max_va(&self) -> u64 {
        self.max_va
    }

    /// The configured maximum physical address this context was created with (`2^pa_bits - 1`).
    pub const fn configured_max_pa(&self) -> u64 {
        self.max_pa
    }

    /// The highest `base_va + size - 1` across every region currently in the tree (§3
    /// "Translation context": "the actual highest VA ... currently mapped"), or 0 if none.
    ///
    /// Recomputed by a linear scan of the region list on every call rather than cached, so it is
    /// always correct after [`TranslationContext::remove_dynamic`] without needing its own
    /// bookkeeping (§4.1: "If the removed region owned the currently recorded max VA or max PA,
    /// recomputes these by a linear scan").
    pub fn max_mapped_va(&self) -> u64 {
        self.regions.max_va()
    }

    /// The highest `base_pa + size - 1` across every region currently in the tree, the "actual
    /// maximum mapped PA" §6 says the caller hands to the MMU enable routine alongside the
    /// configured max VA.
    pub fn max_mapped_pa(&self) -> u64 {
        self.regions.max_pa()
    }

    /// Whether [`TranslationContext::init`] has been called successfully.
    pub const fn is_initialized(&self) -> bool {
        self.initialized
    }
}

/// Declares a process-wide default [`TranslationContext`] behind a [`spin::Once`] and a
/// [`spin::mutex::SpinMutex`], plus a `with_context` accessor that initializes it lazily on first
/// use.
///
/// One call site per concrete translation regime a platform needs (normally one), the same way
/// this crate's sibling firmware crates pick their one concrete hardware implementation through a
/// macro rather than a runtime branch.
#[macro_export]
macro_rules! define_translation_context {
    ($module:ident, $hooks:ty, $regions:expr, $tables:expr, $el:expr, $va_bits:expr, $pa_bits:expr) => {
        mod $module {
            static CONTEXT: ::spin::Once<
                ::spin::mutex::SpinMutex<$crate::TranslationContext<$hooks, { $regions }, { $tables }>>,
            > = ::spin::Once::new();

            /// Runs `f` with exclusive access to the process-wide context, constructing it (but
            /// not calling `init` on it) the first time this is called.
            #[allow(dead_code)]
            pub fn with_context<R>(
                f: impl FnOnce(&mut $crate::TranslationContext<$hooks, { $regions }, { $tables }>) -> R,
            ) -> R {
                let context = CONTEXT.call_once(|| {
                    ::spin::mutex::SpinMutex::new($crate::TranslationContext::new($el, $va_bits, $pa_bits))
                });
                f(&mut context.lock())
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        attributes::{AccessPermission, Executability, MemoryType, Security},
        descriptor::DescriptorKind,
        hooks::FakeHooks,
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

    fn ro_device() -> RegionAttributes {
        RegionAttributes::new(
            MemoryType::Device,
            AccessPermission::ReadOnly,
            Security::NonSecure,
            Executability::ExecuteNever,
        )
        .unwrap()
    }

    #[test]
    fn init_builds_every_static_region() {
        let _guard = FakeHooks::lock_for_test();
        let mut context: TranslationContext<FakeHooks, 4, 8> =
            TranslationContext::new(ExceptionLevel::El1, 32, 32);
        context
            .add_static(0x0900_0000, 0x0900_0000, 0x1000, ro_device(), 0x1000)
            .unwrap();
        // Exactly one base-table entry's span (1 GiB at level 1), so it lands as a block directly
        // in the base table rather than spawning an intermediate sub-table.
        context
            .add_static(0x4000_0000, 0x4000_0000, 0x4000_0000, rw_normal(), 0x4000_0000)
            .unwrap();
        context.init().unwrap();
        assert!(context.is_initialized());

        let index = levels::level_index(0x4000_0000, 1);
        assert_eq!(context.base_table.get(index).kind(1), DescriptorKind::Block);
    }

    #[test]
    fn add_static_after_init_is_rejected() {
        let _guard = FakeHooks::lock_for_test();
        let mut context: TranslationContext<FakeHooks, 4, 8> =
            TranslationContext::new(ExceptionLevel::El1, 32, 32);
        context.init().unwrap();
        let result = context.add_static(0x1000, 0x1000, 0x1000, rw_normal(), 0x1000);
        assert_eq!(
            result,
            Err(XlatError::PermissionDenied {
                reason: "static regions may only be added before init",
            })
        );
    }

    #[cfg(feature = "dynamic-regions")]
    #[test]
    fn add_dynamic_then_remove_dynamic_round_trips() {
        let _guard = FakeHooks::lock_for_test();
        FakeHooks::reset();
        let mut context: TranslationContext<FakeHooks, 4, 8> =
            TranslationContext::new(ExceptionLevel::El1, 32, 32);
        context.init().unwrap();
        context
            .add_dynamic(0x5000_0000, 0x5000_0000, 0x1000, rw_normal(), 0x1000)
            .unwrap();
        // §5 "Ordering guarantees": add_dynamic issues its own DSB internally.
        assert_eq!(FakeHooks::sync_count(), 1);

        let index = levels::level_index(0x5000_0000, 3);
        let l2_index = levels::level_index(0x5000_0000, 2);
        let l1_index = levels::level_index(0x5000_0000, 1);
        let l1_handle = context.base_table.get(l1_index).table_handle();
        let l2_handle = context.pool.table(l1_handle).get(l2_index).table_handle();
        assert_eq!(context.pool.table(l2_handle).get(index).kind(3), DescriptorKind::Page);

        context.remove_dynamic(0x5000_0000, 0x1000).unwrap();
        assert_eq!(context.base_table.get(l1_index).kind(1), DescriptorKind::Invalid);
        // §4.3: "At the end of a top-level unmap, the caller must drive the external TLB DSB
        // hook" — `remove_dynamic` does this itself rather than leaving it to its caller.
        assert_eq!(FakeHooks::sync_count(), 2);
    }

    #[cfg(feature = "dynamic-regions")]
    #[test]
    fn add_dynamic_before_init_only_inserts_and_is_built_by_init() {
        let _guard = FakeHooks::lock_for_test();
        FakeHooks::reset();
        let mut context: TranslationContext<FakeHooks, 4, 8> =
            TranslationContext::new(ExceptionLevel::El1, 32, 32);
        context
            .add_dynamic(0x5000_0000, 0x5000_0000, 0x1000, rw_normal(), 0x1000)
            .unwrap();
        // Not yet built into the tree, and no DSB issued: the builder only runs once `init` walks
        // the full region list (§4.1: "When initialized, also drives the builder").
        assert!(!context.is_initialized());
        let l1_index = levels::level_index(0x5000_0000, 1);
        assert_eq!(context.base_table.get(l1_index).kind(1), DescriptorKind::Invalid);
        assert_eq!(FakeHooks::sync_count(), 0);

        context.init().unwrap();
        assert_ne!(context.base_table.get(l1_index).kind(1), DescriptorKind::Invalid);
    }

    #[cfg(feature = "dynamic-regions")]
    #[test]
    fn add_dynamic_rejects_pool_exhaustion_without_partial_state() {
        let _guard = FakeHooks::lock_for_test();
        FakeHooks::reset();
        // Only one sub-table available, so a region needing two levels of new sub-tables fails.
        let mut context: TranslationContext<FakeHooks, 4, 1> =
            TranslationContext::new(ExceptionLevel::El1, 32, 32);
        context.init().unwrap();
        let result = context.add_dynamic(0x6000_0000, 0x6000_0000, 0x1000, rw_normal(), 0x1000);
        assert_eq!(
            result,
            Err(XlatError::OutOfMemory {
                reason: "sub-table pool exhausted while building dynamic region",
            })
        );
        let l1_index = levels::level_index(0x6000_0000, 1);
        assert_eq!(context.base_table.get(l1_index).kind(1), DescriptorKind::Invalid);
        // The rollback path drives the unmapper just like `remove_dynamic`, so it must also
        // complete with a DSB before returning.
        assert_eq!(FakeHooks::sync_count(), 1);
    }

    #[cfg(feature = "dynamic-regions")]
    #[test]
    fn max_mapped_va_and_pa_track_the_region_list_and_survive_removal() {
        let _guard = FakeHooks::lock_for_test();
        let mut context: TranslationContext<FakeHooks, 4, 8> =
            TranslationContext::new(ExceptionLevel::El1, 32, 32);
        context
            .add_static(0x4000_0000, 0x4000_0000, 0x1000, rw_normal(), 0x1000)
            .unwrap();
        context.init().unwrap();
        assert_eq!(context.max_mapped_va(), 0x4000_0fff);
        assert_eq!(context.max_mapped_pa(), 0x4000_0fff);
        // Configured bounds come from the 32-bit VA/PA width given to `new`, independent of what
        // is actually mapped.
        assert_eq!(context.configured_max_va(), 0xffff_ffff);
        assert_eq!(context.configured_max_pa(), 0xffff_ffff);

        context
            .add_dynamic(0x5000_0000, 0x5000_0000, 0x1000, rw_normal(), 0x1000)
            .unwrap();
        assert_eq!(context.max_mapped_va(), 0x5000_0fff);

        context.remove_dynamic(0x5000_0000, 0x1000).unwrap();
        assert_eq!(context.max_mapped_va(), 0x4000_0fff);
        assert_eq!(context.max_mapped_pa(), 0x4000_0fff);
    }

    #[test]
    fn change_mem_attributes_after_init() {
        let _guard = FakeHooks::lock_for_test();
        let mut context: TranslationContext<FakeHooks, 4, 8> =
            TranslationContext::new(ExceptionLevel::El1, 32, 32);
        // Page granularity, so it lands as a page descriptor the mutator can patch in place; a
        // block-mapped range is rejected outright (see `mutator::tests::
        // rejects_range_mapped_by_an_exactly_matching_block`).
        context
            .add_static(0x4000_0000, 0x4000_0000, 0x1000, rw_normal(), 0x1000)
            .unwrap();
        context.init().unwrap();
        context
            .change_mem_attributes(0x4000_0000, 0x1000, ro_device())
            .unwrap();

        // The region record's access permission must track what the mutator wrote into the tree
        // (§8), even though the memory type in `new_attrs` above was ignored by the mutator itself.
        let region = context.regions.iter().find(|r| r.base_va() == 0x4000_0000).unwrap();
        assert_eq!(region.attrs().access(), AccessPermission::ReadOnly);
        assert_eq!(region.attrs().mem_type(), MemoryType::Cacheable);
    }
}
