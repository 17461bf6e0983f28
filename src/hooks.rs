// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The architecture hook interface the engine consumes (§6 "Engine-to-architecture interface
//! (consumed hooks)").
//!
//! The engine never programs MMU control registers or issues cache maintenance directly; it only
//! calls through a [`Hooks`] implementation for the five operations the builder, unmapper and
//! attribute mutator need. Production code parameterizes a [`crate::TranslationContext`] on
//! [`Aarch64Hooks`]; tests parameterize on [`FakeHooks`] so the recursive algorithms can be
//! exercised without real hardware, mirroring the `fakes` feature of the sibling `arm-sysregs`
//! crate this engine is drawn from.

/// The exception level a translation regime, or a TLB invalidation, applies to.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum ExceptionLevel {
    /// EL0, unprivileged.
    El0 = 0,
    /// EL1, the usual kernel level.
    El1 = 1,
    /// EL2, the hypervisor level.
    El2 = 2,
    /// EL3, the secure monitor level.
    El3 = 3,
}

/// The architecture operations the engine consumes.
///
/// All methods are associated functions rather than taking `&self`: there is exactly one
/// architecture underneath a given build, so instances of `Hooks` implementations are
/// zero-sized marker types used only to pick which implementation a [`crate::TranslationContext`]
/// is generic over.
pub trait Hooks {
    /// Broadcasts a TLB invalidation for one virtual address, for the given exception level's
    /// translation regime.
    fn invalidate_tlb_by_va(va: u64, el: ExceptionLevel);

    /// Issues a data synchronization barrier across the inner-shareable domain, completing any
    /// outstanding TLB maintenance.
    fn tlb_sync();

    /// Returns the exception level the calling code is currently executing at.
    fn current_exception_level() -> ExceptionLevel;

    /// Returns the execute-never bit(s) that must be set in a descriptor to forbid instruction
    /// fetch under the given exception level's translation regime.
    fn xn_mask(el: ExceptionLevel) -> u64;

    /// Returns the maximum physical address width, in bits, supported by the current CPU.
    fn max_supported_pa_bits() -> u32;
}

/// [`Hooks`] implementation backed by real `tlbi`/`dsb`/`mrs` instructions.
///
/// Only compiled for `aarch64` targets; hosts building this crate for its test suite use
/// [`FakeHooks`] instead.
#[cfg(all(target_arch = "aarch64", not(test)))]
pub struct Aarch64Hooks;

#[cfg(all(target_arch = "aarch64", not(test)))]
impl Hooks for Aarch64Hooks {
    fn invalidate_tlb_by_va(va: u64, el: ExceptionLevel) {
        use core::arch::asm;
        let page = va >> crate::levels::GRANULE_SHIFT;
        // SAFETY: `tlbi` does not violate safe Rust guarantees; it only affects address
        // translation, which is invisible to the Rust abstract machine.
        unsafe {
            match el {
                ExceptionLevel::El1 => asm!("tlbi vaae1is, {0}", in(reg) page, options(nostack)),
                ExceptionLevel::El2 => asm!("tlbi vae2is, {0}", in(reg) page, options(nostack)),
                ExceptionLevel::El3 => asm!("tlbi vae3is, {0}", in(reg) page, options(nostack)),
                ExceptionLevel::El0 => asm!("tlbi vaae1is, {0}", in(reg) page, options(nostack)),
            }
        }
    }

    fn tlb_sync() {
        use core::arch::asm;
        // SAFETY: `dsb` does not violate safe Rust guarantees.
        unsafe {
            asm!("dsb ish", options(nostack));
        }
    }

    fn current_exception_level() -> ExceptionLevel {
        use core::arch::asm;
        let current_el: u64;
        // SAFETY: reading `CurrentEL` has no side effects.
        unsafe {
            asm!("mrs {0}, CurrentEL", out(reg) current_el, options(nostack, nomem));
        }
        match (current_el >> 2) & 0b11 {
            0 => ExceptionLevel::El0,
            1 => ExceptionLevel::El1,
            2 => ExceptionLevel::El2,
            _ => ExceptionLevel::El3,
        }
    }

    fn xn_mask(el: ExceptionLevel) -> u64 {
        const UXN: u64 = 1 << 54;
        const PXN: u64 = 1 << 53;
        match el {
            // Regimes with only one privilege level use UXN as the sole execute-never bit; PXN
            // is reserved. Regimes with two privilege levels set both so that execution is
            // forbidden regardless of which privilege level would otherwise run the fetch.
            ExceptionLevel::El2 | ExceptionLevel::El3 => UXN,
            ExceptionLevel::El0 | ExceptionLevel::El1 => UXN | PXN,
        }
    }

    fn max_supported_pa_bits() -> u32 {
        use core::arch::asm;
        let mmfr0: u64;
        // SAFETY: reading `ID_AA64MMFR0_EL1` has no side effects.
        unsafe {
            asm!("mrs {0}, ID_AA64MMFR0_EL1", out(reg) mmfr0, options(nostack, nomem));
        }
        match mmfr0 & 0b1111 {
            0b0000 => 32,
            0b0001 => 36,
            0b0010 => 40,
            0b0011 => 42,
            0b0100 => 44,
            0b0101 => 48,
            0b0110 => 52,
            _ => 48,
        }
    }
}

/// Fixed capacity of the invalidation log kept by [`FakeHooks`].
const FAKE_LOG_CAPACITY: usize = 64;

/// A recorded call to [`Hooks::invalidate_tlb_by_va`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RecordedInvalidation {
    /// The virtual address that was invalidated.
    pub va: u64,
    /// The exception level the invalidation was issued for.
    pub el: ExceptionLevel,
}

struct FakeHooksState {
    log: arrayvec::ArrayVec<RecordedInvalidation, FAKE_LOG_CAPACITY>,
    sync_count: u32,
    max_supported_pa_bits: u32,
}

impl FakeHooksState {
    const fn new() -> Self {
        Self {
            log: arrayvec::ArrayVec::new_const(),
            sync_count: 0,
            max_supported_pa_bits: 48,
        }
    }
}

static FAKE_HOOKS_STATE: spin::mutex::SpinMutex<FakeHooksState> =
    spin::mutex::SpinMutex::new(FakeHooksState::new());

/// Serializes tests that touch [`FakeHooks`]' shared state, since `cargo test` runs tests on
/// multiple threads within one process but `FakeHooks` is a single process-wide fake, like the
/// `arm-sysregs` crate's own `fakes` feature.
#[cfg(any(test, feature = "fakes"))]
static FAKE_HOOKS_TEST_LOCK: spin::mutex::SpinMutex<()> = spin::mutex::SpinMutex::new(());

/// Software [`Hooks`] implementation used by this crate's own tests, and available to downstream
/// crates under the `fakes` feature so that they can exercise their own use of the engine without
/// real hardware.
#[cfg(any(test, feature = "fakes"))]
pub struct FakeHooks;

#[cfg(any(test, feature = "fakes"))]
impl FakeHooks {
    /// Acquires the lock every test touching `FakeHooks` should hold for its duration.
    pub fn lock_for_test() -> spin::mutex::SpinMutexGuard<'static, ()> {
        FAKE_HOOKS_TEST_LOCK.lock()
    }

    /// Clears the invalidation log and resets the simulated maximum PA width to 48 bits.
    pub fn reset() {
        let mut state = FAKE_HOOKS_STATE.lock();
        state.log.clear();
        state.sync_count = 0;
        state.max_supported_pa_bits = 48;
    }

    /// Returns every invalidation recorded since the last [`FakeHooks::reset`].
    pub fn invalidations() -> arrayvec::ArrayVec<RecordedInvalidation, FAKE_LOG_CAPACITY> {
        FAKE_HOOKS_STATE.lock().log.clone()
    }

    /// Returns the number of times [`Hooks::tlb_sync`] has been called since the last
    /// [`FakeHooks::reset`].
    pub fn sync_count() -> u32 {
        FAKE_HOOKS_STATE.lock().sync_count
    }

    /// Overrides the simulated maximum supported PA width, for testing contexts configured near
    /// that limit.
    pub fn set_max_supported_pa_bits(bits: u32) {
        FAKE_HOOKS_STATE.lock().max_supported_pa_bits = bits;
    }
}

#[cfg(any(test, feature = "fakes"))]
impl Hooks for FakeHooks {
    fn invalidate_tlb_by_va(va: u64, el: ExceptionLevel) {
        let mut state = FAKE_HOOKS_STATE.lock();
        // A full log is a test-harness sizing problem, not something the engine should ever see;
        // silently dropping the oldest entry would hide a real bug, so we just stop recording.
        let _ = state.log.try_push(RecordedInvalidation { va, el });
    }

    fn tlb_sync() {
        FAKE_HOOKS_STATE.lock().sync_count += 1;
    }

    fn current_exception_level() -> ExceptionLevel {
        ExceptionLevel::El1
    }

    fn xn_mask(el: ExceptionLevel) -> u64 {
        const UXN: u64 = 1 << 54;
        const PXN: u64 = 1 << 53;
        match el {
            ExceptionLevel::El2 | ExceptionLevel::El3 => UXN,
            ExceptionLevel::El0 | ExceptionLevel::El1 => UXN | PXN,
        }
    }

    fn max_supported_pa_bits() -> u32 {
        FAKE_HOOKS_STATE.lock().max_supported_pa_bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_hooks_record_invalidations() {
        let _guard = FakeHooks::lock_for_test();
        FakeHooks::reset();
        FakeHooks::invalidate_tlb_by_va(0x1000, ExceptionLevel::El1);
        FakeHooks::invalidate_tlb_by_va(0x2000, ExceptionLevel::El1);
        FakeHooks::tlb_sync();
        let log = FakeHooks::invalidations();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].va, 0x1000);
        assert_eq!(log[1].va, 0x2000);
        assert_eq!(FakeHooks::sync_count(), 1);
    }

    #[test]
    fn fake_hooks_reset_clears_state() {
        let _guard = FakeHooks::lock_for_test();
        FakeHooks::reset();
        FakeHooks::invalidate_tlb_by_va(0x3000, ExceptionLevel::El3);
        FakeHooks::reset();
        assert!(FakeHooks::invalidations().is_empty());
        assert_eq!(FakeHooks::sync_count(), 0);
    }
}
