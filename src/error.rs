// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The error taxonomy returned by fallible region-list and tree operations.

use core::fmt::{self, Debug, Formatter};

/// Errors returned by the region-list manager, builder, unmapper and attribute mutator.
///
/// Pre-initialization failures from [`crate::TranslationContext::add_static`] are treated by
/// callers as programming bugs (the memory map is fixed at build time) and are typically
/// `.expect()`-ed rather than propagated; every other operation returns this type for the caller
/// to act on.
#[non_exhaustive]
#[derive(Clone, Copy, Eq, PartialEq, thiserror::Error)]
pub enum XlatError {
    /// A supplied address, size or attribute combination was not valid on its own terms (bad
    /// alignment, zero size, or an illegal attribute combination such as read-write + executable).
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// A short, static description of which validation rule was violated.
        reason: &'static str,
    },

    /// An address or range fell outside the context's configured or architectural limits, or an
    /// address computation would have wrapped.
    #[error("address {address:#x} is out of range (limit {limit:#x})")]
    OutOfRange {
        /// The offending address.
        address: u64,
        /// The configured or architectural limit that was exceeded.
        limit: u64,
    },

    /// There was no room to record the requested change: the region list is full, or the
    /// sub-table pool was exhausted while the builder was splitting a region.
    #[error("out of memory: {reason}")]
    OutOfMemory {
        /// A short, static description of which bounded resource was exhausted.
        reason: &'static str,
    },

    /// The requested change is not permitted: an illegal overlap between regions, an attempt to
    /// remove a region that isn't dynamic, or a dynamic region overlapping anything at all.
    #[error("permission denied: {reason}")]
    PermissionDenied {
        /// A short, static description of which policy rule was violated.
        reason: &'static str,
    },

    /// No region matching the given base virtual address and size was found.
    #[error("no region found at {base_va:#x} of size {size:#x}")]
    NotFound {
        /// The virtual address that was searched for.
        base_va: u64,
        /// The size that was searched for.
        size: u64,
    },
}

impl Debug for XlatError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        // Reuse the `Display` message for `Debug`, since every variant's message is already
        // precise enough to double as a debug representation, matching the style used for
        // architectural bitflags types throughout the corpus this crate is drawn from.
        write!(f, "{self}")
    }
}

/// Convenience alias for `Result<T, XlatError>`.
pub type XlatResult<T> = Result<T, XlatError>;

/// Alias for [`XlatError`] at pre-init call sites, where a failure reflects a programming bug in
/// the caller's fixed memory map (§7) rather than a runtime condition to recover from.
pub type BuildError = XlatError;

impl XlatError {
    /// Wraps this error for a pre-init static-region failure, so that `.expect()`-ing the result
    /// panics with [`StaticAddFailure`]'s more explicit message instead of `XlatError`'s terse
    /// `Debug` output.
    ///
    /// Typical use is `context.add_static(...).map_err(BuildError::into_static_add_failure).expect("fixed memory map is wrong")`.
    pub fn into_static_add_failure(self) -> StaticAddFailure {
        StaticAddFailure(self)
    }
}

/// A pre-init static-region registration failure (§7), distinguished from [`XlatError`] only by
/// its `Debug` impl so that a `.expect()` panic names the failing rule explicitly.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct StaticAddFailure(XlatError);

impl Debug for StaticAddFailure {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "static region registration failed: {}", self.0)
    }
}

impl fmt::Display for StaticAddFailure {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_add_failure_debug_names_the_error() {
        let err: BuildError = XlatError::InvalidArgument {
            reason: "region size must not be zero",
        };
        let wrapped = err.into_static_add_failure();
        assert_eq!(
            format!("{wrapped:?}"),
            "static region registration failed: invalid argument: region size must not be zero"
        );
    }
}
