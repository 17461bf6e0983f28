// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The region attribute word (§3 "Attribute word") and the MAIR attribute indices it is encoded
//! against.
//!
//! The engine never programs `MAIR_ELx` itself (that register belongs to the architecture-enable
//! sequence, out of scope per §1b); these indices are exposed so that the caller programming
//! `MAIR_ELx` can agree with the encoder on what each index means.

use crate::error::XlatError;

/// Index of the MAIR entry used for normal, write-back, read/write-allocate memory.
pub const MAIR_NORMAL_CACHEABLE_INDEX: u8 = 0;

/// Index of the MAIR entry used for Device-nGnRE memory.
pub const MAIR_DEVICE_INDEX: u8 = 1;

/// Index of the MAIR entry used for normal, non-cacheable memory.
pub const MAIR_NON_CACHEABLE_INDEX: u8 = 2;

/// The kind of memory a region is backed by.
///
/// Ordered weak-to-strong (`Device` < `NonCacheable` < `Cacheable`); the ordering is informational
/// for callers reasoning about caching behaviour and is not itself consulted by the region-list
/// overlap validation in [`crate::region`], which expresses its rules purely in terms of VA/PA
/// geometry.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum MemoryType {
    /// Device-nGnRE memory: no gathering, no reordering, early write acknowledgement.
    Device,
    /// Normal memory, non-cacheable.
    NonCacheable,
    /// Normal memory, write-back cacheable.
    Cacheable,
}

impl MemoryType {
    /// Returns the MAIR attribute index this memory type is encoded against.
    pub const fn mair_index(self) -> u8 {
        match self {
            MemoryType::Device => MAIR_DEVICE_INDEX,
            MemoryType::NonCacheable => MAIR_NON_CACHEABLE_INDEX,
            MemoryType::Cacheable => MAIR_NORMAL_CACHEABLE_INDEX,
        }
    }
}

/// Read/write access permission for a region.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AccessPermission {
    /// The region may only be read.
    ReadOnly,
    /// The region may be read and written.
    ReadWrite,
}

/// Security state a region is mapped for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Security {
    /// Secure memory, only accessible to secure-world software.
    Secure,
    /// Non-secure memory.
    NonSecure,
}

/// Whether instruction fetches are permitted from a region.
///
/// Only meaningful for read-only normal memory: device memory and read-write memory are always
/// execute-never regardless of this field (§4.5, §9 "Descriptor encoding vs. policy").
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Executability {
    /// Instruction fetch is permitted.
    Executable,
    /// Instruction fetch is forbidden.
    ExecuteNever,
}

/// The attribute word attached to a region (§3 "Attribute word").
///
/// The `dynamic` flag is deliberately not constructible from outside the crate: it is set
/// internally by [`crate::region::RegionList::prepare_dynamic`] and read by the builder and
/// unmapper, but user-settable attribute space does not include it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RegionAttributes {
    mem_type: MemoryType,
    access: AccessPermission,
    security: Security,
    exec: Executability,
    dynamic: bool,
}

impl RegionAttributes {
    /// Creates a new attribute word for a region that will be added statically.
    ///
    /// Returns [`XlatError::InvalidArgument`] if the combination is architecturally
    /// nonsensical (read-write and executable at once).
    pub fn new(
        mem_type: MemoryType,
        access: AccessPermission,
        security: Security,
        exec: Executability,
    ) -> Result<Self, XlatError> {
        if access == AccessPermission::ReadWrite && exec == Executability::Executable {
            return Err(XlatError::InvalidArgument {
                reason: "read-write memory may not be executable",
            });
        }
        Ok(Self {
            mem_type,
            access,
            security,
            exec,
            dynamic: false,
        })
    }

    /// Returns a copy of these attributes with the dynamic flag set.
    ///
    /// Only [`crate::region::RegionList::prepare_dynamic`] should call this; it is `pub(crate)`
    /// precisely so that user code cannot forge a dynamic region.
    pub(crate) fn with_dynamic(self) -> Self {
        Self {
            dynamic: true,
            ..self
        }
    }

    /// The memory type of the region.
    pub const fn mem_type(&self) -> MemoryType {
        self.mem_type
    }

    /// The access permission of the region.
    pub const fn access(&self) -> AccessPermission {
        self.access
    }

    /// The security state of the region.
    pub const fn security(&self) -> Security {
        self.security
    }

    /// The requested executability of the region.
    ///
    /// Note that device memory and read-write memory are always execute-never in the final
    /// descriptor regardless of this value; see [`RegionAttributes::effective_execute_never`].
    pub const fn executability(&self) -> Executability {
        self.exec
    }

    /// Whether this region was added after context initialization.
    pub const fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    /// Returns a copy of these attributes with `access` and `exec` replaced, keeping memory type,
    /// security state and the dynamic flag unchanged.
    ///
    /// Used by [`crate::context::TranslationContext::change_mem_attributes`] to keep a region's
    /// stored attribute word in sync with what the mutator actually wrote into the tree (§4.6 only
    /// ever rewrites AP and XN, so those are the only fields this needs to replace).
    ///
    /// Returns [`XlatError::InvalidArgument`] under the same rule as [`RegionAttributes::new`].
    pub(crate) fn with_access_and_executability(
        self,
        access: AccessPermission,
        exec: Executability,
    ) -> Result<Self, XlatError> {
        if access == AccessPermission::ReadWrite && exec == Executability::Executable {
            return Err(XlatError::InvalidArgument {
                reason: "read-write memory may not be executable",
            });
        }
        Ok(Self { access, exec, ..self })
    }

    /// Whether the final descriptor for this region must be execute-never, after folding in the
    /// two policies from §9 ("device memory is always execute-never"; "read-write normal memory
    /// is always execute-never") on top of the user's requested executability.
    pub const fn effective_execute_never(&self) -> bool {
        matches!(self.mem_type, MemoryType::Device)
            || matches!(self.access, AccessPermission::ReadWrite)
            || matches!(self.exec, Executability::ExecuteNever)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_read_write_executable() {
        let result = RegionAttributes::new(
            MemoryType::Cacheable,
            AccessPermission::ReadWrite,
            Security::NonSecure,
            Executability::Executable,
        );
        assert_eq!(
            result,
            Err(XlatError::InvalidArgument {
                reason: "read-write memory may not be executable",
            })
        );
    }

    #[test]
    fn device_memory_always_execute_never() {
        let attrs = RegionAttributes::new(
            MemoryType::Device,
            AccessPermission::ReadOnly,
            Security::NonSecure,
            Executability::Executable,
        )
        .unwrap();
        assert!(attrs.effective_execute_never());
    }

    #[test]
    fn read_only_normal_executable_is_honoured() {
        let attrs = RegionAttributes::new(
            MemoryType::Cacheable,
            AccessPermission::ReadOnly,
            Security::Secure,
            Executability::Executable,
        )
        .unwrap();
        assert!(!attrs.effective_execute_never());
    }

    #[test]
    fn dynamic_flag_not_user_constructible() {
        let attrs = RegionAttributes::new(
            MemoryType::Cacheable,
            AccessPermission::ReadOnly,
            Security::NonSecure,
            Executability::Executable,
        )
        .unwrap();
        assert!(!attrs.is_dynamic());
        assert!(attrs.with_dynamic().is_dynamic());
    }
}
