// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! A 64-bit ARMv8-A long-descriptor translation table engine.
//!
//! This crate builds, tears down and mutates the hierarchical page tables an AArch64 MMU walks,
//! without itself touching any system register or cache-maintenance instruction: every
//! architecture-specific operation goes through the [`hooks::Hooks`] trait, so the recursive
//! table-tree algorithms ([`builder`], [`unmapper`], [`mutator`]) are plain, testable Rust.
//!
//! [`TranslationContext`] is the entry point: register static regions with
//! [`TranslationContext::add_static`], call [`TranslationContext::init`] once to build them, then
//! optionally add and remove regions at runtime with [`TranslationContext::add_dynamic`] and
//! [`TranslationContext::remove_dynamic`] (only present with the `dynamic-regions` feature, on by
//! default, which also switches the sub-table pool to refcounted reclamation), and change the
//! attributes of a live mapping with [`TranslationContext::change_mem_attributes`].
//!
//! [`define_translation_context!`] declares a process-wide default context behind a
//! [`spin::Once`], for a caller that wants a single global translation regime rather than owning a
//! [`TranslationContext`] value directly.
#![cfg_attr(not(test), no_std)]
#![deny(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

mod attributes;
mod builder;
mod context;
mod descriptor;
mod error;
pub mod hooks;
mod levels;
mod mutator;
mod region;
mod table;
mod unmapper;

pub use attributes::{AccessPermission, Executability, MemoryType, RegionAttributes, Security};
pub use context::TranslationContext;
pub use error::{BuildError, StaticAddFailure, XlatError, XlatResult};
pub use hooks::{ExceptionLevel, Hooks};
pub use levels::GRANULE_SIZE;
