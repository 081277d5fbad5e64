// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! echo-memory: versioned object store over a branching slice history.
//!
//! Wrapped objects, arrays and sets record every mutation as a patch against
//! the current slice. Reading an entity at any slice merges the patches of the
//! slice's ancestor chain; caches rebuild lazily after a slice switch. Patch
//! chains are bounded by snapshot/compress compaction, and two slices can be
//! diffed down to the property, array position or set that changed.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::unreadable_literal,
    clippy::missing_const_for_fn,
    clippy::suboptimal_flops,
    clippy::redundant_pub_crate,
    clippy::many_single_char_names,
    clippy::module_name_repetitions,
    clippy::use_self
)]

mod changes;
mod compaction;
mod config;
mod digest;
mod error;
mod handle;
mod history;
mod ident;
mod lineage;
mod memory;
mod patch;
mod report;
mod slice;
mod stable_key;
mod value;
mod versionable;
mod worker;

// Re-exports for stable public API
/// Cross-slice diff buckets.
pub use changes::{ChangesLocations, Location};
/// Memory configuration and its loading errors.
pub use config::{ConfigError, MemoryConfig};
/// Contract violations raised by every operation.
pub use error::MemoryError;
/// Typed entity views returned by [`Memory::object`], [`Memory::array`] and
/// [`Memory::set`].
pub use handle::{ArrayHandle, ObjectHandle, SetHandle};
/// Identifier types and the digest type.
pub use ident::{EntityId, Hash, MemoryId};
/// Ancestor paths returned by [`Memory::get_parents`].
pub use lineage::ParentPaths;
/// The slice manager.
pub use memory::Memory;
/// Patch records and their compiled forms.
pub use patch::{ArrayPatch, CompiledArray, ObjectPatch, Patch, SetPatch, Slot};
/// Raw slice content for debugging.
pub use report::SliceReport;
/// Parent linkage records.
pub use slice::{Attribute, ParentLink};
/// Fractional array indices.
pub use stable_key::{StableKey, LEVEL_STEP};
/// Cell values and the non-versionable opt-out.
pub use value::{mark_not_versionable, Opaque, Value};
/// Raw containers awaiting [`Memory::make_versionable`].
pub use versionable::draft::{Draft, DraftRef, DraftValue};
/// Object accessors and property descriptors.
pub use versionable::object::{Accessor, Descriptor, Getter, Setter};
/// Entity kinds.
pub use versionable::Kind;
/// Capability surface adapters use to reach the memory.
pub use worker::{MemoryWorker, ProxyParams};
