// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Error taxonomy for the versioned memory.
//!
//! Every variant is a programming-contract violation raised synchronously at
//! the point of misuse. Nothing is retried internally, and an operation that
//! fails leaves no patch behind.
use thiserror::Error;

use crate::ident::EntityId;
use crate::versionable::Kind;

/// Errors raised by [`crate::Memory`] and the versionable adapters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    /// The value was never wrapped, or it refers to an entity that has since
    /// been collected.
    #[error("value is not versionable")]
    NotVersionable,

    /// A raw value that already has a proxy was wrapped a second time.
    #[error("value is already versionable; use the returned proxy instead of the raw value")]
    AlreadyVersionable,

    /// A mutation targeted a linked entity while the current slice has children.
    #[error("the current slice has children and is frozen; switch to a leaf slice first")]
    Frozen,

    /// `create` was called with a name that already exists.
    #[error("slice already exists: {0:?}")]
    DuplicateSlice(String),

    /// A slice name was used before being created.
    #[error("unknown slice: {0:?}")]
    UnknownSlice(String),

    /// The entity belongs to another memory instance.
    #[error("entity {0} is owned by another memory")]
    CrossMemory(EntityId),

    /// The slice is the current slice or one of its ancestors.
    #[error("slice {0:?} is in use by the current slice; switch away first")]
    SliceInUse(String),

    /// `snapshot`/`compress` was given slices that do not form a compactable path.
    #[error("slices {from:?}..{until:?} do not form a compactable path")]
    InvalidRange {
        /// Oldest slice of the requested range.
        from: String,
        /// Newest slice of the requested range.
        until: String,
    },

    /// A typed accessor was used on an entity (or draft node) of another kind.
    #[error("expected {expected:?}, found {found:?}")]
    KindMismatch {
        /// Kind the caller asked for.
        expected: Kind,
        /// Kind actually stored.
        found: Kind,
    },
}
