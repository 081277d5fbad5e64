// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Identifier types for versioned entities and memories.
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Canonical 256-bit digest used for state digests.
pub type Hash = [u8; 32];

static NEXT_ENTITY_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_MEMORY_ID: AtomicU64 = AtomicU64::new(1);

/// Strongly typed identifier for a wrapped (versionable) entity.
///
/// Ids are handed out from a process-wide monotonic counter the first time a
/// raw container is wrapped, and are never reused: an id that disappears after
/// garbage collection stays retired for the life of the process. Every patch,
/// parent link and cache stamp is keyed by this id.
///
/// # Invariants
/// - Zero is never issued.
/// - Callers cannot construct ids; they only receive them from a [`crate::Memory`].
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize)]
#[serde(transparent)]
pub struct EntityId(u64);

impl EntityId {
    pub(crate) fn next() -> Self {
        Self(NEXT_ENTITY_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying raw value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for EntityId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier of a [`crate::Memory`] instance.
///
/// Entities record the memory that linked them; linking an entity into a
/// second memory is a contract violation.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize)]
#[serde(transparent)]
pub struct MemoryId(u64);

impl MemoryId {
    pub(crate) fn next() -> Self {
        Self(NEXT_MEMORY_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying raw value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for MemoryId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "memory-{}", self.0)
    }
}
