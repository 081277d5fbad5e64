// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Versionable container adapters.
//!
//! An entity is *unlinked* until it is attached (or stored into a linked
//! container): mutations then edit its backing data directly. Linking records
//! the backing data as a baseline patch in the current slice. From then on
//! every mutation is written into the current slice's patch and every read is
//! served from a cache that is rebuilt lazily whenever the memory stamps the
//! entity with a new invalidation generation.
use serde::Serialize;

use crate::error::MemoryError;
use crate::ident::EntityId;
use crate::patch::Patch;
use crate::slice::Attribute;
use crate::value::Value;
use crate::worker::MemoryWorker;

pub(crate) mod array;
pub(crate) mod draft;
pub(crate) mod object;
pub(crate) mod set;

pub(crate) use array::ArrayEntity;
pub(crate) use object::ObjectEntity;
pub(crate) use set::SetEntity;

/// Container kind of a versionable entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Kind {
    /// String-keyed properties.
    Object,
    /// Ordered slots plus non-index properties.
    Array,
    /// Unordered unique members.
    Set,
}

/// What linking an entity produces.
#[derive(Debug)]
pub(crate) struct Baseline {
    /// Full content of the entity, recorded in its owner slice.
    pub(crate) patch: Patch,
    /// Entities the baseline refers to, with their positions.
    pub(crate) references: Vec<(EntityId, Attribute)>,
}

/// Behaviour shared by the three adapters.
pub(crate) trait Versionable {
    fn id(&self) -> EntityId;

    fn kind(&self) -> Kind;

    fn is_linked(&self) -> bool;

    /// Switches to linked mode and returns the baseline to record.
    /// `stamp` is the entity's current invalidation generation.
    fn link(&mut self, stamp: u64) -> Baseline;

    /// Rebuilds the cache from the current slice when it is stale.
    fn resync(&mut self, worker: &dyn MemoryWorker);

    /// Entities referenced by the visible content, with their positions.
    fn references(&self) -> Vec<(EntityId, Attribute)>;
}

/// A wrapped container stored in the memory heap.
#[derive(Debug)]
pub(crate) enum Entity {
    Object(ObjectEntity),
    Array(ArrayEntity),
    Set(SetEntity),
}

impl Entity {
    pub(crate) fn as_versionable(&self) -> &dyn Versionable {
        match self {
            Self::Object(entity) => entity,
            Self::Array(entity) => entity,
            Self::Set(entity) => entity,
        }
    }

    pub(crate) fn as_versionable_mut(&mut self) -> &mut dyn Versionable {
        match self {
            Self::Object(entity) => entity,
            Self::Array(entity) => entity,
            Self::Set(entity) => entity,
        }
    }

    pub(crate) fn kind(&self) -> Kind {
        self.as_versionable().kind()
    }
}

/// Cache bookkeeping shared by the adapters.
#[derive(Debug, Default)]
pub(crate) struct SyncState {
    pub(crate) linked: bool,
    /// Generation the cache was built at.
    pub(crate) synced_at: u64,
}

impl SyncState {
    /// Returns the stamp to rebuild at, or `None` when the cache is current.
    pub(crate) fn stale(&self, worker: &dyn MemoryWorker, id: EntityId) -> Option<u64> {
        if !self.linked {
            return None;
        }
        let stamp = worker.get_proxy(id).ok()?.invalidated_at;
        (stamp != self.synced_at).then_some(stamp)
    }

    /// Entry check of every linked mutation.
    pub(crate) fn check_writable(&self, worker: &dyn MemoryWorker) -> Result<(), MemoryError> {
        if self.linked && worker.is_frozen() {
            return Err(MemoryError::Frozen);
        }
        Ok(())
    }
}

/// Validates a value for an unlinked container, or queues it for linking in a
/// linked one.
pub(crate) fn accept_value(
    worker: &mut dyn MemoryWorker,
    linked: bool,
    value: &Value,
) -> Result<(), MemoryError> {
    if linked {
        return worker.link_to_memory(value);
    }
    match value.as_entity() {
        Some(id) => worker.get_proxy(id).map(|_| ()),
        None => Ok(()),
    }
}
