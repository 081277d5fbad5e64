// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Capability surface between a memory and its versionable adapters.
//!
//! Adapters never touch [`crate::Memory`] internals. Everything they need
//! (the proxy side table, the current slice's patch map, the merged value of an
//! entity, the frozen flag, dirty marking, parent linkage and deferred linking)
//! goes through [`MemoryWorker`].
use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::MemoryError;
use crate::ident::{EntityId, MemoryId};
use crate::patch::Patch;
use crate::slice::Attribute;
use crate::value::Value;
use crate::versionable::Kind;

/// Side-table record of one wrapped entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ProxyParams {
    /// Entity id.
    pub id: EntityId,
    /// Container kind.
    pub kind: Kind,
    /// Memory the entity is linked into; `None` while unlinked.
    pub memory: Option<MemoryId>,
    /// Generation stamp of the last cache invalidation. An adapter whose own
    /// stamp differs must rebuild before servicing a read.
    pub invalidated_at: u64,
}

/// Operations a memory exposes to the versionable adapters.
pub trait MemoryWorker {
    /// Side-table record of `id`.
    ///
    /// # Errors
    /// [`MemoryError::NotVersionable`] for a collected entity,
    /// [`MemoryError::CrossMemory`] for an id this memory never wrapped.
    fn get_proxy(&self, id: EntityId) -> Result<&ProxyParams, MemoryError>;

    /// Patch map of the current slice. Adapters write their deltas here.
    fn get_slice(&mut self) -> &mut BTreeMap<EntityId, Patch>;

    /// Merge of every patch for `id` from its owner slice down to the current
    /// slice, or `None` when the entity does not exist on the current chain.
    fn get_slice_value(&self, id: EntityId) -> Option<Patch>;

    /// `true` while the current slice has children.
    fn is_frozen(&self) -> bool;

    /// Records that `id` changed in the current slice.
    fn mark_dirty(&mut self, id: EntityId);

    /// Adds `parent` (at `attribute`) to the parent links of `id` in the
    /// current slice.
    fn add_slice_proxy_parent(&mut self, id: EntityId, parent: EntityId, attribute: Attribute);

    /// Removes `parent` (at `attribute`) from the parent links of `id` in the
    /// current slice.
    fn delete_slice_proxy_parent(&mut self, id: EntityId, parent: EntityId, attribute: &Attribute);

    /// Validates `value` and, if it references an unlinked entity, queues that
    /// entity to be linked into the current slice once the running adapter
    /// operation returns.
    ///
    /// # Errors
    /// Same as [`MemoryWorker::get_proxy`] for `Value::Entity` values.
    fn link_to_memory(&mut self, value: &Value) -> Result<(), MemoryError>;
}
