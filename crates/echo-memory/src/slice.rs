// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! History nodes and parent linkage.
use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::ident::EntityId;
use crate::patch::Patch;
use crate::stable_key::StableKey;

/// Arena index of a slice.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub(crate) struct SliceId(pub(crate) usize);

/// Where a child entity sits inside its parent container.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Attribute {
    /// Named property of an object (or non-index property of an array).
    Prop(String),
    /// Array slot, addressed by its stable key so the link survives shifts.
    Index(StableKey),
    /// Member of a set.
    Member,
}

/// One container that references an entity.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ParentLink {
    /// Referencing container.
    pub parent: EntityId,
    /// Position of the reference inside `parent`.
    pub attribute: Attribute,
}

/// A node of the branching history.
///
/// `data` and `linked_parent_of` are deltas relative to `parent`: the visible
/// state at a slice is the merge of its ancestor chain, nearest slice winning.
#[derive(Debug, Default)]
pub(crate) struct Slice {
    pub(crate) name: String,
    pub(crate) parent: Option<SliceId>,
    pub(crate) children: Vec<SliceId>,
    /// Per-entity patch recorded while this slice was current.
    pub(crate) data: BTreeMap<EntityId, Patch>,
    /// Full parent-link list of every entity whose linkage changed here.
    pub(crate) linked_parent_of: BTreeMap<EntityId, Vec<ParentLink>>,
    /// Entities touched here; their caches are stale once this slice is
    /// entered or left.
    pub(crate) invalidated: BTreeSet<EntityId>,
    /// Entities first linked here (this slice is their owner slice).
    pub(crate) owned: BTreeSet<EntityId>,
    /// Set on a snapshot slice: the `(from, until)` range it replaced.
    pub(crate) snapshot_origin: Option<(SliceId, SliceId)>,
    /// Set on every slice of a snapshotted range: the replacing snapshot.
    pub(crate) snapshot_replacement: Option<SliceId>,
    /// Tombstone flag; removed slices keep their arena index.
    pub(crate) removed: bool,
}

impl Slice {
    pub(crate) fn new(name: &str, parent: Option<SliceId>) -> Self {
        Self {
            name: name.to_owned(),
            parent,
            ..Self::default()
        }
    }

    /// Returns `true` if this slice mentions `id` in any of its maps.
    pub(crate) fn references(&self, id: EntityId) -> bool {
        self.data.contains_key(&id)
            || self.owned.contains(&id)
            || self.linked_parent_of.contains_key(&id)
            || self
                .linked_parent_of
                .values()
                .any(|links| links.iter().any(|link| link.parent == id))
    }

    /// Releases every map and marks the slice as removed.
    pub(crate) fn tombstone(&mut self) {
        *self = Self {
            name: core::mem::take(&mut self.name),
            removed: true,
            ..Self::default()
        };
    }

    /// Every entity id this slice mentions.
    pub(crate) fn referenced_ids(&self) -> BTreeSet<EntityId> {
        let mut ids: BTreeSet<EntityId> = self.data.keys().copied().collect();
        ids.extend(self.owned.iter().copied());
        for (id, links) in &self.linked_parent_of {
            ids.insert(*id);
            ids.extend(links.iter().map(|link| link.parent));
        }
        ids
    }

    /// Folds a newer slice's deltas into this one (oldest-first compaction).
    pub(crate) fn absorb(&mut self, newer: &Self) {
        for (id, patch) in &newer.data {
            match self.data.get_mut(id) {
                Some(acc) => acc.merge(patch),
                None => {
                    self.data.insert(*id, patch.clone());
                }
            }
        }
        for (id, links) in &newer.linked_parent_of {
            self.linked_parent_of.insert(*id, links.clone());
        }
        self.invalidated.extend(newer.invalidated.iter().copied());
        self.owned.extend(newer.owned.iter().copied());
    }
}
