// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Slice arena, proxy side table and the [`MemoryWorker`] implementation.
//!
//! [`History`] is everything a memory owns except the entity heap. Keeping the
//! two apart lets an adapter borrow its own entity mutably while holding the
//! history as `&mut dyn MemoryWorker`.
use std::collections::{BTreeMap, BTreeSet};

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;

use crate::error::MemoryError;
use crate::ident::{EntityId, MemoryId};
use crate::patch::Patch;
use crate::slice::{Attribute, ParentLink, Slice, SliceId};
use crate::value::Value;
use crate::versionable::Kind;
use crate::worker::{MemoryWorker, ProxyParams};

/// Name of the root slice.
pub(crate) const ROOT_SLICE: &str = "";

#[derive(Debug)]
pub(crate) struct History {
    memory: MemoryId,
    slices: Vec<Slice>,
    names: BTreeMap<String, SliceId>,
    pub(crate) root: SliceId,
    pub(crate) current: SliceId,
    pub(crate) proxies: FxHashMap<EntityId, ProxyParams>,
    /// Entities attached directly.
    pub(crate) roots: BTreeSet<EntityId>,
    /// Entities flagged as traversal-stopping ancestors.
    pub(crate) diff_roots: BTreeSet<EntityId>,
    /// Ids collected by `remove`; never valid again.
    pub(crate) retired: FxHashSet<EntityId>,
    /// Entities waiting to be linked into the current slice.
    pub(crate) pending: Vec<EntityId>,
    generation: u64,
}

impl History {
    pub(crate) fn new(memory: MemoryId) -> Self {
        let root = SliceId(0);
        let mut names = BTreeMap::new();
        names.insert(ROOT_SLICE.to_owned(), root);
        Self {
            memory,
            slices: vec![Slice::new(ROOT_SLICE, None)],
            names,
            root,
            current: root,
            proxies: FxHashMap::default(),
            roots: BTreeSet::new(),
            diff_roots: BTreeSet::new(),
            retired: FxHashSet::default(),
            pending: Vec::new(),
            generation: 0,
        }
    }

    pub(crate) fn memory(&self) -> MemoryId {
        self.memory
    }

    pub(crate) fn slice(&self, id: SliceId) -> &Slice {
        &self.slices[id.0]
    }

    pub(crate) fn slice_mut(&mut self, id: SliceId) -> &mut Slice {
        &mut self.slices[id.0]
    }

    pub(crate) fn name_of(&self, id: SliceId) -> &str {
        &self.slice(id).name
    }

    pub(crate) fn lookup(&self, name: &str) -> Result<SliceId, MemoryError> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| MemoryError::UnknownSlice(name.to_owned()))
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    /// Ids of every live slice, in arena order.
    pub(crate) fn live_slices(&self) -> impl Iterator<Item = SliceId> + '_ {
        self.slices
            .iter()
            .enumerate()
            .filter(|(_, slice)| !slice.removed)
            .map(|(index, _)| SliceId(index))
    }

    /// `from` and its ancestors, nearest first, ending at the root.
    pub(crate) fn chain(&self, from: SliceId) -> Vec<SliceId> {
        let mut out = vec![from];
        let mut cursor = self.slice(from).parent;
        while let Some(id) = cursor {
            out.push(id);
            cursor = self.slice(id).parent;
        }
        out
    }

    /// Returns `true` if `ancestor` is `slice` or one of its ancestors.
    pub(crate) fn is_ancestor_or_self(&self, ancestor: SliceId, slice: SliceId) -> bool {
        let mut cursor = Some(slice);
        while let Some(id) = cursor {
            if id == ancestor {
                return true;
            }
            cursor = self.slice(id).parent;
        }
        false
    }

    /// Nearest common ancestor of `a` and `b`.
    pub(crate) fn common_ancestor(&self, a: SliceId, b: SliceId) -> SliceId {
        let ancestors: BTreeSet<SliceId> = self.chain(a).into_iter().collect();
        let mut cursor = Some(b);
        while let Some(id) = cursor {
            if ancestors.contains(&id) {
                return id;
            }
            cursor = self.slice(id).parent;
        }
        self.root
    }

    /// Slices from `from` up to `ancestor`, `ancestor` excluded.
    pub(crate) fn span(&self, from: SliceId, ancestor: SliceId) -> Vec<SliceId> {
        self.chain(from)
            .into_iter()
            .take_while(|id| *id != ancestor)
            .collect()
    }

    /// Every slice in the subtree rooted at `top`, `top` included.
    pub(crate) fn subtree(&self, top: SliceId) -> Vec<SliceId> {
        let mut out = Vec::new();
        let mut stack = vec![top];
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.slice(id).children.iter().copied());
        }
        out
    }

    pub(crate) fn create(&mut self, name: &str) -> Result<SliceId, MemoryError> {
        if self.contains(name) {
            return Err(MemoryError::DuplicateSlice(name.to_owned()));
        }
        Ok(self.insert_slice(Slice::new(name, Some(self.current))))
    }

    /// Adds `slice` to the arena and to its parent's children.
    pub(crate) fn insert_slice(&mut self, slice: Slice) -> SliceId {
        let id = SliceId(self.slices.len());
        let parent = slice.parent;
        self.names.insert(slice.name.clone(), id);
        self.slices.push(slice);
        if let Some(parent) = parent {
            self.slice_mut(parent).children.push(id);
        }
        id
    }

    /// Nearest parent-link list of `id` seen from `slice`.
    pub(crate) fn links_at(&self, slice: SliceId, id: EntityId) -> Option<&Vec<ParentLink>> {
        self.chain(slice)
            .into_iter()
            .find_map(|s| self.slice(s).linked_parent_of.get(&id))
    }

    /// Returns `true` if the owner slice of `id` lies on the chain of `slice`.
    pub(crate) fn is_visible(&self, slice: SliceId, id: EntityId) -> bool {
        self.chain(slice)
            .into_iter()
            .any(|s| self.slice(s).owned.contains(&id))
    }

    /// Merged patch of `id` seen from `slice`.
    pub(crate) fn value_at(&self, slice: SliceId, id: EntityId) -> Option<Patch> {
        let mut patches = Vec::new();
        for s in self.chain(slice) {
            let node = self.slice(s);
            if let Some(patch) = node.data.get(&id) {
                patches.push(patch);
            }
            if node.owned.contains(&id) {
                return Patch::merge_all(patches.into_iter().rev());
            }
        }
        None
    }

    /// Entities owned along the chain of `slice`, ascending.
    pub(crate) fn visible_entities(&self, slice: SliceId) -> BTreeSet<EntityId> {
        self.chain(slice)
            .into_iter()
            .flat_map(|s| self.slice(s).owned.iter().copied())
            .collect()
    }

    /// Forces the adapter of `id` to rebuild on its next access.
    pub(crate) fn invalidate(&mut self, id: EntityId) {
        self.generation += 1;
        let generation = self.generation;
        if let Some(params) = self.proxies.get_mut(&id) {
            params.invalidated_at = generation;
            trace!(entity = %id, generation, "invalidated entity cache");
        }
    }

    /// Invalidates every entity marked dirty in `slices`.
    pub(crate) fn invalidate_slices(&mut self, slices: &[SliceId]) {
        let ids: BTreeSet<EntityId> = slices
            .iter()
            .flat_map(|s| self.slice(*s).invalidated.iter().copied())
            .collect();
        for id in ids {
            self.invalidate(id);
        }
    }

    /// Registers a freshly wrapped, unlinked entity.
    pub(crate) fn register(&mut self, id: EntityId, kind: Kind) {
        self.proxies.insert(
            id,
            ProxyParams {
                id,
                kind,
                memory: None,
                invalidated_at: 0,
            },
        );
    }

    /// Records the baseline of a newly linked entity in the current slice.
    pub(crate) fn record_link(&mut self, id: EntityId, baseline: Patch) {
        let memory = self.memory;
        if let Some(params) = self.proxies.get_mut(&id) {
            params.memory = Some(memory);
        }
        let current = self.current;
        let slice = self.slice_mut(current);
        slice.data.insert(id, baseline);
        slice.owned.insert(id);
        slice.invalidated.insert(id);
        trace!(entity = %id, slice = %slice.name, "linked entity");
    }

    /// Gives `id`, linked on a branch off the current chain, an owned copy
    /// in the current slice: its merged value at the first live slice owning
    /// it. Returns what that value references, or `None` when no live slice
    /// owns `id`.
    pub(crate) fn adopt(&mut self, id: EntityId) -> Option<Vec<(EntityId, Attribute)>> {
        let owner = self
            .live_slices()
            .find(|s| self.slice(*s).owned.contains(&id))?;
        let baseline = self.value_at(owner, id)?;
        let references = baseline.references();
        self.record_link(id, baseline);
        self.invalidate(id);
        trace!(entity = %id, owner = %self.slice(owner).name, "adopted entity");
        Some(references)
    }

    /// Linked and owned somewhere on the current chain.
    pub(crate) fn is_settled(&self, id: EntityId) -> bool {
        self.is_linked(id) && self.is_visible(self.current, id)
    }

    pub(crate) fn is_linked(&self, id: EntityId) -> bool {
        self.proxies
            .get(&id)
            .is_some_and(|params| params.memory.is_some())
    }

    /// Error for an id missing from the side table.
    pub(crate) fn missing(&self, id: EntityId) -> MemoryError {
        if self.retired.contains(&id) {
            MemoryError::NotVersionable
        } else {
            MemoryError::CrossMemory(id)
        }
    }

    /// Detaches and tombstones the subtree rooted at `top`.
    ///
    /// Returns every entity id the removed slices mentioned.
    pub(crate) fn delete_subtree(&mut self, top: SliceId) -> BTreeSet<EntityId> {
        if let Some(parent) = self.slice(top).parent {
            self.slice_mut(parent).children.retain(|child| *child != top);
        }
        let doomed = self.subtree(top);
        self.delete_slices(&doomed)
    }

    /// Tombstones `doomed` (already detached from surviving parents) and
    /// clears snapshot links that point into it.
    pub(crate) fn delete_slices(&mut self, doomed: &[SliceId]) -> BTreeSet<EntityId> {
        let mut candidates = BTreeSet::new();
        for id in doomed {
            let slice = self.slice_mut(*id);
            candidates.extend(slice.referenced_ids());
            let name = slice.name.clone();
            slice.tombstone();
            self.names.remove(&name);
            trace!(slice = %name, "removed slice");
        }
        let doomed: BTreeSet<SliceId> = doomed.iter().copied().collect();
        for slice in &mut self.slices {
            if slice.removed {
                continue;
            }
            if slice
                .snapshot_origin
                .is_some_and(|(from, until)| doomed.contains(&from) || doomed.contains(&until))
            {
                slice.snapshot_origin = None;
            }
            if slice
                .snapshot_replacement
                .is_some_and(|snapshot| doomed.contains(&snapshot))
            {
                slice.snapshot_replacement = None;
            }
        }
        candidates
    }

    /// Drops every candidate that no live slice mentions any more.
    ///
    /// Returns the collected ids; the caller drops their heap entries.
    pub(crate) fn collect_garbage(&mut self, candidates: BTreeSet<EntityId>) -> Vec<EntityId> {
        let live: Vec<SliceId> = self.live_slices().collect();
        let mut collected = Vec::new();
        for id in candidates {
            if live.iter().any(|s| self.slice(*s).references(id)) {
                continue;
            }
            if self.proxies.remove(&id).is_none() {
                continue;
            }
            self.roots.remove(&id);
            self.diff_roots.remove(&id);
            self.retired.insert(id);
            collected.push(id);
        }
        collected
    }
}

impl MemoryWorker for History {
    fn get_proxy(&self, id: EntityId) -> Result<&ProxyParams, MemoryError> {
        self.proxies.get(&id).ok_or_else(|| self.missing(id))
    }

    fn get_slice(&mut self) -> &mut BTreeMap<EntityId, Patch> {
        let current = self.current;
        &mut self.slice_mut(current).data
    }

    fn get_slice_value(&self, id: EntityId) -> Option<Patch> {
        self.value_at(self.current, id)
    }

    fn is_frozen(&self) -> bool {
        !self.slice(self.current).children.is_empty()
    }

    fn mark_dirty(&mut self, id: EntityId) {
        let current = self.current;
        self.slice_mut(current).invalidated.insert(id);
    }

    fn add_slice_proxy_parent(&mut self, id: EntityId, parent: EntityId, attribute: Attribute) {
        let current = self.current;
        if !self.slice(current).linked_parent_of.contains_key(&id) {
            let inherited = self.links_at(current, id).cloned().unwrap_or_default();
            self.slice_mut(current).linked_parent_of.insert(id, inherited);
        }
        let link = ParentLink { parent, attribute };
        let links = self
            .slice_mut(current)
            .linked_parent_of
            .entry(id)
            .or_default();
        if !links.contains(&link) {
            links.push(link);
        }
    }

    fn delete_slice_proxy_parent(&mut self, id: EntityId, parent: EntityId, attribute: &Attribute) {
        let current = self.current;
        if !self.slice(current).linked_parent_of.contains_key(&id) {
            let Some(inherited) = self.links_at(current, id).cloned() else {
                return;
            };
            self.slice_mut(current).linked_parent_of.insert(id, inherited);
        }
        if let Some(links) = self.slice_mut(current).linked_parent_of.get_mut(&id) {
            links.retain(|link| !(link.parent == parent && link.attribute == *attribute));
        }
    }

    fn link_to_memory(&mut self, value: &Value) -> Result<(), MemoryError> {
        let Some(id) = value.as_entity() else {
            return Ok(());
        };
        let linked = self.get_proxy(id)?.memory;
        match linked {
            Some(memory) if memory != self.memory => Err(MemoryError::CrossMemory(id)),
            Some(_) if self.is_visible(self.current, id) => Ok(()),
            // Unlinked, or linked on another branch.
            Some(_) | None => {
                if !self.pending.contains(&id) {
                    self.pending.push(id);
                }
                Ok(())
            }
        }
    }
}
