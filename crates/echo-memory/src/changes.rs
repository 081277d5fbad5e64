// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Cross-slice diffing.
//!
//! [`Memory::get_changes_locations`] compares the state seen from two slices.
//! Only entities mentioned by a slice strictly below the common ancestor (on
//! either side) can differ, so those are the only ones examined.
use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::instrument;

use crate::error::MemoryError;
use crate::history::History;
use crate::ident::EntityId;
use crate::memory::Memory;
use crate::patch::Patch;
use crate::slice::{ParentLink, SliceId};

/// Where an updated entity changed.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Location {
    /// Object property, or non-index array property.
    Prop(String),
    /// Array position in the target slice. For a slot that no longer exists
    /// this is the position it would be inserted at.
    Index(usize),
    /// Set membership changed.
    Set,
}

/// Four disjoint buckets of differences between two slices.
///
/// An entity lands in the first bucket that applies, in the order `add`,
/// `remove`, `moved`, `update`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ChangesLocations {
    /// Reachable at the target but not at the source.
    pub add: BTreeSet<EntityId>,
    /// Reachable at the source but not at the target.
    pub remove: BTreeSet<EntityId>,
    /// Reachable at both, under a different set of parents. A moved entity
    /// is never listed in `update`, even when its content changed as well.
    pub moved: BTreeSet<EntityId>,
    /// Reachable at both with the same parents but different content.
    pub update: BTreeMap<EntityId, Vec<Location>>,
}

impl ChangesLocations {
    /// Returns `true` when the two slices look the same.
    pub fn is_empty(&self) -> bool {
        self.add.is_empty()
            && self.remove.is_empty()
            && self.moved.is_empty()
            && self.update.is_empty()
    }
}

impl Memory {
    /// Lists what differs when moving from slice `from` to slice `to`.
    ///
    /// # Errors
    /// [`MemoryError::UnknownSlice`] if either slice does not exist.
    #[instrument(skip(self))]
    pub fn get_changes_locations(
        &self,
        from: &str,
        to: &str,
    ) -> Result<ChangesLocations, MemoryError> {
        let history = &self.history;
        let from_id = history.lookup(from)?;
        let to_id = history.lookup(to)?;
        let ancestor = history.common_ancestor(from_id, to_id);
        let mut candidates = BTreeSet::new();
        for slice in history
            .span(from_id, ancestor)
            .into_iter()
            .chain(history.span(to_id, ancestor))
        {
            let slice = history.slice(slice);
            candidates.extend(slice.referenced_ids());
            candidates.extend(slice.invalidated.iter().copied());
        }
        // Detaching a container detaches everything below it.
        let candidates = history.descendants(from_id, history.descendants(to_id, candidates));

        let mut before = Presence::new(history, from_id);
        let mut after = Presence::new(history, to_id);
        let mut out = ChangesLocations::default();
        for id in candidates {
            match (before.present(id).0, after.present(id).0) {
                (false, false) => {}
                (false, true) => {
                    out.add.insert(id);
                }
                (true, false) => {
                    out.remove.insert(id);
                }
                (true, true) => {
                    if self.parents_at(from_id, id) != self.parents_at(to_id, id) {
                        out.moved.insert(id);
                        continue;
                    }
                    let before = history.value_at(from_id, id);
                    let locations = update_locations(before, history.value_at(to_id, id));
                    if !locations.is_empty() {
                        out.update.insert(id, locations);
                    }
                }
            }
        }
        Ok(out)
    }

    fn parents_at(&self, slice: SliceId, id: EntityId) -> BTreeSet<&ParentLink> {
        self.history
            .links_at(slice, id)
            .map(|links| links.iter().collect())
            .unwrap_or_default()
    }
}

impl History {
    /// `ids` plus every entity reachable from them at `slice`.
    fn descendants(&self, slice: SliceId, ids: BTreeSet<EntityId>) -> BTreeSet<EntityId> {
        let mut stack: Vec<EntityId> = ids.iter().copied().collect();
        let mut out = ids;
        while let Some(id) = stack.pop() {
            let Some(patch) = self.value_at(slice, id) else {
                continue;
            };
            for (child, _) in patch.references() {
                if out.insert(child) {
                    stack.push(child);
                }
            }
        }
        out
    }
}

/// Memoised reachability from the roots and diff roots at one slice.
struct Presence<'a> {
    history: &'a History,
    slice: SliceId,
    memo: BTreeMap<EntityId, bool>,
    visiting: BTreeSet<EntityId>,
}

impl<'a> Presence<'a> {
    fn new(history: &'a History, slice: SliceId) -> Self {
        Self {
            history,
            slice,
            memo: BTreeMap::new(),
            visiting: BTreeSet::new(),
        }
    }

    /// Whether `id` is visible and anchored as a root or under a present
    /// parent. The flag is `true` when a cycle was cut on the way, in which
    /// case a negative answer only holds for this walk and is not memoised.
    fn present(&mut self, id: EntityId) -> (bool, bool) {
        if let Some(known) = self.memo.get(&id) {
            return (*known, false);
        }
        if self.visiting.contains(&id) {
            return (false, true);
        }
        let history = self.history;
        if !history.is_visible(self.slice, id) {
            self.memo.insert(id, false);
            return (false, false);
        }
        if history.roots.contains(&id) || history.diff_roots.contains(&id) {
            self.memo.insert(id, true);
            return (true, false);
        }
        self.visiting.insert(id);
        let mut found = false;
        let mut cut = false;
        if let Some(links) = history.links_at(self.slice, id) {
            for link in links {
                let (parent, parent_cut) = self.present(link.parent);
                cut |= parent_cut;
                if parent {
                    found = true;
                    break;
                }
            }
        }
        self.visiting.remove(&id);
        if found || !cut {
            self.memo.insert(id, found);
        }
        (found, cut && !found)
    }
}

fn changed_props<V: PartialEq>(
    before: &BTreeMap<String, V>,
    after: &BTreeMap<String, V>,
) -> Vec<Location> {
    let keys: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
    keys.into_iter()
        .filter(|key| before.get(*key) != after.get(*key))
        .map(|key| Location::Prop(key.clone()))
        .collect()
}

fn update_locations(before: Option<Patch>, after: Option<Patch>) -> Vec<Location> {
    match (before, after) {
        (Some(Patch::Object(before)), Some(Patch::Object(after))) => {
            changed_props(&before.compile(), &after.compile())
        }
        (Some(Patch::Array(before)), Some(Patch::Array(after))) => {
            let before = before.compile();
            let after = after.compile();
            let old: BTreeMap<_, _> = before.slots.iter().map(|(k, v)| (k, v)).collect();
            let new: BTreeMap<_, _> = after.slots.iter().map(|(k, v)| (k, v)).collect();
            // Compiled slots are sorted by stable key.
            let order: Vec<_> = after.slots.iter().map(|(key, _)| key).collect();
            let keys: BTreeSet<_> = old.keys().chain(new.keys()).copied().collect();
            let indices: BTreeSet<usize> = keys
                .into_iter()
                .filter(|key| old.get(key) != new.get(key))
                .map(|key| match order.binary_search(&key) {
                    Ok(index) | Err(index) => index,
                })
                .collect();
            let mut locations: Vec<Location> = indices.into_iter().map(Location::Index).collect();
            locations.extend(changed_props(&before.props, &after.props));
            locations
        }
        (Some(Patch::Set(before)), Some(Patch::Set(after))) => {
            if before.compile() == after.compile() {
                Vec::new()
            } else {
                vec![Location::Set]
            }
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::versionable::draft::Draft;

    struct Fixture {
        memory: Memory,
        object: EntityId,
        list: EntityId,
        tags: EntityId,
    }

    fn fixture() -> Fixture {
        let mut memory = Memory::new();
        let mut draft = Draft::new();
        let list = draft.array([1.into(), 2.into(), 3.into()]);
        let tags = draft.set(["x".into()]);
        let object = draft.object([
            ("a", 1.into()),
            ("list", list.into()),
            ("tags", tags.into()),
        ]);
        let object_id = memory.make_versionable(&mut draft, object).unwrap();
        memory.attach(object_id).unwrap();
        memory.create("edit").unwrap();
        memory.switch_to("edit").unwrap();
        Fixture {
            memory,
            object: object_id,
            list: draft.wrapped(list).unwrap(),
            tags: draft.wrapped(tags).unwrap(),
        }
    }

    #[test]
    fn object_and_set_updates() {
        let mut f = fixture();
        f.memory.object(f.object).unwrap().set("a", 2).unwrap();
        f.memory.set(f.tags).unwrap().add("y").unwrap();

        let changes = f.memory.get_changes_locations("", "edit").unwrap();
        assert_eq!(changes.update[&f.object], vec![Location::Prop("a".into())]);
        assert_eq!(changes.update[&f.tags], vec![Location::Set]);
        assert!(changes.add.is_empty() && changes.moved.is_empty());
    }

    #[test]
    fn array_updates_are_reported_as_target_positions() {
        let mut f = fixture();
        f.memory.array(f.list).unwrap().push([4]).unwrap();
        let changes = f.memory.get_changes_locations("", "edit").unwrap();
        assert_eq!(changes.update[&f.list], vec![Location::Index(3)]);

        f.memory.array(f.list).unwrap().shift().unwrap();
        let changes = f.memory.get_changes_locations("", "edit").unwrap();
        assert_eq!(
            changes.update[&f.list],
            vec![Location::Index(0), Location::Index(2)]
        );
    }

    #[test]
    fn newly_linked_entities_are_added_and_removed_in_reverse() {
        let mut f = fixture();
        let mut draft = Draft::new();
        let child = draft.object([]);
        let child_id = f.memory.make_versionable(&mut draft, child).unwrap();
        f.memory.object(f.object).unwrap().set("child", child_id).unwrap();

        let forward = f.memory.get_changes_locations("", "edit").unwrap();
        assert!(forward.add.contains(&child_id));
        assert_eq!(forward.update[&f.object], vec![Location::Prop("child".into())]);

        let backward = f.memory.get_changes_locations("edit", "").unwrap();
        assert!(backward.remove.contains(&child_id));
    }

    #[test]
    fn reparented_entities_are_moved() {
        let mut f = fixture();
        let mut object = f.memory.object(f.object).unwrap();
        object.set("other", f.list).unwrap();
        object.remove("list").unwrap();
        f.memory.array(f.list).unwrap().push([4]).unwrap();

        let changes = f.memory.get_changes_locations("", "edit").unwrap();
        assert!(changes.moved.contains(&f.list));
        assert!(!changes.update.contains_key(&f.list));
    }

    #[test]
    fn identical_slices_have_no_changes() {
        let f = fixture();
        assert!(f.memory.get_changes_locations("", "edit").unwrap().is_empty());
        let same = f.memory.get_changes_locations("edit", "edit").unwrap();
        assert_eq!(same, ChangesLocations::default());
    }
}
