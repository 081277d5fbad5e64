// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Upward traversal of parent links.
use std::collections::{BTreeMap, BTreeSet};

use crate::error::MemoryError;
use crate::ident::EntityId;
use crate::memory::Memory;
use crate::slice::Attribute;
use crate::worker::MemoryWorker;

/// Attribute paths from an ancestor down to an entity, keyed by ancestor.
pub type ParentPaths = BTreeMap<EntityId, Vec<Vec<Attribute>>>;

struct Walk<'a> {
    memory: &'a Memory,
    memo: BTreeMap<EntityId, ParentPaths>,
    visiting: BTreeSet<EntityId>,
}

impl Walk<'_> {
    fn stops_at(&self, id: EntityId) -> bool {
        let history = &self.memory.history;
        history.roots.contains(&id) || history.diff_roots.contains(&id)
    }

    /// Paths above `id`. The flag is `true` when a back edge was cut below
    /// this call; such a result is partial and is not memoised.
    fn paths(&mut self, id: EntityId) -> (ParentPaths, bool) {
        if let Some(done) = self.memo.get(&id) {
            return (done.clone(), false);
        }
        self.visiting.insert(id);
        let memory = self.memory;
        let history = &memory.history;
        let links = history
            .links_at(history.current, id)
            .cloned()
            .unwrap_or_default();
        let mut out = ParentPaths::new();
        let mut cut = false;
        for link in links {
            out.entry(link.parent)
                .or_default()
                .push(vec![link.attribute.clone()]);
            if self.stops_at(link.parent) {
                continue;
            }
            if self.visiting.contains(&link.parent) {
                cut = true;
                continue;
            }
            let (above, partial) = self.paths(link.parent);
            cut |= partial;
            for (ancestor, paths) in above {
                let slot = out.entry(ancestor).or_default();
                for mut path in paths {
                    path.push(link.attribute.clone());
                    if !slot.contains(&path) {
                        slot.push(path);
                    }
                }
            }
        }
        self.visiting.remove(&id);
        if !cut {
            self.memo.insert(id, out.clone());
        }
        (out, cut)
    }
}

impl Memory {
    /// Every ancestor of `id` at the current slice, each with the attribute
    /// paths leading from it down to `id`.
    ///
    /// The walk stops at roots and diff roots. Without cycles it visits each
    /// shared sub-object once, so diamond-shaped graphs stay linear.
    ///
    /// # Errors
    /// [`MemoryError::NotVersionable`] for a collected id,
    /// [`MemoryError::CrossMemory`] for an id of another memory.
    pub fn get_parents(&self, id: EntityId) -> Result<ParentPaths, MemoryError> {
        self.history.get_proxy(id)?;
        let mut walk = Walk {
            memory: self,
            memo: BTreeMap::new(),
            visiting: BTreeSet::new(),
        };
        Ok(walk.paths(id).0)
    }

    /// Roots and diff roots above `id` at the current slice, including `id`
    /// itself when it is one.
    ///
    /// # Errors
    /// Same as [`Memory::get_parents`].
    pub fn get_roots(&self, id: EntityId) -> Result<BTreeSet<EntityId>, MemoryError> {
        let parents = self.get_parents(id)?;
        let history = &self.history;
        let is_root = |candidate: &EntityId| {
            history.roots.contains(candidate) || history.diff_roots.contains(candidate)
        };
        let mut roots: BTreeSet<EntityId> = parents.into_keys().filter(is_root).collect();
        if is_root(&id) {
            roots.insert(id);
        }
        Ok(roots)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::versionable::draft::Draft;

    #[test]
    fn diamond_reports_both_paths_once() {
        let mut memory = Memory::new();
        let mut draft = Draft::new();
        let shared = draft.set([]);
        let left = draft.object([("child", shared.into())]);
        let right = draft.object([("child", shared.into())]);
        let root = draft.object([("l", left.into()), ("r", right.into())]);
        let root_id = memory.make_versionable(&mut draft, root).unwrap();
        memory.attach(root_id).unwrap();

        let shared_id = draft.wrapped(shared).unwrap();
        let parents = memory.get_parents(shared_id).unwrap();
        let mut paths = parents[&root_id].clone();
        paths.sort();
        assert_eq!(
            paths,
            vec![
                vec![Attribute::Prop("l".into()), Attribute::Prop("child".into())],
                vec![Attribute::Prop("r".into()), Attribute::Prop("child".into())],
            ]
        );
        assert_eq!(parents.len(), 3);
        assert_eq!(
            memory.get_roots(shared_id).unwrap(),
            BTreeSet::from([root_id])
        );
    }

    #[test]
    fn diff_roots_stop_the_walk() {
        let mut memory = Memory::new();
        let mut draft = Draft::new();
        let leaf = draft.array([]);
        let middle = draft.object([("leaf", leaf.into())]);
        let root = draft.object([("middle", middle.into())]);
        let root_id = memory.make_versionable(&mut draft, root).unwrap();
        memory.attach(root_id).unwrap();
        let middle_id = draft.wrapped(middle).unwrap();
        memory.mark_as_diff_root(middle_id).unwrap();

        let leaf_id = draft.wrapped(leaf).unwrap();
        let parents = memory.get_parents(leaf_id).unwrap();
        assert_eq!(parents.keys().copied().collect::<Vec<_>>(), vec![middle_id]);
        assert_eq!(memory.get_roots(middle_id).unwrap(), BTreeSet::from([middle_id]));
    }

    #[test]
    fn cycles_terminate() {
        let mut memory = Memory::new();
        let mut draft = Draft::new();
        let a = draft.object([]);
        let b = draft.object([("a", a.into())]);
        draft.insert(a, "b", b).unwrap();
        let holder = draft.object([("a", a.into())]);
        let holder_id = memory.make_versionable(&mut draft, holder).unwrap();
        memory.attach(holder_id).unwrap();

        let a_id = draft.wrapped(a).unwrap();
        let roots = memory.get_roots(a_id).unwrap();
        assert_eq!(roots, BTreeSet::from([holder_id]));
    }

    #[test]
    fn shared_nodes_inside_a_cycle_keep_every_path() {
        let mut memory = Memory::new();
        let mut draft = Draft::new();
        let shared = draft.object([]);
        let first = draft.object([("s", shared.into())]);
        let second = draft.object([("s", shared.into()), ("back", first.into())]);
        draft.insert(first, "b", second).unwrap();
        let root = draft.object([("a", first.into())]);
        let root_id = memory.make_versionable(&mut draft, root).unwrap();
        memory.attach(root_id).unwrap();

        let shared_id = draft.wrapped(shared).unwrap();
        let prop = |key: &str| Attribute::Prop(key.into());
        let parents = memory.get_parents(shared_id).unwrap();
        let from_root = &parents[&root_id];
        assert!(from_root.contains(&vec![prop("a"), prop("s")]));
        assert!(from_root.contains(&vec![prop("a"), prop("b"), prop("s")]));
        assert_eq!(from_root.len(), 2);
    }
}
