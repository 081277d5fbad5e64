// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Patch compaction: snapshot, compress and the auto-snapshot policy.
//!
//! Both operations fold the slices of a path `from ..= until` oldest first
//! into one accumulator (see [`crate::patch::Patch::merge`]). A snapshot puts
//! the accumulator into a new slice that takes over `until`'s children and
//! leaves the original slices in place for [`Memory::get_path`]; compress
//! writes it into `from` and deletes the rest of the path.
use std::collections::BTreeSet;

use tracing::{debug, instrument};

use crate::error::MemoryError;
use crate::history::History;
use crate::ident::EntityId;
use crate::memory::Memory;
use crate::slice::{Slice, SliceId};

impl History {
    /// `until` and its ancestors up to `from`, both included, oldest first.
    fn window(&self, from: SliceId, until: SliceId) -> Vec<SliceId> {
        let mut window = self.span(until, from);
        window.push(from);
        window.reverse();
        window
    }

    /// Compacts `from ..= until` into a new slice named `name`.
    pub(crate) fn snapshot(&mut self, from: SliceId, until: SliceId, name: &str) -> SliceId {
        let window = self.window(from, until);
        let mut merged = Slice::new(name, self.slice(from).parent);
        for id in &window {
            merged.absorb(self.slice(*id));
        }
        merged.snapshot_origin = Some((from, until));
        merged.children = std::mem::take(&mut self.slice_mut(until).children);
        let children = merged.children.clone();
        let snapshot = self.insert_slice(merged);
        for child in children {
            self.slice_mut(child).parent = Some(snapshot);
        }
        for id in window {
            self.slice_mut(id).snapshot_replacement = Some(snapshot);
        }
        snapshot
    }

    fn check_range(
        &self,
        from: &str,
        until: &str,
        allow_root: bool,
    ) -> Result<(SliceId, SliceId), MemoryError> {
        let from_id = self.lookup(from)?;
        let until_id = self.lookup(until)?;
        let invalid = || MemoryError::InvalidRange {
            from: from.to_owned(),
            until: until.to_owned(),
        };
        if (!allow_root && from_id == self.root) || !self.is_ancestor_or_self(from_id, until_id) {
            return Err(invalid());
        }
        Ok((from_id, until_id))
    }
}

impl Memory {
    /// Compacts every slice on the path `from ..= until` into a new slice
    /// `name`, which takes over `until`'s children.
    ///
    /// The compacted slices stay in place; `get_path(.., true)` expands the
    /// snapshot back into them. Reading any entity at `name` yields the value
    /// it had at `until`.
    ///
    /// # Errors
    /// [`MemoryError::DuplicateSlice`] if `name` exists,
    /// [`MemoryError::UnknownSlice`] for unknown ends,
    /// [`MemoryError::InvalidRange`] unless `from` is a non-root
    /// ancestor-or-self of `until`.
    #[instrument(skip(self))]
    pub fn snapshot(&mut self, from: &str, until: &str, name: &str) -> Result<(), MemoryError> {
        let (from_id, until_id) = self.history.check_range(from, until, false)?;
        if self.history.contains(name) {
            return Err(MemoryError::DuplicateSlice(name.to_owned()));
        }
        self.history.snapshot(from_id, until_id, name);
        debug!(from, until, snapshot = name, "snapshotted slices");
        Ok(())
    }

    /// Compacts the path `from ..= until` into `from` and deletes every other
    /// slice on it, together with side branches hanging off the deleted
    /// slices. `until`'s children become `from`'s children.
    ///
    /// # Errors
    /// [`MemoryError::InvalidRange`] unless `from` is an ancestor-or-self of
    /// `until` without children off the path, [`MemoryError::SliceInUse`]
    /// when the current slice would be deleted (the current slice moves to
    /// `from` when it is `until`).
    #[instrument(skip(self))]
    pub fn compress(&mut self, from: &str, until: &str) -> Result<(), MemoryError> {
        let (from_id, until_id) = self.history.check_range(from, until, true)?;
        if from_id == until_id {
            return Ok(());
        }
        let history = &mut self.history;
        let window = history.span(until_id, from_id);
        let path: BTreeSet<SliceId> = window.iter().copied().collect();
        if history
            .slice(from_id)
            .children
            .iter()
            .any(|child| !path.contains(child))
        {
            return Err(MemoryError::InvalidRange {
                from: from.to_owned(),
                until: until.to_owned(),
            });
        }

        let mut doomed = window.clone();
        for id in window.iter().filter(|id| **id != until_id) {
            for child in &history.slice(*id).children {
                if !path.contains(child) {
                    doomed.extend(history.subtree(*child));
                }
            }
        }
        let current = history.current;
        if current != until_id && doomed.contains(&current) {
            return Err(MemoryError::SliceInUse(history.name_of(current).to_owned()));
        }

        let mut touched: BTreeSet<EntityId> = BTreeSet::new();
        for id in window.iter().rev() {
            let newer = std::mem::take(history.slice_mut(*id));
            touched.extend(newer.data.keys().copied());
            history.slice_mut(from_id).absorb(&newer);
            *history.slice_mut(*id) = newer;
        }
        let children = std::mem::take(&mut history.slice_mut(until_id).children);
        for child in &children {
            history.slice_mut(*child).parent = Some(from_id);
        }
        history.slice_mut(from_id).children = children;
        if current == until_id {
            history.current = from_id;
        }

        let candidates = history.delete_slices(&doomed);
        for id in touched {
            self.history.invalidate(id);
        }
        let collected = self.collect(candidates);
        debug!(from, until, deleted = doomed.len(), collected, "compressed slices");
        Ok(())
    }

    /// Snapshots the oldest window of plain slices on the current chain while
    /// the chain is longer than the configured threshold.
    ///
    /// When no window of plain slices is left, the oldest window is taken as
    /// is and earlier snapshots nest inside the new one.
    pub(crate) fn auto_snapshot(&mut self) {
        let threshold = self.config().snapshot_threshold();
        let per = self.config().slices_per_snapshot;
        loop {
            let mut chain = self.history.chain(self.history.current);
            if chain.len() <= threshold {
                return;
            }
            chain.reverse();
            let Some((from, until)) = self.oldest_window(&chain, per) else {
                return;
            };
            let name = self.snapshot_name(until);
            self.history.snapshot(from, until, &name);
            debug!(
                from = self.history.name_of(from),
                until = self.history.name_of(until),
                snapshot = %name,
                "auto-snapshot"
            );
        }
    }

    /// First `per` consecutive slices of `chain` (root first) that are not
    /// snapshots, falling back to the first `per` slices.
    fn oldest_window(&self, chain: &[SliceId], per: usize) -> Option<(SliceId, SliceId)> {
        // Neither the root nor the current slice can be compacted.
        let candidates = chain.get(1..chain.len().saturating_sub(1))?;
        if candidates.len() < per {
            return None;
        }
        let mut run_start: Option<usize> = None;
        for (index, id) in candidates.iter().enumerate() {
            if self.history.slice(*id).snapshot_origin.is_some() {
                run_start = None;
                continue;
            }
            let start = *run_start.get_or_insert(index);
            if index + 1 - start == per {
                return Some((candidates[start], *id));
            }
        }
        Some((candidates[0], candidates[per - 1]))
    }

    fn snapshot_name(&self, until: SliceId) -> String {
        let base = format!("{}@snapshot", self.history.name_of(until));
        let mut name = base.clone();
        let mut suffix = 1_u32;
        while self.history.contains(&name) {
            name = format!("{base}-{suffix}");
            suffix += 1;
        }
        name
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::value::Value;
    use crate::versionable::draft::Draft;

    fn chain_of(memory: &mut Memory, names: &[&str], id: EntityId) {
        for (step, name) in names.iter().enumerate() {
            memory.create(name).unwrap();
            memory.switch_to(name).unwrap();
            memory
                .object(id)
                .unwrap()
                .set("step", i64::try_from(step).unwrap())
                .unwrap();
        }
    }

    fn tracked(memory: &mut Memory) -> EntityId {
        let mut draft = Draft::new();
        let root = draft.object([("step", (-1).into())]);
        let id = memory.make_versionable(&mut draft, root).unwrap();
        memory.attach(id).unwrap();
        id
    }

    #[test]
    fn snapshot_rejects_root_and_reversed_ranges() {
        let mut memory = Memory::new();
        let id = tracked(&mut memory);
        chain_of(&mut memory, &["a", "b"], id);
        assert!(matches!(
            memory.snapshot("", "b", "s"),
            Err(MemoryError::InvalidRange { .. })
        ));
        assert!(matches!(
            memory.snapshot("b", "a", "s"),
            Err(MemoryError::InvalidRange { .. })
        ));
        assert_eq!(
            memory.snapshot("a", "b", "a"),
            Err(MemoryError::DuplicateSlice("a".into()))
        );
    }

    #[test]
    fn compress_moves_current_from_until_to_from() {
        let mut memory = Memory::new();
        let id = tracked(&mut memory);
        chain_of(&mut memory, &["a", "b", "c"], id);

        memory.compress("a", "c").unwrap();
        assert_eq!(memory.current_slice(), "a");
        assert_eq!(memory.get_path("a", false).unwrap(), vec!["a", ""]);
        assert_eq!(memory.object(id).unwrap().get("step"), Some(Value::Int(2)));
        assert!(memory.get_path("b", false).is_err());
    }

    #[test]
    fn compress_refuses_to_delete_the_current_side_branch() {
        let mut memory = Memory::new();
        let id = tracked(&mut memory);
        chain_of(&mut memory, &["a", "b", "c"], id);
        memory.switch_to("b").unwrap();
        memory.remove("c").unwrap();
        memory.create("c2").unwrap();
        memory.create("side").unwrap();
        memory.switch_to("side").unwrap();

        assert_eq!(
            memory.compress("a", "c2"),
            Err(MemoryError::SliceInUse("side".into()))
        );
    }

    #[test]
    fn auto_snapshot_bounds_the_chain() {
        let config = crate::config::MemoryConfig {
            flat_slices: 4,
            slices_per_snapshot: 2,
            auto_snapshot: true,
        };
        let mut memory = Memory::with_config(config).unwrap();
        let id = tracked(&mut memory);
        let names: Vec<String> = (0..12).map(|n| format!("s{n}")).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        chain_of(&mut memory, &names, id);

        let path = memory.get_path("s11", false).unwrap();
        assert!(path.len() <= 4 + 2, "path too long: {path:?}");
        assert!(path.iter().any(|name| name.ends_with("@snapshot")));
        let full = memory.get_path("s11", true).unwrap();
        assert_eq!(full.len(), 13);
        assert_eq!(memory.object(id).unwrap().get("step"), Some(Value::Int(11)));
    }
}
