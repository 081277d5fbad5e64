// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Debug view of one slice.
use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::error::MemoryError;
use crate::ident::EntityId;
use crate::memory::Memory;
use crate::patch::Patch;
use crate::slice::{ParentLink, SliceId};

/// Everything a slice records, with slice references resolved to names.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SliceReport {
    /// Slice name.
    pub name: String,
    /// Parent slice; `None` for the root.
    pub parent: Option<String>,
    /// Child slices in creation order.
    pub children: Vec<String>,
    /// Patches recorded in this slice.
    pub patches: BTreeMap<EntityId, Patch>,
    /// Parent-link lists rewritten in this slice.
    pub links: BTreeMap<EntityId, Vec<ParentLink>>,
    /// Entities marked dirty here.
    pub invalidated: BTreeSet<EntityId>,
    /// Entities first linked here.
    pub owned: BTreeSet<EntityId>,
    /// For a snapshot slice: the `(from, until)` range it compacted.
    pub snapshot_of: Option<(String, String)>,
    /// For a compacted slice: the snapshot that replaced it.
    pub replaced_by: Option<String>,
}

impl Memory {
    /// Reports the raw content of slice `name`.
    ///
    /// # Errors
    /// [`MemoryError::UnknownSlice`] if `name` does not exist.
    pub fn get_slice_and_changes(&self, name: &str) -> Result<SliceReport, MemoryError> {
        let history = &self.history;
        let slice = history.slice(history.lookup(name)?);
        let name_of = |id: SliceId| history.name_of(id).to_owned();
        Ok(SliceReport {
            name: slice.name.clone(),
            parent: slice.parent.map(name_of),
            children: slice.children.iter().copied().map(name_of).collect(),
            patches: slice.data.clone(),
            links: slice.linked_parent_of.clone(),
            invalidated: slice.invalidated.clone(),
            owned: slice.owned.clone(),
            snapshot_of: slice
                .snapshot_origin
                .map(|(from, until)| (name_of(from), name_of(until))),
            replaced_by: slice.snapshot_replacement.map(name_of),
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::versionable::draft::Draft;

    #[test]
    fn report_serializes_to_json() {
        let mut memory = Memory::new();
        let mut draft = Draft::new();
        let root = draft.object([("a", 1.into())]);
        let id = memory.make_versionable(&mut draft, root).unwrap();
        memory.attach(id).unwrap();
        memory.create("next").unwrap();

        let report = memory.get_slice_and_changes("").unwrap();
        assert_eq!(report.parent, None);
        assert_eq!(report.children, vec!["next".to_owned()]);
        assert!(report.owned.contains(&id));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["name"], "");
        assert!(json["patches"][id.value().to_string()]["Object"].is_object());
    }

    #[test]
    fn snapshot_links_are_named() {
        let mut memory = Memory::new();
        for name in ["a", "b"] {
            memory.create(name).unwrap();
            memory.switch_to(name).unwrap();
        }
        memory.snapshot("a", "b", "s").unwrap();
        let snapshot = memory.get_slice_and_changes("s").unwrap();
        assert_eq!(snapshot.snapshot_of, Some(("a".into(), "b".into())));
        let original = memory.get_slice_and_changes("a").unwrap();
        assert_eq!(original.replaced_by, Some("s".into()));
    }
}
