// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Versionable set adapter.
//!
//! Set patches are symmetric deltas against the parent slice, so `add` and
//! `delete` of the same member within one slice cancel out.
use std::collections::BTreeSet;

use crate::error::MemoryError;
use crate::ident::EntityId;
use crate::patch::{Patch, SetPatch};
use crate::slice::Attribute;
use crate::value::Value;
use crate::worker::MemoryWorker;

use super::{accept_value, Baseline, Kind, SyncState, Versionable};

#[derive(Debug)]
pub(crate) struct SetEntity {
    id: EntityId,
    sync: SyncState,
    members: BTreeSet<Value>,
}

fn set_patch(worker: &mut dyn MemoryWorker, id: EntityId) -> &mut SetPatch {
    worker
        .get_slice()
        .entry(id)
        .or_insert_with(|| Patch::empty(Kind::Set))
        .set_mut()
}

impl SetEntity {
    pub(crate) fn new(id: EntityId, members: BTreeSet<Value>) -> Self {
        Self {
            id,
            sync: SyncState::default(),
            members,
        }
    }

    fn prepare(&mut self, worker: &dyn MemoryWorker) -> Result<(), MemoryError> {
        self.sync.check_writable(worker)?;
        self.resync(worker);
        Ok(())
    }

    pub(crate) fn has(&mut self, worker: &dyn MemoryWorker, value: &Value) -> bool {
        self.resync(worker);
        self.members.contains(value)
    }

    pub(crate) fn len(&mut self, worker: &dyn MemoryWorker) -> usize {
        self.resync(worker);
        self.members.len()
    }

    pub(crate) fn values(&mut self, worker: &dyn MemoryWorker) -> Vec<Value> {
        self.resync(worker);
        self.members.iter().cloned().collect()
    }

    pub(crate) fn add(
        &mut self,
        worker: &mut dyn MemoryWorker,
        value: Value,
    ) -> Result<(), MemoryError> {
        self.prepare(worker)?;
        if self.members.contains(&value) {
            return Ok(());
        }
        let linked = self.sync.linked;
        accept_value(worker, linked, &value)?;
        if linked {
            if let Some(child) = value.as_entity() {
                worker.add_slice_proxy_parent(child, self.id, Attribute::Member);
            }
            set_patch(worker, self.id).add(value.clone());
            worker.mark_dirty(self.id);
        }
        self.members.insert(value);
        Ok(())
    }

    pub(crate) fn delete(
        &mut self,
        worker: &mut dyn MemoryWorker,
        value: &Value,
    ) -> Result<bool, MemoryError> {
        self.prepare(worker)?;
        if !self.members.remove(value) {
            return Ok(false);
        }
        if self.sync.linked {
            if let Some(child) = value.as_entity() {
                worker.delete_slice_proxy_parent(child, self.id, &Attribute::Member);
            }
            set_patch(worker, self.id).delete(value.clone());
            worker.mark_dirty(self.id);
        }
        Ok(true)
    }

    /// Deletes every visible member, one removal entry per member.
    pub(crate) fn clear(&mut self, worker: &mut dyn MemoryWorker) -> Result<(), MemoryError> {
        self.prepare(worker)?;
        let members: Vec<Value> = self.members.iter().cloned().collect();
        for member in &members {
            self.delete(worker, member)?;
        }
        Ok(())
    }
}

impl Versionable for SetEntity {
    fn id(&self) -> EntityId {
        self.id
    }

    fn kind(&self) -> Kind {
        Kind::Set
    }

    fn is_linked(&self) -> bool {
        self.sync.linked
    }

    fn link(&mut self, stamp: u64) -> Baseline {
        self.sync.linked = true;
        self.sync.synced_at = stamp;
        Baseline {
            patch: Patch::Set(SetPatch {
                added: self.members.clone(),
                removed: BTreeSet::new(),
            }),
            references: self.references(),
        }
    }

    fn resync(&mut self, worker: &dyn MemoryWorker) {
        let Some(stamp) = self.sync.stale(worker, self.id) else {
            return;
        };
        self.members = match worker.get_slice_value(self.id) {
            Some(Patch::Set(patch)) => patch.compile(),
            _ => BTreeSet::new(),
        };
        self.sync.synced_at = stamp;
    }

    fn references(&self) -> Vec<(EntityId, Attribute)> {
        self.members
            .iter()
            .filter_map(Value::as_entity)
            .map(|id| (id, Attribute::Member))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::history::History;
    use crate::ident::MemoryId;

    fn linked_set(history: &mut History, members: &[i64]) -> SetEntity {
        let id = EntityId::next();
        history.register(id, Kind::Set);
        let mut set = SetEntity::new(id, members.iter().map(|v| Value::Int(*v)).collect());
        let baseline = set.link(0);
        history.record_link(id, baseline.patch);
        set
    }

    fn child_patch(history: &History, id: EntityId) -> SetPatch {
        match history.slice(history.current).data.get(&id) {
            Some(Patch::Set(patch)) => patch.clone(),
            _ => SetPatch::default(),
        }
    }

    #[test]
    fn add_then_delete_leaves_no_delta() {
        let mut history = History::new(MemoryId::next());
        let mut set = linked_set(&mut history, &[1]);
        let child = history.create("child").unwrap();
        history.current = child;

        set.add(&mut history, Value::Int(2)).unwrap();
        assert!(set.delete(&mut history, &Value::Int(2)).unwrap());
        assert!(child_patch(&history, set.id()).is_empty());
    }

    #[test]
    fn clear_records_removals_relative_to_the_parent() {
        let mut history = History::new(MemoryId::next());
        let mut set = linked_set(&mut history, &[1, 2]);
        let child = history.create("child").unwrap();
        history.current = child;

        set.clear(&mut history).unwrap();
        assert_eq!(set.len(&history), 0);
        let patch = child_patch(&history, set.id());
        assert_eq!(patch.removed, BTreeSet::from([Value::Int(1), Value::Int(2)]));

        history.current = history.root;
        history.invalidate(set.id());
        assert_eq!(set.values(&history), vec![Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn deleting_a_missing_member_reports_false() {
        let mut history = History::new(MemoryId::next());
        let mut set = linked_set(&mut history, &[]);
        assert!(!set.delete(&mut history, &Value::Int(9)).unwrap());
        assert!(!set.has(&history, &Value::Int(9)));
    }
}
