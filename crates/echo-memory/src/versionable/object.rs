// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Versionable object adapter.
use std::collections::BTreeMap;

use crate::error::MemoryError;
use crate::ident::EntityId;
use crate::memory::Memory;
use crate::patch::{ObjectPatch, Patch, Slot};
use crate::slice::Attribute;
use crate::value::Value;
use crate::worker::MemoryWorker;

use super::{accept_value, Baseline, Kind, SyncState, Versionable};

/// Getter invoked with the memory and the entity (never its raw data).
pub type Getter = fn(&mut Memory, EntityId) -> Option<Value>;
/// Setter invoked with the memory, the entity and the assigned value.
pub type Setter = fn(&mut Memory, EntityId, Value) -> Result<(), MemoryError>;

/// User-defined accessor pair attached to one object property.
///
/// Accessors are not versioned: they live beside the entity, not in any slice,
/// and are consulted before the property table on every read and write.
#[derive(Clone, Copy, Default)]
pub struct Accessor {
    /// Called on reads of the property.
    pub get: Option<Getter>,
    /// Called on writes of the property. A missing setter ignores writes.
    pub set: Option<Setter>,
}

impl core::fmt::Debug for Accessor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Accessor")
            .field("get", &self.get.is_some())
            .field("set", &self.set.is_some())
            .finish()
    }
}

/// Shape of one own property.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Descriptor {
    /// Plain data property.
    Data(Value),
    /// Accessor property.
    Accessor {
        /// A getter is defined.
        getter: bool,
        /// A setter is defined.
        setter: bool,
    },
}

#[derive(Debug)]
pub(crate) struct ObjectEntity {
    id: EntityId,
    sync: SyncState,
    props: BTreeMap<String, Value>,
    accessors: BTreeMap<String, Accessor>,
}

fn object_patch(worker: &mut dyn MemoryWorker, id: EntityId) -> &mut ObjectPatch {
    worker
        .get_slice()
        .entry(id)
        .or_insert_with(|| Patch::empty(Kind::Object))
        .object_mut()
}

impl ObjectEntity {
    pub(crate) fn new(id: EntityId, props: BTreeMap<String, Value>) -> Self {
        Self {
            id,
            sync: SyncState::default(),
            props,
            accessors: BTreeMap::new(),
        }
    }

    pub(crate) fn get(&mut self, worker: &dyn MemoryWorker, key: &str) -> Option<Value> {
        self.resync(worker);
        self.props.get(key).cloned()
    }

    pub(crate) fn has(&mut self, worker: &dyn MemoryWorker, key: &str) -> bool {
        self.resync(worker);
        self.props.contains_key(key) || self.accessors.contains_key(key)
    }

    pub(crate) fn keys(&mut self, worker: &dyn MemoryWorker) -> Vec<String> {
        self.resync(worker);
        self.props.keys().cloned().collect()
    }

    pub(crate) fn entries(&mut self, worker: &dyn MemoryWorker) -> Vec<(String, Value)> {
        self.resync(worker);
        self.props
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    pub(crate) fn descriptor(
        &mut self,
        worker: &dyn MemoryWorker,
        key: &str,
    ) -> Option<Descriptor> {
        if let Some(accessor) = self.accessors.get(key) {
            return Some(Descriptor::Accessor {
                getter: accessor.get.is_some(),
                setter: accessor.set.is_some(),
            });
        }
        self.get(worker, key).map(Descriptor::Data)
    }

    pub(crate) fn accessor(&self, key: &str) -> Option<Accessor> {
        self.accessors.get(key).copied()
    }

    pub(crate) fn define_accessor(&mut self, key: &str, accessor: Accessor) {
        self.accessors.insert(key.to_owned(), accessor);
    }

    pub(crate) fn set(
        &mut self,
        worker: &mut dyn MemoryWorker,
        key: &str,
        value: Value,
    ) -> Result<(), MemoryError> {
        if !self.sync.linked {
            accept_value(worker, false, &value)?;
            self.props.insert(key.to_owned(), value);
            return Ok(());
        }
        self.sync.check_writable(worker)?;
        self.resync(worker);
        let previous = self.props.get(key);
        if previous == Some(&value) {
            return Ok(());
        }
        accept_value(worker, true, &value)?;

        let attribute = Attribute::Prop(key.to_owned());
        if let Some(old) = previous.and_then(Value::as_entity) {
            worker.delete_slice_proxy_parent(old, self.id, &attribute);
        }
        if let Some(child) = value.as_entity() {
            worker.add_slice_proxy_parent(child, self.id, attribute);
        }
        object_patch(worker, self.id)
            .props
            .insert(key.to_owned(), Slot::Value(value.clone()));
        worker.mark_dirty(self.id);
        self.props.insert(key.to_owned(), value);
        Ok(())
    }

    pub(crate) fn remove(
        &mut self,
        worker: &mut dyn MemoryWorker,
        key: &str,
    ) -> Result<(), MemoryError> {
        if !self.sync.linked {
            self.props.remove(key);
            return Ok(());
        }
        self.sync.check_writable(worker)?;
        self.resync(worker);
        let Some(old) = self.props.remove(key) else {
            return Ok(());
        };
        if let Some(child) = old.as_entity() {
            worker.delete_slice_proxy_parent(child, self.id, &Attribute::Prop(key.to_owned()));
        }
        object_patch(worker, self.id).props.insert(key.to_owned(), Slot::Removed);
        worker.mark_dirty(self.id);
        Ok(())
    }
}

impl Versionable for ObjectEntity {
    fn id(&self) -> EntityId {
        self.id
    }

    fn kind(&self) -> Kind {
        Kind::Object
    }

    fn is_linked(&self) -> bool {
        self.sync.linked
    }

    fn link(&mut self, stamp: u64) -> Baseline {
        self.sync.linked = true;
        self.sync.synced_at = stamp;
        let props = self
            .props
            .iter()
            .map(|(key, value)| (key.clone(), Slot::Value(value.clone())))
            .collect();
        Baseline {
            patch: Patch::Object(ObjectPatch { props }),
            references: self.references(),
        }
    }

    fn resync(&mut self, worker: &dyn MemoryWorker) {
        let Some(stamp) = self.sync.stale(worker, self.id) else {
            return;
        };
        self.props = match worker.get_slice_value(self.id) {
            Some(Patch::Object(patch)) => patch.compile(),
            _ => BTreeMap::new(),
        };
        self.sync.synced_at = stamp;
    }

    fn references(&self) -> Vec<(EntityId, Attribute)> {
        self.props
            .iter()
            .filter_map(|(key, value)| {
                value
                    .as_entity()
                    .map(|id| (id, Attribute::Prop(key.clone())))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::history::History;
    use crate::ident::MemoryId;

    fn linked_object(history: &mut History, props: &[(&str, i64)]) -> ObjectEntity {
        let id = EntityId::next();
        history.register(id, Kind::Object);
        let props = props
            .iter()
            .map(|(key, value)| ((*key).to_owned(), Value::Int(*value)))
            .collect();
        let mut object = ObjectEntity::new(id, props);
        let baseline = object.link(0);
        history.record_link(id, baseline.patch);
        object
    }

    #[test]
    fn linked_writes_land_in_the_current_slice() {
        let mut history = History::new(MemoryId::next());
        let mut object = linked_object(&mut history, &[("a", 1)]);
        let child = history.create("child").unwrap();
        history.current = child;

        object.set(&mut history, "a", Value::Int(2)).unwrap();
        let Some(Patch::Object(patch)) = history.slice(child).data.get(&object.id()) else {
            unreachable!("write recorded in the child slice");
        };
        assert_eq!(patch.props["a"], Slot::Value(Value::Int(2)));
        assert!(history.slice(child).invalidated.contains(&object.id()));
    }

    #[test]
    fn frozen_slice_rejects_mutation() {
        let mut history = History::new(MemoryId::next());
        let mut object = linked_object(&mut history, &[("a", 1)]);
        history.create("child").unwrap();
        assert_eq!(
            object.set(&mut history, "a", Value::Int(5)),
            Err(MemoryError::Frozen)
        );
        assert_eq!(object.remove(&mut history, "a"), Err(MemoryError::Frozen));
    }

    #[test]
    fn identical_write_and_missing_delete_record_nothing() {
        let mut history = History::new(MemoryId::next());
        let mut object = linked_object(&mut history, &[("a", 1)]);
        let child = history.create("child").unwrap();
        history.current = child;

        object.set(&mut history, "a", Value::Int(1)).unwrap();
        object.remove(&mut history, "missing").unwrap();
        assert!(history.slice(child).data.is_empty());
    }

    #[test]
    fn stale_cache_rebuilds_from_history() {
        let mut history = History::new(MemoryId::next());
        let mut object = linked_object(&mut history, &[("a", 1)]);
        let child = history.create("child").unwrap();
        history.current = child;
        object.remove(&mut history, "a").unwrap();
        assert_eq!(object.get(&history, "a"), None);

        history.current = history.root;
        history.invalidate(object.id());
        assert_eq!(object.get(&history, "a"), Some(Value::Int(1)));
    }

    #[test]
    fn unlinked_object_rejects_foreign_entities() {
        let mut history = History::new(MemoryId::next());
        let id = EntityId::next();
        history.register(id, Kind::Object);
        let mut object = ObjectEntity::new(id, BTreeMap::new());
        let stranger = EntityId::next();
        assert_eq!(
            object.set(&mut history, "x", Value::Entity(stranger)),
            Err(MemoryError::CrossMemory(stranger))
        );
        object.set(&mut history, "x", Value::Int(3)).unwrap();
        assert_eq!(object.get(&history, "x"), Some(Value::Int(3)));
        assert!(history.get_slice().is_empty());
    }
}
