// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Versionable array adapter.
//!
//! The live array is mirrored by a sorted list of [`StableKey`]s in lockstep
//! with the values. Structural edits allocate keys between the neighbours of
//! the edited range and write `Removed` for vacated keys, so older patches stay
//! valid without renumbering. A value-to-keys lookup, rebuilt with the cache,
//! serves `index_of` through a binary search of the key list.
use std::collections::{BTreeMap, BTreeSet};

use crate::error::MemoryError;
use crate::ident::EntityId;
use crate::patch::{ArrayPatch, Patch, Slot};
use crate::slice::Attribute;
use crate::stable_key::StableKey;
use crate::value::Value;
use crate::worker::MemoryWorker;

use super::{accept_value, Baseline, Kind, SyncState, Versionable};

/// Property name that reads and writes the array length.
const LENGTH: &str = "length";

/// Longest array the adapter grows to (`2^32 - 1`).
const MAX_LENGTH: usize = 4_294_967_295;

#[derive(Debug)]
pub(crate) struct ArrayEntity {
    id: EntityId,
    sync: SyncState,
    keys: Vec<StableKey>,
    values: Vec<Option<Value>>,
    props: BTreeMap<String, Value>,
    lookup: BTreeMap<Value, BTreeSet<StableKey>>,
}

fn array_patch(worker: &mut dyn MemoryWorker, id: EntityId) -> &mut ArrayPatch {
    worker
        .get_slice()
        .entry(id)
        .or_insert_with(|| Patch::empty(Kind::Array))
        .array_mut()
}

fn slot_of(value: Option<&Value>) -> Slot {
    value.map_or(Slot::Unset, |v| Slot::Value(v.clone()))
}

impl ArrayEntity {
    pub(crate) fn new(id: EntityId, values: Vec<Option<Value>>) -> Self {
        let keys = StableKey::run_between(None, None, values.len());
        let mut entity = Self {
            id,
            sync: SyncState::default(),
            keys,
            values,
            props: BTreeMap::new(),
            lookup: BTreeMap::new(),
        };
        entity.rebuild_lookup();
        entity
    }

    fn rebuild_lookup(&mut self) {
        self.lookup.clear();
        for (key, value) in self.keys.iter().zip(&self.values) {
            if let Some(value) = value {
                self.lookup
                    .entry(value.clone())
                    .or_default()
                    .insert(key.clone());
            }
        }
    }

    fn forget(&mut self, key: &StableKey, value: Option<&Value>) {
        let Some(value) = value else {
            return;
        };
        if let Some(keys) = self.lookup.get_mut(value) {
            keys.remove(key);
            if keys.is_empty() {
                self.lookup.remove(value);
            }
        }
    }

    fn remember(&mut self, key: &StableKey, value: Option<&Value>) {
        if let Some(value) = value {
            self.lookup
                .entry(value.clone())
                .or_default()
                .insert(key.clone());
        }
    }

    /// Entry step of every mutation: frozen check and resync when linked.
    fn prepare(&mut self, worker: &dyn MemoryWorker) -> Result<(), MemoryError> {
        self.sync.check_writable(worker)?;
        self.resync(worker);
        Ok(())
    }

    pub(crate) fn len(&mut self, worker: &dyn MemoryWorker) -> usize {
        self.resync(worker);
        self.values.len()
    }

    pub(crate) fn get(&mut self, worker: &dyn MemoryWorker, index: usize) -> Option<Value> {
        self.resync(worker);
        self.values.get(index).cloned().flatten()
    }

    pub(crate) fn items(&mut self, worker: &dyn MemoryWorker) -> Vec<Option<Value>> {
        self.resync(worker);
        self.values.clone()
    }

    pub(crate) fn stable_keys(&mut self, worker: &dyn MemoryWorker) -> Vec<StableKey> {
        self.resync(worker);
        self.keys.clone()
    }

    pub(crate) fn index_of(&mut self, worker: &dyn MemoryWorker, value: &Value) -> Option<usize> {
        self.resync(worker);
        let first = self.lookup.get(value)?.first()?;
        self.keys.binary_search(first).ok()
    }

    pub(crate) fn prop(&mut self, worker: &dyn MemoryWorker, key: &str) -> Option<Value> {
        self.resync(worker);
        if key == LENGTH {
            return Some(Value::Int(i64::try_from(self.values.len()).unwrap_or(i64::MAX)));
        }
        self.props.get(key).cloned()
    }

    pub(crate) fn set(
        &mut self,
        worker: &mut dyn MemoryWorker,
        index: usize,
        value: Value,
    ) -> Result<(), MemoryError> {
        self.prepare(worker)?;
        let len = self.values.len();
        if index >= len {
            if index >= MAX_LENGTH {
                return Err(MemoryError::NotVersionable);
            }
            let mut items = vec![None; index - len];
            items.push(Some(value));
            return self.splice_slots(worker, len, 0, items).map(|_| ());
        }
        if self.values[index].as_ref() == Some(&value) {
            return Ok(());
        }
        let linked = self.sync.linked;
        accept_value(worker, linked, &value)?;

        let key = self.keys[index].clone();
        let old = self.values[index].take();
        if linked {
            let attribute = Attribute::Index(key.clone());
            if let Some(child) = old.as_ref().and_then(Value::as_entity) {
                worker.delete_slice_proxy_parent(child, self.id, &attribute);
            }
            if let Some(child) = value.as_entity() {
                worker.add_slice_proxy_parent(child, self.id, attribute);
            }
            array_patch(worker, self.id)
                .slots
                .insert(key.clone(), Slot::Value(value.clone()));
            worker.mark_dirty(self.id);
        }
        self.forget(&key, old.as_ref());
        self.remember(&key, Some(&value));
        self.values[index] = Some(value);
        Ok(())
    }

    /// Truncates (writing `Removed` for every dropped slot) or extends with holes.
    pub(crate) fn set_len(
        &mut self,
        worker: &mut dyn MemoryWorker,
        len: usize,
    ) -> Result<(), MemoryError> {
        self.prepare(worker)?;
        if len > MAX_LENGTH {
            return Err(MemoryError::NotVersionable);
        }
        let current = self.values.len();
        if len < current {
            self.splice_slots(worker, len, current - len, Vec::new())?;
        } else if len > current {
            self.splice_slots(worker, current, 0, vec![None; len - current])?;
        }
        Ok(())
    }

    pub(crate) fn splice(
        &mut self,
        worker: &mut dyn MemoryWorker,
        start: usize,
        delete_count: usize,
        items: Vec<Value>,
    ) -> Result<Vec<Option<Value>>, MemoryError> {
        self.prepare(worker)?;
        self.splice_slots(worker, start, delete_count, items.into_iter().map(Some).collect())
    }

    pub(crate) fn push(
        &mut self,
        worker: &mut dyn MemoryWorker,
        items: Vec<Value>,
    ) -> Result<usize, MemoryError> {
        self.prepare(worker)?;
        let len = self.values.len();
        self.splice_slots(worker, len, 0, items.into_iter().map(Some).collect())?;
        Ok(self.values.len())
    }

    pub(crate) fn pop(
        &mut self,
        worker: &mut dyn MemoryWorker,
    ) -> Result<Option<Value>, MemoryError> {
        self.prepare(worker)?;
        let Some(last) = self.values.len().checked_sub(1) else {
            return Ok(None);
        };
        let removed = self.splice_slots(worker, last, 1, Vec::new())?;
        Ok(removed.into_iter().next().flatten())
    }

    pub(crate) fn shift(
        &mut self,
        worker: &mut dyn MemoryWorker,
    ) -> Result<Option<Value>, MemoryError> {
        self.prepare(worker)?;
        if self.values.is_empty() {
            return Ok(None);
        }
        let removed = self.splice_slots(worker, 0, 1, Vec::new())?;
        Ok(removed.into_iter().next().flatten())
    }

    pub(crate) fn unshift(
        &mut self,
        worker: &mut dyn MemoryWorker,
        items: Vec<Value>,
    ) -> Result<usize, MemoryError> {
        self.prepare(worker)?;
        self.splice_slots(worker, 0, 0, items.into_iter().map(Some).collect())?;
        Ok(self.values.len())
    }

    /// Structural edit shared by every slot mutation. The caller has run
    /// [`ArrayEntity::prepare`].
    fn splice_slots(
        &mut self,
        worker: &mut dyn MemoryWorker,
        start: usize,
        delete_count: usize,
        items: Vec<Option<Value>>,
    ) -> Result<Vec<Option<Value>>, MemoryError> {
        let linked = self.sync.linked;
        let len = self.values.len();
        let start = start.min(len);
        let end = start + delete_count.min(len - start);
        for item in items.iter().flatten() {
            accept_value(worker, linked, item)?;
        }
        if start == end && items.is_empty() {
            return Ok(Vec::new());
        }

        let lower = start.checked_sub(1).map(|i| self.keys[i].clone());
        let upper = self.keys.get(end).cloned();
        let fresh = StableKey::run_between(lower.as_ref(), upper.as_ref(), items.len());

        if linked {
            for (key, value) in self.keys[start..end].iter().zip(&self.values[start..end]) {
                if let Some(child) = value.as_ref().and_then(Value::as_entity) {
                    worker.delete_slice_proxy_parent(child, self.id, &Attribute::Index(key.clone()));
                }
                array_patch(worker, self.id)
                    .slots
                    .insert(key.clone(), Slot::Removed);
            }
            for (key, value) in fresh.iter().zip(&items) {
                if let Some(child) = value.as_ref().and_then(Value::as_entity) {
                    worker.add_slice_proxy_parent(child, self.id, Attribute::Index(key.clone()));
                }
                array_patch(worker, self.id)
                    .slots
                    .insert(key.clone(), slot_of(value.as_ref()));
            }
            worker.mark_dirty(self.id);
        }

        let vacated: Vec<StableKey> = self.keys.splice(start..end, fresh.iter().cloned()).collect();
        let removed: Vec<Option<Value>> = self.values.splice(start..end, items.iter().cloned()).collect();
        for (key, value) in vacated.iter().zip(&removed) {
            self.forget(key, value.as_ref());
        }
        for (key, value) in fresh.iter().zip(&items) {
            self.remember(key, value.as_ref());
        }
        Ok(removed)
    }

    pub(crate) fn set_prop(
        &mut self,
        worker: &mut dyn MemoryWorker,
        key: &str,
        value: Value,
    ) -> Result<(), MemoryError> {
        if key == LENGTH {
            let len = value
                .as_int()
                .and_then(|n| usize::try_from(n).ok())
                .ok_or(MemoryError::NotVersionable)?;
            return self.set_len(worker, len);
        }
        self.prepare(worker)?;
        let previous = self.props.get(key);
        if previous == Some(&value) {
            return Ok(());
        }
        let linked = self.sync.linked;
        accept_value(worker, linked, &value)?;
        if linked {
            let attribute = Attribute::Prop(key.to_owned());
            if let Some(old) = previous.and_then(Value::as_entity) {
                worker.delete_slice_proxy_parent(old, self.id, &attribute);
            }
            if let Some(child) = value.as_entity() {
                worker.add_slice_proxy_parent(child, self.id, attribute);
            }
            array_patch(worker, self.id)
                .props
                .insert(key.to_owned(), Slot::Value(value.clone()));
            worker.mark_dirty(self.id);
        }
        self.props.insert(key.to_owned(), value);
        Ok(())
    }

    pub(crate) fn remove_prop(
        &mut self,
        worker: &mut dyn MemoryWorker,
        key: &str,
    ) -> Result<(), MemoryError> {
        self.prepare(worker)?;
        let Some(old) = self.props.remove(key) else {
            return Ok(());
        };
        if self.sync.linked {
            if let Some(child) = old.as_entity() {
                worker.delete_slice_proxy_parent(child, self.id, &Attribute::Prop(key.to_owned()));
            }
            array_patch(worker, self.id)
                .props
                .insert(key.to_owned(), Slot::Removed);
            worker.mark_dirty(self.id);
        }
        Ok(())
    }
}

impl Versionable for ArrayEntity {
    fn id(&self) -> EntityId {
        self.id
    }

    fn kind(&self) -> Kind {
        Kind::Array
    }

    fn is_linked(&self) -> bool {
        self.sync.linked
    }

    fn link(&mut self, stamp: u64) -> Baseline {
        self.sync.linked = true;
        self.sync.synced_at = stamp;
        let slots = self
            .keys
            .iter()
            .zip(&self.values)
            .map(|(key, value)| (key.clone(), slot_of(value.as_ref())))
            .collect();
        let props = self
            .props
            .iter()
            .map(|(key, value)| (key.clone(), Slot::Value(value.clone())))
            .collect();
        Baseline {
            patch: Patch::Array(ArrayPatch { slots, props }),
            references: self.references(),
        }
    }

    fn resync(&mut self, worker: &dyn MemoryWorker) {
        let Some(stamp) = self.sync.stale(worker, self.id) else {
            return;
        };
        let compiled = match worker.get_slice_value(self.id) {
            Some(Patch::Array(patch)) => patch.compile(),
            _ => crate::patch::CompiledArray::default(),
        };
        let (keys, values): (Vec<StableKey>, Vec<Option<Value>>) =
            compiled.slots.into_iter().unzip();
        self.keys = keys;
        self.values = values;
        self.props = compiled.props;
        self.rebuild_lookup();
        self.sync.synced_at = stamp;
    }

    fn references(&self) -> Vec<(EntityId, Attribute)> {
        let slots = self.keys.iter().zip(&self.values).filter_map(|(key, value)| {
            value
                .as_ref()
                .and_then(Value::as_entity)
                .map(|id| (id, Attribute::Index(key.clone())))
        });
        let props = self.props.iter().filter_map(|(key, value)| {
            value
                .as_entity()
                .map(|id| (id, Attribute::Prop(key.clone())))
        });
        slots.chain(props).collect()
    }
}
