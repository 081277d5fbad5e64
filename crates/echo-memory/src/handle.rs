// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Typed views over wrapped entities.
//!
//! A handle borrows the [`Memory`] mutably for as long as it lives, so reads
//! can rebuild stale caches and writes can record patches. Reads never fail:
//! an entity that is no longer readable reads as empty.
use crate::error::MemoryError;
use crate::ident::EntityId;
use crate::memory::Memory;
use crate::stable_key::StableKey;
use crate::value::Value;
use crate::versionable::object::{Accessor, Descriptor};
use crate::versionable::{ArrayEntity, Entity, Kind, ObjectEntity, SetEntity};
use crate::worker::MemoryWorker;

impl Memory {
    fn expect_kind(&self, id: EntityId, expected: Kind) -> Result<(), MemoryError> {
        let found = self.kind_of(id).ok_or_else(|| self.history.missing(id))?;
        if found == expected {
            Ok(())
        } else {
            Err(MemoryError::KindMismatch { expected, found })
        }
    }

    /// Opens the object entity `id`.
    ///
    /// # Errors
    /// [`MemoryError::KindMismatch`] for an array or a set,
    /// [`MemoryError::NotVersionable`] for a collected id,
    /// [`MemoryError::CrossMemory`] for an id of another memory.
    pub fn object(&mut self, id: EntityId) -> Result<ObjectHandle<'_>, MemoryError> {
        self.expect_kind(id, Kind::Object)?;
        Ok(ObjectHandle { memory: self, id })
    }

    /// Opens the array entity `id`.
    ///
    /// # Errors
    /// As [`Memory::object`].
    pub fn array(&mut self, id: EntityId) -> Result<ArrayHandle<'_>, MemoryError> {
        self.expect_kind(id, Kind::Array)?;
        Ok(ArrayHandle { memory: self, id })
    }

    /// Opens the set entity `id`.
    ///
    /// # Errors
    /// As [`Memory::object`].
    pub fn set(&mut self, id: EntityId) -> Result<SetHandle<'_>, MemoryError> {
        self.expect_kind(id, Kind::Set)?;
        Ok(SetHandle { memory: self, id })
    }
}

macro_rules! kind_access {
    ($handle:ident, $variant:ident, $entity:ty) => {
        impl $handle<'_> {
            /// Id of the viewed entity.
            pub fn id(&self) -> EntityId {
                self.id
            }

            fn write<R>(
                &mut self,
                op: impl FnOnce(&mut $entity, &mut dyn MemoryWorker) -> Result<R, MemoryError>,
            ) -> Result<R, MemoryError> {
                self.memory.with_entity(self.id, |entity, worker| match entity {
                    Entity::$variant(inner) => op(inner, worker),
                    other => Err(MemoryError::KindMismatch {
                        expected: Kind::$variant,
                        found: other.kind(),
                    }),
                })
            }

            fn read<R: Default>(
                &mut self,
                op: impl FnOnce(&mut $entity, &dyn MemoryWorker) -> R,
            ) -> R {
                self.write(|inner, worker| Ok(op(inner, &*worker)))
                    .unwrap_or_default()
            }
        }
    };
}

/// Mutable view of a versionable object.
#[derive(Debug)]
pub struct ObjectHandle<'m> {
    memory: &'m mut Memory,
    id: EntityId,
}

kind_access!(ObjectHandle, Object, ObjectEntity);

impl ObjectHandle<'_> {
    fn accessor(&self, key: &str) -> Option<Accessor> {
        match self.memory.heap.get(&self.id) {
            Some(Entity::Object(object)) => object.accessor(key),
            _ => None,
        }
    }

    /// Reads `key`, through its getter when one is defined.
    pub fn get(&mut self, key: &str) -> Option<Value> {
        if let Some(accessor) = self.accessor(key) {
            return accessor.get.and_then(|getter| getter(self.memory, self.id));
        }
        self.read(|object, worker| object.get(worker, key))
    }

    /// Returns `true` for a data or accessor property named `key`.
    pub fn has(&mut self, key: &str) -> bool {
        self.read(|object, worker| object.has(worker, key))
    }

    /// Data property names in ascending order.
    pub fn keys(&mut self) -> Vec<String> {
        self.read(ObjectEntity::keys)
    }

    /// Data properties in ascending key order.
    pub fn entries(&mut self) -> Vec<(String, Value)> {
        self.read(ObjectEntity::entries)
    }

    /// Number of data properties.
    pub fn len(&mut self) -> usize {
        self.keys().len()
    }

    /// Returns `true` without data properties.
    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }

    /// Shape of the own property `key`.
    pub fn descriptor(&mut self, key: &str) -> Option<Descriptor> {
        self.read(|object, worker| object.descriptor(worker, key))
    }

    /// Assigns `key`, through its setter when an accessor is defined.
    ///
    /// # Errors
    /// [`MemoryError::Frozen`] while the current slice has children,
    /// [`MemoryError::NotVersionable`] or [`MemoryError::CrossMemory`] for an
    /// entity value this memory cannot hold.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> Result<(), MemoryError> {
        let value = value.into();
        if let Some(accessor) = self.accessor(key) {
            return match accessor.set {
                Some(setter) => setter(self.memory, self.id, value),
                None => Ok(()),
            };
        }
        self.write(|object, worker| object.set(worker, key, value))
    }

    /// Deletes the data property `key`.
    ///
    /// # Errors
    /// [`MemoryError::Frozen`] while the current slice has children.
    pub fn remove(&mut self, key: &str) -> Result<(), MemoryError> {
        self.write(|object, worker| object.remove(worker, key))
    }

    /// Installs an unversioned accessor for `key`.
    pub fn define_accessor(&mut self, key: &str, accessor: Accessor) {
        if let Some(Entity::Object(object)) = self.memory.heap.get_mut(&self.id) {
            object.define_accessor(key, accessor);
        }
    }
}

/// Mutable view of a versionable array.
#[derive(Debug)]
pub struct ArrayHandle<'m> {
    memory: &'m mut Memory,
    id: EntityId,
}

kind_access!(ArrayHandle, Array, ArrayEntity);

fn collect_values(items: impl IntoIterator<Item = impl Into<Value>>) -> Vec<Value> {
    items.into_iter().map(Into::into).collect()
}

impl ArrayHandle<'_> {
    /// Number of slots, holes included.
    pub fn len(&mut self) -> usize {
        self.read(ArrayEntity::len)
    }

    /// Returns `true` without slots.
    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }

    /// Value at `index`; `None` past the end or for a hole.
    pub fn get(&mut self, index: usize) -> Option<Value> {
        self.read(|array, worker| array.get(worker, index))
    }

    /// Every slot in order; `None` marks a hole.
    pub fn items(&mut self) -> Vec<Option<Value>> {
        self.read(ArrayEntity::items)
    }

    /// Calls `f` with the index and value of every slot that is not a hole.
    pub fn for_each(&mut self, mut f: impl FnMut(usize, &Value)) {
        for (index, item) in self.items().iter().enumerate() {
            if let Some(value) = item {
                f(index, value);
            }
        }
    }

    /// Renders every slot joined by `separator`; holes and `Null` render
    /// empty.
    pub fn join(&mut self, separator: &str) -> String {
        self.items()
            .iter()
            .map(|item| match item {
                None | Some(Value::Null) => String::new(),
                Some(value) => value.to_string(),
            })
            .collect::<Vec<_>>()
            .join(separator)
    }

    /// Position of the first slot equal to `value`.
    pub fn index_of(&mut self, value: impl Into<Value>) -> Option<usize> {
        let value = value.into();
        self.read(|array, worker| array.index_of(worker, &value))
    }

    /// Returns `true` if some slot equals `value`.
    pub fn includes(&mut self, value: impl Into<Value>) -> bool {
        self.index_of(value).is_some()
    }

    /// Stable keys of the slots, in array order.
    pub fn stable_keys(&mut self) -> Vec<StableKey> {
        self.read(ArrayEntity::stable_keys)
    }

    /// Assigns slot `index`; writing past the end fills the gap with holes.
    ///
    /// # Errors
    /// [`MemoryError::Frozen`] while the current slice has children,
    /// [`MemoryError::NotVersionable`] or [`MemoryError::CrossMemory`] for an
    /// entity value this memory cannot hold, [`MemoryError::NotVersionable`]
    /// for an index at or past `2^32 - 1`.
    pub fn set(&mut self, index: usize, value: impl Into<Value>) -> Result<(), MemoryError> {
        let value = value.into();
        self.write(|array, worker| array.set(worker, index, value))
    }

    /// Truncates or extends (with holes) to `len` slots.
    ///
    /// # Errors
    /// [`MemoryError::Frozen`] while the current slice has children,
    /// [`MemoryError::NotVersionable`] for a length past `2^32 - 1`.
    pub fn set_len(&mut self, len: usize) -> Result<(), MemoryError> {
        self.write(|array, worker| array.set_len(worker, len))
    }

    /// Appends `items` and returns the new length.
    ///
    /// # Errors
    /// As [`ArrayHandle::set`]; nothing is appended on failure.
    pub fn push(
        &mut self,
        items: impl IntoIterator<Item = impl Into<Value>>,
    ) -> Result<usize, MemoryError> {
        let items = collect_values(items);
        self.write(|array, worker| array.push(worker, items))
    }

    /// Prepends `items` and returns the new length.
    ///
    /// # Errors
    /// As [`ArrayHandle::push`].
    pub fn unshift(
        &mut self,
        items: impl IntoIterator<Item = impl Into<Value>>,
    ) -> Result<usize, MemoryError> {
        let items = collect_values(items);
        self.write(|array, worker| array.unshift(worker, items))
    }

    /// Removes and returns the last slot.
    ///
    /// # Errors
    /// [`MemoryError::Frozen`] while the current slice has children.
    pub fn pop(&mut self) -> Result<Option<Value>, MemoryError> {
        self.write(ArrayEntity::pop)
    }

    /// Removes and returns the first slot.
    ///
    /// # Errors
    /// [`MemoryError::Frozen`] while the current slice has children.
    pub fn shift(&mut self) -> Result<Option<Value>, MemoryError> {
        self.write(ArrayEntity::shift)
    }

    /// Removes `delete_count` slots at `start`, inserts `items` there and
    /// returns the removed slots. `start` is clamped to the length.
    ///
    /// # Errors
    /// As [`ArrayHandle::push`].
    pub fn splice(
        &mut self,
        start: usize,
        delete_count: usize,
        items: impl IntoIterator<Item = impl Into<Value>>,
    ) -> Result<Vec<Option<Value>>, MemoryError> {
        let items = collect_values(items);
        self.write(|array, worker| array.splice(worker, start, delete_count, items))
    }

    /// Non-index property `key`; `"length"` reads the slot count.
    pub fn prop(&mut self, key: &str) -> Option<Value> {
        self.read(|array, worker| array.prop(worker, key))
    }

    /// Assigns a non-index property. Assigning `"length"` resizes the array.
    ///
    /// # Errors
    /// [`MemoryError::NotVersionable`] for a `"length"` that is not a
    /// non-negative integer, otherwise as [`ArrayHandle::set`].
    pub fn set_prop(&mut self, key: &str, value: impl Into<Value>) -> Result<(), MemoryError> {
        let value = value.into();
        self.write(|array, worker| array.set_prop(worker, key, value))
    }

    /// Deletes a non-index property.
    ///
    /// # Errors
    /// [`MemoryError::Frozen`] while the current slice has children.
    pub fn remove_prop(&mut self, key: &str) -> Result<(), MemoryError> {
        self.write(|array, worker| array.remove_prop(worker, key))
    }
}

/// Mutable view of a versionable set.
#[derive(Debug)]
pub struct SetHandle<'m> {
    memory: &'m mut Memory,
    id: EntityId,
}

kind_access!(SetHandle, Set, SetEntity);

impl SetHandle<'_> {
    /// Adds `value`; adding a present member is a no-op.
    ///
    /// # Errors
    /// [`MemoryError::Frozen`] while the current slice has children,
    /// [`MemoryError::NotVersionable`] or [`MemoryError::CrossMemory`] for an
    /// entity value this memory cannot hold.
    pub fn add(&mut self, value: impl Into<Value>) -> Result<(), MemoryError> {
        let value = value.into();
        self.write(|set, worker| set.add(worker, value))
    }

    /// Deletes `value`; returns `false` when it was not a member.
    ///
    /// # Errors
    /// [`MemoryError::Frozen`] while the current slice has children.
    pub fn delete(&mut self, value: impl Into<Value>) -> Result<bool, MemoryError> {
        let value = value.into();
        self.write(|set, worker| set.delete(worker, &value))
    }

    /// Deletes every member.
    ///
    /// # Errors
    /// [`MemoryError::Frozen`] while the current slice has children.
    pub fn clear(&mut self) -> Result<(), MemoryError> {
        self.write(SetEntity::clear)
    }

    /// Returns `true` if `value` is a member.
    pub fn has(&mut self, value: impl Into<Value>) -> bool {
        let value = value.into();
        self.read(|set, worker| set.has(worker, &value))
    }

    /// Number of members.
    pub fn len(&mut self) -> usize {
        self.read(SetEntity::len)
    }

    /// Returns `true` without members.
    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }

    /// Members in ascending order.
    pub fn values(&mut self) -> Vec<Value> {
        self.read(SetEntity::values)
    }

    /// Same as [`SetHandle::values`].
    pub fn keys(&mut self) -> Vec<Value> {
        self.values()
    }

    /// Every member paired with itself.
    pub fn entries(&mut self) -> Vec<(Value, Value)> {
        self.values()
            .into_iter()
            .map(|value| (value.clone(), value))
            .collect()
    }

    /// Calls `f` with every member.
    pub fn for_each(&mut self, mut f: impl FnMut(&Value)) {
        for value in &self.values() {
            f(value);
        }
    }
}
