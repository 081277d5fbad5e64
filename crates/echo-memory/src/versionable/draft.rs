// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Raw, not yet versioned containers and the two-phase wrap.
//!
//! A [`Draft`] is an arena of plain containers. Nodes reference each other by
//! [`DraftRef`], so shared sub-objects and cycles are expressed directly.
//! Wrapping a node (see [`crate::Memory::make_versionable`]) first validates
//! everything reachable, then allocates an entity id for every reachable node
//! that has none yet, then wires `DraftValue::Node` cells to
//! `Value::Entity` references. The side table `wrapped` remembers which entity
//! each node became, so wrapping another node that shares a sub-object reuses
//! the existing entity.
use std::collections::{BTreeMap, BTreeSet};

use crate::error::MemoryError;
use crate::history::History;
use crate::ident::{EntityId, MemoryId};
use crate::value::Value;
use crate::worker::MemoryWorker;

use super::{ArrayEntity, Entity, Kind, ObjectEntity, SetEntity};

/// Raw-value identity of a draft node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DraftRef(usize);

/// Cell of a draft container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DraftValue {
    /// Plain value, or a reference to an already wrapped entity.
    Value(Value),
    /// Another node of the same draft.
    Node(DraftRef),
}

impl From<Value> for DraftValue {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<DraftRef> for DraftValue {
    fn from(node: DraftRef) -> Self {
        Self::Node(node)
    }
}

impl From<EntityId> for DraftValue {
    fn from(id: EntityId) -> Self {
        Self::Value(Value::Entity(id))
    }
}

impl From<i64> for DraftValue {
    fn from(value: i64) -> Self {
        Self::Value(Value::Int(value))
    }
}

impl From<i32> for DraftValue {
    fn from(value: i32) -> Self {
        Self::Value(Value::from(value))
    }
}

impl From<bool> for DraftValue {
    fn from(value: bool) -> Self {
        Self::Value(Value::Bool(value))
    }
}

impl From<&str> for DraftValue {
    fn from(value: &str) -> Self {
        Self::Value(Value::from(value))
    }
}

impl From<String> for DraftValue {
    fn from(value: String) -> Self {
        Self::Value(Value::Str(value))
    }
}

#[derive(Clone, Debug)]
enum DraftNode {
    Object(BTreeMap<String, DraftValue>),
    Array(Vec<DraftValue>),
    Set(Vec<DraftValue>),
}

impl DraftNode {
    fn kind(&self) -> Kind {
        match self {
            Self::Object(_) => Kind::Object,
            Self::Array(_) => Kind::Array,
            Self::Set(_) => Kind::Set,
        }
    }

    fn cells(&self) -> Box<dyn Iterator<Item = &DraftValue> + '_> {
        match self {
            Self::Object(props) => Box::new(props.values()),
            Self::Array(items) | Self::Set(items) => Box::new(items.iter()),
        }
    }
}

/// Arena of raw containers awaiting [`crate::Memory::make_versionable`].
#[derive(Clone, Debug, Default)]
pub struct Draft {
    nodes: Vec<DraftNode>,
    wrapped: Vec<Option<(MemoryId, EntityId)>>,
}

impl Draft {
    /// Creates an empty draft.
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&mut self, node: DraftNode) -> DraftRef {
        self.nodes.push(node);
        self.wrapped.push(None);
        DraftRef(self.nodes.len() - 1)
    }

    /// Adds a raw object.
    pub fn object<'a>(
        &mut self,
        props: impl IntoIterator<Item = (&'a str, DraftValue)>,
    ) -> DraftRef {
        let props = props
            .into_iter()
            .map(|(key, value)| (key.to_owned(), value))
            .collect();
        self.add(DraftNode::Object(props))
    }

    /// Adds a raw array.
    pub fn array(&mut self, items: impl IntoIterator<Item = DraftValue>) -> DraftRef {
        self.add(DraftNode::Array(items.into_iter().collect()))
    }

    /// Adds a raw set. Duplicate members collapse when wrapped.
    pub fn set(&mut self, members: impl IntoIterator<Item = DraftValue>) -> DraftRef {
        self.add(DraftNode::Set(members.into_iter().collect()))
    }

    /// Kind of `node`, or `None` for a ref from another draft.
    pub fn kind(&self, node: DraftRef) -> Option<Kind> {
        self.nodes.get(node.0).map(DraftNode::kind)
    }

    /// Entity `node` became, if it was wrapped.
    pub fn wrapped(&self, node: DraftRef) -> Option<EntityId> {
        self.wrapped.get(node.0).copied().flatten().map(|(_, id)| id)
    }

    fn raw_mut(&mut self, node: DraftRef) -> Result<&mut DraftNode, MemoryError> {
        match self.wrapped.get(node.0) {
            None => return Err(MemoryError::NotVersionable),
            Some(Some(_)) => return Err(MemoryError::AlreadyVersionable),
            Some(None) => {}
        }
        self.nodes.get_mut(node.0).ok_or(MemoryError::NotVersionable)
    }

    /// Sets a property of a raw object.
    ///
    /// # Errors
    /// [`MemoryError::AlreadyVersionable`] once `object` is wrapped (edit the
    /// entity instead), [`MemoryError::KindMismatch`] if it is not an object.
    pub fn insert(
        &mut self,
        object: DraftRef,
        key: &str,
        value: impl Into<DraftValue>,
    ) -> Result<(), MemoryError> {
        match self.raw_mut(object)? {
            DraftNode::Object(props) => {
                props.insert(key.to_owned(), value.into());
                Ok(())
            }
            other => Err(MemoryError::KindMismatch {
                expected: Kind::Object,
                found: other.kind(),
            }),
        }
    }

    /// Appends to a raw array or adds to a raw set.
    ///
    /// # Errors
    /// [`MemoryError::AlreadyVersionable`] once `container` is wrapped,
    /// [`MemoryError::KindMismatch`] for an object.
    pub fn push(
        &mut self,
        container: DraftRef,
        value: impl Into<DraftValue>,
    ) -> Result<(), MemoryError> {
        match self.raw_mut(container)? {
            DraftNode::Array(items) | DraftNode::Set(items) => {
                items.push(value.into());
                Ok(())
            }
            DraftNode::Object(_) => Err(MemoryError::KindMismatch {
                expected: Kind::Array,
                found: Kind::Object,
            }),
        }
    }

    /// Checks one already wrapped node against `history`.
    fn check_wrapped(
        history: &History,
        (memory, id): (MemoryId, EntityId),
    ) -> Result<(), MemoryError> {
        if memory != history.memory() {
            return Err(MemoryError::CrossMemory(id));
        }
        history.get_proxy(id).map(|_| ())
    }

    /// Validates, allocates and wires every unwrapped node reachable from
    /// `root`. Returns the root entity and the new entities.
    pub(crate) fn wrap(
        &mut self,
        root: DraftRef,
        history: &History,
    ) -> Result<(EntityId, Vec<Entity>), MemoryError> {
        // Phase 0: validate without touching anything.
        match self.wrapped.get(root.0) {
            None => return Err(MemoryError::NotVersionable),
            Some(Some((memory, id))) if *memory != history.memory() => {
                return Err(MemoryError::CrossMemory(*id));
            }
            Some(Some(_)) => return Err(MemoryError::AlreadyVersionable),
            Some(None) => {}
        }
        let mut order = Vec::new();
        let mut seen = BTreeSet::from([root]);
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            order.push(node);
            let raw = self.nodes.get(node.0).ok_or(MemoryError::NotVersionable)?;
            for cell in raw.cells() {
                match cell {
                    DraftValue::Value(value) => {
                        if let Some(id) = value.as_entity() {
                            history.get_proxy(id)?;
                        }
                    }
                    DraftValue::Node(child) => {
                        if !seen.insert(*child) {
                            continue;
                        }
                        match self.wrapped.get(child.0) {
                            None => return Err(MemoryError::NotVersionable),
                            Some(Some(wrapped)) => Self::check_wrapped(history, *wrapped)?,
                            Some(None) => stack.push(*child),
                        }
                    }
                }
            }
        }

        // Phase 1: allocate ids.
        let memory = history.memory();
        for node in &order {
            self.wrapped[node.0] = Some((memory, EntityId::next()));
        }

        // Phase 2: wire references.
        let mut entities = Vec::with_capacity(order.len());
        for node in &order {
            let id = self.entity_of(*node)?;
            let entity = match &self.nodes[node.0] {
                DraftNode::Object(props) => {
                    let props = props
                        .iter()
                        .map(|(key, cell)| Ok((key.clone(), self.resolve(cell)?)))
                        .collect::<Result<_, MemoryError>>()?;
                    Entity::Object(ObjectEntity::new(id, props))
                }
                DraftNode::Array(items) => {
                    let values = items
                        .iter()
                        .map(|cell| self.resolve(cell).map(Some))
                        .collect::<Result<_, MemoryError>>()?;
                    Entity::Array(ArrayEntity::new(id, values))
                }
                DraftNode::Set(members) => {
                    let members = members
                        .iter()
                        .map(|cell| self.resolve(cell))
                        .collect::<Result<_, MemoryError>>()?;
                    Entity::Set(SetEntity::new(id, members))
                }
            };
            entities.push(entity);
        }
        let root_id = self.entity_of(root)?;
        Ok((root_id, entities))
    }

    fn entity_of(&self, node: DraftRef) -> Result<EntityId, MemoryError> {
        self.wrapped(node).ok_or(MemoryError::NotVersionable)
    }

    fn resolve(&self, cell: &DraftValue) -> Result<Value, MemoryError> {
        match cell {
            DraftValue::Value(value) => Ok(value.clone()),
            DraftValue::Node(node) => self.entity_of(*node).map(Value::Entity),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn wrap_allocates_shared_nodes_once() {
        let history = History::new(MemoryId::next());
        let mut draft = Draft::new();
        let shared = draft.object([("v", 1.into())]);
        let list = draft.array([shared.into(), shared.into()]);
        let root = draft.object([("list", list.into()), ("direct", shared.into())]);

        let (root_id, entities) = draft.wrap(root, &history).unwrap();
        assert_eq!(entities.len(), 3);
        assert_eq!(draft.wrapped(root), Some(root_id));
        assert!(draft.wrapped(shared).is_some());
    }

    #[test]
    fn wrapped_nodes_are_immutable_and_not_rewrappable() {
        let history = History::new(MemoryId::next());
        let mut draft = Draft::new();
        let root = draft.object([]);
        draft.wrap(root, &history).unwrap();
        assert_eq!(
            draft.insert(root, "x", 1).unwrap_err(),
            MemoryError::AlreadyVersionable
        );
        assert_eq!(
            draft.wrap(root, &history).unwrap_err(),
            MemoryError::AlreadyVersionable
        );
    }

    #[test]
    fn failed_validation_allocates_nothing() {
        let history = History::new(MemoryId::next());
        let mut draft = Draft::new();
        let stranger = EntityId::next();
        let child = draft.array([]);
        let root = draft.object([("child", child.into()), ("bad", stranger.into())]);
        assert_eq!(
            draft.wrap(root, &history).unwrap_err(),
            MemoryError::CrossMemory(stranger)
        );
        assert_eq!(draft.wrapped(child), None);
        assert_eq!(draft.wrapped(root), None);
    }

    #[test]
    fn push_on_an_object_is_a_kind_mismatch() {
        let mut draft = Draft::new();
        let object = draft.object([]);
        assert_eq!(
            draft.push(object, 1).unwrap_err(),
            MemoryError::KindMismatch {
                expected: Kind::Array,
                found: Kind::Object,
            }
        );
    }
}
