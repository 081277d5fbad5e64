// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-slice, per-entity deltas.
//!
//! A slice stores at most one [`Patch`] per entity. The patch is relative to
//! the slice's parent: reading an entity at a slice merges every patch from the
//! entity's owner slice down to the slice, oldest first.
//!
//! Merge rules
//! - Object and array patches are last-write-wins per property / stable key.
//!   [`Slot::Removed`] is an ordinary write, so a removal recorded in a newer
//!   slice hides the older value.
//! - Set patches are symmetric deltas. An `add` cancels a pending `removed`
//!   entry for the same member and vice versa, so adding then deleting a member
//!   inside one merge window leaves no trace.
use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::ident::EntityId;
use crate::slice::Attribute;
use crate::stable_key::StableKey;
use crate::value::Value;
use crate::versionable::Kind;

/// One cell of an object or array patch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Slot {
    /// The cell holds this value.
    Value(Value),
    /// The cell was deleted in this slice.
    Removed,
    /// The array slot exists but holds nothing (a hole).
    Unset,
}

impl Slot {
    /// Returns the stored value, if any.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            Self::Removed | Self::Unset => None,
        }
    }
}

/// Property delta of a versionable object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ObjectPatch {
    /// Written properties.
    pub props: BTreeMap<String, Slot>,
}

impl ObjectPatch {
    fn merge(&mut self, newer: &Self) {
        for (key, slot) in &newer.props {
            self.props.insert(key.clone(), slot.clone());
        }
    }

    /// Visible properties after this patch (removed keys are absent).
    pub fn compile(&self) -> BTreeMap<String, Value> {
        self.props
            .iter()
            .filter_map(|(key, slot)| slot.value().map(|v| (key.clone(), v.clone())))
            .collect()
    }
}

/// Slot and property delta of a versionable array.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ArrayPatch {
    /// Written slots keyed by stable key.
    pub slots: BTreeMap<StableKey, Slot>,
    /// Written non-index properties.
    pub props: BTreeMap<String, Slot>,
}

/// Visible content of an array: ordered slots plus non-index properties.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompiledArray {
    /// Live slots in array order; `None` is a hole.
    pub slots: Vec<(StableKey, Option<Value>)>,
    /// Non-index properties.
    pub props: BTreeMap<String, Value>,
}

impl ArrayPatch {
    fn merge(&mut self, newer: &Self) {
        for (key, slot) in &newer.slots {
            self.slots.insert(key.clone(), slot.clone());
        }
        for (key, slot) in &newer.props {
            self.props.insert(key.clone(), slot.clone());
        }
    }

    /// Visible slots (sorted by stable key) and properties after this patch.
    pub fn compile(&self) -> CompiledArray {
        let slots = self
            .slots
            .iter()
            .filter_map(|(key, slot)| match slot {
                Slot::Value(v) => Some((key.clone(), Some(v.clone()))),
                Slot::Unset => Some((key.clone(), None)),
                Slot::Removed => None,
            })
            .collect();
        let props = self
            .props
            .iter()
            .filter_map(|(key, slot)| slot.value().map(|v| (key.clone(), v.clone())))
            .collect();
        CompiledArray { slots, props }
    }
}

/// Membership delta of a versionable set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SetPatch {
    /// Members added relative to the parent slice.
    pub added: BTreeSet<Value>,
    /// Members removed relative to the parent slice.
    pub removed: BTreeSet<Value>,
}

impl SetPatch {
    /// Records `value` as added, cancelling a pending removal.
    pub fn add(&mut self, value: Value) {
        if !self.removed.remove(&value) {
            self.added.insert(value);
        }
    }

    /// Records `value` as removed, cancelling a pending addition.
    pub fn delete(&mut self, value: Value) {
        if !self.added.remove(&value) {
            self.removed.insert(value);
        }
    }

    fn merge(&mut self, newer: &Self) {
        for value in &newer.removed {
            self.delete(value.clone());
        }
        for value in &newer.added {
            self.add(value.clone());
        }
    }

    /// Members visible after this patch, assuming the merge started at the
    /// entity's owner slice.
    pub fn compile(&self) -> BTreeSet<Value> {
        self.added.clone()
    }

    /// Returns `true` when the patch records no change.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Delta recorded for one entity in one slice.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Patch {
    /// Object property delta.
    Object(ObjectPatch),
    /// Array slot/property delta.
    Array(ArrayPatch),
    /// Set membership delta.
    Set(SetPatch),
}

impl Patch {
    /// Empty patch for an entity of `kind`.
    pub fn empty(kind: Kind) -> Self {
        match kind {
            Kind::Object => Self::Object(ObjectPatch::default()),
            Kind::Array => Self::Array(ArrayPatch::default()),
            Kind::Set => Self::Set(SetPatch::default()),
        }
    }

    /// Kind of entity this patch applies to.
    pub fn kind(&self) -> Kind {
        match self {
            Self::Object(_) => Kind::Object,
            Self::Array(_) => Kind::Array,
            Self::Set(_) => Kind::Set,
        }
    }

    /// Folds a newer patch for the same entity into `self`.
    ///
    /// A kind mismatch cannot happen for a well-formed history; if it does, the
    /// newer patch wins wholesale.
    pub fn merge(&mut self, newer: &Self) {
        match (self, newer) {
            (Self::Object(acc), Self::Object(next)) => acc.merge(next),
            (Self::Array(acc), Self::Array(next)) => acc.merge(next),
            (Self::Set(acc), Self::Set(next)) => acc.merge(next),
            (acc, next) => *acc = next.clone(),
        }
    }

    /// Object view of this patch, resetting it if it held another kind.
    pub(crate) fn object_mut(&mut self) -> &mut ObjectPatch {
        match self {
            Self::Object(patch) => patch,
            other => {
                *other = Self::Object(ObjectPatch::default());
                other.object_mut()
            }
        }
    }

    /// Array view of this patch, resetting it if it held another kind.
    pub(crate) fn array_mut(&mut self) -> &mut ArrayPatch {
        match self {
            Self::Array(patch) => patch,
            other => {
                *other = Self::Array(ArrayPatch::default());
                other.array_mut()
            }
        }
    }

    /// Set view of this patch, resetting it if it held another kind.
    pub(crate) fn set_mut(&mut self) -> &mut SetPatch {
        match self {
            Self::Set(patch) => patch,
            other => {
                *other = Self::Set(SetPatch::default());
                other.set_mut()
            }
        }
    }

    /// Entities this patch stores, with the attribute holding each.
    ///
    /// Meant for a merged patch that starts at the owner slice; removed
    /// cells are skipped.
    pub(crate) fn references(&self) -> Vec<(EntityId, Attribute)> {
        let props = |props: &BTreeMap<String, Slot>| -> Vec<(EntityId, Attribute)> {
            props
                .iter()
                .filter_map(|(key, slot)| {
                    slot.value()
                        .and_then(Value::as_entity)
                        .map(|id| (id, Attribute::Prop(key.clone())))
                })
                .collect()
        };
        match self {
            Self::Object(patch) => props(&patch.props),
            Self::Array(patch) => {
                let mut out: Vec<_> = patch
                    .slots
                    .iter()
                    .filter_map(|(key, slot)| {
                        slot.value()
                            .and_then(Value::as_entity)
                            .map(|id| (id, Attribute::Index(key.clone())))
                    })
                    .collect();
                out.extend(props(&patch.props));
                out
            }
            Self::Set(patch) => patch
                .added
                .iter()
                .filter_map(Value::as_entity)
                .map(|id| (id, Attribute::Member))
                .collect(),
        }
    }

    /// Merges `patches` oldest-first. Returns `None` for an empty sequence.
    pub fn merge_all<'a, I>(patches: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Self>,
    {
        let mut iter = patches.into_iter();
        let mut acc = iter.next()?.clone();
        for patch in iter {
            acc.merge(patch);
        }
        Some(acc)
    }
}
