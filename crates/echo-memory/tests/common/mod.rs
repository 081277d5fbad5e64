// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(dead_code, clippy::unwrap_used)]

use echo_memory::{Draft, EntityId, Memory, Value};

/// Entities of the `{a: 1, b: [1, 2, 3]}` fixture.
pub struct Fixture {
    pub object: EntityId,
    pub array: EntityId,
}

/// Wraps `{a: 1, b: [1, 2, 3]}` and attaches it to the current slice.
pub fn attach_fixture(memory: &mut Memory) -> Fixture {
    let mut draft = Draft::new();
    let array = draft.array([1.into(), 2.into(), 3.into()]);
    let object = draft.object([("a", 1.into()), ("b", array.into())]);
    let object_id = memory.make_versionable(&mut draft, object).unwrap();
    memory.attach(object_id).unwrap();
    Fixture {
        object: object_id,
        array: draft.wrapped(array).unwrap(),
    }
}

/// Wraps and attaches a flat array of integers.
pub fn attach_ints(memory: &mut Memory, values: &[i64]) -> EntityId {
    let mut draft = Draft::new();
    let array = draft.array(values.iter().map(|v| (*v).into()));
    let id = memory.make_versionable(&mut draft, array).unwrap();
    memory.attach(id).unwrap();
    id
}

/// Wraps and attaches a set of integers.
pub fn attach_int_set(memory: &mut Memory, values: &[i64]) -> EntityId {
    let mut draft = Draft::new();
    let set = draft.set(values.iter().map(|v| (*v).into()));
    let id = memory.make_versionable(&mut draft, set).unwrap();
    memory.attach(id).unwrap();
    id
}

/// Creates `name` under the current slice and switches to it.
pub fn branch(memory: &mut Memory, name: &str) {
    memory.create(name).unwrap();
    memory.switch_to(name).unwrap();
}

/// Slots of an integer array, as `items()` reports them.
pub fn int_items(values: &[i64]) -> Vec<Option<Value>> {
    values.iter().map(|v| Some(Value::Int(*v))).collect()
}
