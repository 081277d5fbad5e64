// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

mod common;

use common::{attach_fixture, branch, int_items};
use echo_memory::{Draft, Memory, MemoryError, Value};

#[test]
fn edits_stay_in_their_slice() {
    let mut memory = Memory::new();
    let fixture = attach_fixture(&mut memory);

    branch(&mut memory, "1");
    memory.object(fixture.object).unwrap().set("a", 2).unwrap();
    memory.array(fixture.array).unwrap().push([4]).unwrap();

    memory.switch_to("").unwrap();
    assert_eq!(memory.object(fixture.object).unwrap().get("a"), Some(Value::Int(1)));
    assert_eq!(
        memory.array(fixture.array).unwrap().items(),
        int_items(&[1, 2, 3])
    );

    memory.switch_to("1").unwrap();
    assert_eq!(memory.object(fixture.object).unwrap().get("a"), Some(Value::Int(2)));
    assert_eq!(
        memory.array(fixture.array).unwrap().items(),
        int_items(&[1, 2, 3, 4])
    );
}

#[test]
fn sibling_branches_do_not_see_each_other() {
    let mut memory = Memory::new();
    let fixture = attach_fixture(&mut memory);
    memory.create("left").unwrap();
    memory.create("right").unwrap();

    memory.switch_to("left").unwrap();
    memory.object(fixture.object).unwrap().set("a", "left").unwrap();
    memory.switch_to("right").unwrap();
    assert_eq!(memory.object(fixture.object).unwrap().get("a"), Some(Value::Int(1)));
    memory.array(fixture.array).unwrap().shift().unwrap();

    memory.switch_to("left").unwrap();
    assert_eq!(
        memory.object(fixture.object).unwrap().get("a"),
        Some(Value::from("left"))
    );
    assert_eq!(
        memory.array(fixture.array).unwrap().items(),
        int_items(&[1, 2, 3])
    );
}

#[test]
fn reads_merge_the_whole_chain() {
    let mut memory = Memory::new();
    let fixture = attach_fixture(&mut memory);
    for step in 0..5_i64 {
        branch(&mut memory, &format!("s{step}"));
        memory
            .object(fixture.object)
            .unwrap()
            .set(&format!("k{step}"), step)
            .unwrap();
    }
    let mut object = memory.object(fixture.object).unwrap();
    assert_eq!(object.keys(), vec!["a", "b", "k0", "k1", "k2", "k3", "k4"]);

    memory.switch_to("s2").unwrap();
    assert_eq!(memory.object(fixture.object).unwrap().len(), 5);
}

#[test]
fn slices_with_children_are_frozen() {
    let mut memory = Memory::new();
    let fixture = attach_fixture(&mut memory);
    memory.create("child").unwrap();

    assert!(memory.is_frozen());
    assert_eq!(
        memory.object(fixture.object).unwrap().set("a", 5),
        Err(MemoryError::Frozen)
    );
    assert_eq!(
        memory.array(fixture.array).unwrap().push([9]),
        Err(MemoryError::Frozen)
    );
    assert_eq!(
        memory.array(fixture.array).unwrap().items(),
        int_items(&[1, 2, 3])
    );

    let mut draft = Draft::new();
    let extra = draft.object([]);
    let extra = memory.make_versionable(&mut draft, extra).unwrap();
    assert_eq!(memory.attach(extra), Err(MemoryError::Frozen));
}

#[test]
fn unlinked_entities_mutate_freely() {
    let mut memory = Memory::new();
    memory.create("child").unwrap();
    let mut draft = Draft::new();
    let list = draft.array([]);
    let id = memory.make_versionable(&mut draft, list).unwrap();

    memory.array(id).unwrap().push([1, 2]).unwrap();
    assert_eq!(memory.array(id).unwrap().len(), 2);
    memory.switch_to("child").unwrap();
    memory.attach(id).unwrap();
    memory.switch_to("").unwrap();
    assert!(memory.array(id).unwrap().is_empty());
}

#[test]
fn storing_an_entity_links_it_into_the_current_slice() {
    let mut memory = Memory::new();
    let fixture = attach_fixture(&mut memory);
    branch(&mut memory, "edit");

    let mut draft = Draft::new();
    let inner = draft.set(["x".into()]);
    let inner = memory.make_versionable(&mut draft, inner).unwrap();
    memory.object(fixture.object).unwrap().set("tags", inner).unwrap();
    memory.set(inner).unwrap().add("y").unwrap();

    memory.switch_to("").unwrap();
    assert_eq!(memory.object(fixture.object).unwrap().get("tags"), None);
    memory.switch_to("edit").unwrap();
    assert_eq!(
        memory.set(inner).unwrap().values(),
        vec![Value::from("x"), Value::from("y")]
    );
    assert_eq!(
        memory.get_roots(inner).unwrap().into_iter().collect::<Vec<_>>(),
        vec![fixture.object]
    );
}

#[test]
fn removed_slices_release_their_entities() {
    let mut memory = Memory::new();
    let fixture = attach_fixture(&mut memory);
    branch(&mut memory, "scratch");
    let mut draft = Draft::new();
    let temp = draft.object([("n", 1.into())]);
    let temp = memory.make_versionable(&mut draft, temp).unwrap();
    memory.object(fixture.object).unwrap().set("temp", temp).unwrap();

    memory.switch_to("").unwrap();
    memory.remove("scratch").unwrap();
    assert_eq!(memory.object(temp).unwrap_err(), MemoryError::NotVersionable);
    assert_eq!(memory.attach(temp), Err(MemoryError::NotVersionable));
    assert_eq!(
        memory.switch_to("scratch"),
        Err(MemoryError::UnknownSlice("scratch".into()))
    );
    // Entities linked before the branch survive.
    assert_eq!(memory.array(fixture.array).unwrap().len(), 3);
    assert!(!memory.is_frozen());
}

#[test]
fn removing_the_only_child_restores_writes() {
    let mut memory = Memory::new();
    let fixture = attach_fixture(&mut memory);
    memory.create("child").unwrap();
    assert_eq!(
        memory.object(fixture.object).unwrap().set("a", 2),
        Err(MemoryError::Frozen)
    );

    memory.remove("child").unwrap();
    memory.object(fixture.object).unwrap().set("a", 2).unwrap();
    memory.array(fixture.array).unwrap().push([4]).unwrap();
    assert_eq!(memory.object(fixture.object).unwrap().get("a"), Some(Value::Int(2)));
    assert_eq!(memory.array(fixture.array).unwrap().items(), int_items(&[1, 2, 3, 4]));
}

#[test]
fn entities_linked_on_a_sibling_are_adopted() {
    let mut memory = Memory::new();
    let mut draft = Draft::new();
    let holder = draft.object([]);
    let holder = memory.make_versionable(&mut draft, holder).unwrap();
    memory.attach(holder).unwrap();
    let inner = draft.object([("n", 1.into())]);
    let outer = draft.object([("inner", inner.into())]);
    let outer = memory.make_versionable(&mut draft, outer).unwrap();
    let inner = draft.wrapped(inner).unwrap();
    memory.create("a").unwrap();
    memory.create("b").unwrap();

    memory.switch_to("a").unwrap();
    memory.object(holder).unwrap().set("e", outer).unwrap();

    memory.switch_to("b").unwrap();
    memory.object(holder).unwrap().set("e", outer).unwrap();
    memory.object(outer).unwrap().set("v", 2).unwrap();
    memory.object(inner).unwrap().set("n", 5).unwrap();

    memory.switch_to("").unwrap();
    memory.switch_to("b").unwrap();
    assert_eq!(memory.object(outer).unwrap().get("v"), Some(Value::Int(2)));
    assert_eq!(memory.object(inner).unwrap().get("n"), Some(Value::Int(5)));
    assert_eq!(
        memory.get_roots(inner).unwrap().into_iter().collect::<Vec<_>>(),
        vec![holder]
    );

    memory.switch_to("a").unwrap();
    assert_eq!(memory.object(outer).unwrap().get("v"), None);
    assert_eq!(memory.object(inner).unwrap().get("n"), Some(Value::Int(1)));
}

#[test]
fn slice_names_are_unique() {
    let mut memory = Memory::new();
    memory.create("a").unwrap();
    assert_eq!(
        memory.create("a"),
        Err(MemoryError::DuplicateSlice("a".into()))
    );
    assert_eq!(memory.create(""), Err(MemoryError::DuplicateSlice(String::new())));
}

#[test]
fn wrapping_is_validated_up_front() {
    let mut memory = Memory::new();
    let mut draft = Draft::new();
    let root = draft.object([]);
    let id = memory.make_versionable(&mut draft, root).unwrap();

    assert_eq!(
        memory.make_versionable(&mut draft, root),
        Err(MemoryError::AlreadyVersionable)
    );
    assert_eq!(memory.versionable(&Value::Entity(id)), Ok(Value::Entity(id)));
    assert_eq!(memory.versionable(&Value::Int(3)), Ok(Value::Int(3)));
    assert_eq!(memory.attach(Value::Int(3)), Err(MemoryError::NotVersionable));
}

#[test]
fn opaque_values_pass_through() {
    let mut memory = Memory::new();
    let fixture = attach_fixture(&mut memory);
    let callback = echo_memory::mark_not_versionable(|x: i64| x + 1);
    branch(&mut memory, "edit");
    memory
        .object(fixture.object)
        .unwrap()
        .set("callback", callback.clone())
        .unwrap();
    assert_eq!(
        memory.object(fixture.object).unwrap().get("callback"),
        Some(callback)
    );
}
