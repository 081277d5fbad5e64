// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! Canonical state digest of a slice.
//!
//! Determinism contract
//! - The digest is a BLAKE3 hash over a canonical byte stream covering every
//!   entity owned along the slice's ancestor chain.
//! - Entities are visited in ascending `EntityId` order. Object properties and
//!   set members follow their `BTreeMap`/`BTreeSet` order; array slots follow
//!   array order.
//! - Stable keys are not encoded: two arrays with the same slots hash alike
//!   however their keys were allocated.
//! - Every length is an 8-byte little-endian count, every integer is
//!   little-endian, every value starts with a one byte tag.
//!
//! Compaction never changes what an entity reads as, so snapshotting a range
//! into `s` leaves `state_digest(s)` equal to the old `state_digest(until)`.
use blake3::Hasher;
use tracing::trace;

use crate::error::MemoryError;
use crate::ident::Hash;
use crate::memory::Memory;
use crate::patch::Patch;
use crate::value::Value;

fn hash_len(hasher: &mut Hasher, len: usize) {
    hasher.update(&(len as u64).to_le_bytes());
}

fn hash_str(hasher: &mut Hasher, s: &str) {
    hash_len(hasher, s.len());
    hasher.update(s.as_bytes());
}

fn hash_value(hasher: &mut Hasher, value: &Value) {
    match value {
        Value::Null => {
            hasher.update(&[0u8]);
        }
        Value::Bool(b) => {
            hasher.update(&[1u8, u8::from(*b)]);
        }
        Value::Int(n) => {
            hasher.update(&[2u8]);
            hasher.update(&n.to_le_bytes());
        }
        Value::Str(s) => {
            hasher.update(&[3u8]);
            hash_str(hasher, s);
        }
        Value::Entity(id) => {
            hasher.update(&[4u8]);
            hasher.update(&id.value().to_le_bytes());
        }
        Value::Opaque(opaque) => {
            hasher.update(&[5u8]);
            hasher.update(&opaque.serial().to_le_bytes());
        }
    }
}

fn hash_props<'a>(
    hasher: &mut Hasher,
    props: impl ExactSizeIterator<Item = (&'a String, &'a Value)>,
) {
    hash_len(hasher, props.len());
    for (key, value) in props {
        hash_str(hasher, key);
        hash_value(hasher, value);
    }
}

fn hash_patch(hasher: &mut Hasher, patch: &Patch) {
    match patch {
        Patch::Object(object) => {
            hasher.update(&[b'o']);
            hash_props(hasher, object.compile().iter());
        }
        Patch::Array(array) => {
            let compiled = array.compile();
            hasher.update(&[b'a']);
            hash_len(hasher, compiled.slots.len());
            for (_, slot) in &compiled.slots {
                match slot {
                    // Holes get a tag no value uses.
                    None => {
                        hasher.update(&[0xffu8]);
                    }
                    Some(value) => hash_value(hasher, value),
                }
            }
            hash_props(hasher, compiled.props.iter());
        }
        Patch::Set(set) => {
            let members = set.compile();
            hasher.update(&[b's']);
            hash_len(hasher, members.len());
            for member in &members {
                hash_value(hasher, member);
            }
        }
    }
}

impl Memory {
    /// Digest of everything readable at slice `name`.
    ///
    /// # Errors
    /// [`MemoryError::UnknownSlice`] if `name` does not exist.
    pub fn state_digest(&self, name: &str) -> Result<Hash, MemoryError> {
        let slice = self.history.lookup(name)?;
        let mut hasher = Hasher::new();
        let entities = self.history.visible_entities(slice);
        hash_len(&mut hasher, entities.len());
        for id in entities {
            hasher.update(&id.value().to_le_bytes());
            match self.history.value_at(slice, id) {
                Some(patch) => hash_patch(&mut hasher, &patch),
                None => {
                    hasher.update(&[0u8]);
                }
            }
        }
        let digest: Hash = hasher.finalize().into();
        trace!(slice = name, digest = %hex::encode(digest), "state digest");
        Ok(digest)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::versionable::draft::Draft;

    #[test]
    fn digest_tracks_visible_content() {
        let mut memory = Memory::new();
        let mut draft = Draft::new();
        let root = draft.object([("a", 1.into())]);
        let id = memory.make_versionable(&mut draft, root).unwrap();
        let empty = memory.state_digest("").unwrap();
        memory.attach(id).unwrap();
        let base = memory.state_digest("").unwrap();
        assert_ne!(empty, base);

        memory.create("edit").unwrap();
        memory.switch_to("edit").unwrap();
        assert_eq!(memory.state_digest("edit").unwrap(), base);
        memory.object(id).unwrap().set("a", 2).unwrap();
        assert_ne!(memory.state_digest("edit").unwrap(), base);
        memory.object(id).unwrap().set("a", 1).unwrap();
        assert_eq!(memory.state_digest("edit").unwrap(), base);
    }

    #[test]
    fn holes_differ_from_null() {
        let mut memory = Memory::new();
        let mut draft = Draft::new();
        let with_null = draft.array([Value::Null.into()]);
        let id = memory.make_versionable(&mut draft, with_null).unwrap();
        memory.attach(id).unwrap();
        let null_digest = memory.state_digest("").unwrap();

        let mut array = memory.array(id).unwrap();
        array.set_len(0).unwrap();
        array.set_len(1).unwrap();
        assert_ne!(memory.state_digest("").unwrap(), null_digest);
    }

    #[test]
    fn unknown_slice_is_an_error() {
        let memory = Memory::new();
        assert_eq!(
            memory.state_digest("missing"),
            Err(MemoryError::UnknownSlice("missing".into()))
        );
    }
}
