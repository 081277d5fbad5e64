// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Cell values stored inside versionable containers and patches.
use std::any::Any;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Serialize, Serializer};

use crate::ident::EntityId;

static NEXT_OPAQUE_SERIAL: AtomicU64 = AtomicU64::new(1);

/// A value held by an object property, an array slot or a set member.
///
/// `Value::Entity` is the linked-reference marker: it stands for "this cell
/// holds the wrapped entity with this id". Because it is a distinct variant, a
/// stored reference can never be confused with an integer that happens to
/// equal an entity id.
///
/// Values are totally ordered so they can be set members and lookup keys.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Value {
    /// Explicit null.
    Null,
    /// Boolean scalar.
    Bool(bool),
    /// Signed integer scalar.
    Int(i64),
    /// UTF-8 string scalar.
    Str(String),
    /// Reference to another wrapped entity of the same memory.
    Entity(EntityId),
    /// Non-versionable payload passed through untouched.
    Opaque(Opaque),
}

impl Value {
    /// Returns the referenced entity, if this value is a linked reference.
    pub fn as_entity(&self) -> Option<EntityId> {
        match self {
            Self::Entity(id) => Some(*id),
            _ => None,
        }
    }

    /// Returns the integer payload, if any.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the string payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the boolean payload, if any.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the opaque payload, if any.
    pub fn as_opaque(&self) -> Option<&Opaque> {
        match self {
            Self::Opaque(o) => Some(o),
            _ => None,
        }
    }
}

impl core::fmt::Display for Value {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Str(s) => f.write_str(s),
            Self::Entity(id) => write!(f, "{id}"),
            Self::Opaque(o) => write!(f, "<opaque {}>", o.serial),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<EntityId> for Value {
    fn from(value: EntityId) -> Self {
        Self::Entity(value)
    }
}

impl From<Opaque> for Value {
    fn from(value: Opaque) -> Self {
        Self::Opaque(value)
    }
}

/// Non-versionable payload.
///
/// Opaque values are never wrapped, traversed or diffed: they are stored in
/// patches as-is and compare by identity (a process-unique serial assigned at
/// construction), so two clones of the same `Opaque` are equal while two
/// separately constructed payloads never are.
#[derive(Clone)]
pub struct Opaque {
    serial: u64,
    payload: Rc<dyn Any>,
}

impl Opaque {
    /// Wraps `payload` as an identity-compared opaque value.
    pub fn new<T: Any>(payload: T) -> Self {
        Self {
            serial: NEXT_OPAQUE_SERIAL.fetch_add(1, Ordering::Relaxed),
            payload: Rc::new(payload),
        }
    }

    /// Identity serial of this payload.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Borrows the payload as `T` when the types match.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }
}

impl core::fmt::Debug for Opaque {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Opaque").field("serial", &self.serial).finish()
    }
}

impl PartialEq for Opaque {
    fn eq(&self, other: &Self) -> bool {
        self.serial == other.serial
    }
}

impl Eq for Opaque {}

impl PartialOrd for Opaque {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Opaque {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.serial.cmp(&other.serial)
    }
}

impl core::hash::Hash for Opaque {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.serial.hash(state);
    }
}

impl Serialize for Opaque {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_newtype_struct("Opaque", &self.serial)
    }
}

/// Opts `payload` out of versioning.
///
/// The returned value can be stored in any versionable container; reads and
/// writes pass it through untouched (callbacks, host handles, caches).
pub fn mark_not_versionable<T: Any>(payload: T) -> Value {
    Value::Opaque(Opaque::new(payload))
}
