use std::fmt;

use crate::ids::{TypeId, VertexId};
use crate::schema::Direction;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockElement {
    Vertex(VertexId),
    Type(TypeId),
    Direction(Direction),
    Value(Value),
}

/// Value-equality key of a uniqueness lock, e.g. `(out, type, in)` or
/// `(anchor, type, direction)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockTuple(Vec<LockElement>);

impl LockTuple {
    pub fn new(elements: Vec<LockElement>) -> Self {
        Self(elements)
    }

    pub fn elements(&self) -> &[LockElement] {
        &self.0
    }
}

/// Lock key for one record of a unique composite index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexLockTuple {
    pub index: TypeId,
    pub values: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockKey {
    Relation(LockTuple),
    Index(IndexLockTuple),
}

impl From<LockTuple> for LockKey {
    fn from(t: LockTuple) -> Self {
        LockKey::Relation(t)
    }
}

impl From<IndexLockTuple> for LockKey {
    fn from(t: IndexLockTuple) -> Self {
        LockKey::Index(t)
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockKey::Relation(t) => write!(f, "{:?}", t.elements()),
            LockKey::Index(t) => write!(f, "index {} {:?}", t.index, t.values),
        }
    }
}
