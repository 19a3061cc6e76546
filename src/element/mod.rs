//! In-memory graph elements owned by a transaction.

pub mod comparator;
pub mod relation;
pub mod vertex;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ids::{RelationId, TypeId, VertexId};

pub use relation::{LazyRelation, LazyState, Relation, RelationKind};
pub use vertex::Vertex;

/// Status of an element relative to the enclosing transaction.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    New = 0,
    Loaded = 1,
    Modified = 2,
    Removed = 3,
}

impl Lifecycle {
    pub(crate) fn from_u8(v: u8) -> Lifecycle {
        match v {
            0 => Lifecycle::New,
            1 => Lifecycle::Loaded,
            2 => Lifecycle::Modified,
            _ => Lifecycle::Removed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementCategory {
    Vertex,
    Edge,
    Property,
}

/// Enough information to find a relation again through its out-vertex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationIdentifier {
    pub relation_id: RelationId,
    pub type_id: TypeId,
    pub out_vertex: VertexId,
    /// `None` for properties.
    pub in_vertex: Option<VertexId>,
}

/// Identifier of an element as returned by an index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementId {
    Vertex(VertexId),
    Relation(RelationIdentifier),
}

#[derive(Debug, Clone)]
pub enum Element {
    Vertex(Arc<Vertex>),
    Relation(Arc<Relation>),
}

impl Element {
    pub fn id(&self) -> ElementId {
        match self {
            Element::Vertex(v) => ElementId::Vertex(v.id()),
            Element::Relation(r) => ElementId::Relation(r.identifier()),
        }
    }

    pub fn category(&self) -> ElementCategory {
        match self {
            Element::Vertex(_) => ElementCategory::Vertex,
            Element::Relation(r) => r.category(),
        }
    }

    pub fn as_vertex(&self) -> Option<&Arc<Vertex>> {
        match self {
            Element::Vertex(v) => Some(v),
            Element::Relation(_) => None,
        }
    }

    pub fn as_relation(&self) -> Option<&Arc<Relation>> {
        match self {
            Element::Relation(r) => Some(r),
            Element::Vertex(_) => None,
        }
    }

    pub fn is_removed(&self) -> bool {
        match self {
            Element::Vertex(v) => v.is_removed(),
            Element::Relation(r) => r.is_removed(),
        }
    }
}
