//! Canonical-form comparison of relations around one vertex.
//!
//! Two relations compare equal when a multiplicity constraint allows only
//! one of them to exist on the vertex. An added relation that compares equal
//! to a loaded one displaces it.

use std::cmp::Ordering;

use crate::element::{Relation, RelationKind};
use crate::ids::VertexId;
use crate::schema::{Cardinality, Direction, Multiplicity, RelationType};

pub struct RelationComparator {
    vertex: VertexId,
}

impl RelationComparator {
    pub fn new(vertex: VertexId) -> Self {
        Self { vertex }
    }

    fn direction(&self, r: &Relation) -> Direction {
        r.directions_from(self.vertex)
            .first()
            .copied()
            .unwrap_or(Direction::Out)
    }

    pub fn compare(&self, a: &Relation, b: &Relation) -> Ordering {
        let by_type = a.type_id().cmp(&b.type_id());
        if by_type != Ordering::Equal {
            return by_type;
        }
        let dir_a = self.direction(a);
        let dir_b = self.direction(b);
        let by_dir = dir_a.position().cmp(&dir_b.position());
        if by_dir != Ordering::Equal {
            return by_dir;
        }

        match a.relation_type() {
            RelationType::Key(key) => match key.cardinality() {
                Cardinality::Single => Ordering::Equal,
                Cardinality::Set => match (a.kind(), b.kind()) {
                    (RelationKind::Property { value: va, .. }, RelationKind::Property { value: vb, .. })
                        if va == vb =>
                    {
                        Ordering::Equal
                    }
                    _ => a.id().cmp(&b.id()),
                },
                Cardinality::List => a.id().cmp(&b.id()),
            },
            RelationType::Label(label) => match label.multiplicity() {
                m if m.is_unique(dir_a) => Ordering::Equal,
                Multiplicity::Multi => a.id().cmp(&b.id()),
                _ => {
                    let other_a = a.other_vertex(self.vertex);
                    let other_b = b.other_vertex(self.vertex);
                    match other_a.cmp(&other_b) {
                        Ordering::Equal if label.multiplicity() == Multiplicity::Simple => Ordering::Equal,
                        Ordering::Equal => a.id().cmp(&b.id()),
                        o => o,
                    }
                }
            },
        }
    }

    /// Whether `added` takes the place of `existing` on this vertex.
    pub fn displaces(&self, added: &Relation, existing: &Relation) -> bool {
        added.id() != existing.id() && self.compare(existing, added) == Ordering::Equal
    }
}
