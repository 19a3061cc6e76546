use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering};

use ahash::AHashMap as HashMap;
use parking_lot::{Mutex, RwLock};

use crate::element::{ElementCategory, Lifecycle, RelationIdentifier};
use crate::errors::Result;
use crate::ids::{RelationId, TypeId, UNASSIGNED, VertexId};
use crate::schema::{Direction, EdgeLabel, PropertyKey, RelationType};
use crate::storage::Entry;
use crate::value::Value;

/// Incidence of a relation: two vertices for an edge, one vertex and a
/// value for a property. Vertices are referenced by id and resolved
/// through the transaction's vertex cache.
#[derive(Debug)]
pub enum RelationKind {
    Edge { out: AtomicI64, in_vertex: AtomicI64 },
    Property { vertex: AtomicI64, value: Value },
}

/// An edge or a vertex property.
///
/// The kind and type never change. A loaded relation is immutable; changing
/// one of its properties creates a new relation that records the loaded
/// one's id as `previous_id`.
#[derive(Debug)]
pub struct Relation {
    id: AtomicI64,
    previous_id: RelationId,
    relation_type: RelationType,
    kind: RelationKind,
    lifecycle: AtomicU8,
    upsert: AtomicBool,
    properties: RwLock<HashMap<TypeId, Value>>,
}

impl Relation {
    pub(crate) fn new_edge(id: RelationId, label: Arc<EdgeLabel>, out: VertexId, in_vertex: VertexId) -> Self {
        Self::build(
            id,
            UNASSIGNED,
            RelationType::Label(label),
            RelationKind::Edge {
                out: AtomicI64::new(out),
                in_vertex: AtomicI64::new(in_vertex),
            },
            Lifecycle::New,
            HashMap::new(),
        )
    }

    pub(crate) fn new_property(id: RelationId, key: Arc<PropertyKey>, vertex: VertexId, value: Value) -> Self {
        Self::build(
            id,
            UNASSIGNED,
            RelationType::Key(key),
            RelationKind::Property {
                vertex: AtomicI64::new(vertex),
                value,
            },
            Lifecycle::New,
            HashMap::new(),
        )
    }

    /// A relation read back from storage.
    pub(crate) fn loaded(
        id: RelationId,
        relation_type: RelationType,
        kind: RelationKind,
        properties: HashMap<TypeId, Value>,
    ) -> Self {
        Self::build(id, UNASSIGNED, relation_type, kind, Lifecycle::Loaded, properties)
    }

    /// A new relation that replaces this one. Same type, incidence and properties.
    pub(crate) fn supersede(&self, id: RelationId) -> Self {
        let kind = match &self.kind {
            RelationKind::Edge { out, in_vertex } => RelationKind::Edge {
                out: AtomicI64::new(out.load(Ordering::Acquire)),
                in_vertex: AtomicI64::new(in_vertex.load(Ordering::Acquire)),
            },
            RelationKind::Property { vertex, value } => RelationKind::Property {
                vertex: AtomicI64::new(vertex.load(Ordering::Acquire)),
                value: value.clone(),
            },
        };
        Self::build(
            id,
            self.id(),
            self.relation_type.clone(),
            kind,
            Lifecycle::New,
            self.properties.read().clone(),
        )
    }

    fn build(
        id: RelationId,
        previous_id: RelationId,
        relation_type: RelationType,
        kind: RelationKind,
        lifecycle: Lifecycle,
        properties: HashMap<TypeId, Value>,
    ) -> Self {
        Self {
            id: AtomicI64::new(id),
            previous_id,
            relation_type,
            kind,
            lifecycle: AtomicU8::new(lifecycle as u8),
            upsert: AtomicBool::new(false),
            properties: RwLock::new(properties),
        }
    }

    pub fn id(&self) -> RelationId {
        self.id.load(Ordering::Acquire)
    }

    pub(crate) fn set_id(&self, id: RelationId) {
        self.id.store(id, Ordering::Release);
    }

    /// Id of the loaded relation this one replaced, or `0`.
    pub fn previous_id(&self) -> RelationId {
        self.previous_id
    }

    pub fn relation_type(&self) -> &RelationType {
        &self.relation_type
    }

    pub fn type_id(&self) -> TypeId {
        self.relation_type.id()
    }

    pub fn kind(&self) -> &RelationKind {
        &self.kind
    }

    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle::from_u8(self.lifecycle.load(Ordering::Acquire))
    }

    pub fn is_new(&self) -> bool {
        self.lifecycle() == Lifecycle::New
    }

    pub fn is_loaded(&self) -> bool {
        self.lifecycle() == Lifecycle::Loaded
    }

    pub fn is_removed(&self) -> bool {
        self.lifecycle() == Lifecycle::Removed
    }

    /// Marks the relation removed. Returns `false` if it already was.
    pub(crate) fn mark_removed(&self) -> bool {
        self.lifecycle.swap(Lifecycle::Removed as u8, Ordering::AcqRel) != Lifecycle::Removed as u8
    }

    /// Whether this property overwrote earlier values without reading them.
    pub fn is_upsert(&self) -> bool {
        self.upsert.load(Ordering::Acquire)
    }

    pub(crate) fn set_upsert(&self, upsert: bool) {
        self.upsert.store(upsert, Ordering::Release);
    }

    pub fn is_edge(&self) -> bool {
        matches!(self.kind, RelationKind::Edge { .. })
    }

    pub fn is_property(&self) -> bool {
        matches!(self.kind, RelationKind::Property { .. })
    }

    pub fn category(&self) -> ElementCategory {
        match self.kind {
            RelationKind::Edge { .. } => ElementCategory::Edge,
            RelationKind::Property { .. } => ElementCategory::Property,
        }
    }

    pub fn is_invisible(&self) -> bool {
        self.relation_type.is_invisible()
    }

    pub fn arity(&self) -> usize {
        match self.kind {
            RelationKind::Edge { .. } => 2,
            RelationKind::Property { .. } => 1,
        }
    }

    /// Incident vertex at `pos` (0 = out / owner, 1 = in).
    pub fn vertex(&self, pos: usize) -> VertexId {
        match (&self.kind, pos) {
            (RelationKind::Edge { out, .. }, 0) => out.load(Ordering::Acquire),
            (RelationKind::Edge { in_vertex, .. }, _) => in_vertex.load(Ordering::Acquire),
            (RelationKind::Property { vertex, .. }, _) => vertex.load(Ordering::Acquire),
        }
    }

    pub fn vertices(&self) -> Vec<VertexId> {
        (0..self.arity()).map(|p| self.vertex(p)).collect()
    }

    pub fn out_vertex(&self) -> VertexId {
        self.vertex(0)
    }

    pub fn in_vertex(&self) -> Option<VertexId> {
        match self.kind {
            RelationKind::Edge { .. } => Some(self.vertex(1)),
            RelationKind::Property { .. } => None,
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match &self.kind {
            RelationKind::Property { value, .. } => Some(value),
            RelationKind::Edge { .. } => None,
        }
    }

    pub fn is_loop(&self) -> bool {
        self.is_edge() && self.vertex(0) == self.vertex(1)
    }

    pub fn is_incident_on(&self, vertex: VertexId) -> bool {
        (0..self.arity()).any(|p| self.vertex(p) == vertex)
    }

    /// Vertex on the other end of an edge as seen from `vertex`.
    pub fn other_vertex(&self, vertex: VertexId) -> Option<VertexId> {
        match self.kind {
            RelationKind::Edge { .. } if self.vertex(0) == vertex => Some(self.vertex(1)),
            RelationKind::Edge { .. } if self.vertex(1) == vertex => Some(self.vertex(0)),
            _ => None,
        }
    }

    /// Directions under which this relation is stored for `vertex`.
    /// A self-loop is stored under both.
    pub fn directions_from(&self, vertex: VertexId) -> Vec<Direction> {
        match self.kind {
            RelationKind::Property { .. } if self.vertex(0) == vertex => vec![Direction::Out],
            RelationKind::Property { .. } => vec![],
            RelationKind::Edge { .. } => Direction::PROPER
                .into_iter()
                .filter(|d| self.vertex(d.position()) == vertex)
                .collect(),
        }
    }

    pub fn property(&self, key: TypeId) -> Option<Value> {
        self.properties.read().get(&key).cloned()
    }

    pub fn properties(&self) -> Vec<(TypeId, Value)> {
        self.properties
            .read()
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect()
    }

    pub(crate) fn set_property(&self, key: TypeId, value: Value) {
        self.properties.write().insert(key, value);
    }

    pub(crate) fn remove_property(&self, key: TypeId) -> Option<Value> {
        self.properties.write().remove(&key)
    }

    pub fn identifier(&self) -> RelationIdentifier {
        RelationIdentifier {
            relation_id: self.id(),
            type_id: self.type_id(),
            out_vertex: self.out_vertex(),
            in_vertex: self.in_vertex(),
        }
    }

    /// Rewrites temporary vertex ids to their permanent counterparts.
    pub(crate) fn remap_vertices(&self, mapping: &HashMap<VertexId, VertexId>) {
        let remap = |cell: &AtomicI64| {
            if let Some(id) = mapping.get(&cell.load(Ordering::Acquire)) {
                cell.store(*id, Ordering::Release);
            }
        };
        match &self.kind {
            RelationKind::Edge { out, in_vertex } => {
                remap(out);
                remap(in_vertex);
            }
            RelationKind::Property { vertex, .. } => remap(vertex),
        }
    }
}

/// Stored relation, either still encoded or decoded together with the
/// direction of the column it was read from.
#[derive(Debug)]
pub enum LazyState {
    Unloaded(Entry),
    Loaded {
        relation: Arc<Relation>,
        direction: Direction,
    },
}

/// Relation slot inside a loaded slice. Decoding happens at most once;
/// the transition from `Unloaded` to `Loaded` is guarded by the slot's lock.
#[derive(Debug)]
pub struct LazyRelation {
    state: Mutex<LazyState>,
}

impl LazyRelation {
    pub fn new(entry: Entry) -> Self {
        Self {
            state: Mutex::new(LazyState::Unloaded(entry)),
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(*self.state.lock(), LazyState::Loaded { .. })
    }

    /// Runs `f` against the current state without transitioning it.
    pub fn inspect<T>(&self, f: impl FnOnce(&LazyState) -> T) -> T {
        f(&self.state.lock())
    }

    /// Returns the decoded relation, decoding it with `load` on first access.
    pub fn materialize(
        &self,
        load: impl FnOnce(&Entry) -> Result<(Arc<Relation>, Direction)>,
    ) -> Result<(Arc<Relation>, Direction)> {
        let mut state = self.state.lock();
        match &*state {
            LazyState::Loaded { relation, direction } => Ok((Arc::clone(relation), *direction)),
            LazyState::Unloaded(entry) => {
                let (relation, direction) = load(entry)?;
                *state = LazyState::Loaded {
                    relation: Arc::clone(&relation),
                    direction,
                };
                Ok((relation, direction))
            }
        }
    }
}
