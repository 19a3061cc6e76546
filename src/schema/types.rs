use std::fmt;
use std::sync::Arc;

use ahash::AHashSet as HashSet;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::element::ElementCategory;
use crate::ids::TypeId;
use crate::value::DataType;

/// Direction of a relation relative to one of its incident vertices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Out,
    In,
    Both,
}

impl Direction {
    /// The two directions a relation can be stored under.
    pub const PROPER: [Direction; 2] = [Direction::Out, Direction::In];

    pub fn opposite(self) -> Direction {
        match self {
            Direction::Out => Direction::In,
            Direction::In => Direction::Out,
            Direction::Both => Direction::Both,
        }
    }

    /// Whether a relation stored under `proper` is visible to a query in this direction.
    pub fn includes(self, proper: Direction) -> bool {
        self == Direction::Both || self == proper
    }

    pub(crate) fn position(self) -> usize {
        match self {
            Direction::In => 1,
            _ => 0,
        }
    }
}

/// How many values of a property key a single vertex may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cardinality {
    Single,
    List,
    Set,
}

/// Edge multiplicity. Property keys map onto it through their cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Multiplicity {
    Multi,
    Simple,
    Many2One,
    One2Many,
    One2One,
}

impl Multiplicity {
    pub fn is_constrained(self) -> bool {
        self != Multiplicity::Multi
    }

    /// At most one relation of this type per vertex in direction `dir`.
    pub fn is_unique(self, dir: Direction) -> bool {
        match dir {
            Direction::Out => matches!(self, Multiplicity::Many2One | Multiplicity::One2One),
            Direction::In => matches!(self, Multiplicity::One2Many | Multiplicity::One2One),
            Direction::Both => false,
        }
    }

    pub fn from_cardinality(cardinality: Cardinality) -> Multiplicity {
        match cardinality {
            Cardinality::Single => Multiplicity::Many2One,
            Cardinality::Set => Multiplicity::Simple,
            Cardinality::List => Multiplicity::Multi,
        }
    }
}

/// Consistency guarantee requested for a type or index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConsistencyModifier {
    #[default]
    Default,
    Lock,
    Fork,
}

#[derive(Debug)]
pub struct PropertyKey {
    pub(crate) id: TypeId,
    pub(crate) name: String,
    pub(crate) data_type: DataType,
    pub(crate) cardinality: Cardinality,
    pub(crate) consistency: ConsistencyModifier,
    pub(crate) invisible: bool,
}

impl PropertyKey {
    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    pub fn consistency(&self) -> ConsistencyModifier {
        self.consistency
    }

    pub fn is_invisible(&self) -> bool {
        self.invisible
    }
}

#[derive(Debug)]
pub struct EdgeLabel {
    pub(crate) id: TypeId,
    pub(crate) name: String,
    pub(crate) multiplicity: Multiplicity,
    pub(crate) consistency: ConsistencyModifier,
}

impl EdgeLabel {
    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn multiplicity(&self) -> Multiplicity {
        self.multiplicity
    }

    pub fn consistency(&self) -> ConsistencyModifier {
        self.consistency
    }
}

/// Vertex label together with the property and connection constraints
/// attached to it.
#[derive(Debug)]
pub struct VertexLabel {
    pub(crate) id: TypeId,
    pub(crate) name: String,
    mapped_properties: RwLock<HashSet<TypeId>>,
    connections: RwLock<HashSet<(TypeId, TypeId)>>,
}

pub const DEFAULT_VERTEX_LABEL: &str = "vertex";

impl VertexLabel {
    pub(crate) fn new(id: TypeId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            mapped_properties: RwLock::new(HashSet::new()),
            connections: RwLock::new(HashSet::new()),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_default(&self) -> bool {
        self.name == DEFAULT_VERTEX_LABEL
    }

    pub fn has_property_constraint(&self, key: TypeId) -> bool {
        self.mapped_properties.read().contains(&key)
    }

    pub fn add_property_constraint(&self, key: TypeId) {
        self.mapped_properties.write().insert(key);
    }

    /// Whether edges of `label` may point from this label to `in_label`.
    pub fn has_connection(&self, label: TypeId, in_label: TypeId) -> bool {
        self.connections.read().contains(&(label, in_label))
    }

    pub fn add_connection(&self, label: TypeId, in_label: TypeId) {
        self.connections.write().insert((label, in_label));
    }
}

/// A property key or an edge label.
#[derive(Debug, Clone)]
pub enum RelationType {
    Key(Arc<PropertyKey>),
    Label(Arc<EdgeLabel>),
}

impl RelationType {
    pub fn id(&self) -> TypeId {
        match self {
            RelationType::Key(k) => k.id,
            RelationType::Label(l) => l.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            RelationType::Key(k) => &k.name,
            RelationType::Label(l) => &l.name,
        }
    }

    pub fn multiplicity(&self) -> Multiplicity {
        match self {
            RelationType::Key(k) => Multiplicity::from_cardinality(k.cardinality),
            RelationType::Label(l) => l.multiplicity,
        }
    }

    pub fn consistency(&self) -> ConsistencyModifier {
        match self {
            RelationType::Key(k) => k.consistency,
            RelationType::Label(l) => l.consistency,
        }
    }

    pub fn is_invisible(&self) -> bool {
        match self {
            RelationType::Key(k) => k.invisible,
            RelationType::Label(_) => false,
        }
    }

    pub fn category(&self) -> ElementCategory {
        match self {
            RelationType::Key(_) => ElementCategory::Property,
            RelationType::Label(_) => ElementCategory::Edge,
        }
    }

    pub fn as_key(&self) -> Option<&Arc<PropertyKey>> {
        match self {
            RelationType::Key(k) => Some(k),
            RelationType::Label(_) => None,
        }
    }

    pub fn as_label(&self) -> Option<&Arc<EdgeLabel>> {
        match self {
            RelationType::Label(l) => Some(l),
            RelationType::Key(_) => None,
        }
    }
}

impl PartialEq for RelationType {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for RelationType {}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Index answered by the storage backend itself, one record per
/// combination of key values.
#[derive(Debug)]
pub struct CompositeIndex {
    pub(crate) id: TypeId,
    pub(crate) name: String,
    pub(crate) element: ElementCategory,
    pub(crate) keys: Vec<Arc<PropertyKey>>,
    pub(crate) unique: bool,
    pub(crate) consistency: ConsistencyModifier,
}

impl CompositeIndex {
    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn element(&self) -> ElementCategory {
        self.element
    }

    pub fn keys(&self) -> &[Arc<PropertyKey>] {
        &self.keys
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    pub fn consistency(&self) -> ConsistencyModifier {
        self.consistency
    }

    pub fn covers(&self, key: TypeId) -> bool {
        self.keys.iter().any(|k| k.id == key)
    }
}

/// Index served by an external search provider.
#[derive(Debug)]
pub struct MixedIndex {
    pub(crate) id: TypeId,
    pub(crate) name: String,
    pub(crate) backing: String,
    pub(crate) element: ElementCategory,
    pub(crate) keys: Vec<Arc<PropertyKey>>,
}

impl MixedIndex {
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Name of the index store inside the provider.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the provider that serves this index.
    pub fn backing(&self) -> &str {
        &self.backing
    }

    pub fn element(&self) -> ElementCategory {
        self.element
    }

    pub fn keys(&self) -> &[Arc<PropertyKey>] {
        &self.keys
    }

    pub fn covers(&self, key: TypeId) -> bool {
        self.keys.iter().any(|k| k.id == key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyKeyDefinition {
    pub name: String,
    pub data_type: DataType,
    pub cardinality: Cardinality,
    pub consistency: ConsistencyModifier,
}

impl PropertyKeyDefinition {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            cardinality: Cardinality::Single,
            consistency: ConsistencyModifier::Default,
        }
    }

    pub fn cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = cardinality;
        self
    }

    pub fn consistency(mut self, consistency: ConsistencyModifier) -> Self {
        self.consistency = consistency;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeLabelDefinition {
    pub name: String,
    pub multiplicity: Multiplicity,
    pub consistency: ConsistencyModifier,
}

impl EdgeLabelDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            multiplicity: Multiplicity::Multi,
            consistency: ConsistencyModifier::Default,
        }
    }

    pub fn multiplicity(mut self, multiplicity: Multiplicity) -> Self {
        self.multiplicity = multiplicity;
        self
    }

    pub fn consistency(mut self, consistency: ConsistencyModifier) -> Self {
        self.consistency = consistency;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexLabelDefinition {
    pub name: String,
}

impl VertexLabelDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}
