use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use ahash::AHashMap as HashMap;
use log::debug;
use parking_lot::RwLock;

use crate::element::ElementCategory;
use crate::errors::{Result, SeshatError};
use crate::ids::TypeId;
use crate::schema::types::*;
use crate::value::DataType;

/// Reserved id of the invisible key that marks a vertex as existing.
pub const VERTEX_EXISTS_ID: TypeId = 1;
/// Reserved id of the invisible key that stores a vertex's label name.
pub const VERTEX_LABEL_ID: TypeId = 2;
pub const DEFAULT_VERTEX_LABEL_ID: TypeId = 3;

const FIRST_USER_TYPE_ID: TypeId = 1024;

/// Resolves relation types by id. Needed wherever stored entries are decoded.
pub trait TypeInspector {
    fn relation_type_by_id(&self, id: TypeId) -> Option<RelationType>;
}

#[derive(Default)]
struct SchemaState {
    types: HashMap<String, RelationType>,
    types_by_id: HashMap<TypeId, RelationType>,
    labels: HashMap<String, Arc<VertexLabel>>,
    composite: Vec<Arc<CompositeIndex>>,
    mixed: Vec<Arc<MixedIndex>>,
}

/// Graph-scoped schema. Each `Graph` owns one, so two graphs in the same
/// process never share type definitions.
pub struct SchemaRegistry {
    next_id: AtomicI64,
    state: RwLock<SchemaState>,
    exists_key: Arc<PropertyKey>,
    label_key: Arc<PropertyKey>,
    default_label: Arc<VertexLabel>,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaRegistry {
    pub fn new() -> Self {
        let exists_key = Arc::new(PropertyKey {
            id: VERTEX_EXISTS_ID,
            name: "~exists".to_string(),
            data_type: DataType::Bool,
            cardinality: Cardinality::Single,
            consistency: ConsistencyModifier::Default,
            invisible: true,
        });
        let label_key = Arc::new(PropertyKey {
            id: VERTEX_LABEL_ID,
            name: "~label".to_string(),
            data_type: DataType::Text,
            cardinality: Cardinality::Single,
            consistency: ConsistencyModifier::Default,
            invisible: true,
        });
        let default_label = Arc::new(VertexLabel::new(DEFAULT_VERTEX_LABEL_ID, DEFAULT_VERTEX_LABEL));

        let mut state = SchemaState::default();
        for key in [&exists_key, &label_key] {
            let t = RelationType::Key(Arc::clone(key));
            state.types.insert(key.name.clone(), t.clone());
            state.types_by_id.insert(key.id, t);
        }
        state
            .labels
            .insert(default_label.name.clone(), Arc::clone(&default_label));

        Self {
            next_id: AtomicI64::new(FIRST_USER_TYPE_ID),
            state: RwLock::new(state),
            exists_key,
            label_key,
            default_label,
        }
    }

    pub fn exists_key(&self) -> &Arc<PropertyKey> {
        &self.exists_key
    }

    pub fn label_key(&self) -> &Arc<PropertyKey> {
        &self.label_key
    }

    pub fn default_vertex_label(&self) -> &Arc<VertexLabel> {
        &self.default_label
    }

    fn allocate_id(&self) -> TypeId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn check_name(&self, name: &str) -> Result<()> {
        if name.is_empty() || name.starts_with('~') {
            return Err(SeshatError::InvalidArgument(format!(
                "Invalid schema name: {:?}",
                name
            )));
        }
        let state = self.state.read();
        if state.types.contains_key(name) || state.labels.contains_key(name) {
            return Err(SeshatError::SchemaViolation(format!(
                "A schema element with name {} already exists",
                name
            )));
        }
        Ok(())
    }

    /// Creates a property key with a fresh id without registering it.
    pub fn instantiate_property_key(&self, def: &PropertyKeyDefinition) -> Arc<PropertyKey> {
        Arc::new(PropertyKey {
            id: self.allocate_id(),
            name: def.name.clone(),
            data_type: def.data_type,
            cardinality: def.cardinality,
            consistency: def.consistency,
            invisible: false,
        })
    }

    pub fn instantiate_edge_label(&self, def: &EdgeLabelDefinition) -> Arc<EdgeLabel> {
        Arc::new(EdgeLabel {
            id: self.allocate_id(),
            name: def.name.clone(),
            multiplicity: def.multiplicity,
            consistency: def.consistency,
        })
    }

    pub fn instantiate_vertex_label(&self, def: &VertexLabelDefinition) -> Arc<VertexLabel> {
        Arc::new(VertexLabel::new(self.allocate_id(), def.name.clone()))
    }

    pub fn make_property_key(&self, def: PropertyKeyDefinition) -> Result<Arc<PropertyKey>> {
        self.check_name(&def.name)?;
        let key = self.instantiate_property_key(&def);
        self.publish_type(RelationType::Key(Arc::clone(&key)));
        Ok(key)
    }

    pub fn make_edge_label(&self, def: EdgeLabelDefinition) -> Result<Arc<EdgeLabel>> {
        self.check_name(&def.name)?;
        let label = self.instantiate_edge_label(&def);
        self.publish_type(RelationType::Label(Arc::clone(&label)));
        Ok(label)
    }

    pub fn make_vertex_label(&self, def: VertexLabelDefinition) -> Result<Arc<VertexLabel>> {
        self.check_name(&def.name)?;
        let label = self.instantiate_vertex_label(&def);
        self.publish_vertex_label(Arc::clone(&label));
        Ok(label)
    }

    /// Makes a type visible to every transaction. An existing type with the
    /// same name wins.
    pub fn publish_type(&self, t: RelationType) {
        let mut state = self.state.write();
        if state.types.contains_key(t.name()) {
            debug!("Type {} already published, keeping existing definition", t.name());
            return;
        }
        state.types_by_id.insert(t.id(), t.clone());
        state.types.insert(t.name().to_string(), t);
    }

    pub fn publish_vertex_label(&self, label: Arc<VertexLabel>) {
        let mut state = self.state.write();
        state.labels.entry(label.name.clone()).or_insert(label);
    }

    pub fn relation_type(&self, name: &str) -> Option<RelationType> {
        self.state.read().types.get(name).cloned()
    }

    pub fn property_key(&self, name: &str) -> Option<Arc<PropertyKey>> {
        self.relation_type(name).and_then(|t| t.as_key().cloned())
    }

    pub fn edge_label(&self, name: &str) -> Option<Arc<EdgeLabel>> {
        self.relation_type(name).and_then(|t| t.as_label().cloned())
    }

    pub fn vertex_label(&self, name: &str) -> Option<Arc<VertexLabel>> {
        self.state.read().labels.get(name).cloned()
    }

    pub fn build_composite_index(
        &self,
        name: &str,
        element: ElementCategory,
        keys: &[&str],
        unique: bool,
        consistency: ConsistencyModifier,
    ) -> Result<Arc<CompositeIndex>> {
        let keys = self.resolve_index_keys(name, element, keys)?;
        let index = Arc::new(CompositeIndex {
            id: self.allocate_id(),
            name: name.to_string(),
            element,
            keys,
            unique,
            consistency,
        });
        self.state.write().composite.push(Arc::clone(&index));
        debug!("Built composite index {} ({} keys)", name, index.keys.len());
        Ok(index)
    }

    pub fn build_mixed_index(
        &self,
        name: &str,
        backing: &str,
        element: ElementCategory,
        keys: &[&str],
    ) -> Result<Arc<MixedIndex>> {
        let keys = self.resolve_index_keys(name, element, keys)?;
        let index = Arc::new(MixedIndex {
            id: self.allocate_id(),
            name: name.to_string(),
            backing: backing.to_string(),
            element,
            keys,
        });
        self.state.write().mixed.push(Arc::clone(&index));
        debug!("Built mixed index {} on provider {}", name, backing);
        Ok(index)
    }

    fn resolve_index_keys(
        &self,
        name: &str,
        element: ElementCategory,
        keys: &[&str],
    ) -> Result<Vec<Arc<PropertyKey>>> {
        if element == ElementCategory::Property {
            return Err(SeshatError::InvalidArgument(format!(
                "Index {} must target vertices or edges",
                name
            )));
        }
        if keys.is_empty() {
            return Err(SeshatError::InvalidArgument(format!(
                "Index {} needs at least one key",
                name
            )));
        }
        {
            let state = self.state.read();
            if state.composite.iter().any(|i| i.name == name)
                || state.mixed.iter().any(|i| i.name == name)
            {
                return Err(SeshatError::SchemaViolation(format!(
                    "An index with name {} already exists",
                    name
                )));
            }
        }
        keys.iter()
            .map(|k| {
                self.property_key(k).ok_or_else(|| {
                    SeshatError::InvalidArgument(format!("Unknown property key {} for index {}", k, name))
                })
            })
            .collect()
    }

    pub fn composite_indexes(&self, element: ElementCategory) -> Vec<Arc<CompositeIndex>> {
        self.state
            .read()
            .composite
            .iter()
            .filter(|i| i.element == element)
            .cloned()
            .collect()
    }

    pub fn mixed_indexes(&self, element: ElementCategory) -> Vec<Arc<MixedIndex>> {
        self.state
            .read()
            .mixed
            .iter()
            .filter(|i| i.element == element)
            .cloned()
            .collect()
    }

    pub fn composite_indexes_for(&self, key: TypeId) -> Vec<Arc<CompositeIndex>> {
        self.state
            .read()
            .composite
            .iter()
            .filter(|i| i.covers(key))
            .cloned()
            .collect()
    }

    pub fn mixed_indexes_for(&self, key: TypeId) -> Vec<Arc<MixedIndex>> {
        self.state
            .read()
            .mixed
            .iter()
            .filter(|i| i.covers(key))
            .cloned()
            .collect()
    }

    /// Unique vertex indexes over `key`.
    pub fn unique_indexes_for(&self, key: TypeId) -> Vec<Arc<CompositeIndex>> {
        self.composite_indexes_for(key)
            .into_iter()
            .filter(|i| i.unique && i.element == ElementCategory::Vertex)
            .collect()
    }

    pub fn has_any_index(&self, key: TypeId) -> bool {
        let state = self.state.read();
        state.composite.iter().any(|i| i.covers(key)) || state.mixed.iter().any(|i| i.covers(key))
    }

    /// True when `key` alone forms a composite vertex index, so equality
    /// lookups on new properties can be answered from memory.
    pub fn has_simple_vertex_index(&self, key: TypeId) -> bool {
        self.state.read().composite.iter().any(|i| {
            i.element == ElementCategory::Vertex && i.keys.len() == 1 && i.keys[0].id == key
        })
    }
}

impl TypeInspector for SchemaRegistry {
    fn relation_type_by_id(&self, id: TypeId) -> Option<RelationType> {
        self.state.read().types_by_id.get(&id).cloned()
    }
}

/// Types created inside a transaction and not yet published.
///
/// Lookups consult this cache before the graph's registry.
#[derive(Default)]
pub struct TypeNameCache {
    types: RwLock<HashMap<String, RelationType>>,
    types_by_id: RwLock<HashMap<TypeId, RelationType>>,
    labels: RwLock<HashMap<String, Arc<VertexLabel>>>,
}

impl TypeNameCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<RelationType> {
        self.types.read().get(name).cloned()
    }

    pub fn get_by_id(&self, id: TypeId) -> Option<RelationType> {
        self.types_by_id.read().get(&id).cloned()
    }

    pub fn vertex_label(&self, name: &str) -> Option<Arc<VertexLabel>> {
        self.labels.read().get(name).cloned()
    }

    /// Inserts `t` unless a type with the same name was added concurrently,
    /// in which case the existing one is returned.
    pub fn insert(&self, t: RelationType) -> RelationType {
        let mut types = self.types.write();
        if let Some(existing) = types.get(t.name()) {
            return existing.clone();
        }
        self.types_by_id.write().insert(t.id(), t.clone());
        types.insert(t.name().to_string(), t.clone());
        t
    }

    pub fn insert_vertex_label(&self, label: Arc<VertexLabel>) -> Arc<VertexLabel> {
        Arc::clone(self.labels.write().entry(label.name.clone()).or_insert(label))
    }

    pub fn is_empty(&self) -> bool {
        self.types.read().is_empty() && self.labels.read().is_empty()
    }

    /// Moves every cached definition into `registry`.
    pub fn publish_into(&self, registry: &SchemaRegistry) {
        for (_, t) in self.types.write().drain() {
            registry.publish_type(t);
        }
        self.types_by_id.write().clear();
        for (_, label) in self.labels.write().drain() {
            registry.publish_vertex_label(label);
        }
    }

    pub fn clear(&self) {
        self.types.write().clear();
        self.types_by_id.write().clear();
        self.labels.write().clear();
    }
}
