use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ahash::AHashSet as HashSet;
use log::{debug, error};
use parking_lot::Mutex;

use crate::cache::{NewVertexIndexCache, SubqueryCache, VertexCache, new_vertex_index_cache};
use crate::codec::{RelationCodec, RelationValue};
use crate::commit;
use crate::config::TransactionConfig;
use crate::element::{Element, Lifecycle, LazyRelation, Relation, RelationIdentifier, RelationKind, Vertex};
use crate::errors::{Result, SeshatError};
use crate::graph::GraphContext;
use crate::ids::{RelationId, UNASSIGNED, VertexId, is_temporary};
use crate::locking::{IndexLockTuple, LockElement, LockGuard, LockManager};
use crate::query::condition::Cmp;
use crate::query::graph_centric::GraphQueryBuilder;
use crate::query::vertex_centric::{VertexQueryBuilder, slices_for};
use crate::schema::{
    Cardinality, CompositeIndex, ConsistencyModifier, Direction, DisabledSchemaMaker, EdgeLabel, Multiplicity,
    PropertyKey, RelationType, SchemaMaker, SchemaRegistry, TypeInspector, TypeNameCache, VERTEX_EXISTS_ID,
    VertexLabel,
};
use crate::storage::{BackendTransaction, IndexProvider, SliceQuery};
use crate::tracking::{AddedRelations, DeletedRelations, added_relations};
use crate::value::Value;

const DISABLED_SCHEMA_MAKER: DisabledSchemaMaker = DisabledSchemaMaker;

/// Lifecycle of a transaction. `commit` and `rollback` are only accepted in
/// `Active` and always end in `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committing,
    RollingBack,
    Closed,
}

/// A graph transaction.
///
/// All reads and writes of vertices, edges and properties go through a
/// transaction. Changes stay in memory, visible to this transaction's own
/// queries, until [`commit`](Self::commit) hands them to the backend as one
/// batch.
///
/// Unless started single-threaded, a transaction is safe to share between
/// threads, e.g. behind an `Arc`.
pub struct Transaction {
    id: u64,
    pub(crate) config: TransactionConfig,
    context: Arc<GraphContext>,
    pub(crate) backend: Box<dyn BackendTransaction>,
    open: AtomicBool,
    /// Moves out of `Active` exactly once.
    state: Mutex<TransactionState>,
    temporary_ids: crate::ids::TemporaryIdPool,
    pub(crate) vertex_cache: VertexCache,
    pub(crate) added: Box<dyn AddedRelations>,
    pub(crate) deleted: DeletedRelations,
    pub(crate) subquery_cache: SubqueryCache,
    pub(crate) new_vertex_index: Box<dyn NewVertexIndexCache>,
    locks: LockManager,
    pub(crate) new_types: TypeNameCache,
}

impl Transaction {
    pub(crate) fn new(
        id: u64,
        config: TransactionConfig,
        context: Arc<GraphContext>,
        backend: Box<dyn BackendTransaction>,
    ) -> Self {
        let single_threaded = config.single_threaded;
        debug!("Starting transaction {} (read_only: {})", id, config.read_only);
        Self {
            id,
            vertex_cache: VertexCache::new(
                config.effective_vertex_cache_size(),
                config.dirty_vertex_size,
                single_threaded,
            ),
            added: added_relations(single_threaded),
            deleted: DeletedRelations::new(single_threaded),
            subquery_cache: SubqueryCache::new(config.index_cache_weight),
            new_vertex_index: new_vertex_index_cache(single_threaded),
            locks: LockManager::new(&config),
            new_types: TypeNameCache::new(),
            temporary_ids: crate::ids::TemporaryIdPool::new(),
            open: AtomicBool::new(true),
            state: Mutex::new(TransactionState::Active),
            config,
            context,
            backend,
        }
    }

    /// Returns the unique identifier of the transaction.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn config(&self) -> &TransactionConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        !self.is_open()
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn is_read_only(&self) -> bool {
        self.config.read_only
    }

    /// Whether anything was added or deleted in this transaction.
    pub fn has_modifications(&self) -> bool {
        !self.added.is_empty() || !self.deleted.is_empty()
    }

    pub(crate) fn schema(&self) -> &SchemaRegistry {
        &self.context.schema
    }

    pub(crate) fn codec(&self) -> &dyn RelationCodec {
        self.context.codec.as_ref()
    }

    pub(crate) fn index_provider(&self, name: &str) -> Option<&Arc<dyn IndexProvider>> {
        self.context.index_providers.get(name)
    }

    fn schema_maker(&self) -> &dyn SchemaMaker {
        if self.config.auto_schema {
            self.context.schema_maker.as_ref()
        } else {
            &DISABLED_SCHEMA_MAKER
        }
    }

    pub(crate) fn verify_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(SeshatError::TransactionClosed)
        }
    }

    pub(crate) fn verify_access(&self, vertex: &Vertex) -> Result<()> {
        self.verify_open()?;
        if vertex.tx_id() != self.id {
            return Err(SeshatError::InvalidState(format!(
                "Vertex {} does not belong to transaction {}",
                vertex.id(),
                self.id
            )));
        }
        if vertex.is_removed() {
            return Err(SeshatError::InvalidState(format!(
                "Vertex {} has been removed",
                vertex.id()
            )));
        }
        Ok(())
    }

    fn verify_write_access(&self, vertices: &[&Arc<Vertex>]) -> Result<()> {
        self.verify_open()?;
        if self.config.read_only {
            return Err(SeshatError::ReadOnlyTransaction);
        }
        for vertex in vertices {
            self.verify_access(vertex)?;
            if self.context.ids.is_unmodifiable(vertex.id()) {
                return Err(SeshatError::InvalidState(format!(
                    "Vertex {} cannot be modified",
                    vertex.id()
                )));
            }
        }
        Ok(())
    }

    fn next_id(&self) -> Result<i64> {
        if self.config.assign_ids_immediately {
            Ok(self.context.ids.next_id()?)
        } else {
            Ok(self.temporary_ids.next())
        }
    }

    // ---- schema ----

    /// Looks a type up among the types created in this transaction, then in the graph schema.
    pub(crate) fn resolve_type(&self, name: &str) -> Option<RelationType> {
        self.new_types.get(name).or_else(|| self.schema().relation_type(name))
    }

    fn resolve_vertex_label(&self, name: &str) -> Option<Arc<VertexLabel>> {
        self.new_types
            .vertex_label(name)
            .or_else(|| self.schema().vertex_label(name))
    }

    pub fn property_key(&self, name: &str) -> Option<Arc<PropertyKey>> {
        self.resolve_type(name).and_then(|t| t.as_key().cloned())
    }

    pub fn edge_label(&self, name: &str) -> Option<Arc<EdgeLabel>> {
        self.resolve_type(name).and_then(|t| t.as_label().cloned())
    }

    fn check_type_name(name: &str) -> Result<()> {
        if name.is_empty() || name.starts_with('~') {
            return Err(SeshatError::InvalidArgument(format!(
                "Invalid schema name: {:?}",
                name
            )));
        }
        Ok(())
    }

    /// Returns the key named `name`, creating it through the schema maker
    /// if it does not exist. `value` is the first value written to the key.
    pub fn get_or_create_property_key(&self, name: &str, value: &Value) -> Result<Arc<PropertyKey>> {
        if let Some(t) = self.resolve_type(name) {
            return t.as_key().cloned().ok_or_else(|| {
                SeshatError::SchemaViolation(format!("{} is an edge label, not a property key", name))
            });
        }
        Self::check_type_name(name)?;
        let def = self.schema_maker().make_property_key(name, value)?;
        let key = self.schema().instantiate_property_key(&def);
        match self.new_types.insert(RelationType::Key(key)) {
            RelationType::Key(key) => Ok(key),
            RelationType::Label(_) => Err(SeshatError::SchemaViolation(format!(
                "{} is an edge label, not a property key",
                name
            ))),
        }
    }

    pub fn get_or_create_edge_label(&self, name: &str) -> Result<Arc<EdgeLabel>> {
        if let Some(t) = self.resolve_type(name) {
            return t.as_label().cloned().ok_or_else(|| {
                SeshatError::SchemaViolation(format!("{} is a property key, not an edge label", name))
            });
        }
        Self::check_type_name(name)?;
        let def = self.schema_maker().make_edge_label(name)?;
        let label = self.schema().instantiate_edge_label(&def);
        match self.new_types.insert(RelationType::Label(label)) {
            RelationType::Label(label) => Ok(label),
            RelationType::Key(_) => Err(SeshatError::SchemaViolation(format!(
                "{} is a property key, not an edge label",
                name
            ))),
        }
    }

    pub fn get_or_create_vertex_label(&self, name: &str) -> Result<Arc<VertexLabel>> {
        if let Some(label) = self.resolve_vertex_label(name) {
            return Ok(label);
        }
        Self::check_type_name(name)?;
        let def = self.schema_maker().make_vertex_label(name)?;
        let label = self.schema().instantiate_vertex_label(&def);
        Ok(self.new_types.insert_vertex_label(label))
    }

    /// Label of `vertex`, read from storage on first access.
    pub fn vertex_label(&self, vertex: &Arc<Vertex>) -> Result<Arc<VertexLabel>> {
        if let Some(label) = vertex.label() {
            return Ok(Arc::clone(label));
        }
        self.verify_access(vertex)?;
        let label_key = RelationType::Key(Arc::clone(self.schema().label_key()));
        let values = self.query(vertex).types(&[label_key]).values()?;
        let label = values
            .first()
            .and_then(|v| v.as_text())
            .and_then(|name| self.resolve_vertex_label(name))
            .unwrap_or_else(|| Arc::clone(self.schema().default_vertex_label()));
        Ok(Arc::clone(vertex.set_label(label)))
    }

    fn check_property_constraint(&self, vertex: &Arc<Vertex>, key: &PropertyKey) -> Result<()> {
        let label = self.vertex_label(vertex)?;
        if label.is_default() || label.has_property_constraint(key.id()) {
            return Ok(());
        }
        self.schema_maker().make_property_constraint(&label, key)?;
        label.add_property_constraint(key.id());
        Ok(())
    }

    fn check_connection_constraint(&self, out: &Arc<Vertex>, in_vertex: &Arc<Vertex>, edge: &EdgeLabel) -> Result<()> {
        let out_label = self.vertex_label(out)?;
        if out_label.is_default() {
            return Ok(());
        }
        let in_label = self.vertex_label(in_vertex)?;
        if out_label.has_connection(edge.id(), in_label.id()) {
            return Ok(());
        }
        self.schema_maker()
            .make_connection_constraint(edge, &out_label, &in_label)?;
        out_label.add_connection(edge.id(), in_label.id());
        Ok(())
    }

    // ---- vertices ----

    fn existence_slice(&self) -> SliceQuery {
        self.codec().type_slice(VERTEX_EXISTS_ID, Direction::Out)
    }

    /// The cached instance for `id`. With `verify`, a vertex missing from
    /// storage comes back marked removed.
    fn retrieve_vertex(&self, id: VertexId, verify: bool) -> Result<Arc<Vertex>> {
        self.vertex_cache.get(id, |id| {
            let vertex = Arc::new(Vertex::new(id, self.id, Lifecycle::Loaded));
            if is_temporary(id) {
                vertex.mark_missing();
            } else if verify {
                let slice = self.existence_slice();
                let entries = self.backend.edge_query(id, &slice)?;
                if entries.is_empty() {
                    vertex.mark_missing();
                } else {
                    vertex.seed_slice(slice, entries);
                }
            }
            Ok(vertex)
        })
    }

    /// Vertex reached through a relation or an index rather than by a caller.
    pub(crate) fn internal_vertex(&self, id: VertexId) -> Result<Arc<Vertex>> {
        self.retrieve_vertex(id, self.config.verify_internal_vertex_existence)
    }

    /// Returns the vertex with the given id, or `None` if it does not exist
    /// or was removed.
    pub fn vertex(&self, id: VertexId) -> Result<Option<Arc<Vertex>>> {
        self.verify_open()?;
        if id == UNASSIGNED {
            return Ok(None);
        }
        let vertex = self.retrieve_vertex(id, self.config.checks_external_vertex_existence())?;
        Ok((!vertex.is_removed()).then_some(vertex))
    }

    /// Like [`vertex`](Self::vertex) for many ids, checking existence with a
    /// single backend call. Missing vertices are left out.
    pub fn vertices(&self, ids: &[VertexId]) -> Result<Vec<Arc<Vertex>>> {
        self.verify_open()?;
        let verify = self.config.checks_external_vertex_existence();
        if verify {
            let mut seen = HashSet::new();
            let uncached: Vec<VertexId> = ids
                .iter()
                .copied()
                .filter(|id| *id != UNASSIGNED && !self.vertex_cache.contains(*id) && seen.insert(*id))
                .collect();
            let stored: Vec<VertexId> = uncached.iter().copied().filter(|id| !is_temporary(*id)).collect();
            if !stored.is_empty() {
                let slice = self.existence_slice();
                let mut rows = self.backend.edge_multi_query(&stored, &slice)?;
                for id in uncached {
                    let entries = rows.remove(&id).unwrap_or_default();
                    let slice = slice.clone();
                    self.vertex_cache.get(id, |id| {
                        let vertex = Arc::new(Vertex::new(id, self.id, Lifecycle::Loaded));
                        if is_temporary(id) || entries.is_empty() {
                            vertex.mark_missing();
                        } else {
                            vertex.seed_slice(slice, entries);
                        }
                        Ok(vertex)
                    })?;
                }
            }
        }
        let mut vertices = Vec::with_capacity(ids.len());
        for id in ids.iter().copied().filter(|id| *id != UNASSIGNED) {
            let vertex = self.retrieve_vertex(id, verify)?;
            if !vertex.is_removed() {
                vertices.push(vertex);
            }
        }
        Ok(vertices)
    }

    /// Creates a vertex. `None` gives it the default label.
    ///
    /// # Errors
    ///
    /// Returns `SeshatError::ReadOnlyTransaction` on a read-only transaction
    /// and `SeshatError::SchemaViolation` if the label does not exist and
    /// automatic schema creation is off.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use seshat::prelude::*;
    /// # fn run(graph: &Graph) -> seshat::Result<()> {
    /// let tx = graph.start_transaction()?;
    /// let person = tx.add_vertex(Some("person"))?;
    /// let anonymous = tx.add_vertex(None)?;
    /// tx.commit()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn add_vertex(&self, label: Option<&str>) -> Result<Arc<Vertex>> {
        self.verify_write_access(&[])?;
        let label = match label {
            Some(name) => self.get_or_create_vertex_label(name)?,
            None => Arc::clone(self.schema().default_vertex_label()),
        };
        let id = self.next_id()?;
        let vertex = Arc::new(Vertex::new(id, self.id, Lifecycle::New));
        vertex.set_label(Arc::clone(&label));
        self.vertex_cache.add(Arc::clone(&vertex), id);

        let exists = Arc::new(Relation::new_property(
            self.next_id()?,
            Arc::clone(self.schema().exists_key()),
            id,
            Value::Bool(true),
        ));
        self.connect_relation(&exists, &[&vertex])?;
        if !label.is_default() {
            let label_property = Arc::new(Relation::new_property(
                self.next_id()?,
                Arc::clone(self.schema().label_key()),
                id,
                Value::Text(label.name().to_string()),
            ));
            self.connect_relation(&label_property, &[&vertex])?;
        }
        Ok(vertex)
    }

    /// Removes the vertex together with every relation incident on it.
    pub fn remove_vertex(&self, vertex: &Arc<Vertex>) -> Result<()> {
        self.verify_write_access(&[vertex])?;
        let relations = self.query(vertex).include_invisible().relations()?;
        let mut seen = HashSet::new();
        for r in relations {
            if seen.insert(r.id()) && !r.is_removed() {
                self.remove_relation(&r)?;
            }
        }
        vertex.mark_removed();
        self.vertex_cache.add(Arc::clone(vertex), vertex.id());
        Ok(())
    }

    // ---- relations ----

    /// Links a new relation into its vertices and the transaction's trackers.
    fn connect_relation(&self, relation: &Arc<Relation>, vertices: &[&Arc<Vertex>]) -> Result<()> {
        for vertex in vertices {
            if !vertex.add_relation(Arc::clone(relation)) {
                return Err(SeshatError::ConnectRelation(relation.id()));
            }
            self.vertex_cache.add(Arc::clone(vertex), vertex.id());
        }
        self.added.add(Arc::clone(relation));
        if relation.is_property() && self.schema().has_simple_vertex_index(relation.type_id()) {
            self.new_vertex_index.add(Arc::clone(relation));
        }
        Ok(())
    }

    /// Incident vertices of `relation`, each once.
    fn incident_vertices(&self, relation: &Relation) -> Result<Vec<Arc<Vertex>>> {
        let mut ids = relation.vertices();
        ids.dedup();
        ids.into_iter().map(|id| self.internal_vertex(id)).collect()
    }

    /// Adds an edge labeled `label` from `out` to `in_vertex`.
    ///
    /// # Errors
    ///
    /// Returns `SeshatError::SchemaViolation` when the label's multiplicity
    /// forbids the edge, and `SeshatError::LockTimeout` when the uniqueness
    /// lock cannot be acquired in time. The transaction stays usable after
    /// either.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use seshat::prelude::*;
    /// # fn run(tx: &Transaction) -> seshat::Result<()> {
    /// let alice = tx.add_vertex(None)?;
    /// let bob = tx.add_vertex(None)?;
    /// let knows = tx.add_edge(&alice, &bob, "knows")?;
    /// tx.set_relation_property(&knows, "since", 2020)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn add_edge(&self, out: &Arc<Vertex>, in_vertex: &Arc<Vertex>, label: &str) -> Result<Arc<Relation>> {
        self.verify_write_access(&[out, in_vertex])?;
        let label = self.get_or_create_edge_label(label)?;
        if self.config.schema_constraints {
            self.check_connection_constraint(out, in_vertex, &label)?;
        }
        let relation_type = RelationType::Label(Arc::clone(&label));
        let verify = self.config.checks_uniqueness();
        let lock = self.locks.uniqueness_lock(
            verify,
            out.id(),
            &relation_type,
            LockElement::Vertex(in_vertex.id()),
        );
        let _guard = LockGuard::acquire(lock, self.locks.timeout())?;
        if verify {
            self.check_edge_multiplicity(out, in_vertex, &relation_type)?;
        }
        let edge = Arc::new(Relation::new_edge(self.next_id()?, label, out.id(), in_vertex.id()));
        if edge.is_loop() {
            self.connect_relation(&edge, &[out])?;
        } else {
            self.connect_relation(&edge, &[out, in_vertex])?;
        }
        Ok(edge)
    }

    fn check_edge_multiplicity(&self, out: &Arc<Vertex>, in_vertex: &Arc<Vertex>, relation_type: &RelationType) -> Result<()> {
        let types = std::slice::from_ref(relation_type);
        match relation_type.multiplicity() {
            Multiplicity::Multi => {}
            Multiplicity::Simple => {
                let existing = self
                    .query(out)
                    .direction(Direction::Out)
                    .types(types)
                    .adjacent(in_vertex)
                    .limit(1)
                    .edges()?;
                if !existing.is_empty() {
                    return Err(SeshatError::SchemaViolation(format!(
                        "An edge with the given label already exists between the pair of vertices and the label [{}] is simple",
                        relation_type.name()
                    )));
                }
            }
            multiplicity => {
                if multiplicity.is_unique(Direction::Out)
                    && !self
                        .query(out)
                        .direction(Direction::Out)
                        .types(types)
                        .limit(1)
                        .edges()?
                        .is_empty()
                {
                    return Err(SeshatError::SchemaViolation(format!(
                        "An edge with the given label already exists on the out-vertex and the label [{}] is out-unique",
                        relation_type.name()
                    )));
                }
                if multiplicity.is_unique(Direction::In)
                    && !self
                        .query(in_vertex)
                        .direction(Direction::In)
                        .types(types)
                        .limit(1)
                        .edges()?
                        .is_empty()
                {
                    return Err(SeshatError::SchemaViolation(format!(
                        "An edge with the given label already exists on the in-vertex and the label [{}] is in-unique",
                        relation_type.name()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Sets `key` to `value` on `vertex` using the key's cardinality.
    ///
    /// For SINGLE keys the previous value is replaced; for SET keys an equal
    /// value is replaced; LIST keys accumulate values.
    ///
    /// # Arguments
    ///
    /// * `vertex` - A vertex of this transaction.
    /// * `key` - Name of the property key. Created through the schema maker if unknown.
    /// * `value` - Converted to the key's data type.
    ///
    /// # Returns
    ///
    /// The new property.
    ///
    /// # Errors
    ///
    /// Returns `SeshatError::InvalidArgument` when the value does not fit the
    /// key's data type and `SeshatError::SchemaViolation` when a unique index
    /// already maps the value to another vertex.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use seshat::prelude::*;
    /// # fn run(tx: &Transaction) -> seshat::Result<()> {
    /// let v = tx.add_vertex(None)?;
    /// tx.add_property(&v, "name", "alice")?;
    /// tx.add_property(&v, "name", "alicia")?; // replaces "alice"
    /// assert_eq!(tx.query(&v).keys(&["name"]).values()?, vec![Value::from("alicia")]);
    /// # Ok(())
    /// # }
    /// ```
    pub fn add_property(&self, vertex: &Arc<Vertex>, key: &str, value: impl Into<Value>) -> Result<Arc<Relation>> {
        let value = value.into();
        self.verify_write_access(&[vertex])?;
        let key = self.get_or_create_property_key(key, &value)?;
        self.add_property_with(vertex, key.cardinality(), key, value)
    }

    /// Like [`add_property`](Self::add_property) with an explicit cardinality.
    pub fn add_property_with_cardinality(
        &self,
        vertex: &Arc<Vertex>,
        cardinality: Cardinality,
        key: &str,
        value: impl Into<Value>,
    ) -> Result<Arc<Relation>> {
        let value = value.into();
        self.verify_write_access(&[vertex])?;
        let key = self.get_or_create_property_key(key, &value)?;
        self.add_property_with(vertex, cardinality, key, value)
    }

    fn add_property_with(
        &self,
        vertex: &Arc<Vertex>,
        cardinality: Cardinality,
        key: Arc<PropertyKey>,
        value: Value,
    ) -> Result<Arc<Relation>> {
        if key.is_invisible() {
            return Err(SeshatError::InvalidArgument(format!(
                "Cannot set system property {}",
                key.name()
            )));
        }
        if cardinality != key.cardinality() && cardinality != Cardinality::Single {
            return Err(SeshatError::SchemaViolation(format!(
                "Key {} is defined for {:?} cardinality which conflicts with specified: {:?}",
                key.name(),
                key.cardinality(),
                cardinality
            )));
        }
        let value = value.convert(key.data_type()).ok_or_else(|| {
            SeshatError::InvalidArgument(format!(
                "Value {} is not compatible with the data type {:?} of key {}",
                value,
                key.data_type(),
                key.name()
            ))
        })?;
        if self.config.schema_constraints {
            self.check_property_constraint(vertex, &key)?;
        }

        let relation_type = RelationType::Key(Arc::clone(&key));
        let verify = self.config.checks_uniqueness();
        let mut lock = self.locks.uniqueness_lock(
            verify,
            vertex.id(),
            &relation_type,
            LockElement::Value(value.clone()),
        );
        let mut unique_records = Vec::new();
        if verify {
            for index in self.schema().unique_indexes_for(key.id()) {
                if let Some(values) = self.index_record(vertex, &index, &key, &value)? {
                    let index_lock = self.locks.get_lock(IndexLockTuple {
                        index: index.id(),
                        values: values.clone(),
                    });
                    lock = LockManager::combine(lock, index_lock);
                    unique_records.push((index, values));
                }
            }
        }
        let _guard = LockGuard::acquire(lock, self.locks.timeout())?;

        let upsert = cardinality == key.cardinality()
            && !self.schema().has_any_index(key.id())
            && (!verify || key.consistency() != ConsistencyModifier::Lock);
        match cardinality {
            Cardinality::List => {}
            Cardinality::Single | Cardinality::Set => {
                let same_value = |r: &Relation| cardinality == Cardinality::Single || r.value() == Some(&value);
                if upsert {
                    let key_id = key.id();
                    for p in vertex.added_relations(|r| r.type_id() == key_id && same_value(r)) {
                        self.remove_relation(&p)?;
                    }
                } else {
                    let mut q = self.query(vertex).types(std::slice::from_ref(&relation_type));
                    if cardinality == Cardinality::Set {
                        q = q.value(Cmp::Equal, value.clone());
                    }
                    for p in q.properties()? {
                        self.remove_relation(&p)?;
                    }
                }
            }
        }

        for (index, values) in &unique_records {
            self.check_index_uniqueness(vertex, index, values)?;
        }

        let property = Arc::new(Relation::new_property(self.next_id()?, key, vertex.id(), value));
        property.set_upsert(upsert && cardinality != Cardinality::List);
        self.connect_relation(&property, &[vertex])?;
        Ok(property)
    }

    /// Values of `index`'s keys for `vertex` once `key` holds `value`, or
    /// `None` if the vertex lacks one of the other keys.
    fn index_record(
        &self,
        vertex: &Arc<Vertex>,
        index: &CompositeIndex,
        key: &PropertyKey,
        value: &Value,
    ) -> Result<Option<Vec<Value>>> {
        let mut values = Vec::with_capacity(index.keys().len());
        for k in index.keys() {
            if k.id() == key.id() {
                values.push(value.clone());
                continue;
            }
            let current = self
                .query(vertex)
                .types(&[RelationType::Key(Arc::clone(k))])
                .limit(1)
                .values()?;
            match current.into_iter().next() {
                Some(v) => values.push(v),
                None => return Ok(None),
            }
        }
        Ok(Some(values))
    }

    fn check_index_uniqueness(&self, vertex: &Arc<Vertex>, index: &CompositeIndex, values: &[Value]) -> Result<()> {
        let mut query = self.graph_query();
        for (k, v) in index.keys().iter().zip(values) {
            query = query.has(k.name(), Cmp::Equal, v.clone());
        }
        let own = vertex.id();
        if query.vertices()?.iter().any(|other| other.id() != own) {
            return Err(SeshatError::SchemaViolation(format!(
                "Adding this property for key [{}] and value [{:?}] violates a uniqueness constraint [{}]",
                index.keys().iter().map(|k| k.name()).collect::<Vec<_>>().join(","),
                values,
                index.name()
            )));
        }
        Ok(())
    }

    /// Sets a property on an edge or a meta property on a vertex property.
    ///
    /// A relation created in this transaction is changed in place. A loaded
    /// relation is immutable, so it is removed and replaced by a new copy
    /// carrying the change; the copy is returned.
    pub fn set_relation_property(&self, relation: &Arc<Relation>, key: &str, value: impl Into<Value>) -> Result<Arc<Relation>> {
        let value = value.into();
        let key = self.get_or_create_property_key(key, &value)?;
        let value = value.convert(key.data_type()).ok_or_else(|| {
            SeshatError::InvalidArgument(format!(
                "Value {} is not compatible with the data type {:?} of key {}",
                value,
                key.data_type(),
                key.name()
            ))
        })?;
        let key_id = key.id();
        self.update_relation(relation, move |r| r.set_property(key_id, value))
    }

    pub fn remove_relation_property(&self, relation: &Arc<Relation>, key: &str) -> Result<Arc<Relation>> {
        let Some(key) = self.property_key(key) else {
            self.verify_open()?;
            return Ok(Arc::clone(relation));
        };
        let key_id = key.id();
        self.update_relation(relation, move |r| {
            r.remove_property(key_id);
        })
    }

    fn update_relation(&self, relation: &Arc<Relation>, change: impl FnOnce(&Relation)) -> Result<Arc<Relation>> {
        let vertices = self.incident_vertices(relation)?;
        let refs: Vec<&Arc<Vertex>> = vertices.iter().collect();
        self.verify_write_access(&refs)?;
        if relation.is_removed() {
            return Err(SeshatError::InvalidState(format!(
                "Relation {} has been removed",
                relation.id()
            )));
        }
        if relation.is_new() {
            change(relation);
            return Ok(Arc::clone(relation));
        }
        let copy = Arc::new(relation.supersede(self.next_id()?));
        change(&copy);
        self.detach_relation(relation, &vertices);
        self.connect_relation(&copy, &refs)?;
        Ok(copy)
    }

    /// Removes an edge or a property.
    ///
    /// Removing a property that replaced stored values without reading them
    /// also removes those stored values.
    pub fn remove_relation(&self, relation: &Arc<Relation>) -> Result<()> {
        let vertices = self.incident_vertices(relation)?;
        let refs: Vec<&Arc<Vertex>> = vertices.iter().collect();
        self.verify_write_access(&refs)?;
        if relation.is_removed() {
            return Err(SeshatError::InvalidState(format!(
                "Relation {} has already been removed",
                relation.id()
            )));
        }
        self.detach_relation(relation, &vertices);

        if relation.is_upsert() {
            if let (Some(key), Some(value), Some(vertex)) =
                (relation.relation_type().as_key(), relation.value(), vertices.first())
            {
                let mut q = self.query(vertex).types(std::slice::from_ref(relation.relation_type()));
                if key.cardinality() == Cardinality::Set {
                    q = q.value(Cmp::Equal, value.clone());
                }
                for overwritten in q.properties()? {
                    if overwritten.is_loaded() {
                        self.remove_relation(&overwritten)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn detach_relation(&self, relation: &Arc<Relation>, vertices: &[Arc<Vertex>]) {
        for vertex in vertices {
            vertex.remove_relation(relation);
            self.vertex_cache.add(Arc::clone(vertex), vertex.id());
        }
        if relation.is_new() {
            self.added.remove(relation);
            if relation.is_property() && self.schema().has_simple_vertex_index(relation.type_id()) {
                self.new_vertex_index.remove(relation);
            }
        } else {
            self.deleted.put(Arc::clone(relation));
        }
        relation.mark_removed();
    }

    /// Finds a relation again from its identifier.
    pub fn find_relation(&self, id: &RelationIdentifier) -> Result<Option<Arc<Relation>>> {
        self.verify_open()?;
        let Some(relation_type) = self.relation_type_by_id(id.type_id) else {
            return Ok(None);
        };
        let vertex = self.internal_vertex(id.out_vertex)?;
        if vertex.is_removed() {
            return Ok(None);
        }
        let found = self
            .query(&vertex)
            .direction(Direction::Out)
            .types(&[relation_type])
            .include_invisible()
            .relations()?
            .into_iter()
            .find(|r| r.id() == id.relation_id);
        Ok(found)
    }

    /// Loads the relations of the given types for many vertices with one
    /// backend call per slice. Later queries on these vertices are served
    /// from memory.
    pub fn prefetch(&self, vertices: &[Arc<Vertex>], types: &[&str]) -> Result<()> {
        self.verify_open()?;
        let resolved: Vec<RelationType> = types.iter().filter_map(|t| self.resolve_type(t)).collect();
        if !types.is_empty() && resolved.is_empty() {
            return Ok(());
        }
        for slice in slices_for(self.codec(), &resolved, Direction::Both, None) {
            let targets: Vec<&Arc<Vertex>> = vertices
                .iter()
                .filter(|v| v.tx_id() == self.id && matches!(v.lifecycle(), Lifecycle::Loaded | Lifecycle::Modified))
                .filter(|v| !v.has_loaded_slice(&slice))
                .collect();
            if targets.is_empty() {
                continue;
            }
            let ids: Vec<VertexId> = targets.iter().map(|v| v.id()).collect();
            let mut rows = self.backend.edge_multi_query(&ids, &slice)?;
            for v in targets {
                v.seed_slice(slice.clone(), rows.remove(&v.id()).unwrap_or_default());
            }
        }
        Ok(())
    }

    /// Decodes a stored relation of `vertex`, reusing the instance already
    /// decoded for the same id.
    pub(crate) fn materialize(&self, vertex: &Vertex, lazy: &LazyRelation) -> Result<(Arc<Relation>, Direction)> {
        lazy.materialize(|entry| {
            let cache = self.codec().read_relation(entry, false, self)?;
            let relation_type = self
                .relation_type_by_id(cache.type_id)
                .ok_or_else(|| SeshatError::Codec(format!("unknown relation type {}", cache.type_id)))?;
            let own = vertex.id();
            let kind = match cache.other {
                Some(RelationValue::Vertex(other)) => match cache.direction {
                    Direction::In => RelationKind::Edge {
                        out: other.into(),
                        in_vertex: own.into(),
                    },
                    _ => RelationKind::Edge {
                        out: own.into(),
                        in_vertex: other.into(),
                    },
                },
                Some(RelationValue::Value(value)) => RelationKind::Property {
                    vertex: own.into(),
                    value,
                },
                None => {
                    return Err(SeshatError::Codec(format!(
                        "relation {} decoded without payload",
                        cache.relation_id
                    )));
                }
            };
            let relation = Arc::new(Relation::loaded(
                cache.relation_id,
                relation_type,
                kind,
                cache.properties.into_iter().collect(),
            ));
            Ok((vertex.canonical_loaded(relation), cache.direction))
        })
    }

    // ---- queries ----

    /// Starts a query over the relations of `vertex`.
    pub fn query(&self, vertex: &Arc<Vertex>) -> VertexQueryBuilder<'_> {
        VertexQueryBuilder::new(self, Arc::clone(vertex))
    }

    /// Starts a query over all elements of the graph.
    pub fn graph_query(&self) -> GraphQueryBuilder<'_> {
        GraphQueryBuilder::new(self)
    }

    /// Resolves an element id returned by an index.
    pub fn element(&self, id: &crate::element::ElementId) -> Result<Option<Element>> {
        match id {
            crate::element::ElementId::Vertex(v) => Ok(self.vertex(*v)?.map(Element::Vertex)),
            crate::element::ElementId::Relation(r) => Ok(self.find_relation(r)?.map(Element::Relation)),
        }
    }

    // ---- lifecycle ----

    /// Commits the transaction.
    ///
    /// Without modifications this only commits the backend transaction.
    /// Otherwise every added and deleted relation is persisted in one batch.
    /// Whatever the outcome, the transaction is closed afterwards and every
    /// further operation fails with `SeshatError::TransactionClosed`.
    ///
    /// # Errors
    ///
    /// * `SeshatError::TransactionClosed` if the transaction was already closed.
    /// * `SeshatError::CommitFailed` if persisting failed and the backend was rolled back.
    /// * `SeshatError::RollbackAfterFailedCommit` if the rollback after a failed
    ///   persist failed as well.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use seshat::prelude::*;
    /// # fn run(graph: &Graph) -> seshat::Result<()> {
    /// let tx = graph.start_transaction()?;
    /// let v = tx.add_vertex(None)?;
    /// tx.add_property(&v, "name", "alice")?;
    /// match tx.commit() {
    ///     Ok(()) => println!("committed"),
    ///     Err(SeshatError::CommitFailed(cause)) => eprintln!("rolled back: {}", cause),
    ///     Err(e) => return Err(e),
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn commit(&self) -> Result<()> {
        self.begin_closing(TransactionState::Committing)?;
        let outcome = self.persist();
        self.release();
        *self.state.lock() = TransactionState::Closed;
        outcome
    }

    /// Moves an active transaction into `next`. Only one caller can win.
    fn begin_closing(&self, next: TransactionState) -> Result<()> {
        let mut state = self.state.lock();
        if *state != TransactionState::Active {
            return Err(SeshatError::TransactionClosed);
        }
        *state = next;
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        let result = if self.has_modifications() {
            debug!(
                "Committing transaction {} ({} added, {} deleted relations)",
                self.id,
                self.added.len(),
                self.deleted.len()
            );
            commit::commit(self)
        } else {
            debug!("Transaction {} has no modifications", self.id);
            self.backend.commit().map_err(SeshatError::from).map(|()| self.publish_types())
        };
        let Err(cause) = result else {
            debug!("Transaction {} committed", self.id);
            return Ok(());
        };
        match self.backend.rollback() {
            Ok(()) => Err(SeshatError::CommitFailed(Box::new(cause))),
            Err(rollback) => {
                error!(
                    "Could not roll back transaction {} after a failed commit: {}",
                    self.id, rollback
                );
                Err(SeshatError::RollbackAfterFailedCommit {
                    commit: Box::new(cause),
                    rollback,
                })
            }
        }
    }

    /// Discards every change and closes the transaction.
    pub fn rollback(&self) -> Result<()> {
        self.begin_closing(TransactionState::RollingBack)?;
        let outcome = self.backend.rollback().map_err(SeshatError::RollbackFailed);
        debug!("Transaction {} rolled back", self.id);
        self.release();
        *self.state.lock() = TransactionState::Closed;
        outcome
    }

    fn release(&self) {
        self.open.store(false, Ordering::Release);
        self.vertex_cache.close();
        self.added.clear();
        self.deleted.clear();
        self.subquery_cache.clear();
        self.new_vertex_index.clear();
        self.locks.clear();
        self.new_types.clear();
        debug!("Transaction {} released", self.id);
    }

    pub(crate) fn added_relations(&self) -> Vec<Arc<Relation>> {
        self.added.get_all()
    }

    pub(crate) fn deleted_relations(&self) -> Vec<Arc<Relation>> {
        self.deleted.values()
    }

    pub(crate) fn allocate_permanent_id(&self) -> Result<RelationId> {
        Ok(self.context.ids.next_id()?)
    }

    pub(crate) fn publish_types(&self) {
        self.new_types.publish_into(self.schema());
    }
}

impl TypeInspector for Transaction {
    fn relation_type_by_id(&self, id: crate::ids::TypeId) -> Option<RelationType> {
        self.new_types
            .get_by_id(id)
            .or_else(|| self.schema().relation_type_by_id(id))
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if *self.state.get_mut() == TransactionState::Active {
            debug!("Transaction {} dropped while open, rolling back", self.id);
            if let Err(e) = self.rollback() {
                debug!("Rollback of dropped transaction {} failed: {}", self.id, e);
            }
        }
    }
}
