//! Queries over the relations of a single vertex.

use std::sync::Arc;

use crate::codec::RelationCodec;
use crate::element::comparator::RelationComparator;
use crate::element::{ElementCategory, LazyState, Relation, Vertex};
use crate::errors::{Result, SeshatError};
use crate::ids::VertexId;
use crate::query::condition::Cmp;
use crate::query::executor::{QueryExecutor, QueryProcessor, ResultIter};
use crate::query::profile::QueryProfiler;
use crate::schema::{Direction, PropertyKey, RelationType, TypeInspector};
use crate::storage::SliceQuery;
use crate::transaction::Transaction;
use crate::value::Value;

/// Filters on relation properties (edge properties and meta properties).
#[derive(Debug, Clone)]
pub struct RelationPredicate {
    pub key: Arc<PropertyKey>,
    pub cmp: Cmp,
    pub value: Value,
}

#[derive(Debug, Clone)]
pub struct VertexCentricQuery {
    pub vertex: Arc<Vertex>,
    pub direction: Direction,
    /// Empty means every visible type.
    pub types: Vec<RelationType>,
    pub include_invisible: bool,
    /// `None` means edges and properties.
    pub category: Option<ElementCategory>,
    pub adjacent: Option<VertexId>,
    /// Conditions on the value of properties.
    pub value_conditions: Vec<(Cmp, Value)>,
    pub conditions: Vec<RelationPredicate>,
    pub limit: Option<usize>,
    /// Backend slices covering the query.
    pub slices: Vec<SliceQuery>,
}

impl VertexCentricQuery {
    /// Everything except direction.
    fn matches_relation(&self, r: &Relation) -> bool {
        if self.category.is_some_and(|c| c != r.category()) {
            return false;
        }
        if self.types.is_empty() {
            if r.is_invisible() && !self.include_invisible {
                return false;
            }
        } else if !self.types.iter().any(|t| t.id() == r.type_id()) {
            return false;
        }
        let vertex = self.vertex.id();
        if let Some(adjacent) = self.adjacent {
            if r.other_vertex(vertex) != Some(adjacent) {
                return false;
            }
        }
        if !self.value_conditions.is_empty() {
            let Some(value) = r.value() else {
                return false;
            };
            if !self.value_conditions.iter().all(|(cmp, c)| cmp.test(value, c)) {
                return false;
            }
        }
        self.conditions.iter().all(|p| match r.property(p.key.id()) {
            Some(v) => p.cmp.test(&v, &p.value),
            None => p.cmp == Cmp::NotEqual,
        })
    }

    /// Number of times `r` is part of the answer: a self-loop counts once
    /// per matching direction.
    fn multiplicity_of(&self, r: &Relation) -> usize {
        if !self.matches_relation(r) {
            return 0;
        }
        r.directions_from(self.vertex.id())
            .into_iter()
            .filter(|d| self.direction.includes(*d))
            .count()
    }

    pub fn matches(&self, r: &Relation) -> bool {
        self.multiplicity_of(r) > 0
    }
}

/// Answers vertex-centric queries for one transaction.
pub struct VertexCentricExecutor<'t> {
    tx: &'t Transaction,
}

impl<'t> VertexCentricExecutor<'t> {
    pub fn new(tx: &'t Transaction) -> Self {
        Self { tx }
    }

    /// An added relation of the vertex replaces `r`.
    fn is_superseded(&self, vertex: &Vertex, r: &Relation) -> bool {
        let id = r.id();
        !vertex.added_relations(|a| a.previous_id() == id).is_empty()
    }

    fn is_displaced(&self, vertex: &Vertex, r: &Relation) -> bool {
        if !r.relation_type().multiplicity().is_constrained() || !vertex.has_added_relations() {
            return false;
        }
        let comparator = RelationComparator::new(vertex.id());
        let type_id = r.type_id();
        !vertex
            .added_relations(|a| a.type_id() == type_id && comparator.displaces(a, r))
            .is_empty()
    }

    /// Cheap check against the column header before decoding the entry.
    fn header_matches(&self, query: &VertexCentricQuery, state: &LazyState) -> Result<bool> {
        match state {
            LazyState::Loaded { direction, .. } => Ok(query.direction.includes(*direction)),
            LazyState::Unloaded(entry) => {
                let header = self.tx.codec().read_relation(entry, true, self.tx)?;
                if !query.direction.includes(header.direction) {
                    return Ok(false);
                }
                if query.types.is_empty() {
                    Ok(query.include_invisible
                        || self
                            .tx
                            .relation_type_by_id(header.type_id)
                            .is_some_and(|t| !t.is_invisible()))
                } else {
                    Ok(query.types.iter().any(|t| t.id() == header.type_id))
                }
            }
        }
    }
}

impl QueryExecutor<VertexCentricQuery, Arc<Relation>, SliceQuery> for VertexCentricExecutor<'_> {
    fn get_new(&self, query: &VertexCentricQuery) -> Result<Vec<Arc<Relation>>> {
        let vertex = &query.vertex;
        if !vertex.has_added_relations() {
            return Ok(Vec::new());
        }
        let mut results = Vec::new();
        for r in vertex.added_relations(|r| query.matches(r)) {
            for _ in 0..query.multiplicity_of(&r) {
                results.push(Arc::clone(&r));
            }
        }
        Ok(results)
    }

    fn has_deletions(&self, query: &VertexCentricQuery) -> bool {
        let vertex = &query.vertex;
        !vertex.is_new() && (vertex.has_removed_relations() || vertex.has_added_relations())
    }

    fn is_deleted(&self, query: &VertexCentricQuery, r: &Arc<Relation>) -> Result<bool> {
        let vertex = &query.vertex;
        Ok(r.is_removed()
            || self.tx.deleted.contains(r.id())
            || self.is_superseded(vertex, r)
            || self.is_displaced(vertex, r))
    }

    fn execute<'a>(
        &'a self,
        query: &'a VertexCentricQuery,
        slice: &'a SliceQuery,
        profiler: &QueryProfiler,
    ) -> Result<ResultIter<'a, Arc<Relation>>> {
        let vertex = &query.vertex;
        if vertex.is_new() {
            return Ok(Box::new(std::iter::empty()));
        }
        let tx = self.tx;
        let entries = vertex.load_relations(slice, |s| {
            profiler.profile("backend", |_| {
                tx.backend.edge_query(vertex.id(), s).map_err(SeshatError::from)
            })
        })?;

        let mut results = Vec::with_capacity(entries.len());
        for lazy in entries.iter() {
            if !lazy.inspect(|state| self.header_matches(query, state))? {
                continue;
            }
            let (relation, _) = tx.materialize(vertex, lazy)?;
            if query.matches_relation(&relation) {
                results.push(Ok(relation));
            }
        }
        Ok(Box::new(results.into_iter()))
    }
}

/// Fluent construction of a [`VertexCentricQuery`].
///
/// ```no_run
/// use seshat::prelude::*;
/// # fn run(tx: &Transaction, v: &std::sync::Arc<Vertex>) -> seshat::Result<()> {
/// let friends = tx.query(v).direction(Direction::Out).labels(&["knows"]).edges()?;
/// let names = tx.query(v).keys(&["name"]).values()?;
/// # Ok(())
/// # }
/// ```
pub struct VertexQueryBuilder<'t> {
    tx: &'t Transaction,
    vertex: Arc<Vertex>,
    direction: Direction,
    type_names: Vec<String>,
    types: Vec<RelationType>,
    include_invisible: bool,
    adjacent: Option<VertexId>,
    value_conditions: Vec<(Cmp, Value)>,
    conditions: Vec<(String, Cmp, Value)>,
    limit: Option<usize>,
    profiler: QueryProfiler,
}

impl<'t> VertexQueryBuilder<'t> {
    pub(crate) fn new(tx: &'t Transaction, vertex: Arc<Vertex>) -> Self {
        Self {
            tx,
            vertex,
            direction: Direction::Both,
            type_names: Vec::new(),
            types: Vec::new(),
            include_invisible: false,
            adjacent: None,
            value_conditions: Vec::new(),
            conditions: Vec::new(),
            limit: None,
            profiler: QueryProfiler::noop(),
        }
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Restricts the query to edges of these labels.
    pub fn labels(mut self, labels: &[&str]) -> Self {
        self.type_names.extend(labels.iter().map(|l| l.to_string()));
        self
    }

    /// Restricts the query to properties of these keys.
    pub fn keys(mut self, keys: &[&str]) -> Self {
        self.type_names.extend(keys.iter().map(|k| k.to_string()));
        self
    }

    pub fn types(mut self, types: &[RelationType]) -> Self {
        self.types.extend(types.iter().cloned());
        self
    }

    pub(crate) fn include_invisible(mut self) -> Self {
        self.include_invisible = true;
        self
    }

    /// Restricts edges to those whose other end is `vertex`.
    pub fn adjacent(mut self, vertex: &Vertex) -> Self {
        self.adjacent = Some(vertex.id());
        self
    }

    /// Filters on a property of the relation itself.
    pub fn has(mut self, key: &str, cmp: Cmp, value: impl Into<Value>) -> Self {
        self.conditions.push((key.to_string(), cmp, value.into()));
        self
    }

    /// Filters properties by their value.
    pub fn value(mut self, cmp: Cmp, value: impl Into<Value>) -> Self {
        self.value_conditions.push((cmp, value.into()));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn profiler(mut self, profiler: QueryProfiler) -> Self {
        self.profiler = profiler;
        self
    }

    /// Builds the query, or `None` when it can match nothing.
    pub fn build(self, category: Option<ElementCategory>) -> Result<Option<VertexCentricQuery>> {
        let tx = self.tx;
        let mut types = self.types;
        for name in &self.type_names {
            match tx.resolve_type(name) {
                Some(t) => types.push(t),
                None => continue,
            }
        }
        if !self.type_names.is_empty() && types.is_empty() {
            return Ok(None);
        }
        if let Some(category) = category {
            if !types.is_empty() {
                types.retain(|t| t.category() == category);
                if types.is_empty() {
                    return Ok(None);
                }
            }
        }
        let mut conditions = Vec::with_capacity(self.conditions.len());
        for (name, cmp, value) in self.conditions {
            match tx.resolve_type(&name).and_then(|t| t.as_key().cloned()) {
                Some(key) => conditions.push(RelationPredicate { key, cmp, value }),
                None if cmp == Cmp::NotEqual => {}
                None => return Ok(None),
            }
        }
        let slices = slices_for(tx.codec(), &types, self.direction, self.adjacent);
        if !types.is_empty() && slices.is_empty() {
            return Ok(None);
        }
        Ok(Some(VertexCentricQuery {
            vertex: self.vertex,
            direction: self.direction,
            types,
            include_invisible: self.include_invisible,
            category,
            adjacent: self.adjacent,
            value_conditions: self.value_conditions,
            conditions,
            limit: self.limit,
            slices,
        }))
    }

    fn run(self, category: Option<ElementCategory>) -> Result<Vec<Arc<Relation>>> {
        let tx = self.tx;
        tx.verify_open()?;
        tx.verify_access(&self.vertex)?;
        let profiler = self.profiler.clone();
        let Some(query) = self.build(category)? else {
            return Ok(Vec::new());
        };
        let executor = VertexCentricExecutor::new(tx);
        QueryProcessor::new(&executor, &query, query.limit).run(&query.slices, &profiler)
    }

    pub fn relations(self) -> Result<Vec<Arc<Relation>>> {
        self.run(None)
    }

    pub fn edges(self) -> Result<Vec<Arc<Relation>>> {
        self.run(Some(ElementCategory::Edge))
    }

    pub fn properties(self) -> Result<Vec<Arc<Relation>>> {
        self.run(Some(ElementCategory::Property))
    }

    /// Values of the matching properties.
    pub fn values(self) -> Result<Vec<Value>> {
        Ok(self
            .properties()?
            .iter()
            .filter_map(|p| p.value().cloned())
            .collect())
    }

    /// Vertices on the other end of the matching edges.
    pub fn vertices(self) -> Result<Vec<Arc<Vertex>>> {
        let tx = self.tx;
        let own = self.vertex.id();
        let edges = self.edges()?;
        let mut vertices = Vec::with_capacity(edges.len());
        for e in edges {
            if let Some(other) = e.other_vertex(own) {
                vertices.push(tx.internal_vertex(other)?);
            }
        }
        Ok(vertices)
    }

    pub fn edge_count(self) -> Result<usize> {
        Ok(self.edges()?.len())
    }

    pub fn property_count(self) -> Result<usize> {
        Ok(self.properties()?.len())
    }
}

/// Backend slices covering `types` in `direction`. Property keys are only
/// stored outgoing.
pub(crate) fn slices_for(
    codec: &dyn RelationCodec,
    types: &[RelationType],
    direction: Direction,
    adjacent: Option<VertexId>,
) -> Vec<SliceQuery> {
    if types.is_empty() {
        return vec![codec.all_relations_slice()];
    }
    let mut slices = Vec::new();
    for t in types {
        match t {
            RelationType::Key(key) => {
                if direction.includes(Direction::Out) {
                    slices.push(codec.type_slice(key.id(), Direction::Out));
                }
            }
            RelationType::Label(label) => match adjacent {
                Some(other) => {
                    for dir in Direction::PROPER {
                        if direction.includes(dir) {
                            slices.push(codec.adjacent_slice(label.id(), dir, other));
                        }
                    }
                }
                None => slices.push(codec.type_slice(label.id(), direction)),
            },
        }
    }
    slices
}
