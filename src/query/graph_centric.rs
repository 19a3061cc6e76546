//! Queries over all elements of the graph, answered through indexes when
//! possible and by scanning every vertex otherwise.

use std::sync::Arc;

use ahash::AHashSet as HashSet;
use log::warn;

use crate::element::{Element, ElementCategory, ElementId, Relation, Vertex};
use crate::errors::{Result, SeshatError};
use crate::ids::VertexId;
use crate::query::condition::{Cmp, Condition, Predicate};
use crate::query::executor::{QueryExecutor, QueryProcessor, ResultIter};
use crate::query::profile::{CONDITION_ANNOTATION, FULLSCAN_ANNOTATION, INDEX_ANNOTATION, QueryProfiler};
use crate::query::subquery::SubqueryIterator;
use crate::schema::{Direction, RelationType};
use crate::storage::{IndexSubquery, IndexTarget};
use crate::transaction::Transaction;
use crate::value::Value;

/// Index subqueries whose intersection answers (part of) a condition.
#[derive(Debug, Clone)]
pub struct JointIndexQuery {
    pub subqueries: Vec<IndexSubquery>,
    /// True when the indexes answer every clause, so results need no
    /// further filtering.
    pub covers_condition: bool,
}

#[derive(Debug, Clone)]
pub enum GraphBackendQuery {
    Indexed(JointIndexQuery),
    FullScan,
}

#[derive(Debug, Clone)]
pub struct GraphCentricQuery {
    pub result: ElementCategory,
    pub condition: Condition,
    pub backend: GraphBackendQuery,
    pub limit: Option<usize>,
}

impl GraphCentricQuery {
    pub fn is_fullscan(&self) -> bool {
        matches!(self.backend, GraphBackendQuery::FullScan)
    }

    pub fn matches(&self, tx: &Transaction, element: &Element) -> Result<bool> {
        if element.category() != self.result || element.is_removed() {
            return Ok(false);
        }
        self.condition.evaluate(&mut |p| predicate_holds(tx, element, p))
    }
}

fn predicate_holds(tx: &Transaction, element: &Element, p: &Predicate) -> Result<bool> {
    match element {
        Element::Vertex(v) => {
            let values = tx
                .query(v)
                .types(&[RelationType::Key(Arc::clone(&p.key))])
                .values()?;
            Ok(p.cmp.test_any(values.iter(), &p.value))
        }
        Element::Relation(r) => {
            if r.is_property() && r.type_id() == p.key.id() {
                return Ok(r.value().is_some_and(|v| p.cmp.test(v, &p.value)));
            }
            Ok(match r.property(p.key.id()) {
                Some(v) => p.cmp.test(&v, &p.value),
                None => p.cmp == Cmp::NotEqual,
            })
        }
    }
}

fn predicate_at(clauses: &[Condition], i: usize) -> Option<&Predicate> {
    match &clauses[i] {
        Condition::Predicate(p) => Some(p),
        _ => None,
    }
}

struct Candidate {
    subquery: IndexSubquery,
    covered: Vec<usize>,
    unique: bool,
}

/// Picks indexes for the top-level clauses of `condition`, greedily
/// preferring the index that answers most clauses.
pub(crate) fn select_indexes(
    tx: &Transaction,
    result: ElementCategory,
    condition: &Condition,
    limit: Option<usize>,
) -> Option<JointIndexQuery> {
    if condition.is_unconstrained() || result == ElementCategory::Property {
        return None;
    }
    let clauses = condition.clauses();
    let schema = tx.schema();
    let mut candidates = Vec::new();

    for index in schema.composite_indexes(result) {
        let mut values = Vec::with_capacity(index.keys().len());
        let mut covered = Vec::new();
        for key in index.keys() {
            let found = (0..clauses.len()).find(|&i| {
                predicate_at(clauses, i).is_some_and(|p| p.is_equality() && p.key.id() == key.id())
            });
            match found.and_then(|i| predicate_at(clauses, i).map(|p| (i, p))) {
                Some((i, p)) => {
                    values.push(p.value.clone());
                    covered.push(i);
                }
                None => break,
            }
        }
        if values.len() != index.keys().len() {
            continue;
        }
        candidates.push(Candidate {
            subquery: IndexSubquery {
                index_name: index.name().to_string(),
                target: IndexTarget::Composite {
                    index: index.id(),
                    values,
                },
                element: result,
                limit: None,
            },
            covered,
            unique: index.is_unique(),
        });
    }

    for index in schema.mixed_indexes(result) {
        if tx.index_provider(index.backing()).is_none() {
            continue;
        }
        let mut conditions = Vec::new();
        let mut covered = Vec::new();
        for i in 0..clauses.len() {
            if let Some(p) = predicate_at(clauses, i).filter(|p| index.covers(p.key.id())) {
                conditions.push((p.key.name().to_string(), p.cmp, p.value.clone()));
                covered.push(i);
            }
        }
        if covered.is_empty() {
            continue;
        }
        candidates.push(Candidate {
            subquery: IndexSubquery {
                index_name: index.name().to_string(),
                target: IndexTarget::Mixed {
                    provider: index.backing().to_string(),
                    store: index.name().to_string(),
                    conditions,
                },
                element: result,
                limit: None,
            },
            covered,
            unique: false,
        });
    }

    candidates.sort_by(|a, b| {
        b.covered
            .len()
            .cmp(&a.covered.len())
            .then(b.unique.cmp(&a.unique))
    });
    let mut answered: HashSet<usize> = HashSet::new();
    let mut subqueries = Vec::new();
    for c in candidates {
        if c.covered.iter().all(|i| answered.contains(i)) {
            continue;
        }
        answered.extend(c.covered.iter().copied());
        subqueries.push(c.subquery);
    }
    if subqueries.is_empty() {
        return None;
    }
    let covers_condition = answered.len() == clauses.len();
    // Elements changed in this transaction are filtered after the index
    // call, so a pushed-down limit could cut off true matches.
    if subqueries.len() == 1 && covers_condition && !tx.has_modifications() {
        subqueries[0].limit = limit;
    }
    Some(JointIndexQuery {
        subqueries,
        covers_condition,
    })
}

/// Answers graph-centric queries for one transaction.
pub struct GraphCentricExecutor<'t> {
    tx: &'t Transaction,
}

impl<'t> GraphCentricExecutor<'t> {
    pub fn new(tx: &'t Transaction) -> Self {
        Self { tx }
    }

    fn keep_if_matches(&self, query: &GraphCentricQuery, element: Element) -> Result<Option<Element>> {
        Ok(query.matches(self.tx, &element)?.then_some(element))
    }

    fn new_vertices(&self, query: &GraphCentricQuery) -> Result<Vec<Element>> {
        let tx = self.tx;
        if query.condition.is_unconstrained() {
            return Ok(tx
                .vertex_cache
                .get_all_new()
                .into_iter()
                .map(Element::Vertex)
                .collect());
        }

        if let Some(p) = query.condition.single_equality() {
            if tx.schema().has_simple_vertex_index(p.key.id()) {
                let mut seen = HashSet::new();
                let mut results = Vec::new();
                for property in tx.new_vertex_index.get(&p.value, p.key.id()) {
                    let v = tx.internal_vertex(property.out_vertex())?;
                    if !v.is_removed() && seen.insert(v.id()) {
                        results.push(Element::Vertex(v));
                    }
                }
                return Ok(results);
            }
        }

        let keys: HashSet<_> = query.condition.keys().iter().map(|k| k.id()).collect();
        let touches = |r: &Relation| r.is_property() && keys.contains(&r.type_id());
        let mut owners: Vec<VertexId> = tx
            .added
            .get_view(&touches)
            .iter()
            .chain(tx.deleted.get_view(&touches).iter())
            .map(|r| r.out_vertex())
            .collect();
        let mut seen = HashSet::new();
        owners.retain(|id| seen.insert(*id));

        let mut results = Vec::new();
        for id in owners {
            let v = tx.internal_vertex(id)?;
            if v.is_removed() {
                continue;
            }
            if let Some(e) = self.keep_if_matches(query, Element::Vertex(v))? {
                results.push(e);
            }
        }
        Ok(results)
    }

    fn to_element(&self, id: &ElementId) -> Result<Option<Element>> {
        match id {
            ElementId::Vertex(vid) => Ok(Some(Element::Vertex(self.tx.internal_vertex(*vid)?))),
            ElementId::Relation(rid) => Ok(self.tx.find_relation(rid)?.map(Element::Relation)),
        }
    }

    /// Elements of one scanned vertex that match.
    fn scan_vertex(&self, query: &GraphCentricQuery, id: VertexId) -> Result<Vec<Element>> {
        let tx = self.tx;
        let v = tx.internal_vertex(id)?;
        if v.is_removed() {
            return Ok(Vec::new());
        }
        let candidates: Vec<Element> = match query.result {
            ElementCategory::Vertex => vec![Element::Vertex(v)],
            ElementCategory::Edge => tx
                .query(&v)
                .direction(Direction::Out)
                .edges()?
                .into_iter()
                .map(Element::Relation)
                .collect(),
            ElementCategory::Property => tx
                .query(&v)
                .properties()?
                .into_iter()
                .map(Element::Relation)
                .collect(),
        };
        let mut results = Vec::with_capacity(candidates.len());
        for e in candidates {
            if let Some(e) = self.keep_if_matches(query, e)? {
                results.push(e);
            }
        }
        Ok(results)
    }
}

impl QueryExecutor<GraphCentricQuery, Element, GraphBackendQuery> for GraphCentricExecutor<'_> {
    fn get_new(&self, query: &GraphCentricQuery) -> Result<Vec<Element>> {
        let tx = self.tx;
        if !tx.has_modifications() {
            return Ok(Vec::new());
        }
        match query.result {
            ElementCategory::Vertex => self.new_vertices(query),
            category => {
                let view = tx
                    .added
                    .get_view(&|r: &Relation| r.category() == category && !r.is_invisible());
                let mut results = Vec::new();
                for r in view {
                    if let Some(e) = self.keep_if_matches(query, Element::Relation(r))? {
                        results.push(e);
                    }
                }
                Ok(results)
            }
        }
    }

    fn has_deletions(&self, _query: &GraphCentricQuery) -> bool {
        self.tx.has_modifications()
    }

    fn is_deleted(&self, query: &GraphCentricQuery, element: &Element) -> Result<bool> {
        match element {
            Element::Vertex(v) => {
                if v.is_removed() {
                    return Ok(true);
                }
                if v.has_added_relations() || v.has_removed_relations() {
                    return Ok(!query.matches(self.tx, element)?);
                }
                Ok(false)
            }
            Element::Relation(r) => {
                if r.is_removed() || self.tx.deleted.contains(r.id()) {
                    return Ok(true);
                }
                if r.is_new() {
                    return Ok(!query.matches(self.tx, element)?);
                }
                Ok(false)
            }
        }
    }

    fn execute<'a>(
        &'a self,
        query: &'a GraphCentricQuery,
        backend_query: &'a GraphBackendQuery,
        profiler: &QueryProfiler,
    ) -> Result<ResultIter<'a, Element>> {
        let tx = self.tx;
        match backend_query {
            GraphBackendQuery::Indexed(joint) => {
                let names: Vec<&str> = joint.subqueries.iter().map(|q| q.index_name.as_str()).collect();
                profiler.annotate(INDEX_ANNOTATION, names.join(","));
                let ids = SubqueryIterator::new(tx, &joint.subqueries, profiler)?;
                let covers = joint.covers_condition;
                Ok(Box::new(ids.filter_map(move |id| {
                    let element = match id.and_then(|id| self.to_element(&id)) {
                        Ok(Some(e)) => e,
                        Ok(None) => return None,
                        Err(e) => return Some(Err(e)),
                    };
                    if covers || element.is_removed() {
                        return Some(Ok(element));
                    }
                    self.keep_if_matches(query, element).transpose()
                })))
            }
            GraphBackendQuery::FullScan => {
                if tx.config.force_index_usage {
                    return Err(SeshatError::FullScanDisabled(query.condition.to_string()));
                }
                warn!(
                    "Query requires iterating over all vertices [{}]. For better performance, use indexes",
                    query.condition
                );
                profiler.annotate(FULLSCAN_ANNOTATION, true);
                let ids = profiler.profile("scan", |_| tx.backend.scan_vertices().map_err(SeshatError::from))?;
                Ok(Box::new(ids.into_iter().flat_map(move |id| {
                    match self.scan_vertex(query, id) {
                        Ok(elements) => elements.into_iter().map(Ok).collect::<Vec<_>>(),
                        Err(e) => vec![Err(e)],
                    }
                })))
            }
        }
    }
}

enum Clause {
    Single(String, Cmp, Value),
    Any(String, Vec<Value>),
}

/// Fluent construction of a [`GraphCentricQuery`].
///
/// ```no_run
/// use seshat::prelude::*;
/// # fn run(tx: &Transaction) -> seshat::Result<()> {
/// let alice = tx.graph_query().has("name", Cmp::Equal, "alice").vertices()?;
/// let adults = tx
///     .graph_query()
///     .has("age", Cmp::GreaterThanEqual, 18)
///     .limit(10)
///     .vertices()?;
/// # Ok(())
/// # }
/// ```
pub struct GraphQueryBuilder<'t> {
    tx: &'t Transaction,
    clauses: Vec<Clause>,
    limit: Option<usize>,
    profiler: QueryProfiler,
}

impl<'t> GraphQueryBuilder<'t> {
    pub(crate) fn new(tx: &'t Transaction) -> Self {
        Self {
            tx,
            clauses: Vec::new(),
            limit: None,
            profiler: QueryProfiler::noop(),
        }
    }

    pub fn has(mut self, key: &str, cmp: Cmp, value: impl Into<Value>) -> Self {
        self.clauses.push(Clause::Single(key.to_string(), cmp, value.into()));
        self
    }

    /// Matches elements holding any of `values` under `key`.
    pub fn has_any(mut self, key: &str, values: Vec<Value>) -> Self {
        self.clauses.push(Clause::Any(key.to_string(), values));
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

    fn predicate(&self, name: &str, cmp: Cmp, value: &Value) -> Result<Option<Predicate>> {
        let Some(key) = self.tx.resolve_type(name).and_then(|t| t.as_key().cloned()) else {
            return Ok(None);
        };
        let value = value.convert(key.data_type()).ok_or_else(|| {
            SeshatError::InvalidArgument(format!(
                "Value {} is not compatible with key {} of type {:?}",
                value,
                key.name(),
                key.data_type()
            ))
        })?;
        Ok(Some(Predicate::new(key, cmp, value)))
    }

    /// Builds the query, or `None` when it can match nothing.
    pub fn build(&self, result: ElementCategory) -> Result<Option<GraphCentricQuery>> {
        let mut children = Vec::with_capacity(self.clauses.len());
        for clause in &self.clauses {
            match clause {
                Clause::Single(name, cmp, value) => match self.predicate(name, *cmp, value)? {
                    Some(p) => children.push(Condition::Predicate(p)),
                    None if *cmp == Cmp::NotEqual => {}
                    None => return Ok(None),
                },
                Clause::Any(name, values) => {
                    let mut any = Vec::with_capacity(values.len());
                    for value in values {
                        match self.predicate(name, Cmp::Equal, value)? {
                            Some(p) => any.push(Condition::Predicate(p)),
                            None => return Ok(None),
                        }
                    }
                    match any.len() {
                        0 => return Ok(None),
                        1 => children.extend(any),
                        _ => children.push(Condition::Or(any)),
                    }
                }
            }
        }
        let condition = Condition::And(children);
        let backend = match select_indexes(self.tx, result, &condition, self.limit) {
            Some(joint) => GraphBackendQuery::Indexed(joint),
            None => GraphBackendQuery::FullScan,
        };
        Ok(Some(GraphCentricQuery {
            result,
            condition,
            backend,
            limit: self.limit,
        }))
    }

    fn run(self, result: ElementCategory) -> Result<Vec<Element>> {
        let tx = self.tx;
        tx.verify_open()?;
        let Some(query) = self.build(result)? else {
            return Ok(Vec::new());
        };
        self.profiler.annotate(CONDITION_ANNOTATION, &query.condition);
        let executor = GraphCentricExecutor::new(tx);
        let backend = [query.backend.clone()];
        QueryProcessor::new(&executor, &query, query.limit).run(&backend, &self.profiler)
    }

    pub fn vertices(self) -> Result<Vec<Arc<Vertex>>> {
        Ok(self
            .run(ElementCategory::Vertex)?
            .into_iter()
            .filter_map(|e| e.as_vertex().cloned())
            .collect())
    }

    pub fn edges(self) -> Result<Vec<Arc<Relation>>> {
        Ok(self
            .run(ElementCategory::Edge)?
            .into_iter()
            .filter_map(|e| e.as_relation().cloned())
            .collect())
    }

    pub fn properties(self) -> Result<Vec<Arc<Relation>>> {
        Ok(self
            .run(ElementCategory::Property)?
            .into_iter()
            .filter_map(|e| e.as_relation().cloned())
            .collect())
    }
}
