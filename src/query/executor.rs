//! Merging of persisted and in-transaction query results.
//!
//! A query answer is the backend result minus everything the transaction
//! deleted or displaced, plus everything the transaction added that matches,
//! each element reported once.

use std::sync::Arc;

use ahash::AHashSet as HashSet;

use crate::element::{Element, ElementId, Relation};
use crate::errors::Result;
use crate::query::profile::QueryProfiler;

pub type ResultIter<'a, R> = Box<dyn Iterator<Item = Result<R>> + 'a>;

/// Identity under which query results are deduplicated.
pub trait QueryResult: Clone {
    fn result_id(&self) -> ElementId;
}

impl QueryResult for Arc<Relation> {
    fn result_id(&self) -> ElementId {
        ElementId::Relation(self.identifier())
    }
}

impl QueryResult for Element {
    fn result_id(&self) -> ElementId {
        self.id()
    }
}

/// Executes one kind of query against the transaction state (`Q`) and the
/// backend (`B`).
pub trait QueryExecutor<Q, R, B> {
    /// Matching results that exist only in this transaction.
    fn get_new(&self, query: &Q) -> Result<Vec<R>>;

    /// Whether any backend result may have to be filtered out.
    fn has_deletions(&self, query: &Q) -> bool;

    /// Whether a backend result was deleted or displaced in this transaction.
    fn is_deleted(&self, query: &Q, result: &R) -> Result<bool>;

    fn execute<'a>(&'a self, query: &'a Q, backend_query: &'a B, profiler: &QueryProfiler) -> Result<ResultIter<'a, R>>;
}

/// Runs a query through an executor and merges the two result sources.
pub struct QueryProcessor<'a, Q, R, B> {
    executor: &'a dyn QueryExecutor<Q, R, B>,
    query: &'a Q,
    limit: Option<usize>,
}

impl<'a, Q, R: QueryResult, B> QueryProcessor<'a, Q, R, B> {
    pub fn new(executor: &'a dyn QueryExecutor<Q, R, B>, query: &'a Q, limit: Option<usize>) -> Self {
        Self {
            executor,
            query,
            limit,
        }
    }

    /// New results first, then backend results of every backend query in order.
    pub fn run(&self, backend_queries: &'a [B], profiler: &QueryProfiler) -> Result<Vec<R>> {
        let limit = self.limit.unwrap_or(usize::MAX);
        let mut results = Vec::new();
        if limit == 0 {
            return Ok(results);
        }
        let mut new_ids: HashSet<ElementId> = HashSet::new();
        for r in self.executor.get_new(self.query)? {
            new_ids.insert(r.result_id());
            results.push(r);
            if results.len() >= limit {
                profiler.set_result_size(results.len());
                return Ok(results);
            }
        }

        let check_deletions = self.executor.has_deletions(self.query);
        'queries: for backend_query in backend_queries {
            for r in self.executor.execute(self.query, backend_query, profiler)? {
                let r = r?;
                if new_ids.contains(&r.result_id()) {
                    continue;
                }
                if check_deletions && self.executor.is_deleted(self.query, &r)? {
                    continue;
                }
                results.push(r);
                if results.len() >= limit {
                    break 'queries;
                }
            }
        }
        profiler.set_result_size(results.len());
        Ok(results)
    }
}
