//! Conjunctive intersection of index subqueries.

use ahash::AHashSet as HashSet;

use crate::cache::SubqueryResult;
use crate::element::ElementId;
use crate::errors::{Result, SeshatError};
use crate::query::profile::QueryProfiler;
use crate::storage::{IndexSubquery, IndexTarget};
use crate::transaction::Transaction;

/// Runs one subquery against its index, bypassing the cache.
pub(crate) fn run_subquery(tx: &Transaction, query: &IndexSubquery, profiler: &QueryProfiler) -> Result<Vec<ElementId>> {
    profiler.profile(&query.index_name, |p| {
        p.annotate(crate::query::profile::QUERY_ANNOTATION, query);
        let result = match &query.target {
            IndexTarget::Composite { .. } => tx.backend.index_query(query),
            IndexTarget::Mixed { provider, .. } => match tx.index_provider(provider) {
                Some(provider) => provider.query(query),
                None => {
                    return Err(SeshatError::InvalidState(format!(
                        "No index provider registered under {}",
                        provider
                    )));
                }
            },
        };
        let ids = result.map_err(|source| SeshatError::IndexQuery {
            index: query.index_name.clone(),
            source,
        })?;
        p.set_result_size(ids.len());
        Ok(ids)
    })
}

enum Source {
    Pending,
    Cached(SubqueryResult, usize),
    /// Results of a backend call; cached once fully consumed.
    Streaming {
        ids: std::vec::IntoIter<ElementId>,
        seen: Vec<ElementId>,
    },
    Done,
}

/// Streams the first subquery and keeps only ids present in the results
/// of every other subquery.
///
/// The other subqueries are materialized through the subquery cache without
/// their limit, so that no true match is cut off before the intersection.
pub struct SubqueryIterator<'t> {
    tx: &'t Transaction,
    first: IndexSubquery,
    filters: Vec<HashSet<ElementId>>,
    emitted: HashSet<ElementId>,
    source: Source,
    profiler: QueryProfiler,
}

impl<'t> SubqueryIterator<'t> {
    pub fn new(tx: &'t Transaction, subqueries: &[IndexSubquery], profiler: &QueryProfiler) -> Result<Self> {
        let Some((first, rest)) = subqueries.split_first() else {
            return Err(SeshatError::InvalidArgument(
                "An index query needs at least one subquery".to_string(),
            ));
        };
        let mut filters = Vec::with_capacity(rest.len());
        for q in rest {
            let q = q.with_limit(None);
            let ids = tx
                .subquery_cache
                .get(&q, || run_subquery(tx, &q, profiler))?;
            filters.push(ids.iter().cloned().collect::<HashSet<_>>());
        }
        let first = if rest.is_empty() {
            first.clone()
        } else {
            first.with_limit(None)
        };
        Ok(Self {
            tx,
            first,
            filters,
            emitted: HashSet::new(),
            source: Source::Pending,
            profiler: profiler.clone(),
        })
    }

    fn pull(&mut self) -> Option<Result<ElementId>> {
        loop {
            match &mut self.source {
                Source::Pending => {
                    self.source = match self.tx.subquery_cache.get_if_present(&self.first) {
                        Some(hit) => Source::Cached(hit, 0),
                        None => match run_subquery(self.tx, &self.first, &self.profiler) {
                            Ok(ids) => Source::Streaming {
                                ids: ids.into_iter(),
                                seen: Vec::new(),
                            },
                            Err(e) => {
                                self.source = Source::Done;
                                return Some(Err(e));
                            }
                        },
                    };
                }
                Source::Cached(ids, pos) => {
                    let next = ids.get(*pos).cloned();
                    *pos += 1;
                    if next.is_none() {
                        self.source = Source::Done;
                    }
                    return next.map(Ok);
                }
                Source::Streaming { ids, seen } => match ids.next() {
                    Some(id) => {
                        seen.push(id.clone());
                        return Some(Ok(id));
                    }
                    None => {
                        let complete = std::mem::take(seen);
                        self.tx
                            .subquery_cache
                            .put(self.first.clone(), std::sync::Arc::new(complete));
                        self.source = Source::Done;
                    }
                },
                Source::Done => return None,
            }
        }
    }
}

impl Iterator for SubqueryIterator<'_> {
    type Item = Result<ElementId>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let id = match self.pull()? {
                Ok(id) => id,
                Err(e) => return Some(Err(e)),
            };
            if self.filters.iter().all(|f| f.contains(&id)) && self.emitted.insert(id.clone()) {
                return Some(Ok(id));
            }
        }
    }
}
