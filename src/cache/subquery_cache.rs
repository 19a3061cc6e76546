use std::sync::Arc;

use dashmap::DashMap;
use log::trace;
use lru::LruCache;
use parking_lot::Mutex;

use crate::element::ElementId;
use crate::errors::Result;
use crate::storage::IndexSubquery;

pub type SubqueryResult = Arc<Vec<ElementId>>;

struct WeightedEntries {
    entries: LruCache<IndexSubquery, SubqueryResult>,
    weight: usize,
}

fn weight_of(ids: &[ElementId]) -> usize {
    ids.len().max(1)
}

/// Cache of index subquery results, bounded by the total number of cached ids.
///
/// Concurrent misses on the same subquery are collapsed: one caller runs the
/// backend query, the others wait for and share its result.
pub struct SubqueryCache {
    max_weight: usize,
    inner: Mutex<WeightedEntries>,
    in_flight: DashMap<IndexSubquery, Arc<Mutex<Option<SubqueryResult>>>>,
}

impl SubqueryCache {
    pub fn new(max_weight: usize) -> Self {
        Self {
            max_weight,
            inner: Mutex::new(WeightedEntries {
                entries: LruCache::unbounded(),
                weight: 0,
            }),
            in_flight: DashMap::new(),
        }
    }

    pub fn get_if_present(&self, query: &IndexSubquery) -> Option<SubqueryResult> {
        self.inner.lock().entries.get(query).cloned()
    }

    /// Returns the cached result, running `compute` on a miss.
    pub fn get(
        &self,
        query: &IndexSubquery,
        compute: impl FnOnce() -> Result<Vec<ElementId>>,
    ) -> Result<SubqueryResult> {
        if let Some(hit) = self.get_if_present(query) {
            return Ok(hit);
        }
        let slot = self
            .in_flight
            .entry(query.clone())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone();
        let mut done = slot.lock();
        if let Some(result) = done.as_ref() {
            return Ok(Arc::clone(result));
        }
        if let Some(hit) = self.get_if_present(query) {
            return Ok(hit);
        }
        trace!("Subquery cache miss: {}", query);
        let computed = compute();
        let outcome = computed.map(|ids| {
            let ids = Arc::new(ids);
            self.put(query.clone(), Arc::clone(&ids));
            *done = Some(Arc::clone(&ids));
            ids
        });
        drop(done);
        self.in_flight.remove(query);
        outcome
    }

    /// Caches `ids` for `query`. A result heavier than the whole budget is not kept.
    pub fn put(&self, query: IndexSubquery, ids: SubqueryResult) {
        let weight = weight_of(&ids);
        if weight > self.max_weight {
            return;
        }
        let mut inner = self.inner.lock();
        if let Some(old) = inner.entries.put(query, ids) {
            inner.weight -= weight_of(&old);
        }
        inner.weight += weight;
        while inner.weight > self.max_weight {
            match inner.entries.pop_lru() {
                Some((_, evicted)) => inner.weight -= weight_of(&evicted),
                None => break,
            }
        }
    }

    pub fn weight(&self) -> usize {
        self.inner.lock().weight
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.weight = 0;
        self.in_flight.clear();
    }
}
