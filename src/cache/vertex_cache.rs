use std::num::NonZeroUsize;
use std::sync::Arc;

use dashmap::DashMap;
use log::trace;
use lru::LruCache;
use parking_lot::Mutex;

use crate::element::Vertex;
use crate::errors::Result;
use crate::ids::VertexId;

const CONCURRENT_STRIPES: usize = 16;

/// Transaction-local vertex cache.
///
/// Clean vertices live in a bounded LRU and may be evicted. Dirty vertices
/// (new, or carrying added or removed relations) are pinned in a separate
/// map and are never evicted, so no pending edit is lost.
pub struct VertexCache {
    cache: Mutex<LruCache<VertexId, Arc<Vertex>>>,
    volatile: DashMap<VertexId, Arc<Vertex>>,
    /// Serializes construction of the same id so a vertex is built once.
    stripes: Box<[Mutex<()>]>,
}

impl VertexCache {
    pub fn new(capacity: usize, dirty_size: usize, single_threaded: bool) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        let stripes = if single_threaded { 1 } else { CONCURRENT_STRIPES };
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            volatile: DashMap::with_capacity(dirty_size),
            stripes: (0..stripes).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn contains(&self, id: VertexId) -> bool {
        self.volatile.contains_key(&id) || self.cache.lock().contains(&id)
    }

    fn lookup(&self, id: VertexId) -> Option<Arc<Vertex>> {
        if let Some(v) = self.volatile.get(&id) {
            return Some(Arc::clone(v.value()));
        }
        self.cache.lock().get(&id).cloned()
    }

    /// The cached instance for `id`, built with `retriever` on first access.
    pub fn get(
        &self,
        id: VertexId,
        retriever: impl FnOnce(VertexId) -> Result<Arc<Vertex>>,
    ) -> Result<Arc<Vertex>> {
        if let Some(v) = self.lookup(id) {
            return Ok(v);
        }
        let stripe = &self.stripes[(id.unsigned_abs() as usize) % self.stripes.len()];
        let _guard = stripe.lock();
        if let Some(v) = self.lookup(id) {
            return Ok(v);
        }
        let vertex = retriever(id)?;
        self.insert(id, Arc::clone(&vertex));
        Ok(vertex)
    }

    /// Registers `vertex` under `id`, pinning it if it is dirty.
    pub fn add(&self, vertex: Arc<Vertex>, id: VertexId) {
        if vertex.is_dirty() {
            self.volatile.insert(id, Arc::clone(&vertex));
        }
        self.insert(id, vertex);
    }

    fn insert(&self, id: VertexId, vertex: Arc<Vertex>) {
        let evicted = self.cache.lock().push(id, vertex);
        if let Some((evicted_id, evicted)) = evicted {
            if evicted_id != id && evicted.is_dirty() {
                trace!("Pinning dirty vertex {} evicted from cache", evicted_id);
                self.volatile.insert(evicted_id, evicted);
            }
        }
    }

    /// Every vertex created in this transaction and not removed since.
    pub fn get_all_new(&self) -> Vec<Arc<Vertex>> {
        let mut vertices: Vec<Arc<Vertex>> = self
            .volatile
            .iter()
            .filter(|e| e.value().is_new())
            .map(|e| Arc::clone(e.value()))
            .collect();
        vertices.sort_by_key(|v| std::cmp::Reverse(v.id()));
        vertices
    }

    pub fn len(&self) -> usize {
        let cache = self.cache.lock();
        cache.len()
            + self
                .volatile
                .iter()
                .filter(|e| !cache.contains(e.key()))
                .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of vertices that can never be evicted.
    pub fn pinned(&self) -> usize {
        self.volatile.len()
    }

    pub fn close(&self) {
        for entry in self.volatile.iter() {
            entry.value().release();
        }
        for (_, v) in self.cache.lock().iter() {
            v.release();
        }
        self.volatile.clear();
        self.cache.lock().clear();
    }
}
