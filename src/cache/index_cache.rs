use std::sync::Arc;

use ahash::AHashMap as HashMap;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::element::Relation;
use crate::ids::TypeId;
use crate::value::Value;

type IndexKey = (TypeId, Value);

/// Inverted index over properties added in this transaction whose key has
/// a simple vertex index. Never evicts: it is how graph queries see new
/// indexed values before commit.
pub trait NewVertexIndexCache: Send + Sync {
    fn add(&self, property: Arc<Relation>);

    fn remove(&self, property: &Relation);

    /// New properties of `key` holding `value`.
    fn get(&self, value: &Value, key: TypeId) -> Vec<Arc<Relation>>;

    fn is_empty(&self) -> bool;

    fn clear(&self);
}

pub fn new_vertex_index_cache(single_threaded: bool) -> Box<dyn NewVertexIndexCache> {
    if single_threaded {
        Box::new(SimpleIndexCache::default())
    } else {
        Box::new(ConcurrentIndexCache::default())
    }
}

fn index_key(property: &Relation) -> Option<IndexKey> {
    property.value().map(|v| (property.type_id(), v.clone()))
}

#[derive(Default)]
pub struct SimpleIndexCache {
    map: Mutex<HashMap<IndexKey, Vec<Arc<Relation>>>>,
}

impl NewVertexIndexCache for SimpleIndexCache {
    fn add(&self, property: Arc<Relation>) {
        if let Some(key) = index_key(&property) {
            self.map.lock().entry(key).or_default().push(property);
        }
    }

    fn remove(&self, property: &Relation) {
        let Some(key) = index_key(property) else {
            return;
        };
        let id = property.id();
        let mut map = self.map.lock();
        if let Some(bucket) = map.get_mut(&key) {
            bucket.retain(|p| p.id() != id);
            if bucket.is_empty() {
                map.remove(&key);
            }
        }
    }

    fn get(&self, value: &Value, key: TypeId) -> Vec<Arc<Relation>> {
        self.map
            .lock()
            .get(&(key, value.clone()))
            .cloned()
            .unwrap_or_default()
    }

    fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }

    fn clear(&self) {
        self.map.lock().clear();
    }
}

#[derive(Default)]
pub struct ConcurrentIndexCache {
    map: DashMap<IndexKey, Vec<Arc<Relation>>>,
}

impl NewVertexIndexCache for ConcurrentIndexCache {
    fn add(&self, property: Arc<Relation>) {
        if let Some(key) = index_key(&property) {
            self.map.entry(key).or_default().push(property);
        }
    }

    fn remove(&self, property: &Relation) {
        let Some(key) = index_key(property) else {
            return;
        };
        let id = property.id();
        if let Some(mut bucket) = self.map.get_mut(&key) {
            bucket.retain(|p| p.id() != id);
        }
        self.map.remove_if(&key, |_, bucket| bucket.is_empty());
    }

    fn get(&self, value: &Value, key: TypeId) -> Vec<Arc<Relation>> {
        self.map
            .get(&(key, value.clone()))
            .map(|bucket| bucket.value().clone())
            .unwrap_or_default()
    }

    fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn clear(&self) {
        self.map.clear();
    }
}
