use std::sync::{Arc, OnceLock};

use ahash::AHashMap as HashMap;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::element::Relation;
use crate::ids::RelationId;

enum DeletedMap {
    Simple(Mutex<HashMap<RelationId, Arc<Relation>>>),
    Concurrent(DashMap<RelationId, Arc<Relation>>),
}

/// Loaded relations deleted in this transaction, keyed by id.
///
/// The map is only allocated on the first deletion; until then every lookup
/// answers from the empty state.
pub struct DeletedRelations {
    single_threaded: bool,
    map: OnceLock<DeletedMap>,
}

impl DeletedRelations {
    pub fn new(single_threaded: bool) -> Self {
        Self {
            single_threaded,
            map: OnceLock::new(),
        }
    }

    pub fn is_allocated(&self) -> bool {
        self.map.get().is_some()
    }

    pub fn put(&self, relation: Arc<Relation>) {
        let map = self.map.get_or_init(|| {
            if self.single_threaded {
                DeletedMap::Simple(Mutex::new(HashMap::new()))
            } else {
                DeletedMap::Concurrent(DashMap::new())
            }
        });
        match map {
            DeletedMap::Simple(m) => {
                m.lock().insert(relation.id(), relation);
            }
            DeletedMap::Concurrent(m) => {
                m.insert(relation.id(), relation);
            }
        }
    }

    pub fn contains(&self, id: RelationId) -> bool {
        match self.map.get() {
            None => false,
            Some(DeletedMap::Simple(m)) => m.lock().contains_key(&id),
            Some(DeletedMap::Concurrent(m)) => m.contains_key(&id),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        match self.map.get() {
            None => 0,
            Some(DeletedMap::Simple(m)) => m.lock().len(),
            Some(DeletedMap::Concurrent(m)) => m.len(),
        }
    }

    pub fn values(&self) -> Vec<Arc<Relation>> {
        self.get_view(&|_| true)
    }

    pub fn get_view(&self, filter: &dyn Fn(&Relation) -> bool) -> Vec<Arc<Relation>> {
        match self.map.get() {
            None => Vec::new(),
            Some(DeletedMap::Simple(m)) => m.lock().values().filter(|r| filter(r)).cloned().collect(),
            Some(DeletedMap::Concurrent(m)) => m
                .iter()
                .filter(|e| filter(e.value()))
                .map(|e| Arc::clone(e.value()))
                .collect(),
        }
    }

    pub fn clear(&self) {
        match self.map.get() {
            None => {}
            Some(DeletedMap::Simple(m)) => m.lock().clear(),
            Some(DeletedMap::Concurrent(m)) => m.clear(),
        }
    }
}
