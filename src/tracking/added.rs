use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::element::Relation;
use crate::ids::RelationId;

/// Relations created in this transaction. Never evicted; they are handed to
/// the commit routine as a whole.
pub trait AddedRelations: Send + Sync {
    fn add(&self, relation: Arc<Relation>) -> bool;

    fn remove(&self, relation: &Relation) -> bool;

    fn contains(&self, id: RelationId) -> bool;

    fn is_empty(&self) -> bool;

    fn len(&self) -> usize;

    fn get_all(&self) -> Vec<Arc<Relation>>;

    /// Snapshot of the relations accepted by `filter`.
    fn get_view(&self, filter: &dyn Fn(&Relation) -> bool) -> Vec<Arc<Relation>>;

    fn clear(&self);
}

pub fn added_relations(single_threaded: bool) -> Box<dyn AddedRelations> {
    if single_threaded {
        Box::new(SimpleAddedRelations::default())
    } else {
        Box::new(ConcurrentAddedRelations::default())
    }
}

/// Insertion-ordered buffer for transactions used from one thread.
#[derive(Default)]
pub struct SimpleAddedRelations {
    relations: Mutex<Vec<Arc<Relation>>>,
}

impl AddedRelations for SimpleAddedRelations {
    fn add(&self, relation: Arc<Relation>) -> bool {
        self.relations.lock().push(relation);
        true
    }

    fn remove(&self, relation: &Relation) -> bool {
        let id = relation.id();
        let mut relations = self.relations.lock();
        let before = relations.len();
        relations.retain(|r| r.id() != id);
        relations.len() != before
    }

    fn contains(&self, id: RelationId) -> bool {
        self.relations.lock().iter().any(|r| r.id() == id)
    }

    fn is_empty(&self) -> bool {
        self.relations.lock().is_empty()
    }

    fn len(&self) -> usize {
        self.relations.lock().len()
    }

    fn get_all(&self) -> Vec<Arc<Relation>> {
        self.relations.lock().clone()
    }

    fn get_view(&self, filter: &dyn Fn(&Relation) -> bool) -> Vec<Arc<Relation>> {
        self.relations
            .lock()
            .iter()
            .filter(|r| filter(r))
            .cloned()
            .collect()
    }

    fn clear(&self) {
        self.relations.lock().clear();
    }
}

/// Sharded map for transactions shared between threads.
#[derive(Default)]
pub struct ConcurrentAddedRelations {
    relations: DashMap<RelationId, Arc<Relation>>,
}

impl AddedRelations for ConcurrentAddedRelations {
    fn add(&self, relation: Arc<Relation>) -> bool {
        self.relations.insert(relation.id(), relation).is_none()
    }

    fn remove(&self, relation: &Relation) -> bool {
        self.relations.remove(&relation.id()).is_some()
    }

    fn contains(&self, id: RelationId) -> bool {
        self.relations.contains_key(&id)
    }

    fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    fn len(&self) -> usize {
        self.relations.len()
    }

    fn get_all(&self) -> Vec<Arc<Relation>> {
        self.relations.iter().map(|e| Arc::clone(e.value())).collect()
    }

    fn get_view(&self, filter: &dyn Fn(&Relation) -> bool) -> Vec<Arc<Relation>> {
        self.relations
            .iter()
            .filter(|e| filter(e.value()))
            .map(|e| Arc::clone(e.value()))
            .collect()
    }

    fn clear(&self) {
        self.relations.clear();
    }
}
