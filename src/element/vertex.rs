use std::fmt;
use std::sync::{Arc, OnceLock};
use std::sync::atomic::{AtomicI64, Ordering};

use ahash::AHashMap as HashMap;
use parking_lot::RwLock;

use crate::element::{Lifecycle, LazyRelation, Relation};
use crate::errors::Result;
use crate::ids::{RelationId, VertexId};
use crate::schema::VertexLabel;
use crate::storage::{Entry, SliceQuery};

#[derive(Debug)]
struct VertexState {
    lifecycle: Lifecycle,
    /// Relations added in this transaction that are incident on the vertex.
    added: Vec<Arc<Relation>>,
    has_removed: bool,
    /// Backend slices already read for this vertex.
    slices: HashMap<SliceQuery, Arc<[LazyRelation]>>,
    /// One decoded instance per loaded relation id.
    materialized: HashMap<RelationId, Arc<Relation>>,
}

/// A vertex as seen by one transaction.
///
/// The vertex cache hands out exactly one instance per id, so identity
/// comparisons between `Arc<Vertex>` values are meaningful.
pub struct Vertex {
    id: AtomicI64,
    tx_id: u64,
    label: OnceLock<Arc<VertexLabel>>,
    state: RwLock<VertexState>,
}

impl Vertex {
    pub(crate) fn new(id: VertexId, tx_id: u64, lifecycle: Lifecycle) -> Self {
        Self {
            id: AtomicI64::new(id),
            tx_id,
            label: OnceLock::new(),
            state: RwLock::new(VertexState {
                lifecycle,
                added: Vec::new(),
                has_removed: false,
                slices: HashMap::new(),
                materialized: HashMap::new(),
            }),
        }
    }

    pub fn id(&self) -> VertexId {
        self.id.load(Ordering::Acquire)
    }

    pub(crate) fn set_id(&self, id: VertexId) {
        self.id.store(id, Ordering::Release);
    }

    /// Id of the transaction this instance belongs to.
    pub fn tx_id(&self) -> u64 {
        self.tx_id
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.state.read().lifecycle
    }

    pub fn is_new(&self) -> bool {
        self.lifecycle() == Lifecycle::New
    }

    pub fn is_loaded(&self) -> bool {
        self.lifecycle() == Lifecycle::Loaded
    }

    pub fn is_removed(&self) -> bool {
        self.lifecycle() == Lifecycle::Removed
    }

    /// New, or loaded with pending edits.
    pub fn is_dirty(&self) -> bool {
        let state = self.state.read();
        state.lifecycle == Lifecycle::New
            || state.lifecycle == Lifecycle::Modified
            || !state.added.is_empty()
            || state.has_removed
    }

    pub fn label(&self) -> Option<&Arc<VertexLabel>> {
        self.label.get()
    }

    pub(crate) fn set_label(&self, label: Arc<VertexLabel>) -> &Arc<VertexLabel> {
        self.label.get_or_init(|| label)
    }

    /// Links `relation` into this vertex. Fails once the vertex is removed.
    pub(crate) fn add_relation(&self, relation: Arc<Relation>) -> bool {
        let mut state = self.state.write();
        if state.lifecycle == Lifecycle::Removed {
            return false;
        }
        if state.lifecycle == Lifecycle::Loaded {
            state.lifecycle = Lifecycle::Modified;
        }
        state.added.push(relation);
        true
    }

    pub(crate) fn remove_relation(&self, relation: &Relation) {
        let mut state = self.state.write();
        if relation.is_new() {
            let id = relation.id();
            state.added.retain(|r| r.id() != id);
        } else {
            state.has_removed = true;
            if state.lifecycle == Lifecycle::Loaded {
                state.lifecycle = Lifecycle::Modified;
            }
        }
    }

    pub fn has_added_relations(&self) -> bool {
        !self.state.read().added.is_empty()
    }

    pub fn has_removed_relations(&self) -> bool {
        self.state.read().has_removed
    }

    /// Snapshot of added relations accepted by `filter`.
    pub fn added_relations(&self, filter: impl Fn(&Relation) -> bool) -> Vec<Arc<Relation>> {
        self.state
            .read()
            .added
            .iter()
            .filter(|r| filter(r))
            .cloned()
            .collect()
    }

    pub(crate) fn mark_removed(&self) {
        let mut state = self.state.write();
        state.lifecycle = Lifecycle::Removed;
        state.slices.clear();
    }

    /// Marks a retrieved vertex as missing from storage.
    pub(crate) fn mark_missing(&self) {
        self.state.write().lifecycle = Lifecycle::Removed;
    }

    pub fn has_loaded_slice(&self, slice: &SliceQuery) -> bool {
        self.state.read().slices.contains_key(slice)
    }

    /// Returns the cached slice, reading it with `loader` on first use.
    /// New vertices have nothing in storage and always yield an empty slice.
    pub fn load_relations(
        &self,
        slice: &SliceQuery,
        loader: impl FnOnce(&SliceQuery) -> Result<Vec<Entry>>,
    ) -> Result<Arc<[LazyRelation]>> {
        {
            let state = self.state.read();
            if state.lifecycle == Lifecycle::New {
                return Ok(Arc::from(Vec::new()));
            }
            if let Some(cached) = state.slices.get(slice) {
                return Ok(Arc::clone(cached));
            }
        }
        let entries = loader(slice)?;
        Ok(self.seed_slice(slice.clone(), entries))
    }

    /// Stores a slice fetched elsewhere. An already cached slice wins.
    pub(crate) fn seed_slice(&self, slice: SliceQuery, entries: Vec<Entry>) -> Arc<[LazyRelation]> {
        let lazy: Arc<[LazyRelation]> = entries.into_iter().map(LazyRelation::new).collect();
        let mut state = self.state.write();
        Arc::clone(state.slices.entry(slice).or_insert(lazy))
    }

    /// Returns the instance already decoded for this relation id, or
    /// registers `relation` as that instance.
    pub(crate) fn canonical_loaded(&self, relation: Arc<Relation>) -> Arc<Relation> {
        let mut state = self.state.write();
        Arc::clone(state.materialized.entry(relation.id()).or_insert(relation))
    }

    /// Drops cached slices and added relations. Used when the transaction closes.
    pub(crate) fn release(&self) {
        let mut state = self.state.write();
        state.slices.clear();
        state.materialized.clear();
        state.added.clear();
    }
}

impl fmt::Debug for Vertex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vertex")
            .field("id", &self.id())
            .field("tx_id", &self.tx_id)
            .field("lifecycle", &self.lifecycle())
            .finish()
    }
}

impl PartialEq for Vertex {
    fn eq(&self, other: &Self) -> bool {
        self.tx_id == other.tx_id && self.id() == other.id()
    }
}

impl Eq for Vertex {}
