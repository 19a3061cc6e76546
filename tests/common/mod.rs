//! Common utilities for Seshat integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Barrier};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use ahash::AHashMap as HashMap;
use parking_lot::{Mutex, RwLock};

use seshat::errors::{BackendError, BackendResult};
use seshat::ids::{TypeId, VertexId};
use seshat::prelude::*;
use seshat::storage::{
    Backend, BackendTransaction, Entry, EntryList, IndexEntryMutation, IndexProvider, IndexSubquery, IndexTarget,
    KeyInformation, SliceQuery, StorageMutation,
};

// --- MemoryBackend ---

/// Parks the next caller of a backend operation until the test releases it.
#[derive(Clone, Default)]
pub struct Gate(Arc<Mutex<Option<Arc<Barrier>>>>);

impl Gate {
    /// Arms the gate. The test waits on the returned barrier twice: once to
    /// learn that a caller arrived, once to let it continue.
    pub fn arm(&self) -> Arc<Barrier> {
        let barrier = Arc::new(Barrier::new(2));
        *self.0.lock() = Some(Arc::clone(&barrier));
        barrier
    }

    fn pass(&self) {
        let barrier = self.0.lock().take();
        if let Some(barrier) = barrier {
            barrier.wait();
            barrier.wait();
        }
    }
}

#[derive(Default)]
struct StoreData {
    rows: BTreeMap<VertexId, BTreeMap<Vec<u8>, Vec<u8>>>,
    index: HashMap<(TypeId, Vec<Value>), Vec<ElementId>>,
}

/// An in-memory key-column-value store. Committed mutations become visible
/// to every open transaction at once.
#[derive(Default)]
pub struct MemoryBackend {
    data: Arc<RwLock<StoreData>>,
    fail_commit: Arc<AtomicBool>,
    fail_rollback: Arc<AtomicBool>,
    edge_queries: Arc<AtomicUsize>,
    multi_queries: Arc<AtomicUsize>,
    commits: Arc<AtomicUsize>,
    index_queries: Arc<Mutex<HashMap<String, usize>>>,
    read_gate: Gate,
    commit_gate: Gate,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following backend commit fail.
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commit.store(fail, Ordering::SeqCst);
    }

    pub fn fail_rollbacks(&self, fail: bool) {
        self.fail_rollback.store(fail, Ordering::SeqCst);
    }

    pub fn edge_queries(&self) -> usize {
        self.edge_queries.load(Ordering::SeqCst)
    }

    pub fn multi_queries(&self) -> usize {
        self.multi_queries.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Number of composite index calls made against `index`.
    pub fn index_queries(&self, index: &str) -> usize {
        self.index_queries.lock().get(index).copied().unwrap_or(0)
    }

    /// Parks the next slice read.
    pub fn gate_reads(&self) -> Arc<Barrier> {
        self.read_gate.arm()
    }

    /// Parks the next commit before it applies anything.
    pub fn gate_commit(&self) -> Arc<Barrier> {
        self.commit_gate.arm()
    }

    /// Number of columns stored for `vertex`.
    pub fn row_len(&self, vertex: VertexId) -> usize {
        self.data.read().rows.get(&vertex).map_or(0, |r| r.len())
    }

    pub fn vertex_count(&self) -> usize {
        self.data.read().rows.values().filter(|r| !r.is_empty()).count()
    }

    /// Elements stored under a composite index record.
    pub fn index_record(&self, index: TypeId, values: Vec<Value>) -> Vec<ElementId> {
        self.data
            .read()
            .index
            .get(&(index, values))
            .cloned()
            .unwrap_or_default()
    }
}

impl Backend for MemoryBackend {
    fn begin_transaction(&self, _config: &TransactionConfig) -> BackendResult<Box<dyn BackendTransaction>> {
        Ok(Box::new(MemoryTransaction {
            data: Arc::clone(&self.data),
            staged: Mutex::new(Vec::new()),
            fail_commit: Arc::clone(&self.fail_commit),
            fail_rollback: Arc::clone(&self.fail_rollback),
            edge_queries: Arc::clone(&self.edge_queries),
            multi_queries: Arc::clone(&self.multi_queries),
            commits: Arc::clone(&self.commits),
            index_queries: Arc::clone(&self.index_queries),
            read_gate: self.read_gate.clone(),
            commit_gate: self.commit_gate.clone(),
        }))
    }
}

pub struct MemoryTransaction {
    data: Arc<RwLock<StoreData>>,
    staged: Mutex<Vec<StorageMutation>>,
    fail_commit: Arc<AtomicBool>,
    fail_rollback: Arc<AtomicBool>,
    edge_queries: Arc<AtomicUsize>,
    multi_queries: Arc<AtomicUsize>,
    commits: Arc<AtomicUsize>,
    index_queries: Arc<Mutex<HashMap<String, usize>>>,
    read_gate: Gate,
    commit_gate: Gate,
}

fn read_slice(data: &StoreData, vertex: VertexId, slice: &SliceQuery) -> EntryList {
    let Some(row) = data.rows.get(&vertex) else {
        return Vec::new();
    };
    let entries = row
        .range(slice.start.clone()..slice.end.clone())
        .map(|(c, v)| Entry::new(c.clone(), v.clone()));
    match slice.limit {
        Some(limit) => entries.take(limit).collect(),
        None => entries.collect(),
    }
}

impl BackendTransaction for MemoryTransaction {
    fn edge_query(&self, vertex: VertexId, slice: &SliceQuery) -> BackendResult<EntryList> {
        self.edge_queries.fetch_add(1, Ordering::SeqCst);
        self.read_gate.pass();
        Ok(read_slice(&self.data.read(), vertex, slice))
    }

    fn edge_multi_query(
        &self,
        vertices: &[VertexId],
        slice: &SliceQuery,
    ) -> BackendResult<HashMap<VertexId, EntryList>> {
        self.multi_queries.fetch_add(1, Ordering::SeqCst);
        let data = self.data.read();
        Ok(vertices
            .iter()
            .map(|v| (*v, read_slice(&data, *v, slice)))
            .collect())
    }

    fn index_query(&self, query: &IndexSubquery) -> BackendResult<Vec<ElementId>> {
        let IndexTarget::Composite { index, values } = &query.target else {
            return Err(BackendError::Permanent(format!(
                "{} is not a composite index",
                query.index_name
            )));
        };
        *self.index_queries.lock().entry(query.index_name.clone()).or_default() += 1;
        let data = self.data.read();
        let mut ids = data
            .index
            .get(&(*index, values.clone()))
            .cloned()
            .unwrap_or_default();
        if let Some(limit) = query.limit {
            ids.truncate(limit);
        }
        Ok(ids)
    }

    fn scan_vertices(&self) -> BackendResult<Vec<VertexId>> {
        Ok(self
            .data
            .read()
            .rows
            .iter()
            .filter(|(_, row)| !row.is_empty())
            .map(|(id, _)| *id)
            .collect())
    }

    fn mutate(&self, mutations: Vec<StorageMutation>) -> BackendResult<()> {
        self.staged.lock().extend(mutations);
        Ok(())
    }

    fn commit(&self) -> BackendResult<()> {
        self.commit_gate.pass();
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(BackendError::Temporary("injected commit failure".to_string()));
        }
        let staged = std::mem::take(&mut *self.staged.lock());
        let mut data = self.data.write();
        for mutation in staged {
            match mutation {
                StorageMutation::AddEntry { vertex, entry } => {
                    data.rows.entry(vertex).or_default().insert(entry.column, entry.value);
                }
                StorageMutation::DeleteEntry { vertex, column } => {
                    if let Some(row) = data.rows.get_mut(&vertex) {
                        row.remove(&column);
                    }
                }
                StorageMutation::AddIndexRecord { index, values, element } => {
                    let ids = data.index.entry((index, values)).or_default();
                    if !ids.contains(&element) {
                        ids.push(element);
                    }
                }
                StorageMutation::DeleteIndexRecord { index, values, element } => {
                    if let Some(ids) = data.index.get_mut(&(index, values)) {
                        ids.retain(|e| *e != element);
                    }
                }
            }
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn rollback(&self) -> BackendResult<()> {
        if self.fail_rollback.load(Ordering::SeqCst) {
            return Err(BackendError::Permanent("injected rollback failure".to_string()));
        }
        self.staged.lock().clear();
        Ok(())
    }
}

// --- MemoryIndexProvider ---

/// Mixed index provider answering predicate queries from memory.
#[derive(Default)]
pub struct MemoryIndexProvider {
    stores: RwLock<HashMap<String, HashMap<ElementId, Vec<(String, Value)>>>>,
    keys: RwLock<HashMap<String, Vec<String>>>,
    fail_mutations: AtomicBool,
}

impl MemoryIndexProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following write call fail: key registration, mutations
    /// and clearing.
    pub fn fail_mutations(&self, fail: bool) {
        self.fail_mutations.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> BackendResult<()> {
        if self.fail_mutations.load(Ordering::SeqCst) {
            return Err(BackendError::Temporary("injected index failure".to_string()));
        }
        Ok(())
    }

    pub fn registered_keys(&self, store: &str) -> Vec<String> {
        self.keys.read().get(store).cloned().unwrap_or_default()
    }

    pub fn document_count(&self, store: &str) -> usize {
        self.stores.read().get(store).map_or(0, |s| s.len())
    }
}

impl IndexProvider for MemoryIndexProvider {
    fn register(&self, store: &str, key: &str, _info: &KeyInformation) -> BackendResult<()> {
        self.check_writable()?;
        self.keys
            .write()
            .entry(store.to_string())
            .or_default()
            .push(key.to_string());
        Ok(())
    }

    fn query(&self, query: &IndexSubquery) -> BackendResult<Vec<ElementId>> {
        let IndexTarget::Mixed { store, conditions, .. } = &query.target else {
            return Err(BackendError::Permanent("not a mixed index query".to_string()));
        };
        let stores = self.stores.read();
        let Some(documents) = stores.get(store) else {
            return Ok(Vec::new());
        };
        let mut ids: Vec<ElementId> = documents
            .iter()
            .filter(|(_, fields)| {
                conditions.iter().all(|(key, cmp, value)| {
                    cmp.test_any(
                        fields.iter().filter(|(k, _)| k == key).map(|(_, v)| v),
                        value,
                    )
                })
            })
            .map(|(id, _)| id.clone())
            .collect();
        if let Some(limit) = query.limit {
            ids.truncate(limit);
        }
        Ok(ids)
    }

    fn mutate(&self, store: &str, mutations: Vec<IndexEntryMutation>) -> BackendResult<()> {
        self.check_writable()?;
        let mut stores = self.stores.write();
        let documents = stores.entry(store.to_string()).or_default();
        for m in mutations {
            let fields = documents.entry(m.element.clone()).or_default();
            if m.delete {
                if let Some(pos) = fields.iter().position(|(k, v)| *k == m.key && *v == m.value) {
                    fields.remove(pos);
                }
            } else {
                fields.push((m.key, m.value));
            }
            if fields.is_empty() {
                documents.remove(&m.element);
            }
        }
        Ok(())
    }

    fn clear_storage(&self) -> BackendResult<()> {
        self.check_writable()?;
        self.stores.write().clear();
        Ok(())
    }
}

// --- Helper Functions ---

/// A graph over a fresh in-memory backend.
pub fn setup_graph() -> (Arc<MemoryBackend>, Graph) {
    let backend = Arc::new(MemoryBackend::new());
    let graph = Graph::new(backend.clone());
    (backend, graph)
}

/// A graph whose mixed indexes are served by a [`MemoryIndexProvider`] named "search".
pub fn setup_graph_with_search() -> (Arc<MemoryBackend>, Arc<MemoryIndexProvider>, Graph) {
    let backend = Arc::new(MemoryBackend::new());
    let provider = Arc::new(MemoryIndexProvider::new());
    let graph = Graph::new(backend.clone()).with_index_provider("search", provider.clone());
    (backend, provider, graph)
}

pub fn define_key(graph: &Graph, name: &str, data_type: DataType, cardinality: Cardinality) -> Arc<PropertyKey> {
    graph
        .schema()
        .make_property_key(PropertyKeyDefinition::new(name, data_type).cardinality(cardinality))
        .expect("define property key")
}

pub fn define_label(graph: &Graph, name: &str, multiplicity: Multiplicity) -> Arc<EdgeLabel> {
    graph
        .schema()
        .make_edge_label(EdgeLabelDefinition::new(name).multiplicity(multiplicity))
        .expect("define edge label")
}

/// Commits a vertex carrying `name` and returns its permanent id.
pub fn commit_named_vertex(graph: &Graph, name: &str) -> VertexId {
    let tx = graph.start_transaction().expect("start");
    let v = tx.add_vertex(None).expect("add vertex");
    tx.add_property(&v, "name", name).expect("add name");
    tx.commit().expect("commit");
    v.id()
}

/// Sorted names of `vertices`.
pub fn names(tx: &Transaction, vertices: &[Arc<Vertex>]) -> Vec<String> {
    let mut names: Vec<String> = vertices
        .iter()
        .flat_map(|v| tx.query(v).keys(&["name"]).values().expect("names"))
        .filter_map(|v| v.as_text().map(str::to_string))
        .collect();
    names.sort();
    names
}
