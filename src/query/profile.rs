use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::errors::Result;

/// Annotation set when a graph query scans every vertex.
pub const FULLSCAN_ANNOTATION: &str = "fullscan";
pub const CONDITION_ANNOTATION: &str = "condition";
pub const INDEX_ANNOTATION: &str = "index";
pub const QUERY_ANNOTATION: &str = "query";

#[derive(Debug)]
struct ProfileNode {
    name: String,
    annotations: Mutex<Vec<(String, String)>>,
    children: Mutex<Vec<Arc<ProfileNode>>>,
    elapsed: Mutex<Duration>,
    result_size: AtomicUsize,
}

/// Tree of timings and annotations collected while a query runs.
///
/// The default profiler records nothing; every method is a no-op on it.
#[derive(Debug, Clone, Default)]
pub struct QueryProfiler {
    node: Option<Arc<ProfileNode>>,
}

impl QueryProfiler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            node: Some(Arc::new(ProfileNode {
                name: name.into(),
                annotations: Mutex::new(Vec::new()),
                children: Mutex::new(Vec::new()),
                elapsed: Mutex::new(Duration::ZERO),
                result_size: AtomicUsize::new(0),
            })),
        }
    }

    pub fn noop() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.node.is_some()
    }

    pub fn name(&self) -> Option<&str> {
        self.node.as_deref().map(|n| n.name.as_str())
    }

    /// Adds a child node and returns a profiler writing into it.
    pub fn nested(&self, name: &str) -> QueryProfiler {
        match &self.node {
            None => QueryProfiler::noop(),
            Some(node) => {
                let child = QueryProfiler::new(name);
                if let Some(child_node) = &child.node {
                    node.children.lock().push(Arc::clone(child_node));
                }
                child
            }
        }
    }

    pub fn annotate(&self, key: &str, value: impl ToString) {
        if let Some(node) = &self.node {
            node.annotations.lock().push((key.to_string(), value.to_string()));
        }
    }

    /// Latest value annotated under `key` on this node.
    pub fn annotation(&self, key: &str) -> Option<String> {
        let node = self.node.as_ref()?;
        let annotations = node.annotations.lock();
        annotations
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// Like [`annotation`](Self::annotation) but searches the whole subtree.
    pub fn find_annotation(&self, key: &str) -> Option<String> {
        if let Some(found) = self.annotation(key) {
            return Some(found);
        }
        self.children().iter().find_map(|c| c.find_annotation(key))
    }

    pub fn children(&self) -> Vec<QueryProfiler> {
        match &self.node {
            None => Vec::new(),
            Some(node) => node
                .children
                .lock()
                .iter()
                .map(|c| QueryProfiler {
                    node: Some(Arc::clone(c)),
                })
                .collect(),
        }
    }

    pub fn set_result_size(&self, size: usize) {
        if let Some(node) = &self.node {
            node.result_size.store(size, Ordering::Relaxed);
        }
    }

    pub fn result_size(&self) -> usize {
        self.node
            .as_ref()
            .map(|n| n.result_size.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn elapsed(&self) -> Duration {
        self.node.as_ref().map(|n| *n.elapsed.lock()).unwrap_or_default()
    }

    fn add_elapsed(&self, d: Duration) {
        if let Some(node) = &self.node {
            *node.elapsed.lock() += d;
        }
    }

    /// Runs `f` inside a timed child node named `name`.
    pub fn profile<T>(&self, name: &str, f: impl FnOnce(&QueryProfiler) -> Result<T>) -> Result<T> {
        if !self.is_enabled() {
            return f(self);
        }
        let child = self.nested(name);
        let start = Instant::now();
        let result = f(&child);
        child.add_elapsed(start.elapsed());
        result
    }
}
