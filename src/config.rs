use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::graph::Graph;
use crate::transaction::Transaction;

/// Smallest vertex cache a writing transaction is given.
pub const MIN_VERTEX_CACHE_SIZE: usize = 100;
pub const DEFAULT_VERTEX_CACHE_SIZE: usize = 20_000;
pub const DEFAULT_DIRTY_VERTEX_SIZE: usize = 32;
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;

/// Options of a single transaction.
///
/// Deserializable so that graph-wide defaults can live in a configuration
/// file; missing fields take their defaults.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct TransactionConfig {
    pub read_only: bool,
    /// Caller guarantees the transaction is used from one thread at a time.
    pub single_threaded: bool,
    /// Skips existence checks and uniqueness verification.
    pub batch_loading: bool,
    pub assign_ids_immediately: bool,
    pub verify_external_vertex_existence: bool,
    pub verify_internal_vertex_existence: bool,
    pub verify_uniqueness: bool,
    pub acquire_locks: bool,
    /// Enforce property and connection constraints of vertex labels.
    pub schema_constraints: bool,
    /// Create undefined types on first use.
    pub auto_schema: bool,
    /// Fail graph queries that no index can answer instead of scanning.
    pub force_index_usage: bool,
    pub vertex_cache_size: usize,
    /// Initial capacity of the map that pins modified vertices.
    pub dirty_vertex_size: usize,
    /// Total number of element ids the subquery cache may hold.
    pub index_cache_weight: usize,
    pub lock_timeout_ms: u64,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            read_only: false,
            single_threaded: false,
            batch_loading: false,
            assign_ids_immediately: false,
            verify_external_vertex_existence: true,
            verify_internal_vertex_existence: false,
            verify_uniqueness: true,
            acquire_locks: true,
            schema_constraints: false,
            auto_schema: true,
            force_index_usage: false,
            vertex_cache_size: DEFAULT_VERTEX_CACHE_SIZE,
            dirty_vertex_size: DEFAULT_DIRTY_VERTEX_SIZE,
            index_cache_weight: DEFAULT_VERTEX_CACHE_SIZE / 2,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
        }
    }
}

impl TransactionConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Vertex cache capacity after applying the floor for writing transactions.
    pub fn effective_vertex_cache_size(&self) -> usize {
        if self.read_only {
            self.vertex_cache_size.max(1)
        } else {
            self.vertex_cache_size.max(MIN_VERTEX_CACHE_SIZE)
        }
    }

    pub fn checks_external_vertex_existence(&self) -> bool {
        self.verify_external_vertex_existence && !self.batch_loading
    }

    pub fn checks_uniqueness(&self) -> bool {
        self.verify_uniqueness && !self.batch_loading
    }
}

/// Fluent construction of a transaction with non-default options.
///
/// ```no_run
/// use seshat::prelude::*;
/// # fn run(graph: &Graph) -> seshat::Result<()> {
/// let tx = graph
///     .build_transaction()
///     .read_only()
///     .vertex_cache_size(500)
///     .start()?;
/// # Ok(())
/// # }
/// ```
pub struct TransactionBuilder<'g> {
    graph: &'g Graph,
    config: TransactionConfig,
}

impl<'g> TransactionBuilder<'g> {
    pub(crate) fn new(graph: &'g Graph, config: TransactionConfig) -> Self {
        Self { graph, config }
    }

    pub fn read_only(mut self) -> Self {
        self.config.read_only = true;
        self
    }

    pub fn single_threaded(mut self) -> Self {
        self.config.single_threaded = true;
        self
    }

    pub fn enable_batch_loading(mut self) -> Self {
        self.config.batch_loading = true;
        self
    }

    pub fn assign_ids_immediately(mut self) -> Self {
        self.config.assign_ids_immediately = true;
        self
    }

    pub fn check_external_vertex_existence(mut self, enabled: bool) -> Self {
        self.config.verify_external_vertex_existence = enabled;
        self
    }

    pub fn check_internal_vertex_existence(mut self, enabled: bool) -> Self {
        self.config.verify_internal_vertex_existence = enabled;
        self
    }

    pub fn consistency_checks(mut self, enabled: bool) -> Self {
        self.config.verify_uniqueness = enabled;
        self.config.acquire_locks = enabled;
        self
    }

    pub fn schema_constraints(mut self, enabled: bool) -> Self {
        self.config.schema_constraints = enabled;
        self
    }

    pub fn auto_schema(mut self, enabled: bool) -> Self {
        self.config.auto_schema = enabled;
        self
    }

    pub fn force_index_usage(mut self) -> Self {
        self.config.force_index_usage = true;
        self
    }

    /// Also sets the subquery cache budget to half the vertex cache size.
    pub fn vertex_cache_size(mut self, size: usize) -> Self {
        self.config.vertex_cache_size = size;
        self.config.index_cache_weight = size / 2;
        self
    }

    pub fn dirty_vertex_size(mut self, size: usize) -> Self {
        self.config.dirty_vertex_size = size;
        self
    }

    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.config.lock_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn config(&self) -> &TransactionConfig {
        &self.config
    }

    pub fn start(self) -> Result<Transaction> {
        self.graph.start_transaction_with(self.config)
    }
}
