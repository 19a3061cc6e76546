use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap as HashMap;
use log::debug;

use crate::codec::{BincodeCodec, RelationCodec};
use crate::config::{TransactionBuilder, TransactionConfig};
use crate::element::ElementCategory;
use crate::errors::{Result, SeshatError};
use crate::ids::{IdAllocator, SequentialIdAllocator};
use crate::schema::{DefaultSchemaMaker, MixedIndex, SchemaMaker, SchemaRegistry};
use crate::storage::{Backend, IndexProvider, KeyInformation};
use crate::transaction::Transaction;

/// Seshat Prelude
pub mod prelude {
    pub use crate::config::*;
    pub use crate::element::*;
    pub use crate::errors::*;
    pub use crate::graph::Graph;
    pub use crate::ids::*;
    pub use crate::query::{Cmp, QueryProfiler};
    pub use crate::schema::*;
    pub use crate::storage::*;
    pub use crate::transaction::*;
    pub use crate::value::*;
}

/// Everything a transaction shares with its graph.
#[derive(Clone)]
pub(crate) struct GraphContext {
    pub(crate) schema: Arc<SchemaRegistry>,
    pub(crate) codec: Arc<dyn RelationCodec>,
    pub(crate) ids: Arc<dyn IdAllocator>,
    pub(crate) index_providers: HashMap<String, Arc<dyn IndexProvider>>,
    pub(crate) schema_maker: Arc<dyn SchemaMaker>,
}

/// The main entry point: a property graph on top of a storage backend.
pub struct Graph {
    /// A globally increasing counter for generating unique transaction IDs.
    transaction_counter: Arc<AtomicU64>,
    /// The backend that opens a storage transaction per graph transaction.
    backend: Arc<dyn Backend>,
    context: Arc<GraphContext>,
    /// Options of transactions started with [`start_transaction`](Self::start_transaction).
    default_config: TransactionConfig,
}

impl Graph {
    /// Creates a graph with an empty schema, the bincode codec, a process-local
    /// id allocator and automatic schema creation.
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            transaction_counter: Arc::new(AtomicU64::new(0)),
            backend,
            context: Arc::new(GraphContext {
                schema: Arc::new(SchemaRegistry::new()),
                codec: Arc::new(BincodeCodec::new()),
                ids: Arc::new(SequentialIdAllocator::new()),
                index_providers: HashMap::new(),
                schema_maker: Arc::new(DefaultSchemaMaker::default()),
            }),
            default_config: TransactionConfig::default(),
        }
    }

    pub fn with_config(mut self, config: TransactionConfig) -> Self {
        self.default_config = config;
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn RelationCodec>) -> Self {
        Arc::make_mut(&mut self.context).codec = codec;
        self
    }

    pub fn with_id_allocator(mut self, ids: Arc<dyn IdAllocator>) -> Self {
        Arc::make_mut(&mut self.context).ids = ids;
        self
    }

    pub fn with_schema_maker(mut self, maker: Arc<dyn SchemaMaker>) -> Self {
        Arc::make_mut(&mut self.context).schema_maker = maker;
        self
    }

    /// Registers a mixed index provider under `name`, the name mixed indexes
    /// refer to as their backing.
    pub fn with_index_provider(mut self, name: impl Into<String>, provider: Arc<dyn IndexProvider>) -> Self {
        Arc::make_mut(&mut self.context)
            .index_providers
            .insert(name.into(), provider);
        self
    }

    /// The graph's schema. Types and indexes defined here are visible to
    /// every transaction started afterwards.
    pub fn schema(&self) -> &Arc<SchemaRegistry> {
        &self.context.schema
    }

    pub fn default_config(&self) -> &TransactionConfig {
        &self.default_config
    }

    /// Starts a new transaction with the graph's default options.
    pub fn start_transaction(&self) -> Result<Transaction> {
        self.start_transaction_with(self.default_config.clone())
    }

    /// Starts building a transaction with non-default options.
    pub fn build_transaction(&self) -> TransactionBuilder<'_> {
        TransactionBuilder::new(self, self.default_config.clone())
    }

    pub fn start_transaction_with(&self, config: TransactionConfig) -> Result<Transaction> {
        // Atomically increment the transaction counter to get a unique ID.
        let transaction_id = self.transaction_counter.fetch_add(1, Ordering::SeqCst);
        let backend = self.backend.begin_transaction(&config)?;
        Ok(Transaction::new(
            transaction_id,
            config,
            Arc::clone(&self.context),
            backend,
        ))
    }

    /// Defines a mixed index and registers each of its keys with the
    /// provider named `backing`.
    pub fn build_mixed_index(
        &self,
        name: &str,
        backing: &str,
        element: ElementCategory,
        keys: &[&str],
    ) -> Result<Arc<MixedIndex>> {
        let provider = self.context.index_providers.get(backing).ok_or_else(|| {
            SeshatError::InvalidArgument(format!("Unknown index provider {}", backing))
        })?;
        let index = self.schema().build_mixed_index(name, backing, element, keys)?;
        for key in index.keys() {
            let info = KeyInformation {
                data_type: key.data_type(),
                cardinality: key.cardinality(),
            };
            provider
                .register(name, key.name(), &info)
                .map_err(|source| SeshatError::IndexQuery {
                    index: name.to_string(),
                    source,
                })?;
        }
        Ok(index)
    }

    /// Drops the data of every registered index provider.
    pub fn clear_index_storage(&self) -> Result<()> {
        for (name, provider) in &self.context.index_providers {
            debug!("Clearing storage of index provider {}", name);
            provider.clear_storage().map_err(|source| SeshatError::IndexQuery {
                index: name.clone(),
                source,
            })?;
        }
        Ok(())
    }
}
