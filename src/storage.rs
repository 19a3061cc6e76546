use std::fmt;

use ahash::AHashMap as HashMap;
use serde::{Deserialize, Serialize};

use crate::config::TransactionConfig;
use crate::element::{ElementCategory, ElementId};
use crate::errors::BackendResult;
use crate::ids::{TypeId, VertexId};
use crate::query::condition::Cmp;
use crate::schema::Cardinality;
use crate::value::{DataType, Value};

/// One column/value pair in a vertex row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entry {
    pub column: Vec<u8>,
    pub value: Vec<u8>,
}

impl Entry {
    pub fn new(column: Vec<u8>, value: Vec<u8>) -> Self {
        Self { column, value }
    }
}

pub type EntryList = Vec<Entry>;

/// Column range `[start, end)` of a vertex row, with an optional limit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SliceQuery {
    pub start: Vec<u8>,
    pub end: Vec<u8>,
    pub limit: Option<usize>,
}

impl SliceQuery {
    pub fn new(start: Vec<u8>, end: Vec<u8>) -> Self {
        Self {
            start,
            end,
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn contains(&self, column: &[u8]) -> bool {
        column >= self.start.as_slice() && column < self.end.as_slice()
    }
}

/// Represents a single mutation to be applied to the storage layer.
///
/// The graph-level commit turns the added and deleted relations of a
/// transaction into a list of these and hands the whole list to
/// [`BackendTransaction::mutate`] in one call. Deletions are listed before
/// additions so that an addition reusing a column overwrites cleanly.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageMutation {
    /// Write `entry` into the row of `vertex`, replacing any entry with the same column.
    AddEntry { vertex: VertexId, entry: Entry },
    /// Remove the column from the row of `vertex`. A missing column is a no-op.
    DeleteEntry { vertex: VertexId, column: Vec<u8> },
    /// Map a composite index record to an element.
    AddIndexRecord {
        index: TypeId,
        values: Vec<Value>,
        element: ElementId,
    },
    /// Remove the mapping of a composite index record to an element.
    DeleteIndexRecord {
        index: TypeId,
        values: Vec<Value>,
        element: ElementId,
    },
}

/// Which index a subquery targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndexTarget {
    /// Equality lookup of one record in a composite index.
    Composite { index: TypeId, values: Vec<Value> },
    /// Predicate query against a store of a mixed index provider.
    Mixed {
        provider: String,
        store: String,
        conditions: Vec<(String, Cmp, Value)>,
    },
}

/// A query against a single index. Also the key of the subquery cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexSubquery {
    pub index_name: String,
    pub target: IndexTarget,
    pub element: ElementCategory,
    pub limit: Option<usize>,
}

impl IndexSubquery {
    pub fn with_limit(&self, limit: Option<usize>) -> Self {
        let mut q = self.clone();
        q.limit = limit;
        q
    }
}

impl fmt::Display for IndexSubquery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            IndexTarget::Composite { values, .. } => {
                write!(f, "{}:{:?}", self.index_name, values)
            }
            IndexTarget::Mixed { conditions, .. } => {
                write!(f, "{}:{:?}", self.index_name, conditions)
            }
        }?;
        if let Some(limit) = self.limit {
            write!(f, " limit {}", limit)?;
        }
        Ok(())
    }
}

/// Opens backend transactions.
///
/// Implementations must be `Send` and `Sync` so that one backend can serve
/// many graph transactions concurrently.
pub trait Backend: Send + Sync {
    fn begin_transaction(&self, config: &TransactionConfig) -> BackendResult<Box<dyn BackendTransaction>>;
}

/// Handle on one transaction of a key-column-value store.
///
/// Rows are keyed by vertex id; columns within a row are ordered bytewise.
pub trait BackendTransaction: Send + Sync {
    /// Reads the columns of `vertex` that fall inside `slice`, in column order.
    fn edge_query(&self, vertex: VertexId, slice: &SliceQuery) -> BackendResult<EntryList>;

    /// Same as [`edge_query`](Self::edge_query) for many vertices at once.
    fn edge_multi_query(
        &self,
        vertices: &[VertexId],
        slice: &SliceQuery,
    ) -> BackendResult<HashMap<VertexId, EntryList>>;

    /// Looks up a composite index record.
    fn index_query(&self, query: &IndexSubquery) -> BackendResult<Vec<ElementId>>;

    /// Ids of every non-empty row.
    fn scan_vertices(&self) -> BackendResult<Vec<VertexId>>;

    /// Stages `mutations`. They become visible atomically on [`commit`](Self::commit).
    fn mutate(&self, mutations: Vec<StorageMutation>) -> BackendResult<()>;

    fn commit(&self) -> BackendResult<()>;

    fn rollback(&self) -> BackendResult<()>;
}

/// What a mixed index provider needs to know about an indexed key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInformation {
    pub data_type: DataType,
    pub cardinality: Cardinality,
}

/// One document change sent to a mixed index provider.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntryMutation {
    pub element: ElementId,
    pub key: String,
    pub value: Value,
    pub delete: bool,
}

/// External search engine serving mixed indexes.
pub trait IndexProvider: Send + Sync {
    fn register(&self, store: &str, key: &str, info: &KeyInformation) -> BackendResult<()>;

    /// Elements matching every condition of the subquery.
    fn query(&self, query: &IndexSubquery) -> BackendResult<Vec<ElementId>>;

    fn mutate(&self, store: &str, mutations: Vec<IndexEntryMutation>) -> BackendResult<()>;

    fn clear_storage(&self) -> BackendResult<()>;
}
