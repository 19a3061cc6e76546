pub mod cache;
pub mod codec;
mod commit;
pub mod config;
pub mod element;
pub mod errors;
pub mod graph;
pub mod ids;
pub mod locking;
pub mod query;
pub mod schema;
pub mod storage;
pub mod tracking;
pub mod transaction;
pub mod value;

// Re-export key types and structs for easier access
pub use config::{TransactionBuilder, TransactionConfig};
pub use element::{Element, ElementCategory, ElementId, Relation, RelationIdentifier, Vertex};
pub use errors::{BackendError, Result, SeshatError};
pub use graph::{Graph, prelude};
pub use query::{Cmp, QueryProfiler};
pub use schema::{Cardinality, Direction, Multiplicity, SchemaRegistry};
pub use storage::{Backend, BackendTransaction, IndexProvider};
pub use transaction::{Transaction, TransactionState};
pub use value::{DataType, Value};
