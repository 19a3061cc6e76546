//! Vertex-centric and graph-centric queries.

pub mod condition;
pub mod executor;
pub mod graph_centric;
pub mod profile;
pub mod subquery;
pub mod vertex_centric;

pub use condition::{Cmp, Condition, Predicate};
pub use executor::{QueryExecutor, QueryProcessor, QueryResult};
pub use graph_centric::{GraphBackendQuery, GraphCentricExecutor, GraphCentricQuery, GraphQueryBuilder, JointIndexQuery};
pub use profile::{FULLSCAN_ANNOTATION, QueryProfiler};
pub use subquery::SubqueryIterator;
pub use vertex_centric::{VertexCentricExecutor, VertexCentricQuery, VertexQueryBuilder};
