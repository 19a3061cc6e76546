//! Transaction-local caches.

pub mod index_cache;
pub mod subquery_cache;
pub mod vertex_cache;

pub use index_cache::{ConcurrentIndexCache, NewVertexIndexCache, SimpleIndexCache, new_vertex_index_cache};
pub use subquery_cache::{SubqueryCache, SubqueryResult};
pub use vertex_cache::VertexCache;
