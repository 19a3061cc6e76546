//! Schema types, the graph-scoped registry and automatic type creation.

pub mod maker;
pub mod registry;
pub mod types;

pub use maker::{DefaultSchemaMaker, DisabledSchemaMaker, SchemaMaker};
pub use registry::{SchemaRegistry, TypeInspector, TypeNameCache, VERTEX_EXISTS_ID, VERTEX_LABEL_ID};
pub use types::*;
