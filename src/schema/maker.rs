use crate::errors::{Result, SeshatError};
use crate::schema::types::*;
use crate::value::{DataType, Value};

/// Synthesizes schema definitions for types that are used before being
/// defined.
pub trait SchemaMaker: Send + Sync {
    fn make_property_key(&self, name: &str, value: &Value) -> Result<PropertyKeyDefinition>;

    fn make_edge_label(&self, name: &str) -> Result<EdgeLabelDefinition>;

    fn make_vertex_label(&self, name: &str) -> Result<VertexLabelDefinition>;

    /// Called when `key` is written to a vertex of `label` and the label
    /// does not map it yet. `Ok` means the mapping may be added.
    fn make_property_constraint(&self, label: &VertexLabel, key: &PropertyKey) -> Result<()>;

    /// Called when an edge of `edge` connects labels without a declared
    /// connection. `Ok` means the connection may be added.
    fn make_connection_constraint(
        &self,
        edge: &EdgeLabel,
        out: &VertexLabel,
        in_label: &VertexLabel,
    ) -> Result<()>;
}

/// Creates anything that is asked for.
#[derive(Debug, Clone)]
pub struct DefaultSchemaMaker {
    pub cardinality: Cardinality,
    pub multiplicity: Multiplicity,
}

impl Default for DefaultSchemaMaker {
    fn default() -> Self {
        Self {
            cardinality: Cardinality::Single,
            multiplicity: Multiplicity::Multi,
        }
    }
}

impl SchemaMaker for DefaultSchemaMaker {
    fn make_property_key(&self, name: &str, _value: &Value) -> Result<PropertyKeyDefinition> {
        Ok(PropertyKeyDefinition::new(name, DataType::Any).cardinality(self.cardinality))
    }

    fn make_edge_label(&self, name: &str) -> Result<EdgeLabelDefinition> {
        Ok(EdgeLabelDefinition::new(name).multiplicity(self.multiplicity))
    }

    fn make_vertex_label(&self, name: &str) -> Result<VertexLabelDefinition> {
        Ok(VertexLabelDefinition::new(name))
    }

    fn make_property_constraint(&self, _label: &VertexLabel, _key: &PropertyKey) -> Result<()> {
        Ok(())
    }

    fn make_connection_constraint(
        &self,
        _edge: &EdgeLabel,
        _out: &VertexLabel,
        _in_label: &VertexLabel,
    ) -> Result<()> {
        Ok(())
    }
}

/// Refuses every request; used when automatic schema creation is off.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledSchemaMaker;

impl SchemaMaker for DisabledSchemaMaker {
    fn make_property_key(&self, name: &str, _value: &Value) -> Result<PropertyKeyDefinition> {
        Err(SeshatError::SchemaViolation(format!(
            "Property key with given name does not exist: {}",
            name
        )))
    }

    fn make_edge_label(&self, name: &str) -> Result<EdgeLabelDefinition> {
        Err(SeshatError::SchemaViolation(format!(
            "Edge label with given name does not exist: {}",
            name
        )))
    }

    fn make_vertex_label(&self, name: &str) -> Result<VertexLabelDefinition> {
        Err(SeshatError::SchemaViolation(format!(
            "Vertex label with given name does not exist: {}",
            name
        )))
    }

    fn make_property_constraint(&self, label: &VertexLabel, key: &PropertyKey) -> Result<()> {
        Err(SeshatError::SchemaViolation(format!(
            "Property key {} is not available for vertex label {}",
            key.name(),
            label.name()
        )))
    }

    fn make_connection_constraint(
        &self,
        edge: &EdgeLabel,
        out: &VertexLabel,
        in_label: &VertexLabel,
    ) -> Result<()> {
        Err(SeshatError::SchemaViolation(format!(
            "Edge label {} does not connect vertex label {} to {}",
            edge.name(),
            out.name(),
            in_label.name()
        )))
    }
}
