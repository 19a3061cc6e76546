//! Encoding of relations into vertex-row entries.
//!
//! Columns sort by type, then direction, then a per-type discriminator:
//!
//! | relation | discriminator |
//! |---|---|
//! | SINGLE property | none |
//! | SET property | encoded value |
//! | LIST property | relation id |
//! | edge | adjacent vertex id, relation id |
//!
//! A SINGLE or SET property written twice lands in the same column, so the
//! second write replaces the first without reading it.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SeshatError};
use crate::ids::{RelationId, TypeId, VertexId};
use crate::schema::{Cardinality, Direction, RelationType, TypeInspector};
use crate::storage::{Entry, SliceQuery};
use crate::value::Value;

const TYPE_BYTES: usize = 8;
const HEADER_BYTES: usize = TYPE_BYTES + 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RelationValue {
    Vertex(VertexId),
    Value(Value),
}

/// Decoded form of a stored relation, relative to the row's vertex.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationCache {
    pub type_id: TypeId,
    pub direction: Direction,
    /// `0` when read header-only.
    pub relation_id: RelationId,
    /// `None` when read header-only.
    pub other: Option<RelationValue>,
    pub properties: Vec<(TypeId, Value)>,
}

#[derive(Serialize, Deserialize)]
struct StoredRelation {
    relation_id: RelationId,
    other: RelationValue,
    properties: Vec<(TypeId, Value)>,
}

/// Serializer between relations and backend entries.
pub trait RelationCodec: Send + Sync {
    fn write_relation(&self, relation: &RelationCache, relation_type: &RelationType) -> Result<Entry>;

    fn read_relation(&self, entry: &Entry, header_only: bool, types: &dyn TypeInspector) -> Result<RelationCache>;

    /// Column under which `relation` is stored.
    fn column_for(&self, relation: &RelationCache, relation_type: &RelationType) -> Result<Vec<u8>>;

    /// All relations of a type in a direction (`Both` covers both).
    fn type_slice(&self, type_id: TypeId, dir: Direction) -> SliceQuery;

    /// Edges of a type in a proper direction towards one adjacent vertex.
    fn adjacent_slice(&self, type_id: TypeId, dir: Direction, adjacent: VertexId) -> SliceQuery;

    /// Every relation of a vertex.
    fn all_relations_slice(&self) -> SliceQuery;
}

/// Default codec, serializing payloads with bincode.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl BincodeCodec {
    pub fn new() -> Self {
        Self
    }

    fn header(type_id: TypeId, dir: Direction) -> Vec<u8> {
        let mut column = Vec::with_capacity(HEADER_BYTES + 16);
        column.extend_from_slice(&(type_id as u64).to_be_bytes());
        column.push(dir.position() as u8);
        column
    }

    fn codec_err(e: bincode::Error) -> SeshatError {
        SeshatError::Codec(e.to_string())
    }
}

impl RelationCodec for BincodeCodec {
    fn write_relation(&self, relation: &RelationCache, relation_type: &RelationType) -> Result<Entry> {
        let column = self.column_for(relation, relation_type)?;
        let other = relation
            .other
            .clone()
            .ok_or_else(|| SeshatError::Codec("cannot write a header-only relation".to_string()))?;
        let stored = StoredRelation {
            relation_id: relation.relation_id,
            other,
            properties: relation.properties.clone(),
        };
        let value = bincode::serialize(&stored).map_err(Self::codec_err)?;
        Ok(Entry::new(column, value))
    }

    fn read_relation(&self, entry: &Entry, header_only: bool, types: &dyn TypeInspector) -> Result<RelationCache> {
        if entry.column.len() < HEADER_BYTES {
            return Err(SeshatError::Codec(format!(
                "column too short: {} bytes",
                entry.column.len()
            )));
        }
        let mut type_bytes = [0u8; TYPE_BYTES];
        type_bytes.copy_from_slice(&entry.column[..TYPE_BYTES]);
        let type_id = u64::from_be_bytes(type_bytes) as TypeId;
        let direction = match entry.column[TYPE_BYTES] {
            0 => Direction::Out,
            1 => Direction::In,
            b => return Err(SeshatError::Codec(format!("invalid direction byte {}", b))),
        };
        if header_only {
            return Ok(RelationCache {
                type_id,
                direction,
                relation_id: 0,
                other: None,
                properties: Vec::new(),
            });
        }
        if types.relation_type_by_id(type_id).is_none() {
            return Err(SeshatError::Codec(format!("unknown relation type {}", type_id)));
        }
        let stored: StoredRelation = bincode::deserialize(&entry.value).map_err(Self::codec_err)?;
        Ok(RelationCache {
            type_id,
            direction,
            relation_id: stored.relation_id,
            other: Some(stored.other),
            properties: stored.properties,
        })
    }

    fn column_for(&self, relation: &RelationCache, relation_type: &RelationType) -> Result<Vec<u8>> {
        let mut column = Self::header(relation.type_id, relation.direction);
        match (relation_type, &relation.other) {
            (RelationType::Key(key), Some(RelationValue::Value(value))) => match key.cardinality() {
                Cardinality::Single => {}
                Cardinality::Set => {
                    column.extend(bincode::serialize(value).map_err(Self::codec_err)?);
                }
                Cardinality::List => column.extend_from_slice(&(relation.relation_id as u64).to_be_bytes()),
            },
            (RelationType::Label(_), Some(RelationValue::Vertex(other))) => {
                column.extend_from_slice(&(*other as u64).to_be_bytes());
                column.extend_from_slice(&(relation.relation_id as u64).to_be_bytes());
            }
            _ => {
                return Err(SeshatError::Codec(format!(
                    "relation of type {} does not match its payload",
                    relation_type.name()
                )));
            }
        }
        Ok(column)
    }

    fn type_slice(&self, type_id: TypeId, dir: Direction) -> SliceQuery {
        let mut start = (type_id as u64).to_be_bytes().to_vec();
        let mut end = start.clone();
        match dir {
            Direction::Out => {
                start.push(0);
                end.push(1);
            }
            Direction::In => {
                start.push(1);
                end.push(2);
            }
            Direction::Both => {
                start.push(0);
                end.push(2);
            }
        }
        SliceQuery::new(start, end)
    }

    fn adjacent_slice(&self, type_id: TypeId, dir: Direction, adjacent: VertexId) -> SliceQuery {
        let mut start = Self::header(type_id, dir);
        let mut end = start.clone();
        start.extend_from_slice(&(adjacent as u64).to_be_bytes());
        end.extend_from_slice(&(adjacent as u64).wrapping_add(1).to_be_bytes());
        SliceQuery::new(start, end)
    }

    fn all_relations_slice(&self) -> SliceQuery {
        SliceQuery::new(Vec::new(), vec![0xFF; HEADER_BYTES + 1])
    }
}
