//! Persistence of a transaction's changes.
//!
//! Index records are computed while the transaction still addresses new
//! vertices by their temporary ids. Permanent ids are assigned next, and only
//! then are rows and index records encoded, so that every mutation carries
//! final ids. Storage receives a single batch; mixed index providers are
//! updated after the storage commit succeeded.

use std::sync::Arc;

use ahash::AHashMap as HashMap;
use log::{debug, error};

use crate::codec::{RelationCache, RelationValue};
use crate::element::{ElementCategory, ElementId, Relation, RelationKind};
use crate::errors::{Result, SeshatError};
use crate::ids::{TypeId, VertexId, is_temporary};
use crate::schema::{CompositeIndex, RelationType, TypeInspector};
use crate::storage::{IndexEntryMutation, StorageMutation};
use crate::transaction::Transaction;
use crate::value::Value;

enum IndexChange {
    Composite { index: TypeId, values: Vec<Value> },
    Mixed { provider: String, store: String, key: String, value: Value },
}

struct IndexUpdate {
    relation: Arc<Relation>,
    delete: bool,
    /// Record of the property's vertex rather than of the relation itself.
    vertex_record: bool,
    change: IndexChange,
}

impl IndexUpdate {
    fn element(&self) -> ElementId {
        if self.vertex_record {
            ElementId::Vertex(self.relation.out_vertex())
        } else {
            ElementId::Relation(self.relation.identifier())
        }
    }
}

pub(crate) fn commit(tx: &Transaction) -> Result<()> {
    let added = tx.added_relations();
    let deleted = tx.deleted_relations();

    let mut updates = Vec::new();
    for r in &deleted {
        collect_index_updates(tx, r, true, &mut updates)?;
    }
    for r in &added {
        collect_index_updates(tx, r, false, &mut updates)?;
    }

    assign_ids(tx, &added)?;

    let codec = tx.codec();
    let mut mutations = Vec::with_capacity(deleted.len() + added.len() + updates.len());
    for r in &deleted {
        for (vertex, cache) in row_entries(r) {
            let column = codec.column_for(&cache, r.relation_type())?;
            mutations.push(StorageMutation::DeleteEntry { vertex, column });
        }
    }
    for r in &added {
        for (vertex, cache) in row_entries(r) {
            let entry = codec.write_relation(&cache, r.relation_type())?;
            mutations.push(StorageMutation::AddEntry { vertex, entry });
        }
    }

    let mut mixed: HashMap<(String, String), Vec<IndexEntryMutation>> = HashMap::new();
    for update in updates {
        let element = update.element();
        match update.change {
            IndexChange::Composite { index, values } => mutations.push(if update.delete {
                StorageMutation::DeleteIndexRecord { index, values, element }
            } else {
                StorageMutation::AddIndexRecord { index, values, element }
            }),
            IndexChange::Mixed {
                provider,
                store,
                key,
                value,
            } => mixed.entry((provider, store)).or_default().push(IndexEntryMutation {
                element,
                key,
                value,
                delete: update.delete,
            }),
        }
    }

    debug!(
        "Transaction {} writing {} storage mutations",
        tx.id(),
        mutations.len()
    );
    tx.backend.mutate(mutations)?;
    tx.backend.commit()?;
    tx.publish_types();

    for ((provider, store), batch) in mixed {
        let Some(index_provider) = tx.index_provider(&provider) else {
            error!(
                "Error while committing index mutations for transaction {} on index {}: no provider {}",
                tx.id(),
                store,
                provider
            );
            return Err(SeshatError::InvalidState(format!(
                "No index provider registered under {}",
                provider
            )));
        };
        if let Err(e) = index_provider.mutate(&store, batch) {
            error!(
                "Error while committing index mutations for transaction {} on index {}: {}",
                tx.id(),
                store,
                e
            );
            return Err(e.into());
        }
    }
    Ok(())
}

/// Replaces temporary ids of new vertices and relations with permanent ones.
fn assign_ids(tx: &Transaction, added: &[Arc<Relation>]) -> Result<()> {
    let mut mapping: HashMap<VertexId, VertexId> = HashMap::new();
    for vertex in tx.vertex_cache.get_all_new() {
        let old = vertex.id();
        if is_temporary(old) {
            let id = tx.allocate_permanent_id()?;
            vertex.set_id(id);
            mapping.insert(old, id);
        }
    }
    for r in added {
        if is_temporary(r.id()) {
            r.set_id(tx.allocate_permanent_id()?);
        }
        if !mapping.is_empty() {
            r.remap_vertices(&mapping);
        }
    }
    if !mapping.is_empty() {
        debug!(
            "Assigned {} vertex ids in transaction {}",
            mapping.len(),
            tx.id()
        );
    }
    Ok(())
}

/// One decoded entry per row the relation is stored in. A loop edge is
/// stored twice in its vertex's row, once per direction.
fn row_entries(r: &Relation) -> Vec<(VertexId, RelationCache)> {
    let mut vertices = r.vertices();
    vertices.dedup();
    let mut properties = r.properties();
    properties.sort_by_key(|(k, _)| *k);

    let mut entries = Vec::with_capacity(2);
    for vertex in vertices {
        let other = match r.kind() {
            RelationKind::Edge { .. } => RelationValue::Vertex(r.other_vertex(vertex).unwrap_or(vertex)),
            RelationKind::Property { value, .. } => RelationValue::Value(value.clone()),
        };
        for direction in r.directions_from(vertex) {
            entries.push((
                vertex,
                RelationCache {
                    type_id: r.type_id(),
                    direction,
                    relation_id: r.id(),
                    other: Some(other.clone()),
                    properties: properties.clone(),
                },
            ));
        }
    }
    entries
}

fn collect_index_updates(
    tx: &Transaction,
    r: &Arc<Relation>,
    delete: bool,
    out: &mut Vec<IndexUpdate>,
) -> Result<()> {
    match r.kind() {
        RelationKind::Property { value, .. } => {
            let key_id = r.type_id();
            for index in tx.schema().composite_indexes_for(key_id) {
                if index.element() != ElementCategory::Vertex {
                    continue;
                }
                if let Some(values) = vertex_record(tx, r, &index, value, delete)? {
                    out.push(IndexUpdate {
                        relation: Arc::clone(r),
                        delete,
                        vertex_record: true,
                        change: IndexChange::Composite {
                            index: index.id(),
                            values,
                        },
                    });
                }
            }
            for index in tx.schema().mixed_indexes_for(key_id) {
                if index.element() != ElementCategory::Vertex {
                    continue;
                }
                out.push(IndexUpdate {
                    relation: Arc::clone(r),
                    delete,
                    vertex_record: true,
                    change: IndexChange::Mixed {
                        provider: index.backing().to_string(),
                        store: index.name().to_string(),
                        key: r.relation_type().name().to_string(),
                        value: value.clone(),
                    },
                });
            }
        }
        RelationKind::Edge { .. } => {
            let properties: HashMap<_, _> = r.properties().into_iter().collect();
            if properties.is_empty() {
                return Ok(());
            }
            for index in tx.schema().composite_indexes(ElementCategory::Edge) {
                let values: Option<Vec<Value>> = index
                    .keys()
                    .iter()
                    .map(|k| properties.get(&k.id()).cloned())
                    .collect();
                if let Some(values) = values {
                    out.push(IndexUpdate {
                        relation: Arc::clone(r),
                        delete,
                        vertex_record: false,
                        change: IndexChange::Composite {
                            index: index.id(),
                            values,
                        },
                    });
                }
            }
            for index in tx.schema().mixed_indexes(ElementCategory::Edge) {
                for (key, value) in &properties {
                    if !index.covers(*key) {
                        continue;
                    }
                    let Some(RelationType::Key(key)) = tx.relation_type_by_id(*key) else {
                        continue;
                    };
                    out.push(IndexUpdate {
                        relation: Arc::clone(r),
                        delete,
                        vertex_record: false,
                        change: IndexChange::Mixed {
                            provider: index.backing().to_string(),
                            store: index.name().to_string(),
                            key: key.name().to_string(),
                            value: value.clone(),
                        },
                    });
                }
            }
        }
    }
    Ok(())
}

/// Values of a vertex-centric composite record touched by property `r`, or
/// `None` if the vertex has no value for one of the other keys. A deleted
/// record prefers values deleted in the same transaction.
fn vertex_record(
    tx: &Transaction,
    r: &Relation,
    index: &CompositeIndex,
    value: &Value,
    delete: bool,
) -> Result<Option<Vec<Value>>> {
    let owner = r.out_vertex();
    let vertex = tx.internal_vertex(owner)?;
    let mut values = Vec::with_capacity(index.keys().len());
    for key in index.keys() {
        if key.id() == r.type_id() {
            values.push(value.clone());
            continue;
        }
        let mut candidates: Vec<Value> = Vec::new();
        if delete {
            let key_id = key.id();
            candidates.extend(
                tx.deleted
                    .get_view(&|d| d.type_id() == key_id && d.out_vertex() == owner)
                    .iter()
                    .filter_map(|d| d.value().cloned()),
            );
        }
        if !vertex.is_removed() {
            candidates.extend(
                tx.query(&vertex)
                    .types(&[RelationType::Key(Arc::clone(key))])
                    .values()?,
            );
        }
        match candidates.into_iter().next() {
            Some(v) => values.push(v),
            None => return Ok(None),
        }
    }
    Ok(Some(values))
}
