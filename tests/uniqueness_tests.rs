mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use seshat::prelude::*;

use common::{define_key, define_label, setup_graph};

#[test]
fn test_simple_label_rejects_second_edge_between_pair() {
    let (_backend, graph) = setup_graph();
    define_label(&graph, "knows", Multiplicity::Simple);

    let tx = graph.start_transaction().unwrap();
    let v1 = tx.add_vertex(None).unwrap();
    let v2 = tx.add_vertex(None).unwrap();
    tx.add_edge(&v1, &v2, "knows").unwrap();
    tx.commit().unwrap();

    let tx2 = graph.start_transaction().unwrap();
    let v1 = tx2.vertex(v1.id()).unwrap().unwrap();
    let v2 = tx2.vertex(v2.id()).unwrap().unwrap();
    let result = tx2.add_edge(&v1, &v2, "knows");
    assert!(matches!(result, Err(SeshatError::SchemaViolation(_))));
    assert_eq!(
        tx2.query(&v1).labels(&["knows"]).direction(Direction::Out).edge_count().unwrap(),
        1
    );

    // The reverse direction is a different pair.
    tx2.add_edge(&v2, &v1, "knows").unwrap();
    tx2.commit().unwrap();
}

#[test]
fn test_simple_label_within_one_transaction() {
    let (_backend, graph) = setup_graph();
    define_label(&graph, "knows", Multiplicity::Simple);

    let tx = graph.start_transaction().unwrap();
    let v1 = tx.add_vertex(None).unwrap();
    let v2 = tx.add_vertex(None).unwrap();
    tx.add_edge(&v1, &v2, "knows").unwrap();
    assert!(matches!(
        tx.add_edge(&v1, &v2, "knows"),
        Err(SeshatError::SchemaViolation(_))
    ));
    assert_eq!(tx.query(&v1).labels(&["knows"]).edge_count().unwrap(), 1);
}

#[test]
fn test_one_to_one_label() {
    let (_backend, graph) = setup_graph();
    define_label(&graph, "married", Multiplicity::One2One);

    let tx = graph.start_transaction().unwrap();
    let v1 = tx.add_vertex(None).unwrap();
    let v2 = tx.add_vertex(None).unwrap();
    let v3 = tx.add_vertex(None).unwrap();
    tx.add_edge(&v1, &v2, "married").unwrap();

    let err = tx.add_edge(&v1, &v3, "married").unwrap_err();
    assert!(matches!(&err, SeshatError::SchemaViolation(msg) if msg.contains("out-unique")));
    let err = tx.add_edge(&v3, &v2, "married").unwrap_err();
    assert!(matches!(&err, SeshatError::SchemaViolation(msg) if msg.contains("in-unique")));
    tx.commit().unwrap();

    let tx2 = graph.start_transaction().unwrap();
    let v1 = tx2.vertex(v1.id()).unwrap().unwrap();
    let v3 = tx2.vertex(v3.id()).unwrap().unwrap();
    assert!(matches!(
        tx2.add_edge(&v1, &v3, "married"),
        Err(SeshatError::SchemaViolation(_))
    ));
}

#[test]
fn test_many_to_one_label() {
    let (_backend, graph) = setup_graph();
    define_label(&graph, "father", Multiplicity::Many2One);

    let tx = graph.start_transaction().unwrap();
    let dad = tx.add_vertex(None).unwrap();
    let kid1 = tx.add_vertex(None).unwrap();
    let kid2 = tx.add_vertex(None).unwrap();
    tx.add_edge(&kid1, &dad, "father").unwrap();
    tx.add_edge(&kid2, &dad, "father").unwrap();
    assert!(matches!(
        tx.add_edge(&kid1, &kid2, "father"),
        Err(SeshatError::SchemaViolation(_))
    ));
    assert_eq!(tx.query(&dad).direction(Direction::In).edge_count().unwrap(), 2);
}

#[test]
fn test_removed_edge_frees_unique_slot() {
    let (_backend, graph) = setup_graph();
    define_label(&graph, "married", Multiplicity::One2One);

    let tx = graph.start_transaction().unwrap();
    let v1 = tx.add_vertex(None).unwrap();
    let v2 = tx.add_vertex(None).unwrap();
    let v3 = tx.add_vertex(None).unwrap();
    tx.add_edge(&v1, &v2, "married").unwrap();
    tx.commit().unwrap();

    let tx2 = graph.start_transaction().unwrap();
    let v1 = tx2.vertex(v1.id()).unwrap().unwrap();
    let v3 = tx2.vertex(v3.id()).unwrap().unwrap();
    let edge = tx2.query(&v1).labels(&["married"]).edges().unwrap().remove(0);
    tx2.remove_relation(&edge).unwrap();
    tx2.add_edge(&v1, &v3, "married").unwrap();
    tx2.commit().unwrap();

    let tx3 = graph.start_transaction().unwrap();
    let v1 = tx3.vertex(v1.id()).unwrap().unwrap();
    let partners = tx3.query(&v1).labels(&["married"]).vertices().unwrap();
    assert_eq!(partners.len(), 1);
    assert_eq!(partners[0].id(), v3.id());
}

#[test]
fn test_batch_loading_skips_multiplicity_checks() {
    let (_backend, graph) = setup_graph();
    define_label(&graph, "knows", Multiplicity::Simple);

    let tx = graph.build_transaction().enable_batch_loading().start().unwrap();
    let v1 = tx.add_vertex(None).unwrap();
    let v2 = tx.add_vertex(None).unwrap();
    tx.add_edge(&v1, &v2, "knows").unwrap();
    tx.add_edge(&v1, &v2, "knows").unwrap();
    assert_eq!(tx.query(&v1).labels(&["knows"]).edge_count().unwrap(), 2);
}

fn define_unique_email(graph: &Graph) {
    define_key(graph, "email", DataType::Text, Cardinality::Single);
    graph
        .schema()
        .build_composite_index(
            "byEmail",
            ElementCategory::Vertex,
            &["email"],
            true,
            ConsistencyModifier::Default,
        )
        .unwrap();
}

#[test]
fn test_unique_index_across_transactions() {
    let (backend, graph) = setup_graph();
    define_unique_email(&graph);
    let index = graph.schema().composite_indexes(ElementCategory::Vertex).remove(0);

    let tx = graph.start_transaction().unwrap();
    let v1 = tx.add_vertex(None).unwrap();
    tx.add_property(&v1, "email", "a@example.com").unwrap();
    tx.commit().unwrap();
    assert_eq!(
        backend.index_record(index.id(), vec![Value::from("a@example.com")]),
        vec![ElementId::Vertex(v1.id())]
    );

    let tx2 = graph.start_transaction().unwrap();
    let v2 = tx2.add_vertex(None).unwrap();
    let err = tx2.add_property(&v2, "email", "a@example.com").unwrap_err();
    assert!(matches!(&err, SeshatError::SchemaViolation(msg) if msg.contains("byEmail")));

    // Re-setting the same value on the owner is fine.
    let v1 = tx2.vertex(v1.id()).unwrap().unwrap();
    tx2.add_property(&v1, "email", "a@example.com").unwrap();
    tx2.add_property(&v2, "email", "b@example.com").unwrap();
    tx2.commit().unwrap();

    assert_eq!(
        backend.index_record(index.id(), vec![Value::from("b@example.com")]),
        vec![ElementId::Vertex(v2.id())]
    );
}

#[test]
fn test_unique_index_within_transaction() {
    let (_backend, graph) = setup_graph();
    define_unique_email(&graph);

    let tx = graph.start_transaction().unwrap();
    let v1 = tx.add_vertex(None).unwrap();
    let v2 = tx.add_vertex(None).unwrap();
    tx.add_property(&v1, "email", "c@example.com").unwrap();
    assert!(matches!(
        tx.add_property(&v2, "email", "c@example.com"),
        Err(SeshatError::SchemaViolation(_))
    ));

    tx.remove_vertex(&v1).unwrap();
    tx.add_property(&v2, "email", "c@example.com").unwrap();
    tx.commit().unwrap();

    let tx2 = graph.start_transaction().unwrap();
    let found = tx2
        .graph_query()
        .has("email", Cmp::Equal, "c@example.com")
        .vertices()
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id(), v2.id());
}

#[test]
fn test_changed_value_updates_index_record() {
    let (backend, graph) = setup_graph();
    define_unique_email(&graph);
    let index = graph.schema().composite_indexes(ElementCategory::Vertex).remove(0);

    let tx = graph.start_transaction().unwrap();
    let v = tx.add_vertex(None).unwrap();
    tx.add_property(&v, "email", "old@example.com").unwrap();
    tx.commit().unwrap();

    let tx2 = graph.start_transaction().unwrap();
    let v = tx2.vertex(v.id()).unwrap().unwrap();
    tx2.add_property(&v, "email", "new@example.com").unwrap();
    tx2.commit().unwrap();

    assert!(backend
        .index_record(index.id(), vec![Value::from("old@example.com")])
        .is_empty());
    assert_eq!(
        backend.index_record(index.id(), vec![Value::from("new@example.com")]),
        vec![ElementId::Vertex(v.id())]
    );

    // The old address is free again.
    let tx3 = graph.start_transaction().unwrap();
    let other = tx3.add_vertex(None).unwrap();
    tx3.add_property(&other, "email", "old@example.com").unwrap();
    tx3.commit().unwrap();
}

#[test]
fn test_uniqueness_lock_released_after_violation() {
    let (_backend, graph) = setup_graph();
    define_unique_email(&graph);

    let tx = Arc::new(
        graph
            .build_transaction()
            .lock_timeout(Duration::from_millis(200))
            .start()
            .unwrap(),
    );
    let v1 = tx.add_vertex(None).unwrap();
    let v2 = tx.add_vertex(None).unwrap();
    tx.add_property(&v1, "email", "d@example.com").unwrap();
    assert!(matches!(
        tx.add_property(&v2, "email", "d@example.com"),
        Err(SeshatError::SchemaViolation(_))
    ));

    // Another thread must see the violation again rather than time out on a
    // lock left behind by the failed call.
    let tx_clone = Arc::clone(&tx);
    let handle = thread::spawn(move || {
        let v3 = tx_clone.add_vertex(None).unwrap();
        tx_clone.add_property(&v3, "email", "d@example.com")
    });
    let result = handle.join().unwrap();
    assert!(matches!(result, Err(SeshatError::SchemaViolation(_))));
}
