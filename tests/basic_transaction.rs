mod common;

use std::sync::Arc;

use seshat::prelude::*;

use common::{commit_named_vertex, define_key, names, setup_graph};

#[test]
fn test_transaction_ids_increment() {
    let (_backend, graph) = setup_graph();
    assert_eq!(graph.start_transaction().unwrap().id(), 0);
    assert_eq!(graph.start_transaction().unwrap().id(), 1);
}

#[test]
fn test_committed_vertex_found_by_graph_query() {
    let (_backend, graph) = setup_graph();

    let tx = graph.start_transaction().unwrap();
    let v1 = tx.add_vertex(None).unwrap();
    tx.add_property(&v1, "name", "alice").unwrap();
    tx.commit().unwrap();

    let tx2 = graph.start_transaction().unwrap();
    let found = tx2.graph_query().has("name", Cmp::Equal, "alice").vertices().unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id(), v1.id());
    assert!(tx2.graph_query().has("name", Cmp::Equal, "bob").vertices().unwrap().is_empty());
}

#[test]
fn test_new_vertex_ids_become_permanent_on_commit() {
    let (backend, graph) = setup_graph();
    let tx = graph.start_transaction().unwrap();
    let v = tx.add_vertex(None).unwrap();
    assert!(v.id() < 0, "new vertices carry temporary ids");
    assert!(v.is_new());

    tx.commit().unwrap();
    assert!(v.id() > 0);
    // ~exists is the only column
    assert_eq!(backend.row_len(v.id()), 1);
}

#[test]
fn test_assign_ids_immediately() {
    let (_backend, graph) = setup_graph();
    let tx = graph.build_transaction().assign_ids_immediately().start().unwrap();
    let v = tx.add_vertex(None).unwrap();
    assert!(v.id() > 0);
    let id = v.id();
    tx.commit().unwrap();
    assert_eq!(v.id(), id);

    let tx2 = graph.start_transaction().unwrap();
    assert!(tx2.vertex(id).unwrap().is_some());
}

#[test]
fn test_read_back_committed_properties() {
    let (_backend, graph) = setup_graph();
    let id = commit_named_vertex(&graph, "alice");

    let tx = graph.start_transaction().unwrap();
    let v = tx.vertex(id).unwrap().expect("vertex should exist");
    assert!(v.is_loaded());
    assert_eq!(tx.query(&v).keys(&["name"]).values().unwrap(), vec![Value::from("alice")]);
    assert!(tx.vertex(id + 1000).unwrap().is_none());
}

#[test]
fn test_basic_rollback() {
    let (backend, graph) = setup_graph();
    let tx = graph.start_transaction().unwrap();
    let v = tx.add_vertex(None).unwrap();
    tx.add_property(&v, "name", "alice").unwrap();
    assert!(tx.has_modifications());
    tx.rollback().unwrap();

    assert_eq!(backend.vertex_count(), 0);
    assert_eq!(backend.commits(), 0);
    let tx2 = graph.start_transaction().unwrap();
    assert!(tx2.graph_query().has("name", Cmp::Equal, "alice").vertices().unwrap().is_empty());
}

#[test]
fn test_closed_transaction_rejects_operations() {
    let (_backend, graph) = setup_graph();
    let tx = graph.start_transaction().unwrap();
    let v = tx.add_vertex(None).unwrap();
    tx.commit().unwrap();

    assert!(tx.is_closed());
    assert_eq!(tx.state(), TransactionState::Closed);
    assert!(matches!(tx.add_vertex(None), Err(SeshatError::TransactionClosed)));
    assert!(matches!(tx.query(&v).relations(), Err(SeshatError::TransactionClosed)));
    assert!(matches!(tx.commit(), Err(SeshatError::TransactionClosed)));
    assert!(matches!(tx.rollback(), Err(SeshatError::TransactionClosed)));
}

#[test]
fn test_read_only_transaction() {
    let (_backend, graph) = setup_graph();
    let id = commit_named_vertex(&graph, "alice");

    let tx = graph.build_transaction().read_only().start().unwrap();
    assert!(tx.is_read_only());
    assert!(matches!(tx.add_vertex(None), Err(SeshatError::ReadOnlyTransaction)));
    let v = tx.vertex(id).unwrap().unwrap();
    assert!(matches!(
        tx.add_property(&v, "name", "bob"),
        Err(SeshatError::ReadOnlyTransaction)
    ));
    assert_eq!(names(&tx, &[v]), vec!["alice".to_string()]);
    tx.commit().unwrap();
}

#[test]
fn test_single_property_is_replaced() {
    let (backend, graph) = setup_graph();
    let tx = graph.start_transaction().unwrap();
    let v = tx.add_vertex(None).unwrap();
    tx.add_property(&v, "name", "alice").unwrap();
    tx.add_property(&v, "name", "bob").unwrap();
    assert_eq!(tx.query(&v).keys(&["name"]).values().unwrap(), vec![Value::from("bob")]);
    tx.commit().unwrap();
    let id = v.id();

    let tx2 = graph.start_transaction().unwrap();
    let v = tx2.vertex(id).unwrap().unwrap();
    tx2.add_property(&v, "name", "carol").unwrap();
    assert_eq!(tx2.query(&v).keys(&["name"]).values().unwrap(), vec![Value::from("carol")]);
    tx2.commit().unwrap();

    let tx3 = graph.start_transaction().unwrap();
    let v = tx3.vertex(id).unwrap().unwrap();
    assert_eq!(tx3.query(&v).keys(&["name"]).values().unwrap(), vec![Value::from("carol")]);
    assert_eq!(backend.row_len(id), 2);
}

#[test]
fn test_set_property_added_twice_is_stored_once() {
    let (_backend, graph) = setup_graph();
    define_key(&graph, "p", DataType::Int, Cardinality::Set);

    let tx = graph.start_transaction().unwrap();
    let v = tx.add_vertex(None).unwrap();
    tx.add_property(&v, "p", 1).unwrap();
    tx.add_property(&v, "p", 1).unwrap();
    assert_eq!(tx.query(&v).keys(&["p"]).property_count().unwrap(), 1);
    tx.add_property(&v, "p", 2).unwrap();
    assert_eq!(tx.query(&v).keys(&["p"]).property_count().unwrap(), 2);
    tx.commit().unwrap();
    let id = v.id();

    let tx2 = graph.start_transaction().unwrap();
    let v = tx2.vertex(id).unwrap().unwrap();
    tx2.add_property(&v, "p", 1).unwrap();
    assert_eq!(tx2.query(&v).keys(&["p"]).property_count().unwrap(), 2);
    tx2.commit().unwrap();

    let tx3 = graph.start_transaction().unwrap();
    let v = tx3.vertex(id).unwrap().unwrap();
    let mut values = tx3.query(&v).keys(&["p"]).values().unwrap();
    values.sort_by_key(|v| v.as_int());
    assert_eq!(values, vec![Value::from(1), Value::from(2)]);
}

#[test]
fn test_list_property_accumulates() {
    let (_backend, graph) = setup_graph();
    define_key(&graph, "tag", DataType::Text, Cardinality::List);

    let tx = graph.start_transaction().unwrap();
    let v = tx.add_vertex(None).unwrap();
    tx.add_property(&v, "tag", "a").unwrap();
    tx.add_property(&v, "tag", "a").unwrap();
    assert_eq!(tx.query(&v).keys(&["tag"]).property_count().unwrap(), 2);
}

#[test]
fn test_conflicting_cardinality_is_rejected() {
    let (_backend, graph) = setup_graph();
    define_key(&graph, "name", DataType::Text, Cardinality::Single);
    define_key(&graph, "tag", DataType::Text, Cardinality::List);

    let tx = graph.start_transaction().unwrap();
    let v = tx.add_vertex(None).unwrap();
    tx.add_property(&v, "name", "a").unwrap();
    let result = tx.add_property_with_cardinality(&v, Cardinality::List, "name", "b");
    assert!(matches!(result, Err(SeshatError::SchemaViolation(_))));
    assert!(matches!(
        tx.add_property_with_cardinality(&v, Cardinality::Set, "tag", "x"),
        Err(SeshatError::SchemaViolation(_))
    ));
    assert_eq!(tx.query(&v).keys(&["name"]).values().unwrap(), vec![Value::from("a")]);

    // SINGLE may always be requested and replaces every value.
    tx.add_property(&v, "tag", "x").unwrap();
    tx.add_property(&v, "tag", "y").unwrap();
    tx.add_property_with_cardinality(&v, Cardinality::Single, "tag", "z").unwrap();
    assert_eq!(tx.query(&v).keys(&["tag"]).values().unwrap(), vec![Value::from("z")]);
    tx.commit().unwrap();

    let tx2 = graph.start_transaction().unwrap();
    let v = tx2.vertex(v.id()).unwrap().unwrap();
    assert_eq!(tx2.query(&v).keys(&["name"]).values().unwrap(), vec![Value::from("a")]);
    assert_eq!(tx2.query(&v).keys(&["tag"]).values().unwrap(), vec![Value::from("z")]);
}

#[test]
fn test_rollback_restores_removed_relation() {
    let (_backend, graph) = setup_graph();
    let tx = graph.start_transaction().unwrap();
    let v1 = tx.add_vertex(None).unwrap();
    let v2 = tx.add_vertex(None).unwrap();
    tx.add_edge(&v1, &v2, "knows").unwrap();
    tx.commit().unwrap();
    let id = v1.id();

    let tx2 = graph.start_transaction().unwrap();
    let v1 = tx2.vertex(id).unwrap().unwrap();
    let edges = tx2.query(&v1).labels(&["knows"]).edges().unwrap();
    assert_eq!(edges.len(), 1);
    assert!(edges[0].is_loaded());
    tx2.remove_relation(&edges[0]).unwrap();
    assert_eq!(tx2.query(&v1).labels(&["knows"]).edge_count().unwrap(), 0);
    tx2.rollback().unwrap();

    let tx3 = graph.start_transaction().unwrap();
    let v1 = tx3.vertex(id).unwrap().unwrap();
    assert_eq!(tx3.query(&v1).labels(&["knows"]).edge_count().unwrap(), 1);
}

#[test]
fn test_remove_vertex() {
    let (backend, graph) = setup_graph();
    let tx = graph.start_transaction().unwrap();
    let v1 = tx.add_vertex(None).unwrap();
    let v2 = tx.add_vertex(None).unwrap();
    tx.add_property(&v1, "name", "alice").unwrap();
    tx.add_edge(&v1, &v2, "knows").unwrap();
    tx.commit().unwrap();
    let (id1, id2) = (v1.id(), v2.id());
    assert_eq!(backend.row_len(id2), 2);

    let tx2 = graph.start_transaction().unwrap();
    let v1 = tx2.vertex(id1).unwrap().unwrap();
    tx2.remove_vertex(&v1).unwrap();
    assert!(v1.is_removed());
    assert!(tx2.vertex(id1).unwrap().is_none());
    assert!(matches!(tx2.add_property(&v1, "name", "x"), Err(SeshatError::InvalidState(_))));
    tx2.commit().unwrap();

    assert_eq!(backend.row_len(id1), 0);
    assert_eq!(backend.row_len(id2), 1);
    let tx3 = graph.start_transaction().unwrap();
    assert!(tx3.vertex(id1).unwrap().is_none());
    let v2 = tx3.vertex(id2).unwrap().unwrap();
    assert_eq!(tx3.query(&v2).edge_count().unwrap(), 0);
}

#[test]
fn test_remove_new_vertex_leaves_no_trace() {
    let (backend, graph) = setup_graph();
    let tx = graph.start_transaction().unwrap();
    let v = tx.add_vertex(None).unwrap();
    tx.add_property(&v, "name", "ghost").unwrap();
    tx.remove_vertex(&v).unwrap();
    assert!(!tx.has_modifications());
    tx.commit().unwrap();
    assert_eq!(backend.vertex_count(), 0);
}

#[test]
fn test_edge_properties() {
    let (_backend, graph) = setup_graph();
    let tx = graph.start_transaction().unwrap();
    let v1 = tx.add_vertex(None).unwrap();
    let v2 = tx.add_vertex(None).unwrap();
    let e = tx.add_edge(&v1, &v2, "knows").unwrap();
    let same = tx.set_relation_property(&e, "since", 2020).unwrap();
    assert!(Arc::ptr_eq(&e, &same), "new relations are changed in place");
    tx.commit().unwrap();
    let id = v1.id();

    let tx2 = graph.start_transaction().unwrap();
    let v1 = tx2.vertex(id).unwrap().unwrap();
    let loaded = tx2.query(&v1).labels(&["knows"]).edges().unwrap().remove(0);
    let since = tx2.property_key("since").unwrap();
    assert_eq!(loaded.property(since.id()), Some(Value::from(2020)));

    let copy = tx2.set_relation_property(&loaded, "since", 2021).unwrap();
    assert_ne!(copy.id(), loaded.id());
    assert_eq!(copy.previous_id(), loaded.id());
    assert!(loaded.is_removed());
    let visible = tx2.query(&v1).labels(&["knows"]).edges().unwrap();
    assert_eq!(visible.len(), 1);
    assert!(Arc::ptr_eq(&visible[0], &copy));
    tx2.commit().unwrap();

    let tx3 = graph.start_transaction().unwrap();
    let v1 = tx3.vertex(id).unwrap().unwrap();
    let edges = tx3
        .query(&v1)
        .labels(&["knows"])
        .has("since", Cmp::Equal, 2021)
        .edges()
        .unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(tx3.query(&v1).labels(&["knows"]).edge_count().unwrap(), 1);
}

#[test]
fn test_find_relation_by_identifier() {
    let (_backend, graph) = setup_graph();
    let tx = graph.start_transaction().unwrap();
    let v1 = tx.add_vertex(None).unwrap();
    let v2 = tx.add_vertex(None).unwrap();
    let e = tx.add_edge(&v1, &v2, "knows").unwrap();
    assert!(tx.find_relation(&e.identifier()).unwrap().is_some());
    tx.commit().unwrap();
    let identifier = e.identifier();
    assert!(identifier.relation_id > 0);

    let tx2 = graph.start_transaction().unwrap();
    let found = tx2.find_relation(&identifier).unwrap().expect("edge should be found");
    assert_eq!(found.id(), identifier.relation_id);
    assert_eq!(found.in_vertex(), Some(v2.id()));
}

#[test]
fn test_vertex_labels() {
    let (_backend, graph) = setup_graph();
    let tx = graph.start_transaction().unwrap();
    let person = tx.add_vertex(Some("person")).unwrap();
    let plain = tx.add_vertex(None).unwrap();
    assert_eq!(tx.vertex_label(&person).unwrap().name(), "person");
    tx.commit().unwrap();

    let tx2 = graph.start_transaction().unwrap();
    let person = tx2.vertex(person.id()).unwrap().unwrap();
    let plain = tx2.vertex(plain.id()).unwrap().unwrap();
    assert_eq!(tx2.vertex_label(&person).unwrap().name(), "person");
    assert!(tx2.vertex_label(&plain).unwrap().is_default());
    // system properties stay hidden
    assert_eq!(tx2.query(&person).property_count().unwrap(), 0);
}

#[test]
fn test_disabled_auto_schema() {
    let (_backend, graph) = setup_graph();
    define_key(&graph, "age", DataType::Int, Cardinality::Single);
    let tx = graph.build_transaction().auto_schema(false).start().unwrap();
    let v = tx.add_vertex(None).unwrap();
    assert!(matches!(tx.add_property(&v, "undefined", 1), Err(SeshatError::SchemaViolation(_))));
    assert!(matches!(tx.add_vertex(Some("person")), Err(SeshatError::SchemaViolation(_))));
    tx.add_property(&v, "age", 42).unwrap();
}

#[test]
fn test_value_must_match_data_type() {
    let (_backend, graph) = setup_graph();
    define_key(&graph, "age", DataType::Int, Cardinality::Single);
    let tx = graph.start_transaction().unwrap();
    let v = tx.add_vertex(None).unwrap();
    assert!(matches!(tx.add_property(&v, "age", "old"), Err(SeshatError::InvalidArgument(_))));
    assert!(matches!(tx.add_property(&v, "~exists", true), Err(SeshatError::InvalidArgument(_))));
    tx.add_property(&v, "age", 42).unwrap();
}

#[test]
fn test_failed_commit_rolls_back() {
    let (backend, graph) = setup_graph();
    backend.fail_commits(true);
    let tx = graph.start_transaction().unwrap();
    let v = tx.add_vertex(None).unwrap();
    tx.add_property(&v, "name", "alice").unwrap();

    match tx.commit() {
        Err(SeshatError::CommitFailed(cause)) => {
            assert!(matches!(*cause, SeshatError::Backend(BackendError::Temporary(_))));
        }
        other => panic!("unexpected commit result: {:?}", other.err()),
    }
    assert!(tx.is_closed());
    assert_eq!(backend.vertex_count(), 0);

    backend.fail_commits(false);
    let tx2 = graph.start_transaction().unwrap();
    // types created by the failed transaction were not published
    assert!(tx2.property_key("name").is_none());
}

#[test]
fn test_failed_rollback_after_failed_commit() {
    let (backend, graph) = setup_graph();
    backend.fail_commits(true);
    backend.fail_rollbacks(true);
    let tx = graph.start_transaction().unwrap();
    tx.add_vertex(None).unwrap();
    assert!(matches!(
        tx.commit(),
        Err(SeshatError::RollbackAfterFailedCommit { .. })
    ));
    assert!(tx.is_closed());
}

#[test]
fn test_failed_rollback() {
    let (backend, graph) = setup_graph();
    backend.fail_rollbacks(true);
    let tx = graph.start_transaction().unwrap();
    tx.add_vertex(None).unwrap();
    assert!(matches!(tx.rollback(), Err(SeshatError::RollbackFailed(_))));
    assert!(tx.is_closed());
}

#[test]
fn test_dropped_transaction_is_rolled_back() {
    let (backend, graph) = setup_graph();
    {
        let tx = graph.start_transaction().unwrap();
        let v = tx.add_vertex(None).unwrap();
        tx.add_property(&v, "name", "alice").unwrap();
    }
    assert_eq!(backend.vertex_count(), 0);
    assert_eq!(backend.commits(), 0);
}

#[test]
fn test_prefetch_loads_slices_in_one_call() {
    let (backend, graph) = setup_graph();
    let ids: Vec<_> = ["a", "b", "c"]
        .iter()
        .map(|n| commit_named_vertex(&graph, n))
        .collect();

    let tx = graph.start_transaction().unwrap();
    let vertices = tx.vertices(&ids).unwrap();
    assert_eq!(vertices.len(), 3);
    tx.prefetch(&vertices, &["name"]).unwrap();

    let before = backend.edge_queries();
    assert_eq!(names(&tx, &vertices), vec!["a", "b", "c"]);
    assert_eq!(backend.edge_queries(), before);
}

#[test]
fn test_single_threaded_transaction() {
    let (backend, graph) = setup_graph();
    define_key(&graph, "name", DataType::Text, Cardinality::Single);
    graph
        .schema()
        .build_composite_index("byName", ElementCategory::Vertex, &["name"], true, ConsistencyModifier::Default)
        .unwrap();
    let stored = commit_named_vertex(&graph, "carol");

    let tx = graph.build_transaction().single_threaded().start().unwrap();
    assert!(tx.config().single_threaded);
    let alice = tx.add_vertex(None).unwrap();
    let bob = tx.add_vertex(None).unwrap();
    tx.add_property(&alice, "name", "alice").unwrap();
    tx.add_property(&alice, "name", "alicia").unwrap();
    tx.add_property(&bob, "name", "bob").unwrap();
    assert!(matches!(
        tx.add_property(&bob, "name", "alicia"),
        Err(SeshatError::SchemaViolation(_))
    ));
    let knows = tx.add_edge(&alice, &bob, "knows").unwrap();
    let likes = tx.add_edge(&bob, &alice, "likes").unwrap();
    tx.remove_relation(&likes).unwrap();
    assert_eq!(tx.query(&alice).edge_count().unwrap(), 1);

    let carol = tx.vertex(stored).unwrap().unwrap();
    let name = tx.query(&carol).keys(&["name"]).properties().unwrap().remove(0);
    tx.remove_relation(&name).unwrap();
    assert!(tx.graph_query().has("name", Cmp::Equal, "carol").vertices().unwrap().is_empty());
    tx.commit().unwrap();
    assert!(tx.is_closed());

    let tx2 = graph.start_transaction().unwrap();
    let alice = tx2.vertex(alice.id()).unwrap().unwrap();
    assert_eq!(names(&tx2, &[alice.clone()]), vec!["alicia".to_string()]);
    let edges = tx2.query(&alice).edges().unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].id(), knows.id());
    let carol = tx2.vertex(stored).unwrap().unwrap();
    assert!(names(&tx2, &[carol]).is_empty());
    assert_eq!(backend.vertex_count(), 3);
}
