// Declare the common module *within this test crate*
mod common;

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use rand::seq::SliceRandom;

use seshat::prelude::*;

use common::{commit_named_vertex, define_key, define_label, setup_graph};

const THREADS: usize = 8;

#[test]
fn test_concurrent_vertex_creation_in_shared_transaction() {
    let (backend, graph) = setup_graph();
    let tx = Arc::new(graph.start_transaction().unwrap());
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let tx = Arc::clone(&tx);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                (0..25)
                    .map(|i| {
                        let v = tx.add_vertex(None).unwrap();
                        tx.add_property(&v, "name", format!("v-{}-{}", t, i)).unwrap();
                        v.id()
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for handle in handles {
        for id in handle.join().unwrap() {
            assert!(ids.insert(id), "temporary id {} handed out twice", id);
        }
    }
    assert_eq!(ids.len(), THREADS * 25);

    tx.commit().unwrap();
    assert_eq!(backend.vertex_count(), THREADS * 25);
}

#[test]
fn test_concurrent_lookups_share_one_instance() {
    let (_backend, graph) = setup_graph();
    let ids: Vec<_> = (0..20)
        .map(|i| commit_named_vertex(&graph, &format!("v{}", i)))
        .collect();

    let tx = Arc::new(graph.start_transaction().unwrap());
    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let tx = Arc::clone(&tx);
            let barrier = Arc::clone(&barrier);
            let mut order = ids.clone();
            thread::spawn(move || {
                order.shuffle(&mut rand::rng());
                barrier.wait();
                order
                    .into_iter()
                    .map(|id| tx.vertex(id).unwrap().expect("committed vertex"))
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let results: Vec<Vec<Arc<Vertex>>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for id in &ids {
        let instances: Vec<&Arc<Vertex>> = results
            .iter()
            .map(|r| r.iter().find(|v| v.id() == *id).unwrap())
            .collect();
        for instance in &instances[1..] {
            assert!(
                Arc::ptr_eq(instances[0], instance),
                "vertex {} materialized more than once",
                id
            );
        }
    }
}

#[test]
fn test_concurrent_unique_edges_admit_one_winner() {
    let (_backend, graph) = setup_graph();
    define_label(&graph, "married", Multiplicity::One2One);

    let tx = Arc::new(graph.start_transaction().unwrap());
    let groom = tx.add_vertex(None).unwrap();
    let brides: Vec<_> = (0..THREADS).map(|_| tx.add_vertex(None).unwrap()).collect();
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = brides
        .into_iter()
        .map(|bride| {
            let tx = Arc::clone(&tx);
            let groom = Arc::clone(&groom);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                tx.add_edge(&groom, &bride, "married")
            })
        })
        .collect();

    let mut won = 0;
    for handle in handles {
        match handle.join().unwrap() {
            Ok(_) => won += 1,
            Err(SeshatError::SchemaViolation(_)) => {}
            Err(e) => panic!("unexpected error: {:?}", e),
        }
    }
    assert_eq!(won, 1);
    assert_eq!(
        tx.query(&groom).direction(Direction::Out).labels(&["married"]).edge_count().unwrap(),
        1
    );
    tx.commit().unwrap();
}

#[test]
fn test_concurrent_single_property_keeps_one_value() {
    let (_backend, graph) = setup_graph();
    let id = commit_named_vertex(&graph, "start");

    let tx = Arc::new(graph.start_transaction().unwrap());
    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let tx = Arc::clone(&tx);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let v = tx.vertex(id).unwrap().unwrap();
                barrier.wait();
                tx.add_property(&v, "name", format!("name-{}", t)).unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let v = tx.vertex(id).unwrap().unwrap();
    assert_eq!(tx.query(&v).keys(&["name"]).values().unwrap().len(), 1);
    tx.commit().unwrap();

    let tx2 = graph.start_transaction().unwrap();
    let v = tx2.vertex(id).unwrap().unwrap();
    let values = tx2.query(&v).keys(&["name"]).values().unwrap();
    assert_eq!(values.len(), 1);
    assert_ne!(values[0], Value::from("start"));
}

#[test]
fn test_parallel_transactions_commit_independently() {
    let (backend, graph) = setup_graph();
    let graph = Arc::new(graph);
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let graph = Arc::clone(&graph);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let tx = graph.start_transaction().unwrap();
                let tx_id = tx.id();
                let v = tx.add_vertex(None).unwrap();
                tx.add_property(&v, "name", format!("worker-{}", t)).unwrap();
                barrier.wait();
                tx.commit().unwrap();
                println!("Transaction {} committed vertex {}", tx_id, v.id());
                (tx_id, v.id())
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let tx_ids: HashSet<_> = results.iter().map(|(tx, _)| *tx).collect();
    let vertex_ids: HashSet<_> = results.iter().map(|(_, v)| *v).collect();
    assert_eq!(tx_ids.len(), THREADS);
    assert_eq!(vertex_ids.len(), THREADS);
    assert!(vertex_ids.iter().all(|id| *id > 0));
    assert_eq!(backend.vertex_count(), THREADS);
}

#[test]
fn test_held_edge_lock_times_out_other_thread() {
    let (backend, graph) = setup_graph();
    define_label(&graph, "knows", Multiplicity::Simple);
    let a = commit_named_vertex(&graph, "a");
    let b = commit_named_vertex(&graph, "b");

    let tx = Arc::new(
        graph
            .build_transaction()
            .lock_timeout(Duration::from_millis(50))
            .start()
            .unwrap(),
    );
    let a = tx.vertex(a).unwrap().unwrap();
    let b = tx.vertex(b).unwrap().unwrap();

    // The first thread parks in its multiplicity read while holding the lock.
    let gate = backend.gate_reads();
    let holder = {
        let tx = Arc::clone(&tx);
        let (a, b) = (Arc::clone(&a), Arc::clone(&b));
        thread::spawn(move || tx.add_edge(&a, &b, "knows"))
    };
    gate.wait();

    let result = tx.add_edge(&a, &b, "knows");
    assert!(matches!(
        result,
        Err(SeshatError::LockTimeout { timeout, .. }) if timeout == Duration::from_millis(50)
    ));

    gate.wait();
    holder.join().unwrap().unwrap();
    assert_eq!(tx.query(&a).labels(&["knows"]).edge_count().unwrap(), 1);
    tx.commit().unwrap();
}

#[test]
fn test_identical_subqueries_reach_backend_once() {
    let (backend, graph) = setup_graph();
    define_key(&graph, "name", DataType::Text, Cardinality::Single);
    define_key(&graph, "age", DataType::Int, Cardinality::Single);
    graph
        .schema()
        .build_composite_index("byName", ElementCategory::Vertex, &["name"], true, ConsistencyModifier::Default)
        .unwrap();
    graph
        .schema()
        .build_composite_index("byAge", ElementCategory::Vertex, &["age"], false, ConsistencyModifier::Default)
        .unwrap();

    let setup = graph.start_transaction().unwrap();
    for (name, age) in [("alice", 30), ("bob", 30), ("carol", 40)] {
        let v = setup.add_vertex(None).unwrap();
        setup.add_property(&v, "name", name).unwrap();
        setup.add_property(&v, "age", age).unwrap();
    }
    setup.commit().unwrap();
    assert_eq!(backend.index_queries("byAge"), 0);

    // The unique index is streamed; the age index is the shared filter.
    let tx = Arc::new(graph.start_transaction().unwrap());
    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let tx = Arc::clone(&tx);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                tx.graph_query()
                    .has("name", Cmp::Equal, "alice")
                    .has("age", Cmp::Equal, 30)
                    .vertices()
                    .unwrap()
                    .len()
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), 1);
    }
    assert_eq!(backend.index_queries("byAge"), 1);
}

#[test]
fn test_closing_transaction_reports_its_state() {
    let (backend, graph) = setup_graph();
    let tx = Arc::new(graph.start_transaction().unwrap());
    let v = tx.add_vertex(None).unwrap();
    tx.add_property(&v, "name", "alice").unwrap();
    assert_eq!(tx.state(), TransactionState::Active);

    let gate = backend.gate_commit();
    let committer = {
        let tx = Arc::clone(&tx);
        thread::spawn(move || tx.commit())
    };
    gate.wait();

    assert_eq!(tx.state(), TransactionState::Committing);
    assert!(matches!(tx.rollback(), Err(SeshatError::TransactionClosed)));
    assert!(matches!(tx.commit(), Err(SeshatError::TransactionClosed)));

    gate.wait();
    committer.join().unwrap().unwrap();
    assert_eq!(tx.state(), TransactionState::Closed);
    assert_eq!(backend.vertex_count(), 1);
}
