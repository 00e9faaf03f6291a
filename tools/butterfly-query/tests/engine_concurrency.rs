//! Concurrent dispatch against one engine, with and without reloads

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use butterfly_query::{
    Engine, EngineConfig, GateState, NodeId, Payload, PhantomNode, ResultMatrix, ServiceRequest,
    StaticGraph, StatusCode,
};

/// 4x4 grid, every edge weighing `weight`
fn grid(weight: i32) -> StaticGraph {
    let mut edges = Vec::new();
    for row in 0..4u32 {
        for col in 0..4u32 {
            let id = row * 4 + col;
            if col < 3 {
                edges.push((id, id + 1, weight));
            }
            if row < 3 {
                edges.push((id, id + 4, weight));
            }
        }
    }
    StaticGraph::from_undirected_edges(16, &edges).unwrap()
}

fn table_request(nodes: &[NodeId]) -> ServiceRequest {
    ServiceRequest {
        phantoms: nodes.iter().copied().map(PhantomNode::at_node).collect(),
        ..Default::default()
    }
}

fn table_of(response: &Payload) -> (u64, &ResultMatrix) {
    match response {
        Payload::Table { generation, matrix } => (*generation, matrix),
        other => panic!("expected a table payload, got {other:?}"),
    }
}

fn live_config() -> EngineConfig {
    EngineConfig {
        live_reload: true,
        ..Default::default()
    }
}

#[test]
fn test_concurrent_queries_are_deterministic() {
    let engine = Arc::new(Engine::new(EngineConfig::default(), grid(1)));
    let request = table_request(&[0, 5, 10, 15, 3]);
    let expected = engine.dispatch("table", &request);
    assert_eq!(expected.status, StatusCode::Ok);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let request = request.clone();
            let expected = expected.clone();
            thread::spawn(move || {
                for _ in 0..25 {
                    assert_eq!(engine.dispatch("table", &request), expected);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn test_reload_mid_burst_keeps_results_consistent() {
    // Odd generations serve weight-1 edges, even generations weight-3 edges
    let engine = Arc::new(Engine::new(live_config(), grid(1)));
    let request = table_request(&[0, 15, 6]);
    let light = table_of(&engine.dispatch("table", &request).payload).1.clone();
    let heavy = {
        let reference = Engine::new(EngineConfig::default(), grid(3));
        table_of(&reference.dispatch("table", &request).payload).1.clone()
    };
    assert_eq!(light.get(0, 1), 6);
    assert_eq!(heavy.get(0, 1), 18);

    let running = Arc::new(AtomicBool::new(true));
    let readers: Vec<_> = (0..6)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let running = Arc::clone(&running);
            let request = request.clone();
            let light = light.clone();
            let heavy = heavy.clone();
            thread::spawn(move || {
                let mut last_generation = 0;
                let mut queries = 0usize;
                while running.load(Ordering::Relaxed) || queries < 10 {
                    let response = engine.dispatch("table", &request);
                    assert_eq!(response.status, StatusCode::Ok);
                    let (generation, matrix) = table_of(&response.payload);
                    let expected = if generation % 2 == 1 { &light } else { &heavy };
                    assert_eq!(matrix, expected, "generation {generation}");
                    assert!(generation >= last_generation, "generation went backwards");
                    last_generation = generation;
                    queries += 1;
                }
                last_generation
            })
        })
        .collect();

    for i in 0..6 {
        thread::sleep(Duration::from_millis(2));
        let graph = if i % 2 == 0 { grid(3) } else { grid(1) };
        assert_eq!(engine.reload(graph).unwrap(), i + 2);
    }
    running.store(false, Ordering::Relaxed);

    for reader in readers {
        assert!(reader.join().unwrap() <= 7);
    }
    assert_eq!(engine.generation(), 7);
    assert_eq!(engine.gate().state(), GateState::Idle);
}

#[test]
fn test_reload_waits_for_running_query() {
    let engine = Arc::new(Engine::new(live_config(), grid(1)));
    let guard = engine.gate().enter_query(engine.dataset());
    assert_eq!(engine.gate().state(), GateState::QueryActive(1));

    let (done_tx, done_rx) = mpsc::channel();
    let writer = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            let generation = engine.reload(grid(2)).unwrap();
            done_tx.send(generation).unwrap();
        })
    };

    // The reload cannot finish while the query is registered
    assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());
    assert_eq!(engine.gate().state(), GateState::ReloadWaiting);
    assert_eq!(engine.generation(), 1);

    drop(guard);
    assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 2);
    writer.join().unwrap();

    let response = engine.dispatch("table", &table_request(&[0, 1]));
    assert_eq!(table_of(&response.payload).0, 2);
    assert_eq!(table_of(&response.payload).1.get(0, 1), 2);
}

#[test]
fn test_staged_generation_waits_for_idle_gate() {
    let engine = Engine::new(live_config(), grid(1));
    let request = table_request(&[0, 1]);

    let outer = engine.gate().enter_query(engine.dataset());
    assert_eq!(engine.stage(grid(5)).unwrap(), 2);

    // Joining a busy gate is not a safe point
    let response = engine.dispatch("table", &request);
    assert_eq!(table_of(&response.payload), (1, &{
        let mut m = ResultMatrix::new(2, 2);
        m.improve(0, 0, 0);
        m.improve(0, 1, 1);
        m.improve(1, 0, 1);
        m.improve(1, 1, 0);
        m
    }));
    drop(outer);

    let response = engine.dispatch("table", &request);
    let (generation, matrix) = table_of(&response.payload);
    assert_eq!(generation, 2);
    assert_eq!(matrix.get(0, 1), 5);
}

#[test]
fn test_static_engine_never_blocks() {
    let engine = Engine::new(EngineConfig::default(), grid(1));
    assert!(!engine.gate().is_enabled());

    // Nested queries on a disabled gate take no locks
    let _outer = engine.gate().enter_query(engine.dataset());
    let response = engine.dispatch("timestamp", &ServiceRequest::default());
    assert!(matches!(
        response.payload,
        Payload::Timestamp { generation: 1, .. }
    ));
    assert_eq!(engine.gate().state(), GateState::Idle);
}
