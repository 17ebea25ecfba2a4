//! Performance benchmarks for critical session and registry paths

use master::MasterRegistry;
use serde_json::{json, Value};
use server::registry::ConnectionRegistry;
use server::rules::{Action, RuleEngine};
use server::skirmish::Skirmish;
use shared::{
    framing, ListFilter, Role, ServerMetadata, SessionRng, Snapshot, StateUpdate,
};
use std::time::Instant;
use tokio::sync::mpsc;

fn large_snapshot(sequence: u64, keys: usize) -> Snapshot {
    let mut snapshot = Snapshot::new(5);
    snapshot.sequence = sequence;
    for i in 0..keys {
        snapshot
            .game
            .insert(format!("k{i}"), json!({ "x": i, "y": i * 2, "tag": "unit" }));
    }
    snapshot
}

/// Benchmarks diff computation on a mostly unchanged document
#[test]
fn benchmark_snapshot_diff() {
    let base = large_snapshot(1, 500);
    let mut next = base.clone();
    next.sequence = 2;
    next.game.insert("k7".into(), json!({ "x": 0 }));

    let iterations = 1_000;
    let start = Instant::now();
    for _ in 0..iterations {
        let diff = base.diff_to(&next);
        assert_eq!(diff.set.len(), 1);
    }
    let duration = start.elapsed();
    println!(
        "Snapshot diff (500 keys): {} iterations in {:?} ({:.2} us/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 2_000);
}

/// Benchmarks applying a chain of diffs as a client would
#[test]
fn benchmark_diff_chain_apply() {
    let mut server_side = large_snapshot(0, 100);
    let mut updates = Vec::new();
    for seq in 1..=1_000u64 {
        let mut next = server_side.clone();
        next.sequence = seq;
        next.game.insert(format!("k{}", seq % 100), json!(seq));
        updates.push(StateUpdate::Diff {
            diff: server_side.diff_to(&next),
        });
        server_side = next;
    }

    let start = Instant::now();
    let mut client_side = large_snapshot(0, 100);
    for update in &updates {
        client_side = update.apply(Some(&client_side)).unwrap();
    }
    let duration = start.elapsed();
    println!("Applied {} diffs in {:?}", updates.len(), duration);

    assert_eq!(client_side, server_side);
    assert!(duration.as_millis() < 2_000);
}

/// Benchmarks rule engine turns through the reference skirmish
#[test]
fn benchmark_skirmish_turns() {
    let rules = Skirmish {
        target_score: u32::MAX,
        ..Default::default()
    };
    let mut rng = SessionRng::new(3);
    let mut game = rules.setup(&[0, 1], &mut rng);
    let search = Action::new("search", Value::Null);

    let iterations = 10_000;
    let start = Instant::now();
    for i in 0..iterations {
        let slot = (i % 2) as u8;
        game = rules.start_turn(&game, slot, &mut rng);
        game = rules.apply(&game, slot, &search, &mut rng).unwrap().state;
    }
    let duration = start.elapsed();
    println!("Skirmish: {} turns in {:?}", iterations, duration);

    assert!(rng.draws() >= iterations as u64);
    assert!(duration.as_millis() < 2_000);
}

/// Benchmarks master listing with filters over a full table
#[test]
fn benchmark_registry_listing() {
    let mut registry = MasterRegistry::new(std::time::Duration::from_secs(45), 10_000);
    let now = tokio::time::Instant::now();
    for i in 0..2_000 {
        registry
            .register(
                format!("10.0.{}.{}:7777", i / 250, i % 250),
                ServerMetadata {
                    name: format!("room{i}"),
                    player_count: 1,
                    capacity: 4,
                    mode: if i % 2 == 0 { "coop" } else { "versus" }.into(),
                    ..Default::default()
                },
                now,
            )
            .unwrap();
    }

    let filter = ListFilter {
        mode: Some("coop".into()),
        limit: Some(50),
        ..Default::default()
    };
    let iterations = 200;
    let start = Instant::now();
    for _ in 0..iterations {
        assert_eq!(registry.list(&filter, now).len(), 50);
    }
    let duration = start.elapsed();
    println!("Registry listing: {} lists in {:?}", iterations, duration);

    assert!(duration.as_millis() < 2_000);
}

/// Benchmarks slot seating and broadcast fan-out
#[test]
fn benchmark_registry_broadcast() {
    let mut registry = ConnectionRegistry::new(8, None, 10);
    let mut queues = Vec::new();
    let now = tokio::time::Instant::now();
    for id in 0..64u64 {
        let (tx, rx) = mpsc::unbounded_channel();
        registry.attach(id, "127.0.0.1:9".parse().unwrap(), tx, now);
        let role = if id < 8 {
            Role::Participant
        } else {
            Role::Spectator
        };
        registry.join(id, &format!("p{id}"), role, None).unwrap();
        queues.push(rx);
    }

    let message = shared::ServerMessage::Ping { timestamp: 1 };
    let iterations = 1_000;
    let start = Instant::now();
    for _ in 0..iterations {
        assert!(registry.broadcast(&message).is_empty());
    }
    let duration = start.elapsed();
    println!("Broadcast to 64 connections: {} rounds in {:?}", iterations, duration);

    let mut delivered = 0;
    while queues[63].try_recv().is_ok() {
        delivered += 1;
    }
    assert_eq!(delivered, iterations);
    assert!(duration.as_millis() < 2_000);
}

/// Benchmarks frame encoding of a full snapshot
#[test]
fn benchmark_frame_encoding() {
    let snapshot = large_snapshot(9, 200);
    let message = shared::ServerMessage::State {
        sequence: 9,
        update: StateUpdate::Full { snapshot },
        effects: Vec::new(),
    };

    let iterations = 1_000;
    let start = Instant::now();
    for _ in 0..iterations {
        let bytes = framing::encode(&message).unwrap();
        assert!(bytes.len() < framing::MAX_MESSAGE_SIZE);
    }
    let duration = start.elapsed();
    println!("Encoded {} snapshots in {:?}", iterations, duration);

    assert!(duration.as_millis() < 2_000);
}
