//! End-to-end pipeline tests: events through the collector's line stream
//! into the bridge and the store, exercising the same path the two
//! binaries use minus the OS observation sources.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use warden::bridge::live::LiveHub;
use warden::bridge::Bridge;
use warden::collector::{event_queue, Collector, ShutdownFlag};
use warden::events::{EventKind, FileOperation, SecurityEvent, Severity};
use warden::health::HealthMonitor;
use warden::rules::RuleEngine;
use warden::store::Database;

fn collect_to_lines(events: Vec<SecurityEvent>) -> Vec<u8> {
    let health = Arc::new(HealthMonitor::new());
    let (sender, receiver) = event_queue(events.len() + 1, Duration::from_secs(1), health.clone());
    for event in events {
        sender.send(event).unwrap();
    }
    drop(sender);

    let mut collector = Collector::new(
        receiver,
        RuleEngine::new(),
        Vec::new(),
        health,
        ShutdownFlag::new(),
    );
    collector.run().unwrap();
    collector.into_output()
}

fn bridge_into(db: &Database, stream: Vec<u8>) -> u64 {
    let live = LiveHub::new(16);
    let health = Arc::new(HealthMonitor::new());
    let mut bridge = Bridge::new(db, &live, health, 3, Duration::from_millis(1), 64);
    bridge.run(Cursor::new(stream)).unwrap()
}

#[test]
fn events_flow_from_queue_to_store_in_order() {
    let events: Vec<SecurityEvent> = (0..5)
        .map(|i| {
            SecurityEvent::new(
                Severity::Info,
                EventKind::SystemLogLine {
                    source: "testd".to_string(),
                    level: "info".to_string(),
                    message: format!("message {}", i),
                },
                "testhost".to_string(),
            )
        })
        .collect();
    let ids: Vec<_> = events.iter().map(|e| e.id).collect();

    let stream = collect_to_lines(events);
    let db = Database::open_in_memory().unwrap();
    assert_eq!(bridge_into(&db, stream), 5);

    // Same timestamps are possible; match by id set and count instead of
    // relying on sub-millisecond ordering
    let stored = db.recent_events(10).unwrap();
    assert_eq!(stored.len(), 5);
    for event in &stored {
        assert!(ids.contains(&event.id));
    }
}

#[test]
fn rule_annotations_survive_the_wire() {
    let sensitive = SecurityEvent::new(
        Severity::Medium,
        EventKind::FileIntegrity {
            path: "/etc/passwd".to_string(),
            operation: FileOperation::Modified,
            content_hash: None,
        },
        "testhost".to_string(),
    );
    let hot = SecurityEvent::new(
        Severity::Info,
        EventKind::ProcessSample {
            pid: 42,
            name: "miner".to_string(),
            cpu_percent: 95.0,
            memory_bytes: 1024,
        },
        "testhost".to_string(),
    );
    let benign = SecurityEvent::new(
        Severity::Info,
        EventKind::SystemLogLine {
            source: "cron".to_string(),
            level: "info".to_string(),
            message: "session opened".to_string(),
        },
        "testhost".to_string(),
    );

    let stream = collect_to_lines(vec![sensitive.clone(), hot.clone(), benign.clone()]);
    let db = Database::open_in_memory().unwrap();
    bridge_into(&db, stream);

    let triggered = db.search_events("", None, 10, 0).unwrap();
    let by_id = |id| {
        triggered
            .iter()
            .find(|e: &&SecurityEvent| e.id == id)
            .unwrap()
            .clone()
    };

    let stored_sensitive = by_id(sensitive.id);
    assert!(stored_sensitive.rule_triggered);
    assert_eq!(
        stored_sensitive.rule_name.as_deref(),
        Some("critical_file_modification")
    );

    let stored_hot = by_id(hot.id);
    assert_eq!(stored_hot.rule_name.as_deref(), Some("high_cpu_usage"));

    let stored_benign = by_id(benign.id);
    assert!(!stored_benign.rule_triggered);
    assert!(stored_benign.rule_name.is_none());

    assert_eq!(db.stats().unwrap().rules_triggered, 2);
}

#[test]
fn replaying_the_stream_does_not_duplicate() {
    let event = SecurityEvent::new(
        Severity::Low,
        EventKind::NetworkSocket {
            local_addr: "10.0.0.2:51410".to_string(),
            remote_addr: Some("203.0.113.9:31337".to_string()),
            protocol: "tcp".to_string(),
            state: "ESTABLISHED".to_string(),
        },
        "testhost".to_string(),
    );

    let stream = collect_to_lines(vec![event]);
    let db = Database::open_in_memory().unwrap();
    bridge_into(&db, stream.clone());
    bridge_into(&db, stream);

    let stats = db.stats().unwrap();
    assert_eq!(stats.total, 1);
    // The suspicious port rule was applied before the wire
    assert_eq!(stats.rules_triggered, 1);
}

#[test]
fn garbage_between_events_is_tolerated() {
    let event = SecurityEvent::new(
        Severity::Info,
        EventKind::SystemLogLine {
            source: "testd".to_string(),
            level: "info".to_string(),
            message: "good line".to_string(),
        },
        "testhost".to_string(),
    );

    let mut stream = b"corrupted prefix line\n".to_vec();
    stream.extend_from_slice(&collect_to_lines(vec![event]));
    stream.extend_from_slice(b"{\"truncated\":\n");

    let db = Database::open_in_memory().unwrap();
    let live = LiveHub::new(16);
    let health = Arc::new(HealthMonitor::new());
    let mut bridge = Bridge::new(&db, &live, Arc::clone(&health), 3, Duration::from_millis(1), 64);
    let consumed = bridge.run(Cursor::new(stream)).unwrap();

    assert_eq!(consumed, 1);
    assert_eq!(health.snapshot().parse_failures, 2);
    assert_eq!(db.stats().unwrap().total, 1);
}
