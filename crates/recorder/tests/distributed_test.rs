//! End-to-end tests for distributed recording over TCP.
//!
//! Each test starts a collector service on an ephemeral local port and
//! drives one or more listeners against it:
//!
//! 1. **Slice ordering** - start/end pairs, stray ends and replays
//! 2. **Concurrent recorders** - events attributed to the right recorder
//! 3. **Buffering** - messages queued before the service exists are delivered
//! 4. **Restarts** - a recorder restarted under the same id is not deduplicated
//! 5. **Coverage merge** - flushed hits and per-test records land in a registry file

use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tally_durability::{AccessMode, CoverageData, RegistryFile, TestExit};
use tally_recorder::{
    DistributedConfig, ErrorInfo, Flush, HitCounters, MethodEnd, MethodStart, RecorderListener,
    RecorderMessage, RecorderService, SliceCollector, TcpRecorderListener, TcpRecorderService,
};
use tempfile::TempDir;

// ============================================================================
// Test Helpers
// ============================================================================

fn start(slice: u32) -> RecorderMessage {
    RecorderMessage::MethodStart(MethodStart {
        type_name: "Stmt".into(),
        slice,
        start_ts: 1_000 + slice as i64,
    })
}

fn end(slice: u32, events: u32) -> RecorderMessage {
    RecorderMessage::MethodEnd(MethodEnd {
        type_name: "Stmt".into(),
        method: format!("test_{}", slice),
        test_name: None,
        slice,
        end_ts: 2_000 + slice as i64,
        event_count: events,
        error: None,
    })
}

fn running_service() -> TcpRecorderService {
    let mut service = TcpRecorderService::new();
    service.init(DistributedConfig::for_testing()).unwrap();
    service.start().unwrap();
    service
}

fn connected_listener(id: &str, service: &TcpRecorderService) -> TcpRecorderListener {
    let port = service.local_addr().unwrap().port();
    let mut listener = TcpRecorderListener::new(id);
    listener
        .init(DistributedConfig::for_testing().with_server("127.0.0.1", port))
        .unwrap();
    listener.connect().unwrap();
    listener
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

// ============================================================================
// Slice ordering
// ============================================================================

#[test]
fn test_slice_ordering_over_tcp() {
    let mut service = running_service();
    let collector = service.collector();
    let mut listener = connected_listener("ordering", &service);

    listener.handle_message(start(1));
    listener.handle_message(end(1, 5));
    // End without start is dropped.
    listener.handle_message(end(2, 9));
    // Second end and restart of a closed slice are dropped.
    listener.handle_message(end(1, 100));
    listener.handle_message(start(1));

    assert!(listener.flush(Duration::from_secs(10)));
    assert_eq!(listener.delivered(), 5);
    assert_eq!(collector.slice_events("ordering", 1), Some(5));
    assert_eq!(collector.slice_events("ordering", 2), None);
    assert_eq!(collector.recorder_events("ordering"), 5);

    listener.disconnect();
    service.stop();
}

#[test]
fn test_slice_closed_by_other_recorder_is_not_closed() {
    let mut service = running_service();
    let collector = service.collector();
    let mut a = connected_listener("a", &service);
    let mut b = connected_listener("b", &service);

    a.handle_message(start(7));
    assert!(a.flush(Duration::from_secs(10)));
    b.handle_message(end(7, 3));
    assert!(b.flush(Duration::from_secs(10)));

    assert_eq!(collector.slice_events("a", 7), None);
    assert_eq!(collector.total_events(), 0);

    a.handle_message(end(7, 4));
    assert!(a.flush(Duration::from_secs(10)));
    assert_eq!(collector.slice_events("a", 7), Some(4));

    a.disconnect();
    b.disconnect();
    service.stop();
}

// ============================================================================
// Concurrent recorders
// ============================================================================

#[test]
fn test_concurrent_recorders_are_attributed_separately() {
    let mut service = running_service();
    let collector = service.collector();

    let jobs = [("left", 3u32), ("right", 4u32)];
    let handles: Vec<_> = jobs
        .iter()
        .map(|(id, events)| {
            let mut listener = connected_listener(id, &service);
            let events = *events;
            thread::spawn(move || {
                for slice in 1..=events {
                    listener.handle_message(start(slice));
                    listener.handle_message(end(slice, 1));
                }
                assert!(listener.flush(Duration::from_secs(10)));
                listener.disconnect();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(collector.recorder_events("left"), 3);
    assert_eq!(collector.recorder_events("right"), 4);
    assert_eq!(collector.total_events(), 7);
    let summaries = collector.summaries();
    assert_eq!(summaries.len(), 2);
    assert!(summaries.iter().all(|s| s.open_slices == 0));

    service.stop();
}

#[test]
fn test_service_waits_for_expected_clients() {
    let shared = Arc::new(SliceCollector::new());
    let port = free_port();
    let config = DistributedConfig::for_testing()
        .with_server("127.0.0.1", port)
        .with_num_clients(2);

    let client_config = config.clone();
    let clients = thread::spawn(move || {
        let mut listeners: Vec<_> = ["c1", "c2"]
            .iter()
            .map(|id| {
                let mut l = TcpRecorderListener::new(*id);
                l.init(client_config.clone()).unwrap();
                l.connect().unwrap();
                l
            })
            .collect();
        assert!(wait_until(Duration::from_secs(10), || listeners
            .iter()
            .all(|l| l.is_connected())));
        for l in &mut listeners {
            l.disconnect();
        }
    });

    let mut service = TcpRecorderService::new().with_collector(Arc::clone(&shared));
    service.init(config).unwrap();
    service.start().unwrap();
    assert!(service.registered_clients() >= 2);

    clients.join().unwrap();
    service.stop();
}

// ============================================================================
// Buffering
// ============================================================================

#[test]
fn test_messages_queued_before_service_starts_are_delivered() {
    let port = free_port();
    let config = DistributedConfig::for_testing().with_server("127.0.0.1", port);

    let mut listener = TcpRecorderListener::new("early");
    listener.init(config.clone()).unwrap();
    listener.handle_message(start(1));
    listener.handle_message(end(1, 2));
    listener.connect().unwrap();

    // Let a few connection attempts fail first.
    thread::sleep(Duration::from_millis(100));
    assert_eq!(listener.pending(), 2);

    let mut service = TcpRecorderService::new();
    service.init(config).unwrap();
    service.start().unwrap();
    let collector = service.collector();

    assert!(listener.flush(Duration::from_secs(10)));
    assert_eq!(collector.slice_events("early", 1), Some(2));

    listener.disconnect();
    service.stop();
}

#[test]
fn test_messages_survive_service_restart() {
    let port = free_port();
    let config = DistributedConfig::for_testing().with_server("127.0.0.1", port);
    let collector = Arc::new(SliceCollector::new());

    let mut first = TcpRecorderService::new().with_collector(Arc::clone(&collector));
    first.init(config.clone()).unwrap();
    first.start().unwrap();

    let mut listener = TcpRecorderListener::new("restart");
    listener.init(config.clone()).unwrap();
    listener.connect().unwrap();
    listener.handle_message(start(1));
    assert!(listener.flush(Duration::from_secs(10)));
    first.stop();

    listener.handle_message(end(1, 6));

    let mut second = TcpRecorderService::new().with_collector(Arc::clone(&collector));
    second.init(config).unwrap();
    second.start().unwrap();

    assert!(listener.flush(Duration::from_secs(10)));
    assert_eq!(collector.slice_events("restart", 1), Some(6));

    listener.disconnect();
    second.stop();
}

// ============================================================================
// Restarts
// ============================================================================

#[test]
fn test_restarted_recorder_with_same_id_is_accounted() {
    let mut service = running_service();
    let collector = service.collector();

    let mut first = connected_listener("shard-1", &service);
    first.handle_message(start(1));
    first.handle_message(end(1, 3));
    assert!(first.flush(Duration::from_secs(10)));
    first.disconnect();

    // A new process reusing the id numbers its messages from 1 again.
    let mut second = connected_listener("shard-1", &service);
    assert_ne!(first.epoch(), second.epoch());
    second.handle_message(start(2));
    second.handle_message(end(2, 4));
    // Reusing a slice number from the previous run opens a fresh slice.
    second.handle_message(start(1));
    second.handle_message(end(1, 5));
    assert!(second.flush(Duration::from_secs(10)));

    assert_eq!(collector.slice_events("shard-1", 2), Some(4));
    assert_eq!(collector.slice_events("shard-1", 1), Some(5));
    assert_eq!(collector.recorder_events("shard-1"), 12);
    assert_eq!(collector.total_events(), 12);
    assert_eq!(collector.closed_slices("shard-1").len(), 3);

    second.disconnect();
    service.stop();
}

// ============================================================================
// Coverage merge
// ============================================================================

#[test]
fn test_flushed_hits_merge_into_registry() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("coverage.db");
    let mut registry = RegistryFile::create(&path, "merge", AccessMode::ReadWrite).unwrap();

    let mut service = running_service();
    let collector = service.collector();
    let mut listener = connected_listener("hits", &service);

    let counters = HitCounters::new(4);
    counters.add(0, 2);
    counters.inc(3);
    listener.handle_message(RecorderMessage::Flush(Flush::from_counts(&counters.drain())));
    counters.inc(3);
    listener.handle_message(RecorderMessage::Flush(Flush::from_counts(&counters.drain())));
    assert!(listener.flush(Duration::from_secs(10)));

    let mut coverage = CoverageData::with_slots(4);
    collector.merge_into(&mut coverage);
    registry.write_coverage(&coverage).unwrap();

    let contents = RegistryFile::open(&path).unwrap().read_contents().unwrap();
    let stored = contents.coverage.unwrap();
    assert_eq!(stored.hits, vec![2, 0, 0, 2]);
    assert_eq!(stored.covered_slots(), 2);

    listener.disconnect();
    service.stop();
}

#[test]
fn test_closed_slices_merge_as_per_test_records() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("per-test.db");
    let mut registry = RegistryFile::create(&path, "per-test", AccessMode::ReadWrite).unwrap();

    let mut service = running_service();
    let collector = service.collector();
    let mut listener = connected_listener("tests", &service);

    listener.handle_message(start(1));
    listener.handle_message(RecorderMessage::Flush(Flush {
        hits: vec![(0, 1), (2, 3)],
    }));
    listener.handle_message(end(1, 2));
    listener.handle_message(start(2));
    listener.handle_message(RecorderMessage::Flush(Flush { hits: vec![(3, 1)] }));
    listener.handle_message(RecorderMessage::MethodEnd(MethodEnd {
        type_name: "Stmt".into(),
        method: "BoxTest.size".into(),
        test_name: Some("size".into()),
        slice: 2,
        end_ts: 2_500,
        event_count: 1,
        error: Some(ErrorInfo {
            message: Some("expected 1 but was 2".into()),
            stack_trace: None,
        }),
    }));
    assert!(listener.flush(Duration::from_secs(10)));

    let mut coverage = CoverageData::with_slots(4);
    assert_eq!(collector.merge_into(&mut coverage), 2);
    registry.write_coverage(&coverage).unwrap();
    // A second merge adds nothing.
    assert_eq!(collector.merge_into(&mut coverage), 0);
    assert!(collector.closed_slices("tests").is_empty());

    let stored = RegistryFile::open(&path)
        .unwrap()
        .read_contents()
        .unwrap()
        .coverage
        .unwrap();
    assert_eq!(stored.hits, vec![1, 0, 3, 1]);
    assert_eq!(stored.per_test.len(), 2);

    let passed = &stored.per_test[0];
    assert_eq!(passed.test_name, "test_1");
    assert_eq!((passed.start_ts, passed.end_ts), (1_001, 2_001));
    assert_eq!(passed.exit, TestExit::Passed);
    assert_eq!(passed.hits.iter().collect::<Vec<_>>(), vec![0, 2]);

    let failed = &stored.per_test[1];
    assert_eq!(failed.test_name, "size");
    assert_eq!(failed.method, "BoxTest.size");
    assert_eq!(failed.exit, TestExit::Failed);
    assert_eq!(failed.hits.iter().collect::<Vec<_>>(), vec![3]);

    listener.disconnect();
    service.stop();
}

#[test]
fn test_flush_past_registry_slots_is_dropped() {
    let mut service = TcpRecorderService::new()
        .with_collector(Arc::new(SliceCollector::new().with_max_slots(4)));
    service.init(DistributedConfig::for_testing()).unwrap();
    service.start().unwrap();
    let collector = service.collector();
    let mut listener = connected_listener("wide", &service);

    listener.handle_message(RecorderMessage::Flush(Flush {
        hits: vec![(1, 1), (u32::MAX, 7)],
    }));
    assert!(listener.flush(Duration::from_secs(10)));
    assert_eq!(listener.delivered(), 1);
    assert_eq!(collector.hit_counts(), vec![0, 1]);

    listener.disconnect();
    service.stop();
}
