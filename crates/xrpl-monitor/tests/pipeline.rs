//! End-to-end collector ticks against a scripted rippled and a real store.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{info, thresholds, FixedProbe, Harness, Reply, ScriptedApi};
use rippled_client::ServerState;
use xrpl_monitor::alert::AlertKind;
use xrpl_monitor::collector::{now_ms, FastCollector, SlowCollector, TickOutcome};
use xrpl_monitor::monitor::CurrentState;
use xrpl_monitor::probe::{HostResources, ResourceProbe};
use xrpl_monitor::sample::Snapshot;
use xrpl_monitor::tracker::TrackerConfig;

const TICK: i64 = 5_000;

fn fast(h: &Harness, api: &Arc<ScriptedApi>) -> FastCollector<ScriptedApi> {
    FastCollector::new(api.clone(), h.ctx(), TrackerConfig::default(), thresholds()).unwrap()
}

#[tokio::test]
async fn test_consecutive_timeouts_then_recovery() {
    let h = Harness::new();
    let api = Arc::new(ScriptedApi::new([
        Reply::Timeout,
        Reply::Timeout,
        Reply::Timeout,
        info("proposing", 100, 21),
    ]));
    let mut collector = fast(&h, &api);
    let t0 = now_ms();

    for i in 0..3 {
        let outcome = collector.tick_at(t0 + i * TICK).await;
        assert_eq!(outcome, TickOutcome::UpstreamFailed("timeout"));
    }
    assert_eq!(h.db.count_snapshots_since(0).unwrap(), 0);

    let gaps = h.db.poll_gaps_since(0).unwrap();
    assert_eq!(gaps.len(), 3);
    assert!(gaps.iter().all(|g| g.kind == "timeout" && g.collector == "fast"));
    assert_eq!(
        h.counters
            .upstream_errors
            .with_label_values(&["fast", "timeout"])
            .get(),
        3
    );

    let unreachable: Vec<_> = h
        .alerts
        .alerts()
        .into_iter()
        .filter(|a| a.kind == AlertKind::Unreachable)
        .collect();
    assert_eq!(unreachable.len(), 1);
    assert!(!unreachable[0].resolved);

    assert_eq!(collector.tick_at(t0 + 3 * TICK).await, TickOutcome::Recorded);
    assert_eq!(h.db.count_snapshots_since(0).unwrap(), 1);
    assert_eq!(collector.monitor().consecutive_failures(), 0);

    let recovered = h
        .alerts
        .alerts()
        .into_iter()
        .filter(|a| a.kind == AlertKind::Unreachable && a.resolved)
        .count();
    assert_eq!(recovered, 1);
}

#[tokio::test]
async fn test_state_transitions_persisted() {
    let h = Harness::new();
    let api = Arc::new(ScriptedApi::new([
        info("full", 100, 21),
        info("full", 101, 21),
        info("proposing", 102, 21),
        info("proposing", 103, 21),
        info("full", 104, 21),
    ]));
    let mut collector = fast(&h, &api);
    let t0 = now_ms();

    for i in 0..5 {
        assert_eq!(collector.tick_at(t0 + i * TICK).await, TickOutcome::Recorded);
    }

    let transitions = h.db.recent_transitions(10).unwrap();
    assert_eq!(transitions.len(), 2);
    // Newest first.
    assert_eq!(transitions[0].from, ServerState::Proposing);
    assert_eq!(transitions[0].to, ServerState::Full);
    assert_eq!(transitions[0].duration_in_from_ms, 2 * TICK);
    assert_eq!(transitions[1].from, ServerState::Full);
    assert_eq!(transitions[1].to, ServerState::Proposing);

    let current = h.db.current_state().unwrap().unwrap();
    assert_eq!(current.state, ServerState::Full);
    assert_eq!(current.entered_at_ms, t0 + 4 * TICK);
    assert_eq!(h.counters.state_transitions.get(), 2);

    let state_alerts = h
        .alerts
        .alerts()
        .into_iter()
        .filter(|a| a.kind == AlertKind::StateChange)
        .count();
    assert_eq!(state_alerts, 2);
}

#[tokio::test]
async fn test_transition_log_survives_locked_store() {
    let h = Harness::with_busy_timeout(Duration::from_millis(20));
    let api = Arc::new(ScriptedApi::new([info("full", 100, 21)]));
    let mut collector = fast(&h, &api);
    let t0 = now_ms();

    collector.tick_at(t0).await;
    assert_eq!(collector.pending_states(), 0);

    // Another writer holds the database while the node starts proposing.
    let other = rusqlite::Connection::open(h.db.path()).unwrap();
    other.execute_batch("BEGIN IMMEDIATE;").unwrap();
    api.push(info("proposing", 101, 21));
    collector.tick_at(t0 + TICK).await;
    assert_eq!(collector.pending_states(), 1);
    assert_eq!(
        h.db.reader().unwrap().current_state().unwrap().map(|c| c.state),
        Some(ServerState::Full)
    );
    other.execute_batch("COMMIT;").unwrap();

    api.push(info("full", 102, 21));
    collector.tick_at(t0 + 2 * TICK).await;
    assert_eq!(collector.pending_states(), 0);

    let transitions = h.db.recent_transitions(10).unwrap();
    assert_eq!(transitions.len(), 2);
    assert_eq!(transitions[0].from, ServerState::Proposing);
    assert_eq!(transitions[0].to, ServerState::Full);
    assert_eq!(transitions[0].timestamp_ms, t0 + 2 * TICK);
    assert_eq!(transitions[1].from, ServerState::Full);
    assert_eq!(transitions[1].to, ServerState::Proposing);
    assert_eq!(transitions[1].timestamp_ms, t0 + TICK);

    let current = h.db.current_state().unwrap().unwrap();
    assert_eq!(current.state, ServerState::Full);
    assert_eq!(current.entered_at_ms, t0 + 2 * TICK);

    // The locked tick lost its snapshot and nothing else.
    assert!(
        h.counters
            .store_write_failures
            .with_label_values(&["snapshots"])
            .get()
            >= 1
    );
    assert_eq!(h.db.count_snapshots_since(0).unwrap(), 2);
    assert!(h.alerts.alerts().iter().all(|a| a.kind != AlertKind::StoreCorruption));
}

#[tokio::test]
async fn test_low_peers_alerts_once() {
    let h = Harness::new();
    let api = Arc::new(ScriptedApi::new([info("proposing", 100, 21)]));
    let mut collector = fast(&h, &api);
    let t0 = now_ms();

    collector.tick_at(t0).await;
    api.push(info("proposing", 100, 4));
    for i in 1..=20 {
        collector.tick_at(t0 + i * TICK).await;
    }

    let low_peers: Vec<_> = h
        .alerts
        .alerts()
        .into_iter()
        .filter(|a| a.kind == AlertKind::LowPeers)
        .collect();
    assert_eq!(low_peers.len(), 1);
    assert!(!low_peers[0].resolved);
    // First low reading at t0+5s; fires on the first tick past 60s.
    assert_eq!(low_peers[0].timestamp_ms, t0 + 14 * TICK);

    api.push(info("proposing", 100, 21));
    collector.tick_at(t0 + 21 * TICK).await;
    let resolved = h
        .alerts
        .alerts()
        .into_iter()
        .filter(|a| a.kind == AlertKind::LowPeers && a.resolved)
        .count();
    assert_eq!(resolved, 1);
}

#[tokio::test]
async fn test_timestamps_strictly_increase() {
    let h = Harness::new();
    let api = Arc::new(ScriptedApi::new([info("proposing", 100, 21)]));
    let mut collector = fast(&h, &api);
    let t0 = now_ms();

    collector.tick_at(t0).await;
    collector.tick_at(t0).await;
    collector.tick_at(t0 - 1_000).await;

    assert_eq!(h.db.count_snapshots_since(t0).unwrap(), 3);
    let latest = h.db.latest_snapshot().unwrap().unwrap();
    assert_eq!(latest.timestamp_ms, t0 + 2);
}

#[tokio::test]
async fn test_malformed_response_discarded() {
    let h = Harness::new();
    let api = Arc::new(ScriptedApi::new([info("banana", 100, 21)]));
    let mut collector = fast(&h, &api);
    let t0 = now_ms();

    assert_eq!(collector.tick_at(t0).await, TickOutcome::Discarded);
    assert_eq!(h.db.count_snapshots_since(0).unwrap(), 0);
    assert_eq!(
        h.counters.malformed_responses.with_label_values(&["fast"]).get(),
        1
    );
    let gaps = h.db.poll_gaps_since(0).unwrap();
    assert_eq!(gaps.len(), 1);
    assert_eq!(gaps[0].kind, "malformed");
    // A discarded sample is not a connectivity failure.
    assert_eq!(collector.monitor().consecutive_failures(), 0);
}

#[tokio::test]
async fn test_peers_failure_keeps_snapshot() {
    let h = Harness::new();
    let api = Arc::new(ScriptedApi::new([info("proposing", 100, 21)]));
    api.peers_fail.store(true, Ordering::SeqCst);
    let mut collector = fast(&h, &api);

    assert_eq!(collector.tick_at(now_ms()).await, TickOutcome::Recorded);
    let latest = h.db.latest_snapshot().unwrap().unwrap();
    assert_eq!(latest.peers_total, 21);
    assert_eq!(latest.peers_inbound, None);
    assert_eq!(latest.peers_insane, None);
    assert_eq!(
        h.counters
            .upstream_errors
            .with_label_values(&["fast", "unreachable"])
            .get(),
        1
    );
}

#[tokio::test]
async fn test_restart_resumes_without_transition() {
    let h = Harness::new();
    let t0 = now_ms();
    h.db.record_state(
        None,
        &CurrentState {
            state: ServerState::Proposing,
            entered_at_ms: t0 - 60_000,
        },
    )
    .unwrap();

    let api = Arc::new(ScriptedApi::new([info("proposing", 100, 21)]));
    let mut collector = fast(&h, &api);
    assert_eq!(
        collector.monitor().current().map(|c| c.state),
        Some(ServerState::Proposing)
    );

    collector.tick_at(t0).await;
    assert!(h.db.recent_transitions(10).unwrap().is_empty());
    assert_eq!(h.counters.state_transitions.get(), 0);
    let current = h.db.current_state().unwrap().unwrap();
    assert_eq!(current.entered_at_ms, t0 - 60_000);
}

#[tokio::test]
async fn test_ledger_advance_records_validations() {
    let h = Harness::new();
    let api = Arc::new(ScriptedApi::new([
        info("proposing", 100, 21),
        info("proposing", 103, 21),
    ]));
    let mut collector = fast(&h, &api);
    let t0 = now_ms();

    collector.tick_at(t0).await;
    collector.tick_at(t0 + TICK).await;

    let events = h.db.validation_events_since(0).unwrap();
    let seqs: Vec<u32> = events.iter().map(|e| e.ledger_seq).collect();
    assert_eq!(seqs, vec![100, 101, 102, 103]);
    assert!(events.iter().all(|e| e.agreed));
    assert_eq!(h.counters.validations_checked.get(), 4);
    assert_eq!(collector.tracker().highest_recorded(), Some(103));

    // Events survive a restart and seed the new tracker.
    drop(collector);
    let resumed = fast(&h, &api);
    assert_eq!(resumed.tracker().highest_recorded(), Some(103));
}

#[tokio::test]
async fn test_validating_is_not_agreement() {
    let h = Harness::new();
    let api = Arc::new(ScriptedApi::new([
        info("validating", 100, 21),
        info("validating", 102, 21),
        info("proposing", 103, 21),
        info("proposing", 104, 21),
    ]));
    let mut collector = fast(&h, &api);
    let t0 = now_ms();

    for i in 0..4 {
        collector.tick_at(t0 + i * TICK).await;
    }

    let events = h.db.validation_events_since(0).unwrap();
    let classified: Vec<(u32, bool)> = events.iter().map(|e| (e.ledger_seq, e.agreed)).collect();
    // 103 closed while the node was still validating.
    assert_eq!(
        classified,
        vec![(100, false), (101, false), (102, false), (103, false), (104, true)]
    );
}

#[tokio::test]
async fn test_slow_collector_records_aggregate_and_node_info() {
    let h = Harness::new();
    let api = Arc::new(ScriptedApi::new([info("proposing", 100, 21)]));
    let mut slow = SlowCollector::new(api, h.ctx(), FixedProbe, Duration::from_secs(30 * 86_400));
    assert_eq!(slow.tick_at(now_ms()).await, TickOutcome::Recorded);

    let reader = h.db.reader().unwrap();
    let aggregate = reader.latest_aggregate().unwrap().unwrap();
    assert_eq!(aggregate.cpu_percent, 17.5);
    assert_eq!(aggregate.memory_total_bytes, 32 << 30);
    assert_eq!(aggregate.disk_used_bytes, Some(500 << 30));
    assert_eq!(aggregate.queue_depth, Some(3));
    assert_eq!(aggregate.open_ledger_size, Some(42));
    assert_eq!(aggregate.io_latency_ms, Some(1));

    assert_eq!(aggregate.transaction_rate, Some(12.0));
    assert_eq!(aggregate.peer_disconnects, Some(25));
    assert_eq!(aggregate.initial_sync_secs, Some(300.0));

    let node = reader.node_info().unwrap().unwrap();
    assert_eq!(node.build_version.as_deref(), Some("2.2.3"));
    assert_eq!(node.node_size.as_deref(), Some("medium"));

    let accounting = reader.state_accounting().unwrap();
    assert_eq!(accounting.len(), 2);
    assert_eq!(accounting[1].state, ServerState::Proposing);
    assert_eq!(accounting[1].duration_secs, 3_595.0);
    assert_eq!(accounting[0].transitions, 2);
}

/// Stands in for sizing a very large data directory.
struct SluggishHost(Duration);

impl ResourceProbe for SluggishHost {
    fn sample(&mut self) -> HostResources {
        std::thread::sleep(self.0);
        FixedProbe.sample()
    }
}

#[tokio::test(flavor = "current_thread")]
async fn test_slow_host_sampling_does_not_stall_runtime() {
    let h = Harness::new();
    let api = Arc::new(ScriptedApi::new([info("proposing", 100, 21)]));
    let mut slow = SlowCollector::new(
        api,
        h.ctx(),
        SluggishHost(Duration::from_millis(300)),
        Duration::from_secs(30 * 86_400),
    );

    let beats = Arc::new(AtomicU32::new(0));
    let heartbeat = {
        let beats = beats.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(10)).await;
                beats.fetch_add(1, Ordering::SeqCst);
            }
        })
    };

    assert_eq!(slow.tick_at(now_ms()).await, TickOutcome::Recorded);
    heartbeat.abort();
    // The only runtime thread kept serving other tasks while sampling ran.
    assert!(beats.load(Ordering::SeqCst) >= 5);
    assert_eq!(
        h.db.reader().unwrap().latest_aggregate().unwrap().unwrap().cpu_percent,
        17.5
    );
}

#[tokio::test]
async fn test_slow_collector_keeps_host_sample_when_upstream_down() {
    let h = Harness::new();
    let api = Arc::new(ScriptedApi::new([Reply::Unreachable]));
    let mut slow = SlowCollector::new(api, h.ctx(), FixedProbe, Duration::from_secs(30 * 86_400));

    assert_eq!(
        slow.tick_at(now_ms()).await,
        TickOutcome::UpstreamFailed("unreachable")
    );

    let reader = h.db.reader().unwrap();
    let aggregate = reader.latest_aggregate().unwrap().unwrap();
    assert_eq!(aggregate.cpu_percent, 17.5);
    assert_eq!(aggregate.io_latency_ms, None);
    assert_eq!(aggregate.queue_depth, None);
    assert!(reader.node_info().unwrap().is_none());

    let gap = reader.last_poll_gap("slow").unwrap().unwrap();
    assert_eq!(gap.kind, "unreachable");
    assert!(reader.last_poll_gap("fast").unwrap().is_none());
}

#[tokio::test]
async fn test_slow_collector_prunes_past_retention() {
    let h = Harness::new();
    let now = now_ms();
    let day = 86_400_000;
    let old = Snapshot {
        timestamp_ms: now - 40 * day,
        state: ServerState::Proposing,
        ledger_seq: Some(10),
        ledger_hash: Some("AA".to_string()),
        ledger_age_secs: Some(1),
        peers_total: 21,
        peers_inbound: None,
        peers_outbound: None,
        peer_latency_p90_ms: None,
        peers_insane: None,
        load_factor: 1.0,
        validation_quorum: None,
        proposers: None,
        converge_time_secs: None,
        uptime_secs: None,
        state_duration_secs: None,
        base_fee_xrp: None,
        reserve_base_xrp: None,
        reserve_inc_xrp: None,
    };
    h.db.insert_snapshot(&old).unwrap();
    h.db.insert_snapshot(&Snapshot {
        timestamp_ms: now - day,
        ledger_seq: Some(11),
        ..old.clone()
    })
    .unwrap();
    h.db.record_state(
        None,
        &CurrentState {
            state: ServerState::Proposing,
            entered_at_ms: now - 40 * day,
        },
    )
    .unwrap();

    let api = Arc::new(ScriptedApi::new([Reply::Unreachable]));
    let mut slow = SlowCollector::new(api, h.ctx(), FixedProbe, Duration::from_secs(30 * 86_400));
    slow.tick_at(now).await;

    assert_eq!(h.db.count_snapshots_since(0).unwrap(), 1);
    assert_eq!(
        h.db.latest_snapshot().unwrap().unwrap().ledger_seq,
        Some(11)
    );
    // Current state is never pruned.
    assert!(h.db.current_state().unwrap().is_some());
}
