#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rippled_client::{FeeInfo, PeerSummary, RippledApi, ServerInfo, UpstreamError};
use serde_json::json;

use xrpl_monitor::alert::MemorySink;
use xrpl_monitor::collector::CollectorContext;
use xrpl_monitor::config::AlertThresholds;
use xrpl_monitor::db::Database;
use xrpl_monitor::metrics::Counters;
use xrpl_monitor::probe::{HostResources, ResourceProbe};

/// One scripted `server_info` reply.
#[derive(Clone)]
pub enum Reply {
    Info(ServerInfo),
    Timeout,
    Unreachable,
    Malformed,
}

/// rippled stand-in that replays a script; the last reply repeats.
#[derive(Default)]
pub struct ScriptedApi {
    replies: Mutex<VecDeque<Reply>>,
    last: Mutex<Option<Reply>>,
    pub peers_fail: std::sync::atomic::AtomicBool,
}

impl ScriptedApi {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            ..Default::default()
        }
    }

    pub fn push(&self, reply: Reply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    fn next(&self) -> Reply {
        let mut last = self.last.lock().unwrap();
        if let Some(reply) = self.replies.lock().unwrap().pop_front() {
            *last = Some(reply);
        }
        last.clone().unwrap_or(Reply::Unreachable)
    }

    fn current_info(&self) -> Option<ServerInfo> {
        match self.last.lock().unwrap().clone() {
            Some(Reply::Info(info)) => Some(info),
            _ => None,
        }
    }
}

fn to_error(reply: &Reply) -> UpstreamError {
    match reply {
        Reply::Timeout => UpstreamError::Timeout(Duration::from_secs(8)),
        Reply::Malformed => UpstreamError::MalformedResponse("server_info: missing info".into()),
        _ => UpstreamError::Unreachable("connection refused".into()),
    }
}

impl RippledApi for ScriptedApi {
    async fn fetch_server_state(&self) -> Result<ServerInfo, UpstreamError> {
        match self.next() {
            Reply::Info(info) => Ok(info),
            other => Err(to_error(&other)),
        }
    }

    async fn fetch_peers(&self) -> Result<PeerSummary, UpstreamError> {
        if self.peers_fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(UpstreamError::Unreachable("peers refused".into()));
        }
        let total = self
            .current_info()
            .and_then(|i| i.peers)
            .unwrap_or_default() as u32;
        Ok(PeerSummary {
            total,
            inbound: total / 2,
            outbound: total - total / 2,
            insane: 0,
            latency_p90_ms: Some(120),
        })
    }

    async fn fetch_fee(&self) -> Result<FeeInfo, UpstreamError> {
        match self.current_info() {
            Some(_) => Ok(serde_json::from_value(json!({
                "current_ledger_size": "42",
                "current_queue_size": "3",
                "expected_ledger_size": "100",
                "max_queue_size": "2000"
            }))
            .unwrap()),
            None => Err(UpstreamError::Unreachable("connection refused".into())),
        }
    }
}

pub fn info(state: &str, seq: u64, peers: u64) -> Reply {
    Reply::Info(
        serde_json::from_value(json!({
            "server_state": state,
            "peers": peers,
            "load_factor": 1,
            "validation_quorum": 28,
            "io_latency_ms": 1,
            "uptime": 3600,
            "build_version": "2.2.3",
            "pubkey_validator": "nHBtest",
            "node_size": "medium",
            "complete_ledgers": "32570-90000000",
            "peer_disconnects": "25",
            "peer_disconnects_resources": "2",
            "initial_sync_duration_us": "300000000",
            "state_accounting": {
                "full": { "duration_us": "5000000", "transitions": "2" },
                "proposing": { "duration_us": "3595000000", "transitions": "1" }
            },
            "validated_ledger": { "seq": seq, "hash": format!("{seq:064X}"), "age": 2 },
            "last_close": { "proposers": 34, "converge_time_s": 2.0 }
        }))
        .unwrap(),
    )
}

pub struct FixedProbe;

impl ResourceProbe for FixedProbe {
    fn sample(&mut self) -> HostResources {
        HostResources {
            cpu_percent: 17.5,
            memory_used_bytes: 8 << 30,
            memory_total_bytes: 32 << 30,
            disk_used_bytes: Some(500 << 30),
        }
    }
}

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub db: Database,
    pub counters: Arc<Counters>,
    pub alerts: Arc<MemorySink>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_busy_timeout(Duration::from_millis(2000))
    }

    pub fn with_busy_timeout(busy_timeout: Duration) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("monitor.db"), busy_timeout).unwrap();
        Self {
            dir,
            db,
            counters: Arc::new(Counters::new().unwrap()),
            alerts: Arc::new(MemorySink::default()),
        }
    }

    pub fn ctx(&self) -> CollectorContext {
        CollectorContext::new(self.db.clone(), self.counters.clone(), self.alerts.clone())
    }
}

pub fn thresholds() -> AlertThresholds {
    AlertThresholds {
        peer_min: 10,
        peer_sustain: Duration::from_secs(60),
        agreement_min_pct: 90.0,
        agreement_sustain: Duration::from_secs(600),
        not_proposing_sustain: Duration::from_secs(300),
        unreachable_after: 3,
    }
}
