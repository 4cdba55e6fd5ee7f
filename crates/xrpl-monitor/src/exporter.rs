//! Prometheus text rendering from the durable store.
//!
//! Each scrape builds a throwaway registry of gauges from a fresh read-only
//! connection, then appends the process counters. Every metric family is
//! filled from its own query; a failing query omits only that family.

use prometheus::{Encoder, Gauge, GaugeVec, IntCounter, Opts, Registry, TextEncoder};

use rippled_client::ServerState;

use crate::db::{Database, StoreReader};
use crate::error::StoreError;
use crate::metrics::Counters;
use crate::tracker::{DAY, HOUR};

struct Families {
    registry: Registry,
}

impl Families {
    fn new() -> Self {
        Self {
            registry: Registry::new(),
        }
    }

    fn gauge(&self, name: &str, help: &str, value: f64) {
        let result = Gauge::new(name, help).and_then(|g| {
            g.set(value);
            self.registry.register(Box::new(g))
        });
        if let Err(e) = result {
            tracing::warn!(metric = name, error = %e, "Failed to build gauge");
        }
    }

    fn gauge_opt<T: Into<f64>>(&self, name: &str, help: &str, value: Option<T>) {
        if let Some(v) = value {
            self.gauge(name, help, v.into());
        }
    }

    /// Cumulative counts read back from the store keep counter semantics.
    fn counter_opt(&self, name: &str, help: &str, value: Option<u64>) {
        let Some(value) = value else {
            return;
        };
        let result = IntCounter::new(name, help).and_then(|c| {
            c.inc_by(value);
            self.registry.register(Box::new(c))
        });
        if let Err(e) = result {
            tracing::warn!(metric = name, error = %e, "Failed to build counter");
        }
    }

    fn labelled(&self, name: &str, help: &str, labels: &[&str], rows: &[(Vec<&str>, f64)]) {
        let result = GaugeVec::new(Opts::new(name, help), labels).and_then(|g| {
            for (values, v) in rows {
                g.with_label_values(values.as_slice()).set(*v);
            }
            self.registry.register(Box::new(g))
        });
        if let Err(e) = result {
            tracing::warn!(metric = name, error = %e, "Failed to build gauge vector");
        }
    }
}

fn omitted(what: &str, e: &StoreError) {
    tracing::warn!(query = what, error = %e, "Store query failed, omitting metric family");
}

fn secs_between(earlier_ms: i64, later_ms: i64) -> f64 {
    (later_ms - earlier_ms).max(0) as f64 / 1000.0
}

fn collect_store(f: &Families, reader: &StoreReader, now_ms: i64) {
    let latest = match reader.latest_snapshot() {
        Ok(s) => s,
        Err(e) => {
            omitted("latest_snapshot", &e);
            None
        }
    };

    if let Some(s) = &latest {
        f.gauge(
            "xrpl_validator_state_value",
            "Validator state code: 0=disconnected 1=connected 2=syncing 3=tracking 4=full 5=validating 6=proposing",
            f64::from(s.state.code()),
        );
        f.gauge_opt("xrpl_ledger_sequence", "Latest validated ledger sequence", s.ledger_seq);
        f.gauge_opt("xrpl_ledger_age_seconds", "Age of the latest validated ledger", s.ledger_age_secs);
        f.gauge("xrpl_peer_count", "Connected peers", f64::from(s.peers_total));
        f.gauge_opt("xrpl_peers_inbound", "Inbound peer connections", s.peers_inbound);
        f.gauge_opt("xrpl_peers_outbound", "Outbound peer connections", s.peers_outbound);
        f.gauge_opt("xrpl_peer_latency_p90_ms", "90th percentile peer latency", s.peer_latency_p90_ms);
        f.gauge("xrpl_load_factor", "Server load factor", s.load_factor);
        f.gauge_opt("xrpl_validation_quorum", "Validations required for quorum", s.validation_quorum);
        f.gauge_opt("xrpl_proposers", "Proposers in the last closed ledger", s.proposers);
        f.gauge_opt(
            "xrpl_consensus_converge_time_seconds",
            "Consensus convergence time of the last close",
            s.converge_time_secs,
        );
        f.gauge_opt(
            "xrpl_validator_uptime_seconds",
            "rippled process uptime",
            s.uptime_secs.map(|v| v as f64),
        );
        f.gauge_opt("xrpl_peers_insane", "Peers on a different ledger", s.peers_insane);
        f.gauge_opt(
            "xrpl_server_state_duration_seconds",
            "Time in the current state as reported by rippled",
            s.state_duration_secs,
        );
        f.gauge_opt("xrpl_base_fee_xrp", "Network base transaction fee (XRP)", s.base_fee_xrp);
        f.gauge_opt("xrpl_reserve_base_xrp", "Base account reserve (XRP)", s.reserve_base_xrp);
        f.gauge_opt("xrpl_reserve_inc_xrp", "Owner reserve increment (XRP)", s.reserve_inc_xrp);
        f.gauge(
            "xrpl_snapshot_age_seconds",
            "Seconds since the latest stored snapshot",
            secs_between(s.timestamp_ms, now_ms),
        );
    }

    match reader.last_poll_gap("fast") {
        Ok(gap) => {
            let last_ok = latest.as_ref().map(|s| s.timestamp_ms);
            let last_gap = gap.map(|g| g.timestamp_ms);
            let up = match (last_ok, last_gap) {
                (None, None) => None,
                (Some(_), None) => Some(1.0),
                (None, Some(_)) => Some(0.0),
                (Some(ok), Some(gap)) => Some(if ok > gap { 1.0 } else { 0.0 }),
            };
            f.gauge_opt("xrpl_upstream_up", "Whether the latest fast poll succeeded", up);
        }
        Err(e) => omitted("last_poll_gap", &e),
    }

    match reader.current_state() {
        Ok(Some(current)) => {
            f.gauge(
                "xrpl_time_in_current_state_seconds",
                "Seconds since the last state transition",
                secs_between(current.entered_at_ms, now_ms),
            );
            let rows: Vec<(Vec<&str>, f64)> = ServerState::ALL
                .iter()
                .map(|s| (vec![s.as_str()], if *s == current.state { 1.0 } else { 0.0 }))
                .collect();
            f.labelled("xrpl_validator_state", "Current validator state (one-hot)", &["state"], &rows);
        }
        Ok(None) => {}
        Err(e) => omitted("current_state", &e),
    }

    for (suffix, window) in [("1h", HOUR), ("24h", DAY)] {
        match reader.validation_counts_since(now_ms - window.as_millis() as i64) {
            Ok(counts) => {
                f.gauge(
                    &format!("xrpl_validation_agreements_{suffix}"),
                    &format!("Ledgers validated in agreement over {suffix}"),
                    counts.agreed as f64,
                );
                f.gauge(
                    &format!("xrpl_validation_missed_{suffix}"),
                    &format!("Ledgers missed over {suffix}"),
                    counts.missed as f64,
                );
                f.gauge(
                    &format!("xrpl_validation_agreement_pct_{suffix}"),
                    &format!("Agreement percentage over {suffix}, NaN when no ledgers were observed"),
                    counts.rate().as_gauge(),
                );
            }
            Err(e) => omitted("validation_counts", &e),
        }
    }

    match reader.latest_aggregate() {
        Ok(Some(a)) => {
            f.gauge("xrpl_host_cpu_percent", "Host CPU utilisation", a.cpu_percent);
            f.gauge("xrpl_host_memory_used_bytes", "Host memory in use", a.memory_used_bytes as f64);
            f.gauge("xrpl_host_memory_total_bytes", "Host memory installed", a.memory_total_bytes as f64);
            f.gauge_opt(
                "xrpl_ledger_db_bytes",
                "Size of the rippled data directory",
                a.disk_used_bytes.map(|v| v as f64),
            );
            f.gauge_opt("xrpl_io_latency_ms", "rippled reported I/O latency", a.io_latency_ms);
            f.gauge_opt("xrpl_tx_queue_depth", "Transactions waiting in the queue", a.queue_depth);
            f.gauge_opt(
                "xrpl_open_ledger_transactions",
                "Transactions in the current open ledger",
                a.open_ledger_size,
            );
            f.counter_opt(
                "xrpl_job_queue_overflow_total",
                "Transaction job queue overflows reported by rippled",
                a.job_queue_overflow,
            );
            f.gauge_opt("xrpl_transaction_rate", "Transactions per second", a.transaction_rate);
            f.gauge_opt(
                "xrpl_initial_sync_duration_seconds",
                "Time rippled took to reach full after start",
                a.initial_sync_secs,
            );
            f.counter_opt("xrpl_peer_disconnects_total", "Peer disconnections", a.peer_disconnects);
            f.counter_opt(
                "xrpl_peer_disconnects_resources_total",
                "Peer disconnections due to resource limits",
                a.peer_disconnects_resources,
            );
            f.gauge(
                "xrpl_aggregate_age_seconds",
                "Seconds since the latest stored resource sample",
                secs_between(a.timestamp_ms, now_ms),
            );
        }
        Ok(None) => {}
        Err(e) => omitted("latest_aggregate", &e),
    }

    match reader.state_accounting() {
        Ok(entries) if !entries.is_empty() => {
            let durations: Vec<(Vec<&str>, f64)> = entries
                .iter()
                .map(|e| (vec![e.state.as_str()], e.duration_secs))
                .collect();
            let transitions: Vec<(Vec<&str>, f64)> = entries
                .iter()
                .map(|e| (vec![e.state.as_str()], e.transitions as f64))
                .collect();
            f.labelled(
                "xrpl_state_accounting_duration_seconds",
                "Time rippled has spent in each state since start",
                &["state"],
                &durations,
            );
            f.labelled(
                "xrpl_state_accounting_transitions",
                "Entries into each state since start",
                &["state"],
                &transitions,
            );
        }
        Ok(_) => {}
        Err(e) => omitted("state_accounting", &e),
    }

    match reader.node_info() {
        Ok(Some(info)) => {
            let build = info.build_version.as_deref().unwrap_or("");
            let pubkey = info.pubkey_validator.as_deref().unwrap_or("");
            let size = info.node_size.as_deref().unwrap_or("");
            f.labelled(
                "xrpl_server_info",
                "rippled build and identity",
                &["build_version", "pubkey_validator", "node_size"],
                &[(vec![build, pubkey, size], 1.0)],
            );
        }
        Ok(None) => {}
        Err(e) => omitted("node_info", &e),
    }
}

/// Render the full exposition for one scrape.
pub fn render(
    db: &Database,
    counters: &Counters,
    started_at_ms: i64,
    now_ms: i64,
) -> Result<String, prometheus::Error> {
    let families = Families::new();

    match db.reader() {
        Ok(reader) => collect_store(&families, &reader, now_ms),
        Err(e) => omitted("open_reader", &e),
    }

    families.gauge(
        "xrpl_monitor_uptime_seconds",
        "Seconds since the monitor process started",
        secs_between(started_at_ms, now_ms),
    );

    let mut metric_families = families.registry.gather();
    metric_families.extend(counters.registry().gather());

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
