//! Strongly typed samples produced by the collectors.
//!
//! Upstream documents are validated here before anything reaches the
//! tracker, the monitor or the store.

use rippled_client::{FeeInfo, PeerSummary, ServerInfo, ServerState};
use serde::{Deserialize, Serialize};

use crate::probe::HostResources;

/// One fast-cadence observation of the validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp_ms: i64,
    pub state: ServerState,
    /// Absent while the node has no ledger to report (disconnected, early sync).
    pub ledger_seq: Option<u32>,
    pub ledger_hash: Option<String>,
    pub ledger_age_secs: Option<u32>,
    pub peers_total: u32,
    /// Peer detail fields are absent when the `peers` call failed.
    pub peers_inbound: Option<u32>,
    pub peers_outbound: Option<u32>,
    pub peer_latency_p90_ms: Option<u32>,
    /// Peers reporting a ledger other than ours.
    pub peers_insane: Option<u32>,
    pub load_factor: f64,
    pub validation_quorum: Option<u32>,
    pub proposers: Option<u32>,
    pub converge_time_secs: Option<f64>,
    pub uptime_secs: Option<u64>,
    /// Time in the current state as reported by rippled.
    pub state_duration_secs: Option<f64>,
    pub base_fee_xrp: Option<f64>,
    pub reserve_base_xrp: Option<f64>,
    pub reserve_inc_xrp: Option<f64>,
}

/// One slow-cadence resource/utilisation sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSample {
    pub timestamp_ms: i64,
    pub cpu_percent: f64,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    /// Size of the rippled data directory, when configured and readable.
    pub disk_used_bytes: Option<u64>,
    pub io_latency_ms: Option<u32>,
    /// Transactions waiting in the queue (`fee.current_queue_size`).
    pub queue_depth: Option<u32>,
    /// Transactions in the open ledger (`fee.current_ledger_size`).
    pub open_ledger_size: Option<u32>,
    pub job_queue_overflow: Option<u64>,
    /// Open ledger size spread over the average close interval.
    pub transaction_rate: Option<f64>,
    pub initial_sync_secs: Option<f64>,
    /// Cumulative counts since rippled started.
    pub peer_disconnects: Option<u64>,
    pub peer_disconnects_resources: Option<u64>,
}

/// Average ledger close interval used to turn ledger size into a rate.
const AVERAGE_CLOSE_SECS: f64 = 3.5;

fn micros_to_secs(us: Option<u64>) -> Option<f64> {
    us.map(|us| us as f64 / 1_000_000.0)
}

fn xrp_amount(field: &'static str, value: Option<f64>) -> Result<Option<f64>, SampleError> {
    match value {
        Some(v) if !v.is_finite() || v < 0.0 => Err(SampleError::OutOfRange {
            field,
            value: v.to_string(),
        }),
        other => Ok(other),
    }
}

/// Per-state counters from `server_info.state_accounting`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateAccountingEntry {
    pub state: ServerState,
    pub duration_secs: f64,
    pub transitions: u64,
}

impl StateAccountingEntry {
    /// Entries for the states we know, in state order. Unknown names are
    /// skipped with a debug log.
    pub fn from_server_info(info: &ServerInfo) -> Vec<Self> {
        let Some(accounting) = &info.state_accounting else {
            return Vec::new();
        };
        let mut entries: Vec<Self> = accounting
            .iter()
            .filter_map(|(name, counters)| match name.parse::<ServerState>() {
                Ok(state) => Some(StateAccountingEntry {
                    state,
                    duration_secs: micros_to_secs(counters.duration_us).unwrap_or(0.0),
                    transitions: counters.transitions.unwrap_or(0),
                }),
                Err(_) => {
                    tracing::debug!(state = %name, "Ignoring state_accounting entry");
                    None
                }
            })
            .collect();
        entries.sort_by_key(|e| e.state);
        entries
    }
}

/// Why a response was rejected as a sample.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SampleError {
    #[error("unknown server state {0:?}")]
    UnknownState(String),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("field {field} out of range: {value}")]
    OutOfRange { field: &'static str, value: String },

    #[error("ledger sequence went backwards: {previous} -> {current}")]
    SequenceRegressed { previous: u32, current: u32 },
}

fn to_u32(field: &'static str, value: u64) -> Result<u32, SampleError> {
    u32::try_from(value).map_err(|_| SampleError::OutOfRange {
        field,
        value: value.to_string(),
    })
}

fn opt_u32(field: &'static str, value: Option<u64>) -> Result<Option<u32>, SampleError> {
    value.map(|v| to_u32(field, v)).transpose()
}

impl Snapshot {
    /// Validate a `server_info` document (plus optional peer detail) into a snapshot.
    ///
    /// `previous_seq` is the last accepted ledger sequence from the same
    /// collector; the validated sequence may stay equal but never go back.
    pub fn from_server_info(
        info: &ServerInfo,
        peers: Option<&PeerSummary>,
        previous_seq: Option<u32>,
        timestamp_ms: i64,
    ) -> Result<Self, SampleError> {
        let state: ServerState = info
            .server_state
            .parse()
            .map_err(|_| SampleError::UnknownState(info.server_state.clone()))?;

        let ledger = info.validated_ledger.as_ref();
        if ledger.is_none() && state >= ServerState::Full {
            return Err(SampleError::MissingField("validated_ledger"));
        }

        let ledger_seq = match ledger {
            Some(l) => {
                let seq = to_u32("validated_ledger.seq", l.seq)?;
                if seq == 0 {
                    return Err(SampleError::OutOfRange {
                        field: "validated_ledger.seq",
                        value: "0".to_string(),
                    });
                }
                if let Some(previous) = previous_seq {
                    if seq < previous {
                        return Err(SampleError::SequenceRegressed {
                            previous,
                            current: seq,
                        });
                    }
                }
                Some(seq)
            }
            None => None,
        };

        let ledger_hash = match ledger {
            Some(l) if l.hash.trim().is_empty() => {
                return Err(SampleError::MissingField("validated_ledger.hash"))
            }
            Some(l) => Some(l.hash.clone()),
            None => None,
        };

        let peers_total = info.peers.ok_or(SampleError::MissingField("peers"))?;
        let peers_total = to_u32("peers", peers_total)?;

        let load_factor = info
            .load_factor
            .ok_or(SampleError::MissingField("load_factor"))?;
        if !load_factor.is_finite() || load_factor < 0.0 {
            return Err(SampleError::OutOfRange {
                field: "load_factor",
                value: load_factor.to_string(),
            });
        }

        let converge_time_secs = info.last_close.as_ref().and_then(|c| c.converge_time_s);
        if let Some(t) = converge_time_secs {
            if !t.is_finite() || t < 0.0 {
                return Err(SampleError::OutOfRange {
                    field: "last_close.converge_time_s",
                    value: t.to_string(),
                });
            }
        }

        Ok(Snapshot {
            timestamp_ms,
            state,
            ledger_seq,
            ledger_hash,
            ledger_age_secs: opt_u32("validated_ledger.age", ledger.and_then(|l| l.age))?,
            peers_total,
            peers_inbound: peers.map(|p| p.inbound),
            peers_outbound: peers.map(|p| p.outbound),
            peer_latency_p90_ms: opt_u32(
                "peers.latency",
                peers.and_then(|p| p.latency_p90_ms),
            )?,
            peers_insane: peers.map(|p| p.insane),
            load_factor,
            validation_quorum: opt_u32("validation_quorum", info.validation_quorum)?,
            proposers: opt_u32(
                "last_close.proposers",
                info.last_close.as_ref().and_then(|c| c.proposers),
            )?,
            converge_time_secs,
            uptime_secs: info.uptime,
            state_duration_secs: micros_to_secs(info.server_state_duration_us),
            base_fee_xrp: xrp_amount("validated_ledger.base_fee_xrp", ledger.and_then(|l| l.base_fee_xrp))?,
            reserve_base_xrp: xrp_amount(
                "validated_ledger.reserve_base_xrp",
                ledger.and_then(|l| l.reserve_base_xrp),
            )?,
            reserve_inc_xrp: xrp_amount(
                "validated_ledger.reserve_inc_xrp",
                ledger.and_then(|l| l.reserve_inc_xrp),
            )?,
        })
    }
}

impl AggregateSample {
    /// Combine host resources with whatever the upstream calls returned.
    pub fn collect(
        timestamp_ms: i64,
        host: &HostResources,
        info: Option<&ServerInfo>,
        fee: Option<&FeeInfo>,
    ) -> Result<Self, SampleError> {
        if !host.cpu_percent.is_finite() || host.cpu_percent < 0.0 {
            return Err(SampleError::OutOfRange {
                field: "cpu_percent",
                value: host.cpu_percent.to_string(),
            });
        }

        Ok(AggregateSample {
            timestamp_ms,
            cpu_percent: host.cpu_percent,
            memory_used_bytes: host.memory_used_bytes,
            memory_total_bytes: host.memory_total_bytes,
            disk_used_bytes: host.disk_used_bytes,
            io_latency_ms: opt_u32("io_latency_ms", info.and_then(|i| i.io_latency_ms))?,
            queue_depth: opt_u32(
                "fee.current_queue_size",
                fee.and_then(|f| f.current_queue_size),
            )?,
            open_ledger_size: opt_u32(
                "fee.current_ledger_size",
                fee.and_then(|f| f.current_ledger_size),
            )?,
            job_queue_overflow: info.and_then(|i| i.jq_trans_overflow),
            transaction_rate: fee
                .and_then(|f| f.current_ledger_size)
                .map(|size| size as f64 / AVERAGE_CLOSE_SECS),
            initial_sync_secs: micros_to_secs(info.and_then(|i| i.initial_sync_duration_us)),
            peer_disconnects: info.and_then(|i| i.peer_disconnects),
            peer_disconnects_resources: info.and_then(|i| i.peer_disconnects_resources),
        })
    }
}
