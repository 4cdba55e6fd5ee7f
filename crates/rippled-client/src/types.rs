//! Typed views of the rippled admin responses the monitor consumes.
//!
//! Only the fields the monitor reads are modelled; everything else in the
//! upstream documents is ignored by serde. rippled encodes several counters
//! as decimal strings, so those fields accept either representation.

use std::collections::BTreeMap;

use serde::{de, Deserialize, Deserializer};

/// `server_info` -> `result.info`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerInfo {
    pub server_state: String,
    #[serde(default)]
    pub validated_ledger: Option<ValidatedLedger>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub peers: Option<u64>,
    #[serde(default)]
    pub load_factor: Option<f64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub validation_quorum: Option<u64>,
    #[serde(default)]
    pub last_close: Option<LastClose>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub io_latency_ms: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub uptime: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub jq_trans_overflow: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub server_state_duration_us: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub initial_sync_duration_us: Option<u64>,
    /// Cumulative since rippled started.
    #[serde(default, deserialize_with = "lenient_u64")]
    pub peer_disconnects: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub peer_disconnects_resources: Option<u64>,
    /// Time spent in, and entries into, each server state since start.
    #[serde(default)]
    pub state_accounting: Option<BTreeMap<String, StateAccounting>>,
    #[serde(default)]
    pub build_version: Option<String>,
    #[serde(default)]
    pub pubkey_validator: Option<String>,
    #[serde(default)]
    pub node_size: Option<String>,
    #[serde(default)]
    pub complete_ledgers: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ValidatedLedger {
    #[serde(deserialize_with = "required_u64")]
    pub seq: u64,
    pub hash: String,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub age: Option<u64>,
    #[serde(default)]
    pub base_fee_xrp: Option<f64>,
    #[serde(default)]
    pub reserve_base_xrp: Option<f64>,
    #[serde(default)]
    pub reserve_inc_xrp: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct StateAccounting {
    #[serde(default, deserialize_with = "lenient_u64")]
    pub duration_us: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub transitions: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LastClose {
    #[serde(default, deserialize_with = "lenient_u64")]
    pub proposers: Option<u64>,
    #[serde(default)]
    pub converge_time_s: Option<f64>,
}

/// One entry of `peers` -> `result.peers`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Peer {
    /// Only present (and true) for inbound connections.
    #[serde(default)]
    pub inbound: Option<bool>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub latency: Option<u64>,
    #[serde(default)]
    pub sanity: Option<String>,
}

/// Aggregated view of the peer table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PeerSummary {
    pub total: u32,
    pub inbound: u32,
    pub outbound: u32,
    pub insane: u32,
    /// Nearest-rank 90th percentile of the reported peer latencies.
    pub latency_p90_ms: Option<u64>,
}

impl PeerSummary {
    pub fn from_peers(peers: &[Peer]) -> Self {
        let mut summary = PeerSummary::default();
        let mut latencies = Vec::with_capacity(peers.len());

        for peer in peers {
            summary.total += 1;
            if peer.inbound.unwrap_or(false) {
                summary.inbound += 1;
            } else {
                summary.outbound += 1;
            }
            if peer.sanity.as_deref() == Some("insane") {
                summary.insane += 1;
            }
            if let Some(latency) = peer.latency {
                latencies.push(latency);
            }
        }

        summary.latency_p90_ms = percentile(&mut latencies, 0.90);
        summary
    }
}

fn percentile(values: &mut [u64], p: f64) -> Option<u64> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable();
    let idx = ((values.len() as f64 * p) as usize).min(values.len() - 1);
    Some(values[idx])
}

/// `fee` -> `result`.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct FeeInfo {
    #[serde(default, deserialize_with = "lenient_u64")]
    pub current_ledger_size: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub current_queue_size: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub expected_ledger_size: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub max_queue_size: Option<u64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumOrString {
    Num(u64),
    Str(String),
}

impl NumOrString {
    fn into_u64<E: de::Error>(self) -> Result<u64, E> {
        match self {
            NumOrString::Num(n) => Ok(n),
            NumOrString::Str(s) => s
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("expected unsigned integer, got {s:?}"))),
        }
    }
}

fn lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<NumOrString>::deserialize(deserializer)?
        .map(NumOrString::into_u64)
        .transpose()
}

fn required_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    NumOrString::deserialize(deserializer)?.into_u64()
}
