//! rippled operating states.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The `server_state` values rippled reports, in their numeric order.
///
/// `validating` and `proposing` (codes 5 and 6) are rarely observed on some
/// releases; they are treated like every other state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    Disconnected = 0,
    Connected = 1,
    Syncing = 2,
    Tracking = 3,
    Full = 4,
    Validating = 5,
    Proposing = 6,
}

impl ServerState {
    pub const ALL: [ServerState; 7] = [
        ServerState::Disconnected,
        ServerState::Connected,
        ServerState::Syncing,
        ServerState::Tracking,
        ServerState::Full,
        ServerState::Validating,
        ServerState::Proposing,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: i64) -> Option<Self> {
        usize::try_from(code)
            .ok()
            .and_then(|idx| Self::ALL.get(idx).copied())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ServerState::Disconnected => "disconnected",
            ServerState::Connected => "connected",
            ServerState::Syncing => "syncing",
            ServerState::Tracking => "tracking",
            ServerState::Full => "full",
            ServerState::Validating => "validating",
            ServerState::Proposing => "proposing",
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown server state: {0:?}")]
pub struct UnknownState(pub String);

impl FromStr for ServerState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == lowered)
            .ok_or_else(|| UnknownState(s.to_string()))
    }
}
