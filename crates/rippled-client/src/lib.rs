//! Client for the rippled admin API.
//!
//! The monitor talks to a validator either over JSON-RPC on the admin port
//! or by exec-ing the `rippled` CLI inside its container. Both paths sit
//! behind [`RippledApi`] and return strongly typed documents; raw JSON never
//! leaves this crate.
//!
//! ```no_run
//! use rippled_client::{RippledApi, RippledClient, Transport};
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let timeout = Duration::from_secs(8);
//! let client = RippledClient::new(Transport::http("http://127.0.0.1:5005", timeout), timeout);
//! let info = client.fetch_server_state().await.unwrap();
//! println!("{}", info.server_state);
//! # }
//! ```

pub mod client;
pub mod error;
pub mod state;
pub mod transport;
pub mod types;

pub use client::{RippledApi, RippledClient};
pub use error::UpstreamError;
pub use state::{ServerState, UnknownState};
pub use transport::Transport;
pub use types::{FeeInfo, LastClose, Peer, PeerSummary, ServerInfo, StateAccounting, ValidatedLedger};
