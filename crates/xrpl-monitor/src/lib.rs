//! XRPL validator monitor.
//!
//! Two collectors poll rippled on a fast and a slow cadence, feed a
//! validation tracker and a state/alert monitor, and persist everything to
//! SQLite. The HTTP exporter renders Prometheus metrics from the store, so
//! scrapes never touch rippled directly.

pub mod alert;
pub mod collector;
pub mod config;
pub mod db;
pub mod error;
pub mod exporter;
pub mod metrics;
pub mod monitor;
pub mod probe;
pub mod routes;
pub mod sample;
pub mod state;
pub mod tracker;

pub use config::MonitorConfig;
pub use db::Database;
pub use error::{MonitorError, StoreError};
pub use state::AppState;
