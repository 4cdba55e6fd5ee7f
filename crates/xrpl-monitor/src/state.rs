use crate::db::Database;
use crate::metrics::Counters;
use std::sync::Arc;

/// Shared application state for the exporter's HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub counters: Arc<Counters>,
    pub started_at_ms: i64,
}

impl AppState {
    pub fn new(db: Database, counters: Arc<Counters>) -> Self {
        Self {
            db,
            counters,
            started_at_ms: chrono::Utc::now().timestamp_millis(),
        }
    }
}
