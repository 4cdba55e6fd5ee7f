use actix_web::{HttpResponse, ResponseError};
use rippled_client::UpstreamError;
use rusqlite::ErrorCode;

use crate::config::ConfigError;

/// Store failures, classified by how the caller should react.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Lock wait exhausted (`SQLITE_BUSY` / `SQLITE_LOCKED`). Retryable.
    #[error("store contention: {0}")]
    Contention(rusqlite::Error),

    /// Integrity failure. Fatal to the affected query only.
    #[error("store corruption: {0}")]
    Corruption(rusqlite::Error),

    #[error("database error: {0}")]
    Sqlite(rusqlite::Error),

    #[error("database lock poisoned")]
    LockPoisoned,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn is_contention(&self) -> bool {
        matches!(self, StoreError::Contention(_))
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, StoreError::Corruption(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(ref err, _) = e {
            match err.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                    return StoreError::Contention(e);
                }
                ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase => {
                    return StoreError::Corruption(e);
                }
                _ => {}
            }
        }
        StoreError::Sqlite(e)
    }
}

/// Top-level error for the monitor process.
///
/// Only `Config` and store initialisation failures are allowed to end the
/// process; everything else is handled inside the tick that produced it.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("malformed sample: {0}")]
    Malformed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ResponseError for MonitorError {
    fn error_response(&self) -> HttpResponse {
        match self {
            MonitorError::Store(e) => {
                tracing::error!("Store error: {}", e);
                HttpResponse::ServiceUnavailable().json(serde_json::json!({
                    "error": "store_unavailable",
                    "message": "The metrics store could not be read"
                }))
            }
            other => {
                tracing::error!("Internal error: {}", other);
                HttpResponse::InternalServerError().json(serde_json::json!({
                    "error": "internal_error",
                    "message": "An internal error occurred"
                }))
            }
        }
    }
}
