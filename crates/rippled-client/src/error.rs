use thiserror::Error;

/// Errors returned by a single upstream call.
///
/// The client never retries; the caller decides what a failure means for
/// its cadence.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("rippled unreachable: {0}")]
    Unreachable(String),

    #[error("rippled call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("malformed rippled response: {0}")]
    MalformedResponse(String),
}

impl UpstreamError {
    /// Short label used for logs, gap records and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamError::Unreachable(_) => "unreachable",
            UpstreamError::Timeout(_) => "timeout",
            UpstreamError::MalformedResponse(_) => "malformed",
        }
    }
}

impl From<serde_json::Error> for UpstreamError {
    fn from(e: serde_json::Error) -> Self {
        UpstreamError::MalformedResponse(e.to_string())
    }
}
