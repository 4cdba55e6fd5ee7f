use serde_json::Value;
use std::future::Future;
use std::time::{Duration, Instant};

use crate::error::UpstreamError;
use crate::transport::Transport;
use crate::types::{FeeInfo, Peer, PeerSummary, ServerInfo};

/// Read-only view of a rippled admin interface.
///
/// Implementations apply their own bounded timeout and never retry.
pub trait RippledApi: Send + Sync {
    /// `server_info`: state, validated ledger, peers, load, quorum.
    fn fetch_server_state(
        &self,
    ) -> impl Future<Output = Result<ServerInfo, UpstreamError>> + Send;

    /// `peers`, summarised.
    fn fetch_peers(&self) -> impl Future<Output = Result<PeerSummary, UpstreamError>> + Send;

    /// `fee`: open ledger size and transaction queue depth.
    fn fetch_fee(&self) -> impl Future<Output = Result<FeeInfo, UpstreamError>> + Send;
}

/// rippled admin client over a [`Transport`].
#[derive(Debug, Clone)]
pub struct RippledClient {
    transport: Transport,
    timeout: Duration,
}

impl RippledClient {
    pub fn new(transport: Transport, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one command under the client timeout and unwrap the `result` envelope.
    async fn call(&self, method: &str) -> Result<Value, UpstreamError> {
        let started = Instant::now();
        let result = match tokio::time::timeout(self.timeout, self.transport.send(method)).await {
            Ok(sent) => sent.and_then(|raw| unwrap_result(method, raw)),
            Err(_) => Err(UpstreamError::Timeout(self.timeout)),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => tracing::debug!(method, elapsed_ms, "rippled call succeeded"),
            Err(e) => tracing::debug!(method, elapsed_ms, kind = e.kind(), error = %e, "rippled call failed"),
        }
        result
    }
}

impl RippledApi for RippledClient {
    async fn fetch_server_state(&self) -> Result<ServerInfo, UpstreamError> {
        let mut result = self.call("server_info").await?;
        let info = result
            .get_mut("info")
            .map(Value::take)
            .ok_or_else(|| UpstreamError::MalformedResponse("server_info: missing info".into()))?;
        Ok(serde_json::from_value(info)?)
    }

    async fn fetch_peers(&self) -> Result<PeerSummary, UpstreamError> {
        let mut result = self.call("peers").await?;
        let peers: Vec<Peer> = match result.get_mut("peers").map(Value::take) {
            Some(Value::Null) | None => Vec::new(),
            Some(list) => serde_json::from_value(list)?,
        };
        Ok(PeerSummary::from_peers(&peers))
    }

    async fn fetch_fee(&self) -> Result<FeeInfo, UpstreamError> {
        let result = self.call("fee").await?;
        Ok(serde_json::from_value(result)?)
    }
}

/// Extract `result` from a rippled response, surfacing error statuses.
pub(crate) fn unwrap_result(method: &str, mut raw: Value) -> Result<Value, UpstreamError> {
    let result = raw
        .get_mut("result")
        .map(Value::take)
        .ok_or_else(|| UpstreamError::MalformedResponse(format!("{method}: missing result")))?;

    if !result.is_object() {
        return Err(UpstreamError::MalformedResponse(format!(
            "{method}: result is not an object"
        )));
    }

    if result.get("status").and_then(Value::as_str) == Some("error") {
        let message = result
            .get("error_message")
            .or_else(|| result.get("error"))
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(UpstreamError::MalformedResponse(format!(
            "{method}: rippled returned error: {message}"
        )));
    }

    Ok(result)
}
