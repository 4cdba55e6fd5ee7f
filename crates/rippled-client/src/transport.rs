//! The two ways of reaching a rippled admin interface.

use serde_json::Value;
use std::time::Duration;

use crate::error::UpstreamError;

/// How admin commands reach rippled.
#[derive(Debug, Clone)]
pub enum Transport {
    /// JSON-RPC POST to the admin port (e.g. `http://127.0.0.1:5005`).
    Http { client: reqwest::Client, url: String },
    /// `docker exec <container> rippled <method>` against a containerised node.
    DockerExec { container: String },
}

impl Transport {
    pub fn http(url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to the default HTTP client");
                reqwest::Client::new()
            });
        Transport::Http {
            client,
            url: url.into(),
        }
    }

    pub fn docker(container: impl Into<String>) -> Self {
        Transport::DockerExec {
            container: container.into(),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Transport::Http { url, .. } => format!("http {url}"),
            Transport::DockerExec { container } => format!("docker exec {container}"),
        }
    }

    /// Issue one admin command and return the raw response document.
    pub(crate) async fn send(&self, method: &str) -> Result<Value, UpstreamError> {
        match self {
            Transport::Http { client, url } => {
                let body = serde_json::json!({ "method": method, "params": [{}] });
                let resp = client
                    .post(url)
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| UpstreamError::Unreachable(format!("{method}: {e}")))?;

                if !resp.status().is_success() {
                    return Err(UpstreamError::Unreachable(format!(
                        "{method}: HTTP {}",
                        resp.status()
                    )));
                }

                let bytes = resp
                    .bytes()
                    .await
                    .map_err(|e| UpstreamError::Unreachable(format!("{method}: {e}")))?;
                Ok(serde_json::from_slice(&bytes)?)
            }
            Transport::DockerExec { container } => {
                let output = tokio::process::Command::new("docker")
                    .args(["exec", container.as_str(), "rippled", method])
                    .kill_on_drop(true)
                    .output()
                    .await
                    .map_err(|e| UpstreamError::Unreachable(format!("docker exec: {e}")))?;

                if !output.status.success() {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    return Err(UpstreamError::Unreachable(format!(
                        "docker exec {container} rippled {method} exited with {}: {}",
                        output.status,
                        stderr.trim()
                    )));
                }

                parse_cli_output(&output.stdout)
            }
        }
    }
}

/// The rippled CLI may print a banner before the JSON document.
fn parse_cli_output(stdout: &[u8]) -> Result<Value, UpstreamError> {
    let start = stdout
        .iter()
        .position(|b| *b == b'{')
        .ok_or_else(|| UpstreamError::MalformedResponse("no JSON object in output".into()))?;
    Ok(serde_json::from_slice(&stdout[start..])?)
}
