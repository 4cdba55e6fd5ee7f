use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    StateChange,
    NotProposing,
    LowAgreement,
    LowPeers,
    Unreachable,
    StoreCorruption,
}

impl AlertKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertKind::StateChange => "state_change",
            AlertKind::NotProposing => "not_proposing",
            AlertKind::LowAgreement => "low_agreement",
            AlertKind::LowPeers => "low_peers",
            AlertKind::Unreachable => "unreachable",
            AlertKind::StoreCorruption => "store_corruption",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub kind: AlertKind,
    pub severity: Severity,
    /// `true` for the recovery notice that closes an earlier alert.
    pub resolved: bool,
    pub title: String,
    pub message: String,
    pub timestamp_ms: i64,
}

impl Alert {
    pub fn firing(
        kind: AlertKind,
        severity: Severity,
        title: impl Into<String>,
        message: impl Into<String>,
        timestamp_ms: i64,
    ) -> Self {
        Self {
            kind,
            severity,
            resolved: false,
            title: title.into(),
            message: message.into(),
            timestamp_ms,
        }
    }

    pub fn resolved(
        kind: AlertKind,
        title: impl Into<String>,
        message: impl Into<String>,
        timestamp_ms: i64,
    ) -> Self {
        Self {
            kind,
            severity: Severity::Info,
            resolved: true,
            title: title.into(),
            message: message.into(),
            timestamp_ms,
        }
    }
}

/// Where alerts go. Implementations must not block the caller for long.
pub trait AlertSink: Send + Sync {
    fn notify(&self, alert: &Alert);
}

/// Emits alerts as structured log events.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl AlertSink for LogSink {
    fn notify(&self, alert: &Alert) {
        let kind = alert.kind.as_str();
        match alert.severity {
            Severity::Critical => {
                tracing::error!(kind, resolved = alert.resolved, "{}: {}", alert.title, alert.message)
            }
            Severity::Warning => {
                tracing::warn!(kind, resolved = alert.resolved, "{}: {}", alert.title, alert.message)
            }
            Severity::Info => {
                tracing::info!(kind, resolved = alert.resolved, "{}: {}", alert.title, alert.message)
            }
        }
    }
}

/// Appends human-readable alert entries to a file.
///
/// Writes happen on a dedicated thread so `notify` never touches the disk
/// from an async worker. Entries land in the order they were notified.
/// Dropping the sink flushes everything queued before it.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    queue: Option<mpsc::Sender<Alert>>,
    worker: Option<JoinHandle<()>>,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (queue, pending) = mpsc::channel::<Alert>();
        let target = path.clone();
        let worker = std::thread::Builder::new()
            .name("alert-file".to_string())
            .spawn(move || {
                for alert in pending {
                    if let Err(e) = append(&target, &alert) {
                        tracing::warn!(path = %target.display(), error = %e, "failed to write alert file");
                    }
                }
            });
        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!(error = %e, "could not start alert file writer");
                None
            }
        };
        Self {
            path,
            queue: worker.is_some().then_some(queue),
            worker,
        }
    }
}

fn append(path: &Path, alert: &Alert) -> std::io::Result<()> {
    let at = chrono::DateTime::from_timestamp_millis(alert.timestamp_ms)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| alert.timestamp_ms.to_string());
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(
        file,
        "[{}] [{}] {}{}\n{}\n",
        at,
        alert.severity.as_str(),
        if alert.resolved { "RESOLVED: " } else { "" },
        alert.title,
        alert.message
    )
}

impl AlertSink for FileSink {
    fn notify(&self, alert: &Alert) {
        let delivered = self
            .queue
            .as_ref()
            .is_some_and(|queue| queue.send(alert.clone()).is_ok());
        if !delivered {
            tracing::warn!(path = %self.path.display(), kind = alert.kind.as_str(), "alert file writer unavailable, dropping entry");
        }
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        drop(self.queue.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Fire-and-forget JSON POST of each alert to every configured URL.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    urls: Vec<String>,
}

impl WebhookSink {
    pub fn new(urls: Vec<String>) -> Self {
        for url in &urls {
            if !url.starts_with("https://") {
                tracing::warn!(url = %url, "alert webhook URL does not use HTTPS");
            }
        }
        Self {
            client: reqwest::Client::new(),
            urls,
        }
    }
}

impl AlertSink for WebhookSink {
    fn notify(&self, alert: &Alert) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no async runtime available, dropping alert webhook");
            return;
        };
        let body = match serde_json::to_vec(alert) {
            Ok(b) => b,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize alert payload");
                return;
            }
        };

        for url in &self.urls {
            let client = self.client.clone();
            let url = url.clone();
            let body = body.clone();

            runtime.spawn(async move {
                let result = client
                    .post(&url)
                    .header("content-type", "application/json")
                    .timeout(std::time::Duration::from_secs(5))
                    .body(body)
                    .send()
                    .await;
                match result {
                    Ok(resp) => tracing::debug!(url = %url, status = %resp.status(), "alert webhook delivered"),
                    Err(e) => tracing::warn!(url = %url, error = %e, "alert webhook delivery failed"),
                }
            });
        }
    }
}

/// Delivers every alert to each inner sink in order.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl AlertSink + 'static) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl AlertSink for FanoutSink {
    fn notify(&self, alert: &Alert) {
        for sink in &self.sinks {
            sink.notify(alert);
        }
    }
}

/// Keeps alerts in memory. Handy for tests and embedding.
#[derive(Debug, Default)]
pub struct MemorySink {
    alerts: Mutex<Vec<Alert>>,
}

impl MemorySink {
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

impl AlertSink for MemorySink {
    fn notify(&self, alert: &Alert) {
        if let Ok(mut alerts) = self.alerts.lock() {
            alerts.push(alert.clone());
        }
    }
}

impl<T: AlertSink + ?Sized> AlertSink for Arc<T> {
    fn notify(&self, alert: &Alert) {
        (**self).notify(alert)
    }
}
