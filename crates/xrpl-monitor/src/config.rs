use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

const DEFAULT_RIPPLED_URL: &str = "http://127.0.0.1:5005";
const DEFAULT_TIMEOUT_SECS: u64 = 8;
const DEFAULT_FAST_POLL_SECS: u64 = 5;
const DEFAULT_SLOW_POLL_SECS: u64 = 60;
const DEFAULT_DB_PATH: &str = "./data/monitor.db";
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 2000;
const DEFAULT_RETENTION_HOURS: u64 = 168;
const DEFAULT_EXPORTER_HOST: &str = "0.0.0.0";
const DEFAULT_EXPORTER_PORT: u16 = 9091;

/// Validation events must outlive the longest agreement window.
pub const MIN_RETENTION_HOURS: u64 = 24;

/// How the monitor reaches rippled.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportMode {
    Http { url: String },
    Docker { container: String },
}

/// Thresholds for the edge-triggered alert conditions.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertThresholds {
    pub peer_min: u32,
    pub peer_sustain: Duration,
    pub agreement_min_pct: f64,
    pub agreement_sustain: Duration,
    pub not_proposing_sustain: Duration,
    /// Consecutive failed polls before the validator is reported unreachable.
    pub unreachable_after: u32,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            peer_min: 10,
            peer_sustain: Duration::from_secs(60),
            agreement_min_pct: 90.0,
            agreement_sustain: Duration::from_secs(600),
            not_proposing_sustain: Duration::from_secs(300),
            unreachable_after: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Upstream transport (env: RIPPLED_TRANSPORT, RIPPLED_URL, RIPPLED_CONTAINER)
    pub transport: TransportMode,
    /// Per-call upstream timeout (env: RIPPLED_TIMEOUT_SECS)
    pub upstream_timeout: Duration,
    /// rippled data directory to size on disk (env: RIPPLED_DATA_DIR)
    pub rippled_data_dir: Option<PathBuf>,
    /// Fast collector cadence (env: FAST_POLL_SECS)
    pub fast_interval: Duration,
    /// Slow collector cadence (env: SLOW_POLL_SECS)
    pub slow_interval: Duration,
    /// SQLite database path (env: MONITOR_DB_PATH)
    pub db_path: String,
    /// Bounded lock wait for store operations (env: DB_BUSY_TIMEOUT_MS)
    pub busy_timeout: Duration,
    /// Rows older than this are pruned (env: RETENTION_HOURS)
    pub retention: Duration,
    pub exporter_host: String,
    pub exporter_port: u16,
    pub alerts: AlertThresholds,
    /// Append-only alert log (env: ALERTS_FILE)
    pub alerts_file: Option<String>,
    /// Webhook URLs for alert notifications (env: ALERT_WEBHOOK_URLS)
    pub webhook_urls: Vec<String>,
}

impl MonitorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let transport = match get("RIPPLED_TRANSPORT").as_deref().unwrap_or("http") {
            "http" => {
                let url = get("RIPPLED_URL").unwrap_or_else(|| DEFAULT_RIPPLED_URL.to_string());
                let parsed = Url::parse(&url).map_err(|_| ConfigError::InvalidUrl(url.clone()))?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(ConfigError::InvalidUrl(url));
                }
                TransportMode::Http { url }
            }
            "docker" => {
                let container = get("RIPPLED_CONTAINER")
                    .ok_or(ConfigError::MissingRequired("RIPPLED_CONTAINER"))?;
                TransportMode::Docker { container }
            }
            other => {
                return Err(ConfigError::Invalid {
                    var: "RIPPLED_TRANSPORT",
                    value: other.to_string(),
                    reason: "expected \"http\" or \"docker\"".to_string(),
                })
            }
        };

        let timeout_secs: u64 = parse(&get, "RIPPLED_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?;
        ensure_range("RIPPLED_TIMEOUT_SECS", timeout_secs, 1, 30)?;

        let rippled_data_dir = get("RIPPLED_DATA_DIR").map(PathBuf::from);

        let fast_secs: u64 = parse(&get, "FAST_POLL_SECS", DEFAULT_FAST_POLL_SECS)?;
        ensure_range("FAST_POLL_SECS", fast_secs, 1, 3600)?;
        let slow_secs: u64 = parse(&get, "SLOW_POLL_SECS", DEFAULT_SLOW_POLL_SECS)?;
        if slow_secs <= fast_secs {
            return Err(ConfigError::Invalid {
                var: "SLOW_POLL_SECS",
                value: slow_secs.to_string(),
                reason: format!("must be greater than FAST_POLL_SECS ({fast_secs})"),
            });
        }

        let db_path = get("MONITOR_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string());

        let busy_ms: u64 = parse(&get, "DB_BUSY_TIMEOUT_MS", DEFAULT_BUSY_TIMEOUT_MS)?;
        ensure_range("DB_BUSY_TIMEOUT_MS", busy_ms, 1, 10_000)?;

        let retention_hours: u64 = parse(&get, "RETENTION_HOURS", DEFAULT_RETENTION_HOURS)?;
        ensure_range("RETENTION_HOURS", retention_hours, MIN_RETENTION_HOURS, 24 * 365)?;

        let exporter_host =
            get("EXPORTER_HOST").unwrap_or_else(|| DEFAULT_EXPORTER_HOST.to_string());
        let exporter_port: u16 = parse(&get, "EXPORTER_PORT", DEFAULT_EXPORTER_PORT)?;

        let defaults = AlertThresholds::default();
        let agreement_min_pct: f64 =
            parse(&get, "ALERT_AGREEMENT_MIN_PCT", defaults.agreement_min_pct)?;
        if !(0.0..=100.0).contains(&agreement_min_pct) {
            return Err(ConfigError::Invalid {
                var: "ALERT_AGREEMENT_MIN_PCT",
                value: agreement_min_pct.to_string(),
                reason: "must be between 0 and 100".to_string(),
            });
        }
        let unreachable_after: u32 =
            parse(&get, "ALERT_UNREACHABLE_AFTER", defaults.unreachable_after)?;
        ensure_range("ALERT_UNREACHABLE_AFTER", unreachable_after as u64, 1, 1000)?;

        let alerts = AlertThresholds {
            peer_min: parse(&get, "ALERT_PEER_MIN", defaults.peer_min)?,
            peer_sustain: secs(&get, "ALERT_PEER_SUSTAIN_SECS", defaults.peer_sustain)?,
            agreement_min_pct,
            agreement_sustain: secs(
                &get,
                "ALERT_AGREEMENT_SUSTAIN_SECS",
                defaults.agreement_sustain,
            )?,
            not_proposing_sustain: secs(
                &get,
                "ALERT_NOT_PROPOSING_SECS",
                defaults.not_proposing_sustain,
            )?,
            unreachable_after,
        };

        let alerts_file = get("ALERTS_FILE");

        let webhook_urls: Vec<String> = get("ALERT_WEBHOOK_URLS")
            .map(|urls| {
                urls.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        for url in &webhook_urls {
            Url::parse(url).map_err(|_| ConfigError::InvalidUrl(url.clone()))?;
        }

        Ok(Self {
            transport,
            upstream_timeout: Duration::from_secs(timeout_secs),
            rippled_data_dir,
            fast_interval: Duration::from_secs(fast_secs),
            slow_interval: Duration::from_secs(slow_secs),
            db_path,
            busy_timeout: Duration::from_millis(busy_ms),
            retention: Duration::from_secs(retention_hours * 3600),
            exporter_host,
            exporter_port,
            alerts,
            alerts_file,
            webhook_urls,
        })
    }
}

fn parse<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn secs<G>(get: &G, var: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    parse(get, var, default.as_secs()).map(Duration::from_secs)
}

fn ensure_range(var: &'static str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: format!("must be between {min} and {max}"),
        });
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingRequired(&'static str),

    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}
