//! Operator-facing configuration, deserialized from TOML.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::sth::SthSignatureAlgorithm;
use crate::watchlist::WatchList;

fn default_batch_size() -> u64 {
    256
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_health_check_interval_secs() -> u64 {
    600
}

fn default_max_fanout() -> usize {
    8
}

fn default_circuit_breaker_threshold() -> u32 {
    8
}

/// Where the supervisor gets its list of logs to monitor.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogListSourceConfig {
    /// Fetch and parse the well-known log-list JSON over HTTPS.
    Http { url: String },
    /// Read a local file once at startup; never refreshed. Useful offline
    /// and in tests.
    Static { path: String },
}

impl Default for LogListSourceConfig {
    fn default() -> Self {
        LogListSourceConfig::Http {
            url: "https://www.gstatic.com/ct/log_list/v3/log_list.json".to_owned(),
        }
    }
}

/// Where discovered certificates and health-check failures are delivered.
/// Only `Stdout` and `JsonLines` are implemented by `refimpl::notify`; the
/// others are accepted by config parsing (an operator's config file may
/// already name one) but return `Error::Unsupported` if selected, since
/// building out real delivery backends for all four is outside what this
/// crate's core is responsible for.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationSinkConfig {
    Stdout,
    JsonLines { path: String },
    Script { path: String },
    ScriptDir { dir: String },
    Email { to: String, smtp_url: String },
}

impl Default for NotificationSinkConfig {
    fn default() -> Self {
        NotificationSinkConfig::Stdout
    }
}

/// Where persisted per-log state and notification records live.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StateBackendConfig {
    Memory,
    Filesystem { dir: String },
}

impl Default for StateBackendConfig {
    fn default() -> Self {
        StateBackendConfig::Memory
    }
}

/// One statically-configured log, for deployments that don't want to pull
/// the dynamic log list (or for `LogListSourceConfig::Static` files).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogConfig {
    pub base_url: String,
    pub submission_url: String,
    /// Base64 DER-encoded SubjectPublicKeyInfo.
    pub public_key_base64: String,
    pub signature_algorithm: SthSignatureAlgorithm,
    #[serde(default)]
    pub operator: String,
}

/// All operator-facing knobs: log source, persistence, notification
/// delivery, plus the concurrency knobs the monitor loop needs.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_list_source: LogListSourceConfig,
    pub state_backend: StateBackendConfig,
    pub notification_sink: NotificationSinkConfig,

    /// Max entries requested per `get-entries` call.
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,

    /// If true, a log seen for the first time is bootstrapped at its
    /// current STH instead of downloading its full history. Only actually
    /// skips history when the STH's tree_size is a power of two or zero —
    /// see `monitor`'s module doc comment.
    pub start_at_end: bool,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,

    /// Maximum number of logs monitored concurrently at the fanout stage
    /// (per-log catch-up download pipelining); does not limit the number of
    /// logs tracked, only how many can be actively downloading entries at
    /// once.
    #[serde(default = "default_max_fanout")]
    pub max_fanout: usize,

    /// Consecutive cycle failures before a log's backoff is considered
    /// "broken" and surfaced to the health check rather than silently
    /// retried forever.
    #[serde(default = "default_circuit_breaker_threshold")]
    pub circuit_breaker_threshold: u32,

    pub verbose: bool,

    #[serde(default)]
    pub watch_list: WatchList,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_list_source: LogListSourceConfig::default(),
            state_backend: StateBackendConfig::default(),
            notification_sink: NotificationSinkConfig::default(),
            batch_size: default_batch_size(),
            start_at_end: false,
            poll_interval_secs: default_poll_interval_secs(),
            health_check_interval_secs: default_health_check_interval_secs(),
            max_fanout: default_max_fanout(),
            circuit_breaker_threshold: default_circuit_breaker_threshold(),
            verbose: false,
            watch_list: WatchList::default(),
        }
    }
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, crate::error::Error> {
        toml::from_str(s)
            .map_err(|e| crate::error::Error::MalformedResponseBody(format!("bad config: {}", e)))
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self, crate::error::Error> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| crate::error::Error::FileIO(path.to_path_buf(), e))?;
        Self::from_toml_str(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sane() {
        let c = Config::default();
        assert_eq!(c.batch_size, 256);
        assert!(!c.start_at_end);
        assert!(c.watch_list.is_empty());
    }

    #[test]
    fn parses_minimal_toml() {
        let toml = r#"
            start_at_end = true
            verbose = true

            [log_list_source]
            kind = "http"
            url = "https://example.com/log_list.json"

            [state_backend]
            kind = "filesystem"
            dir = "/var/lib/ctmonitor"

            [notification_sink]
            kind = "stdout"
        "#;
        let c = Config::from_toml_str(toml).unwrap();
        assert!(c.start_at_end);
        assert_eq!(c.batch_size, default_batch_size());
        match c.state_backend {
            StateBackendConfig::Filesystem { dir } => assert_eq!(dir, "/var/lib/ctmonitor"),
            _ => panic!("wrong variant"),
        }
    }
}
