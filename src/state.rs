//! The data model shared between the core and its external collaborators:
//! logs, persisted per-log state, discovered certificates, and the
//! `StateProvider` trait that abstracts over however those get persisted.

use std::collections::BTreeSet;
use std::fmt;
use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::merkle::CollapsedTree;
use crate::sth::SignedTreeHead;
use crate::utils::u8_to_hex;

/// 32-byte SHA-256 of a log's public key; primary key for all per-log state.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogID(pub [u8; 32]);

impl LogID {
    pub fn from_public_key_der(der: &[u8]) -> Self {
        LogID(crate::utils::sha256(der))
    }
}

impl fmt::Debug for LogID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LogID({})", u8_to_hex(&self.0))
    }
}

impl fmt::Display for LogID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u8_to_hex(&self.0))
    }
}

/// Lifecycle state of a log, as reported by the log-list source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLifecycle {
    Usable,
    Retired,
    Rejected,
}

/// Signature algorithm a log uses for its STHs, per its log-list metadata.
pub use crate::sth::SthSignatureAlgorithm;

/// Immutable descriptor of a log. Produced by the external log-list source.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Log {
    pub id: LogID,
    pub base_url: String,
    pub submission_url: String,
    /// DER-encoded SubjectPublicKeyInfo.
    pub public_key_der: Vec<u8>,
    pub signature_algorithm: SthSignatureAlgorithm,
    pub operator: String,
    pub lifecycle: LogLifecycle,
}

/// Persisted per-log state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogState {
    /// Verified tree up to the last successfully downloaded and checked
    /// entry.
    pub download_position: CollapsedTree,
    /// Verified tree up to the last entry audited against a signed STH.
    /// Equals `download_position` on graceful shutdown.
    pub verified_position: CollapsedTree,
    pub verified_sth: Option<PersistedSth>,
    pub last_success: Option<SystemTimeMs>,
    /// Set when a start_at_end bootstrap trusted a non-zero STH without
    /// downloading the leaves before it; see the crate's `monitor` module
    /// doc comment for why the download_position self-check is skipped in
    /// that case.
    pub bootstrapped_without_history: bool,
}

impl LogState {
    pub fn new_empty() -> Self {
        LogState {
            download_position: CollapsedTree::empty(),
            verified_position: CollapsedTree::empty(),
            verified_sth: None,
            last_success: None,
            bootstrapped_without_history: false,
        }
    }
}

/// Wall-clock time, stored as milliseconds since the epoch for
/// serialization stability (avoids `SystemTime`'s platform-specific
/// representation).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SystemTimeMs(pub u64);

impl SystemTimeMs {
    pub fn now() -> Self {
        let dur = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default();
        SystemTimeMs(dur.as_millis() as u64)
    }

    pub fn elapsed_since(&self, now: SystemTimeMs) -> std::time::Duration {
        std::time::Duration::from_millis(now.0.saturating_sub(self.0))
    }
}

/// `SignedTreeHead` in its persisted form (plain data, no signature
/// re-verification needed once it's already been checked and stored).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistedSth {
    pub tree_size: u64,
    pub timestamp: u64,
    pub root_hash: [u8; 32],
    pub signature: Vec<u8>,
}

impl From<&SignedTreeHead> for PersistedSth {
    fn from(sth: &SignedTreeHead) -> Self {
        PersistedSth {
            tree_size: sth.tree_size,
            timestamp: sth.timestamp,
            root_hash: sth.root_hash,
            signature: sth.signature.clone(),
        }
    }
}

impl From<PersistedSth> for SignedTreeHead {
    fn from(p: PersistedSth) -> Self {
        SignedTreeHead {
            tree_size: p.tree_size,
            timestamp: p.timestamp,
            root_hash: p.root_hash,
            signature: p.signature,
        }
    }
}

/// A certificate or pre-certificate whose identities matched the watch
/// list. Emitted exactly once per matching entry per log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiscoveredCert {
    pub log_id: LogID,
    pub index: u64,
    pub leaf_hash: [u8; 32],
    pub not_before: u64,
    pub not_after: u64,
    pub dns_identities: BTreeSet<String>,
    pub raw_chain: Vec<Vec<u8>>,
    pub is_precert: bool,
    pub serial: Vec<u8>,
    pub pubkey_hash: [u8; 32],
}

/// A log entry that failed to decode, for `notify_malformed_entry`.
#[derive(Clone, Debug)]
pub struct LogEntry {
    pub log_id: LogID,
    pub index: u64,
    pub raw_leaf: Vec<u8>,
}

/// Why a health check failed for a log, or for the log list as a whole.
/// Modeled as a tagged variant rather than a subtype hierarchy: summary/
/// text/JSON views are projections of whichever variant fired.
#[derive(Clone, Debug)]
pub enum HealthCheckFailure {
    /// No fresh STH has been observed within the health-check interval.
    StaleSth {
        last_success: Option<SystemTimeMs>,
        interval: std::time::Duration,
    },
    /// Fresh STHs are being observed, but the download position trails
    /// them — entries aren't being verified as fast as the log grows.
    Backlog {
        verified_size: u64,
        observed_size: u64,
    },
    /// The log-list source could not be refreshed.
    StaleLogList { desc: String },
}

impl fmt::Display for HealthCheckFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthCheckFailure::StaleSth { interval, .. } => write!(
                f,
                "no successful polling cycle in the last {:?}",
                interval
            ),
            HealthCheckFailure::Backlog {
                verified_size,
                observed_size,
            } => write!(
                f,
                "verified position {} trails observed STH size {}",
                verified_size, observed_size
            ),
            HealthCheckFailure::StaleLogList { desc } => {
                write!(f, "log list refresh failed: {}", desc)
            }
        }
    }
}

/// The abstract capability set the core needs from a persistence backend.
/// Implementations may be a filesystem layout, an embedded key-value
/// store, or a remote service — the core holds only this handle.
/// Per-LogID operations may assume single-writer discipline; the
/// Supervisor enforces one Monitor per LogID.
#[async_trait]
pub trait StateProvider: Send + Sync {
    async fn prepare(&self, cancel: &CancellationToken) -> Result<(), Error>;
    async fn prepare_log(&self, log_id: LogID, cancel: &CancellationToken) -> Result<(), Error>;

    async fn store_log_state(
        &self,
        log_id: LogID,
        state: &LogState,
        cancel: &CancellationToken,
    ) -> Result<(), Error>;
    async fn load_log_state(
        &self,
        log_id: LogID,
        cancel: &CancellationToken,
    ) -> Result<Option<LogState>, Error>;

    /// Dedupe by `(timestamp, root_hash)`.
    async fn store_sth(
        &self,
        log_id: LogID,
        sth: &SignedTreeHead,
        cancel: &CancellationToken,
    ) -> Result<(), Error>;
    /// Sorted ascending by `tree_size`.
    async fn load_sths(
        &self,
        log_id: LogID,
        cancel: &CancellationToken,
    ) -> Result<Vec<SignedTreeHead>, Error>;
    async fn remove_sth(
        &self,
        log_id: LogID,
        sth: &SignedTreeHead,
        cancel: &CancellationToken,
    ) -> Result<(), Error>;

    async fn notify_cert(
        &self,
        cert: &DiscoveredCert,
        cancel: &CancellationToken,
    ) -> Result<(), Error>;
    async fn notify_malformed_entry(
        &self,
        entry: &LogEntry,
        error: &Error,
        cancel: &CancellationToken,
    ) -> Result<(), Error>;
    async fn notify_health_check_failure(
        &self,
        log: Option<&Log>,
        failure: &HealthCheckFailure,
        cancel: &CancellationToken,
    ) -> Result<(), Error>;
    async fn notify_error(
        &self,
        log: Option<&Log>,
        error: &Error,
        cancel: &CancellationToken,
    ) -> Result<(), Error>;
}
