//! Reference notification sinks. These only implement the `notify_*` half
//! of `StateProvider` — pair one with `refimpl::memory` or
//! `refimpl::filesystem` for persistence, or wrap both behind a small
//! `StateProvider` that forwards persistence calls to one and notifications
//! to the other.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::state::{DiscoveredCert, HealthCheckFailure, Log, LogEntry, LogID, LogState, StateProvider};
use crate::sth::SignedTreeHead;

/// Prints discovered certificates and errors to stdout/stderr as they
/// happen. Persistence calls are no-ops; pair with a real `StateProvider`
/// for anything that needs to survive a restart, or layer this on top via
/// `ForwardingStateProvider`.
pub struct StdoutNotifier;

#[async_trait]
impl StateProvider for StdoutNotifier {
    async fn prepare(&self, _cancel: &CancellationToken) -> Result<(), Error> {
        Ok(())
    }

    async fn prepare_log(&self, _log_id: LogID, _cancel: &CancellationToken) -> Result<(), Error> {
        Ok(())
    }

    async fn store_log_state(
        &self,
        _log_id: LogID,
        _state: &LogState,
        _cancel: &CancellationToken,
    ) -> Result<(), Error> {
        Ok(())
    }

    async fn load_log_state(
        &self,
        _log_id: LogID,
        _cancel: &CancellationToken,
    ) -> Result<Option<LogState>, Error> {
        Ok(None)
    }

    async fn store_sth(
        &self,
        _log_id: LogID,
        _sth: &SignedTreeHead,
        _cancel: &CancellationToken,
    ) -> Result<(), Error> {
        Ok(())
    }

    async fn load_sths(
        &self,
        _log_id: LogID,
        _cancel: &CancellationToken,
    ) -> Result<Vec<SignedTreeHead>, Error> {
        Ok(Vec::new())
    }

    async fn remove_sth(
        &self,
        _log_id: LogID,
        _sth: &SignedTreeHead,
        _cancel: &CancellationToken,
    ) -> Result<(), Error> {
        Ok(())
    }

    async fn notify_cert(&self, cert: &DiscoveredCert, _cancel: &CancellationToken) -> Result<(), Error> {
        println!(
            "[{}] match at index {}: {:?} (precert={})",
            cert.log_id, cert.index, cert.dns_identities, cert.is_precert
        );
        Ok(())
    }

    async fn notify_malformed_entry(
        &self,
        entry: &LogEntry,
        error: &Error,
        _cancel: &CancellationToken,
    ) -> Result<(), Error> {
        eprintln!("[{}] malformed entry at index {}: {}", entry.log_id, entry.index, error);
        Ok(())
    }

    async fn notify_health_check_failure(
        &self,
        log: Option<&Log>,
        failure: &HealthCheckFailure,
        _cancel: &CancellationToken,
    ) -> Result<(), Error> {
        match log {
            Some(log) => eprintln!("[{}] health check failed: {}", log.id, failure),
            None => eprintln!("health check failed: {}", failure),
        }
        Ok(())
    }

    async fn notify_error(
        &self,
        log: Option<&Log>,
        error: &Error,
        _cancel: &CancellationToken,
    ) -> Result<(), Error> {
        match log {
            Some(log) => eprintln!("[{}] error: {}", log.id, error),
            None => eprintln!("error: {}", error),
        }
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum JsonLine<'a> {
    Cert {
        log_id: LogID,
        index: u64,
        dns_identities: &'a std::collections::BTreeSet<String>,
        is_precert: bool,
        not_before: u64,
        not_after: u64,
    },
    MalformedEntry {
        log_id: LogID,
        index: u64,
        desc: String,
    },
    HealthCheckFailure {
        log_id: Option<LogID>,
        desc: String,
    },
    Error {
        log_id: Option<LogID>,
        desc: String,
    },
}

/// Appends one JSON object per line to a file, for downstream tailing or
/// ingestion. Persistence calls are no-ops, same as `StdoutNotifier`.
pub struct JsonLinesNotifier {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonLinesNotifier {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonLinesNotifier {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn append(&self, line: &JsonLine<'_>) -> Result<(), Error> {
        let _guard = self.lock.lock().await;
        let mut data = serde_json::to_vec(line)
            .map_err(|e| Error::Persistence(format!("could not serialize notification: {}", e)))?;
        data.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| Error::FileIO(self.path.clone(), e))?;
        file.write_all(&data)
            .await
            .map_err(|e| Error::FileIO(self.path.clone(), e))
    }
}

#[async_trait]
impl StateProvider for JsonLinesNotifier {
    async fn prepare(&self, _cancel: &CancellationToken) -> Result<(), Error> {
        Ok(())
    }

    async fn prepare_log(&self, _log_id: LogID, _cancel: &CancellationToken) -> Result<(), Error> {
        Ok(())
    }

    async fn store_log_state(
        &self,
        _log_id: LogID,
        _state: &LogState,
        _cancel: &CancellationToken,
    ) -> Result<(), Error> {
        Ok(())
    }

    async fn load_log_state(
        &self,
        _log_id: LogID,
        _cancel: &CancellationToken,
    ) -> Result<Option<LogState>, Error> {
        Ok(None)
    }

    async fn store_sth(
        &self,
        _log_id: LogID,
        _sth: &SignedTreeHead,
        _cancel: &CancellationToken,
    ) -> Result<(), Error> {
        Ok(())
    }

    async fn load_sths(
        &self,
        _log_id: LogID,
        _cancel: &CancellationToken,
    ) -> Result<Vec<SignedTreeHead>, Error> {
        Ok(Vec::new())
    }

    async fn remove_sth(
        &self,
        _log_id: LogID,
        _sth: &SignedTreeHead,
        _cancel: &CancellationToken,
    ) -> Result<(), Error> {
        Ok(())
    }

    async fn notify_cert(&self, cert: &DiscoveredCert, _cancel: &CancellationToken) -> Result<(), Error> {
        self.append(&JsonLine::Cert {
            log_id: cert.log_id,
            index: cert.index,
            dns_identities: &cert.dns_identities,
            is_precert: cert.is_precert,
            not_before: cert.not_before,
            not_after: cert.not_after,
        })
        .await
    }

    async fn notify_malformed_entry(
        &self,
        entry: &LogEntry,
        error: &Error,
        _cancel: &CancellationToken,
    ) -> Result<(), Error> {
        self.append(&JsonLine::MalformedEntry {
            log_id: entry.log_id,
            index: entry.index,
            desc: error.to_string(),
        })
        .await
    }

    async fn notify_health_check_failure(
        &self,
        log: Option<&Log>,
        failure: &HealthCheckFailure,
        _cancel: &CancellationToken,
    ) -> Result<(), Error> {
        self.append(&JsonLine::HealthCheckFailure {
            log_id: log.map(|l| l.id),
            desc: failure.to_string(),
        })
        .await
    }

    async fn notify_error(
        &self,
        log: Option<&Log>,
        error: &Error,
        _cancel: &CancellationToken,
    ) -> Result<(), Error> {
        self.append(&JsonLine::Error {
            log_id: log.map(|l| l.id),
            desc: error.to_string(),
        })
        .await
    }
}

/// Pairs a persistence backend with a notification sink, so operators can
/// mix e.g. `FilesystemStateProvider` for state with `JsonLinesNotifier`
/// for notifications without writing a new `StateProvider` impl.
pub struct ForwardingStateProvider<P, N> {
    persistence: P,
    notifier: N,
}

impl<P, N> ForwardingStateProvider<P, N> {
    pub fn new(persistence: P, notifier: N) -> Self {
        ForwardingStateProvider { persistence, notifier }
    }
}

#[async_trait]
impl<P, N> StateProvider for ForwardingStateProvider<P, N>
where
    P: StateProvider,
    N: StateProvider,
{
    async fn prepare(&self, cancel: &CancellationToken) -> Result<(), Error> {
        self.persistence.prepare(cancel).await
    }

    async fn prepare_log(&self, log_id: LogID, cancel: &CancellationToken) -> Result<(), Error> {
        self.persistence.prepare_log(log_id, cancel).await
    }

    async fn store_log_state(
        &self,
        log_id: LogID,
        state: &LogState,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        self.persistence.store_log_state(log_id, state, cancel).await
    }

    async fn load_log_state(
        &self,
        log_id: LogID,
        cancel: &CancellationToken,
    ) -> Result<Option<LogState>, Error> {
        self.persistence.load_log_state(log_id, cancel).await
    }

    async fn store_sth(
        &self,
        log_id: LogID,
        sth: &SignedTreeHead,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        self.persistence.store_sth(log_id, sth, cancel).await
    }

    async fn load_sths(
        &self,
        log_id: LogID,
        cancel: &CancellationToken,
    ) -> Result<Vec<SignedTreeHead>, Error> {
        self.persistence.load_sths(log_id, cancel).await
    }

    async fn remove_sth(
        &self,
        log_id: LogID,
        sth: &SignedTreeHead,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        self.persistence.remove_sth(log_id, sth, cancel).await
    }

    async fn notify_cert(&self, cert: &DiscoveredCert, cancel: &CancellationToken) -> Result<(), Error> {
        self.notifier.notify_cert(cert, cancel).await
    }

    async fn notify_malformed_entry(
        &self,
        entry: &LogEntry,
        error: &Error,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        self.notifier.notify_malformed_entry(entry, error, cancel).await
    }

    async fn notify_health_check_failure(
        &self,
        log: Option<&Log>,
        failure: &HealthCheckFailure,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        self.notifier.notify_health_check_failure(log, failure, cancel).await
    }

    async fn notify_error(
        &self,
        log: Option<&Log>,
        error: &Error,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        self.notifier.notify_error(log, error, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[tokio::test]
    async fn json_lines_notifier_appends_one_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notifications.jsonl");
        let notifier = JsonLinesNotifier::new(&path);
        let cancel = CancellationToken::new();

        let mut dns = BTreeSet::new();
        dns.insert("example.com".to_string());
        let cert = DiscoveredCert {
            log_id: LogID([1u8; 32]),
            index: 42,
            leaf_hash: [0u8; 32],
            not_before: 1,
            not_after: 2,
            dns_identities: dns,
            raw_chain: Vec::new(),
            is_precert: true,
            serial: Vec::new(),
            pubkey_hash: [0u8; 32],
        };
        notifier.notify_cert(&cert, &cancel).await.unwrap();
        notifier
            .notify_error(None, &Error::Unknown("boom".into()), &cancel)
            .await
            .unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("example.com"));
        assert!(lines[1].contains("boom"));
    }

    #[tokio::test]
    async fn forwarding_provider_routes_persistence_and_notifications_separately() {
        let persistence = crate::refimpl::memory::InMemoryStateProvider::new();
        let notifier = crate::refimpl::memory::InMemoryStateProvider::new();
        let combined = ForwardingStateProvider::new(persistence, notifier);
        let cancel = CancellationToken::new();
        let id = LogID([2u8; 32]);

        let state = LogState::new_empty();
        combined.store_log_state(id, &state, &cancel).await.unwrap();
        assert!(combined.load_log_state(id, &cancel).await.unwrap().is_some());

        let cert = DiscoveredCert {
            log_id: id,
            index: 0,
            leaf_hash: [0u8; 32],
            not_before: 0,
            not_after: 0,
            dns_identities: Default::default(),
            raw_chain: Vec::new(),
            is_precert: false,
            serial: Vec::new(),
            pubkey_hash: [0u8; 32],
        };
        combined.notify_cert(&cert, &cancel).await.unwrap();
        assert_eq!(combined.notifier.discovered_certs().await.len(), 1);
        assert!(combined.persistence.discovered_certs().await.is_empty());
    }
}
