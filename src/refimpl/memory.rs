//! An in-memory `StateProvider`, behind a single `tokio::sync::Mutex`.
//! Used by the monitor/supervisor tests and as the lowest-ceremony way to
//! run a `Supervisor` for a quick smoke test — nothing here survives a
//! restart.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::state::{
    DiscoveredCert, HealthCheckFailure, Log, LogEntry, LogID, LogState, StateProvider,
};
use crate::sth::SignedTreeHead;

#[derive(Default)]
struct Inner {
    log_states: HashMap<LogID, LogState>,
    sths: HashMap<LogID, Vec<SignedTreeHead>>,
    certs: Vec<DiscoveredCert>,
    malformed: Vec<(LogEntry, String)>,
    health_failures: Vec<(Option<LogID>, String)>,
    errors: Vec<(Option<LogID>, String)>,
}

pub struct InMemoryStateProvider {
    inner: Mutex<Inner>,
}

impl Default for InMemoryStateProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStateProvider {
    pub fn new() -> Self {
        InMemoryStateProvider {
            inner: Mutex::new(Inner::default()),
        }
    }

    pub async fn discovered_certs(&self) -> Vec<DiscoveredCert> {
        self.inner.lock().await.certs.clone()
    }

    pub async fn malformed_entries(&self) -> Vec<(LogEntry, String)> {
        self.inner.lock().await.malformed.clone()
    }

    pub async fn health_failures(&self) -> Vec<(Option<LogID>, String)> {
        self.inner.lock().await.health_failures.clone()
    }
}

#[async_trait]
impl StateProvider for InMemoryStateProvider {
    async fn prepare(&self, _cancel: &CancellationToken) -> Result<(), Error> {
        Ok(())
    }

    async fn prepare_log(&self, _log_id: LogID, _cancel: &CancellationToken) -> Result<(), Error> {
        Ok(())
    }

    async fn store_log_state(
        &self,
        log_id: LogID,
        state: &LogState,
        _cancel: &CancellationToken,
    ) -> Result<(), Error> {
        self.inner.lock().await.log_states.insert(log_id, state.clone());
        Ok(())
    }

    async fn load_log_state(
        &self,
        log_id: LogID,
        _cancel: &CancellationToken,
    ) -> Result<Option<LogState>, Error> {
        Ok(self.inner.lock().await.log_states.get(&log_id).cloned())
    }

    async fn store_sth(
        &self,
        log_id: LogID,
        sth: &SignedTreeHead,
        _cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let mut inner = self.inner.lock().await;
        let list = inner.sths.entry(log_id).or_default();
        if !list
            .iter()
            .any(|s| s.timestamp == sth.timestamp && s.root_hash == sth.root_hash)
        {
            list.push(sth.clone());
            list.sort_by_key(|s| s.tree_size);
        }
        Ok(())
    }

    async fn load_sths(
        &self,
        log_id: LogID,
        _cancel: &CancellationToken,
    ) -> Result<Vec<SignedTreeHead>, Error> {
        Ok(self.inner.lock().await.sths.get(&log_id).cloned().unwrap_or_default())
    }

    async fn remove_sth(
        &self,
        log_id: LogID,
        sth: &SignedTreeHead,
        _cancel: &CancellationToken,
    ) -> Result<(), Error> {
        if let Some(list) = self.inner.lock().await.sths.get_mut(&log_id) {
            list.retain(|s| s != sth);
        }
        Ok(())
    }

    async fn notify_cert(&self, cert: &DiscoveredCert, _cancel: &CancellationToken) -> Result<(), Error> {
        self.inner.lock().await.certs.push(cert.clone());
        Ok(())
    }

    async fn notify_malformed_entry(
        &self,
        entry: &LogEntry,
        error: &Error,
        _cancel: &CancellationToken,
    ) -> Result<(), Error> {
        self.inner
            .lock()
            .await
            .malformed
            .push((entry.clone(), error.to_string()));
        Ok(())
    }

    async fn notify_health_check_failure(
        &self,
        log: Option<&Log>,
        failure: &HealthCheckFailure,
        _cancel: &CancellationToken,
    ) -> Result<(), Error> {
        self.inner
            .lock()
            .await
            .health_failures
            .push((log.map(|l| l.id), failure.to_string()));
        Ok(())
    }

    async fn notify_error(
        &self,
        log: Option<&Log>,
        error: &Error,
        _cancel: &CancellationToken,
    ) -> Result<(), Error> {
        self.inner
            .lock()
            .await
            .errors
            .push((log.map(|l| l.id), error.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_log_state() {
        let provider = InMemoryStateProvider::new();
        let cancel = CancellationToken::new();
        let id = LogID([1u8; 32]);
        assert!(provider.load_log_state(id, &cancel).await.unwrap().is_none());

        let mut state = LogState::new_empty();
        state.download_position.append([7u8; 32]);
        provider.store_log_state(id, &state, &cancel).await.unwrap();

        let loaded = provider.load_log_state(id, &cancel).await.unwrap().unwrap();
        assert_eq!(loaded.download_position, state.download_position);
    }

    #[tokio::test]
    async fn sth_store_dedupes_and_sorts() {
        let provider = InMemoryStateProvider::new();
        let cancel = CancellationToken::new();
        let id = LogID([2u8; 32]);
        let sth_a = SignedTreeHead {
            tree_size: 10,
            timestamp: 1,
            root_hash: [1u8; 32],
            signature: vec![],
        };
        let sth_b = SignedTreeHead {
            tree_size: 5,
            timestamp: 2,
            root_hash: [2u8; 32],
            signature: vec![],
        };
        provider.store_sth(id, &sth_a, &cancel).await.unwrap();
        provider.store_sth(id, &sth_b, &cancel).await.unwrap();
        provider.store_sth(id, &sth_a, &cancel).await.unwrap();

        let loaded = provider.load_sths(id, &cancel).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].tree_size, 5);
        assert_eq!(loaded[1].tree_size, 10);
    }

    #[tokio::test]
    async fn collects_notifications() {
        let provider = InMemoryStateProvider::new();
        let cancel = CancellationToken::new();
        let cert = DiscoveredCert {
            log_id: LogID([3u8; 32]),
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
        provider.notify_cert(&cert, &cancel).await.unwrap();
        assert_eq!(provider.discovered_certs().await.len(), 1);
    }
}
