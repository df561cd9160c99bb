//! The per-log state machine: poll a log's STH, verify it grew
//! consistently, download and decode the new entries, and match them
//! against the watch list.
//!
//! ## The `start_at_end` bootstrap trade-off
//!
//! A freshly-added log has no prior `verified_sth` to consistency-check
//! against. The honest options are: download its entire history before
//! trusting anything (slow for a log with billions of entries), or trust
//! its current STH outright and only verify growth from that point on.
//!
//! `start_at_end` chooses the latter, but only where it can be done
//! soundly: `CollapsedTree::from_pow2_root` can seed a correct compact
//! tree from a bare root hash exactly when the tree's size is a power of
//! two (then the whole tree is one complete subtree, and the compact
//! representation is that single node — no information is lost). For any
//! other size, the real compact representation has multiple right-spine
//! nodes that cannot be recovered from the root alone, so bootstrapping
//! instead falls back to downloading full history. Every code path this
//! produces a `download_position` that is mathematically sound, so
//! nothing downstream needs to special-case or skip the
//! `download_position.root() == sth.root_hash` check — it holds
//! unconditionally. `LogState::bootstrapped_without_history` is kept purely
//! as an audit flag for operators, not as a signal this module branches on.

use std::sync::Arc;
use std::time::Duration;

use openssl::pkey::PKey;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::backoff::Backoff;
use crate::config::Config;
use crate::decode::{self, EntryType};
use crate::error::Error;
use crate::merkle::{self, CollapsedTree};
use crate::state::{DiscoveredCert, Log, LogEntry, LogState, PersistedSth, StateProvider, SystemTimeMs};
use crate::sth::{verify_sth_signature, SignedTreeHead};
use crate::watchlist::WatchList;
use crate::wire::WireClient;

/// How many times in a row `get-entries` is allowed to come back empty for
/// a range the STH says should exist before this is treated as a protocol
/// failure rather than the log merely lagging its own STH.
const MAX_ZERO_ENTRY_RETRIES: u32 = 10;

pub struct Monitor {
    log: Log,
    wire: Arc<dyn WireClient>,
    state_provider: Arc<dyn StateProvider>,
    watch_list: WatchList,
    batch_size: u64,
    start_at_end: bool,
    poll_interval: Duration,
    cancel: CancellationToken,
    backoff: Backoff,
    /// Consecutive cycle failures before the breaker trips and halts the
    /// log rather than retrying forever.
    circuit_breaker_threshold: u32,
    /// Shared across every log's `Monitor`; bounds how many logs can be in
    /// their download-heavy catch-up phase at once. A fresh semaphore of
    /// the same size is fine for tests that only run one monitor at a
    /// time.
    fanout: Arc<Semaphore>,
}

impl Monitor {
    pub fn new(
        log: Log,
        wire: Arc<dyn WireClient>,
        state_provider: Arc<dyn StateProvider>,
        config: &Config,
        cancel: CancellationToken,
    ) -> Self {
        Self::with_fanout(
            log,
            wire,
            state_provider,
            config,
            cancel,
            Arc::new(Semaphore::new(config.max_fanout)),
        )
    }

    /// Like `new`, but shares a caller-provided fanout semaphore with other
    /// monitors — this is how `Supervisor` bounds concurrent download work
    /// across every log it runs, rather than per log.
    pub fn with_fanout(
        log: Log,
        wire: Arc<dyn WireClient>,
        state_provider: Arc<dyn StateProvider>,
        config: &Config,
        cancel: CancellationToken,
        fanout: Arc<Semaphore>,
    ) -> Self {
        Monitor {
            log,
            wire,
            state_provider,
            watch_list: config.watch_list.clone(),
            batch_size: config.batch_size,
            start_at_end: config.start_at_end,
            poll_interval: config.poll_interval(),
            cancel,
            backoff: Backoff::new(),
            circuit_breaker_threshold: config.circuit_breaker_threshold,
            fanout,
        }
    }

    pub fn log(&self) -> &Log {
        &self.log
    }

    /// Runs the monitor loop until cancelled (returns `Ok`) or a fatal,
    /// per-log integrity violation occurs (returns `Err`; the caller
    /// decides whether to keep the log halted or retire it).
    pub async fn run(mut self) -> Result<(), Error> {
        self.state_provider.prepare_log(self.log.id, &self.cancel).await?;
        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            match self.run_cycle().await {
                Ok(()) => {
                    self.backoff.reset();
                }
                Err(e) if e.is_cancellation() => return Ok(()),
                Err(e) if e.is_fatal_for_log() => {
                    let _ = self
                        .state_provider
                        .notify_error(Some(&self.log), &e, &self.cancel)
                        .await;
                    log::error!("{}: halting, fatal error: {}", self.log.base_url, e);
                    return Err(e);
                }
                Err(e) => {
                    let _ = self
                        .state_provider
                        .notify_error(Some(&self.log), &e, &self.cancel)
                        .await;
                    log::warn!("{}: cycle failed, retrying: {}", self.log.base_url, e);
                    let delay = self.backoff.failure();
                    if self.backoff.circuit_broken(self.circuit_breaker_threshold) {
                        let broken = Error::CircuitBroken {
                            consecutive_failures: self.backoff.consecutive_failures(),
                        };
                        let _ = self
                            .state_provider
                            .notify_error(Some(&self.log), &broken, &self.cancel)
                            .await;
                        log::error!(
                            "{}: halting, circuit breaker tripped after {} consecutive failures",
                            self.log.base_url,
                            self.backoff.consecutive_failures()
                        );
                        return Err(broken);
                    }
                    if self.sleep_cancellably(delay).await {
                        return Ok(());
                    }
                    continue;
                }
            }
            if self.sleep_cancellably(self.poll_interval).await {
                return Ok(());
            }
        }
    }

    /// Sleeps for `d` unless cancelled first. Returns true if cancellation
    /// won the race.
    async fn sleep_cancellably(&self, d: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(d) => false,
            _ = self.cancel.cancelled() => true,
        }
    }

    fn cancel_check(&self) -> Result<(), Error> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    async fn run_cycle(&mut self) -> Result<(), Error> {
        let mut state = self
            .state_provider
            .load_log_state(self.log.id, &self.cancel)
            .await?
            .unwrap_or_else(LogState::new_empty);

        let new_sth = self.wire.get_sth().await?;
        let pub_key = PKey::public_key_from_der(&self.log.public_key_der)
            .map_err(|e| Error::InvalidSignature(format!("bad log public key: {}", e)))?;
        verify_sth_signature(&new_sth, &pub_key, self.log.signature_algorithm)?;

        // Record the STH as observed-but-unverified before attempting to
        // verify it, so a health check running concurrently with a stalled
        // or halted verification can see that growth was observed.
        self.state_provider
            .store_sth(self.log.id, &new_sth, &self.cancel)
            .await?;

        match state.verified_sth.clone() {
            None => {
                self.bootstrap(&mut state, &new_sth).await?;
            }
            Some(prev) => {
                let prev_sth: SignedTreeHead = prev.into();
                if new_sth.tree_size == prev_sth.tree_size {
                    if new_sth.root_hash != prev_sth.root_hash {
                        return Err(Error::SplitView {
                            tree_size: new_sth.tree_size,
                            root_a: prev_sth.root_hash,
                            root_b: new_sth.root_hash,
                        });
                    }
                    state.last_success = Some(SystemTimeMs::now());
                    self.state_provider
                        .store_log_state(self.log.id, &state, &self.cancel)
                        .await?;
                    self.state_provider
                        .remove_sth(self.log.id, &new_sth, &self.cancel)
                        .await?;
                    return Ok(());
                }
                if new_sth.tree_size < prev_sth.tree_size {
                    return Err(Error::InvalidConsistencyProof {
                        prev_size: prev_sth.tree_size,
                        new_size: new_sth.tree_size,
                        desc: "tree shrank".to_owned(),
                    });
                }
                let proof = self
                    .wire
                    .get_consistency(prev_sth.tree_size, new_sth.tree_size)
                    .await?;
                merkle::verify_consistency(
                    prev_sth.tree_size,
                    new_sth.tree_size,
                    &prev_sth.root_hash,
                    &new_sth.root_hash,
                    &proof,
                )
                .map_err(|e| Error::from_consistency(prev_sth.tree_size, new_sth.tree_size, e))?;

                self.download_and_verify(&mut state, &new_sth).await?;
            }
        }

        self.state_provider
            .remove_sth(self.log.id, &new_sth, &self.cancel)
            .await?;
        state.verified_sth = Some(PersistedSth::from(&new_sth));
        state.last_success = Some(SystemTimeMs::now());
        self.state_provider
            .store_log_state(self.log.id, &state, &self.cancel)
            .await?;
        Ok(())
    }

    async fn bootstrap(&mut self, state: &mut LogState, new_sth: &SignedTreeHead) -> Result<(), Error> {
        if self.start_at_end {
            if let Some(tree) = CollapsedTree::from_pow2_root(new_sth.tree_size, new_sth.root_hash) {
                state.download_position = tree.clone();
                state.verified_position = tree;
                state.bootstrapped_without_history = true;
                return Ok(());
            }
            log::warn!(
                "{}: start_at_end requested but tree_size {} is not a power of two; \
                 downloading full history this once",
                self.log.base_url,
                new_sth.tree_size
            );
        }
        self.download_and_verify(state, new_sth).await
    }

    async fn download_and_verify(&mut self, state: &mut LogState, target: &SignedTreeHead) -> Result<(), Error> {
        let _permit = self
            .fanout
            .acquire()
            .await
            .map_err(|_| Error::Cancelled)?;
        let mut next = state.download_position.size();
        let end = target.tree_size;
        let mut zero_entry_retries = 0u32;
        let mut zero_entry_backoff = Backoff::new();

        while next < end {
            self.cancel_check()?;
            let batch_end = std::cmp::min(next + self.batch_size, end);
            let entries = self.wire.get_entries_batch(next, batch_end - 1).await?;
            if entries.is_empty() {
                zero_entry_retries += 1;
                if zero_entry_retries > MAX_ZERO_ENTRY_RETRIES {
                    return Err(Error::ExpectedEntry(next));
                }
                let delay = zero_entry_backoff.failure();
                if self.sleep_cancellably(delay).await {
                    return Err(Error::Cancelled);
                }
                continue;
            }
            zero_entry_retries = 0;
            zero_entry_backoff.reset();

            for (offset, raw) in entries.into_iter().enumerate() {
                let index = next + offset as u64;
                let leaf_hash = decode::entry_leaf_hash(&raw.leaf_input);
                state.download_position.append(leaf_hash);

                match decode::decode_entry(&raw.leaf_input, &raw.extra_data) {
                    Ok(decoded) => {
                        if !self.watch_list.matching(decoded.dns_identities.iter()).is_empty() {
                            let cert = DiscoveredCert {
                                log_id: self.log.id,
                                index,
                                leaf_hash,
                                not_before: decoded.not_before,
                                not_after: decoded.not_after,
                                dns_identities: decoded.dns_identities,
                                raw_chain: std::iter::once(decoded.certificate_der)
                                    .chain(decoded.chain_der)
                                    .collect(),
                                is_precert: decoded.entry_type == EntryType::PreCert,
                                serial: decoded.serial,
                                pubkey_hash: decoded.pubkey_hash,
                            };
                            self.state_provider.notify_cert(&cert, &self.cancel).await?;
                        }
                    }
                    Err(e) => {
                        let entry = LogEntry {
                            log_id: self.log.id,
                            index,
                            raw_leaf: raw.leaf_input,
                        };
                        self.state_provider
                            .notify_malformed_entry(&entry, &e, &self.cancel)
                            .await?;
                    }
                }
            }
            next = batch_end;
            self.state_provider
                .store_log_state(self.log.id, state, &self.cancel)
                .await?;
        }

        if state.download_position.root() != target.root_hash {
            return Err(Error::DownloadRootMismatch {
                tree_size: target.tree_size,
            });
        }
        state.verified_position = state.download_position.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merkle::{empty_hash, leaf_hash};
    use crate::refimpl::memory::InMemoryStateProvider;
    use crate::sth::SthSignatureAlgorithm;
    use crate::state::{LogID, LogLifecycle};
    use crate::wire::RawEntry;
    use async_trait::async_trait;
    use openssl::ec::{EcGroup, EcKey};
    use openssl::hash::MessageDigest;
    use openssl::nid::Nid;
    use openssl::pkey::{PKey, Private};
    use openssl::sign::Signer;
    use std::sync::Mutex as StdMutex;

    struct MockWire {
        key: PKey<Private>,
        leaves: Vec<Vec<u8>>,
        served_tree_size: StdMutex<u64>,
    }

    fn sign_sth(key: &PKey<Private>, tree_size: u64, root_hash: [u8; 32]) -> SignedTreeHead {
        let mut sth = SignedTreeHead {
            tree_size,
            timestamp: 1_700_000_000_000,
            root_hash,
            signature: Vec::new(),
        };
        let data = {
            let mut buf = Vec::new();
            buf.push(0u8);
            buf.push(1u8);
            buf.extend_from_slice(&sth.timestamp.to_be_bytes());
            buf.extend_from_slice(&sth.tree_size.to_be_bytes());
            buf.extend_from_slice(&sth.root_hash);
            buf
        };
        let mut signer = Signer::new(MessageDigest::sha256(), key).unwrap();
        signer.update(&data).unwrap();
        let raw_sig = signer.sign_to_vec().unwrap();
        let mut blob = vec![4u8, 3u8];
        blob.extend_from_slice(&(raw_sig.len() as u16).to_be_bytes());
        blob.extend_from_slice(&raw_sig);
        sth.signature = blob;
        sth
    }

    fn build_tree_root(leaves: &[[u8; 32]]) -> [u8; 32] {
        let mut t = CollapsedTree::empty();
        t.append_all(leaves.iter().copied());
        t.root()
    }

    #[async_trait]
    impl WireClient for MockWire {
        async fn get_sth(&self) -> Result<SignedTreeHead, Error> {
            let n = *self.served_tree_size.lock().unwrap();
            let hashes: Vec<[u8; 32]> = self.leaves[..n as usize].iter().map(|l| leaf_hash(l)).collect();
            let root = build_tree_root(&hashes);
            Ok(sign_sth(&self.key, n, root))
        }

        async fn get_consistency(&self, first: u64, second: u64) -> Result<Vec<[u8; 32]>, Error> {
            let leaves: Vec<[u8; 32]> = self.leaves[..second as usize].iter().map(|l| leaf_hash(l)).collect();
            Ok(crate::merkle::generate_consistency_proof(&leaves, first, second))
        }

        async fn get_entries_batch(&self, start: u64, end_inclusive: u64) -> Result<Vec<RawEntry>, Error> {
            let n = *self.served_tree_size.lock().unwrap();
            let end = std::cmp::min(end_inclusive + 1, n);
            if start >= end {
                return Ok(Vec::new());
            }
            Ok(self.leaves[start as usize..end as usize]
                .iter()
                .map(|l| RawEntry {
                    leaf_input: l.clone(),
                    extra_data: Vec::new(),
                })
                .collect())
        }

        async fn get_roots(&self) -> Result<Vec<Vec<u8>>, Error> {
            Ok(Vec::new())
        }
    }

    fn test_log(key: &PKey<Private>) -> Log {
        Log {
            id: LogID::from_public_key_der(&key.public_key_to_der().unwrap()),
            base_url: "https://log.example.com/".to_owned(),
            submission_url: "https://log.example.com/".to_owned(),
            public_key_der: key.public_key_to_der().unwrap(),
            signature_algorithm: SthSignatureAlgorithm::EcdsaP256Sha256,
            operator: "test".to_owned(),
            lifecycle: LogLifecycle::Usable,
        }
    }

    fn raw_leaf(tag: u8) -> Vec<u8> {
        // Not a valid MerkleTreeLeaf; decode will fail for these, and
        // that's fine for tests that only check position/cert-matching
        // semantics, not decoding.
        vec![tag; 16]
    }

    #[tokio::test]
    async fn empty_log_bootstraps_to_empty_state() {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();
        let wire: Arc<dyn WireClient> = Arc::new(MockWire {
            key: key.clone(),
            leaves: Vec::new(),
            served_tree_size: StdMutex::new(0),
        });
        let state_provider: Arc<dyn StateProvider> = Arc::new(InMemoryStateProvider::new());
        let log = test_log(&key);
        let config = Config::default();
        let cancel = CancellationToken::new();
        let mut monitor = Monitor::new(log.clone(), wire, state_provider.clone(), &config, cancel.clone());

        monitor.run_cycle().await.unwrap();

        let state = state_provider.load_log_state(log.id, &cancel).await.unwrap().unwrap();
        assert_eq!(state.verified_position.size(), 0);
        assert_eq!(state.verified_position.root(), empty_hash());
    }

    #[tokio::test]
    async fn growth_is_downloaded_and_verified() {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();
        let leaves: Vec<Vec<u8>> = (0..5u8).map(raw_leaf).collect();
        let wire = Arc::new(MockWire {
            key: key.clone(),
            leaves: leaves.clone(),
            served_tree_size: StdMutex::new(0),
        });
        let state_provider: Arc<dyn StateProvider> = Arc::new(InMemoryStateProvider::new());
        let log = test_log(&key);
        let config = Config::default();
        let cancel = CancellationToken::new();

        {
            let wire: Arc<dyn WireClient> = wire.clone();
            let mut monitor = Monitor::new(log.clone(), wire, state_provider.clone(), &config, cancel.clone());
            monitor.run_cycle().await.unwrap();
        }

        *wire.served_tree_size.lock().unwrap() = 5;
        {
            let wire: Arc<dyn WireClient> = wire.clone();
            let mut monitor = Monitor::new(log.clone(), wire, state_provider.clone(), &config, cancel.clone());
            monitor.run_cycle().await.unwrap();
        }

        let state = state_provider.load_log_state(log.id, &cancel).await.unwrap().unwrap();
        assert_eq!(state.verified_position.size(), 5);
        let expected_hashes: Vec<[u8; 32]> = leaves.iter().map(|l| leaf_hash(l)).collect();
        assert_eq!(state.verified_position.root(), build_tree_root(&expected_hashes));
    }

    #[tokio::test]
    async fn split_view_halts_the_log() {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();
        let leaves: Vec<Vec<u8>> = (0..3u8).map(raw_leaf).collect();
        let wire = Arc::new(MockWire {
            key: key.clone(),
            leaves,
            served_tree_size: StdMutex::new(3),
        });
        let state_provider: Arc<dyn StateProvider> = Arc::new(InMemoryStateProvider::new());
        let log = test_log(&key);
        let config = Config::default();
        let cancel = CancellationToken::new();

        {
            let wire: Arc<dyn WireClient> = wire.clone();
            let mut monitor = Monitor::new(log.clone(), wire, state_provider.clone(), &config, cancel.clone());
            monitor.run_cycle().await.unwrap();
        }

        // Same size, but swap which leaves are "in" the tree by altering one
        // without changing served_tree_size — simulate a split view by
        // directly forging a conflicting stored SignedTreeHead next cycle.
        let mut state = state_provider.load_log_state(log.id, &cancel).await.unwrap().unwrap();
        let mut bad_root = state.verified_sth.as_ref().unwrap().root_hash;
        bad_root[0] ^= 1;
        if let Some(sth) = state.verified_sth.as_mut() {
            sth.root_hash = bad_root;
        }
        state_provider.store_log_state(log.id, &state, &cancel).await.unwrap();

        let wire: Arc<dyn WireClient> = wire.clone();
        let mut monitor = Monitor::new(log, wire, state_provider.clone(), &config, cancel.clone());
        let err = monitor.run_cycle().await.unwrap_err();
        assert!(matches!(err, Error::SplitView { .. }));
    }

    #[tokio::test]
    async fn start_at_end_skips_history_for_pow2_size() {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();
        let leaves: Vec<Vec<u8>> = (0..4u8).map(raw_leaf).collect();
        let wire: Arc<dyn WireClient> = Arc::new(MockWire {
            key: key.clone(),
            leaves,
            served_tree_size: StdMutex::new(4),
        });
        let state_provider: Arc<dyn StateProvider> = Arc::new(InMemoryStateProvider::new());
        let log = test_log(&key);
        let mut config = Config::default();
        config.start_at_end = true;
        let cancel = CancellationToken::new();
        let mut monitor = Monitor::new(log.clone(), wire, state_provider.clone(), &config, cancel.clone());

        monitor.run_cycle().await.unwrap();

        let state = state_provider.load_log_state(log.id, &cancel).await.unwrap().unwrap();
        assert!(state.bootstrapped_without_history);
        assert_eq!(state.verified_position.size(), 4);
        // No entries were ever fetched, but the position is still the
        // correct collapsed representation at this size.
    }

    #[tokio::test]
    async fn malformed_entries_advance_position_without_emitting_a_cert() {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();
        // raw_leaf() is not a valid MerkleTreeLeaf, so every entry fails to decode.
        let leaves: Vec<Vec<u8>> = (0..3u8).map(raw_leaf).collect();
        let wire: Arc<dyn WireClient> = Arc::new(MockWire {
            key: key.clone(),
            leaves: leaves.clone(),
            served_tree_size: StdMutex::new(3),
        });
        let state_provider = Arc::new(InMemoryStateProvider::new());
        let log = test_log(&key);
        let mut config = Config::default();
        config.watch_list = crate::watchlist::WatchList::new(["example.com".to_owned()]);
        let cancel = CancellationToken::new();
        let sp: Arc<dyn StateProvider> = state_provider.clone();
        let mut monitor = Monitor::new(log.clone(), wire, sp.clone(), &config, cancel.clone());

        monitor.run_cycle().await.unwrap();

        let state = sp.load_log_state(log.id, &cancel).await.unwrap().unwrap();
        assert_eq!(state.verified_position.size(), 3);
        assert_eq!(state_provider.malformed_entries().await.len(), 3);
        assert!(state_provider.discovered_certs().await.is_empty());
    }

    struct BadConsistencyWire {
        inner: MockWire,
    }

    #[async_trait]
    impl WireClient for BadConsistencyWire {
        async fn get_sth(&self) -> Result<SignedTreeHead, Error> {
            self.inner.get_sth().await
        }

        async fn get_consistency(&self, _first: u64, _second: u64) -> Result<Vec<[u8; 32]>, Error> {
            Ok(vec![[0xffu8; 32]])
        }

        async fn get_entries_batch(&self, start: u64, end_inclusive: u64) -> Result<Vec<RawEntry>, Error> {
            self.inner.get_entries_batch(start, end_inclusive).await
        }

        async fn get_roots(&self) -> Result<Vec<Vec<u8>>, Error> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn bad_consistency_proof_halts_the_log() {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();
        // Bootstrap at a power-of-two size via start_at_end so the first
        // cycle never touches get_consistency at all.
        let leaves: Vec<Vec<u8>> = (0..5u8).map(raw_leaf).collect();
        let state_provider: Arc<dyn StateProvider> = Arc::new(InMemoryStateProvider::new());
        let log = test_log(&key);
        let mut config = Config::default();
        config.start_at_end = true;
        let cancel = CancellationToken::new();

        {
            let inner = MockWire {
                key: key.clone(),
                leaves: leaves.clone(),
                served_tree_size: StdMutex::new(2),
            };
            let wire: Arc<dyn WireClient> = Arc::new(BadConsistencyWire { inner });
            let mut monitor = Monitor::new(log.clone(), wire, state_provider.clone(), &config, cancel.clone());
            monitor.run_cycle().await.unwrap();
        }

        // Log grows from 2 to 5, but get_consistency hands back a proof
        // that doesn't actually connect the two roots.
        let inner = MockWire {
            key: key.clone(),
            leaves,
            served_tree_size: StdMutex::new(5),
        };
        let wire: Arc<dyn WireClient> = Arc::new(BadConsistencyWire { inner });
        let mut monitor = Monitor::new(log, wire, state_provider.clone(), &config, cancel.clone());
        let err = monitor.run_cycle().await.unwrap_err();
        assert!(matches!(err, Error::InvalidConsistencyProof { .. }));
    }

    #[tokio::test]
    async fn a_verified_sth_is_removed_from_the_stored_set() {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();
        let leaves: Vec<Vec<u8>> = (0..3u8).map(raw_leaf).collect();
        let wire: Arc<dyn WireClient> = Arc::new(MockWire {
            key: key.clone(),
            leaves,
            served_tree_size: StdMutex::new(3),
        });
        let state_provider = Arc::new(InMemoryStateProvider::new());
        let sp: Arc<dyn StateProvider> = state_provider.clone();
        let log = test_log(&key);
        let config = Config::default();
        let cancel = CancellationToken::new();
        let mut monitor = Monitor::new(log.clone(), wire, sp.clone(), &config, cancel.clone());

        monitor.run_cycle().await.unwrap();

        assert!(sp.load_sths(log.id, &cancel).await.unwrap().is_empty());
    }

    struct FailingWire;

    #[async_trait]
    impl WireClient for FailingWire {
        async fn get_sth(&self) -> Result<SignedTreeHead, Error> {
            Err(Error::Unknown("simulated failure".to_owned()))
        }

        async fn get_consistency(&self, _first: u64, _second: u64) -> Result<Vec<[u8; 32]>, Error> {
            Ok(Vec::new())
        }

        async fn get_entries_batch(&self, _start: u64, _end_inclusive: u64) -> Result<Vec<RawEntry>, Error> {
            Ok(Vec::new())
        }

        async fn get_roots(&self) -> Result<Vec<Vec<u8>>, Error> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn circuit_breaker_halts_the_log_after_consecutive_failures() {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();
        let wire: Arc<dyn WireClient> = Arc::new(FailingWire);
        let state_provider: Arc<dyn StateProvider> = Arc::new(InMemoryStateProvider::new());
        let log = test_log(&key);
        let mut config = Config::default();
        config.circuit_breaker_threshold = 1;
        let cancel = CancellationToken::new();
        let monitor = Monitor::new(log, wire, state_provider, &config, cancel);

        let err = monitor.run().await.unwrap_err();
        assert!(matches!(err, Error::CircuitBroken { consecutive_failures: 1 }));
    }
}
