//! Top-level orchestration: load the log list, run one `Monitor` task per
//! usable log, reconcile as the list changes, and run a periodic health
//! check independent of any single log's cycle.
//!
//! Fanout is per-log independent: one log halting never blocks or taints
//! another, since each runs its own task and its own `Result`.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::Error;
use crate::log_list::LogListSource;
use crate::monitor::Monitor;
use crate::state::{HealthCheckFailure, Log, LogID, LogLifecycle, StateProvider, SystemTimeMs};
use crate::wire::WireClient;

/// Builds a `WireClient` for a given log's base URL. Production code wires
/// this to `HttpWireClient::new`; tests can hand in a closure that returns
/// canned mocks keyed by URL.
pub type WireClientFactory = Arc<dyn Fn(&Log) -> Arc<dyn WireClient> + Send + Sync>;

struct RunningLog {
    handle: JoinHandle<Result<(), Error>>,
    cancel: CancellationToken,
}

/// Runs and reconciles the fleet of per-log monitors described by a
/// `LogListSource` against a shared `StateProvider`.
pub struct Supervisor {
    config: Config,
    log_list: Arc<dyn LogListSource>,
    wire_factory: WireClientFactory,
    state_provider: Arc<dyn StateProvider>,
    cancel: CancellationToken,
    fanout: Arc<Semaphore>,
}

impl Supervisor {
    pub fn new(
        config: Config,
        log_list: Arc<dyn LogListSource>,
        wire_factory: WireClientFactory,
        state_provider: Arc<dyn StateProvider>,
        cancel: CancellationToken,
    ) -> Self {
        let fanout = Arc::new(Semaphore::new(config.max_fanout));
        Supervisor {
            config,
            log_list,
            wire_factory,
            state_provider,
            cancel,
            fanout,
        }
    }

    /// Runs until cancelled. Reconciles the log list every `poll_interval`
    /// and runs a health check every `health_check_interval`; both run on
    /// the same loop since neither is expensive enough to warrant its own
    /// task, and running them on one loop keeps their relative cadence
    /// deterministic in tests.
    pub async fn run(&self) -> Result<(), Error> {
        self.state_provider.prepare(&self.cancel).await?;

        let mut running: HashMap<LogID, RunningLog> = HashMap::new();
        let mut last_health_check = SystemTimeMs::now();

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            match self.log_list.fetch().await {
                Ok(logs) => self.reconcile(&logs, &mut running),
                Err(e) => {
                    log::warn!("log list refresh failed: {}", e);
                    let _ = self
                        .state_provider
                        .notify_health_check_failure(
                            None,
                            &HealthCheckFailure::StaleLogList { desc: e.to_string() },
                            &self.cancel,
                        )
                        .await;
                }
            }

            let now = SystemTimeMs::now();
            if last_health_check.elapsed_since(now) >= self.config.health_check_interval() {
                self.run_health_check(&running).await;
                last_health_check = now;
            }

            running.retain(|_, r| !r.handle.is_finished());

            if self.sleep_cancellably(self.config.poll_interval()).await {
                break;
            }
        }

        self.cancel.cancel();
        for (_, running_log) in running.drain() {
            let _ = running_log.handle.await;
        }
        Ok(())
    }

    async fn sleep_cancellably(&self, d: std::time::Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(d) => false,
            _ = self.cancel.cancelled() => true,
        }
    }

    /// Starts a `Monitor` task for every usable log not already running,
    /// and cancels tasks for logs that dropped out of the list or are no
    /// longer usable. Their on-disk state is left untouched — a log
    /// reappearing later (e.g. briefly marked `Pending`) resumes from where
    /// it left off.
    fn reconcile(&self, logs: &[Log], running: &mut HashMap<LogID, RunningLog>) {
        let mut seen = std::collections::HashSet::new();
        for log in logs {
            seen.insert(log.id);
            if log.lifecycle != LogLifecycle::Usable {
                if let Some(r) = running.remove(&log.id) {
                    log::info!("{}: no longer usable, cancelling", log.base_url);
                    r.cancel.cancel();
                }
                continue;
            }
            if running.contains_key(&log.id) {
                continue;
            }
            log::info!("{}: starting monitor", log.base_url);
            let log_cancel = self.cancel.child_token();
            let wire = (self.wire_factory)(log);
            let monitor = Monitor::with_fanout(
                log.clone(),
                wire,
                self.state_provider.clone(),
                &self.config,
                log_cancel.clone(),
                self.fanout.clone(),
            );
            let handle = tokio::spawn(monitor.run());
            running.insert(
                log.id,
                RunningLog {
                    handle,
                    cancel: log_cancel,
                },
            );
        }

        let dropped: Vec<LogID> = running.keys().filter(|id| !seen.contains(*id)).copied().collect();
        for id in dropped {
            if let Some(r) = running.remove(&id) {
                log::info!("log {} dropped from the log list, cancelling", id);
                r.cancel.cancel();
            }
        }
    }

    /// Independent of any single log's poll cycle: flags logs whose
    /// `last_success` has gone stale, or whose verified position trails the
    /// newest STH observed but not yet verified (a backlog, not outright
    /// staleness).
    async fn run_health_check(&self, running: &HashMap<LogID, RunningLog>) {
        for id in running.keys() {
            let state = match self.state_provider.load_log_state(*id, &self.cancel).await {
                Ok(Some(s)) => s,
                Ok(None) => continue,
                Err(e) => {
                    log::warn!("{}: health check could not load state: {}", id, e);
                    continue;
                }
            };

            let stale = match state.last_success {
                None => true,
                Some(t) => t.elapsed_since(SystemTimeMs::now()) >= self.config.health_check_interval(),
            };
            if stale {
                let _ = self
                    .state_provider
                    .notify_health_check_failure(
                        None,
                        &HealthCheckFailure::StaleSth {
                            last_success: state.last_success,
                            interval: self.config.health_check_interval(),
                        },
                        &self.cancel,
                    )
                    .await;
                continue;
            }

            let observed_sths = match self.state_provider.load_sths(*id, &self.cancel).await {
                Ok(sths) => sths,
                Err(e) => {
                    log::warn!("{}: health check could not load observed STHs: {}", id, e);
                    continue;
                }
            };
            let verified_size = state.verified_position.size();
            if let Some(observed_size) = observed_sths.last().map(|s| s.tree_size) {
                if observed_size > verified_size + self.config.batch_size {
                    let _ = self
                        .state_provider
                        .notify_health_check_failure(
                            None,
                            &HealthCheckFailure::Backlog {
                                verified_size,
                                observed_size,
                            },
                            &self.cancel,
                        )
                        .await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_list::StaticLogListSource;
    use crate::refimpl::memory::InMemoryStateProvider;
    use crate::state::LogLifecycle;
    use crate::sth::SignedTreeHead;
    use crate::wire::RawEntry;
    use async_trait::async_trait;
    use openssl::ec::{EcGroup, EcKey};
    use openssl::nid::Nid;
    use openssl::pkey::{PKey, Private};

    struct StubWire;

    #[async_trait]
    impl WireClient for StubWire {
        async fn get_sth(&self) -> Result<SignedTreeHead, Error> {
            Ok(SignedTreeHead {
                tree_size: 0,
                timestamp: 0,
                root_hash: crate::merkle::empty_hash(),
                signature: Vec::new(),
            })
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

    fn test_log(key: &PKey<Private>, name: &str) -> Log {
        Log {
            id: crate::state::LogID::from_public_key_der(&key.public_key_to_der().unwrap()),
            base_url: format!("https://{}.example.com/", name),
            submission_url: format!("https://{}.example.com/", name),
            public_key_der: key.public_key_to_der().unwrap(),
            signature_algorithm: crate::sth::SthSignatureAlgorithm::EcdsaP256Sha256,
            operator: "test".to_owned(),
            lifecycle: LogLifecycle::Usable,
        }
    }

    fn gen_key() -> PKey<Private> {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn reconcile_starts_and_cancels_monitors() {
        let config = Config::default();
        let state_provider: Arc<dyn StateProvider> = Arc::new(InMemoryStateProvider::new());
        let log_list: Arc<dyn LogListSource> = Arc::new(StaticLogListSource::from_logs(Vec::new()));
        let wire_factory: WireClientFactory = Arc::new(|_log: &Log| Arc::new(StubWire) as Arc<dyn WireClient>);
        let cancel = CancellationToken::new();
        let supervisor = Supervisor::new(config, log_list, wire_factory, state_provider, cancel.clone());

        let key_a = gen_key();
        let key_b = gen_key();
        let log_a = test_log(&key_a, "a");
        let log_b = test_log(&key_b, "b");

        let mut running = HashMap::new();
        supervisor.reconcile(&[log_a.clone(), log_b.clone()], &mut running);
        assert_eq!(running.len(), 2);

        // log_b drops out of the list entirely.
        supervisor.reconcile(&[log_a.clone()], &mut running);
        assert_eq!(running.len(), 1);
        assert!(running.contains_key(&log_a.id));

        cancel.cancel();
        for (_, r) in running.drain() {
            let _ = r.handle.await;
        }
    }

    #[tokio::test]
    async fn reconcile_cancels_logs_that_become_unusable() {
        let config = Config::default();
        let state_provider: Arc<dyn StateProvider> = Arc::new(InMemoryStateProvider::new());
        let log_list: Arc<dyn LogListSource> = Arc::new(StaticLogListSource::from_logs(Vec::new()));
        let wire_factory: WireClientFactory = Arc::new(|_log: &Log| Arc::new(StubWire) as Arc<dyn WireClient>);
        let cancel = CancellationToken::new();
        let supervisor = Supervisor::new(config, log_list, wire_factory, state_provider, cancel.clone());

        let key = gen_key();
        let mut log = test_log(&key, "retiring");
        let mut running = HashMap::new();
        supervisor.reconcile(&[log.clone()], &mut running);
        assert_eq!(running.len(), 1);

        log.lifecycle = LogLifecycle::Retired;
        supervisor.reconcile(&[log], &mut running);
        assert!(running.is_empty());

        cancel.cancel();
    }

    #[tokio::test]
    async fn health_check_flags_backlog_from_unverified_sth() {
        let config = Config::default();
        let state_provider = Arc::new(InMemoryStateProvider::new());
        let sp: Arc<dyn StateProvider> = state_provider.clone();
        let log_list: Arc<dyn LogListSource> = Arc::new(StaticLogListSource::from_logs(Vec::new()));
        let wire_factory: WireClientFactory = Arc::new(|_log: &Log| Arc::new(StubWire) as Arc<dyn WireClient>);
        let cancel = CancellationToken::new();
        let supervisor = Supervisor::new(config.clone(), log_list, wire_factory, sp.clone(), cancel.clone());

        let key = gen_key();
        let log = test_log(&key, "backlog");

        // A log that's been polling successfully (not stale), but whose
        // newest observed STH hasn't been verified yet.
        let mut state = crate::state::LogState::new_empty();
        state.last_success = Some(SystemTimeMs::now());
        sp.store_log_state(log.id, &state, &cancel).await.unwrap();
        sp.store_sth(
            log.id,
            &SignedTreeHead {
                tree_size: config.batch_size * 4,
                timestamp: 0,
                root_hash: crate::merkle::empty_hash(),
                signature: Vec::new(),
            },
            &cancel,
        )
        .await
        .unwrap();

        let mut running = HashMap::new();
        running.insert(
            log.id,
            RunningLog {
                handle: tokio::spawn(async { Ok(()) }),
                cancel: cancel.child_token(),
            },
        );
        supervisor.run_health_check(&running).await;

        let failures = state_provider.health_failures().await;
        assert_eq!(failures.len(), 1);
        assert!(failures[0].1.contains("trails observed STH size"));

        cancel.cancel();
    }
}
