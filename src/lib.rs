//! A continuous monitor for Certificate Transparency logs.
//!
//! Given a log list and a watch list of DNS names, this crate polls each
//! log's signed tree head, verifies it grew consistently from whatever was
//! last verified, downloads and decodes the new entries, and reports any
//! certificate whose identities match the watch list. State persists
//! across restarts through the [`StateProvider`] trait, so an operator can
//! back it with a filesystem, a database, or anything else that implements
//! the trait.
//!
//! The entry point is [`Supervisor`]: it owns the log-list refresh loop,
//! starts and cancels one [`Monitor`] task per log, and runs periodic
//! health checks independent of any single log's poll cycle.
//!
//! ```no_run
//! use std::sync::Arc;
//! use ctmonitor::{Config, Supervisor};
//! use ctmonitor::log_list::HttpLogListSource;
//! use ctmonitor::refimpl::memory::InMemoryStateProvider;
//! use ctmonitor::wire::HttpWireClient;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), ctmonitor::Error> {
//! let config = Config::default();
//! let client = ctmonitor::wire::new_http_client()?;
//! let log_list = Arc::new(HttpLogListSource::new(
//!     client.clone(),
//!     "https://www.gstatic.com/ct/log_list/v3/log_list.json".parse().unwrap(),
//!     ctmonitor::SthSignatureAlgorithm::EcdsaP256Sha256,
//! ));
//! let state_provider = Arc::new(InMemoryStateProvider::new());
//! let wire_factory = Arc::new(move |log: &ctmonitor::state::Log| {
//!     let url = log.base_url.parse().expect("log list gave us a bad URL");
//!     Arc::new(HttpWireClient::new(client.clone(), url)) as Arc<dyn ctmonitor::wire::WireClient>
//! });
//! let cancel = CancellationToken::new();
//! let supervisor = Supervisor::new(config, log_list, wire_factory, state_provider, cancel);
//! supervisor.run().await
//! # }
//! ```

#[cfg(not(any(feature = "native-tls", feature = "rustls-tls")))]
compile_error!("You must enable either the `native-tls` or `rustls-tls` feature.");

#[cfg(all(feature = "native-tls", feature = "rustls-tls"))]
compile_error!("You must enable only one of the `native-tls` and `rustls-tls` features, not both.");

pub mod backoff;
pub mod certutils;
pub mod config;
pub mod decode;
pub mod error;
pub mod jsons;
pub mod log_list;
pub mod merkle;
pub mod monitor;
pub mod refimpl;
pub mod state;
pub mod sth;
pub mod supervisor;
pub mod utils;
pub mod watchlist;
pub mod wire;

pub use config::Config;
pub use error::Error;
pub use monitor::Monitor;
pub use state::{DiscoveredCert, HealthCheckFailure, Log, LogEntry, LogID, LogLifecycle, LogState, StateProvider};
pub use sth::{SignedTreeHead, SthSignatureAlgorithm};
pub use supervisor::{Supervisor, WireClientFactory};
pub use watchlist::WatchList;
pub use wire::{HttpWireClient, WireClient};
