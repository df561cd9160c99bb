//! Binary entry point: load a TOML config file, wire up the configured
//! log list / state backend / notification sink, and run the supervisor
//! until interrupted with ctrl-c.

use std::path::PathBuf;
use std::sync::Arc;

use ctmonitor::config::{LogListSourceConfig, NotificationSinkConfig, StateBackendConfig};
use ctmonitor::log_list::{HttpLogListSource, LogListSource, StaticLogListSource};
use ctmonitor::refimpl::filesystem::FilesystemStateProvider;
use ctmonitor::refimpl::memory::InMemoryStateProvider;
use ctmonitor::refimpl::notify::{ForwardingStateProvider, JsonLinesNotifier, StdoutNotifier};
use ctmonitor::state::Log;
use ctmonitor::wire::HttpWireClient;
use ctmonitor::{Config, Error, StateProvider, Supervisor, SthSignatureAlgorithm, WireClientFactory};
use tokio_util::sync::CancellationToken;

fn usage() -> ! {
    eprintln!("usage: ctmonitor <config.toml>");
    std::process::exit(1);
}

fn build_log_list(config: &Config, client: reqwest::Client) -> Result<Arc<dyn LogListSource>, Error> {
    Ok(match &config.log_list_source {
        LogListSourceConfig::Http { url } => Arc::new(HttpLogListSource::new(
            client,
            url.parse()
                .map_err(|e| Error::InvalidArgument(format!("bad log_list_source.url: {}", e)))?,
            SthSignatureAlgorithm::EcdsaP256Sha256,
        )) as Arc<dyn LogListSource>,
        LogListSourceConfig::Static { path } => Arc::new(StaticLogListSource::from_file(
            std::path::Path::new(path),
            SthSignatureAlgorithm::EcdsaP256Sha256,
        )?) as Arc<dyn LogListSource>,
    })
}

fn build_state_provider(config: &Config) -> Result<Arc<dyn StateProvider>, Error> {
    match (&config.state_backend, &config.notification_sink) {
        (StateBackendConfig::Memory, NotificationSinkConfig::Stdout) => Ok(Arc::new(
            ForwardingStateProvider::new(InMemoryStateProvider::new(), StdoutNotifier),
        )),
        (StateBackendConfig::Memory, NotificationSinkConfig::JsonLines { path }) => {
            Ok(Arc::new(ForwardingStateProvider::new(
                InMemoryStateProvider::new(),
                JsonLinesNotifier::new(path.clone()),
            )))
        }
        (StateBackendConfig::Filesystem { dir }, NotificationSinkConfig::Stdout) => {
            Ok(Arc::new(ForwardingStateProvider::new(
                FilesystemStateProvider::new(PathBuf::from(dir)),
                StdoutNotifier,
            )))
        }
        (StateBackendConfig::Filesystem { dir }, NotificationSinkConfig::JsonLines { path }) => {
            Ok(Arc::new(ForwardingStateProvider::new(
                FilesystemStateProvider::new(PathBuf::from(dir)),
                JsonLinesNotifier::new(path.clone()),
            )))
        }
        (_, other) => Err(Error::Unsupported(format!(
            "notification sink {:?} has no reference backend",
            other
        ))),
    }
}

fn build_wire_factory(client: reqwest::Client) -> WireClientFactory {
    Arc::new(move |log: &Log| {
        let url = log
            .base_url
            .parse()
            .expect("log list source already validated this as a URL-shaped string");
        Arc::new(HttpWireClient::new(client.clone(), url)) as Arc<dyn ctmonitor::wire::WireClient>
    })
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    env_logger::init();

    let args: Vec<_> = std::env::args_os().collect();
    if args.len() != 2 {
        usage();
    }
    let config = Config::from_file(&PathBuf::from(&args[1]))?;

    let client = ctmonitor::wire::new_http_client()?;
    let log_list = build_log_list(&config, client.clone())?;
    let state_provider = build_state_provider(&config)?;
    let wire_factory = build_wire_factory(client);

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("received ctrl-c, shutting down");
            ctrl_c_cancel.cancel();
        }
    });

    let supervisor = Supervisor::new(config, log_list, wire_factory, state_provider, cancel);
    supervisor.run().await
}
