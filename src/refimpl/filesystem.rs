//! A directory-per-log, JSON-document-per-record `StateProvider`. Layout:
//!
//! ```text
//! <root>/<log_id hex>/state.json      — the LogState
//! <root>/<log_id hex>/sths/<n>.json   — one file per stored SignedTreeHead, named by tree_size
//! ```
//!
//! Notifications are not persisted here — pair this with a
//! `refimpl::notify` sink for that half of the trait.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::state::{DiscoveredCert, HealthCheckFailure, Log, LogEntry, LogID, LogState, StateProvider};
use crate::sth::SignedTreeHead;
use crate::utils::u8_to_hex;

pub struct FilesystemStateProvider {
    root: PathBuf,
}

impl FilesystemStateProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FilesystemStateProvider { root: root.into() }
    }

    fn log_dir(&self, log_id: LogID) -> PathBuf {
        self.root.join(u8_to_hex(&log_id.0))
    }

    fn state_path(&self, log_id: LogID) -> PathBuf {
        self.log_dir(log_id).join("state.json")
    }

    fn sths_dir(&self, log_id: LogID) -> PathBuf {
        self.log_dir(log_id).join("sths")
    }

    async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), Error> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::FileIO(parent.to_path_buf(), e))?;
        }
        let data = serde_json::to_vec_pretty(value)
            .map_err(|e| Error::Persistence(format!("could not serialize {}: {}", path.display(), e)))?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &data)
            .await
            .map_err(|e| Error::FileIO(tmp.clone(), e))?;
        fs::rename(&tmp, path)
            .await
            .map_err(|e| Error::FileIO(path.to_path_buf(), e))?;
        Ok(())
    }
}

#[async_trait]
impl StateProvider for FilesystemStateProvider {
    async fn prepare(&self, _cancel: &CancellationToken) -> Result<(), Error> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| Error::FileIO(self.root.clone(), e))
    }

    async fn prepare_log(&self, log_id: LogID, _cancel: &CancellationToken) -> Result<(), Error> {
        let dir = self.log_dir(log_id);
        fs::create_dir_all(&dir).await.map_err(|e| Error::FileIO(dir, e))
    }

    async fn store_log_state(
        &self,
        log_id: LogID,
        state: &LogState,
        _cancel: &CancellationToken,
    ) -> Result<(), Error> {
        Self::write_json(&self.state_path(log_id), state).await
    }

    async fn load_log_state(
        &self,
        log_id: LogID,
        _cancel: &CancellationToken,
    ) -> Result<Option<LogState>, Error> {
        let path = self.state_path(log_id);
        match fs::read(&path).await {
            Ok(data) => serde_json::from_slice(&data)
                .map(Some)
                .map_err(|e| Error::Persistence(format!("corrupt {}: {}", path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::FileIO(path, e)),
        }
    }

    async fn store_sth(
        &self,
        log_id: LogID,
        sth: &SignedTreeHead,
        _cancel: &CancellationToken,
    ) -> Result<(), Error> {
        #[derive(serde::Serialize)]
        struct OnDisk<'a> {
            tree_size: u64,
            timestamp: u64,
            root_hash: &'a [u8; 32],
            signature: &'a [u8],
        }
        let path = self
            .sths_dir(log_id)
            .join(format!("{:020}-{}.json", sth.tree_size, sth.timestamp));
        Self::write_json(
            &path,
            &OnDisk {
                tree_size: sth.tree_size,
                timestamp: sth.timestamp,
                root_hash: &sth.root_hash,
                signature: &sth.signature,
            },
        )
        .await
    }

    async fn load_sths(
        &self,
        log_id: LogID,
        _cancel: &CancellationToken,
    ) -> Result<Vec<SignedTreeHead>, Error> {
        #[derive(serde::Deserialize)]
        struct OnDisk {
            tree_size: u64,
            timestamp: u64,
            root_hash: [u8; 32],
            signature: Vec<u8>,
        }
        let dir = self.sths_dir(log_id);
        let mut out = Vec::new();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(Error::FileIO(dir, e)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::FileIO(dir.clone(), e))?
        {
            let data = fs::read(entry.path())
                .await
                .map_err(|e| Error::FileIO(entry.path(), e))?;
            let parsed: OnDisk = serde_json::from_slice(&data)
                .map_err(|e| Error::Persistence(format!("corrupt {}: {}", entry.path().display(), e)))?;
            out.push(SignedTreeHead {
                tree_size: parsed.tree_size,
                timestamp: parsed.timestamp,
                root_hash: parsed.root_hash,
                signature: parsed.signature,
            });
        }
        out.sort_by_key(|s| s.tree_size);
        Ok(out)
    }

    async fn remove_sth(
        &self,
        log_id: LogID,
        sth: &SignedTreeHead,
        _cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let path = self
            .sths_dir(log_id)
            .join(format!("{:020}-{}.json", sth.tree_size, sth.timestamp));
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::FileIO(path, e)),
        }
    }

    async fn notify_cert(&self, _cert: &DiscoveredCert, _cancel: &CancellationToken) -> Result<(), Error> {
        Ok(())
    }

    async fn notify_malformed_entry(
        &self,
        _entry: &LogEntry,
        _error: &Error,
        _cancel: &CancellationToken,
    ) -> Result<(), Error> {
        Ok(())
    }

    async fn notify_health_check_failure(
        &self,
        _log: Option<&Log>,
        _failure: &HealthCheckFailure,
        _cancel: &CancellationToken,
    ) -> Result<(), Error> {
        Ok(())
    }

    async fn notify_error(
        &self,
        _log: Option<&Log>,
        _error: &Error,
        _cancel: &CancellationToken,
    ) -> Result<(), Error> {
        Ok(())
    }
}
