//! Where the supervisor gets its list of logs to monitor: an injectable
//! `LogListSource`, with an HTTP implementation fetching the well-known
//! log-list JSON (the schema the CT ecosystem's "all logs" lists use) and
//! a static implementation reading a local file — useful offline and in
//! tests that don't want a network dependency.

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::sth::SthSignatureAlgorithm;
use crate::state::{Log, LogID, LogLifecycle};

/// One log as described by the log-list JSON schema.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct JsonLog {
    description: String,
    log_id: String,
    key: String,
    url: String,
    submission_url: Option<String>,
    #[serde(default)]
    state: JsonLogState,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum JsonLogState {
    Usable {},
    Retired {},
    Rejected {},
    Qualified {},
    Pending {},
}

impl Default for JsonLogState {
    fn default() -> Self {
        JsonLogState::Usable {}
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct JsonOperator {
    name: String,
    logs: Vec<JsonLog>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct JsonLogList {
    operators: Vec<JsonOperator>,
}

fn lifecycle_of(s: &JsonLogState) -> LogLifecycle {
    match s {
        JsonLogState::Usable {} | JsonLogState::Qualified {} | JsonLogState::Pending {} => {
            LogLifecycle::Usable
        }
        JsonLogState::Retired {} => LogLifecycle::Retired,
        JsonLogState::Rejected {} => LogLifecycle::Rejected,
    }
}

fn parse_log_list(body: &[u8], default_signature_algorithm: SthSignatureAlgorithm) -> Result<Vec<Log>, Error> {
    let parsed: JsonLogList = serde_json::from_slice(body)
        .map_err(|e| Error::MalformedResponseBody(format!("bad log list JSON: {}", e)))?;
    let mut logs = Vec::new();
    for op in parsed.operators {
        for l in op.logs {
            let public_key_der = base64::engine::general_purpose::STANDARD
                .decode(&l.key)
                .map_err(|e| Error::MalformedResponseBody(format!("bad log key base64: {}", e)))?;
            let declared_id = base64::engine::general_purpose::STANDARD
                .decode(&l.log_id)
                .map_err(|e| Error::MalformedResponseBody(format!("bad log_id base64: {}", e)))?;
            let id = LogID::from_public_key_der(&public_key_der);
            if declared_id.len() == 32 && declared_id != id.0 {
                return Err(Error::MalformedResponseBody(format!(
                    "log {} declares log_id that does not match sha256(key)",
                    l.description
                )));
            }
            let mut base_url = l.url.clone();
            if !base_url.ends_with('/') {
                base_url.push('/');
            }
            logs.push(Log {
                id,
                base_url: base_url.clone(),
                submission_url: l.submission_url.unwrap_or(base_url),
                public_key_der,
                signature_algorithm: default_signature_algorithm,
                operator: op.name.clone(),
                lifecycle: lifecycle_of(&l.state),
            });
        }
    }
    Ok(logs)
}

/// Abstracts over where the list of logs to monitor comes from.
#[async_trait]
pub trait LogListSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<Log>, Error>;
}

/// Fetches and parses the log-list JSON over HTTPS.
pub struct HttpLogListSource {
    client: reqwest::Client,
    url: reqwest::Url,
    default_signature_algorithm: SthSignatureAlgorithm,
}

impl HttpLogListSource {
    pub fn new(
        client: reqwest::Client,
        url: reqwest::Url,
        default_signature_algorithm: SthSignatureAlgorithm,
    ) -> Self {
        HttpLogListSource {
            client,
            url,
            default_signature_algorithm,
        }
    }
}

#[async_trait]
impl LogListSource for HttpLogListSource {
    async fn fetch(&self) -> Result<Vec<Log>, Error> {
        let resp = self.client.get(self.url.clone()).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::InvalidResponseStatus(status));
        }
        let body = resp.bytes().await?;
        parse_log_list(&body, self.default_signature_algorithm)
    }
}

/// Reads a local log-list JSON file once; `fetch` always returns the same
/// parsed result. Useful offline and in tests.
pub struct StaticLogListSource {
    logs: Vec<Log>,
}

impl StaticLogListSource {
    pub fn from_json_bytes(body: &[u8], default_signature_algorithm: SthSignatureAlgorithm) -> Result<Self, Error> {
        Ok(StaticLogListSource {
            logs: parse_log_list(body, default_signature_algorithm)?,
        })
    }

    pub fn from_file(path: &std::path::Path, default_signature_algorithm: SthSignatureAlgorithm) -> Result<Self, Error> {
        let data = std::fs::read(path).map_err(|e| Error::FileIO(path.to_path_buf(), e))?;
        Self::from_json_bytes(&data, default_signature_algorithm)
    }

    pub fn from_logs(logs: Vec<Log>) -> Self {
        StaticLogListSource { logs }
    }
}

#[async_trait]
impl LogListSource for StaticLogListSource {
    async fn fetch(&self) -> Result<Vec<Log>, Error> {
        Ok(self.logs.clone())
    }
}
