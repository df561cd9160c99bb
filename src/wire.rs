//! The CT-log wire protocol (RFC 6962 §4): `get-sth`, `get-sth-consistency`,
//! `get-entries`, `get-roots`. All four are plain `GET`s against a log's
//! base URL, answered with a JSON body.
//!
//! This module only fetches and validates the wire envelope — numeric
//! ranges, base64, body size. It does not interpret leaf bytes; that's
//! `decode`'s job, and it does not decide what a response *means* for a
//! log's state machine; that's `monitor`'s job.

use async_stream::try_stream;
use async_trait::async_trait;
use base64::Engine;
use futures::Stream;
use reqwest::{Client, Url};

use crate::error::Error;
use crate::jsons;
use crate::sth::SignedTreeHead;

/// No CT endpoint legitimately returns more than this; anything larger is
/// either a misbehaving log or an attempt to exhaust memory.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

const USER_AGENT: &str = concat!("ctmonitor/", env!("CARGO_PKG_VERSION"));

pub fn new_http_client() -> Result<Client, Error> {
    Client::builder()
        .user_agent(USER_AGENT)
        .gzip(true)
        .build()
        .map_err(Error::from)
}

/// CT's `uint64` fields are documented as fitting an unsigned 63-bit
/// domain (RFC 6962 §4.1) precisely so they round-trip through the
/// signed 64-bit integers some log implementations use internally.
fn check_u63(v: u64, field: &str) -> Result<u64, Error> {
    if v > i64::MAX as u64 {
        return Err(Error::MalformedResponseBody(format!(
            "{} value {} exceeds the documented unsigned 63-bit domain",
            field, v
        )));
    }
    Ok(v)
}

fn decode_base64(s: &str, field: &str) -> Result<Vec<u8>, Error> {
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .map_err(|e| Error::MalformedResponseBody(format!("bad base64 in {}: {}", field, e)))
}

fn decode_hash(s: &str, field: &str) -> Result<[u8; 32], Error> {
    let v = decode_base64(s, field)?;
    v.try_into()
        .map_err(|_| Error::MalformedResponseBody(format!("{} is not 32 bytes", field)))
}

async fn get_json<T: serde::de::DeserializeOwned>(
    client: &Client,
    base_url: &Url,
    path_and_query: &str,
) -> Result<T, Error> {
    let url = base_url
        .join(path_and_query)
        .map_err(|e| Error::InvalidArgument(format!("bad path {}: {}", path_and_query, e)))?;
    get_json_response(client, url).await
}

async fn get_json_response<T: serde::de::DeserializeOwned>(
    client: &Client,
    url: Url,
) -> Result<T, Error> {
    let resp = client.get(url).send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(Error::InvalidResponseStatus(status));
    }
    let body = resp.bytes().await?;
    if body.len() > MAX_BODY_BYTES {
        return Err(Error::MalformedResponseBody(format!(
            "response body of {} bytes exceeds the {} byte cap",
            body.len(),
            MAX_BODY_BYTES
        )));
    }
    serde_json::from_slice(&body).map_err(|e| Error::MalformedResponseBody(e.to_string()))
}

/// `get-sth`.
pub async fn get_sth(client: &Client, base_url: &Url) -> Result<SignedTreeHead, Error> {
    let j: jsons::STH = get_json(client, base_url, "ct/v1/get-sth").await?;
    check_u63(j.tree_size, "tree_size")?;
    check_u63(j.timestamp, "timestamp")?;
    SignedTreeHead::from_json(&j)
}

/// `get-sth-consistency`; returns the empty proof when `first == 0` or
/// `first == second`, as RFC 6962 §4.2 mandates servers to.
pub async fn get_consistency(
    client: &Client,
    base_url: &Url,
    first: u64,
    second: u64,
) -> Result<Vec<[u8; 32]>, Error> {
    if first == 0 || first == second {
        return Ok(Vec::new());
    }
    let path = format!("ct/v1/get-sth-consistency?first={}&second={}", first, second);
    let j: jsons::ConsistencyProof = get_json(client, base_url, &path).await?;
    j.consistency
        .iter()
        .map(|s| decode_hash(s, "consistency proof node"))
        .collect()
}

/// One raw leaf and its accompanying extra data, undecoded.
#[derive(Clone, Debug)]
pub struct RawEntry {
    pub leaf_input: Vec<u8>,
    pub extra_data: Vec<u8>,
}

impl TryFrom<&jsons::LeafEntry> for RawEntry {
    type Error = Error;

    fn try_from(e: &jsons::LeafEntry) -> Result<Self, Error> {
        Ok(RawEntry {
            leaf_input: decode_base64(&e.leaf_input, "leaf_input")?,
            extra_data: decode_base64(&e.extra_data, "extra_data")?,
        })
    }
}

/// `get-entries` for a single batch `[start, end]` (inclusive, per RFC 6962
/// §4.6). A 4xx response is the documented "not yet available" signal, not
/// a failure — the caller backs off and retries rather than treating the
/// log as broken. A 5xx or transport failure is a real error.
pub async fn get_entries_batch(
    client: &Client,
    base_url: &Url,
    start: u64,
    end_inclusive: u64,
) -> Result<Vec<RawEntry>, Error> {
    check_u63(start, "start")?;
    check_u63(end_inclusive, "end")?;
    let path = format!("ct/v1/get-entries?start={}&end={}", start, end_inclusive);
    let url = base_url
        .join(&path)
        .map_err(|e| Error::InvalidArgument(format!("bad path {}: {}", path, e)))?;
    let resp = client.get(url).send().await?;
    let status = resp.status();
    if status.is_client_error() {
        return Ok(Vec::new());
    }
    if !status.is_success() {
        return Err(Error::InvalidResponseStatus(status));
    }
    let body = resp.bytes().await?;
    if body.len() > MAX_BODY_BYTES {
        return Err(Error::MalformedResponseBody(format!(
            "response body of {} bytes exceeds the {} byte cap",
            body.len(),
            MAX_BODY_BYTES
        )));
    }
    let parsed: jsons::GetEntries =
        serde_json::from_slice(&body).map_err(|e| Error::MalformedResponseBody(e.to_string()))?;
    parsed.entries.iter().map(RawEntry::try_from).collect()
}

/// Streams `[start, end)` in batches of at most `batch_size`, yielding
/// `(index, entry)` pairs in order. Stops (without error) the first time a
/// batch comes back empty — the log has nothing more to offer yet.
pub fn get_entries_stream<'a>(
    client: &'a Client,
    base_url: &'a Url,
    start: u64,
    end: u64,
    batch_size: u64,
) -> impl Stream<Item = Result<(u64, RawEntry), Error>> + 'a {
    try_stream! {
        let mut next_index = start;
        while next_index < end {
            let batch_end = u64::min(next_index + batch_size, end);
            let entries = get_entries_batch(client, base_url, next_index, batch_end - 1).await?;
            if entries.is_empty() {
                break;
            }
            for (offset, entry) in entries.into_iter().enumerate() {
                yield (next_index + offset as u64, entry);
            }
            next_index = batch_end;
        }
    }
}

/// `get-roots`; returns each accepted root certificate, DER-encoded.
pub async fn get_roots(client: &Client, base_url: &Url) -> Result<Vec<Vec<u8>>, Error> {
    let j: jsons::GetRoots = get_json(client, base_url, "ct/v1/get-roots").await?;
    j.certificates
        .iter()
        .map(|s| decode_base64(s, "get-roots certificate"))
        .collect()
}

/// Abstracts the four wire operations a monitor needs, so the monitor's
/// state machine can be driven in tests against a canned log without a
/// network. `HttpWireClient` is the only production implementation.
#[async_trait]
pub trait WireClient: Send + Sync {
    async fn get_sth(&self) -> Result<SignedTreeHead, Error>;
    async fn get_consistency(&self, first: u64, second: u64) -> Result<Vec<[u8; 32]>, Error>;
    async fn get_entries_batch(&self, start: u64, end_inclusive: u64) -> Result<Vec<RawEntry>, Error>;
    async fn get_roots(&self) -> Result<Vec<Vec<u8>>, Error>;
}

/// The production `WireClient`, backed by a real `reqwest::Client`.
pub struct HttpWireClient {
    client: Client,
    base_url: Url,
}

impl HttpWireClient {
    pub fn new(client: Client, base_url: Url) -> Self {
        HttpWireClient { client, base_url }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

#[async_trait]
impl WireClient for HttpWireClient {
    async fn get_sth(&self) -> Result<SignedTreeHead, Error> {
        get_sth(&self.client, &self.base_url).await
    }

    async fn get_consistency(&self, first: u64, second: u64) -> Result<Vec<[u8; 32]>, Error> {
        get_consistency(&self.client, &self.base_url, first, second).await
    }

    async fn get_entries_batch(&self, start: u64, end_inclusive: u64) -> Result<Vec<RawEntry>, Error> {
        get_entries_batch(&self.client, &self.base_url, start, end_inclusive).await
    }

    async fn get_roots(&self) -> Result<Vec<Vec<u8>>, Error> {
        get_roots(&self.client, &self.base_url).await
    }
}
