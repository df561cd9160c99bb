//! The crate's error currency.
//!
//! Every error is attributable to a log (or `None` for log-list-wide
//! errors) and falls into one of the taxonomy buckets a caller needs to
//! decide what to do next: transient and worth retrying, fatal for one log,
//! or fatal for the whole process (only cancellation).

use std::{fmt, io, path};

use crate::merkle::ConsistencyError;

/// Errors that this crate can produce.
#[derive(Debug)]
pub enum Error {
    /// Something strange happened.
    Unknown(String),

    /// You provided something bad.
    InvalidArgument(String),

    /// File IO error.
    FileIO(path::PathBuf, io::Error),

    /// Network IO error (DNS, TCP, TLS, HTTP-level transport failure).
    NetIO(reqwest::Error),

    /// The server responded with something other than 200, and it isn't the
    /// documented "not yet available" case for `get-entries`.
    InvalidResponseStatus(reqwest::StatusCode),

    /// Server responded with something bad (malformed JSON, invalid base64,
    /// a numeric field outside its documented unsigned 63-bit domain, a
    /// response body over the size cap).
    MalformedResponseBody(String),

    /// The CT server provided us with an invalid STH signature.
    InvalidSignature(String),

    /// Server returned an invalid consistency proof.
    InvalidConsistencyProof {
        prev_size: u64,
        new_size: u64,
        desc: String,
    },

    /// Two STHs with equal `tree_size` but different `root_hash` — a split
    /// view. Fatal for the log.
    SplitView {
        tree_size: u64,
        root_a: [u8; 32],
        root_b: [u8; 32],
    },

    /// The leaves we downloaded and appended do not fold to the STH's root
    /// hash, even though the consistency proof against the previous STH
    /// verified. Fatal for the log — either the server is truncating
    /// entries or our decode of the wire format is wrong.
    DownloadRootMismatch { tree_size: u64 },

    /// Something's wrong with a certificate or pre-certificate.
    BadCertificate(String),

    /// A malformed Merkle tree leaf; non-fatal, advances position.
    MalformedEntry { index: u64, desc: String },

    /// We asked for a certain entry expecting it to be there, but the
    /// server gave us nothing after repeated retries.
    ExpectedEntry(u64),

    /// Persisting state failed; the in-memory position must not advance
    /// either.
    Persistence(String),

    /// The operation was cancelled. Never surfaced via `notify_error` —
    /// this bubbles to the caller instead.
    Cancelled,

    /// A configured option names a capability this build doesn't implement
    /// (e.g. a notification sink kind with no reference backend).
    Unsupported(String),

    /// The log's per-log circuit breaker tripped: too many consecutive
    /// cycle failures in a row. Fatal for the log until an operator
    /// investigates and restarts monitoring.
    CircuitBroken { consecutive_failures: u32 },
}

impl Error {
    pub fn from_consistency(old_size: u64, new_size: u64, e: ConsistencyError) -> Self {
        Error::InvalidConsistencyProof {
            prev_size: old_size,
            new_size,
            desc: e.to_string(),
        }
    }

    /// Whether this error represents a fatal, per-log integrity violation
    /// (split view or bad consistency proof) or a tripped circuit breaker,
    /// either of which must halt the log until an operator intervenes.
    pub fn is_fatal_for_log(&self) -> bool {
        matches!(
            self,
            Error::InvalidConsistencyProof { .. }
                | Error::SplitView { .. }
                | Error::DownloadRootMismatch { .. }
                | Error::CircuitBroken { .. }
        )
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Unknown(desc) => write!(f, "{}", desc),
            Error::InvalidArgument(desc) => write!(f, "invalid argument: {}", desc),
            Error::FileIO(path, e) => write!(f, "{}: {}", path.to_string_lossy(), e),
            Error::NetIO(e) => write!(f, "network IO error: {}", e),
            Error::InvalidResponseStatus(code) => {
                write!(f, "server responded with {} {}", code.as_u16(), code.as_str())
            }
            Error::MalformedResponseBody(desc) => {
                write!(f, "unable to parse server response: {}", desc)
            }
            Error::InvalidSignature(desc) => write!(f, "invalid signature received: {}", desc),
            Error::InvalidConsistencyProof {
                prev_size,
                new_size,
                desc,
            } => write!(
                f,
                "server provided an invalid consistency proof from {} to {}: {}",
                prev_size, new_size, desc
            ),
            Error::SplitView {
                tree_size,
                root_a,
                root_b,
            } => write!(
                f,
                "log presented a split view at tree_size {}: {} vs {}",
                tree_size,
                crate::utils::u8_to_hex(root_a),
                crate::utils::u8_to_hex(root_b)
            ),
            Error::DownloadRootMismatch { tree_size } => write!(
                f,
                "downloaded entries do not fold to the STH root at tree_size {}",
                tree_size
            ),
            Error::BadCertificate(desc) => {
                write!(f, "certificate returned by the server has a problem: {}", desc)
            }
            Error::MalformedEntry { index, desc } => {
                write!(f, "entry at index {} is malformed: {}", index, desc)
            }
            Error::ExpectedEntry(index) => write!(
                f,
                "the server did not return the leaf with index {}, even though we believe it should be there",
                index
            ),
            Error::Persistence(desc) => write!(f, "failed to persist state: {}", desc),
            Error::Cancelled => write!(f, "operation cancelled"),
            Error::Unsupported(desc) => write!(f, "unsupported: {}", desc),
            Error::CircuitBroken { consecutive_failures } => write!(
                f,
                "circuit breaker tripped after {} consecutive failures",
                consecutive_failures
            ),
        }
    }
}

impl std::error::Error for Error {}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::NetIO(e)
    }
}
