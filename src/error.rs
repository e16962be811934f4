//! Error taxonomy for the pipeline.
//!
//! Per-item errors (`SourceFetchError`, `ParseError`, `ProbeError`,
//! `HistoryStoreError`) are converted into data by their stage and never
//! abort a run. `ConfigValidationError` and `OutputError` are fatal.

use thiserror::Error;

use crate::models::ErrorKind;

/// Failure to retrieve one source.
#[derive(Debug, Error)]
pub enum SourceFetchError {
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("request timed out")]
    Timeout,
    #[error("response exceeded {0} bytes")]
    TooLarge(usize),
    #[error("no text was handed in for channel '{0}'")]
    MissingChannelText(String),
    #[error("run deadline reached before the fetch completed")]
    Deadline,
    #[error("run was cancelled")]
    Cancelled,
}

impl SourceFetchError {
    /// Timeouts, 5xx, 429 and connection-level failures are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            SourceFetchError::Timeout => true,
            SourceFetchError::HttpStatus(status) => *status == 429 || *status >= 500,
            SourceFetchError::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            SourceFetchError::TooLarge(_)
            | SourceFetchError::MissingChannelText(_)
            | SourceFetchError::Deadline
            | SourceFetchError::Cancelled => false,
        }
    }
}

/// A recognized entry that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}: {snippet}")]
pub struct ParseError {
    pub snippet: String,
    pub reason: String,
}

impl ParseError {
    pub fn new(entry: &str, reason: impl Into<String>) -> Self {
        let snippet: String = entry.chars().take(64).collect();
        ParseError {
            snippet,
            reason: reason.into(),
        }
    }
}

/// Failure of one reachability probe.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("probe timed out")]
    Timeout,
    #[error("connection refused")]
    Refused,
    #[error("DNS resolution failed: {0}")]
    Dns(String),
    #[error("TLS handshake failed: {0}")]
    Tls(String),
    #[error("host unreachable: {0}")]
    Unreachable(String),
    #[error("probe failed: {0}")]
    Other(String),
}

impl ProbeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProbeError::Timeout => ErrorKind::Timeout,
            ProbeError::Refused => ErrorKind::Refused,
            ProbeError::Dns(_) => ErrorKind::Dns,
            ProbeError::Tls(_) => ErrorKind::Tls,
            ProbeError::Unreachable(_) => ErrorKind::Unreachable,
            ProbeError::Other(_) => ErrorKind::Other,
        }
    }

    pub fn from_io(err: &std::io::Error) -> Self {
        use std::io::ErrorKind as Io;
        match err.kind() {
            Io::ConnectionRefused => ProbeError::Refused,
            Io::TimedOut => ProbeError::Timeout,
            Io::HostUnreachable | Io::NetworkUnreachable | Io::AddrNotAvailable => {
                ProbeError::Unreachable(err.to_string())
            }
            _ => ProbeError::Other(err.to_string()),
        }
    }

    /// Only timeouts are worth retrying; a refusal will not change in a few
    /// hundred milliseconds.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProbeError::Timeout)
    }
}

/// Failure to read or write persisted history.
#[derive(Debug, Error)]
pub enum HistoryStoreError {
    #[error("history I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt history record: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Invalid run configuration. Fatal, raised before any network activity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigValidationError {
    #[error("'{field}' must be greater than zero")]
    Zero { field: &'static str },
    #[error("unknown protocol '{0}'")]
    UnknownProtocol(String),
    #[error("unknown output format '{0}'")]
    UnknownFormat(String),
    #[error("no output formats requested")]
    NoFormats,
    #[error("invalid {field} pattern: {message}")]
    InvalidPattern { field: &'static str, message: String },
    #[error("cannot read settings: {0}")]
    Unreadable(String),
}

/// Failure to produce output files. Fatal.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("output directory '{path}' is not writable: {source}")]
    Directory {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write '{path}': {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize {format}: {message}")]
    Serialize { format: &'static str, message: String },
}
