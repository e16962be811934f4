use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a reachability probe failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Timeout,
    Refused,
    Dns,
    Tls,
    Unreachable,
    Other,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Refused => "refused",
            ErrorKind::Dns => "dns",
            ErrorKind::Tls => "tls",
            ErrorKind::Unreachable => "unreachable",
            ErrorKind::Other => "other",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Geo data attached to a probed address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoInfo {
    pub country: Option<String>,
    pub city: Option<String>,
    pub asn: Option<u32>,
}

/// Outcome of one probe. Appended to history, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub identity: String,
    pub success: bool,
    pub latency_ms: Option<u64>,
    pub tested_at: DateTime<Utc>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub asn: Option<u32>,
    #[serde(default)]
    pub error_kind: Option<ErrorKind>,
}

impl TestResult {
    pub fn success(identity: &str, latency_ms: u64, tested_at: DateTime<Utc>) -> Self {
        TestResult {
            identity: identity.to_string(),
            success: true,
            latency_ms: Some(latency_ms),
            tested_at,
            country: None,
            city: None,
            asn: None,
            error_kind: None,
        }
    }

    pub fn failure(identity: &str, kind: ErrorKind, tested_at: DateTime<Utc>) -> Self {
        TestResult {
            identity: identity.to_string(),
            success: false,
            latency_ms: None,
            tested_at,
            country: None,
            city: None,
            asn: None,
            error_kind: Some(kind),
        }
    }

    pub fn with_geo(mut self, geo: GeoInfo) -> Self {
        self.country = geo.country;
        self.city = geo.city;
        self.asn = geo.asn;
        self
    }
}

/// Reliability aggregate derived from the history log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReliabilityRecord {
    pub identity: String,
    pub total_tests: u64,
    pub successful_tests: u64,
    pub avg_latency_ms: Option<f64>,
    pub last_seen: Option<DateTime<Utc>>,
    /// Recency-weighted success ratio in `[0, 1]`.
    pub reliability_score: f64,
}

impl ReliabilityRecord {
    pub fn empty(identity: &str) -> Self {
        ReliabilityRecord {
            identity: identity.to_string(),
            total_tests: 0,
            successful_tests: 0,
            avg_latency_ms: None,
            last_seen: None,
            reliability_score: 0.0,
        }
    }
}
