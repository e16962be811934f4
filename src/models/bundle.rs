use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::proxy::ProxyConfig;
use super::result::TestResult;
use crate::settings::Settings;

/// A tested endpoint together with its reliability score, if known.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedEntry {
    pub config: ProxyConfig,
    pub result: TestResult,
    pub reliability: Option<f64>,
}

impl RankedEntry {
    pub fn new(config: ProxyConfig, result: TestResult) -> Self {
        RankedEntry {
            config,
            result,
            reliability: None,
        }
    }
}

/// Aggregate statistics over the emitted entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BundleStats {
    pub total: usize,
    pub reachable: usize,
    pub by_protocol: BTreeMap<String, usize>,
    pub by_country: BTreeMap<String, usize>,
    pub avg_latency_ms: Option<f64>,
}

impl BundleStats {
    pub fn from_entries(entries: &[RankedEntry]) -> Self {
        let mut stats = BundleStats {
            total: entries.len(),
            ..Default::default()
        };
        let mut latency_sum = 0u64;
        let mut latency_count = 0u64;

        for entry in entries {
            *stats
                .by_protocol
                .entry(entry.config.proxy_type.as_str().to_string())
                .or_insert(0) += 1;
            let country = entry
                .result
                .country
                .clone()
                .unwrap_or_else(|| "unknown".to_string());
            *stats.by_country.entry(country).or_insert(0) += 1;

            if entry.result.success {
                stats.reachable += 1;
                if let Some(latency) = entry.result.latency_ms {
                    latency_sum += latency;
                    latency_count += 1;
                }
            }
        }

        if latency_count > 0 {
            let avg = latency_sum as f64 / latency_count as f64;
            stats.avg_latency_ms = Some((avg * 100.0).round() / 100.0);
        }
        stats
    }
}

/// The run parameters recorded in `metadata.json` for freshness checks.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunParameters {
    pub test_concurrency: usize,
    pub probe_timeout_ms: u64,
    pub full_test: bool,
    pub sort_by: String,
    pub top_n: Option<usize>,
    pub max_latency_ms: Option<u64>,
    pub include_protocols: Vec<String>,
    pub exclude_protocols: Vec<String>,
    pub include_countries: Vec<String>,
    pub exclude_countries: Vec<String>,
    pub formats: Vec<String>,
}

impl From<&Settings> for RunParameters {
    fn from(settings: &Settings) -> Self {
        RunParameters {
            test_concurrency: settings.test_concurrency,
            probe_timeout_ms: settings.probe_timeout_ms,
            full_test: settings.full_test,
            sort_by: settings.sort_by.as_str().to_string(),
            top_n: settings.top_n,
            max_latency_ms: settings.max_latency_ms,
            include_protocols: settings.include_protocols.clone(),
            exclude_protocols: settings.exclude_protocols.clone(),
            include_countries: settings.include_countries.clone(),
            exclude_countries: settings.exclude_countries.clone(),
            formats: settings.formats.clone(),
        }
    }
}

/// Everything the output generator needs; regenerated every run.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputBundle {
    pub entries: Vec<RankedEntry>,
    pub stats: BundleStats,
    pub generated_at: DateTime<Utc>,
    pub parameters: RunParameters,
    /// True when the run was cut short and the entries are partial.
    pub partial: bool,
}

impl OutputBundle {
    pub fn new(entries: Vec<RankedEntry>, generated_at: DateTime<Utc>, parameters: RunParameters) -> Self {
        let stats = BundleStats::from_entries(&entries);
        OutputBundle {
            entries,
            stats,
            generated_at,
            parameters,
            partial: false,
        }
    }
}

/// Fixed timestamp format used by every serializer.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

pub fn format_timestamp(time: &DateTime<Utc>) -> String {
    time.format(TIMESTAMP_FORMAT).to_string()
}
