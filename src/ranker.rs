//! Filtering and ordering of tested entries.

use std::cmp::Ordering;

use regex::Regex;

use crate::error::ConfigValidationError;
use crate::models::{ProxyType, RankedEntry};
use crate::settings::{Settings, SortKey};

/// Conjunctive filters applied before sorting.
#[derive(Debug, Clone, Default)]
pub struct RankFilters {
    pub include_protocols: Vec<ProxyType>,
    pub exclude_protocols: Vec<ProxyType>,
    /// Upper-case ISO country codes.
    pub include_countries: Vec<String>,
    pub exclude_countries: Vec<String>,
    /// Applies to successful entries only.
    pub max_latency_ms: Option<u64>,
    /// Matched against remark and raw text.
    pub include_pattern: Option<Regex>,
    pub exclude_pattern: Option<Regex>,
    pub only_reachable: bool,
    pub top_n: Option<usize>,
}

fn protocols(names: &[String]) -> Result<Vec<ProxyType>, ConfigValidationError> {
    names
        .iter()
        .map(|name| {
            ProxyType::from_name(name)
                .ok_or_else(|| ConfigValidationError::UnknownProtocol(name.clone()))
        })
        .collect()
}

fn countries(codes: &[String]) -> Vec<String> {
    codes
        .iter()
        .map(|c| c.trim().to_ascii_uppercase())
        .filter(|c| !c.is_empty())
        .collect()
}

fn pattern(field: &'static str, source: &Option<String>) -> Result<Option<Regex>, ConfigValidationError> {
    source
        .as_deref()
        .filter(|p| !p.is_empty())
        .map(|p| {
            Regex::new(p).map_err(|e| ConfigValidationError::InvalidPattern {
                field,
                message: e.to_string(),
            })
        })
        .transpose()
}

impl RankFilters {
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigValidationError> {
        Ok(RankFilters {
            include_protocols: protocols(&settings.include_protocols)?,
            exclude_protocols: protocols(&settings.exclude_protocols)?,
            include_countries: countries(&settings.include_countries),
            exclude_countries: countries(&settings.exclude_countries),
            max_latency_ms: settings.max_latency_ms,
            include_pattern: pattern("include", &settings.include_pattern)?,
            exclude_pattern: pattern("exclude", &settings.exclude_pattern)?,
            only_reachable: settings.only_reachable,
            top_n: settings.top_n,
        })
    }

    pub fn accepts(&self, entry: &RankedEntry) -> bool {
        let proxy_type = entry.config.proxy_type;
        if !self.include_protocols.is_empty() && !self.include_protocols.contains(&proxy_type) {
            return false;
        }
        if self.exclude_protocols.contains(&proxy_type) {
            return false;
        }

        let country = entry.result.country.as_deref().map(str::to_ascii_uppercase);
        if !self.include_countries.is_empty() {
            match &country {
                Some(code) if self.include_countries.contains(code) => {}
                _ => return false,
            }
        }
        if let Some(code) = &country {
            if self.exclude_countries.contains(code) {
                return false;
            }
        }

        if self.only_reachable && !entry.result.success {
            return false;
        }
        if let (Some(max), true) = (self.max_latency_ms, entry.result.success) {
            if entry.result.latency_ms.map_or(false, |latency| latency > max) {
                return false;
            }
        }

        if self.include_pattern.is_some() || self.exclude_pattern.is_some() {
            let text = format!("{}\n{}", entry.config.remark, entry.config.raw_uri);
            if let Some(include) = &self.include_pattern {
                if !include.is_match(&text) {
                    return false;
                }
            }
            if let Some(exclude) = &self.exclude_pattern {
                if exclude.is_match(&text) {
                    return false;
                }
            }
        }
        true
    }
}

/// Latency of reachable entries; unreachable ones sort after every latency.
fn latency_key(entry: &RankedEntry) -> (bool, u64) {
    match (entry.result.success, entry.result.latency_ms) {
        (true, Some(latency)) => (false, latency),
        (true, None) => (false, u64::MAX),
        (false, _) => (true, u64::MAX),
    }
}

fn compare(a: &RankedEntry, b: &RankedEntry, sort_key: SortKey) -> Ordering {
    match sort_key {
        SortKey::Latency => latency_key(a).cmp(&latency_key(b)),
        SortKey::Reliability => {
            let ra = a.reliability.unwrap_or(0.0);
            let rb = b.reliability.unwrap_or(0.0);
            rb.partial_cmp(&ra)
                .unwrap_or(Ordering::Equal)
                .then_with(|| latency_key(a).cmp(&latency_key(b)))
        }
    }
}

/// Filter, sort and truncate. The sort is stable, so remaining ties keep
/// their input order.
pub fn rank(entries: Vec<RankedEntry>, filters: &RankFilters, sort_key: SortKey) -> Vec<RankedEntry> {
    let mut ranked: Vec<RankedEntry> = entries.into_iter().filter(|e| filters.accepts(e)).collect();
    ranked.sort_by(|a, b| compare(a, b, sort_key));
    if let Some(top_n) = filters.top_n {
        ranked.truncate(top_n);
    }
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ErrorKind, ProxyConfig, TestResult};
    use chrono::Utc;

    fn entry(host: &str, proxy_type: ProxyType, latency: Option<u64>, country: Option<&str>) -> RankedEntry {
        let config = ProxyConfig::new(proxy_type, host, 443).with_remark(host);
        let now = Utc::now();
        let mut result = match latency {
            Some(ms) => TestResult::success(&config.identity(), ms, now),
            None => TestResult::failure(&config.identity(), ErrorKind::Timeout, now),
        };
        result.country = country.map(str::to_string);
        RankedEntry::new(config, result)
    }

    fn sample() -> Vec<RankedEntry> {
        vec![
            entry("a", ProxyType::Trojan, Some(300), Some("US")),
            entry("b", ProxyType::Vless, None, Some("JP")),
            entry("c", ProxyType::VMess, Some(100), None),
            entry("d", ProxyType::Trojan, Some(100), Some("jp")),
            entry("e", ProxyType::Shadowsocks, None, None),
            entry("f", ProxyType::Shadowsocks, Some(50), Some("DE")),
        ]
    }

    fn hosts(entries: &[RankedEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.config.hostname.as_str()).collect()
    }

    #[test]
    fn test_latency_order_puts_failures_last() {
        let filters = RankFilters::default();
        let ranked = rank(sample(), &filters, SortKey::Latency);
        assert_eq!(hosts(&ranked), vec!["f", "c", "d", "a", "b", "e"]);

        let first_failure = ranked.iter().position(|e| !e.result.success).unwrap();
        assert!(ranked[first_failure..].iter().all(|e| !e.result.success));
        let latencies: Vec<u64> = ranked[..first_failure]
            .iter()
            .map(|e| e.result.latency_ms.unwrap())
            .collect();
        assert!(latencies.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_reliability_order() {
        let mut entries = sample();
        entries[0].reliability = Some(0.9);
        entries[2].reliability = Some(0.9);
        entries[5].reliability = Some(0.2);
        let filters = RankFilters {
            only_reachable: true,
            ..Default::default()
        };
        let ranked = rank(entries, &filters, SortKey::Reliability);
        assert_eq!(hosts(&ranked), vec!["c", "a", "f", "d"]);
    }

    #[test]
    fn test_country_filters() {
        let include = RankFilters {
            include_countries: vec!["JP".to_string()],
            ..Default::default()
        };
        assert_eq!(hosts(&rank(sample(), &include, SortKey::Latency)), vec!["d", "b"]);

        let exclude = RankFilters {
            exclude_countries: vec!["JP".to_string(), "US".to_string()],
            ..Default::default()
        };
        assert_eq!(
            hosts(&rank(sample(), &exclude, SortKey::Latency)),
            vec!["f", "c", "e"]
        );
    }

    #[test]
    fn test_protocol_latency_pattern_and_top_n() {
        let filters = RankFilters {
            exclude_protocols: vec![ProxyType::Shadowsocks],
            max_latency_ms: Some(200),
            only_reachable: true,
            ..Default::default()
        };
        assert_eq!(hosts(&rank(sample(), &filters, SortKey::Latency)), vec!["c", "d"]);

        let filters = RankFilters {
            include_protocols: vec![ProxyType::Trojan],
            exclude_pattern: Some(Regex::new("(?m)^d$").unwrap()),
            ..Default::default()
        };
        assert_eq!(hosts(&rank(sample(), &filters, SortKey::Latency)), vec!["a"]);

        let filters = RankFilters {
            top_n: Some(2),
            ..Default::default()
        };
        assert_eq!(rank(sample(), &filters, SortKey::Latency).len(), 2);
    }

    #[test]
    fn test_empty_result_is_valid() {
        let filters = RankFilters {
            include_countries: vec!["FR".to_string()],
            ..Default::default()
        };
        assert!(rank(sample(), &filters, SortKey::Latency).is_empty());
    }

    #[test]
    fn test_from_settings_rejects_bad_pattern() {
        let settings = Settings {
            include_pattern: Some("(".to_string()),
            ..Default::default()
        };
        assert!(RankFilters::from_settings(&settings).is_err());
    }
}
