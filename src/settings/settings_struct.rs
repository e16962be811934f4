use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigValidationError;
use crate::generator::OutputFormat;
use crate::models::ProxyType;

fn default_true() -> bool {
    true
}

fn default_sources_file() -> PathBuf {
    PathBuf::from("sources.txt")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_fetch_concurrency() -> usize {
    16
}

fn default_fetch_timeout_secs() -> u64 {
    15
}

fn default_fetch_retries() -> u32 {
    2
}

fn default_max_source_bytes() -> usize {
    10 * 1024 * 1024 // 10MB
}

fn default_fetch_deadline_secs() -> u64 {
    300
}

fn default_prune_threshold() -> u32 {
    3
}

fn default_test_concurrency() -> usize {
    64
}

fn default_probe_timeout_ms() -> u64 {
    3000
}

fn default_batch_size() -> usize {
    200
}

fn default_run_deadline_secs() -> u64 {
    900
}

fn default_formats() -> Vec<String> {
    OutputFormat::ALL
        .iter()
        .map(|f| f.as_str().to_string())
        .collect()
}

fn default_half_life_hours() -> u64 {
    168 // 7 days
}

fn default_max_age_days() -> u64 {
    30
}

/// How surviving entries are ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    /// Latency ascending, unreachable last.
    #[default]
    Latency,
    /// Reliability descending, ties broken by latency.
    Reliability,
}

impl SortKey {
    pub fn as_str(self) -> &'static str {
        match self {
            SortKey::Latency => "latency",
            SortKey::Reliability => "reliability",
        }
    }
}

/// Run configuration.
///
/// Every field has a default, so an empty TOML/YAML document is a valid
/// configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Inputs and state
    #[serde(default = "default_sources_file")]
    pub sources_file: PathBuf,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    pub geoip_city_db: Option<PathBuf>,
    pub geoip_asn_db: Option<PathBuf>,
    /// Prior raw or base64 output to merge in before deduplication.
    pub resume_from: Option<PathBuf>,

    // Fetcher
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_fetch_retries")]
    pub fetch_retries: u32,
    /// Upstream proxy for source downloads, e.g. `socks5://127.0.0.1:1080`.
    pub fetch_proxy: Option<String>,
    #[serde(default = "default_max_source_bytes")]
    pub max_source_bytes: usize,
    /// Wall-clock limit for the fetch phase, never longer than the run deadline.
    #[serde(default = "default_fetch_deadline_secs")]
    pub fetch_deadline_secs: u64,

    // Registry
    #[serde(default = "default_prune_threshold")]
    pub prune_threshold: u32,
    #[serde(default = "default_true")]
    pub prune_enabled: bool,

    // Tester
    #[serde(default = "default_test_concurrency")]
    pub test_concurrency: usize,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    pub probe_retries: u32,
    pub full_test: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_run_deadline_secs")]
    pub run_deadline_secs: u64,

    // Ranker
    pub include_protocols: Vec<String>,
    pub exclude_protocols: Vec<String>,
    pub include_countries: Vec<String>,
    pub exclude_countries: Vec<String>,
    pub max_latency_ms: Option<u64>,
    pub include_pattern: Option<String>,
    pub exclude_pattern: Option<String>,
    #[serde(default = "default_true")]
    pub only_reachable: bool,
    pub sort_by: SortKey,
    pub top_n: Option<usize>,

    // Output
    #[serde(default = "default_formats")]
    pub formats: Vec<String>,

    // History
    #[serde(default = "default_half_life_hours")]
    pub history_half_life_hours: u64,
    #[serde(default = "default_max_age_days")]
    pub history_max_age_days: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            sources_file: default_sources_file(),
            state_dir: default_state_dir(),
            output_dir: default_output_dir(),
            geoip_city_db: None,
            geoip_asn_db: None,
            resume_from: None,
            fetch_concurrency: default_fetch_concurrency(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            fetch_retries: default_fetch_retries(),
            fetch_proxy: None,
            max_source_bytes: default_max_source_bytes(),
            fetch_deadline_secs: default_fetch_deadline_secs(),
            prune_threshold: default_prune_threshold(),
            prune_enabled: true,
            test_concurrency: default_test_concurrency(),
            probe_timeout_ms: default_probe_timeout_ms(),
            probe_retries: 0,
            full_test: false,
            batch_size: default_batch_size(),
            run_deadline_secs: default_run_deadline_secs(),
            include_protocols: Vec::new(),
            exclude_protocols: Vec::new(),
            include_countries: Vec::new(),
            exclude_countries: Vec::new(),
            max_latency_ms: None,
            include_pattern: None,
            exclude_pattern: None,
            only_reachable: true,
            sort_by: SortKey::default(),
            top_n: None,
            formats: default_formats(),
            history_half_life_hours: default_half_life_hours(),
            history_max_age_days: default_max_age_days(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML or YAML file; the extension decides, and
    /// content sniffing is used when the extension is unknown.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigValidationError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigValidationError::Unreadable(format!("{}: {}", path.display(), e))
        })?;
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "toml" => Self::from_toml(&content),
            "yaml" | "yml" => Self::from_yaml(&content),
            _ => Self::load_from_content(&content),
        }
    }

    pub fn load_from_content(content: &str) -> Result<Self, ConfigValidationError> {
        if toml::from_str::<toml::Value>(content).is_ok() {
            return Self::from_toml(content);
        }
        Self::from_yaml(content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigValidationError> {
        toml::from_str(content).map_err(|e| ConfigValidationError::Unreadable(e.to_string()))
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigValidationError> {
        if content.trim().is_empty() {
            return Ok(Settings::default());
        }
        serde_yaml::from_str(content).map_err(|e| ConfigValidationError::Unreadable(e.to_string()))
    }

    /// Reject configurations that cannot produce a meaningful run.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let positive: [(&'static str, u64); 8] = [
            ("fetch_concurrency", self.fetch_concurrency as u64),
            ("fetch_timeout_secs", self.fetch_timeout_secs),
            ("fetch_deadline_secs", self.fetch_deadline_secs),
            ("test_concurrency", self.test_concurrency as u64),
            ("probe_timeout_ms", self.probe_timeout_ms),
            ("batch_size", self.batch_size as u64),
            ("prune_threshold", self.prune_threshold as u64),
            ("run_deadline_secs", self.run_deadline_secs),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigValidationError::Zero { field });
            }
        }
        if self.history_half_life_hours == 0 {
            return Err(ConfigValidationError::Zero {
                field: "history_half_life_hours",
            });
        }

        for name in self.include_protocols.iter().chain(&self.exclude_protocols) {
            if ProxyType::from_name(name).is_none() {
                return Err(ConfigValidationError::UnknownProtocol(name.clone()));
            }
        }

        if self.formats.is_empty() {
            return Err(ConfigValidationError::NoFormats);
        }
        for name in &self.formats {
            if OutputFormat::from_name(name).is_none() {
                return Err(ConfigValidationError::UnknownFormat(name.clone()));
            }
        }

        for (field, pattern) in [
            ("include", &self.include_pattern),
            ("exclude", &self.exclude_pattern),
        ] {
            if let Some(pattern) = pattern {
                Regex::new(pattern).map_err(|e| ConfigValidationError::InvalidPattern {
                    field,
                    message: e.to_string(),
                })?;
            }
        }
        Ok(())
    }

    pub fn output_formats(&self) -> Vec<OutputFormat> {
        let mut formats: Vec<OutputFormat> = self
            .formats
            .iter()
            .filter_map(|name| OutputFormat::from_name(name))
            .collect();
        formats.sort();
        formats.dedup();
        formats
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn run_deadline(&self) -> Duration {
        Duration::from_secs(self.run_deadline_secs)
    }

    /// The fetch-phase limit, kept below the run deadline.
    pub fn fetch_deadline(&self) -> Duration {
        let fetch = Duration::from_secs(self.fetch_deadline_secs);
        let run = self.run_deadline();
        if fetch < run {
            fetch
        } else {
            run * 9 / 10
        }
    }

    pub fn history_half_life(&self) -> chrono::Duration {
        chrono::Duration::hours(self.history_half_life_hours as i64)
    }

    pub fn registry_state_path(&self) -> PathBuf {
        self.state_dir.join("sources.state.json")
    }

    pub fn history_log_path(&self) -> PathBuf {
        self.state_dir.join("history.jsonl")
    }

    pub fn reliability_path(&self) -> PathBuf {
        self.state_dir.join("reliability.json")
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.output_dir.join("checkpoint.jsonl")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_documents_give_defaults() {
        assert_eq!(Settings::from_toml("").unwrap(), Settings::default());
        assert_eq!(Settings::from_yaml("").unwrap(), Settings::default());
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn test_toml_overrides() {
        let settings = Settings::load_from_content(
            r#"
test_concurrency = 10
probe_timeout_ms = 1500
sort_by = "reliability"
include_protocols = ["vless", "trojan"]
formats = ["raw", "clash"]
prune_enabled = false
"#,
        )
        .unwrap();
        assert_eq!(settings.test_concurrency, 10);
        assert_eq!(settings.probe_timeout(), Duration::from_millis(1500));
        assert_eq!(settings.sort_by, SortKey::Reliability);
        assert!(!settings.prune_enabled);
        assert_eq!(settings.prune_threshold, 3);
        assert_eq!(
            settings.output_formats(),
            vec![OutputFormat::Raw, OutputFormat::Clash]
        );
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_fetch_deadline_stays_inside_run_deadline() {
        let settings = Settings::default();
        assert_eq!(settings.fetch_deadline(), Duration::from_secs(300));
        assert!(settings.fetch_deadline() < settings.run_deadline());

        let settings = Settings {
            fetch_deadline_secs: 600,
            run_deadline_secs: 100,
            ..Default::default()
        };
        assert_eq!(settings.fetch_deadline(), Duration::from_secs(90));

        let settings = Settings {
            fetch_deadline_secs: 0,
            ..Default::default()
        };
        assert_eq!(
            settings.validate(),
            Err(ConfigValidationError::Zero {
                field: "fetch_deadline_secs"
            })
        );
    }

    #[test]
    fn test_yaml_overrides() {
        let settings = Settings::load_from_content(
            "top_n: 50\nexclude_countries:\n  - CN\nmax_latency_ms: 800\n",
        )
        .unwrap();
        assert_eq!(settings.top_n, Some(50));
        assert_eq!(settings.exclude_countries, vec!["CN"]);
        assert_eq!(settings.max_latency_ms, Some(800));
    }

    #[test]
    fn test_validation_failures() {
        let mut settings = Settings {
            test_concurrency: 0,
            ..Default::default()
        };
        assert_eq!(
            settings.validate(),
            Err(ConfigValidationError::Zero {
                field: "test_concurrency"
            })
        );

        settings.test_concurrency = 4;
        settings.include_protocols = vec!["wireguard".to_string()];
        assert_eq!(
            settings.validate(),
            Err(ConfigValidationError::UnknownProtocol("wireguard".to_string()))
        );

        settings.include_protocols.clear();
        settings.include_pattern = Some("([unclosed".to_string());
        assert!(matches!(
            settings.validate(),
            Err(ConfigValidationError::InvalidPattern { field: "include", .. })
        ));

        settings.include_pattern = None;
        settings.formats = vec!["pdf".to_string()];
        assert_eq!(
            settings.validate(),
            Err(ConfigValidationError::UnknownFormat("pdf".to_string()))
        );
    }
}
