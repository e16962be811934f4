//! Output generation
//!
//! Every format is an independent serializer over the same ranked list.
//! Serializers never read the clock: the generation time is part of the
//! bundle, so the same bundle always renders to the same bytes.

pub mod formats;

use std::fmt;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::Serialize;

use crate::error::OutputError;
use crate::models::{format_timestamp, BundleStats, OutputBundle, ProxyConfig, RunParameters};
use crate::utils::file::{atomic_write, ensure_writable_dir};
use formats::single::entry_uri;

/// A selectable output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OutputFormat {
    Raw,
    Base64,
    Clash,
    SingBox,
    Csv,
    Html,
    Surge,
    QuantumultX,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 8] = [
        OutputFormat::Raw,
        OutputFormat::Base64,
        OutputFormat::Clash,
        OutputFormat::SingBox,
        OutputFormat::Csv,
        OutputFormat::Html,
        OutputFormat::Surge,
        OutputFormat::QuantumultX,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Raw => "raw",
            OutputFormat::Base64 => "base64",
            OutputFormat::Clash => "clash",
            OutputFormat::SingBox => "singbox",
            OutputFormat::Csv => "csv",
            OutputFormat::Html => "html",
            OutputFormat::Surge => "surge",
            OutputFormat::QuantumultX => "quanx",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "raw" | "txt" => Some(OutputFormat::Raw),
            "base64" | "b64" => Some(OutputFormat::Base64),
            "clash" => Some(OutputFormat::Clash),
            "singbox" | "sing-box" => Some(OutputFormat::SingBox),
            "csv" => Some(OutputFormat::Csv),
            "html" => Some(OutputFormat::Html),
            "surge" => Some(OutputFormat::Surge),
            "quanx" | "quantumultx" => Some(OutputFormat::QuantumultX),
            _ => None,
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            OutputFormat::Raw => "proxies.txt",
            OutputFormat::Base64 => "proxies_base64.txt",
            OutputFormat::Clash => "clash.yaml",
            OutputFormat::SingBox => "singbox.json",
            OutputFormat::Csv => "proxies.csv",
            OutputFormat::Html => "index.html",
            OutputFormat::Surge => "surge.conf",
            OutputFormat::QuantumultX => "quanx.conf",
        }
    }

    /// Serialize the bundle in this format.
    pub fn render(self, bundle: &OutputBundle) -> Result<String, OutputError> {
        let configs: Vec<&ProxyConfig> = bundle.entries.iter().map(|e| &e.config).collect();
        match self {
            OutputFormat::Raw => Ok(formats::proxy_to_single(&configs)),
            OutputFormat::Base64 => Ok(formats::proxy_to_base64(&configs)),
            OutputFormat::Clash => formats::proxy_to_clash(&bundle.entries),
            OutputFormat::SingBox => formats::proxy_to_sing_box(&bundle.entries),
            OutputFormat::Csv => Ok(formats::proxy_to_csv(&bundle.entries)),
            OutputFormat::Html => formats::proxy_to_html(bundle),
            OutputFormat::Surge => Ok(formats::proxy_to_surge(&bundle.entries)),
            OutputFormat::QuantumultX => Ok(formats::proxy_to_quan_x(&bundle.entries)),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const PROXIES_JSON: &str = "proxies.json";
pub const STATS_JSON: &str = "stats.json";
pub const METADATA_JSON: &str = "metadata.json";

/// One element of `proxies.json`.
#[derive(Debug, Serialize)]
struct ProxyRecord<'a> {
    rank: usize,
    identity: String,
    protocol: &'static str,
    host: &'a str,
    port: u16,
    remark: &'a str,
    country: Option<&'a str>,
    city: Option<&'a str>,
    asn: Option<u32>,
    reachable: bool,
    latency_ms: Option<u64>,
    error: Option<&'static str>,
    reliability: Option<f64>,
    uri: String,
}

#[derive(Debug, Serialize)]
struct Metadata<'a> {
    generator: &'static str,
    version: &'static str,
    generated_at: String,
    partial: bool,
    entries: usize,
    parameters: &'a RunParameters,
}

fn proxies_json(bundle: &OutputBundle) -> Vec<ProxyRecord<'_>> {
    bundle
        .entries
        .iter()
        .enumerate()
        .map(|(i, entry)| ProxyRecord {
            rank: i + 1,
            identity: entry.config.identity(),
            protocol: entry.config.proxy_type.as_str(),
            host: &entry.config.hostname,
            port: entry.config.port,
            remark: &entry.config.remark,
            country: entry.result.country.as_deref(),
            city: entry.result.city.as_deref(),
            asn: entry.result.asn,
            reachable: entry.result.success,
            latency_ms: entry.result.latency_ms,
            error: entry.result.error_kind.map(|k| k.as_str()),
            reliability: entry.reliability.map(|r| (r * 1000.0).round() / 1000.0),
            uri: entry_uri(&entry.config),
        })
        .collect()
}

fn to_json<T: Serialize>(value: &T, format: &'static str) -> Result<String, OutputError> {
    let mut body = serde_json::to_string_pretty(value).map_err(|e| OutputError::Serialize {
        format,
        message: e.to_string(),
    })?;
    body.push('\n');
    Ok(body)
}

fn write(out_dir: &Path, file_name: &str, body: &str) -> Result<PathBuf, OutputError> {
    let path = out_dir.join(file_name);
    atomic_write(&path, body.as_bytes()).map_err(|source| OutputError::Write {
        path: path.display().to_string(),
        source,
    })?;
    debug!("Wrote {} ({} bytes)", path.display(), body.len());
    Ok(path)
}

/// Check the output directory before any network activity.
pub fn prepare_output_dir(out_dir: &Path) -> Result<(), OutputError> {
    ensure_writable_dir(out_dir).map_err(|source| OutputError::Directory {
        path: out_dir.display().to_string(),
        source,
    })
}

/// Write the requested formats plus `proxies.json`, `stats.json` and
/// `metadata.json` into `out_dir`.
///
/// Every format is rendered before the first file is written, so a
/// serialization failure leaves the previous output untouched.
pub fn emit(
    bundle: &OutputBundle,
    formats: &[OutputFormat],
    out_dir: &Path,
) -> Result<Vec<PathBuf>, OutputError> {
    prepare_output_dir(out_dir)?;

    let mut rendered: Vec<(&'static str, String)> = Vec::with_capacity(formats.len() + 3);
    for format in formats {
        rendered.push((format.file_name(), format.render(bundle)?));
    }
    rendered.push((PROXIES_JSON, to_json(&proxies_json(bundle), "proxies.json")?));
    rendered.push((STATS_JSON, to_json::<BundleStats>(&bundle.stats, "stats.json")?));
    let metadata = Metadata {
        generator: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        generated_at: format_timestamp(&bundle.generated_at),
        partial: bundle.partial,
        entries: bundle.entries.len(),
        parameters: &bundle.parameters,
    };
    rendered.push((METADATA_JSON, to_json(&metadata, "metadata.json")?));

    let written = rendered
        .iter()
        .map(|(name, body)| write(out_dir, name, body))
        .collect::<Result<Vec<_>, _>>()?;
    info!(
        "Wrote {} files for {} entries to {}",
        written.len(),
        bundle.entries.len(),
        out_dir.display()
    );
    Ok(written)
}
