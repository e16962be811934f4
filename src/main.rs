use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;
use env_logger::Env;
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use subharvest::{Pipeline, Settings, SortKey};

/// Collect public proxy subscriptions, test them and write ranked lists
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (TOML or YAML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Source list, one URL or `channel:<ref>` per line
    #[arg(short, long, value_name = "FILE")]
    sources: Option<PathBuf>,

    /// Output directory
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Directory for registry state and test history
    #[arg(long, value_name = "DIR")]
    state_dir: Option<PathBuf>,

    /// Previous raw or base64 output to merge in
    #[arg(long, value_name = "FILE")]
    resume: Option<PathBuf>,

    /// Text gathered for a channel source, as REF=FILE (repeatable)
    #[arg(long = "channel", value_name = "REF=FILE")]
    channels: Vec<String>,

    /// Number of concurrent probes
    #[arg(long, value_name = "N")]
    concurrency: Option<usize>,

    /// Per-probe timeout in milliseconds
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Complete a TLS handshake for TLS-based protocols
    #[arg(long)]
    full_test: bool,

    /// Order by `latency` or `reliability`
    #[arg(long, value_name = "KEY")]
    sort: Option<String>,

    /// Keep only the N best entries
    #[arg(long, value_name = "N")]
    top: Option<usize>,

    /// Comma separated output formats
    #[arg(long, value_name = "LIST", value_delimiter = ',')]
    formats: Vec<String>,

    /// Never disable failing sources
    #[arg(long)]
    no_prune: bool,

    /// GeoIP City database
    #[arg(long, value_name = "FILE")]
    geoip: Option<PathBuf>,

    /// GeoIP ASN database
    #[arg(long, value_name = "FILE")]
    geoip_asn: Option<PathBuf>,
}

impl Args {
    fn settings(&self) -> Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => Settings::load_from_file(path)?,
            None => Settings::default(),
        };

        if let Some(sources) = &self.sources {
            settings.sources_file = sources.clone();
        }
        if let Some(output) = &self.output {
            settings.output_dir = output.clone();
        }
        if let Some(state_dir) = &self.state_dir {
            settings.state_dir = state_dir.clone();
        }
        if let Some(resume) = &self.resume {
            settings.resume_from = Some(resume.clone());
        }
        if let Some(concurrency) = self.concurrency {
            settings.test_concurrency = concurrency;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            settings.probe_timeout_ms = timeout_ms;
        }
        if self.full_test {
            settings.full_test = true;
        }
        if let Some(sort) = &self.sort {
            settings.sort_by = match sort.to_ascii_lowercase().as_str() {
                "latency" => SortKey::Latency,
                "reliability" => SortKey::Reliability,
                other => bail!("unknown sort key '{}'", other),
            };
        }
        if self.top.is_some() {
            settings.top_n = self.top;
        }
        if !self.formats.is_empty() {
            settings.formats = self.formats.clone();
        }
        if self.no_prune {
            settings.prune_enabled = false;
        }
        if self.geoip.is_some() {
            settings.geoip_city_db = self.geoip.clone();
        }
        if self.geoip_asn.is_some() {
            settings.geoip_asn_db = self.geoip_asn.clone();
        }
        Ok(settings)
    }

    fn channel_texts(&self) -> Result<HashMap<String, String>> {
        let mut texts = HashMap::new();
        for entry in &self.channels {
            let (reference, path) = entry
                .split_once('=')
                .with_context(|| format!("--channel expects REF=FILE, got '{}'", entry))?;
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read channel text '{}'", path))?;
            texts.insert(reference.trim().to_string(), text);
        }
        Ok(texts)
    }
}

async fn run(args: Args) -> Result<()> {
    let settings = args.settings()?;
    let channel_texts = args.channel_texts()?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing the current batch");
            interrupt.cancel();
        }
    });

    let summary = Pipeline::new(settings)?.run(&channel_texts, &cancel).await?;
    info!("Run complete");
    println!("{}", summary);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize the logger
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
