//! One full run: fetch, parse, dedupe, test, rank, emit.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::dedup::dedupe;
use crate::generator::{emit, prepare_output_dir};
use crate::history::HistoryStore;
use crate::models::{OutputBundle, ProxyConfig, RankedEntry, RunParameters, TestResult};
use crate::parser::{parse, parse_all};
use crate::ranker::{rank, RankFilters};
use crate::settings::Settings;
use crate::sources::{load_sources, Fetcher, SourceRegistry};
use crate::tester::{Checkpoint, GeoIp, Prober, TcpProber, Tester, TesterOptions};
use crate::utils::file::file_exists;

/// Counters reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub sources_attempted: usize,
    pub sources_succeeded: usize,
    pub sources_pruned: usize,
    pub entries_resumed: usize,
    pub entries_parsed: usize,
    pub parse_errors: usize,
    pub entries_unique: usize,
    pub probes_attempted: usize,
    pub probes_succeeded: usize,
    pub results_reused: usize,
    pub entries_emitted: usize,
    pub files_written: Vec<PathBuf>,
    pub interrupted: bool,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "sources: {} attempted, {} succeeded, {} pruned",
            self.sources_attempted, self.sources_succeeded, self.sources_pruned
        )?;
        writeln!(
            f,
            "entries: {} parsed ({} resumed), {} parse errors, {} unique",
            self.entries_parsed, self.entries_resumed, self.parse_errors, self.entries_unique
        )?;
        writeln!(
            f,
            "probes: {} attempted, {} succeeded, {} reused from checkpoint",
            self.probes_attempted, self.probes_succeeded, self.results_reused
        )?;
        write!(
            f,
            "output: {} entries in {} files{}",
            self.entries_emitted,
            self.files_written.len(),
            if self.interrupted { " (interrupted, partial)" } else { "" }
        )
    }
}

/// Parse a previous raw or base64 output back into deduplicated entries.
pub fn resume(previous_raw_output: &str) -> Vec<ProxyConfig> {
    let report = parse(previous_raw_output);
    if !report.errors.is_empty() {
        debug!("{} entries of the previous output did not parse", report.errors.len());
    }
    dedupe(report.configs)
}

/// Cancel `token` once `deadline` has passed; abort the handle to disarm.
fn arm_deadline(token: CancellationToken, deadline: std::time::Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(deadline) => {
                warn!("Run deadline of {:?} reached, draining", deadline);
                token.cancel();
            }
        }
    })
}

pub struct Pipeline<P: Prober = TcpProber> {
    settings: Settings,
    prober: P,
    generated_at: Option<DateTime<Utc>>,
}

impl Pipeline<TcpProber> {
    /// A pipeline with the TCP/TLS prober.
    pub fn new(settings: Settings) -> Result<Self> {
        let prober = TcpProber::new(settings.full_test).context("failed to set up the TLS client")?;
        Ok(Self::with_prober(settings, prober))
    }
}

impl<P: Prober> Pipeline<P> {
    pub fn with_prober(settings: Settings, prober: P) -> Self {
        Pipeline {
            settings,
            prober,
            generated_at: None,
        }
    }

    /// Pin the generation timestamp instead of reading the clock.
    pub fn generated_at(mut self, at: DateTime<Utc>) -> Self {
        self.generated_at = Some(at);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Run every stage once.
    ///
    /// `channel_texts` maps channel references from the source list to the
    /// text gathered for them. Cancelling `cancel`, or reaching the run
    /// deadline, stops fetching and testing; whatever was tested by then is
    /// still ranked and written, marked as partial.
    pub async fn run(
        self,
        channel_texts: &HashMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<RunSummary> {
        let settings = &self.settings;
        settings.validate()?;
        let filters = RankFilters::from_settings(settings)?;
        let formats = settings.output_formats();
        prepare_output_dir(&settings.output_dir)?;
        std::fs::create_dir_all(&settings.state_dir).with_context(|| {
            format!("cannot create state directory '{}'", settings.state_dir.display())
        })?;

        let run_cancel = cancel.child_token();
        let deadline = arm_deadline(run_cancel.clone(), settings.run_deadline());
        let mut summary = RunSummary::default();

        let sources = if file_exists(&settings.sources_file) {
            load_sources(&settings.sources_file).with_context(|| {
                format!("cannot read source list '{}'", settings.sources_file.display())
            })?
        } else {
            warn!(
                "Source list '{}' not found, running without live sources",
                settings.sources_file.display()
            );
            Vec::new()
        };
        let registry = SourceRegistry::open(
            sources,
            &settings.registry_state_path(),
            settings.prune_threshold,
            settings.prune_enabled,
        );
        let history = Arc::new(HistoryStore::open(
            &settings.history_log_path(),
            settings.history_half_life(),
        ));
        let geoip = (settings.geoip_city_db.is_some() || settings.geoip_asn_db.is_some()).then(|| {
            Arc::new(GeoIp::open_lenient(
                settings.geoip_city_db.as_deref(),
                settings.geoip_asn_db.as_deref(),
            ))
        });

        // Fetch
        let fetcher = Fetcher::from_settings(settings).context("failed to build the HTTP client")?;
        let report = fetcher.fetch_all(&registry, channel_texts, &run_cancel).await;
        if let Err(e) = registry.save() {
            warn!(
                "Failed to save source state '{}': {}",
                registry.state_path().display(),
                e
            );
        }
        summary.sources_attempted = report.attempted();
        summary.sources_succeeded = report.succeeded();
        summary.sources_pruned = report.pruned.len();

        // Parse, resumed entries first
        let mut configs = match &settings.resume_from {
            Some(path) => load_resume(path),
            None => Vec::new(),
        };
        summary.entries_resumed = configs.len();
        let parsed = parse_all(&report.raw_entries());
        summary.parse_errors = parsed.errors.len();
        summary.entries_parsed = configs.len() + parsed.configs.len();
        configs.extend(parsed.configs);

        let unique = dedupe(configs);
        summary.entries_unique = unique.len();
        info!(
            "{} entries parsed, {} unique after deduplication",
            summary.entries_parsed, summary.entries_unique
        );

        // Test, reusing checkpointed results when resuming
        let checkpoint_path = settings.checkpoint_path();
        let mut reused: HashMap<String, TestResult> = HashMap::new();
        let checkpoint = if settings.resume_from.is_some() && file_exists(&checkpoint_path) {
            for result in Checkpoint::load(&checkpoint_path) {
                reused.insert(result.identity.clone(), result);
            }
            Checkpoint::append_to(&checkpoint_path)
        } else {
            Checkpoint::create(&checkpoint_path)
        };

        let to_test: Vec<ProxyConfig> = unique
            .iter()
            .filter(|config| !reused.contains_key(&config.identity()))
            .cloned()
            .collect();
        summary.results_reused = unique.len() - to_test.len();

        let mut tester = Tester::new(self.prober, TesterOptions::from(settings)).with_history(history.clone());
        if let Some(geoip) = &geoip {
            tester = tester.with_geoip(geoip.clone());
        }
        match checkpoint {
            Ok(checkpoint) => tester = tester.with_checkpoint(checkpoint),
            Err(e) => warn!(
                "Checkpoint '{}' unavailable, continuing without: {}",
                checkpoint_path.display(),
                e
            ),
        }
        let test_run = tester.test_all(&to_test, &run_cancel).await;
        summary.probes_attempted = test_run.results.len();
        summary.probes_succeeded = test_run.succeeded();
        summary.interrupted = test_run.interrupted || run_cancel.is_cancelled();
        deadline.abort();

        let mut results = reused;
        for result in test_run.results {
            results.insert(result.identity.clone(), result);
        }

        // Rank and emit; an interrupted run with nothing tested keeps the
        // previous output
        let now = self.generated_at.unwrap_or_else(Utc::now);
        if summary.interrupted && results.is_empty() {
            warn!(
                "Interrupted before any entry was tested, keeping previous output in '{}'",
                settings.output_dir.display()
            );
        } else {
            let entries = ranked_entries(unique, &mut results, &history, now);
            let ranked = rank(entries, &filters, settings.sort_by);
            let mut bundle = OutputBundle::new(ranked, now, RunParameters::from(settings));
            bundle.partial = summary.interrupted;
            summary.entries_emitted = bundle.entries.len();
            summary.files_written = emit(&bundle, &formats, &settings.output_dir)?;
        }

        // Persist derived state
        let max_age = ChronoDuration::days(settings.history_max_age_days as i64);
        if settings.history_max_age_days > 0 {
            match history.compact(max_age, now) {
                Ok(0) => {}
                Ok(dropped) => debug!("Dropped {} expired history records", dropped),
                Err(e) => warn!("Failed to compact history: {}", e),
            }
        }
        if let Err(e) = history.save_aggregates(&settings.reliability_path(), now) {
            warn!("Failed to save reliability records: {}", e);
        }
        if let Some(checkpoint) = tester.into_checkpoint() {
            if !summary.interrupted {
                if let Err(e) = checkpoint.remove() {
                    warn!("Failed to remove checkpoint: {}", e);
                }
            }
        }

        info!(
            "Run finished: {} of {} entries emitted{}",
            summary.entries_emitted,
            summary.entries_unique,
            if summary.interrupted { " (partial)" } else { "" }
        );
        Ok(summary)
    }
}

fn load_resume(path: &Path) -> Vec<ProxyConfig> {
    match std::fs::read_to_string(path) {
        Ok(text) => {
            let configs = resume(&text);
            info!("Resumed {} entries from '{}'", configs.len(), path.display());
            configs
        }
        Err(e) => {
            warn!("Cannot read previous output '{}': {}", path.display(), e);
            Vec::new()
        }
    }
}

/// Pair each entry with its result; entries never tested are left out.
fn ranked_entries(
    configs: Vec<ProxyConfig>,
    results: &mut HashMap<String, TestResult>,
    history: &HistoryStore,
    now: DateTime<Utc>,
) -> Vec<RankedEntry> {
    configs
        .into_iter()
        .filter_map(|config| {
            let identity = config.identity();
            let result = results.remove(&identity)?;
            let record = history.reliability_at(&identity, now);
            let mut entry = RankedEntry::new(config, result);
            entry.reliability = (record.total_tests > 0).then_some(record.reliability_score);
            Some(entry)
        })
        .collect()
}
