//! Cross-run test history and reliability scores.
//!
//! The append-only JSON-lines log is the source of truth; reliability
//! records are derived from it on demand and cached in `reliability.json`.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::error::HistoryStoreError;
use crate::models::{ReliabilityRecord, TestResult};
use crate::utils::file::{atomic_write, open_append};

struct HistoryInner {
    /// Opened lazily in append mode.
    file: Option<File>,
    by_identity: HashMap<String, Vec<TestResult>>,
}

pub struct HistoryStore {
    path: PathBuf,
    half_life: Duration,
    inner: Mutex<HistoryInner>,
}

impl HistoryStore {
    /// Open the log at `path`. A missing or unreadable log gives an empty
    /// history; bad lines are skipped.
    pub fn open(path: &Path, half_life: Duration) -> Self {
        let results = match Self::load(path) {
            Ok(results) => results,
            Err(e) => {
                warn!("History '{}' unavailable, starting empty: {}", path.display(), e);
                Vec::new()
            }
        };
        debug!("Loaded {} history records from '{}'", results.len(), path.display());

        let mut by_identity: HashMap<String, Vec<TestResult>> = HashMap::new();
        for result in results {
            by_identity.entry(result.identity.clone()).or_default().push(result);
        }
        HistoryStore {
            path: path.to_path_buf(),
            half_life,
            inner: Mutex::new(HistoryInner {
                file: None,
                by_identity,
            }),
        }
    }

    /// Read every parseable record from a log file.
    pub fn load(path: &Path) -> Result<Vec<TestResult>, HistoryStoreError> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut results = Vec::new();
        let mut skipped = 0usize;
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TestResult>(&line) {
                Ok(result) => results.push(result),
                Err(_) => skipped += 1,
            }
        }
        if skipped > 0 {
            warn!("Skipped {} corrupt lines in '{}'", skipped, path.display());
        }
        Ok(results)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, result: &TestResult) -> Result<(), HistoryStoreError> {
        self.record_all(std::slice::from_ref(result))
    }

    /// Append results as JSON lines with one write, then flush.
    pub fn record_all(&self, results: &[TestResult]) -> Result<(), HistoryStoreError> {
        if results.is_empty() {
            return Ok(());
        }
        let mut buf = Vec::new();
        for result in results {
            serde_json::to_writer(&mut buf, result)?;
            buf.push(b'\n');
        }

        let mut inner = self.inner.lock();
        if inner.file.is_none() {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let file = open_append(&self.path)?;
            inner.file = Some(file);
        }
        if let Some(file) = inner.file.as_mut() {
            file.write_all(&buf)?;
            file.flush()?;
        }
        for result in results {
            inner
                .by_identity
                .entry(result.identity.clone())
                .or_default()
                .push(result.clone());
        }
        Ok(())
    }

    /// Number of recorded results.
    pub fn len(&self) -> usize {
        self.inner.lock().by_identity.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reliability(&self, identity: &str) -> ReliabilityRecord {
        self.reliability_at(identity, Utc::now())
    }

    /// Reliability as of `now`: each test weighs `0.5^(age / half_life)`.
    pub fn reliability_at(&self, identity: &str, now: DateTime<Utc>) -> ReliabilityRecord {
        let inner = self.inner.lock();
        match inner.by_identity.get(identity) {
            Some(results) => aggregate(identity, results, now, self.half_life),
            None => ReliabilityRecord::empty(identity),
        }
    }

    /// Records for every identity, sorted by identity.
    pub fn aggregates(&self, now: DateTime<Utc>) -> Vec<ReliabilityRecord> {
        let inner = self.inner.lock();
        let mut records: Vec<ReliabilityRecord> = inner
            .by_identity
            .iter()
            .map(|(identity, results)| aggregate(identity, results, now, self.half_life))
            .collect();
        records.sort_by(|a, b| a.identity.cmp(&b.identity));
        records
    }

    /// Write the derived records as a JSON cache (atomic replace).
    pub fn save_aggregates(&self, path: &Path, now: DateTime<Utc>) -> Result<(), HistoryStoreError> {
        let records = self.aggregates(now);
        let json = serde_json::to_vec_pretty(&records)?;
        atomic_write(path, &json)?;
        debug!("Saved {} reliability records to '{}'", records.len(), path.display());
        Ok(())
    }

    /// Rewrite the log without results older than `max_age`.
    /// Returns how many results were dropped.
    pub fn compact(&self, max_age: Duration, now: DateTime<Utc>) -> Result<usize, HistoryStoreError> {
        let cutoff = now - max_age;
        let mut inner = self.inner.lock();

        let mut kept: Vec<&TestResult> = inner
            .by_identity
            .values()
            .flatten()
            .filter(|r| r.tested_at >= cutoff)
            .collect();
        let total: usize = inner.by_identity.values().map(Vec::len).sum();
        let dropped = total - kept.len();
        if dropped == 0 {
            return Ok(0);
        }
        kept.sort_by(|a, b| a.tested_at.cmp(&b.tested_at).then_with(|| a.identity.cmp(&b.identity)));

        let mut buf = Vec::new();
        for result in &kept {
            serde_json::to_writer(&mut buf, result)?;
            buf.push(b'\n');
        }
        // the rename replaces the inode the append handle points at
        inner.file = None;
        atomic_write(&self.path, &buf)?;

        for results in inner.by_identity.values_mut() {
            results.retain(|r| r.tested_at >= cutoff);
        }
        inner.by_identity.retain(|_, results| !results.is_empty());
        info!("Compacted history: dropped {} results older than {}", dropped, cutoff);
        Ok(dropped)
    }
}

fn aggregate(
    identity: &str,
    results: &[TestResult],
    now: DateTime<Utc>,
    half_life: Duration,
) -> ReliabilityRecord {
    let half_life_secs = half_life.num_seconds().max(1) as f64;
    let mut weight_sum = 0.0;
    let mut success_weight = 0.0;
    let mut latency_sum = 0u64;
    let mut latency_count = 0u64;
    let mut successful = 0u64;
    let mut last_seen: Option<DateTime<Utc>> = None;

    for result in results {
        let age = (now - result.tested_at).num_seconds().max(0) as f64;
        let weight = 0.5f64.powf(age / half_life_secs);
        weight_sum += weight;
        if result.success {
            success_weight += weight;
            successful += 1;
            if let Some(latency) = result.latency_ms {
                latency_sum += latency;
                latency_count += 1;
            }
            if last_seen.map_or(true, |seen| result.tested_at > seen) {
                last_seen = Some(result.tested_at);
            }
        }
    }

    let score = if weight_sum > 0.0 {
        (success_weight / weight_sum).clamp(0.0, 1.0)
    } else {
        0.0
    };

    ReliabilityRecord {
        identity: identity.to_string(),
        total_tests: results.len() as u64,
        successful_tests: successful,
        avg_latency_ms: (latency_count > 0).then(|| latency_sum as f64 / latency_count as f64),
        last_seen,
        reliability_score: score,
    }
}
