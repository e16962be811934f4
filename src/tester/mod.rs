//! Concurrent reachability testing.
//!
//! Entries are probed in batches under a fixed concurrency gate. Each probe
//! carries its own timeout, so a hung endpoint holds its slot for at most
//! one timeout. After every batch the results are checkpointed and
//! appended to history, which bounds what an interrupted run loses.

pub mod checkpoint;
pub mod geoip;
pub mod probe;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

pub use checkpoint::Checkpoint;
pub use geoip::GeoIp;
pub use probe::{ProbeSuccess, Prober, TcpProber};

use crate::error::ProbeError;
use crate::history::HistoryStore;
use crate::models::{ProxyConfig, TestResult};
use crate::settings::Settings;
use crate::utils::retry::{retry_with_backoff, RetryPolicy};

#[derive(Debug, Clone)]
pub struct TesterOptions {
    pub concurrency: usize,
    pub timeout: Duration,
    pub batch_size: usize,
    pub retry: RetryPolicy,
}

impl From<&Settings> for TesterOptions {
    fn from(settings: &Settings) -> Self {
        TesterOptions {
            concurrency: settings.test_concurrency.max(1),
            timeout: settings.probe_timeout(),
            batch_size: settings.batch_size.max(1),
            retry: RetryPolicy::new(settings.probe_retries, Duration::from_millis(200)),
        }
    }
}

/// Results of a test phase, in input order.
#[derive(Debug, Default)]
pub struct TestRun {
    pub results: Vec<TestResult>,
    pub completed_batches: usize,
    /// True when cancellation stopped the run before every entry was probed.
    pub interrupted: bool,
}

impl TestRun {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }
}

pub struct Tester<P: Prober> {
    prober: P,
    options: TesterOptions,
    geoip: Option<Arc<GeoIp>>,
    checkpoint: Option<Checkpoint>,
    history: Option<Arc<HistoryStore>>,
}

impl<P: Prober> Tester<P> {
    pub fn new(prober: P, options: TesterOptions) -> Self {
        Tester {
            prober,
            options,
            geoip: None,
            checkpoint: None,
            history: None,
        }
    }

    pub fn with_geoip(mut self, geoip: Arc<GeoIp>) -> Self {
        if !geoip.is_empty() {
            self.geoip = Some(geoip);
        }
        self
    }

    pub fn with_checkpoint(mut self, checkpoint: Checkpoint) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    pub fn with_history(mut self, history: Arc<HistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    /// Hand back the checkpoint so the caller can remove it.
    pub fn into_checkpoint(self) -> Option<Checkpoint> {
        self.checkpoint
    }

    /// Probe every entry, batch by batch.
    ///
    /// Cancellation seen between batches stops before the next batch.
    /// Cancellation during a batch stops issuing probes; probes already in
    /// flight finish or time out, and their results are flushed like a
    /// regular batch.
    pub async fn test_all(&self, configs: &[ProxyConfig], cancel: &CancellationToken) -> TestRun {
        let mut run = TestRun::default();
        if configs.is_empty() {
            return run;
        }
        let batch_size = self.options.batch_size.max(1);
        let batches = configs.len().div_ceil(batch_size);
        info!(
            "Testing {} entries in {} batches (concurrency {}, timeout {:?})",
            configs.len(),
            batches,
            self.options.concurrency,
            self.options.timeout
        );

        for (batch_index, batch) in configs.chunks(batch_size).enumerate() {
            if cancel.is_cancelled() {
                run.interrupted = true;
                break;
            }

            let mut indexed: Vec<(usize, TestResult)> = stream::iter(batch.iter().enumerate())
                .take_until(cancel.cancelled())
                .map(|(index, config)| async move { (index, self.test_one(config).await) })
                .buffer_unordered(self.options.concurrency.max(1))
                .collect()
                .await;
            indexed.sort_by_key(|(index, _)| *index);
            let results: Vec<TestResult> = indexed.into_iter().map(|(_, result)| result).collect();
            let complete = results.len() == batch.len();

            self.flush(&results);
            debug!(
                "Batch {}/{}: {} of {} reachable",
                batch_index + 1,
                batches,
                results.iter().filter(|r| r.success).count(),
                results.len()
            );
            run.results.extend(results);

            if !complete {
                run.interrupted = true;
                break;
            }
            run.completed_batches += 1;
        }

        if run.interrupted {
            warn!(
                "Testing interrupted after {} of {} entries",
                run.results.len(),
                configs.len()
            );
        }
        run
    }

    async fn test_one(&self, config: &ProxyConfig) -> TestResult {
        let identity = config.identity();
        let outcome = retry_with_backoff(&self.options.retry, ProbeError::is_transient, |_| async move {
            tokio::time::timeout(self.options.timeout, self.prober.probe(config))
                .await
                .unwrap_or(Err(ProbeError::Timeout))
        })
        .await;
        let tested_at = Utc::now();

        match outcome {
            Ok(success) => {
                let result =
                    TestResult::success(&identity, success.latency.as_millis() as u64, tested_at);
                match (&self.geoip, success.address) {
                    (Some(geoip), Some(ip)) => result.with_geo(geoip.lookup(ip)),
                    _ => result,
                }
            }
            Err(e) => {
                debug!("Probe of {} failed: {}", config.address(), e);
                TestResult::failure(&identity, e.kind(), tested_at)
            }
        }
    }

    fn flush(&self, results: &[TestResult]) {
        if let Some(checkpoint) = &self.checkpoint {
            if let Err(e) = checkpoint.append(results) {
                warn!(
                    "Failed to write checkpoint '{}': {}",
                    checkpoint.path().display(),
                    e
                );
            }
        }
        if let Some(history) = &self.history {
            if let Err(e) = history.record_all(results) {
                warn!("Failed to append test history: {}", e);
            }
        }
    }
}

/// Probe `configs` with the TCP prober, no batching side effects.
pub async fn test_all(
    configs: &[ProxyConfig],
    concurrency: usize,
    timeout: Duration,
    full_test: bool,
) -> Result<Vec<TestResult>, rustls::Error> {
    let tester = Tester::new(
        TcpProber::new(full_test)?,
        TesterOptions {
            concurrency,
            timeout,
            batch_size: configs.len().max(1),
            retry: RetryPolicy::none(),
        },
    );
    Ok(tester.test_all(configs, &CancellationToken::new()).await.results)
}
