use std::collections::HashMap;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::registry::SourceRegistry;
use crate::error::SourceFetchError;
use crate::models::{RawEntry, Source, SourceKind};
use crate::settings::Settings;
use crate::utils::retry::{retry_with_backoff, RetryPolicy};

const USER_AGENT: &str = concat!("subharvest/", env!("CARGO_PKG_VERSION"));

/// Limits applied to every source download.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub concurrency: usize,
    /// Per-attempt timeout covering the request and the body.
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub max_bytes: usize,
    /// Wall-clock limit for the whole fetch phase.
    pub deadline: Duration,
}

impl From<&Settings> for FetchOptions {
    fn from(settings: &Settings) -> Self {
        FetchOptions {
            concurrency: settings.fetch_concurrency.max(1),
            timeout: settings.fetch_timeout(),
            retry: RetryPolicy::new(settings.fetch_retries, Duration::from_millis(500)),
            max_bytes: settings.max_source_bytes,
            deadline: settings.fetch_deadline(),
        }
    }
}

/// Outcome of one source.
#[derive(Debug)]
pub struct FetchOutcome {
    pub source: Source,
    pub source_index: usize,
    pub result: Result<String, SourceFetchError>,
}

/// Everything the fetch phase produced, in source-list order.
#[derive(Debug, Default)]
pub struct FetchReport {
    pub outcomes: Vec<FetchOutcome>,
    /// Sources disabled by failures in this run.
    pub pruned: Vec<String>,
}

impl FetchReport {
    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    /// Successful texts, ready for the parser.
    pub fn raw_entries(&self) -> Vec<RawEntry> {
        self.outcomes
            .iter()
            .filter_map(|outcome| {
                outcome.result.as_ref().ok().map(|text| RawEntry {
                    text: text.clone(),
                    source: outcome.source.location.clone(),
                    source_index: outcome.source_index,
                })
            })
            .collect()
    }
}

/// Downloads source texts under bounded concurrency.
pub struct Fetcher {
    client: reqwest::Client,
    options: FetchOptions,
}

impl Fetcher {
    pub fn new(options: FetchOptions, proxy: Option<&str>) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(options.timeout);
        if let Some(proxy) = proxy.filter(|p| !p.trim().is_empty()) {
            builder = builder.proxy(reqwest::Proxy::all(proxy.trim())?);
        }
        Ok(Fetcher {
            client: builder.build()?,
            options,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, reqwest::Error> {
        Self::new(FetchOptions::from(settings), settings.fetch_proxy.as_deref())
    }

    /// Fetch one URL with retries on transient failures.
    pub async fn fetch_url(&self, url: &str) -> Result<String, SourceFetchError> {
        retry_with_backoff(&self.options.retry, SourceFetchError::is_transient, |attempt| {
            if attempt > 1 {
                debug!("Fetching '{}' (attempt {})", url, attempt);
            }
            self.fetch_once(url)
        })
        .await
    }

    async fn fetch_once(&self, url: &str) -> Result<String, SourceFetchError> {
        let download = async {
            let mut response = self.client.get(url).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(SourceFetchError::HttpStatus(status.as_u16()));
            }
            if let Some(len) = response.content_length() {
                if len as usize > self.options.max_bytes {
                    return Err(SourceFetchError::TooLarge(self.options.max_bytes));
                }
            }
            let mut body = Vec::new();
            while let Some(chunk) = response.chunk().await? {
                if body.len().saturating_add(chunk.len()) > self.options.max_bytes {
                    return Err(SourceFetchError::TooLarge(self.options.max_bytes));
                }
                body.extend_from_slice(&chunk);
            }
            Ok::<_, SourceFetchError>(String::from_utf8_lossy(&body).into_owned())
        };
        tokio::time::timeout(self.options.timeout, download)
            .await
            .map_err(|_| SourceFetchError::Timeout)?
    }

    /// Fetch every active source, reporting outcomes to the registry.
    ///
    /// Channel sources take their text from `channel_texts`. Fetches still
    /// running at the deadline are aborted and count as failures; fetches
    /// aborted by `cancel` are not counted against their source.
    pub async fn fetch_all(
        &self,
        registry: &SourceRegistry,
        channel_texts: &HashMap<String, String>,
        cancel: &CancellationToken,
    ) -> FetchReport {
        let active = registry.active();
        if active.is_empty() {
            return FetchReport::default();
        }
        info!("Fetching {} sources", active.len());
        let deadline = Instant::now() + self.options.deadline;

        let mut outcomes: Vec<FetchOutcome> = stream::iter(active.into_iter().enumerate())
            .map(|(source_index, source)| async move {
                let result = match source.kind {
                    SourceKind::Url => self.fetch_bounded(&source.location, deadline, cancel).await,
                    SourceKind::Channel => channel_texts
                        .get(&source.location)
                        .cloned()
                        .ok_or_else(|| SourceFetchError::MissingChannelText(source.location.clone())),
                };
                FetchOutcome {
                    source,
                    source_index,
                    result,
                }
            })
            .buffer_unordered(self.options.concurrency)
            .collect()
            .await;
        outcomes.sort_by_key(|o| o.source_index);

        let mut pruned = Vec::new();
        for outcome in &outcomes {
            let location = &outcome.source.location;
            match &outcome.result {
                Ok(text) => {
                    debug!("Fetched '{}' ({} bytes)", location, text.len());
                    registry.record_success(location);
                }
                Err(SourceFetchError::Cancelled) => {}
                Err(e) => {
                    warn!("Source '{}' failed: {}", location, e);
                    if registry.record_failure(location) {
                        pruned.push(location.clone());
                    }
                }
            }
        }

        FetchReport { outcomes, pruned }
    }

    async fn fetch_bounded(
        &self,
        url: &str,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<String, SourceFetchError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(SourceFetchError::Cancelled),
            result = tokio::time::timeout_at(deadline, self.fetch_url(url)) => {
                result.map_err(|_| SourceFetchError::Deadline)?
            }
        }
    }
}
