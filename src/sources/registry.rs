use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::models::Source;
use crate::utils::file::atomic_write;

/// Read a newline-delimited source list.
///
/// Blank lines and `#` comments are skipped; repeated locations collapse
/// onto their first occurrence.
pub fn load_sources(path: &Path) -> std::io::Result<Vec<Source>> {
    let content = std::fs::read_to_string(path)?;
    Ok(parse_source_list(&content))
}

pub fn parse_source_list(content: &str) -> Vec<Source> {
    let mut seen = HashSet::new();
    content
        .lines()
        .filter_map(Source::from_line)
        .filter(|source| seen.insert((source.kind, source.location.clone())))
        .collect()
}

/// On-disk sidecar: failure counters of active sources and the disabled list.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryState {
    #[serde(default)]
    failures: BTreeMap<String, u32>,
    #[serde(default)]
    disabled: Vec<Source>,
}

/// Tracks source health across runs.
///
/// Counters are updated through `&self` so fetch tasks can report outcomes
/// concurrently; [`SourceRegistry::save`] persists the state atomically.
pub struct SourceRegistry {
    state_path: PathBuf,
    threshold: u32,
    prune_enabled: bool,
    sources: Mutex<Vec<Source>>,
}

impl SourceRegistry {
    /// Build a registry from the configured sources, applying persisted
    /// counters from `state_path`. A missing or unreadable sidecar starts
    /// fresh.
    pub fn open(sources: Vec<Source>, state_path: &Path, threshold: u32, prune_enabled: bool) -> Self {
        let state = match std::fs::read_to_string(state_path) {
            Ok(content) => match serde_json::from_str::<RegistryState>(&content) {
                Ok(state) => state,
                Err(e) => {
                    warn!(
                        "Ignoring corrupt source state '{}': {}",
                        state_path.display(),
                        e
                    );
                    RegistryState::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => RegistryState::default(),
            Err(e) => {
                warn!("Cannot read source state '{}': {}", state_path.display(), e);
                RegistryState::default()
            }
        };

        let disabled: HashSet<&str> = state.disabled.iter().map(|s| s.location.as_str()).collect();
        let mut merged: Vec<Source> = sources
            .into_iter()
            .map(|mut source| {
                source.consecutive_failures =
                    state.failures.get(&source.location).copied().unwrap_or(0);
                source.disabled = disabled.contains(source.location.as_str());
                source
            })
            .collect();

        // disabled sources dropped from the list stay on record
        let listed: HashSet<String> = merged.iter().map(|s| s.location.clone()).collect();
        merged.extend(
            state
                .disabled
                .into_iter()
                .filter(|s| !listed.contains(&s.location))
                .map(|mut s| {
                    s.disabled = true;
                    s
                }),
        );

        SourceRegistry {
            state_path: state_path.to_path_buf(),
            threshold: threshold.max(1),
            prune_enabled,
            sources: Mutex::new(merged),
        }
    }

    /// Sources still in rotation, in source-list order.
    pub fn active(&self) -> Vec<Source> {
        self.sources.lock().iter().filter(|s| !s.disabled).cloned().collect()
    }

    pub fn disabled(&self) -> Vec<Source> {
        self.sources.lock().iter().filter(|s| s.disabled).cloned().collect()
    }

    pub fn get(&self, location: &str) -> Option<Source> {
        self.sources.lock().iter().find(|s| s.location == location).cloned()
    }

    /// Count a failed fetch. Returns true when this failure disabled the source.
    pub fn record_failure(&self, location: &str) -> bool {
        let mut sources = self.sources.lock();
        let Some(source) = sources.iter_mut().find(|s| s.location == location) else {
            return false;
        };
        if source.disabled {
            return false;
        }
        source.consecutive_failures = source.consecutive_failures.saturating_add(1);
        debug!(
            "Source '{}' failed ({} in a row)",
            source.location, source.consecutive_failures
        );
        if self.prune_enabled && source.consecutive_failures >= self.threshold {
            source.disabled = true;
            info!(
                "Disabling source '{}' after {} consecutive failures",
                source.location, source.consecutive_failures
            );
            return true;
        }
        false
    }

    pub fn record_success(&self, location: &str) {
        let mut sources = self.sources.lock();
        if let Some(source) = sources.iter_mut().find(|s| s.location == location) {
            source.consecutive_failures = 0;
        }
    }

    /// Put a disabled source back into rotation with a clean counter.
    pub fn reenable(&self, location: &str) -> bool {
        let mut sources = self.sources.lock();
        match sources.iter_mut().find(|s| s.location == location && s.disabled) {
            Some(source) => {
                source.disabled = false;
                source.consecutive_failures = 0;
                info!("Re-enabled source '{}'", location);
                true
            }
            None => false,
        }
    }

    /// Persist counters and the disabled list (write-temp, fsync, rename).
    pub fn save(&self) -> std::io::Result<()> {
        let state = {
            let sources = self.sources.lock();
            RegistryState {
                failures: sources
                    .iter()
                    .filter(|s| !s.disabled && s.consecutive_failures > 0)
                    .map(|s| (s.location.clone(), s.consecutive_failures))
                    .collect(),
                disabled: sources.iter().filter(|s| s.disabled).cloned().collect(),
            }
        };
        let json = serde_json::to_vec_pretty(&state)?;
        if let Some(parent) = self.state_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        atomic_write(&self.state_path, &json)
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }
}
