//! Durable state: subscription records, the score-transition log, and the
//! IP-geo cache. Single writer (the run orchestrator); file writes go
//! through a temp sibling plus rename so a crash leaves either the old or
//! the new snapshot, never a mixture.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{GeoEntry, HistoryEntry, ScoreTransition, SubscriptionState};
use crate::scoring;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to determine XDG directories")]
    NoDirs,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Clone)]
pub struct StorePaths {
    state_dir: PathBuf,
}

impl StorePaths {
    pub fn new() -> Result<Self, StoreError> {
        let dirs = ProjectDirs::from("io", "nodepool", "nodepool").ok_or(StoreError::NoDirs)?;
        Ok(Self {
            state_dir: dirs.data_dir().to_path_buf(),
        })
    }

    pub fn from_dir(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn subscriptions_path(&self) -> PathBuf {
        self.state_dir.join("subscriptions.json")
    }

    pub fn score_history_path(&self) -> PathBuf {
        self.state_dir.join("score_history.log")
    }

    pub fn ip_cache_path(&self) -> PathBuf {
        self.state_dir.join("ip_cache.json")
    }

    pub fn ensure_dirs(&self) -> Result<(), StoreError> {
        if !self.state_dir.exists() {
            fs::create_dir_all(&self.state_dir)?;
            fs::set_permissions(&self.state_dir, fs::Permissions::from_mode(0o700))?;
        }
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SubscriptionsFile {
    run_number: u64,
    subscriptions: Vec<SubscriptionState>,
}

pub struct Store {
    paths: StorePaths,
    run_number: u64,
    subscriptions: BTreeMap<String, SubscriptionState>,
    ip_cache: BTreeMap<String, GeoEntry>,
    pending_transitions: Vec<ScoreTransition>,
}

impl Store {
    /// Load state from disk. Missing files mean a first run; a corrupt file
    /// is logged and treated as empty rather than aborting.
    pub fn open(paths: StorePaths) -> Self {
        let file: SubscriptionsFile = load_or_default(&paths.subscriptions_path());
        let ip_cache: BTreeMap<String, GeoEntry> = load_or_default(&paths.ip_cache_path());

        Self {
            paths,
            run_number: file.run_number,
            subscriptions: file
                .subscriptions
                .into_iter()
                .map(|s| (s.url.clone(), s))
                .collect(),
            ip_cache,
            pending_transitions: Vec::new(),
        }
    }

    /// Advance and return the global run counter.
    pub fn next_run_number(&mut self) -> u64 {
        self.run_number += 1;
        self.run_number
    }

    pub fn subscription(&self, url: &str) -> Option<&SubscriptionState> {
        self.subscriptions.get(url)
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Register the current source list. Previously-unseen URLs enter with
    /// the full new-subscription protection. Returns the states in source
    /// list order.
    pub fn upsert_subscriptions(
        &mut self,
        urls: &[String],
        now: DateTime<Utc>,
    ) -> Vec<SubscriptionState> {
        urls.iter()
            .map(|url| {
                self.subscriptions
                    .entry(url.clone())
                    .or_insert_with(|| {
                        log::info!("new subscription: {url}");
                        SubscriptionState::new(url.clone(), now)
                    })
                    .clone()
            })
            .collect()
    }

    /// Drop subscriptions that are gone from the source list and whose
    /// record has outlived one full cycle.
    pub fn prune_missing(
        &mut self,
        urls: &[String],
        max_age: chrono::Duration,
        now: DateTime<Utc>,
    ) -> usize {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|url, state| {
            let keep = urls.contains(url) || now - state.created_at <= max_age;
            if !keep {
                log::info!("pruning stale subscription: {url}");
            }
            keep
        });
        before - self.subscriptions.len()
    }

    /// Write back a state mutated outside the store (selection bookkeeping).
    pub fn update_subscription(&mut self, state: SubscriptionState) {
        self.subscriptions.insert(state.url.clone(), state);
    }

    /// Fold one run's outcome into a subscription's history and score.
    pub fn record_run(
        &mut self,
        url: &str,
        entry: HistoryEntry,
        max_latency_ms: u64,
        now: DateTime<Utc>,
    ) -> Option<ScoreTransition> {
        let state = self.subscriptions.get_mut(url)?;
        let transition = scoring::apply_run(state, entry, max_latency_ms, now);
        if transition.old_score != transition.new_score {
            self.pending_transitions.push(transition.clone());
        }
        Some(transition)
    }

    pub fn get_ip_geo(&self, key: &str) -> Option<&GeoEntry> {
        self.ip_cache.get(key)
    }

    pub fn set_ip_geo(&mut self, key: impl Into<String>, entry: GeoEntry) {
        self.ip_cache.insert(key.into(), entry);
    }

    /// All states, ordered by URL.
    pub fn all_subscriptions(&self) -> Vec<SubscriptionState> {
        self.subscriptions.values().cloned().collect()
    }

    /// Flush everything to disk. Subscriptions are written in URL order to
    /// keep diffs minimal; score transitions append to the log.
    pub fn persist(&mut self) -> Result<(), StoreError> {
        self.paths.ensure_dirs()?;

        let file = SubscriptionsFile {
            run_number: self.run_number,
            subscriptions: self.subscriptions.values().cloned().collect(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        atomic_write(&self.paths.subscriptions_path(), json.as_bytes())?;

        let json = serde_json::to_string_pretty(&self.ip_cache)?;
        atomic_write(&self.paths.ip_cache_path(), json.as_bytes())?;

        if !self.pending_transitions.is_empty() {
            let mut log_file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.paths.score_history_path())?;
            for transition in &self.pending_transitions {
                writeln!(log_file, "{}", serde_json::to_string(transition)?)?;
            }
            log_file.flush()?;
            self.pending_transitions.clear();
        }
        Ok(())
    }
}

fn load_or_default<T: Default + for<'de> Deserialize<'de>>(path: &Path) -> T {
    if !path.exists() {
        return T::default();
    }
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            log::warn!("failed to read {}: {e}; starting empty", path.display());
            return T::default();
        }
    };
    match serde_json::from_str(&contents) {
        Ok(value) => value,
        Err(e) => {
            log::warn!("corrupt state file {}: {e}; starting empty", path.display());
            T::default()
        }
    }
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let dir = path.parent().ok_or_else(|| {
        StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "path has no parent directory",
        ))
    })?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}
