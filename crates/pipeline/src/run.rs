//! One full run: select subscriptions, fetch, ingest, probe, score,
//! persist, emit. Data flows strictly forward; the store is written once,
//! at the end, and not at all when the run is cancelled.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::watch;

use nodepool_core::models::HistoryEntry;
use nodepool_core::output::{self, ArtifactWriter};
use nodepool_core::selector;
use nodepool_core::settings::Settings;
use nodepool_core::store::{Store, StoreError};

use crate::{fetch, ingest, validate};

/// How long a subscription absent from the source list survives before the
/// store prunes it.
fn prune_grace() -> chrono::Duration {
    chrono::Duration::days(1)
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("subscription list {}: {source}", path.display())]
    SourceList {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("persist state: {0}")]
    Persist(#[from] StoreError),
    #[error("run cancelled")]
    Cancelled,
}

/// Read the source list: one URL per line, `#` comments and blank lines
/// ignored. A missing or unreadable file is run-fatal.
pub fn read_source_list(path: &Path) -> Result<Vec<String>, RunError> {
    let contents = std::fs::read_to_string(path).map_err(|source| RunError::SourceList {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_owned)
        .collect())
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_number: u64,
    pub selected: usize,
    pub fetched_ok: usize,
    pub total_nodes: usize,
    pub valid_nodes: usize,
    pub success_rate: f64,
    pub emitted: usize,
    pub top_subscriptions: Vec<(String, u8)>,
    pub bottom_subscriptions: Vec<(String, u8)>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "run #{}: {} subscriptions selected, {} fetched, {} nodes parsed, {} valid ({:.1}%), {} emitted",
            self.run_number,
            self.selected,
            self.fetched_ok,
            self.total_nodes,
            self.valid_nodes,
            self.success_rate * 100.0,
            self.emitted,
        )?;
        writeln!(f, "top subscriptions:")?;
        for (url, score) in &self.top_subscriptions {
            writeln!(f, "  {score:>3}  {url}")?;
        }
        writeln!(f, "bottom subscriptions:")?;
        for (url, score) in &self.bottom_subscriptions {
            writeln!(f, "  {score:>3}  {url}")?;
        }
        Ok(())
    }
}

pub async fn execute_run(
    sources: &Path,
    store: &mut Store,
    writer: &dyn ArtifactWriter,
    settings: &Settings,
    cancel: &watch::Receiver<bool>,
) -> Result<RunSummary, RunError> {
    let now = Utc::now();
    let urls = read_source_list(sources)?;
    log::info!("{} subscriptions in source list", urls.len());

    let mut states = store.upsert_subscriptions(&urls, now);
    let pruned = store.prune_missing(&urls, prune_grace(), now);
    if pruned > 0 {
        log::info!("pruned {pruned} stale subscriptions");
    }

    let run_number = store.next_run_number();
    let selected = selector::select_for_run(&mut states, run_number, selector::day_seed(now));
    for state in states {
        store.update_subscription(state);
    }
    log::info!(
        "run #{run_number}: selected {}/{} subscriptions",
        selected.len(),
        urls.len()
    );

    let client = fetch::build_client(settings.fetch_timeout);
    let results = fetch::fetch_all(&client, &selected, settings.fetcher_concurrency, cancel).await;
    let fetch_ok: BTreeMap<&str, bool> = results
        .iter()
        .map(|r| (r.url.as_str(), r.is_ok()))
        .collect();
    let fetched_ok = fetch_ok.values().filter(|ok| **ok).count();

    let ingested = ingest::ingest(&results);
    log::info!(
        "ingested {} unique nodes ({} discarded entries)",
        ingested.nodes.len(),
        ingested.discarded
    );

    let mut nodes = ingested.nodes;
    let report = validate::validate(&mut nodes, settings, cancel).await;

    if *cancel.borrow() {
        // leave the store untouched: the pre-run snapshot stays on disk
        return Err(RunError::Cancelled);
    }

    for url in &selected {
        let entry = if fetch_ok.get(url.as_str()).copied().unwrap_or(false) {
            let stats = report.stats_for(url);
            HistoryEntry {
                timestamp: now,
                total_nodes: stats.total,
                valid_nodes: stats.valid,
                avg_latency_ms: stats.avg_latency_ms,
                fetch_ok: true,
            }
        } else {
            HistoryEntry::fetch_failure(now)
        };
        store.record_run(url, entry, settings.max_latency_ms, now);
    }
    store.persist()?;

    let ranked = validate::rank(&nodes, settings.max_output_nodes);
    if let Err(e) = output::emit(&ranked, &report, writer, now) {
        log::error!("failed to write artifacts: {e}");
    }

    let mut by_score = store.all_subscriptions();
    by_score.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.url.cmp(&b.url)));
    let top_subscriptions: Vec<(String, u8)> = by_score
        .iter()
        .take(5)
        .map(|s| (s.url.clone(), s.score))
        .collect();
    let bottom_subscriptions: Vec<(String, u8)> = by_score
        .iter()
        .rev()
        .take(5)
        .map(|s| (s.url.clone(), s.score))
        .collect();

    Ok(RunSummary {
        run_number,
        selected: selected.len(),
        fetched_ok,
        total_nodes: report.total_nodes,
        valid_nodes: report.valid_nodes,
        success_rate: report.success_rate(),
        emitted: ranked.len(),
        top_subscriptions,
        bottom_subscriptions,
    })
}
