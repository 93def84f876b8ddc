use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of history entries kept per subscription.
pub const HISTORY_CAP: usize = 20;

/// Guaranteed-selection runs granted to a newly added subscription.
pub const NEW_SUBSCRIPTION_PROTECTION: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrequencyTier {
    Daily,
    Often,
    Sometimes,
    Rarely,
    Suspended,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub total_nodes: usize,
    pub valid_nodes: usize,
    pub avg_latency_ms: u64,
    pub fetch_ok: bool,
}

impl HistoryEntry {
    pub fn fetch_failure(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            total_nodes: 0,
            valid_nodes: 0,
            avg_latency_ms: 0,
            fetch_ok: false,
        }
    }
}

/// Persistent per-subscription record. Keyed by URL; string comparison
/// decides identity. Mutated only by the scorer, once per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionState {
    pub url: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub runs_used: u64,
    #[serde(default)]
    pub runs_succeeded: u64,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub score: u8,
    pub tier: FrequencyTier,
    #[serde(default)]
    pub protection_counter: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_selected_week: Option<u64>,
}

impl SubscriptionState {
    pub fn new(url: impl Into<String>, now: DateTime<Utc>) -> Self {
        let url = url.into();
        let name = display_name_for(&url);
        Self {
            url,
            name,
            created_at: now,
            runs_used: 0,
            runs_succeeded: 0,
            history: Vec::new(),
            score: 50,
            tier: FrequencyTier::Sometimes,
            protection_counter: NEW_SUBSCRIPTION_PROTECTION,
            last_selected_week: None,
        }
    }

    pub fn push_history(&mut self, entry: HistoryEntry) {
        self.history.push(entry);
        if self.history.len() > HISTORY_CAP {
            let excess = self.history.len() - HISTORY_CAP;
            self.history.drain(..excess);
        }
    }
}

fn display_name_for(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_owned))
        .unwrap_or_else(|| url.to_owned())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreTransition {
    pub url: String,
    pub timestamp: DateTime<Utc>,
    pub old_score: u8,
    pub new_score: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoEntry {
    pub country_code: String,
    pub city: String,
}
