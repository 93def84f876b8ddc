//! Subscription reputation. Pure functions from history to score; the
//! store is the only side-effecting boundary.

use chrono::{DateTime, Utc};

use crate::models::{FrequencyTier, HistoryEntry, ScoreTransition, SubscriptionState};

/// How many of the newest history entries feed the averaged signals.
const WINDOW: usize = 5;

/// valid-node count at which the volume signal saturates.
const TARGET_VALID: f64 = 20.0;

const WEIGHT_SUCCESS: f64 = 0.40;
const WEIGHT_LATENCY: f64 = 0.30;
const WEIGHT_VOLUME: f64 = 0.20;
const WEIGHT_STABILITY: f64 = 0.10;

pub fn tier_of(score: u8) -> FrequencyTier {
    match score {
        90..=100 => FrequencyTier::Daily,
        70..=89 => FrequencyTier::Often,
        50..=69 => FrequencyTier::Sometimes,
        30..=49 => FrequencyTier::Rarely,
        _ => FrequencyTier::Suspended,
    }
}

/// Weighted combination of success rate, latency quality, volume, and
/// stability over the newest history entries, scaled to [0, 100].
pub fn compute_score(history: &[HistoryEntry], max_latency_ms: u64) -> u8 {
    if history.is_empty() {
        return 0;
    }
    let window = &history[history.len().saturating_sub(WINDOW)..];

    let success_rate = mean(window.iter().map(|e| {
        if !e.fetch_ok {
            0.0
        } else {
            e.valid_nodes as f64 / (e.total_nodes.max(1)) as f64
        }
    }));

    let max_latency = max_latency_ms.max(1) as f64;
    let latency_quality = mean(window.iter().map(|e| {
        if !e.fetch_ok {
            0.0
        } else {
            (1.0 - e.avg_latency_ms as f64 / max_latency).max(0.0)
        }
    }));

    let volume = window
        .last()
        .map_or(0.0, |e| (e.valid_nodes as f64 / TARGET_VALID).min(1.0));

    let valid_counts: Vec<f64> = window.iter().map(|e| e.valid_nodes as f64).collect();
    let m = mean(valid_counts.iter().copied());
    let stability = (1.0 - stddev(&valid_counts, m) / m.max(1.0)).clamp(0.0, 1.0);

    let score = WEIGHT_SUCCESS * success_rate
        + WEIGHT_LATENCY * latency_quality
        + WEIGHT_VOLUME * volume
        + WEIGHT_STABILITY * stability;
    (score * 100.0).round().clamp(0.0, 100.0) as u8
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for v in values {
        sum += v;
        count += 1;
    }
    if count == 0 { 0.0 } else { sum / count as f64 }
}

fn stddev(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Fold one run's outcome into a subscription: push the history entry,
/// bump the usage counters, recompute score and tier. Returns the score
/// transition for the audit log.
pub fn apply_run(
    state: &mut SubscriptionState,
    entry: HistoryEntry,
    max_latency_ms: u64,
    now: DateTime<Utc>,
) -> ScoreTransition {
    let old_score = state.score;
    state.runs_used += 1;
    if entry.fetch_ok {
        state.runs_succeeded += 1;
    }
    state.push_history(entry);
    state.score = compute_score(&state.history, max_latency_ms);
    state.tier = tier_of(state.score);
    ScoreTransition {
        url: state.url.clone(),
        timestamp: now,
        old_score,
        new_score: state.score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(total: usize, valid: usize, latency: u64) -> HistoryEntry {
        HistoryEntry {
            timestamp: Utc::now(),
            total_nodes: total,
            valid_nodes: valid,
            avg_latency_ms: latency,
            fetch_ok: true,
        }
    }

    #[test]
    fn test_tier_boundaries() {
        assert_eq!(tier_of(100), FrequencyTier::Daily);
        assert_eq!(tier_of(90), FrequencyTier::Daily);
        assert_eq!(tier_of(89), FrequencyTier::Often);
        assert_eq!(tier_of(70), FrequencyTier::Often);
        assert_eq!(tier_of(69), FrequencyTier::Sometimes);
        assert_eq!(tier_of(50), FrequencyTier::Sometimes);
        assert_eq!(tier_of(49), FrequencyTier::Rarely);
        assert_eq!(tier_of(30), FrequencyTier::Rarely);
        assert_eq!(tier_of(29), FrequencyTier::Suspended);
        assert_eq!(tier_of(0), FrequencyTier::Suspended);
    }

    #[test]
    fn test_steady_subscription_scores_86() {
        // five clean runs, 10/10 nodes at 300 ms:
        //   0.40*1.0 + 0.30*0.85 + 0.20*0.5 + 0.10*1.0 = 0.855
        let history: Vec<_> = (0..5).map(|_| entry(10, 10, 300)).collect();
        let score = compute_score(&history, 2000);
        assert_eq!(score, 86);
        assert_eq!(tier_of(score), FrequencyTier::Often);
    }

    #[test]
    fn test_perfect_subscription_hits_daily() {
        let history: Vec<_> = (0..5).map(|_| entry(40, 40, 0)).collect();
        let score = compute_score(&history, 2000);
        assert_eq!(score, 100);
        assert_eq!(tier_of(score), FrequencyTier::Daily);
    }

    #[test]
    fn test_empty_history_scores_zero() {
        assert_eq!(compute_score(&[], 2000), 0);
    }

    #[test]
    fn test_fetch_failure_zeroes_rate_and_latency_signals() {
        let mut failed = entry(0, 0, 0);
        failed.fetch_ok = false;
        // stability over all-zero counts is 1.0, so only that signal remains
        let score = compute_score(&[failed], 2000);
        assert_eq!(score, 10);
    }

    #[test]
    fn test_latency_above_threshold_floors_at_zero() {
        let history = vec![entry(10, 10, 5000)];
        // latency_quality clamps to 0 rather than going negative
        let score = compute_score(&history, 2000);
        // 0.40*1.0 + 0 + 0.20*0.5 + 0.10*1.0 = 0.60
        assert_eq!(score, 60);
    }

    #[test]
    fn test_only_last_five_entries_count() {
        let mut history: Vec<_> = (0..10).map(|_| entry(10, 0, 1900)).collect();
        history.extend((0..5).map(|_| entry(10, 10, 100)));
        let fresh_only: Vec<_> = (0..5).map(|_| entry(10, 10, 100)).collect();
        assert_eq!(
            compute_score(&history, 2000),
            compute_score(&fresh_only, 2000)
        );
    }

    #[test]
    fn test_unstable_counts_score_below_stable() {
        let stable: Vec<_> = (0..5).map(|_| entry(20, 10, 500)).collect();
        let unstable = vec![
            entry(20, 2, 500),
            entry(20, 18, 500),
            entry(20, 2, 500),
            entry(20, 18, 500),
            entry(20, 10, 500),
        ];
        assert!(compute_score(&unstable, 2000) < compute_score(&stable, 2000));
    }

    #[test]
    fn test_apply_run_updates_state_and_invariants() {
        let mut state = SubscriptionState::new("https://s.example/feed", Utc::now());
        let transition = apply_run(&mut state, entry(10, 10, 300), 2000, Utc::now());

        assert_eq!(state.runs_used, 1);
        assert_eq!(state.runs_succeeded, 1);
        assert_eq!(state.history.len(), 1);
        assert_eq!(state.tier, tier_of(state.score));
        assert_eq!(transition.old_score, 50);
        assert_eq!(transition.new_score, state.score);
    }

    #[test]
    fn test_apply_run_fetch_failure_counts_use_not_success() {
        let mut state = SubscriptionState::new("https://s.example/feed", Utc::now());
        apply_run(
            &mut state,
            HistoryEntry::fetch_failure(Utc::now()),
            2000,
            Utc::now(),
        );
        assert_eq!(state.runs_used, 1);
        assert_eq!(state.runs_succeeded, 0);
    }
}
