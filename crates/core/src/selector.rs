//! Per-run subscription selection. Probabilistic tiers draw from a PRNG
//! seeded by the calendar day, so re-running within one day reproduces the
//! same choices.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::models::{FrequencyTier, SubscriptionState};

const OFTEN_PROBABILITY: f64 = 2.0 / 3.0;
const SOMETIMES_PROBABILITY: f64 = 1.0 / 3.0;

/// Default selection seed: days since the Unix epoch.
pub fn day_seed(now: DateTime<Utc>) -> u64 {
    (now.timestamp() / 86_400).max(0) as u64
}

/// Decide which subscriptions this run fetches. Input order is preserved
/// in the output; downstream components keep it. Mutates protection
/// counters and the rarely-tier week marker in place; the caller persists
/// those at end-of-run.
pub fn select_for_run(
    subscriptions: &mut [SubscriptionState],
    run_number: u64,
    seed: u64,
) -> Vec<String> {
    let mut rng = StdRng::seed_from_u64(seed);
    let week = run_number / 7;
    let mut selected = Vec::new();

    for sub in subscriptions.iter_mut() {
        let picked = if sub.protection_counter > 0 {
            sub.protection_counter -= 1;
            true
        } else {
            match sub.tier {
                FrequencyTier::Daily => true,
                FrequencyTier::Often => rng.gen_range(0.0..1.0) < OFTEN_PROBABILITY,
                FrequencyTier::Sometimes => rng.gen_range(0.0..1.0) < SOMETIMES_PROBABILITY,
                FrequencyTier::Rarely => {
                    if sub.last_selected_week != Some(week) {
                        sub.last_selected_week = Some(week);
                        true
                    } else {
                        false
                    }
                }
                FrequencyTier::Suspended => false,
            }
        };
        if picked {
            selected.push(sub.url.clone());
        }
    }
    selected
}
