use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::PoolNode;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubStats {
    pub total: usize,
    pub valid: usize,
    pub avg_latency_ms: u64,
}

/// Per-run validation aggregate. The scorer folds this into each selected
/// subscription's history.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub total_nodes: usize,
    pub valid_nodes: usize,
    pub per_subscription: BTreeMap<String, SubStats>,
    pub elapsed_ms: u64,
}

impl ValidationReport {
    pub fn from_nodes(nodes: &[PoolNode], elapsed_ms: u64) -> Self {
        let mut report = Self {
            total_nodes: nodes.len(),
            elapsed_ms,
            ..Self::default()
        };
        let mut latency_sums: BTreeMap<&str, u64> = BTreeMap::new();
        for pn in nodes {
            let stats = report
                .per_subscription
                .entry(pn.source_url.clone())
                .or_default();
            stats.total += 1;
            if pn.is_valid() {
                stats.valid += 1;
                report.valid_nodes += 1;
                *latency_sums.entry(pn.source_url.as_str()).or_default() +=
                    pn.latency_ms.unwrap_or(0);
            }
        }
        for (url, stats) in report.per_subscription.iter_mut() {
            if stats.valid > 0 {
                stats.avg_latency_ms = latency_sums[url.as_str()] / stats.valid as u64;
            }
        }
        report
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_nodes == 0 {
            0.0
        } else {
            self.valid_nodes as f64 / self.total_nodes as f64
        }
    }

    pub fn stats_for(&self, url: &str) -> SubStats {
        self.per_subscription.get(url).cloned().unwrap_or_default()
    }
}

/// On-disk form of the per-run statistics artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationStats {
    pub timestamp: DateTime<Utc>,
    pub total_nodes: usize,
    pub valid_nodes: usize,
    pub success_rate: f64,
    pub per_subscription: BTreeMap<String, SubStats>,
}

impl ValidationStats {
    pub fn from_report(report: &ValidationReport, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            total_nodes: report.total_nodes,
            valid_nodes: report.valid_nodes,
            success_rate: report.success_rate(),
            per_subscription: report.per_subscription.clone(),
        }
    }
}
