//! Bounded-concurrency endpoint probing. Nodes are drained in fixed-size
//! batches with a quiescent delay between batches to keep the host's
//! outbound connection rate polite.

use std::time::{Duration, Instant};

use tokio::net::{TcpStream, lookup_host};
use tokio::sync::watch;
use tokio::time::{sleep, timeout};

use nodepool_core::codec::format_host;
use nodepool_core::models::{PoolNode, ProbeOutcome, ValidationReport};
use nodepool_core::settings::{Settings, ValidationMode};

use crate::wait_cancelled;

/// Probe every node, filling in `outcome` and `latency_ms`, and aggregate
/// the run report. Cancellation marks in-flight and not-yet-started probes
/// as `cancelled`; they are not retried within the run.
pub async fn validate(
    nodes: &mut [PoolNode],
    settings: &Settings,
    cancel: &watch::Receiver<bool>,
) -> ValidationReport {
    let started = Instant::now();
    let total = nodes.len();
    let batch_size = settings.batch_size.max(1);
    let total_batches = total.div_ceil(batch_size);

    for batch_no in 0..total_batches {
        let start = batch_no * batch_size;
        let end = (start + batch_size).min(total);

        if *cancel.borrow() {
            for node in &mut nodes[start..] {
                node.outcome = Some(ProbeOutcome::Cancelled);
                node.latency_ms = None;
            }
            log::warn!("validation cancelled after {start}/{total} probes");
            break;
        }

        let mut handles = Vec::with_capacity(end - start);
        for (i, node) in nodes.iter().enumerate().take(end).skip(start) {
            let server = node.node.server().to_owned();
            let port = node.node.port();
            let mode = settings.validation_mode;
            let tcp_timeout = settings.tcp_timeout;
            let max_latency_ms = settings.max_latency_ms;
            let mut cancel = cancel.clone();
            handles.push((
                i,
                tokio::spawn(async move {
                    tokio::select! {
                        out = probe(&server, port, mode, tcp_timeout, max_latency_ms) => out,
                        _ = wait_cancelled(&mut cancel) => (ProbeOutcome::Cancelled, None),
                    }
                }),
            ));
        }

        for (i, handle) in handles {
            let (outcome, latency_ms) = handle
                .await
                .unwrap_or_else(|e| (ProbeOutcome::Other(format!("probe task failed: {e}")), None));
            if !matches!(outcome, ProbeOutcome::Ok) {
                log::debug!(
                    "probe {} failed: {}",
                    nodes[i].node.canonical_key(),
                    outcome.reason()
                );
            }
            nodes[i].outcome = Some(outcome);
            nodes[i].latency_ms = latency_ms;
        }

        log::info!("validated batch {}/{total_batches} ({end}/{total} nodes)", batch_no + 1);

        if batch_no + 1 < total_batches && !settings.batch_delay.is_zero() {
            let mut cancel = cancel.clone();
            tokio::select! {
                _ = sleep(settings.batch_delay) => {}
                _ = wait_cancelled(&mut cancel) => {}
            }
        }
    }

    ValidationReport::from_nodes(nodes, started.elapsed().as_millis() as u64)
}

async fn probe(
    server: &str,
    port: u16,
    mode: ValidationMode,
    tcp_timeout: Duration,
    max_latency_ms: u64,
) -> (ProbeOutcome, Option<u64>) {
    match mode {
        ValidationMode::Lenient => match timeout(tcp_timeout, lookup_host((server, port))).await {
            Err(_) => (ProbeOutcome::Timeout, None),
            Ok(Err(_)) => (ProbeOutcome::DnsFailed, None),
            Ok(Ok(mut addrs)) => {
                if addrs.next().is_some() {
                    (ProbeOutcome::Ok, Some(0))
                } else {
                    (ProbeOutcome::DnsFailed, None)
                }
            }
        },
        ValidationMode::Strict => {
            // name resolution shares the connect budget
            let target = format!("{}:{port}", format_host(server));
            let start = Instant::now();
            match timeout(tcp_timeout, TcpStream::connect(&target)).await {
                Err(_) => (ProbeOutcome::Timeout, None),
                Ok(Err(e)) => (classify_connect_error(&e), None),
                Ok(Ok(stream)) => {
                    let latency = start.elapsed().as_millis() as u64;
                    drop(stream);
                    if latency <= max_latency_ms {
                        (ProbeOutcome::Ok, Some(latency))
                    } else {
                        (
                            ProbeOutcome::Other(format!("latency {latency}ms above threshold")),
                            Some(latency),
                        )
                    }
                }
            }
        }
    }
}

fn classify_connect_error(e: &std::io::Error) -> ProbeOutcome {
    use std::io::ErrorKind;
    match e.kind() {
        ErrorKind::ConnectionRefused => ProbeOutcome::Refused,
        ErrorKind::TimedOut => ProbeOutcome::Timeout,
        ErrorKind::HostUnreachable | ErrorKind::NetworkUnreachable => ProbeOutcome::Unreachable,
        _ => {
            let msg = e.to_string();
            if msg.contains("lookup") || msg.contains("resolve") {
                ProbeOutcome::DnsFailed
            } else {
                ProbeOutcome::Other(msg)
            }
        }
    }
}

/// Valid nodes sorted by ascending latency, capped at `max_nodes`. The
/// sort is stable, so equal latencies keep their first-seen order.
pub fn rank(nodes: &[PoolNode], max_nodes: usize) -> Vec<PoolNode> {
    let mut valid: Vec<PoolNode> = nodes.iter().filter(|n| n.is_valid()).cloned().collect();
    valid.sort_by_key(|n| n.latency_ms.unwrap_or(u64::MAX));
    valid.truncate(max_nodes);
    valid
}
