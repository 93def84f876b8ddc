use std::collections::{BTreeMap, HashSet};

use nodepool_core::codec::{self, DecodedBody};
use nodepool_core::models::{NodeKey, PoolNode, ProxyNode};

use crate::fetch::FetchResult;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubTally {
    pub parsed: usize,
    pub unique: usize,
}

#[derive(Debug, Default)]
pub struct Ingested {
    /// Deduplicated nodes in first-seen order across the subscription list.
    pub nodes: Vec<PoolNode>,
    pub tallies: BTreeMap<String, SubTally>,
    /// Lines or entries that did not yield a node.
    pub discarded: usize,
}

/// Run every fetched body through the codec, deduplicating on canonical
/// identity. First occurrence wins; later duplicates keep nothing, not
/// even their display name.
pub fn ingest(results: &[FetchResult]) -> Ingested {
    let mut out = Ingested::default();
    let mut seen: HashSet<NodeKey> = HashSet::new();

    for result in results {
        let Ok(body) = &result.body else {
            continue;
        };
        let mut tally = SubTally::default();

        match codec::decode_body(body) {
            DecodedBody::Clash(entries) => {
                for entry in entries {
                    match codec::clash::parse_entry(&entry) {
                        Ok(node) => {
                            admit(&mut out, &mut seen, &mut tally, node, &result.url);
                        }
                        Err(e) => {
                            out.discarded += 1;
                            log::debug!("{}: bad proxy entry: {e}", result.url);
                        }
                    }
                }
            }
            DecodedBody::Lines(lines) => {
                for line in lines {
                    if !codec::is_node_uri(&line) {
                        out.discarded += 1;
                        log::debug!("{}: skipping non-node line", result.url);
                        continue;
                    }
                    match codec::parse_uri(&line) {
                        Ok(node) => {
                            admit(&mut out, &mut seen, &mut tally, node, &result.url);
                        }
                        Err(e) => {
                            out.discarded += 1;
                            log::debug!("{}: bad node URI: {e}", result.url);
                        }
                    }
                }
            }
        }

        log::debug!(
            "{}: {} nodes parsed, {} unique",
            result.url,
            tally.parsed,
            tally.unique
        );
        out.tallies.insert(result.url.clone(), tally);
    }
    out
}

fn admit(
    out: &mut Ingested,
    seen: &mut HashSet<NodeKey>,
    tally: &mut SubTally,
    node: ProxyNode,
    source_url: &str,
) {
    tally.parsed += 1;
    let key = node.canonical_key();
    if seen.insert(key.clone()) {
        tally.unique += 1;
        out.nodes.push(PoolNode::new(node, source_url));
    } else {
        log::debug!("duplicate node {key} from {source_url}");
    }
}
