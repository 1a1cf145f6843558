//! Peer discovery and exclusion
//!
//! The directory grows monotonically: every refresh adds the graph nodes it
//! has not seen before and never touches known entries.

use crate::{
    db::{Peer, PeerStore},
    node::PaymentNode,
    SatogramError, SatogramResult,
};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::{debug, error, info};

/// Peer ids that are never paid during a run
#[derive(Debug, Clone, Default)]
pub struct ExclusionSet {
    ids: HashSet<String>,
}

impl ExclusionSet {
    /// Build a set from hex peer ids
    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            ids: ids
                .into_iter()
                .map(|id| id.as_ref().trim().to_ascii_lowercase())
                .filter(|id| !id.is_empty())
                .collect(),
        }
    }

    /// Load the newline-delimited list at `path`.
    ///
    /// A missing file is an empty set. Blank lines and lines starting with
    /// `#` are ignored. Invalid UTF-8 is replaced rather than rejected.
    pub async fn load(path: &Path) -> SatogramResult<Self> {
        let content = match tokio::fs::read(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No exclusion list at {}", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(SatogramError::Config(format!(
                    "Failed to read exclusion list {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let set = Self::from_ids(
            content
                .split(|b| *b == b'\n')
                .map(String::from_utf8_lossy)
                .filter(|line| !line.trim_start().starts_with('#')),
        );
        info!("Loaded {} excluded pubkeys from {}", set.len(), path.display());
        Ok(set)
    }

    /// A new set holding these ids and `more`
    pub fn with_additional<I, S>(&self, more: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut ids = self.ids.clone();
        ids.extend(Self::from_ids(more).ids);
        Self { ids }
    }

    /// Whether `peer_id` is excluded
    pub fn contains(&self, peer_id: &str) -> bool {
        self.ids.contains(&peer_id.to_ascii_lowercase())
    }

    /// Number of excluded ids
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether no id is excluded
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Every peer of the node's graph except the node itself, id → alias
pub async fn discover_peers(node: &dyn PaymentNode) -> SatogramResult<BTreeMap<String, String>> {
    let graph = node.describe_graph().await?;
    let info = node.get_info().await?;
    let own_id = info.identity_pubkey.to_ascii_lowercase();

    let peers: BTreeMap<String, String> = graph
        .into_iter()
        .map(|n| (n.pub_key.to_ascii_lowercase(), n.alias))
        // self-payments are not allowed
        .filter(|(id, _)| *id != own_id)
        .collect();

    info!("Discovered {} peers in the graph", peers.len());
    Ok(peers)
}

/// Summary of a directory refresh
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Peers found in the graph
    pub discovered: usize,
    /// New, non-excluded peers added to the directory
    pub inserted: usize,
    /// Graph peers on the exclusion list
    pub excluded: usize,
    /// Peers in the directory after the refresh
    pub stored: usize,
}

/// Add every newly discovered peer to the directory.
///
/// Excluded peers are still recorded but reported separately. A peer that
/// cannot be stored is logged and skipped.
pub async fn refresh(
    node: &dyn PaymentNode,
    store: &PeerStore,
    exclusions: &ExclusionSet,
) -> SatogramResult<RefreshReport> {
    let peers = discover_peers(node).await?;
    let mut report = RefreshReport {
        discovered: peers.len(),
        ..Default::default()
    };

    for (id, alias) in peers {
        let excluded = exclusions.contains(&id);
        match store.upsert_if_absent(&Peer::new(id.clone(), alias)).await {
            Ok(true) if excluded => report.excluded += 1,
            Ok(true) => report.inserted += 1,
            Ok(false) if excluded => report.excluded += 1,
            Ok(false) => {}
            Err(e) => error!("Failed to store peer {}: {}", id, e),
        }
    }

    report.stored = store.count().await?;
    info!(
        "{} new pubkeys added, {} excluded, {} stored in the db",
        report.inserted, report.excluded, report.stored
    );
    Ok(report)
}
