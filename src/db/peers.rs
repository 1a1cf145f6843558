//! Peer directory queries

use super::{Database, Peer, PeerRecord};
use crate::{SatogramError, SatogramResult};
use tracing::{debug, info};

/// Key namespace of the peer directory
pub const PEER_KEY_PREFIX: &str = "pk ";

/// Storage key of a peer id
pub fn peer_key(peer_id: &str) -> String {
    format!("{}{}", PEER_KEY_PREFIX, peer_id.to_ascii_lowercase())
}

/// Peer id of a storage key, `None` for keys outside the peer namespace
pub fn peer_id_from_key(key: &str) -> Option<&str> {
    key.strip_prefix(PEER_KEY_PREFIX).filter(|id| !id.is_empty())
}

/// Persistent peer directory
#[derive(Clone)]
pub struct PeerStore {
    db: Database,
}

impl PeerStore {
    /// Create a peer store over `db`
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert `peer` unless an entry for its id already exists.
    ///
    /// Existing aliases are never overwritten. Returns whether the peer was
    /// inserted.
    pub async fn upsert_if_absent(&self, peer: &Peer) -> SatogramResult<bool> {
        let key = peer_key(&peer.id);
        let record = PeerRecord::new(peer.alias.clone());

        let inserted = self
            .db
            .modify(&key, |current| match current {
                Some(_) => Ok((None, false)),
                None => Ok((Some(super::encode(&record)?), true)),
            })
            .await?;

        if inserted {
            info!("DB: Added peer: node_id={}, alias={}", peer.id, peer.alias);
        } else {
            debug!("DB: Peer already known: node_id={}", peer.id);
        }

        Ok(inserted)
    }

    /// Look up a peer, `NotFound` if it is not in the directory
    pub async fn get(&self, peer_id: &str) -> SatogramResult<PeerRecord> {
        let bytes = self.db.get(&peer_key(peer_id)).await?;
        Ok(PeerRecord::from_stored(&bytes))
    }

    /// Whether the directory has an entry for `peer_id`
    pub async fn contains(&self, peer_id: &str) -> SatogramResult<bool> {
        match self.db.get(&peer_key(peer_id)).await {
            Ok(_) => Ok(true),
            Err(SatogramError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Snapshot of the storage keys under `prefix`, in key order
    pub async fn list_by_prefix(&self, prefix: &str) -> SatogramResult<Vec<String>> {
        self.db.keys(prefix).await
    }

    /// Snapshot of every peer id in the directory, in key order
    pub async fn peer_ids(&self) -> SatogramResult<Vec<String>> {
        let keys = self.list_by_prefix(PEER_KEY_PREFIX).await?;
        Ok(keys
            .iter()
            .filter_map(|key| peer_id_from_key(key))
            .map(str::to_string)
            .collect())
    }

    /// Every peer with its stored record, in key order
    pub async fn peers(&self) -> SatogramResult<Vec<(String, PeerRecord)>> {
        let mut peers = Vec::new();
        for id in self.peer_ids().await? {
            match self.get(&id).await {
                Ok(record) => peers.push((id, record)),
                // removed between the snapshot and the lookup
                Err(SatogramError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(peers)
    }

    /// Number of peers in the directory
    pub async fn count(&self) -> SatogramResult<usize> {
        self.db.count_prefix(PEER_KEY_PREFIX).await
    }

    /// Remove every peer from the directory
    pub async fn wipe(&self) -> SatogramResult<usize> {
        let removed = self.db.delete_prefix(PEER_KEY_PREFIX).await?;
        info!("DB: Wiped {} peers from the directory", removed);
        Ok(removed)
    }
}
