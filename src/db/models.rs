//! Database models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Value stored for each peer in the directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    /// Node alias as announced in the graph
    pub alias: String,
    /// When the peer was first added to the directory.
    /// Absent for entries written as a bare alias.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_seen: Option<DateTime<Utc>>,
}

impl PeerRecord {
    /// A record for a peer observed right now
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            first_seen: Some(Utc::now()),
        }
    }

    /// Decode a stored value.
    ///
    /// Older directories stored the alias as raw UTF-8, so anything that is
    /// not a JSON record is read back as a bare alias.
    pub fn from_stored(bytes: &[u8]) -> Self {
        super::decode(bytes).unwrap_or_else(|_| Self {
            alias: String::from_utf8_lossy(bytes).into_owned(),
            first_seen: None,
        })
    }
}

/// A peer of the directory, identified by its hex-encoded node id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    /// Lowercase hex of the 33-byte node public key
    pub id: String,
    /// Informational display name
    pub alias: String,
}

impl Peer {
    /// Create a peer entry
    pub fn new(id: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            alias: alias.into(),
        }
    }
}
