//! Satogram: broadcast a keysend message to every node of the Lightning graph
//!
//! The crate keeps a persistent directory of network participants and sends
//! each of them a small spontaneous payment carrying a text message.
//!
//! - **Directory**: peers discovered from the node's channel graph are kept in
//!   an SQLite-backed key-value store and never overwritten
//! - **Payments**: every attempt gets a fresh preimage and carries it, along
//!   with the message, in custom TLV records
//! - **Dispatch**: attempts are staggered, bounded in number, cancellable and
//!   reduced to a terminal outcome each
//!
//! # Architecture
//!
//! 1. [`node::LndClient`] talks to an LND node over its REST gateway
//! 2. [`directory::refresh`] grows the [`db::PeerStore`] from the graph
//! 3. [`broadcast::Dispatcher`] pays every eligible stored peer
//!
#![warn(missing_docs)]

pub mod broadcast;
pub mod config;
pub mod db;
pub mod directory;
pub mod history;
pub mod node;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use broadcast::{BroadcastRun, Dispatcher};
pub use config::Config;
use db::{Database, PeerRecord, PeerStore};
use directory::{ExclusionSet, RefreshReport};
use node::{LndClient, NodeInfo, PaymentNode};

/// Application state shared by the CLI commands
#[derive(Clone)]
pub struct Satogram {
    /// Application configuration
    pub config: Arc<Config>,
    /// Database connection
    pub db: Database,
    /// Peer directory
    pub peers: PeerStore,
    /// Connected node, set by [`Satogram::connect`]
    node: Option<Arc<dyn PaymentNode>>,
}

impl Satogram {
    /// Open the database. No node connection is made yet.
    pub async fn new(config: Config) -> SatogramResult<Self> {
        info!("Initializing satogram...");

        let config = Arc::new(config);
        let db = Database::connect(&config.database.path.to_string_lossy()).await?;
        let peers = PeerStore::new(db.clone());

        Ok(Self {
            config,
            db,
            peers,
            node: None,
        })
    }

    /// Connect to the configured LND node.
    ///
    /// Fails if the node does not answer, in which case nothing else should
    /// be attempted.
    pub async fn connect(&mut self) -> SatogramResult<NodeInfo> {
        let client = LndClient::connect(&self.config.node).await?;
        let info = match client.ping().await {
            Ok(info) => info,
            Err(e) => {
                error!("Could not reach node at {}: {}", self.config.node.host, e);
                return Err(e);
            }
        };

        if !info.synced_to_chain {
            info!("Node {} is not synced to chain yet", info.identity_pubkey);
        }

        self.node = Some(Arc::new(client));
        Ok(info)
    }

    /// Use an already connected node
    pub fn with_node(mut self, node: Arc<dyn PaymentNode>) -> Self {
        self.node = Some(node);
        self
    }

    fn node(&self) -> SatogramResult<Arc<dyn PaymentNode>> {
        self.node
            .clone()
            .ok_or_else(|| SatogramError::Transport("Not connected to a node".to_string()))
    }

    async fn load_exclusions(&self) -> SatogramResult<ExclusionSet> {
        ExclusionSet::load(&self.config.broadcast.exclude_pubkeys_path).await
    }

    /// Add newly discovered graph nodes to the directory
    pub async fn refresh_directory(&self) -> SatogramResult<RefreshReport> {
        let node = self.node()?;
        let exclusions = self.load_exclusions().await?;
        directory::refresh(node.as_ref(), &self.peers, &exclusions).await
    }

    /// Send the configured message to every eligible peer of the directory
    pub async fn broadcast(&self, cancel: &CancellationToken) -> SatogramResult<BroadcastRun> {
        let node = self.node()?;
        let settings = &self.config.broadcast;

        let mut exclusions = self.load_exclusions().await?;
        if settings.exclude_paid_peers {
            let paid = history::paid_peers(node.as_ref()).await;
            exclusions = exclusions.with_additional(paid);
        }

        let dispatcher = Dispatcher::from_config(settings, node, self.peers.clone(), Arc::new(exclusions));
        dispatcher
            .dispatch(cancel, settings.amount_sats, settings.message.as_bytes())
            .await
    }

    /// Every stored peer with its record, in id order
    pub async fn list_peers(&self) -> SatogramResult<Vec<(String, PeerRecord)>> {
        self.peers.peers().await
    }

    /// Remove every peer from the directory
    pub async fn wipe(&self) -> SatogramResult<usize> {
        let removed = self.peers.wipe().await?;
        info!("Removed {} peers from the directory", removed);
        Ok(removed)
    }

    /// Release the database
    pub async fn shutdown(&self) {
        info!("Shutting down satogram...");
        self.db.close().await;
    }
}

/// Error types for satogram
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SatogramError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage backend error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Key absent from the store
    #[error("Not found: {0}")]
    NotFound(String),

    /// Stored value could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(String),

    /// The random source failed
    #[error("Randomness error: {0}")]
    Randomness(String),

    /// A peer id that is not a 33-byte hex public key
    #[error("Malformed peer id: {0}")]
    MalformedPeerId(String),

    /// Node request failed or was rejected
    #[error("Transport error: {0}")]
    Transport(String),

    /// A payment status feed broke
    #[error("Stream error: {0}")]
    Stream(String),
}

impl SatogramError {
    /// Whether this is a missing-key error
    pub fn is_not_found(&self) -> bool {
        matches!(self, SatogramError::NotFound(_))
    }
}

/// Result type alias for satogram operations
pub type SatogramResult<T> = std::result::Result<T, SatogramError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Peer;
    use crate::node::fake::{peer_hex, FakeNode, SendScript};
    use crate::node::{HtlcAttempt, PaymentPage, PaymentRecord, PaymentStatus, PaymentUpdate, RouteHop};
    use std::collections::HashMap;

    async fn app(dir: &tempfile::TempDir) -> Satogram {
        let mut config = Config::default();
        config.database.path = ":memory:".into();
        config.broadcast.exclude_pubkeys_path = dir.path().join("exclude-pubkeys.txt");
        config.broadcast.stagger_ms = 0;
        Satogram::new(config).await.unwrap()
    }

    fn settles() -> SendScript {
        SendScript::Updates(vec![Ok(PaymentUpdate::new(PaymentStatus::Succeeded))])
    }

    #[tokio::test]
    async fn test_commands_need_a_node() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir).await;

        let err = app.broadcast(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SatogramError::Transport(_)));
        assert!(app.refresh_directory().await.is_err());
        assert!(app.list_peers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_then_broadcast_honours_exclusion_file() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = (peer_hex(1), peer_hex(2));
        std::fs::write(dir.path().join("exclude-pubkeys.txt"), format!("{}\n", b)).unwrap();

        let node = Arc::new(
            FakeNode::new(peer_hex(0xff))
                .with_graph_node(&a, "alice")
                .with_graph_node(&b, "bob")
                .with_script(&a, settles()),
        );
        let app = app(&dir).await.with_node(node.clone());

        let report = app.refresh_directory().await.unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.excluded, 1);

        let run = app.broadcast(&CancellationToken::new()).await.unwrap();
        assert_eq!(run.total, 1);
        assert_eq!(run.succeeded, 1);
        assert_eq!(node.sent_to(), vec![a]);
    }

    #[tokio::test]
    async fn test_paid_peers_are_skipped_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = (peer_hex(1), peer_hex(2));

        let mut node = FakeNode::new(peer_hex(0xff)).with_script(&b, settles());
        node.payment_pages = vec![PaymentPage {
            payments: vec![PaymentRecord {
                htlcs: vec![HtlcAttempt {
                    succeeded: true,
                    hops: vec![RouteHop {
                        pub_key: a.clone(),
                        custom_records: HashMap::from([(broadcast::MESSAGE_RECORD_KEY, b"gm".to_vec())]),
                    }],
                }],
            }],
            last_index_offset: 1,
        }];
        let node = Arc::new(node);

        let mut app = app(&dir).await;
        Arc::make_mut(&mut app.config).broadcast.exclude_paid_peers = true;
        let app = app.with_node(node.clone());
        for id in [&a, &b] {
            app.peers.upsert_if_absent(&Peer::new(id.clone(), "x")).await.unwrap();
        }

        let run = app.broadcast(&CancellationToken::new()).await.unwrap();
        assert_eq!(run.total, 1);
        assert_eq!(node.sent_to(), vec![b]);
    }

    #[tokio::test]
    async fn test_unreadable_history_does_not_abort_broadcast() {
        let dir = tempfile::tempdir().unwrap();
        let a = peer_hex(1);

        let mut node = FakeNode::new(peer_hex(0xff)).with_script(&a, settles());
        node.fail_payments_at = Some(0);
        let node = Arc::new(node);

        let mut app = app(&dir).await;
        Arc::make_mut(&mut app.config).broadcast.exclude_paid_peers = true;
        let app = app.with_node(node.clone());
        app.peers.upsert_if_absent(&Peer::new(a.clone(), "x")).await.unwrap();

        let run = app.broadcast(&CancellationToken::new()).await.unwrap();
        assert_eq!(run.total, 1);
        assert_eq!(run.succeeded, 1);
        assert_eq!(node.sent_to(), vec![a]);
    }

    #[tokio::test]
    async fn test_wipe_clears_directory() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir).await;
        app.peers.upsert_if_absent(&Peer::new(peer_hex(1), "x")).await.unwrap();

        assert_eq!(app.wipe().await.unwrap(), 1);
        assert!(app.list_peers().await.unwrap().is_empty());
        app.shutdown().await;
    }

    #[test]
    fn test_error_helpers() {
        assert!(SatogramError::NotFound("pk 01".to_string()).is_not_found());
        assert!(!SatogramError::Storage("disk".to_string()).is_not_found());
        assert_eq!(
            SatogramError::MalformedPeerId("zz".to_string()).to_string(),
            "Malformed peer id: zz"
        );
    }
}
