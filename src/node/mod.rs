//! Lightning node integration module
//!
//! [`PaymentNode`] is the seam between the broadcaster and the remote node:
//! graph discovery, keysend submission with a streamed status feed, and the
//! payment history. [`LndClient`] implements it over LND's REST gateway.

use crate::{SatogramError, SatogramResult};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

mod client;
mod wire;

#[cfg(test)]
pub(crate) mod fake;

pub use client::LndClient;

/// Length of a compressed secp256k1 public key
pub const PEER_ID_LEN: usize = 33;

/// Operations the broadcaster needs from a Lightning node.
///
/// Implementations are shared by every concurrent attempt of a broadcast and
/// must tolerate concurrent calls.
#[async_trait]
pub trait PaymentNode: Send + Sync {
    /// Identity and sync state of the node
    async fn get_info(&self) -> SatogramResult<NodeInfo>;

    /// Every node of the channel graph, unannounced ones included
    async fn describe_graph(&self) -> SatogramResult<Vec<GraphNode>>;

    /// Submit a keysend payment and return its status feed
    async fn send_keysend(&self, request: KeysendRequest) -> SatogramResult<PaymentUpdateStream>;

    /// One page of completed outgoing payments starting after `index_offset`
    async fn list_payments(&self, index_offset: u64, max_payments: u64)
        -> SatogramResult<PaymentPage>;
}

/// Node information
#[derive(Debug, Clone)]
pub struct NodeInfo {
    /// Hex public key of the node
    pub identity_pubkey: String,
    /// Node alias
    pub alias: String,
    /// Current block height
    pub block_height: u32,
    /// Whether the node is synced to the chain
    pub synced_to_chain: bool,
}

/// A node of the channel graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNode {
    /// Hex public key
    pub pub_key: String,
    /// Announced alias
    pub alias: String,
}

/// Compressed public key identifying a network participant
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId([u8; PEER_ID_LEN]);

impl PeerId {
    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; PEER_ID_LEN] {
        &self.0
    }

    /// Lowercase hex encoding
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for PeerId {
    type Err = SatogramError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| SatogramError::MalformedPeerId(format!("{}: {}", s, e)))?;
        let bytes: [u8; PEER_ID_LEN] = bytes.try_into().map_err(|b: Vec<u8>| {
            SatogramError::MalformedPeerId(format!(
                "{}: expected {} bytes, got {}",
                s,
                PEER_ID_LEN,
                b.len()
            ))
        })?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.to_hex())
    }
}

/// A keysend payment as submitted to the node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeysendRequest {
    /// Destination node
    pub dest: PeerId,
    /// Amount in satoshis
    pub amount_sats: i64,
    /// SHA-256 of the preimage carried in the custom records
    pub payment_hash: [u8; 32],
    /// Routing fee ceiling in satoshis
    pub fee_limit_sat: i64,
    /// Time the node may spend on the payment
    pub timeout_seconds: i32,
    /// Application data attached to the final hop
    pub custom_records: BTreeMap<u64, Vec<u8>>,
}

/// Status reported on a payment's status feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentStatus {
    /// The payment is still being routed
    InFlight,
    /// The payment settled
    Succeeded,
    /// The payment failed permanently
    Failed,
    /// Any other status the node reports
    Other(String),
}

impl PaymentStatus {
    /// Map a status name as reported by the node
    pub fn from_name(name: &str) -> Self {
        match name {
            "IN_FLIGHT" => PaymentStatus::InFlight,
            "SUCCEEDED" => PaymentStatus::Succeeded,
            "FAILED" => PaymentStatus::Failed,
            other => PaymentStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentStatus::InFlight => write!(f, "IN_FLIGHT"),
            PaymentStatus::Succeeded => write!(f, "SUCCEEDED"),
            PaymentStatus::Failed => write!(f, "FAILED"),
            PaymentStatus::Other(name) => write!(f, "{}", name),
        }
    }
}

/// One event of a payment's status feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentUpdate {
    /// Reported status
    pub status: PaymentStatus,
    /// Failure reason, when the node gives one
    pub failure_reason: Option<String>,
}

impl PaymentUpdate {
    /// An update without a failure reason
    pub fn new(status: PaymentStatus) -> Self {
        Self {
            status,
            failure_reason: None,
        }
    }

    /// A FAILED update with `reason`
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: PaymentStatus::Failed,
            failure_reason: Some(reason.into()),
        }
    }
}

/// Server-streamed status events of one payment
pub type PaymentUpdateStream = BoxStream<'static, SatogramResult<PaymentUpdate>>;

/// A page of the payment history
#[derive(Debug, Clone, Default)]
pub struct PaymentPage {
    /// Payments of this page
    pub payments: Vec<PaymentRecord>,
    /// Offset to resume from for the next page
    pub last_index_offset: u64,
}

/// An outgoing payment from the history
#[derive(Debug, Clone, Default)]
pub struct PaymentRecord {
    /// HTLC attempts made for the payment
    pub htlcs: Vec<HtlcAttempt>,
}

/// One HTLC attempt of a payment
#[derive(Debug, Clone, Default)]
pub struct HtlcAttempt {
    /// Whether the attempt settled
    pub succeeded: bool,
    /// Hops of the attempt's route, destination last
    pub hops: Vec<RouteHop>,
}

/// A hop of a payment route
#[derive(Debug, Clone, Default)]
pub struct RouteHop {
    /// Hex public key of the hop
    pub pub_key: String,
    /// Custom records delivered to the hop
    pub custom_records: HashMap<u64, Vec<u8>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_parses_compressed_key() {
        let hex_id = format!("02{}", "ab".repeat(32));
        let id: PeerId = hex_id.parse().unwrap();
        assert_eq!(id.to_hex(), hex_id);
        assert_eq!(id.as_bytes()[0], 0x02);
    }

    #[test]
    fn test_peer_id_rejects_bad_input() {
        assert!(matches!(
            "zz".parse::<PeerId>(),
            Err(SatogramError::MalformedPeerId(_))
        ));
        assert!(matches!(
            "02abcd".parse::<PeerId>(),
            Err(SatogramError::MalformedPeerId(_))
        ));
    }

    #[test]
    fn test_status_names() {
        assert_eq!(PaymentStatus::from_name("IN_FLIGHT"), PaymentStatus::InFlight);
        assert_eq!(PaymentStatus::from_name("SUCCEEDED"), PaymentStatus::Succeeded);
        assert_eq!(PaymentStatus::from_name("FAILED"), PaymentStatus::Failed);
        assert_eq!(
            PaymentStatus::from_name("INITIATED"),
            PaymentStatus::Other("INITIATED".to_string())
        );
        assert_eq!(PaymentStatus::Other("UNKNOWN".into()).to_string(), "UNKNOWN");
    }
}
