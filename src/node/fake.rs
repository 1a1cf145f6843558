//! Scripted in-memory node for tests

use super::{
    GraphNode, KeysendRequest, NodeInfo, PaymentNode, PaymentPage, PaymentStatus, PaymentUpdate,
    PaymentUpdateStream,
};
use crate::{SatogramError, SatogramResult};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the fake node answers to a keysend towards one peer
#[derive(Debug, Clone)]
pub enum SendScript {
    /// Accept the payment and stream these events, then end the stream
    Updates(Vec<SatogramResult<PaymentUpdate>>),
    /// Reject the RPC outright
    Reject(String),
    /// Accept the payment and never report anything
    Hang,
    /// Accept the payment and settle it after a delay, counted as in flight
    /// until then
    SettleAfter(Duration),
}

#[derive(Default)]
pub struct FakeNode {
    pub identity_pubkey: String,
    pub graph: Vec<GraphNode>,
    pub fail_graph: bool,
    pub scripts: HashMap<String, SendScript>,
    pub payment_pages: Vec<PaymentPage>,
    /// `list_payments` fails from this offset on
    pub fail_payments_at: Option<u64>,
    pub sent: Mutex<Vec<KeysendRequest>>,
    pub in_flight: Arc<AtomicUsize>,
    pub peak_in_flight: Arc<AtomicUsize>,
}

impl FakeNode {
    pub fn new(identity_pubkey: impl Into<String>) -> Self {
        Self {
            identity_pubkey: identity_pubkey.into(),
            ..Default::default()
        }
    }

    pub fn with_graph_node(mut self, pub_key: &str, alias: &str) -> Self {
        self.graph.push(GraphNode {
            pub_key: pub_key.to_string(),
            alias: alias.to_string(),
        });
        self
    }

    pub fn with_script(mut self, pub_key: &str, script: SendScript) -> Self {
        self.scripts.insert(pub_key.to_string(), script);
        self
    }

    /// Hex destinations of every keysend submitted so far
    pub fn sent_to(&self) -> Vec<String> {
        let sent = self.sent.lock().unwrap();
        sent.iter().map(|r| r.dest.to_hex()).collect()
    }
}

/// Counts one payment as in flight until dropped
struct InFlightGuard {
    in_flight: Arc<AtomicUsize>,
}

impl InFlightGuard {
    fn enter(in_flight: Arc<AtomicUsize>, peak: &AtomicUsize) -> Self {
        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { in_flight }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A syntactically valid peer id derived from one byte
pub fn peer_hex(tag: u8) -> String {
    format!("02{}", hex::encode([tag; 32]))
}

#[async_trait]
impl PaymentNode for FakeNode {
    async fn get_info(&self) -> SatogramResult<NodeInfo> {
        Ok(NodeInfo {
            identity_pubkey: self.identity_pubkey.clone(),
            alias: "fake".to_string(),
            block_height: 800_000,
            synced_to_chain: true,
        })
    }

    async fn describe_graph(&self) -> SatogramResult<Vec<GraphNode>> {
        if self.fail_graph {
            return Err(SatogramError::Transport("graph unavailable".to_string()));
        }
        Ok(self.graph.clone())
    }

    async fn send_keysend(&self, request: KeysendRequest) -> SatogramResult<PaymentUpdateStream> {
        let dest = request.dest.to_hex();
        self.sent.lock().unwrap().push(request);

        match self.scripts.get(&dest).cloned() {
            Some(SendScript::Updates(updates)) => Ok(stream::iter(updates).boxed()),
            Some(SendScript::Reject(reason)) => Err(SatogramError::Transport(reason)),
            Some(SendScript::Hang) => Ok(stream::pending().boxed()),
            Some(SendScript::SettleAfter(delay)) => {
                let guard = InFlightGuard::enter(self.in_flight.clone(), &self.peak_in_flight);
                Ok(stream::once(async move {
                    tokio::time::sleep(delay).await;
                    drop(guard);
                    Ok(PaymentUpdate::new(PaymentStatus::Succeeded))
                })
                .boxed())
            }
            None => Ok(stream::empty().boxed()),
        }
    }

    async fn list_payments(&self, index_offset: u64, _max_payments: u64) -> SatogramResult<PaymentPage> {
        if self.fail_payments_at.is_some_and(|at| index_offset >= at) {
            return Err(SatogramError::Transport("ListPayments rpc error".to_string()));
        }
        Ok(self
            .payment_pages
            .get(index_offset as usize)
            .cloned()
            .unwrap_or_default())
    }
}
