//! JSON shapes of LND's REST gateway
//!
//! Byte fields travel as base64 and 64-bit integers may be quoted.

use super::{
    GraphNode, HtlcAttempt, KeysendRequest, NodeInfo, PaymentPage, PaymentRecord, PaymentStatus,
    PaymentUpdate, RouteHop,
};
use crate::{SatogramError, SatogramResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};

fn de_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Str(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => Ok(n),
        Raw::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct GetInfoResponse {
    #[serde(default)]
    identity_pubkey: String,
    #[serde(default)]
    alias: String,
    #[serde(default)]
    block_height: u32,
    #[serde(default)]
    synced_to_chain: bool,
}

impl From<GetInfoResponse> for NodeInfo {
    fn from(r: GetInfoResponse) -> Self {
        NodeInfo {
            identity_pubkey: r.identity_pubkey,
            alias: r.alias,
            block_height: r.block_height,
            synced_to_chain: r.synced_to_chain,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct ChannelGraph {
    #[serde(default)]
    nodes: Vec<LightningNode>,
}

#[derive(Debug, Deserialize)]
struct LightningNode {
    pub_key: String,
    #[serde(default)]
    alias: String,
}

impl ChannelGraph {
    pub(super) fn into_nodes(self) -> Vec<GraphNode> {
        self.nodes
            .into_iter()
            .map(|n| GraphNode {
                pub_key: n.pub_key,
                alias: n.alias,
            })
            .collect()
    }
}

/// Body of `POST /v2/router/send`
#[derive(Debug, Serialize)]
pub(super) struct SendPaymentRequest {
    dest: String,
    amt: String,
    payment_hash: String,
    dest_custom_records: BTreeMap<String, String>,
    timeout_seconds: i32,
    fee_limit_sat: String,
    no_inflight_updates: bool,
}

impl From<&KeysendRequest> for SendPaymentRequest {
    fn from(r: &KeysendRequest) -> Self {
        SendPaymentRequest {
            dest: BASE64.encode(r.dest.as_bytes()),
            amt: r.amount_sats.to_string(),
            payment_hash: BASE64.encode(r.payment_hash),
            dest_custom_records: r
                .custom_records
                .iter()
                .map(|(k, v)| (k.to_string(), BASE64.encode(v)))
                .collect(),
            timeout_seconds: r.timeout_seconds,
            fee_limit_sat: r.fee_limit_sat.to_string(),
            no_inflight_updates: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct StreamLine {
    result: Option<Payment>,
    error: Option<StreamError>,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct Payment {
    #[serde(default)]
    status: String,
    #[serde(default)]
    failure_reason: String,
    #[serde(default)]
    htlcs: Vec<Htlc>,
}

#[derive(Debug, Deserialize)]
struct Htlc {
    #[serde(default)]
    status: String,
    route: Option<Route>,
}

#[derive(Debug, Deserialize)]
struct Route {
    #[serde(default)]
    hops: Vec<Hop>,
}

#[derive(Debug, Deserialize)]
struct Hop {
    #[serde(default)]
    pub_key: String,
    #[serde(default)]
    custom_records: HashMap<u64, String>,
}

/// Decode one line of the send-payment stream
pub(super) fn decode_update_line(line: &[u8]) -> SatogramResult<PaymentUpdate> {
    let line: StreamLine = serde_json::from_slice(line)
        .map_err(|e| SatogramError::Stream(format!("undecodable status update: {}", e)))?;

    if let Some(error) = line.error {
        return Err(SatogramError::Stream(format!(
            "node aborted the stream (code {}): {}",
            error.code, error.message
        )));
    }

    let payment = line
        .result
        .ok_or_else(|| SatogramError::Stream("status update without a result".to_string()))?;

    let failure_reason = match payment.failure_reason.as_str() {
        "" | "FAILURE_REASON_NONE" => None,
        reason => Some(reason.to_string()),
    };

    Ok(PaymentUpdate {
        status: PaymentStatus::from_name(&payment.status),
        failure_reason,
    })
}

#[derive(Debug, Deserialize)]
pub(super) struct ListPaymentsResponse {
    #[serde(default)]
    payments: Vec<Payment>,
    #[serde(default, deserialize_with = "de_u64")]
    last_index_offset: u64,
}

impl ListPaymentsResponse {
    pub(super) fn into_page(self) -> PaymentPage {
        let payments = self
            .payments
            .into_iter()
            .map(|p| PaymentRecord {
                htlcs: p
                    .htlcs
                    .into_iter()
                    .map(|h| HtlcAttempt {
                        succeeded: h.status == "SUCCEEDED",
                        hops: h
                            .route
                            .map(|r| r.hops.into_iter().map(hop_from_wire).collect())
                            .unwrap_or_default(),
                    })
                    .collect(),
            })
            .collect();

        PaymentPage {
            payments,
            last_index_offset: self.last_index_offset,
        }
    }
}

fn hop_from_wire(hop: Hop) -> RouteHop {
    RouteHop {
        pub_key: hop.pub_key,
        custom_records: hop
            .custom_records
            .into_iter()
            // records that are not valid base64 cannot be ours
            .filter_map(|(k, v)| BASE64.decode(v).ok().map(|bytes| (k, bytes)))
            .collect(),
    }
}
