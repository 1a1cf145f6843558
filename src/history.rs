//! Peers already reached by an earlier broadcast

use crate::{broadcast::MESSAGE_RECORD_KEY, node::PaymentNode};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Payments fetched per `list_payments` call
pub const PAYMENTS_PAGE_SIZE: u64 = 100;

/// Hex ids of every peer that received a message keysend that settled.
///
/// Walks the node's payment history page by page until an empty page. Only
/// succeeded HTLCs whose final hop carries the message record count. A page
/// that cannot be fetched ends the walk with the peers collected so far.
pub async fn paid_peers(node: &dyn PaymentNode) -> HashSet<String> {
    let mut paid = HashSet::new();
    let mut index_offset = 0;
    let mut scanned = 0usize;

    loop {
        let page = match node.list_payments(index_offset, PAYMENTS_PAGE_SIZE).await {
            Ok(page) => page,
            Err(e) => {
                warn!(
                    "Failed to list payments from offset {}: {}. Using {} peers found so far",
                    index_offset,
                    e,
                    paid.len()
                );
                break;
            }
        };
        if page.payments.is_empty() {
            break;
        }
        scanned += page.payments.len();

        for htlc in page.payments.iter().flat_map(|p| &p.htlcs) {
            if !htlc.succeeded {
                continue;
            }
            if let Some(last) = htlc.hops.last() {
                if last.custom_records.contains_key(&MESSAGE_RECORD_KEY) {
                    paid.insert(last.pub_key.to_ascii_lowercase());
                }
            }
        }

        debug!("Scanned {} payments so far", scanned);
        if page.last_index_offset <= index_offset {
            break;
        }
        index_offset = page.last_index_offset;
    }

    info!("{} peers already paid in {} past payments", paid.len(), scanned);
    paid
}
