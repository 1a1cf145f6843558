//! Broadcast dispatcher
//!
//! Turns the peer directory into one keysend attempt per eligible peer:
//! - peers are snapshotted from the store and filtered by the exclusion set
//! - attempts launch in key order, staggered, with a cap on how many are in
//!   flight at once
//! - each attempt's status feed is reduced to a terminal outcome and counted
//!
//! A failing peer never aborts the run; only failing to read the directory
//! does.

use crate::{
    config::BroadcastConfig,
    db::PeerStore,
    directory::ExclusionSet,
    node::PaymentNode,
    SatogramResult,
};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub mod payment;
pub mod tracker;

pub use payment::{PaymentAttempt, PaymentBuilder, MESSAGE_RECORD_KEY, PREIMAGE_RECORD_KEY};
pub use tracker::{BroadcastRun, PaymentOutcome, RunTally, TerminalStatus};

/// Extra time granted beyond an attempt's own timeout before the tracker
/// gives up on its status feed
pub const TRACKER_GRACE: Duration = Duration::from_secs(30);

/// Throttling of a broadcast
#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    /// Delay between successive launches
    pub stagger: Duration,
    /// Maximum number of attempts in flight at once
    pub max_in_flight: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            stagger: Duration::from_millis(50),
            max_in_flight: 64,
        }
    }
}

impl From<&BroadcastConfig> for DispatchSettings {
    fn from(config: &BroadcastConfig) -> Self {
        Self {
            stagger: Duration::from_millis(config.stagger_ms),
            max_in_flight: config.max_in_flight.max(1),
        }
    }
}

/// Fans a keysend out to every eligible peer of the directory
pub struct Dispatcher {
    /// Node handle shared by every attempt
    node: Arc<dyn PaymentNode>,
    /// Peer directory
    peers: PeerStore,
    /// Peers that are never paid
    exclusions: Arc<ExclusionSet>,
    /// Attempt construction
    builder: PaymentBuilder,
    /// Throttling
    settings: DispatchSettings,
}

impl Dispatcher {
    /// Create a dispatcher
    pub fn new(
        node: Arc<dyn PaymentNode>,
        peers: PeerStore,
        exclusions: Arc<ExclusionSet>,
        builder: PaymentBuilder,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            node,
            peers,
            exclusions,
            builder,
            settings,
        }
    }

    /// Create a dispatcher configured from the `[broadcast]` section
    pub fn from_config(
        config: &BroadcastConfig,
        node: Arc<dyn PaymentNode>,
        peers: PeerStore,
        exclusions: Arc<ExclusionSet>,
    ) -> Self {
        Self::new(
            node,
            peers,
            exclusions,
            PaymentBuilder::new(config.fee_limit_sat, config.timeout_seconds),
            DispatchSettings::from(config),
        )
    }

    /// Peer ids that a broadcast would pay, in launch order
    pub async fn eligible_peers(&self) -> SatogramResult<Vec<String>> {
        let ids = self.peers.peer_ids().await?;
        let total = ids.len();

        let eligible: Vec<String> = ids
            .into_iter()
            .filter(|id| !self.exclusions.contains(id))
            .collect();

        if eligible.len() < total {
            info!("Excluding {} of {} stored peers", total - eligible.len(), total);
        }

        Ok(eligible)
    }

    /// Send `amount_sats` with `message` to every eligible peer.
    ///
    /// `cancel` is checked before each launch; once it fires the remaining
    /// peers are skipped and the attempts already launched run to their own
    /// terminal outcome. Returns once every launched attempt has finished.
    pub async fn dispatch(
        &self,
        cancel: &CancellationToken,
        amount_sats: i64,
        message: &[u8],
    ) -> SatogramResult<BroadcastRun> {
        let peers = self.eligible_peers().await?;
        let num_peers = peers.len();
        info!(
            "number of nodes sending to: {} ({} sats each, at most {} in flight)",
            num_peers, amount_sats, self.settings.max_in_flight
        );

        let tally = Arc::new(RunTally::new());
        let permits = Arc::new(Semaphore::new(self.settings.max_in_flight.max(1)));
        let message: Arc<[u8]> = Arc::from(message);
        let deadline = Duration::from_secs(self.builder.timeout_seconds().max(0) as u64) + TRACKER_GRACE;

        let mut units = JoinSet::new();

        for (index, peer_id) in peers.into_iter().enumerate() {
            if cancel.is_cancelled() {
                info!("Broadcast cancelled, skipping the remaining {} peers", num_peers - index);
                break;
            }

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Broadcast cancelled, skipping the remaining {} peers", num_peers - index);
                    break;
                }
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            debug!("on item #{} of {}. pubkey: {}", index + 1, num_peers, peer_id);

            let unit = AttemptUnit {
                node: self.node.clone(),
                builder: self.builder,
                cancel: cancel.clone(),
                message: message.clone(),
                amount_sats,
                deadline,
            };
            let tally = tally.clone();

            units.spawn(async move {
                let _permit = permit;
                let outcome = match AssertUnwindSafe(unit.run(&peer_id)).catch_unwind().await {
                    Ok(Some(outcome)) => outcome,
                    Ok(None) => return,
                    Err(_) => {
                        error!("pubkey: {} attempt panicked", peer_id);
                        PaymentOutcome::unknown(&peer_id, Some("attempt panicked".to_string()))
                    }
                };
                let so_far = tally.record(&outcome);
                debug!("finished counter: {} of {} peers", so_far.total, num_peers);
            });

            if index + 1 < num_peers && !self.settings.stagger.is_zero() {
                tokio::time::sleep(self.settings.stagger).await;
            }
        }

        while let Some(joined) = units.join_next().await {
            if let Err(e) = joined {
                error!("Attempt task did not complete: {}", e);
            }
        }

        let run = tally.snapshot();
        info!("Broadcast finished: {}", run);
        Ok(run)
    }
}

/// Everything one attempt needs, owned so it can move into its task
struct AttemptUnit {
    node: Arc<dyn PaymentNode>,
    builder: PaymentBuilder,
    cancel: CancellationToken,
    message: Arc<[u8]>,
    amount_sats: i64,
    deadline: Duration,
}

impl AttemptUnit {
    /// Build, submit and track one attempt. `None` if the run was cancelled
    /// before anything was sent.
    async fn run(&self, peer_id: &str) -> Option<PaymentOutcome> {
        if self.cancel.is_cancelled() {
            debug!("pubkey: {} skipped, broadcast cancelled", peer_id);
            return None;
        }

        let attempt = match self.builder.build(peer_id, self.amount_sats, &self.message) {
            Ok(attempt) => attempt,
            Err(e) => {
                warn!("pubkey: {} could not build payment: {}", peer_id, e);
                return Some(PaymentOutcome::failed(peer_id, Some(e.to_string())));
            }
        };

        debug!("Attempting keysend to: {}", peer_id);
        let updates = match self.node.send_keysend(attempt.into_request()).await {
            Ok(updates) => updates,
            Err(e) => {
                warn!("pubkey: {} keysend rejected: {}", peer_id, e);
                return Some(PaymentOutcome::failed(peer_id, Some(e.to_string())));
            }
        };

        Some(tracker::track_with_deadline(peer_id, updates, self.deadline).await)
    }
}
