//! Reduces a payment's status feed to a terminal outcome

use crate::node::{PaymentStatus, PaymentUpdateStream};
use futures::StreamExt;
use serde::Serialize;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Terminal state of one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TerminalStatus {
    /// The payment settled
    Succeeded,
    /// The payment failed, or never made it to the node
    Failed,
    /// The feed ended without a terminal status
    Unknown,
}

/// Result of one attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentOutcome {
    /// Hex id of the destination
    pub peer_id: String,
    /// Terminal state
    pub status: TerminalStatus,
    /// Why the attempt did not succeed, when known
    pub failure_reason: Option<String>,
}

impl PaymentOutcome {
    /// A settled attempt
    pub fn succeeded(peer_id: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            status: TerminalStatus::Succeeded,
            failure_reason: None,
        }
    }

    /// A failed attempt
    pub fn failed(peer_id: impl Into<String>, reason: Option<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            status: TerminalStatus::Failed,
            failure_reason: reason,
        }
    }

    /// An attempt whose fate is unknown
    pub fn unknown(peer_id: impl Into<String>, reason: Option<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            status: TerminalStatus::Unknown,
            failure_reason: reason,
        }
    }
}

/// Consume `updates` until the payment reaches a terminal status.
///
/// Only IN_FLIGHT keeps the tracker reading. SUCCEEDED and FAILED map to
/// their outcomes; any other status, an error on the feed, or the feed ending
/// yields `Unknown`. The attempt is never retried.
pub async fn track(peer_id: &str, mut updates: PaymentUpdateStream) -> PaymentOutcome {
    while let Some(update) = updates.next().await {
        let update = match update {
            Ok(update) => update,
            Err(e) => {
                warn!("pubkey: {} status stream error: {}", peer_id, e);
                return PaymentOutcome::unknown(peer_id, Some(e.to_string()));
            }
        };

        match update.status {
            PaymentStatus::InFlight => {
                debug!(
                    "pubkey: {} status: IN_FLIGHT failure-reason: {:?}",
                    peer_id, update.failure_reason
                );
            }
            PaymentStatus::Succeeded => {
                info!("pubkey: {} status: SUCCEEDED", peer_id);
                return PaymentOutcome::succeeded(peer_id);
            }
            PaymentStatus::Failed => {
                info!(
                    "pubkey: {} status: FAILED reason: {}",
                    peer_id,
                    update.failure_reason.as_deref().unwrap_or("unspecified")
                );
                return PaymentOutcome::failed(peer_id, update.failure_reason);
            }
            PaymentStatus::Other(name) => {
                warn!("pubkey: {} unexpected status: {}", peer_id, name);
                return PaymentOutcome::unknown(peer_id, Some(format!("unexpected status {}", name)));
            }
        }
    }

    debug!("pubkey: {} status stream ended without a terminal status", peer_id);
    PaymentOutcome::unknown(peer_id, None)
}

/// [`track`], giving up with `Unknown` once `deadline` has passed
pub async fn track_with_deadline(
    peer_id: &str,
    updates: PaymentUpdateStream,
    deadline: Duration,
) -> PaymentOutcome {
    match tokio::time::timeout(deadline, track(peer_id, updates)).await {
        Ok(outcome) => outcome,
        Err(_) => {
            warn!("pubkey: {} no terminal status after {:?}", peer_id, deadline);
            PaymentOutcome::unknown(peer_id, Some(format!("timed out after {:?}", deadline)))
        }
    }
}

/// Aggregate result of one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastRun {
    /// Attempts dispatched
    pub total: usize,
    /// Attempts that settled
    pub succeeded: usize,
    /// Attempts that failed
    pub failed: usize,
    /// Attempts with no terminal status
    pub unknown: usize,
}

impl fmt::Display for BroadcastRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} sent: {} succeeded, {} failed, {} unknown",
            self.total, self.succeeded, self.failed, self.unknown
        )
    }
}

/// Counters shared by the concurrent attempts of a broadcast
#[derive(Debug, Default)]
pub struct RunTally {
    run: Mutex<BroadcastRun>,
}

impl RunTally {
    /// Create an empty tally
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one terminal outcome, returning the totals so far
    pub fn record(&self, outcome: &PaymentOutcome) -> BroadcastRun {
        let mut run = self.run.lock().unwrap_or_else(PoisonError::into_inner);
        run.total += 1;
        match outcome.status {
            TerminalStatus::Succeeded => run.succeeded += 1,
            TerminalStatus::Failed => run.failed += 1,
            TerminalStatus::Unknown => run.unknown += 1,
        }
        *run
    }

    /// Current totals
    pub fn snapshot(&self) -> BroadcastRun {
        *self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::PaymentUpdate;
    use crate::SatogramError;
    use futures::stream;

    fn feed(updates: Vec<crate::SatogramResult<PaymentUpdate>>) -> PaymentUpdateStream {
        stream::iter(updates).boxed()
    }

    #[tokio::test]
    async fn test_in_flight_then_succeeded() {
        let outcome = track(
            "a",
            feed(vec![
                Ok(PaymentUpdate::new(PaymentStatus::InFlight)),
                Ok(PaymentUpdate::new(PaymentStatus::InFlight)),
                Ok(PaymentUpdate::new(PaymentStatus::Succeeded)),
            ]),
        )
        .await;
        assert_eq!(outcome, PaymentOutcome::succeeded("a"));
    }

    #[tokio::test]
    async fn test_failed_keeps_reason() {
        let outcome = track(
            "c",
            feed(vec![
                Ok(PaymentUpdate::new(PaymentStatus::InFlight)),
                Ok(PaymentUpdate::failed("no_route")),
            ]),
        )
        .await;
        assert_eq!(outcome.status, TerminalStatus::Failed);
        assert_eq!(outcome.failure_reason.as_deref(), Some("no_route"));
    }

    #[tokio::test]
    async fn test_empty_stream_is_unknown_not_failed() {
        let outcome = track("d", feed(vec![])).await;
        assert_eq!(outcome, PaymentOutcome::unknown("d", None));
    }

    #[tokio::test]
    async fn test_stream_error_is_unknown_with_reason() {
        let outcome = track(
            "e",
            feed(vec![
                Ok(PaymentUpdate::new(PaymentStatus::InFlight)),
                Err(SatogramError::Stream("connection reset".to_string())),
                Ok(PaymentUpdate::new(PaymentStatus::Succeeded)),
            ]),
        )
        .await;
        assert_eq!(outcome.status, TerminalStatus::Unknown);
        assert!(outcome.failure_reason.unwrap().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_unrecognized_status_terminates_as_unknown() {
        let outcome = track(
            "f",
            feed(vec![
                Ok(PaymentUpdate::new(PaymentStatus::Other("UNKNOWN".to_string()))),
                Ok(PaymentUpdate::new(PaymentStatus::Succeeded)),
            ]),
        )
        .await;
        assert_eq!(outcome.status, TerminalStatus::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_turns_stall_into_unknown() {
        let outcome = track_with_deadline(
            "g",
            stream::pending().boxed(),
            Duration::from_secs(90),
        )
        .await;
        assert_eq!(outcome.status, TerminalStatus::Unknown);
        assert!(outcome.failure_reason.unwrap().contains("timed out"));
    }

    #[test]
    fn test_tally_counts_every_outcome_once() {
        let tally = RunTally::new();
        tally.record(&PaymentOutcome::succeeded("a"));
        tally.record(&PaymentOutcome::failed("b", None));
        tally.record(&PaymentOutcome::unknown("c", None));
        let run = tally.record(&PaymentOutcome::succeeded("d"));

        assert_eq!(
            run,
            BroadcastRun {
                total: 4,
                succeeded: 2,
                failed: 1,
                unknown: 1
            }
        );
        assert_eq!(tally.snapshot(), run);
        assert_eq!(run.to_string(), "4 sent: 2 succeeded, 1 failed, 1 unknown");
    }
}
