//! Keysend payment construction
//!
//! Every attempt gets a fresh random preimage; the payment hash is its
//! SHA-256. Both the preimage and the message ride in custom records, so a
//! receiving node that settles the payment has proven it got the message.

use crate::node::{KeysendRequest, PeerId};
use crate::{SatogramError, SatogramResult};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Custom record carrying the preimage (the keysend record)
pub const PREIMAGE_RECORD_KEY: u64 = 5_482_373_484;

/// Custom record carrying the message payload
pub const MESSAGE_RECORD_KEY: u64 = 34_349_334;

/// Default routing fee ceiling per attempt (satoshis)
pub const DEFAULT_FEE_LIMIT_SAT: i64 = 20;

/// Default time the node may spend on one attempt
pub const DEFAULT_TIMEOUT_SECONDS: i32 = 60;

/// A single-use keysend attempt towards one peer
#[derive(Debug, Clone)]
pub struct PaymentAttempt {
    /// Destination
    pub peer_id: PeerId,
    /// Amount in satoshis
    pub amount_sats: i64,
    /// Message payload
    pub message: Vec<u8>,
    /// Random preimage, never reused
    pub preimage: [u8; 32],
    /// SHA-256 of `preimage`
    pub payment_hash: [u8; 32],
    /// Routing fee ceiling in satoshis
    pub fee_limit_sat: i64,
    /// Time the node may spend on the payment
    pub timeout_seconds: i32,
}

impl PaymentAttempt {
    /// Shape the keysend request submitted to the node
    pub fn into_request(self) -> KeysendRequest {
        let mut custom_records = BTreeMap::new();
        custom_records.insert(PREIMAGE_RECORD_KEY, self.preimage.to_vec());
        custom_records.insert(MESSAGE_RECORD_KEY, self.message);

        KeysendRequest {
            dest: self.peer_id,
            amount_sats: self.amount_sats,
            payment_hash: self.payment_hash,
            fee_limit_sat: self.fee_limit_sat,
            timeout_seconds: self.timeout_seconds,
            custom_records,
        }
    }
}

/// Builds payment attempts with fixed fee and timeout bounds
#[derive(Debug, Clone, Copy)]
pub struct PaymentBuilder {
    fee_limit_sat: i64,
    timeout_seconds: i32,
}

impl Default for PaymentBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_FEE_LIMIT_SAT, DEFAULT_TIMEOUT_SECONDS)
    }
}

impl PaymentBuilder {
    /// Create a builder with the given per-attempt bounds
    pub fn new(fee_limit_sat: i64, timeout_seconds: i32) -> Self {
        Self {
            fee_limit_sat,
            timeout_seconds,
        }
    }

    /// Time the node may spend on each attempt
    pub fn timeout_seconds(&self) -> i32 {
        self.timeout_seconds
    }

    /// Build an attempt for `peer_id` using the OS random source
    pub fn build(&self, peer_id: &str, amount_sats: i64, message: &[u8]) -> SatogramResult<PaymentAttempt> {
        self.build_with_rng(&mut OsRng, peer_id, amount_sats, message)
    }

    /// Build an attempt drawing the preimage from `rng`
    pub fn build_with_rng<R: RngCore>(
        &self,
        rng: &mut R,
        peer_id: &str,
        amount_sats: i64,
        message: &[u8],
    ) -> SatogramResult<PaymentAttempt> {
        let peer_id: PeerId = peer_id.parse()?;

        let mut preimage = [0u8; 32];
        rng.try_fill_bytes(&mut preimage)
            .map_err(|e| SatogramError::Randomness(e.to_string()))?;

        let payment_hash: [u8; 32] = Sha256::digest(preimage).into();

        Ok(PaymentAttempt {
            peer_id,
            amount_sats,
            message: message.to_vec(),
            preimage,
            payment_hash,
            fee_limit_sat: self.fee_limit_sat,
            timeout_seconds: self.timeout_seconds,
        })
    }
}
