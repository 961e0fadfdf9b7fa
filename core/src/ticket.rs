//! Ticket records and their lifecycle states

use crate::hash::Hash256;
use crate::network::Network;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Confirmations required before a purchase or fee transaction is final
pub const REQUIRED_CONFIRMATIONS: i64 = 6;

/// Audit records kept per ticket before the oldest is evicted
pub const MAX_VOTE_CHANGE_RECORDS: usize = 10;

/// Progress of the fee payment for a ticket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum FeeStatus {
    /// No fee transaction received yet
    #[default]
    NoFee,
    /// Fee transaction received from the owner, not yet broadcast
    Received,
    /// Fee transaction accepted by the node
    Broadcast,
    /// Fee transaction has enough confirmations
    Confirmed,
    /// Broadcast failed or the transaction fell out of the mempool
    Error,
}

impl FeeStatus {
    fn rank(&self) -> Option<u8> {
        match self {
            Self::NoFee => Some(0),
            Self::Received => Some(1),
            Self::Broadcast => Some(2),
            Self::Confirmed => Some(3),
            Self::Error => None,
        }
    }

    /// Whether moving from `self` to `next` respects the forward-only ordering.
    ///
    /// `Error` is entered from `Received` or `Broadcast` and left only toward
    /// `Broadcast`.
    pub fn can_advance_to(&self, next: FeeStatus) -> bool {
        if *self == next {
            return true;
        }
        match (self, next) {
            (Self::Received | Self::Broadcast, Self::Error) => true,
            (Self::Error, Self::Broadcast) => true,
            (Self::Error, _) | (_, Self::Error) => false,
            (current, next) => current.rank() < next.rank(),
        }
    }
}

impl fmt::Display for FeeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoFee => write!(f, "none"),
            Self::Received => write!(f, "received"),
            Self::Broadcast => write!(f, "broadcast"),
            Self::Confirmed => write!(f, "confirmed"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Final state of a ticket once it leaves the live pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TicketOutcome {
    /// Still live, no spending transaction located
    #[default]
    Voting,
    Voted,
    Missed,
    Expired,
    /// Recorded before missed and expired revocations were told apart
    Revoked,
}

impl TicketOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Voting)
    }
}

impl fmt::Display for TicketOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Voting => write!(f, "voting"),
            Self::Voted => write!(f, "voted"),
            Self::Missed => write!(f, "missed"),
            Self::Expired => write!(f, "expired"),
            Self::Revoked => write!(f, "revoked"),
        }
    }
}

/// A ticket whose voting rights are held by this service
#[derive(Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Ticket {
    pub hash: Hash256,
    /// Height the purchase was mined at, 0 until confirmed
    pub purchase_height: u64,
    pub confirmed: bool,
    pub commitment_address: String,

    pub fee_address_index: u32,
    pub fee_address: String,
    /// Fee quoted to the owner, in atoms
    pub fee_amount: i64,
    /// Unix timestamp after which a new fee quote is required
    pub fee_expiration: i64,

    pub fee_tx_hex: String,
    pub fee_tx_hash: Option<Hash256>,
    pub fee_tx_status: FeeStatus,

    pub voting_wif: String,
    pub vote_choices: BTreeMap<String, String>,
    pub tspend_policy: BTreeMap<String, String>,
    pub treasury_policy: BTreeMap<String, String>,

    pub outcome: TicketOutcome,
}

impl Ticket {
    pub fn new(hash: Hash256, commitment_address: impl Into<String>) -> Self {
        Self {
            hash,
            commitment_address: commitment_address.into(),
            ..Default::default()
        }
    }

    /// Confirmed, fee paid, and not yet spent: belongs on every voting wallet
    pub fn is_votable(&self) -> bool {
        self.confirmed
            && self.fee_tx_status == FeeStatus::Confirmed
            && self.outcome == TicketOutcome::Voting
    }

    /// First height at which the ticket can be called to vote
    pub fn maturity_height(&self, network: Network) -> u64 {
        self.purchase_height + network.ticket_maturity()
    }

    /// Height at which an unselected ticket expires
    pub fn expiry_height(&self, network: Network) -> u64 {
        self.purchase_height + network.ticket_maturity() + network.ticket_expiry()
    }

    /// Moves the fee status forward, refusing transitions that would go backwards.
    ///
    /// Returns false and leaves the ticket untouched when the move is illegal.
    pub fn set_fee_status(&mut self, next: FeeStatus) -> bool {
        if !self.fee_tx_status.can_advance_to(next) {
            return false;
        }
        self.fee_tx_status = next;
        true
    }
}

impl fmt::Debug for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ticket")
            .field("hash", &self.hash)
            .field("purchase_height", &self.purchase_height)
            .field("confirmed", &self.confirmed)
            .field("commitment_address", &self.commitment_address)
            .field("fee_address", &self.fee_address)
            .field("fee_amount", &self.fee_amount)
            .field("fee_tx_hash", &self.fee_tx_hash)
            .field("fee_tx_status", &self.fee_tx_status)
            .field(
                "voting_wif",
                &if self.voting_wif.is_empty() { "" } else { "<redacted>" },
            )
            .field("vote_choices", &self.vote_choices)
            .field("outcome", &self.outcome)
            .finish()
    }
}

/// Lowest purchase height across a set of tickets
pub fn earliest_purchase_height(tickets: &[Ticket]) -> Option<u64> {
    tickets.iter().map(|t| t.purchase_height).min()
}

/// Alternate signing address registered once by a ticket owner
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AltSignAddrData {
    pub alt_sign_addr: String,
    pub request: String,
    pub request_signature: String,
    pub response: String,
    pub response_signature: String,
}

/// One accepted change of voting preferences, kept for audit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteChangeRecord {
    pub request: String,
    pub request_signature: String,
    pub response: String,
    pub response_signature: String,
    pub recorded_at: DateTime<Utc>,
}
