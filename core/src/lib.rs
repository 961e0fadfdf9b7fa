//! VSP Core Library
//!
//! Ticket data model and the chain primitives the reconciliation engine
//! reasons about: hashes, network parameters, commitment scripts, block
//! filters and stake transaction shapes.

pub mod address;
pub mod chain;
pub mod gcs;
pub mod hash;
pub mod network;
pub mod ticket;

// Re-export main types
pub use address::{payment_script, AddressError, AddressKind, CommitmentAddress};
pub use chain::{Block, BlockHeader, RawTransaction, ScriptPubKey, TxInput, TxOutput};
pub use gcs::{key_from_merkle_root, CompactFilter, FilterError};
pub use hash::{Hash256, HashParseError};
pub use network::Network;
pub use ticket::{
    earliest_purchase_height, AltSignAddrData, FeeStatus, Ticket, TicketOutcome,
    VoteChangeRecord, MAX_VOTE_CHANGE_RECORDS, REQUIRED_CONFIRMATIONS,
};
