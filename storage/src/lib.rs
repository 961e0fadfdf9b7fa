//! VSP Storage Layer
//!
//! The ticket store is the single source of truth shared by the update
//! pipeline and the wallet reconciler. Both call it concurrently, so every
//! implementation serialises access per record.

pub mod memory;
pub mod sled_store;

pub use memory::MemoryStore;
pub use sled_store::SledStore;

use thiserror::Error;
use vsp_core::{AltSignAddrData, FeeStatus, Hash256, Ticket, TicketOutcome, VoteChangeRecord};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Ticket not found: {0}")]
    NotFound(Hash256),

    #[error("Ticket already exists: {0}")]
    AlreadyExists(Hash256),

    #[error("Alternate signing address already set for ticket {0}")]
    AltSignAddrExists(Hash256),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Authoritative ticket storage.
///
/// The lifecycle queries are provided in terms of [`TicketStore::filter_tickets`]
/// so a backend only has to implement record access.
pub trait TicketStore: Send + Sync {
    fn insert_ticket(&self, ticket: &Ticket) -> Result<()>;

    fn get_ticket(&self, hash: &Hash256) -> Result<Option<Ticket>>;

    /// Overwrite an existing record. Last writer wins.
    fn update_ticket(&self, ticket: &Ticket) -> Result<()>;

    fn delete_ticket(&self, ticket: &Ticket) -> Result<()>;

    /// All tickets matching `predicate`
    fn filter_tickets(&self, predicate: &dyn Fn(&Ticket) -> bool) -> Result<Vec<Ticket>>;

    /// Alternate signing addresses may be set once and never changed
    fn insert_alt_sign_addr(&self, hash: &Hash256, data: &AltSignAddrData) -> Result<()>;

    fn get_alt_sign_addr(&self, hash: &Hash256) -> Result<Option<AltSignAddrData>>;

    /// Removing an absent record is not an error
    fn delete_alt_sign_addr(&self, hash: &Hash256) -> Result<()>;

    /// Append to the ticket's audit log, evicting the oldest record past the limit
    fn save_vote_change(&self, hash: &Hash256, record: &VoteChangeRecord) -> Result<()>;

    /// Audit log for a ticket, oldest first
    fn get_vote_changes(&self, hash: &Hash256) -> Result<Vec<VoteChangeRecord>>;

    /// Purchase not yet buried under enough confirmations
    fn get_unconfirmed_tickets(&self) -> Result<Vec<Ticket>> {
        self.filter_tickets(&|t| !t.confirmed)
    }

    /// Fee received from the owner and waiting to be broadcast
    fn get_pending_fees(&self) -> Result<Vec<Ticket>> {
        self.filter_tickets(&|t| t.fee_tx_status == FeeStatus::Received)
    }

    /// Fee broadcast but not yet confirmed
    fn get_unconfirmed_fees(&self) -> Result<Vec<Ticket>> {
        self.filter_tickets(&|t| t.fee_tx_status == FeeStatus::Broadcast)
    }

    /// Fee in error that can still be rebroadcast from the stored hex
    fn get_failed_fees(&self) -> Result<Vec<Ticket>> {
        self.filter_tickets(&|t| t.fee_tx_status == FeeStatus::Error && !t.fee_tx_hex.is_empty())
    }

    fn get_votable_tickets(&self) -> Result<Vec<Ticket>> {
        self.filter_tickets(&|t| t.is_votable())
    }

    fn get_revoked_tickets(&self) -> Result<Vec<Ticket>> {
        self.filter_tickets(&|t| t.outcome == TicketOutcome::Revoked)
    }

    /// Confirmed tickets whose purchase height was never recorded
    fn get_missing_purchase_height(&self) -> Result<Vec<Ticket>> {
        self.filter_tickets(&|t| t.confirmed && t.purchase_height == 0)
    }
}
