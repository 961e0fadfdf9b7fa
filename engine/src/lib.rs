//! VSP Ticket Engine
//!
//! Keeps tickets moving through their lifecycle: confirms purchases and
//! fees against the chain node, replicates votable tickets onto every
//! voting wallet, scans for votes and revocations, and repairs wallets
//! that drifted from the ticket store.

pub mod engine;
pub mod error;
pub mod integrity;
pub mod pipeline;
pub mod reconciler;
pub mod replicate;
pub mod scanner;

pub use engine::Engine;
pub use error::{EngineError, Result};
pub use integrity::IntegrityReport;
pub use pipeline::UpdateReport;
pub use reconciler::{ReconcileReport, WalletRepair};
pub use scanner::{find_spent_tickets, ScanResult, SpentTicket};

/// Engine crate version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
