//! Startup integrity checks
//!
//! Repairs records left incomplete by earlier releases before the first
//! pipeline pass runs. Until a run completes without errors the update task
//! runs the checks again ahead of each pipeline pass.

use std::sync::atomic::Ordering;

use tracing::{error, info, warn};
use vsp_core::{earliest_purchase_height, TicketOutcome};

use crate::engine::Engine;
use crate::error::Result;
use crate::scanner::find_spent_tickets;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IntegrityReport {
    pub purchase_heights_fixed: usize,
    pub revocations_classified: usize,
    /// Tickets recorded as revoked that actually voted; left untouched
    pub voted_while_revoked: usize,
    /// Tickets whose repair could not be written back
    pub store_errors: usize,
}

impl Engine {
    pub async fn run_startup_checks(&self) -> Result<IntegrityReport> {
        let mut report = IntegrityReport::default();
        self.fix_missing_purchase_heights(&mut report).await?;
        if self.is_shutting_down() {
            return Ok(report);
        }
        self.classify_revoked_tickets(&mut report).await?;

        if report.store_errors == 0 {
            self.integrity_pending.store(false, Ordering::SeqCst);
        }
        info!(
            purchase_heights_fixed = report.purchase_heights_fixed,
            revocations_classified = report.revocations_classified,
            store_errors = report.store_errors,
            "Startup integrity checks complete"
        );
        Ok(report)
    }

    /// True until the integrity checks have completed cleanly
    pub fn integrity_pending(&self) -> bool {
        self.integrity_pending.load(Ordering::SeqCst)
    }

    async fn fix_missing_purchase_heights(&self, report: &mut IntegrityReport) -> Result<()> {
        let tickets = self.store.get_missing_purchase_height()?;
        if tickets.is_empty() {
            return Ok(());
        }

        let chain = self.peers.chain_client().await?;
        for mut ticket in tickets {
            if self.is_shutting_down() {
                break;
            }
            let tx = match chain.get_raw_transaction(&ticket.hash).await {
                Ok(tx) => tx,
                Err(e) => {
                    error!(ticket = %ticket.hash, "Failed to fetch ticket purchase: {}", e);
                    continue;
                }
            };
            ticket.purchase_height = tx.blockheight;
            if let Err(e) = self.store.update_ticket(&ticket) {
                error!(ticket = %ticket.hash, "Failed to record purchase height: {}", e);
                report.store_errors += 1;
                continue;
            }
            info!(ticket = %ticket.hash, height = tx.blockheight, "Purchase height recorded");
            report.purchase_heights_fixed += 1;
        }
        Ok(())
    }

    /// Tell missed and expired apart for tickets stored as plain revoked
    async fn classify_revoked_tickets(&self, report: &mut IntegrityReport) -> Result<()> {
        let revoked = self.store.get_revoked_tickets()?;
        let Some(earliest) = earliest_purchase_height(&revoked) else {
            return Ok(());
        };

        let watched = revoked.len();
        info!(tickets = watched, "Classifying revoked tickets");
        let chain = self.peers.chain_client().await?;
        let start_height = earliest + self.network.ticket_maturity();
        let scan = find_spent_tickets(
            chain.as_ref(),
            self.network,
            revoked,
            start_height,
            &self.shutdown,
        )
        .await?;

        let unresolved = watched - scan.spent.len();
        for spent in scan.spent {
            if spent.voted() {
                error!(
                    ticket = %spent.ticket.hash,
                    vote_tx = %spent.spending_tx.txid,
                    height = spent.height_spent,
                    "Ticket recorded as revoked has actually voted"
                );
                report.voted_while_revoked += 1;
                continue;
            }

            let mut ticket = match self.store.get_ticket(&spent.ticket.hash) {
                Ok(Some(ticket)) => ticket,
                Ok(None) => continue,
                Err(e) => {
                    error!(ticket = %spent.ticket.hash, "Failed to load revoked ticket: {}", e);
                    report.store_errors += 1;
                    continue;
                }
            };
            if ticket.outcome != TicketOutcome::Revoked {
                continue;
            }
            ticket.outcome = spent.outcome();
            if let Err(e) = self.store.update_ticket(&ticket) {
                error!(ticket = %ticket.hash, "Failed to record revocation outcome: {}", e);
                report.store_errors += 1;
                continue;
            }
            info!(ticket = %ticket.hash, outcome = %ticket.outcome, "Revoked ticket classified");
            report.revocations_classified += 1;
        }

        if unresolved > 0 {
            warn!(unresolved, "Revoked tickets without a spending transaction on chain");
        }
        Ok(())
    }
}
