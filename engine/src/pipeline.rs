//! Ticket update pipeline
//!
//! One pass runs four phases in order, each over the tickets matching its
//! precondition:
//!
//! 1. confirm ticket purchases, deleting tickets the node has forgotten
//! 2. broadcast received fee transactions
//! 3. confirm broadcast fees and hand the ticket to every voting wallet
//! 4. scan for votes and revocations of votable tickets
//!
//! A failure on one ticket is logged and the phase moves on. Only failing
//! to reach the chain node at all aborts the pass.

use std::sync::Arc;

use tracing::{debug, error, info, warn};
use vsp_core::{
    earliest_purchase_height, FeeStatus, Hash256, Ticket, TicketOutcome, REQUIRED_CONFIRMATIONS,
};
use vsp_rpc::{ChainReader, WalletVoter};

use crate::engine::Engine;
use crate::error::Result;
use crate::replicate::{self, Rejected};
use crate::scanner::find_spent_tickets;

/// What a single pipeline pass changed
#[derive(Debug, Default, Clone)]
pub struct UpdateReport {
    pub tickets_confirmed: usize,
    pub tickets_evicted: usize,
    pub fees_broadcast: usize,
    pub fee_errors: usize,
    pub fees_confirmed: usize,
    /// Unknown agendas, tspends and treasury keys removed from tickets
    pub preferences_dropped: usize,
    /// Wallets that could not be reached while replicating
    pub failed_wallets: Vec<String>,
    pub outcomes: Vec<(Hash256, TicketOutcome)>,
    /// Scan watermark after the pass
    pub scanned_to: u64,
}

impl UpdateReport {
    pub fn is_empty(&self) -> bool {
        self.tickets_confirmed == 0
            && self.tickets_evicted == 0
            && self.fees_broadcast == 0
            && self.fee_errors == 0
            && self.fees_confirmed == 0
            && self.preferences_dropped == 0
            && self.outcomes.is_empty()
    }
}

impl Engine {
    /// Run one pass of the update pipeline.
    ///
    /// Passes are serialised; a pass requested while another is running
    /// waits for it to finish.
    pub async fn update_tickets(&self) -> Result<UpdateReport> {
        let mut last_scanned = self.last_scanned.lock().await;
        let chain = self.peers.chain_client().await?;
        let chain = chain.as_ref();
        let mut report = UpdateReport::default();

        self.confirm_purchases(chain, &mut report).await;
        if !self.is_shutting_down() {
            self.broadcast_fees(chain, &mut report).await;
        }
        if !self.is_shutting_down() {
            self.confirm_fees(chain, &mut report).await;
        }
        if !self.is_shutting_down() {
            self.resolve_outcomes(chain, &mut last_scanned, &mut report)
                .await;
        }

        report.scanned_to = *last_scanned;
        Ok(report)
    }

    async fn confirm_purchases(&self, chain: &dyn ChainReader, report: &mut UpdateReport) {
        let tickets = match self.store.get_unconfirmed_tickets() {
            Ok(tickets) => tickets,
            Err(e) => {
                error!("Failed to load unconfirmed tickets: {}", e);
                return;
            }
        };

        for mut ticket in tickets {
            if self.is_shutting_down() {
                return;
            }

            let tx = match chain.get_raw_transaction(&ticket.hash).await {
                Ok(tx) => tx,
                Err(e) if e.is_chain_eviction() => {
                    // Never mined and dropped from the mempool
                    self.delete_evicted(&ticket, report);
                    continue;
                }
                Err(e) => {
                    error!(ticket = %ticket.hash, "Failed to fetch ticket purchase: {}", e);
                    continue;
                }
            };

            if tx.confirmations < REQUIRED_CONFIRMATIONS {
                continue;
            }

            ticket.purchase_height = tx.blockheight;
            ticket.confirmed = true;
            match self.store.update_ticket(&ticket) {
                Ok(()) => {
                    info!(ticket = %ticket.hash, height = tx.blockheight, "Ticket confirmed");
                    report.tickets_confirmed += 1;
                }
                Err(e) => error!(ticket = %ticket.hash, "Failed to update ticket: {}", e),
            }
        }
    }

    fn delete_evicted(&self, ticket: &Ticket, report: &mut UpdateReport) {
        if let Err(e) = self.store.delete_ticket(ticket) {
            error!(ticket = %ticket.hash, "Failed to delete evicted ticket: {}", e);
            return;
        }
        if let Err(e) = self.store.delete_alt_sign_addr(&ticket.hash) {
            error!(ticket = %ticket.hash, "Failed to delete alt sign address: {}", e);
        }
        info!(ticket = %ticket.hash, "Removed unconfirmed ticket no longer known to the node");
        report.tickets_evicted += 1;
    }

    async fn broadcast_fees(&self, chain: &dyn ChainReader, report: &mut UpdateReport) {
        let pending = match self.store.get_pending_fees() {
            Ok(tickets) => tickets,
            Err(e) => {
                error!("Failed to load pending fees: {}", e);
                return;
            }
        };
        let failed = self.store.get_failed_fees().unwrap_or_else(|e| {
            error!("Failed to load failed fees: {}", e);
            Vec::new()
        });

        for mut ticket in pending.into_iter().chain(failed) {
            if self.is_shutting_down() {
                return;
            }

            let next = match chain.send_raw_transaction(&ticket.fee_tx_hex).await {
                Ok(txid) => {
                    ticket.fee_tx_hash.get_or_insert(txid);
                    FeeStatus::Broadcast
                }
                Err(e) if e.is_duplicate() => {
                    debug!(ticket = %ticket.hash, "Fee transaction already known to the node");
                    FeeStatus::Broadcast
                }
                Err(e) => {
                    error!(ticket = %ticket.hash, "Failed to broadcast fee transaction: {}", e);
                    FeeStatus::Error
                }
            };

            // A retry that failed again leaves the record as it was
            if ticket.fee_tx_status == next || !ticket.set_fee_status(next) {
                continue;
            }

            if let Err(e) = self.store.update_ticket(&ticket) {
                error!(ticket = %ticket.hash, "Failed to update ticket: {}", e);
                continue;
            }
            if next == FeeStatus::Broadcast {
                info!(ticket = %ticket.hash, "Fee transaction broadcast");
                report.fees_broadcast += 1;
            } else {
                report.fee_errors += 1;
            }
        }
    }

    async fn confirm_fees(&self, chain: &dyn ChainReader, report: &mut UpdateReport) {
        let tickets = match self.store.get_unconfirmed_fees() {
            Ok(tickets) => tickets,
            Err(e) => {
                error!("Failed to load unconfirmed fees: {}", e);
                return;
            }
        };

        // Dialed on the first confirmed fee only
        let mut wallets: Option<Vec<Arc<dyn WalletVoter>>> = None;

        for mut ticket in tickets {
            if self.is_shutting_down() {
                return;
            }

            let Some(fee_hash) = ticket.fee_tx_hash else {
                warn!(ticket = %ticket.hash, "Broadcast fee has no transaction hash");
                continue;
            };

            let fee_tx = match chain.get_raw_transaction(&fee_hash).await {
                Ok(tx) => tx,
                Err(e) if e.is_chain_eviction() => {
                    warn!(
                        ticket = %ticket.hash,
                        fee_tx = %fee_hash,
                        "Fee transaction dropped by the node, will rebroadcast"
                    );
                    if ticket.set_fee_status(FeeStatus::Error) {
                        match self.store.update_ticket(&ticket) {
                            Ok(()) => report.fee_errors += 1,
                            Err(e) => error!(ticket = %ticket.hash, "Failed to update ticket: {}", e),
                        }
                    }
                    continue;
                }
                Err(e) => {
                    error!(ticket = %ticket.hash, "Failed to fetch fee transaction: {}", e);
                    continue;
                }
            };

            if fee_tx.confirmations < REQUIRED_CONFIRMATIONS {
                continue;
            }

            ticket.set_fee_status(FeeStatus::Confirmed);
            ticket.fee_tx_hex.clear();
            if let Err(e) = self.store.update_ticket(&ticket) {
                error!(ticket = %ticket.hash, "Failed to update ticket: {}", e);
                continue;
            }
            info!(ticket = %ticket.hash, fee_tx = %fee_hash, "Fee transaction confirmed");
            report.fees_confirmed += 1;

            if wallets.is_none() {
                let connected = self.peers.wallet_clients().await;
                report.failed_wallets = connected.failed;
                wallets = Some(connected.clients);
            }
            let clients = wallets.as_deref().unwrap_or(&[]);
            self.replicate_ticket(chain, clients, &mut ticket, report)
                .await;
        }
    }

    /// Hand a freshly confirmed ticket to every connected wallet
    async fn replicate_ticket(
        &self,
        chain: &dyn ChainReader,
        wallets: &[Arc<dyn WalletVoter>],
        ticket: &mut Ticket,
        report: &mut UpdateReport,
    ) {
        let raw_ticket = match chain.get_raw_transaction(&ticket.hash).await {
            Ok(tx) => tx,
            Err(e) => {
                error!(ticket = %ticket.hash, "Failed to fetch ticket for voting wallets: {}", e);
                return;
            }
        };

        let mut rejected = Rejected::default();
        for wallet in wallets {
            if let Err(e) = replicate::add_ticket(wallet.as_ref(), ticket, &raw_ticket).await {
                error!(
                    ticket = %ticket.hash,
                    wallet = %wallet.address(),
                    "Failed to add ticket to voting wallet: {}", e
                );
                continue;
            }
            let r = replicate::push_preferences(wallet.as_ref(), ticket).await;
            rejected.agendas += r.agendas;
            rejected.tspends += r.tspends;
            rejected.treasury_keys += r.treasury_keys;
            debug!(ticket = %ticket.hash, wallet = %wallet.address(), "Ticket added to voting wallet");
        }

        if !rejected.is_empty() {
            report.preferences_dropped +=
                rejected.agendas + rejected.tspends + rejected.treasury_keys;
            self.save_preferences(ticket);
        }
    }

    async fn resolve_outcomes(
        &self,
        chain: &dyn ChainReader,
        last_scanned: &mut u64,
        report: &mut UpdateReport,
    ) {
        let votable = match self.store.get_votable_tickets() {
            Ok(tickets) => tickets,
            Err(e) => {
                error!("Failed to load votable tickets: {}", e);
                return;
            }
        };
        let Some(earliest) = earliest_purchase_height(&votable) else {
            return;
        };

        let start_height = if *last_scanned == 0 {
            earliest + self.network.ticket_maturity()
        } else {
            *last_scanned + 1
        };

        let scan =
            match find_spent_tickets(chain, self.network, votable, start_height, &self.shutdown)
                .await
            {
                Ok(scan) => scan,
                Err(e) => {
                    error!(from = start_height, "Spent ticket scan failed: {}", e);
                    return;
                }
            };

        for spent in &scan.spent {
            let outcome = spent.outcome();
            match self.record_outcome(&spent.ticket.hash, outcome) {
                Ok(true) => {
                    info!(
                        ticket = %spent.ticket.hash,
                        outcome = %outcome,
                        height = spent.height_spent,
                        spending_tx = %spent.spending_tx.txid,
                        "Ticket outcome resolved"
                    );
                    report.outcomes.push((spent.ticket.hash, outcome));
                }
                Ok(false) => {}
                Err(e) => error!(ticket = %spent.ticket.hash, "Failed to record outcome: {}", e),
            }
        }

        *last_scanned = scan.end_height;
    }

    /// Set the outcome of a ticket still marked as voting
    fn record_outcome(&self, hash: &Hash256, outcome: TicketOutcome) -> Result<bool> {
        let Some(mut ticket) = self.store.get_ticket(hash)? else {
            return Ok(false);
        };
        if ticket.outcome.is_terminal() {
            return Ok(false);
        }
        ticket.outcome = outcome;
        self.store.update_ticket(&ticket)?;
        Ok(true)
    }
}
