//! Wallet consistency reconciler
//!
//! Converges every connected voting wallet on the set of votable tickets.
//! The first pass adds missing tickets and rescans the wallets that got
//! any. The second pass corrects consensus vote choices that differ from
//! the stored ones. Running it again without chain changes does nothing.
//!
//! A rescan that fails is remembered per wallet and retried on the next
//! run, since by then the tickets are already on the replica and nothing
//! else would trigger it.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, info, warn};
use vsp_core::{earliest_purchase_height, Hash256, RawTransaction, Ticket};
use vsp_rpc::{ChainReader, WalletVoter};

use crate::engine::Engine;
use crate::error::Result;
use crate::replicate::{self, ChoiceUpdate};

/// Repairs made on one wallet
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WalletRepair {
    pub wallet: String,
    pub tickets_added: usize,
    pub choices_fixed: usize,
    pub agendas_dropped: usize,
    pub tspends_dropped: usize,
    pub treasury_keys_dropped: usize,
    /// Height the wallet rescanned from, if tickets were added or a
    /// previous rescan was still owed
    pub rescanned_from: Option<u64>,
}

impl WalletRepair {
    fn new(wallet: &str) -> Self {
        Self {
            wallet: wallet.to_string(),
            ..Default::default()
        }
    }

    fn preferences_dropped(&self) -> usize {
        self.agendas_dropped + self.tspends_dropped + self.treasury_keys_dropped
    }
}

#[derive(Debug, Default, Clone)]
pub struct ReconcileReport {
    pub wallets: Vec<WalletRepair>,
    /// Configured wallets that could not be reached
    pub failed: Vec<String>,
}

impl ReconcileReport {
    pub fn tickets_added(&self) -> usize {
        self.wallets.iter().map(|w| w.tickets_added).sum()
    }

    pub fn choices_fixed(&self) -> usize {
        self.wallets.iter().map(|w| w.choices_fixed).sum()
    }
}

impl Engine {
    /// Bring every connected wallet in line with the votable tickets
    pub async fn reconcile_wallets(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        let mut votable = self.store.get_votable_tickets()?;
        let Some(oldest_height) = earliest_purchase_height(&votable) else {
            debug!("No votable tickets, skipping wallet consistency check");
            return Ok(report);
        };

        let chain = self.peers.chain_client().await?;
        let connected = self.peers.wallet_clients().await;
        report.failed = connected.failed;
        report.wallets = connected
            .clients
            .iter()
            .map(|w| WalletRepair::new(w.address()))
            .collect();

        // Raw tickets are shared across wallets
        let mut raw_tickets: HashMap<Hash256, RawTransaction> = HashMap::new();

        for (wallet, repair) in connected.clients.iter().zip(report.wallets.iter_mut()) {
            if self.is_shutting_down() {
                return Ok(report);
            }
            self.add_missing_tickets(
                chain.as_ref(),
                wallet,
                &mut votable,
                oldest_height,
                &mut raw_tickets,
                repair,
            )
            .await;
        }

        for (wallet, repair) in connected.clients.iter().zip(report.wallets.iter_mut()) {
            if self.is_shutting_down() {
                return Ok(report);
            }
            self.fix_vote_choices(wallet, &mut votable, oldest_height, repair)
                .await;
        }

        for repair in &report.wallets {
            if repair.tickets_added > 0 || repair.choices_fixed > 0 || repair.preferences_dropped() > 0
            {
                info!(
                    wallet = %repair.wallet,
                    added = repair.tickets_added,
                    choices_fixed = repair.choices_fixed,
                    agendas_dropped = repair.agendas_dropped,
                    tspends_dropped = repair.tspends_dropped,
                    treasury_keys_dropped = repair.treasury_keys_dropped,
                    "Voting wallet repaired"
                );
            }
        }

        Ok(report)
    }

    async fn add_missing_tickets(
        &self,
        chain: &dyn ChainReader,
        wallet: &Arc<dyn WalletVoter>,
        votable: &mut [Ticket],
        oldest_height: u64,
        raw_tickets: &mut HashMap<Hash256, RawTransaction>,
        repair: &mut WalletRepair,
    ) {
        let wallet_tickets = match wallet.ticket_info(oldest_height).await {
            Ok(tickets) => tickets,
            Err(e) => {
                error!(wallet = %wallet.address(), "Failed to fetch wallet tickets: {}", e);
                return;
            }
        };

        let mut min_height: Option<u64> = None;
        for ticket in votable.iter_mut() {
            if wallet_tickets.contains_key(&ticket.hash) {
                continue;
            }
            if self.is_shutting_down() {
                break;
            }

            debug!(wallet = %wallet.address(), ticket = %ticket.hash, "Adding missing ticket");

            let raw_ticket = match raw_tickets.get(&ticket.hash) {
                Some(tx) => tx.clone(),
                None => match chain.get_raw_transaction(&ticket.hash).await {
                    Ok(tx) => {
                        raw_tickets.insert(ticket.hash, tx.clone());
                        tx
                    }
                    Err(e) => {
                        error!(ticket = %ticket.hash, "Failed to fetch ticket: {}", e);
                        continue;
                    }
                },
            };

            if let Err(e) = replicate::add_ticket(wallet.as_ref(), ticket, &raw_ticket).await {
                error!(
                    ticket = %ticket.hash,
                    wallet = %wallet.address(),
                    "Failed to add missing ticket: {}", e
                );
                continue;
            }
            repair.tickets_added += 1;
            let height = raw_ticket.blockheight;
            min_height = Some(min_height.map_or(height, |h| h.min(height)));

            let rejected = replicate::push_preferences(wallet.as_ref(), ticket).await;
            if !rejected.is_empty() {
                repair.agendas_dropped += rejected.agendas;
                repair.tspends_dropped += rejected.tspends;
                repair.treasury_keys_dropped += rejected.treasury_keys;
                self.save_preferences(ticket);
            }
        }

        // Imported keys only see history after a rescan
        let owed = self.pending_rescans.lock().remove(wallet.address());
        let from = match (min_height, owed) {
            (Some(added), Some(owed)) => Some(added.min(owed)),
            (added, owed) => added.or(owed),
        };
        let Some(height) = from else {
            return;
        };

        if min_height.is_some() {
            info!(
                wallet = %wallet.address(),
                added = repair.tickets_added,
                from = height,
                "Added missing tickets to voting wallet, rescanning"
            );
        } else {
            info!(wallet = %wallet.address(), from = height, "Retrying voting wallet rescan");
        }
        match wallet.rescan_from(height).await {
            Ok(()) => repair.rescanned_from = Some(height),
            Err(e) => {
                error!(wallet = %wallet.address(), from = height, "Rescan failed, will retry: {}", e);
                self.pending_rescans
                    .lock()
                    .insert(wallet.address().to_string(), height);
            }
        }
    }

    async fn fix_vote_choices(
        &self,
        wallet: &Arc<dyn WalletVoter>,
        votable: &mut [Ticket],
        oldest_height: u64,
        repair: &mut WalletRepair,
    ) {
        let wallet_tickets = match wallet.ticket_info(oldest_height).await {
            Ok(tickets) => tickets,
            Err(e) => {
                error!(wallet = %wallet.address(), "Failed to fetch wallet tickets: {}", e);
                return;
            }
        };

        for ticket in votable.iter_mut() {
            if self.is_shutting_down() {
                return;
            }
            let Some(wallet_ticket) = wallet_tickets.get(&ticket.hash) else {
                warn!(wallet = %wallet.address(), ticket = %ticket.hash, "Ticket not found on voting wallet");
                continue;
            };

            let choices: Vec<(String, String)> = ticket.vote_choices.clone().into_iter().collect();
            let mut dropped = false;
            for (agenda, choice) in choices {
                if wallet_ticket.choice_for(&agenda) == Some(choice.as_str()) {
                    continue;
                }
                debug!(
                    wallet = %wallet.address(),
                    ticket = %ticket.hash,
                    agenda = %agenda,
                    choice = %choice,
                    "Updating incorrect vote choice"
                );
                match replicate::set_vote_choice(wallet.as_ref(), ticket, &agenda, &choice).await {
                    ChoiceUpdate::Applied => repair.choices_fixed += 1,
                    ChoiceUpdate::Dropped => {
                        repair.agendas_dropped += 1;
                        dropped = true;
                    }
                    ChoiceUpdate::Failed => {}
                }
            }
            if dropped {
                self.save_preferences(ticket);
            }

            // TODO: compare tspend and treasury policies once ticketinfo reports them
        }
    }
}
