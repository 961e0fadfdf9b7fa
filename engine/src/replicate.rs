//! Pushing tickets and voting preferences to wallet replicas

use tracing::{error, warn};
use vsp_core::{RawTransaction, Ticket};
use vsp_rpc::{RpcError, WalletVoter};

use crate::error::{EngineError, Result};

/// Preferences a wallet refused as unknown, already removed from the ticket
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Rejected {
    pub agendas: usize,
    pub tspends: usize,
    pub treasury_keys: usize,
}

impl Rejected {
    pub fn is_empty(&self) -> bool {
        self.agendas == 0 && self.tspends == 0 && self.treasury_keys == 0
    }
}

/// Result of pushing a single vote choice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChoiceUpdate {
    Applied,
    /// The agenda is unknown to the wallet and was dropped from the ticket
    Dropped,
    Failed,
}

/// Import the voting key and attach the ticket purchase
pub async fn add_ticket(
    wallet: &dyn WalletVoter,
    ticket: &Ticket,
    raw_ticket: &RawTransaction,
) -> Result<()> {
    let block_hash = raw_ticket
        .blockhash
        .ok_or(EngineError::NotMined(ticket.hash))?;
    wallet
        .add_ticket_for_voting(&ticket.voting_wif, &block_hash, &raw_ticket.hex)
        .await?;
    Ok(())
}

pub async fn set_vote_choice(
    wallet: &dyn WalletVoter,
    ticket: &mut Ticket,
    agenda: &str,
    choice: &str,
) -> ChoiceUpdate {
    match wallet.set_vote_choice(agenda, choice, &ticket.hash).await {
        Ok(()) => ChoiceUpdate::Applied,
        Err(e) if e.is_preference_rejected() => {
            warn!(
                ticket = %ticket.hash,
                wallet = %wallet.address(),
                agenda,
                "Removing unknown agenda from ticket vote choices"
            );
            ticket.vote_choices.remove(agenda);
            ChoiceUpdate::Dropped
        }
        Err(e) => {
            log_push_failure(wallet, ticket, "vote choice", &e);
            ChoiceUpdate::Failed
        }
    }
}

/// Apply every stored preference of `ticket` to `wallet`.
///
/// Preferences the wallet rejects as unknown are removed from `ticket`; the
/// caller persists it when the returned set is not empty.
pub async fn push_preferences(wallet: &dyn WalletVoter, ticket: &mut Ticket) -> Rejected {
    let mut rejected = Rejected::default();

    let choices: Vec<(String, String)> = ticket.vote_choices.clone().into_iter().collect();
    for (agenda, choice) in choices {
        if set_vote_choice(wallet, ticket, &agenda, &choice).await == ChoiceUpdate::Dropped {
            rejected.agendas += 1;
        }
    }

    let tspends: Vec<(String, String)> = ticket.tspend_policy.clone().into_iter().collect();
    for (tspend, policy) in tspends {
        match wallet.set_tspend_policy(&tspend, &policy, &ticket.hash).await {
            Ok(()) => {}
            Err(e) if e.is_preference_rejected() => {
                warn!(ticket = %ticket.hash, tspend = %tspend, "Removing unknown tspend from ticket policy");
                ticket.tspend_policy.remove(&tspend);
                rejected.tspends += 1;
            }
            Err(e) => log_push_failure(wallet, ticket, "tspend policy", &e),
        }
    }

    let keys: Vec<(String, String)> = ticket.treasury_policy.clone().into_iter().collect();
    for (key, policy) in keys {
        match wallet.set_treasury_policy(&key, &policy, &ticket.hash).await {
            Ok(()) => {}
            Err(e) if e.is_preference_rejected() => {
                warn!(ticket = %ticket.hash, key = %key, "Removing unknown treasury key from ticket policy");
                ticket.treasury_policy.remove(&key);
                rejected.treasury_keys += 1;
            }
            Err(e) => log_push_failure(wallet, ticket, "treasury policy", &e),
        }
    }

    rejected
}

fn log_push_failure(wallet: &dyn WalletVoter, ticket: &Ticket, what: &str, e: &RpcError) {
    error!(
        ticket = %ticket.hash,
        wallet = %wallet.address(),
        "Failed to set {}: {}", what, e
    );
}
