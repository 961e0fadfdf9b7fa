//! Spent-ticket scanner
//!
//! Walks the chain from a start height to the tip looking for the
//! transactions that spend a set of tickets. Each block's compact filter is
//! tested against the payment scripts of the remaining tickets' commitment
//! addresses, since every vote and revocation pays back to that address.
//! Only blocks whose filter matches are downloaded.

use crate::error::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use vsp_core::{
    key_from_merkle_root, payment_script, Network, RawTransaction, Ticket, TicketOutcome,
};
use vsp_rpc::ChainReader;

/// A ticket together with the transaction that spent it
#[derive(Debug, Clone)]
pub struct SpentTicket {
    pub ticket: Ticket,
    pub spending_tx: RawTransaction,
    pub height_spent: u64,
    pub expiry_height: u64,
}

impl SpentTicket {
    pub fn voted(&self) -> bool {
        self.spending_tx.is_vote()
    }

    /// Best-effort guess at whether a revoked ticket missed its vote.
    ///
    /// Revocation height is the only evidence available. A revocation before
    /// the expiry height means the ticket was called and did not vote. At
    /// expiry, or one block later after the automatic revocation rule change,
    /// the ticket simply expired. Anything later is far more likely an
    /// offline voter than a delayed expiry. The result only feeds statistics.
    pub fn missed(&self) -> bool {
        if self.voted() {
            return false;
        }
        if self.height_spent < self.expiry_height {
            return true;
        }
        if self.height_spent == self.expiry_height || self.height_spent == self.expiry_height + 1
        {
            return false;
        }
        true
    }

    pub fn outcome(&self) -> TicketOutcome {
        if self.voted() {
            TicketOutcome::Voted
        } else if self.missed() {
            TicketOutcome::Missed
        } else {
            TicketOutcome::Expired
        }
    }
}

#[derive(Debug, Default)]
pub struct ScanResult {
    pub spent: Vec<SpentTicket>,
    /// Last block fully inspected; the next scan starts after it
    pub end_height: u64,
}

struct Watched {
    ticket: Ticket,
    script: Vec<u8>,
}

/// Find the transactions spending `tickets` between `start_height` and the tip.
///
/// Tickets whose commitment address cannot be turned into a script are
/// skipped. The scan stops early once every ticket is resolved or when
/// `cancel` fires; [`ScanResult::end_height`] reports how far it got either
/// way. A start beyond the tip scans nothing.
pub async fn find_spent_tickets(
    chain: &dyn ChainReader,
    network: Network,
    tickets: Vec<Ticket>,
    start_height: u64,
    cancel: &CancellationToken,
) -> Result<ScanResult> {
    let tip = chain.get_block_count().await?;
    let mut result = ScanResult {
        spent: Vec::new(),
        end_height: start_height.saturating_sub(1),
    };
    if start_height > tip {
        return Ok(result);
    }

    let mut watched: Vec<Watched> = Vec::with_capacity(tickets.len());
    for ticket in tickets {
        match payment_script(&ticket.commitment_address, network) {
            Ok(script) => watched.push(Watched { ticket, script }),
            Err(e) => {
                error!(
                    ticket = %ticket.hash,
                    address = %ticket.commitment_address,
                    "Cannot watch ticket: {}", e
                );
            }
        }
    }

    debug!(
        tickets = watched.len(),
        from = start_height,
        to = tip,
        "Scanning for spent tickets"
    );

    let mut blocks_fetched = 0usize;
    for height in start_height..=tip {
        if watched.is_empty() || cancel.is_cancelled() {
            break;
        }

        let hash = chain.get_block_hash(height).await?;
        let header = chain.get_block_header(&hash).await?;
        let filter = chain.get_cfilter_v2(&hash).await?;

        let key = key_from_merkle_root(&header.merkleroot);
        if !filter.match_any(&key, watched.iter().map(|w| w.script.as_slice())) {
            result.end_height = height;
            continue;
        }

        let block = chain.get_block(&hash).await?;
        blocks_fetched += 1;

        for tx in &block.rawstx {
            let mut i = 0;
            while i < watched.len() {
                if !tx.spends_ticket(&watched[i].ticket.hash) {
                    i += 1;
                    continue;
                }
                let found = watched.swap_remove(i);
                let expiry_height = found.ticket.expiry_height(network);
                result.spent.push(SpentTicket {
                    ticket: found.ticket,
                    spending_tx: tx.clone(),
                    height_spent: height,
                    expiry_height,
                });
            }
        }

        result.end_height = height;
    }

    info!(
        spent = result.spent.len(),
        blocks_fetched,
        end_height = result.end_height,
        "Spent ticket scan finished"
    );

    Ok(result)
}
