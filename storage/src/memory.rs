//! In-memory ticket store for tests and ephemeral runs

use crate::{Result, StoreError, TicketStore};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use vsp_core::{AltSignAddrData, Hash256, Ticket, VoteChangeRecord, MAX_VOTE_CHANGE_RECORDS};

#[derive(Default)]
struct State {
    tickets: HashMap<Hash256, Ticket>,
    alt_sign_addrs: HashMap<Hash256, AltSignAddrData>,
    vote_changes: HashMap<Hash256, VecDeque<VoteChangeRecord>>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tickets
    pub fn len(&self) -> usize {
        self.state.read().tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().tickets.is_empty()
    }
}

impl TicketStore for MemoryStore {
    fn insert_ticket(&self, ticket: &Ticket) -> Result<()> {
        let mut state = self.state.write();
        if state.tickets.contains_key(&ticket.hash) {
            return Err(StoreError::AlreadyExists(ticket.hash));
        }
        state.tickets.insert(ticket.hash, ticket.clone());
        Ok(())
    }

    fn get_ticket(&self, hash: &Hash256) -> Result<Option<Ticket>> {
        Ok(self.state.read().tickets.get(hash).cloned())
    }

    fn update_ticket(&self, ticket: &Ticket) -> Result<()> {
        let mut state = self.state.write();
        match state.tickets.get_mut(&ticket.hash) {
            Some(existing) => {
                *existing = ticket.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(ticket.hash)),
        }
    }

    fn delete_ticket(&self, ticket: &Ticket) -> Result<()> {
        self.state.write().tickets.remove(&ticket.hash);
        Ok(())
    }

    fn filter_tickets(&self, predicate: &dyn Fn(&Ticket) -> bool) -> Result<Vec<Ticket>> {
        let state = self.state.read();
        let mut tickets: Vec<Ticket> = state
            .tickets
            .values()
            .filter(|t| predicate(t))
            .cloned()
            .collect();
        tickets.sort_by_key(|t| t.hash);
        Ok(tickets)
    }

    fn insert_alt_sign_addr(&self, hash: &Hash256, data: &AltSignAddrData) -> Result<()> {
        let mut state = self.state.write();
        if state.alt_sign_addrs.contains_key(hash) {
            return Err(StoreError::AltSignAddrExists(*hash));
        }
        state.alt_sign_addrs.insert(*hash, data.clone());
        Ok(())
    }

    fn get_alt_sign_addr(&self, hash: &Hash256) -> Result<Option<AltSignAddrData>> {
        Ok(self.state.read().alt_sign_addrs.get(hash).cloned())
    }

    fn delete_alt_sign_addr(&self, hash: &Hash256) -> Result<()> {
        self.state.write().alt_sign_addrs.remove(hash);
        Ok(())
    }

    fn save_vote_change(&self, hash: &Hash256, record: &VoteChangeRecord) -> Result<()> {
        let mut state = self.state.write();
        let log = state.vote_changes.entry(*hash).or_default();
        log.push_back(record.clone());
        while log.len() > MAX_VOTE_CHANGE_RECORDS {
            log.pop_front();
        }
        Ok(())
    }

    fn get_vote_changes(&self, hash: &Hash256) -> Result<Vec<VoteChangeRecord>> {
        Ok(self
            .state
            .read()
            .vote_changes
            .get(hash)
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default())
    }
}
