//! Sled-based persistence for ticket records
//!
//! One tree per record family, keyed by ticket hash in wire order. Values are
//! bincode encoded. Vote change records are keyed by ticket hash followed by
//! a big-endian id from the database's monotonic generator, so a prefix scan
//! returns them oldest first and concurrent writers never share a key.

use crate::{Result, StoreError, TicketStore};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use tracing::debug;
use vsp_core::{AltSignAddrData, Hash256, Ticket, VoteChangeRecord, MAX_VOTE_CHANGE_RECORDS};

const TICKET_TREE: &str = "ticket";
const ALT_SIGN_TREE: &str = "altsignaddr";
const VOTE_CHANGE_TREE: &str = "votechange";

#[derive(Debug, Clone)]
pub struct SledStore {
    db: sled::Db,
    tickets: sled::Tree,
    alt_sign_addrs: sled::Tree,
    vote_changes: sled::Tree,
}

fn db_err(context: &str, e: sled::Error) -> StoreError {
    StoreError::Database(format!("{}: {}", context, e))
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

impl SledStore {
    /// Open or create the database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let db = sled::open(path).map_err(|e| db_err("Failed to open database", e))?;
        let tickets = db
            .open_tree(TICKET_TREE)
            .map_err(|e| db_err("Failed to open ticket tree", e))?;
        let alt_sign_addrs = db
            .open_tree(ALT_SIGN_TREE)
            .map_err(|e| db_err("Failed to open alt sign tree", e))?;
        let vote_changes = db
            .open_tree(VOTE_CHANGE_TREE)
            .map_err(|e| db_err("Failed to open vote change tree", e))?;

        debug!(path = %path.display(), tickets = tickets.len(), "Opened ticket database");
        Ok(Self {
            db,
            tickets,
            alt_sign_addrs,
            vote_changes,
        })
    }

    /// Flush pending writes to disk
    pub fn flush(&self) -> Result<()> {
        self.db
            .flush()
            .map_err(|e| db_err("Failed to flush database", e))?;
        Ok(())
    }

    fn vote_change_key(hash: &Hash256, id: u64) -> Vec<u8> {
        let mut key = hash.as_bytes().to_vec();
        key.extend_from_slice(&id.to_be_bytes());
        key
    }
}

impl TicketStore for SledStore {
    fn insert_ticket(&self, ticket: &Ticket) -> Result<()> {
        let value = encode(ticket)?;
        let swapped = self
            .tickets
            .compare_and_swap(ticket.hash.as_bytes(), None as Option<&[u8]>, Some(value))
            .map_err(|e| db_err("Failed to insert ticket", e))?;
        if swapped.is_err() {
            return Err(StoreError::AlreadyExists(ticket.hash));
        }
        Ok(())
    }

    fn get_ticket(&self, hash: &Hash256) -> Result<Option<Ticket>> {
        match self
            .tickets
            .get(hash.as_bytes())
            .map_err(|e| db_err("Failed to load ticket", e))?
        {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn update_ticket(&self, ticket: &Ticket) -> Result<()> {
        let value = encode(ticket)?;
        // A deleted ticket stays deleted
        let previous = self
            .tickets
            .fetch_and_update(ticket.hash.as_bytes(), |old| old.map(|_| value.clone()))
            .map_err(|e| db_err("Failed to update ticket", e))?;
        if previous.is_none() {
            return Err(StoreError::NotFound(ticket.hash));
        }
        Ok(())
    }

    fn delete_ticket(&self, ticket: &Ticket) -> Result<()> {
        self.tickets
            .remove(ticket.hash.as_bytes())
            .map_err(|e| db_err("Failed to delete ticket", e))?;
        Ok(())
    }

    fn filter_tickets(&self, predicate: &dyn Fn(&Ticket) -> bool) -> Result<Vec<Ticket>> {
        let mut tickets = Vec::new();
        for entry in self.tickets.iter() {
            let (_, bytes) = entry.map_err(|e| db_err("Failed to iterate tickets", e))?;
            let ticket: Ticket = decode(&bytes)?;
            if predicate(&ticket) {
                tickets.push(ticket);
            }
        }
        Ok(tickets)
    }

    fn insert_alt_sign_addr(&self, hash: &Hash256, data: &AltSignAddrData) -> Result<()> {
        let swapped = self
            .alt_sign_addrs
            .compare_and_swap(hash.as_bytes(), None as Option<&[u8]>, Some(encode(data)?))
            .map_err(|e| db_err("Failed to insert alt sign address", e))?;
        if swapped.is_err() {
            return Err(StoreError::AltSignAddrExists(*hash));
        }
        Ok(())
    }

    fn get_alt_sign_addr(&self, hash: &Hash256) -> Result<Option<AltSignAddrData>> {
        match self
            .alt_sign_addrs
            .get(hash.as_bytes())
            .map_err(|e| db_err("Failed to load alt sign address", e))?
        {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn delete_alt_sign_addr(&self, hash: &Hash256) -> Result<()> {
        self.alt_sign_addrs
            .remove(hash.as_bytes())
            .map_err(|e| db_err("Failed to delete alt sign address", e))?;
        Ok(())
    }

    fn save_vote_change(&self, hash: &Hash256, record: &VoteChangeRecord) -> Result<()> {
        let prefix = hash.as_bytes();

        let id = self
            .db
            .generate_id()
            .map_err(|e| db_err("Failed to allocate vote change id", e))?;
        self.vote_changes
            .insert(Self::vote_change_key(hash, id), encode(record)?)
            .map_err(|e| db_err("Failed to save vote change", e))?;

        let keys: Vec<sled::IVec> = self
            .vote_changes
            .scan_prefix(prefix)
            .keys()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| db_err("Failed to scan vote changes", e))?;
        if keys.len() > MAX_VOTE_CHANGE_RECORDS {
            debug!(
                ticket = %hash,
                evicted = keys.len() - MAX_VOTE_CHANGE_RECORDS,
                "Evicting oldest vote change records"
            );
            for key in &keys[..keys.len() - MAX_VOTE_CHANGE_RECORDS] {
                self.vote_changes
                    .remove(key)
                    .map_err(|e| db_err("Failed to evict vote change", e))?;
            }
        }

        Ok(())
    }

    fn get_vote_changes(&self, hash: &Hash256) -> Result<Vec<VoteChangeRecord>> {
        let mut records = Vec::new();
        for entry in self.vote_changes.scan_prefix(hash.as_bytes()) {
            let (_, bytes) = entry.map_err(|e| db_err("Failed to scan vote changes", e))?;
            records.push(decode(&bytes)?);
        }
        Ok(records)
    }
}
