//! Capabilities the engine consumes from its peers
//!
//! The engine never sees a concrete RPC client. It holds a [`ChainReader`]
//! for the node and one [`WalletVoter`] per voting wallet, both produced by
//! a [`Dialer`], so tests can run the whole pipeline against in-memory
//! doubles.

use crate::error::Result;
use crate::types::{NodeInfo, TicketInfo, VersionResult, WalletInfo};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use vsp_core::{Block, BlockHeader, CompactFilter, Hash256, RawTransaction};

/// Read access to the chain node, plus transaction relay
#[async_trait]
pub trait ChainReader: Send + Sync {
    fn address(&self) -> &str;

    /// False once the underlying session has dropped
    fn is_connected(&self) -> bool;

    /// Version of the node's JSON-RPC API
    async fn version(&self) -> Result<VersionResult>;

    /// Wire magic of the network the node runs on
    async fn current_net(&self) -> Result<u32>;

    async fn node_info(&self) -> Result<NodeInfo>;

    /// Verbose transaction lookup. Fails with a chain eviction error when the
    /// node has never seen the transaction or has dropped it.
    async fn get_raw_transaction(&self, txid: &Hash256) -> Result<RawTransaction>;

    async fn send_raw_transaction(&self, tx_hex: &str) -> Result<Hash256>;

    async fn get_block_count(&self) -> Result<u64>;

    async fn get_block_hash(&self, height: u64) -> Result<Hash256>;

    async fn get_block_header(&self, hash: &Hash256) -> Result<BlockHeader>;

    async fn get_cfilter_v2(&self, hash: &Hash256) -> Result<CompactFilter>;

    /// Full block with decoded stake transactions
    async fn get_block(&self, hash: &Hash256) -> Result<Block>;
}

/// A voting wallet replica
#[async_trait]
pub trait WalletVoter: Send + Sync {
    fn address(&self) -> &str;

    fn is_connected(&self) -> bool;

    async fn version(&self) -> Result<VersionResult>;

    async fn current_net(&self) -> Result<u32>;

    async fn wallet_info(&self) -> Result<WalletInfo>;

    /// Tickets the wallet holds, bought at or after `start_height`
    async fn ticket_info(&self, start_height: u64) -> Result<HashMap<Hash256, TicketInfo>>;

    /// Import the voting key without a rescan, then attach the ticket purchase
    async fn add_ticket_for_voting(
        &self,
        voting_wif: &str,
        block_hash: &Hash256,
        ticket_hex: &str,
    ) -> Result<()>;

    async fn set_vote_choice(&self, agenda: &str, choice: &str, ticket: &Hash256) -> Result<()>;

    async fn set_tspend_policy(&self, tspend: &str, policy: &str, ticket: &Hash256)
        -> Result<()>;

    async fn set_treasury_policy(&self, key: &str, policy: &str, ticket: &Hash256)
        -> Result<()>;

    async fn rescan_from(&self, height: u64) -> Result<()>;
}

/// Opens sessions to peers. Validation is left to the connection manager.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial_chain(&self) -> Result<Arc<dyn ChainReader>>;

    async fn dial_wallet(&self, addr: &str) -> Result<Arc<dyn WalletVoter>>;
}
