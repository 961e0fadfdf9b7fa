//! Chain data as reported by the node's verbose RPC results
//!
//! Only the fields needed to confirm tickets and recognise votes and
//! revocations are kept.

use crate::hash::Hash256;
use serde::{Deserialize, Serialize};

/// Script class the node reports for revocation outputs
pub const SCRIPT_CLASS_STAKE_REVOKE: &str = "stakerevoke";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TxInput {
    /// Present only on the stakebase input of a vote
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stakebase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coinbase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txid: Option<Hash256>,
    #[serde(default)]
    pub vout: u32,
    #[serde(default)]
    pub tree: i8,
}

impl TxInput {
    pub fn spending(txid: Hash256, vout: u32, tree: i8) -> Self {
        Self {
            txid: Some(txid),
            vout,
            tree,
            ..Default::default()
        }
    }

    pub fn stakebase() -> Self {
        Self {
            stakebase: Some("0000".to_string()),
            ..Default::default()
        }
    }

    pub fn is_stakebase(&self) -> bool {
        self.stakebase.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ScriptPubKey {
    #[serde(default)]
    pub hex: String,
    #[serde(rename = "type", default)]
    pub script_class: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TxOutput {
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub n: u32,
    #[serde(rename = "scriptPubKey", default)]
    pub script_pub_key: ScriptPubKey,
}

/// Verbose `getrawtransaction` result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTransaction {
    #[serde(default)]
    pub hex: String,
    pub txid: Hash256,
    #[serde(default)]
    pub vin: Vec<TxInput>,
    #[serde(default)]
    pub vout: Vec<TxOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blockhash: Option<Hash256>,
    #[serde(default)]
    pub blockheight: u64,
    /// Zero while in the mempool
    #[serde(default)]
    pub confirmations: i64,
}

impl RawTransaction {
    /// Votes carry a stakebase as their first input
    pub fn is_vote(&self) -> bool {
        self.vin.first().map(TxInput::is_stakebase).unwrap_or(false)
    }

    /// Revocations spend a single ticket and pay only revocation outputs
    pub fn is_revocation(&self) -> bool {
        !self.is_vote()
            && self.vin.len() == 1
            && !self.vout.is_empty()
            && self
                .vout
                .iter()
                .all(|o| o.script_pub_key.script_class == SCRIPT_CLASS_STAKE_REVOKE)
    }

    /// Whether any input consumes output 0 of `ticket`
    pub fn spends_ticket(&self, ticket: &Hash256) -> bool {
        self.vin
            .iter()
            .any(|input| input.txid.as_ref() == Some(ticket) && input.vout == 0)
    }
}

/// Verbose `getblockheader` result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub hash: Hash256,
    pub height: u64,
    pub merkleroot: Hash256,
}

/// Verbose `getblock` result with decoded stake transactions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub hash: Hash256,
    pub height: u64,
    pub merkleroot: Hash256,
    /// Stake tree transactions; votes and revocations only ever live here
    #[serde(default)]
    pub rawstx: Vec<RawTransaction>,
}
