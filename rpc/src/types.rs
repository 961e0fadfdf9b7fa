//! Result shapes of the node and wallet RPC methods the engine calls

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use vsp_core::Hash256;

/// Key of the node's API version in the `version` result
pub const CHAIN_API_KEY: &str = "dcrdjsonrpcapi";

/// Key of the wallet's API version in the `version` result
pub const WALLET_API_KEY: &str = "dcrwalletjsonrpcapi";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionResult {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl VersionResult {
    pub fn to_semver(&self) -> semver::Version {
        semver::Version::new(self.major, self.minor, self.patch)
    }
}

impl fmt::Display for VersionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// `version` returns one entry per component
pub type VersionMap = HashMap<String, VersionResult>;

/// Subset of `getinfo`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeInfo {
    #[serde(default)]
    pub blocks: u64,
    #[serde(default)]
    pub txindex: bool,
}

/// Subset of `walletinfo`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WalletInfo {
    #[serde(default)]
    pub daemonconnected: bool,
    #[serde(default)]
    pub unlocked: bool,
    #[serde(default)]
    pub voting: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteChoiceInfo {
    pub agendaid: String,
    pub choiceid: String,
}

/// One entry of the wallet's `ticketinfo` list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketInfo {
    pub hash: Hash256,
    #[serde(default)]
    pub blockheight: i64,
    #[serde(default)]
    pub choices: Vec<VoteChoiceInfo>,
}

impl TicketInfo {
    /// The choice the wallet would currently vote for `agenda`
    pub fn choice_for(&self, agenda: &str) -> Option<&str> {
        self.choices
            .iter()
            .find(|c| c.agendaid == agenda)
            .map(|c| c.choiceid.as_str())
    }
}

/// `getcfilterv2` result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CFilterV2Result {
    pub blockhash: Hash256,
    /// Hex encoded filter bytes
    pub data: String,
    #[serde(default)]
    pub proofindex: u32,
    #[serde(default)]
    pub proofhashes: Vec<String>,
}
