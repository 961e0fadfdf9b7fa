//! Network parameters relevant to ticket lifecycle tracking

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    Simnet,
}

impl Network {
    /// Blocks a ticket must wait after being mined before it can vote
    pub fn ticket_maturity(&self) -> u64 {
        match self {
            Self::Mainnet => 256,
            Self::Testnet => 16,
            Self::Simnet => 16,
        }
    }

    /// Blocks after maturity during which a ticket may be selected to vote
    pub fn ticket_expiry(&self) -> u64 {
        match self {
            Self::Mainnet => 40960,
            Self::Testnet => 6144,
            Self::Simnet => 384,
        }
    }

    /// Wire magic reported by `getcurrentnet`
    pub fn wire_magic(&self) -> u32 {
        match self {
            Self::Mainnet => 0xd9b4_00f9,
            Self::Testnet => 0xb194_aa75,
            Self::Simnet => 0x1214_1c16,
        }
    }

    /// Two-byte prefix of pay-to-pubkey-hash addresses
    pub fn pubkey_hash_addr_id(&self) -> [u8; 2] {
        match self {
            Self::Mainnet => [0x07, 0x3f],
            Self::Testnet => [0x0f, 0x21],
            Self::Simnet => [0x0e, 0x91],
        }
    }

    /// Two-byte prefix of pay-to-script-hash addresses
    pub fn script_hash_addr_id(&self) -> [u8; 2] {
        match self {
            Self::Mainnet => [0x07, 0x1a],
            Self::Testnet => [0x0e, 0xfc],
            Self::Simnet => [0x0e, 0x6c],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
            Self::Simnet => "simnet",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Self::Mainnet),
            "testnet" | "testnet3" => Ok(Self::Testnet),
            "simnet" => Ok(Self::Simnet),
            other => Err(format!("Unknown network: {}", other)),
        }
    }
}
