//! Commitment address decoding
//!
//! A vote or revocation pays the ticket's stake back to its commitment
//! address, so the address's payment script is what the block filters are
//! queried with.

use crate::network::Network;
use thiserror::Error;

const OP_DUP: u8 = 0x76;
const OP_HASH160: u8 = 0xa9;
const OP_DATA_20: u8 = 0x14;
const OP_EQUAL: u8 = 0x87;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_CHECKSIG: u8 = 0xac;

/// prefix(2) + hash160(20) + checksum(4)
const DECODED_ADDRESS_LEN: usize = 26;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Invalid base58 encoding: {0}")]
    InvalidEncoding(String),

    #[error("Invalid address length: {0} bytes")]
    InvalidLength(usize),

    #[error("Address prefix {prefix:02x?} is not valid for {network}")]
    WrongNetwork { prefix: [u8; 2], network: Network },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    PubKeyHash,
    ScriptHash,
}

/// Decoded commitment address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitmentAddress {
    pub kind: AddressKind,
    pub hash160: [u8; 20],
}

impl CommitmentAddress {
    /// Decode a base58 address for the given network.
    ///
    /// Checksums are not verified here; addresses reach the store only after
    /// the request layer has validated them.
    pub fn decode(address: &str, network: Network) -> Result<Self, AddressError> {
        let bytes = bs58::decode(address)
            .into_vec()
            .map_err(|e| AddressError::InvalidEncoding(e.to_string()))?;

        if bytes.len() != DECODED_ADDRESS_LEN {
            return Err(AddressError::InvalidLength(bytes.len()));
        }

        let prefix = [bytes[0], bytes[1]];
        let kind = if prefix == network.pubkey_hash_addr_id() {
            AddressKind::PubKeyHash
        } else if prefix == network.script_hash_addr_id() {
            AddressKind::ScriptHash
        } else {
            return Err(AddressError::WrongNetwork { prefix, network });
        };

        let mut hash160 = [0u8; 20];
        hash160.copy_from_slice(&bytes[2..22]);

        Ok(Self { kind, hash160 })
    }

    /// Output script paying to this address
    pub fn payment_script(&self) -> Vec<u8> {
        match self.kind {
            AddressKind::PubKeyHash => {
                let mut script = Vec::with_capacity(25);
                script.extend_from_slice(&[OP_DUP, OP_HASH160, OP_DATA_20]);
                script.extend_from_slice(&self.hash160);
                script.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
                script
            }
            AddressKind::ScriptHash => {
                let mut script = Vec::with_capacity(23);
                script.extend_from_slice(&[OP_HASH160, OP_DATA_20]);
                script.extend_from_slice(&self.hash160);
                script.push(OP_EQUAL);
                script
            }
        }
    }
}

/// Payment script for a commitment address string
pub fn payment_script(address: &str, network: Network) -> Result<Vec<u8>, AddressError> {
    Ok(CommitmentAddress::decode(address, network)?.payment_script())
}
