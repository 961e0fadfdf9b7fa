//! RPC error types

use thiserror::Error;

/// JSON-RPC code returned when the node has no information about a transaction
pub const ERR_NO_TX_INFO: i64 = -5;

/// JSON-RPC code returned when a submitted transaction is already known
pub const ERR_DUPLICATE_TX: i64 = -40;

/// How the engine reacts to a failed call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Peer unreachable or misconfigured; retry on the next pass
    Connectivity,
    /// The node no longer knows the transaction
    ChainEviction,
    /// The transaction was already accepted; counts as success
    Duplicate,
    /// The wallet does not recognise the preference key; drop it
    PreferenceRejected,
    /// Anything else; leave the ticket for the next pass
    Transient,
}

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Connection to {addr} failed: {reason}")]
    Connection { addr: String, reason: String },

    #[error("{addr} runs incompatible RPC version {version} (want {required})")]
    IncompatibleVersion {
        addr: String,
        version: String,
        required: String,
    },

    #[error("{addr} is on the wrong network: expected {expected}, got {actual}")]
    WrongNetwork {
        addr: String,
        expected: String,
        actual: String,
    },

    #[error("{addr} does not have the transaction index enabled")]
    TxIndexDisabled { addr: String },

    #[error("RPC error {code}: {message}")]
    Server { code: i64, message: String },

    #[error("Invalid response to {method}: {reason}")]
    InvalidResponse { method: String, reason: String },
}

impl RpcError {
    pub fn connection(addr: impl Into<String>, reason: impl ToString) -> Self {
        Self::Connection {
            addr: addr.into(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid_response(method: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidResponse {
            method: method.into(),
            reason: reason.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection { .. }
            | Self::IncompatibleVersion { .. }
            | Self::WrongNetwork { .. }
            | Self::TxIndexDisabled { .. } => ErrorKind::Connectivity,
            Self::Server { code, message } => classify_server_error(*code, message),
            Self::InvalidResponse { .. } => ErrorKind::Transient,
        }
    }

    pub fn is_chain_eviction(&self) -> bool {
        self.kind() == ErrorKind::ChainEviction
    }

    pub fn is_duplicate(&self) -> bool {
        self.kind() == ErrorKind::Duplicate
    }

    pub fn is_preference_rejected(&self) -> bool {
        self.kind() == ErrorKind::PreferenceRejected
    }
}

fn classify_server_error(code: i64, message: &str) -> ErrorKind {
    if code == ERR_NO_TX_INFO {
        return ErrorKind::ChainEviction;
    }

    let message = message.to_ascii_lowercase();
    if code == ERR_DUPLICATE_TX
        || message.contains("already exists")
        || message.contains("already have transaction")
    {
        return ErrorKind::Duplicate;
    }

    if message.contains("no agenda with id")
        || message.contains("unknown agenda")
        || message.contains("unknown tspend")
        || message.contains("unknown treasury")
    {
        return ErrorKind::PreferenceRejected;
    }

    ErrorKind::Transient
}

pub type Result<T> = std::result::Result<T, RpcError>;
