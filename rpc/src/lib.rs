//! VSP RPC Module
//!
//! JSON-RPC bindings for the chain node and the voting wallets, the
//! capability traits the engine is written against, and the connection
//! manager that validates peers before handing them out.

pub mod client;
pub mod dcrd;
pub mod dialer;
pub mod error;
pub mod manager;
pub mod traits;
pub mod types;
pub mod wallet;

pub use client::{ClientConfig, JsonRpcClient};
pub use dcrd::DcrdRpc;
pub use dialer::{HttpDialer, WalletCredentials};
pub use error::{ErrorKind, Result, RpcError, ERR_DUPLICATE_TX, ERR_NO_TX_INFO};
pub use manager::{ConnectionManager, ConnectionSettings, WalletClients};
pub use traits::{ChainReader, Dialer, WalletVoter};
pub use types::{NodeInfo, TicketInfo, VersionResult, VoteChoiceInfo, WalletInfo};
pub use wallet::WalletRpc;
