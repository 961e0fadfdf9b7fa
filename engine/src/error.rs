//! Engine error types

use thiserror::Error;
use vsp_core::Hash256;
use vsp_rpc::RpcError;
use vsp_storage::StoreError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Transaction {0} is not mined yet")]
    NotMined(Hash256),
}

pub type Result<T> = std::result::Result<T, EngineError>;
