//! Dialer for real peers over HTTP JSON-RPC

use crate::client::{ClientConfig, JsonRpcClient};
use crate::dcrd::DcrdRpc;
use crate::error::Result;
use crate::traits::{ChainReader, Dialer, WalletVoter};
use crate::wallet::WalletRpc;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Credentials shared by every configured wallet
#[derive(Debug, Clone)]
pub struct WalletCredentials {
    pub user: String,
    pub pass: String,
    pub root_cert: Option<Vec<u8>>,
}

pub struct HttpDialer {
    chain: ClientConfig,
    wallets: WalletCredentials,
    timeout: Duration,
}

impl HttpDialer {
    pub fn new(chain: ClientConfig, wallets: WalletCredentials, timeout: Duration) -> Self {
        Self {
            chain,
            wallets,
            timeout,
        }
    }
}

#[async_trait]
impl Dialer for HttpDialer {
    async fn dial_chain(&self) -> Result<Arc<dyn ChainReader>> {
        debug!(peer = %self.chain.addr, "dialing chain node");
        let client = JsonRpcClient::new(self.chain.clone())?;
        Ok(Arc::new(DcrdRpc::new(client)))
    }

    async fn dial_wallet(&self, addr: &str) -> Result<Arc<dyn WalletVoter>> {
        debug!(peer = %addr, "dialing wallet");
        let client = JsonRpcClient::new(ClientConfig {
            addr: addr.to_string(),
            user: self.wallets.user.clone(),
            pass: self.wallets.pass.clone(),
            timeout: self.timeout,
            root_cert: self.wallets.root_cert.clone(),
        })?;
        Ok(Arc::new(WalletRpc::new(client)))
    }
}
