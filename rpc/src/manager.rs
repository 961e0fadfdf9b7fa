//! Peer connection manager
//!
//! Hands out validated sessions to the chain node and to every configured
//! voting wallet. Sessions are cached until they report a dropped
//! connection, then dialed and validated again on the next request.

use crate::error::{Result, RpcError};
use crate::traits::{ChainReader, Dialer, WalletVoter};
use futures::future::join_all;
use semver::VersionReq;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use vsp_core::Network;

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub network: Network,
    pub wallet_addrs: Vec<String>,
    pub chain_version_req: VersionReq,
    pub wallet_version_req: VersionReq,
    /// Upper bound on dialing plus validating one peer
    pub dial_timeout: Duration,
}

/// Outcome of connecting to every configured wallet
pub struct WalletClients {
    pub clients: Vec<Arc<dyn WalletVoter>>,
    /// Addresses that could not be dialed or failed validation
    pub failed: Vec<String>,
}

pub struct ConnectionManager {
    settings: ConnectionSettings,
    dialer: Arc<dyn Dialer>,
    chain: Mutex<Option<Arc<dyn ChainReader>>>,
    wallets: RwLock<HashMap<String, Arc<dyn WalletVoter>>>,
}

impl ConnectionManager {
    pub fn new(settings: ConnectionSettings, dialer: Arc<dyn Dialer>) -> Self {
        Self {
            settings,
            dialer,
            chain: Mutex::new(None),
            wallets: RwLock::new(HashMap::new()),
        }
    }

    pub fn network(&self) -> Network {
        self.settings.network
    }

    pub fn wallet_addrs(&self) -> &[String] {
        &self.settings.wallet_addrs
    }

    /// Validated session to the chain node.
    ///
    /// Do not hold on to the handle across passes; ask again so a dropped
    /// session gets replaced.
    pub async fn chain_client(&self) -> Result<Arc<dyn ChainReader>> {
        let mut cached = self.chain.lock().await;
        if let Some(client) = cached.as_ref() {
            if client.is_connected() {
                return Ok(client.clone());
            }
            info!(peer = %client.address(), "chain node connection lost, reconnecting");
        }
        *cached = None;

        let client = tokio::time::timeout(self.settings.dial_timeout, self.connect_chain())
            .await
            .map_err(|_| RpcError::connection("chain node", "dial timed out"))??;

        info!(peer = %client.address(), "connected to chain node");
        *cached = Some(client.clone());
        Ok(client)
    }

    async fn connect_chain(&self) -> Result<Arc<dyn ChainReader>> {
        let client = self.dialer.dial_chain().await?;
        let addr = client.address().to_string();

        let version = client.version().await?;
        if !self.settings.chain_version_req.matches(&version.to_semver()) {
            return Err(RpcError::IncompatibleVersion {
                addr,
                version: version.to_string(),
                required: self.settings.chain_version_req.to_string(),
            });
        }

        self.check_network(&addr, client.current_net().await?)?;

        if !client.node_info().await?.txindex {
            return Err(RpcError::TxIndexDisabled { addr });
        }

        Ok(client)
    }

    fn check_network(&self, addr: &str, magic: u32) -> Result<()> {
        let expected = self.settings.network.wire_magic();
        if magic != expected {
            return Err(RpcError::WrongNetwork {
                addr: addr.to_string(),
                expected: self.settings.network.to_string(),
                actual: format!("{:#010x}", magic),
            });
        }
        Ok(())
    }

    /// Connect to every configured wallet independently.
    ///
    /// A wallet that cannot be reached does not stop the others; its
    /// address is reported in [`WalletClients::failed`].
    pub async fn wallet_clients(&self) -> WalletClients {
        let attempts = self
            .settings
            .wallet_addrs
            .iter()
            .map(|addr| async move { (addr, self.wallet_client(addr).await) });

        let mut clients = Vec::new();
        let mut failed = Vec::new();
        for (addr, result) in join_all(attempts).await {
            match result {
                Ok(client) => clients.push(client),
                Err(e) => {
                    warn!(wallet = %addr, "wallet connection failed: {}", e);
                    failed.push(addr.clone());
                }
            }
        }

        WalletClients { clients, failed }
    }

    async fn wallet_client(&self, addr: &str) -> Result<Arc<dyn WalletVoter>> {
        if let Some(client) = self.wallets.read().await.get(addr) {
            if client.is_connected() {
                return Ok(client.clone());
            }
        }
        self.wallets.write().await.remove(addr);

        let client = tokio::time::timeout(self.settings.dial_timeout, self.connect_wallet(addr))
            .await
            .map_err(|_| RpcError::connection(addr, "dial timed out"))??;

        info!(wallet = %addr, "connected to voting wallet");
        self.wallets
            .write()
            .await
            .insert(addr.to_string(), client.clone());
        Ok(client)
    }

    async fn connect_wallet(&self, addr: &str) -> Result<Arc<dyn WalletVoter>> {
        let client = self.dialer.dial_wallet(addr).await?;

        let version = client.version().await?;
        if !self.settings.wallet_version_req.matches(&version.to_semver()) {
            return Err(RpcError::IncompatibleVersion {
                addr: addr.to_string(),
                version: version.to_string(),
                required: self.settings.wallet_version_req.to_string(),
            });
        }

        self.check_network(addr, client.current_net().await?)?;

        // A locked or non-voting wallet still accepts tickets and preferences
        let status = client.wallet_info().await?;
        if !status.daemonconnected {
            warn!(wallet = %addr, "wallet is not connected to its chain node");
        }
        if !status.unlocked {
            warn!(wallet = %addr, "wallet is not unlocked");
        }
        if !status.voting {
            warn!(wallet = %addr, "wallet is not voting");
        }
        debug!(wallet = %addr, version = %version, "wallet validated");

        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NodeInfo, TicketInfo, VersionResult, WalletInfo};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use vsp_core::{Block, BlockHeader, CompactFilter, Hash256, RawTransaction};

    fn unsupported<T>(method: &str) -> Result<T> {
        Err(RpcError::invalid_response(method, "not supported by stub"))
    }

    struct StubChain {
        api: VersionResult,
        net: u32,
        txindex: bool,
        connected: AtomicBool,
    }

    #[async_trait]
    impl ChainReader for StubChain {
        fn address(&self) -> &str {
            "chain:9109"
        }
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
        async fn version(&self) -> Result<VersionResult> {
            Ok(self.api.clone())
        }
        async fn current_net(&self) -> Result<u32> {
            Ok(self.net)
        }
        async fn node_info(&self) -> Result<NodeInfo> {
            Ok(NodeInfo {
                blocks: 0,
                txindex: self.txindex,
            })
        }
        async fn get_raw_transaction(&self, _: &Hash256) -> Result<RawTransaction> {
            unsupported("getrawtransaction")
        }
        async fn send_raw_transaction(&self, _: &str) -> Result<Hash256> {
            unsupported("sendrawtransaction")
        }
        async fn get_block_count(&self) -> Result<u64> {
            Ok(0)
        }
        async fn get_block_hash(&self, _: u64) -> Result<Hash256> {
            unsupported("getblockhash")
        }
        async fn get_block_header(&self, _: &Hash256) -> Result<BlockHeader> {
            unsupported("getblockheader")
        }
        async fn get_cfilter_v2(&self, _: &Hash256) -> Result<CompactFilter> {
            unsupported("getcfilterv2")
        }
        async fn get_block(&self, _: &Hash256) -> Result<Block> {
            unsupported("getblock")
        }
    }

    struct StubWallet {
        addr: String,
        net: u32,
        info: WalletInfo,
    }

    #[async_trait]
    impl WalletVoter for StubWallet {
        fn address(&self) -> &str {
            &self.addr
        }
        fn is_connected(&self) -> bool {
            true
        }
        async fn version(&self) -> Result<VersionResult> {
            Ok(VersionResult {
                major: 9,
                minor: 0,
                patch: 0,
            })
        }
        async fn current_net(&self) -> Result<u32> {
            Ok(self.net)
        }
        async fn wallet_info(&self) -> Result<WalletInfo> {
            Ok(self.info.clone())
        }
        async fn ticket_info(&self, _: u64) -> Result<HashMap<Hash256, TicketInfo>> {
            Ok(HashMap::new())
        }
        async fn add_ticket_for_voting(&self, _: &str, _: &Hash256, _: &str) -> Result<()> {
            Ok(())
        }
        async fn set_vote_choice(&self, _: &str, _: &str, _: &Hash256) -> Result<()> {
            Ok(())
        }
        async fn set_tspend_policy(&self, _: &str, _: &str, _: &Hash256) -> Result<()> {
            Ok(())
        }
        async fn set_treasury_policy(&self, _: &str, _: &str, _: &Hash256) -> Result<()> {
            Ok(())
        }
        async fn rescan_from(&self, _: u64) -> Result<()> {
            Ok(())
        }
    }

    struct StubDialer {
        chain_api_major: u64,
        chain_net: u32,
        txindex: bool,
        wrong_net_wallet: Option<String>,
        down_wallet: Option<String>,
        chain_dials: AtomicUsize,
        last_chain: std::sync::Mutex<Option<Arc<StubChain>>>,
    }

    impl StubDialer {
        fn healthy() -> Self {
            Self {
                chain_api_major: 8,
                chain_net: Network::Testnet.wire_magic(),
                txindex: true,
                wrong_net_wallet: None,
                down_wallet: None,
                chain_dials: AtomicUsize::new(0),
                last_chain: std::sync::Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl Dialer for StubDialer {
        async fn dial_chain(&self) -> Result<Arc<dyn ChainReader>> {
            self.chain_dials.fetch_add(1, Ordering::SeqCst);
            let chain = Arc::new(StubChain {
                api: VersionResult {
                    major: self.chain_api_major,
                    minor: 1,
                    patch: 0,
                },
                net: self.chain_net,
                txindex: self.txindex,
                connected: AtomicBool::new(true),
            });
            *self.last_chain.lock().unwrap() = Some(chain.clone());
            Ok(chain)
        }

        async fn dial_wallet(&self, addr: &str) -> Result<Arc<dyn WalletVoter>> {
            if self.down_wallet.as_deref() == Some(addr) {
                return Err(RpcError::connection(addr, "connection refused"));
            }
            let net = if self.wrong_net_wallet.as_deref() == Some(addr) {
                Network::Mainnet.wire_magic()
            } else {
                Network::Testnet.wire_magic()
            };
            Ok(Arc::new(StubWallet {
                addr: addr.to_string(),
                net,
                info: WalletInfo {
                    daemonconnected: true,
                    unlocked: false,
                    voting: false,
                },
            }))
        }
    }

    fn settings(wallets: &[&str]) -> ConnectionSettings {
        ConnectionSettings {
            network: Network::Testnet,
            wallet_addrs: wallets.iter().map(|w| w.to_string()).collect(),
            chain_version_req: VersionReq::parse("^8.0.0").unwrap(),
            wallet_version_req: VersionReq::parse("^9.0.0").unwrap(),
            dial_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_chain_client_is_cached_until_disconnected() {
        let dialer = Arc::new(StubDialer::healthy());
        let manager = ConnectionManager::new(settings(&["w1"]), dialer.clone());

        manager.chain_client().await.unwrap();
        manager.chain_client().await.unwrap();
        assert_eq!(dialer.chain_dials.load(Ordering::SeqCst), 1);

        let chain = dialer.last_chain.lock().unwrap().clone().unwrap();
        chain.connected.store(false, Ordering::SeqCst);

        manager.chain_client().await.unwrap();
        assert_eq!(dialer.chain_dials.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_chain_client_rejects_incompatible_version() {
        let dialer = Arc::new(StubDialer {
            chain_api_major: 7,
            ..StubDialer::healthy()
        });
        let manager = ConnectionManager::new(settings(&["w1"]), dialer);
        let err = manager.chain_client().await.err().unwrap();
        assert!(matches!(err, RpcError::IncompatibleVersion { .. }));
    }

    #[tokio::test]
    async fn test_chain_client_rejects_wrong_network() {
        let dialer = Arc::new(StubDialer {
            chain_net: Network::Mainnet.wire_magic(),
            ..StubDialer::healthy()
        });
        let manager = ConnectionManager::new(settings(&["w1"]), dialer);
        let err = manager.chain_client().await.err().unwrap();
        assert!(matches!(err, RpcError::WrongNetwork { .. }));
    }

    #[tokio::test]
    async fn test_chain_client_requires_txindex() {
        let dialer = Arc::new(StubDialer {
            txindex: false,
            ..StubDialer::healthy()
        });
        let manager = ConnectionManager::new(settings(&["w1"]), dialer);
        let err = manager.chain_client().await.err().unwrap();
        assert!(matches!(err, RpcError::TxIndexDisabled { .. }));
    }

    #[tokio::test]
    async fn test_wallet_failures_are_isolated() {
        let dialer = Arc::new(StubDialer {
            wrong_net_wallet: Some("w2".to_string()),
            down_wallet: Some("w3".to_string()),
            ..StubDialer::healthy()
        });
        let manager = ConnectionManager::new(settings(&["w1", "w2", "w3", "w4"]), dialer);

        let wallets = manager.wallet_clients().await;
        let live: Vec<&str> = wallets.clients.iter().map(|w| w.address()).collect();
        assert_eq!(live, vec!["w1", "w4"]);
        assert_eq!(wallets.failed, vec!["w2".to_string(), "w3".to_string()]);
    }
}
