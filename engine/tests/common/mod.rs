//! In-memory chain node and voting wallets for engine tests
#![allow(dead_code)]

use async_trait::async_trait;
use semver::VersionReq;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use vsp_core::{
    key_from_merkle_root, payment_script, Block, BlockHeader, CompactFilter, FeeStatus, Hash256,
    Network, RawTransaction, ScriptPubKey, Ticket, TxInput, TxOutput,
};
use vsp_engine::Engine;
use vsp_rpc::{
    ChainReader, ConnectionManager, ConnectionSettings, Dialer, NodeInfo, Result, RpcError,
    TicketInfo, VersionResult, VoteChoiceInfo, WalletInfo, WalletVoter,
};
use vsp_storage::{MemoryStore, TicketStore};

pub const NETWORK: Network = Network::Simnet;

pub fn hash(tag: u8, n: u64) -> Hash256 {
    let mut bytes = [tag; 32];
    bytes[..8].copy_from_slice(&n.to_le_bytes());
    Hash256::from_bytes(bytes)
}

/// P2PKH commitment address on the test network
pub fn commitment_address(n: u8) -> String {
    let mut raw = NETWORK.pubkey_hash_addr_id().to_vec();
    raw.extend_from_slice(&[n; 20]);
    raw.extend_from_slice(&[0u8; 4]);
    bs58::encode(raw).into_string()
}

fn server_error(code: i64, message: &str) -> RpcError {
    RpcError::Server {
        code,
        message: message.to_string(),
    }
}

fn output(class: &str, script: &[u8]) -> TxOutput {
    TxOutput {
        value: 1.0,
        n: 0,
        script_pub_key: ScriptPubKey {
            hex: hex_string(script),
            script_class: class.to_string(),
        },
    }
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

struct SimTx {
    tx: RawTransaction,
    height: Option<u64>,
    /// Scripts this transaction contributes to its block filter
    filter_scripts: Vec<Vec<u8>>,
}

struct SimBlock {
    hash: Hash256,
    merkleroot: Hash256,
    stake_txs: Vec<Hash256>,
    scripts: Vec<Vec<u8>>,
}

#[derive(Default)]
struct ChainState {
    blocks: Vec<SimBlock>,
    txs: HashMap<Hash256, SimTx>,
    mempool: Vec<Hash256>,
    relayable: HashMap<String, Hash256>,
    rejected: HashSet<String>,
    next_spend: u64,
}

impl ChainState {
    fn tip(&self) -> u64 {
        self.blocks.len() as u64 - 1
    }

    fn block_by_hash(&self, hash: &Hash256) -> Option<(u64, &SimBlock)> {
        self.blocks
            .iter()
            .enumerate()
            .find(|(_, b)| b.hash == *hash)
            .map(|(h, b)| (h as u64, b))
    }

    fn push_block(&mut self) -> u64 {
        let height = self.blocks.len() as u64;
        let mut block = SimBlock {
            hash: hash(0xb1, height),
            merkleroot: hash(0x3e, height),
            stake_txs: Vec::new(),
            // Unrelated payout so filters are never empty
            scripts: vec![vec![0x76, 0xa9, 0x14, height as u8, 0x88, 0xac]],
        };

        for txid in std::mem::take(&mut self.mempool) {
            if let Some(sim) = self.txs.get_mut(&txid) {
                sim.height = Some(height);
                if sim.tx.is_vote() || sim.tx.is_revocation() {
                    block.stake_txs.push(txid);
                }
                block.scripts.extend(sim.filter_scripts.iter().cloned());
            }
        }

        self.blocks.push(block);
        height
    }

    fn insert_mempool(&mut self, tx: RawTransaction, filter_scripts: Vec<Vec<u8>>) {
        let txid = tx.txid;
        self.txs.insert(
            txid,
            SimTx {
                tx,
                height: None,
                filter_scripts,
            },
        );
        self.mempool.push(txid);
    }
}

/// Chain node double with a mempool, blocks and version 2 filters
pub struct SimChain {
    state: Mutex<ChainState>,
    online: AtomicBool,
    pub blocks_fetched: AtomicUsize,
    pub broadcasts: AtomicUsize,
}

impl SimChain {
    pub fn new() -> Self {
        let mut state = ChainState::default();
        state.push_block();
        Self {
            state: Mutex::new(state),
            online: AtomicBool::new(true),
            blocks_fetched: AtomicUsize::new(0),
            broadcasts: AtomicUsize::new(0),
        }
    }

    pub fn tip(&self) -> u64 {
        self.state.lock().unwrap().tip()
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RpcError::connection("simchain", "connection refused"))
        }
    }

    /// Mine the mempool into one block and return its height
    pub fn mine_block(&self) -> u64 {
        self.state.lock().unwrap().push_block()
    }

    pub fn mine_to(&self, height: u64) {
        let mut state = self.state.lock().unwrap();
        while state.tip() < height {
            state.push_block();
        }
    }

    pub fn block_height(&self, hash: &Hash256) -> Option<u64> {
        self.state.lock().unwrap().block_by_hash(hash).map(|(h, _)| h)
    }

    pub fn txid_for_hex(&self, tx_hex: &str) -> Option<Hash256> {
        let state = self.state.lock().unwrap();
        state
            .txs
            .values()
            .find(|sim| sim.tx.hex == tx_hex)
            .map(|sim| sim.tx.txid)
    }

    /// Put a ticket purchase in the mempool
    pub fn purchase_ticket(&self, n: u8) -> Ticket {
        let txid = hash(0x71, n as u64);
        let tx = RawTransaction {
            hex: format!("ticket-{}", n),
            txid,
            vin: vec![TxInput::spending(hash(0x11, n as u64), 0, 0)],
            vout: vec![output("stakesubmission", &[0xba, n])],
            blockhash: None,
            blockheight: 0,
            confirmations: 0,
        };
        self.state.lock().unwrap().insert_mempool(tx, Vec::new());

        let mut ticket = Ticket::new(txid, commitment_address(n));
        ticket.voting_wif = format!("wif-{}", n);
        ticket.fee_address = format!("fee-address-{}", n);
        ticket.fee_address_index = n as u32;
        ticket.fee_amount = 10_000;
        ticket
    }

    /// Give `ticket` a fee transaction the node will accept
    pub fn attach_fee(&self, ticket: &mut Ticket, n: u8) {
        let tx_hex = format!("fee-{}", n);
        let txid = hash(0xfe, n as u64);
        ticket.fee_tx_hex = tx_hex.clone();
        ticket.fee_tx_hash = Some(txid);
        ticket.fee_tx_status = FeeStatus::Received;
        self.state.lock().unwrap().relayable.insert(tx_hex, txid);
    }

    /// Relay a fee through some other node, straight into the mempool
    pub fn submit_fee(&self, ticket: &Ticket) {
        let mut state = self.state.lock().unwrap();
        let Some(txid) = state.relayable.get(&ticket.fee_tx_hex).copied() else {
            return;
        };
        let tx = RawTransaction {
            hex: ticket.fee_tx_hex.clone(),
            txid,
            vin: vec![TxInput::spending(hash(0x22, 0), 0, 0)],
            vout: vec![output("pubkeyhash", &[0x76, 0xa9])],
            blockhash: None,
            blockheight: 0,
            confirmations: 0,
        };
        state.insert_mempool(tx, Vec::new());
    }

    pub fn reject_broadcast(&self, tx_hex: &str) {
        self.state.lock().unwrap().rejected.insert(tx_hex.to_string());
    }

    pub fn allow_broadcast(&self, tx_hex: &str) {
        self.state.lock().unwrap().rejected.remove(tx_hex);
    }

    /// Drop an unmined transaction, as the mempool does on expiry
    pub fn evict(&self, txid: &Hash256) {
        let mut state = self.state.lock().unwrap();
        state.mempool.retain(|t| t != txid);
        if state.txs.get(txid).map(|sim| sim.height.is_none()).unwrap_or(false) {
            state.txs.remove(txid);
        }
    }

    fn spend(&self, ticket: &Ticket, vote: bool) -> Hash256 {
        let script = payment_script(&ticket.commitment_address, NETWORK).unwrap();
        let mut state = self.state.lock().unwrap();
        state.next_spend += 1;
        let txid = hash(0x5e, state.next_spend);

        let (vin, vout) = if vote {
            (
                vec![TxInput::stakebase(), TxInput::spending(ticket.hash, 0, 1)],
                vec![
                    output("nulldata", &[0x6a]),
                    output("nulldata", &[0x6a]),
                    output("stakegen", &script),
                ],
            )
        } else {
            (
                vec![TxInput::spending(ticket.hash, 0, 1)],
                vec![output("stakerevoke", &script)],
            )
        };

        let tx = RawTransaction {
            hex: format!("spend-{}", state.next_spend),
            txid,
            vin,
            vout,
            blockhash: None,
            blockheight: 0,
            confirmations: 0,
        };
        state.insert_mempool(tx, vec![script]);
        txid
    }

    /// Put a vote for `ticket` in the mempool
    pub fn vote(&self, ticket: &Ticket) -> Hash256 {
        self.spend(ticket, true)
    }

    /// Put a revocation of `ticket` in the mempool
    pub fn revoke(&self, ticket: &Ticket) -> Hash256 {
        self.spend(ticket, false)
    }
}

#[async_trait]
impl ChainReader for SimChain {
    fn address(&self) -> &str {
        "simchain"
    }

    fn is_connected(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    async fn version(&self) -> Result<VersionResult> {
        self.check_online()?;
        Ok(VersionResult {
            major: 8,
            minor: 2,
            patch: 0,
        })
    }

    async fn current_net(&self) -> Result<u32> {
        self.check_online()?;
        Ok(NETWORK.wire_magic())
    }

    async fn node_info(&self) -> Result<NodeInfo> {
        self.check_online()?;
        Ok(NodeInfo {
            blocks: self.tip(),
            txindex: true,
        })
    }

    async fn get_raw_transaction(&self, txid: &Hash256) -> Result<RawTransaction> {
        self.check_online()?;
        let state = self.state.lock().unwrap();
        let sim = state
            .txs
            .get(txid)
            .ok_or_else(|| server_error(-5, "No information available about transaction"))?;

        let mut tx = sim.tx.clone();
        if let Some(height) = sim.height {
            tx.blockhash = Some(state.blocks[height as usize].hash);
            tx.blockheight = height;
            tx.confirmations = (state.tip() - height + 1) as i64;
        }
        Ok(tx)
    }

    async fn send_raw_transaction(&self, tx_hex: &str) -> Result<Hash256> {
        self.check_online()?;
        self.broadcasts.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        if state.rejected.contains(tx_hex) {
            return Err(server_error(-22, "rejected transaction: insufficient fee"));
        }
        let txid = *state
            .relayable
            .get(tx_hex)
            .ok_or_else(|| server_error(-22, "TX decode failed"))?;
        if state.txs.contains_key(&txid) {
            return Err(server_error(-40, "already have transaction"));
        }

        let tx = RawTransaction {
            hex: tx_hex.to_string(),
            txid,
            vin: vec![TxInput::spending(hash(0x22, 0), 0, 0)],
            vout: vec![output("pubkeyhash", &[0x76, 0xa9])],
            blockhash: None,
            blockheight: 0,
            confirmations: 0,
        };
        state.insert_mempool(tx, Vec::new());
        Ok(txid)
    }

    async fn get_block_count(&self) -> Result<u64> {
        self.check_online()?;
        Ok(self.tip())
    }

    async fn get_block_hash(&self, height: u64) -> Result<Hash256> {
        self.check_online()?;
        let state = self.state.lock().unwrap();
        state
            .blocks
            .get(height as usize)
            .map(|b| b.hash)
            .ok_or_else(|| server_error(-1, "Block number out of range"))
    }

    async fn get_block_header(&self, hash: &Hash256) -> Result<BlockHeader> {
        self.check_online()?;
        let state = self.state.lock().unwrap();
        let (height, block) = state
            .block_by_hash(hash)
            .ok_or_else(|| server_error(-5, "Block not found"))?;
        Ok(BlockHeader {
            hash: block.hash,
            height,
            merkleroot: block.merkleroot,
        })
    }

    async fn get_cfilter_v2(&self, hash: &Hash256) -> Result<CompactFilter> {
        self.check_online()?;
        let state = self.state.lock().unwrap();
        let (_, block) = state
            .block_by_hash(hash)
            .ok_or_else(|| server_error(-5, "Block not found"))?;
        let key = key_from_merkle_root(&block.merkleroot);
        // Through the wire encoding, as the node would serve it
        let filter = CompactFilter::build(&key, block.scripts.iter());
        CompactFilter::from_bytes(&filter.to_bytes())
            .map_err(|e| RpcError::invalid_response("getcfilterv2", e))
    }

    async fn get_block(&self, hash: &Hash256) -> Result<Block> {
        self.check_online()?;
        self.blocks_fetched.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        let (height, block) = state
            .block_by_hash(hash)
            .ok_or_else(|| server_error(-5, "Block not found"))?;

        let rawstx = block
            .stake_txs
            .iter()
            .filter_map(|txid| state.txs.get(txid))
            .map(|sim| {
                let mut tx = sim.tx.clone();
                tx.blockhash = Some(block.hash);
                tx.blockheight = height;
                tx
            })
            .collect();

        Ok(Block {
            hash: block.hash,
            height,
            merkleroot: block.merkleroot,
            rawstx,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WalletTicket {
    pub voting_wif: String,
    pub block_height: u64,
    pub choices: BTreeMap<String, String>,
    pub tspend_policy: BTreeMap<String, String>,
    pub treasury_policy: BTreeMap<String, String>,
}

#[derive(Default)]
struct WalletState {
    tickets: BTreeMap<Hash256, WalletTicket>,
    mutations: usize,
    rescans: Vec<u64>,
}

/// Voting wallet double that counts every state-changing call
pub struct SimWallet {
    addr: String,
    chain: Arc<SimChain>,
    reachable: AtomicBool,
    rescans_fail: AtomicBool,
    unknown_agendas: Mutex<HashSet<String>>,
    unknown_policy_keys: Mutex<HashSet<String>>,
    state: Mutex<WalletState>,
}

impl SimWallet {
    pub fn new(addr: &str, chain: Arc<SimChain>) -> Self {
        Self {
            addr: addr.to_string(),
            chain,
            reachable: AtomicBool::new(true),
            rescans_fail: AtomicBool::new(false),
            unknown_agendas: Mutex::new(HashSet::new()),
            unknown_policy_keys: Mutex::new(HashSet::new()),
            state: Mutex::new(WalletState::default()),
        }
    }

    pub fn addr(&self) -> String {
        self.addr.clone()
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn reject_agenda(&self, agenda: &str) {
        self.unknown_agendas.lock().unwrap().insert(agenda.to_string());
    }

    /// Make rescans time out, as a long rescan over a slow link does
    pub fn set_rescans_fail(&self, fail: bool) {
        self.rescans_fail.store(fail, Ordering::SeqCst);
    }

    /// Refuse a tspend hash or treasury key as unknown
    pub fn reject_policy_key(&self, key: &str) {
        self.unknown_policy_keys.lock().unwrap().insert(key.to_string());
    }

    pub fn mutations(&self) -> usize {
        self.state.lock().unwrap().mutations
    }

    pub fn rescans(&self) -> Vec<u64> {
        self.state.lock().unwrap().rescans.clone()
    }

    pub fn ticket(&self, hash: &Hash256) -> Option<WalletTicket> {
        self.state.lock().unwrap().tickets.get(hash).cloned()
    }

    pub fn ticket_count(&self) -> usize {
        self.state.lock().unwrap().tickets.len()
    }

    /// Simulate drift without counting a mutation
    pub fn forget_ticket(&self, hash: &Hash256) {
        self.state.lock().unwrap().tickets.remove(hash);
    }

    pub fn overwrite_choice(&self, hash: &Hash256, agenda: &str, choice: &str) {
        if let Some(ticket) = self.state.lock().unwrap().tickets.get_mut(hash) {
            ticket.choices.insert(agenda.to_string(), choice.to_string());
        }
    }

    fn check_reachable(&self) -> Result<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RpcError::connection(&self.addr, "connection refused"))
        }
    }

    fn with_ticket(
        &self,
        ticket: &Hash256,
        apply: impl FnOnce(&mut WalletTicket),
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let entry = state
            .tickets
            .get_mut(ticket)
            .ok_or_else(|| server_error(-8, "ticket not found"))?;
        apply(entry);
        state.mutations += 1;
        Ok(())
    }
}

#[async_trait]
impl WalletVoter for SimWallet {
    fn address(&self) -> &str {
        &self.addr
    }

    fn is_connected(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    async fn version(&self) -> Result<VersionResult> {
        self.check_reachable()?;
        Ok(VersionResult {
            major: 9,
            minor: 1,
            patch: 0,
        })
    }

    async fn current_net(&self) -> Result<u32> {
        self.check_reachable()?;
        Ok(NETWORK.wire_magic())
    }

    async fn wallet_info(&self) -> Result<WalletInfo> {
        self.check_reachable()?;
        Ok(WalletInfo {
            daemonconnected: true,
            unlocked: true,
            voting: true,
        })
    }

    async fn ticket_info(&self, start_height: u64) -> Result<HashMap<Hash256, TicketInfo>> {
        self.check_reachable()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .tickets
            .iter()
            .filter(|(_, t)| t.block_height >= start_height)
            .map(|(hash, t)| {
                let info = TicketInfo {
                    hash: *hash,
                    blockheight: t.block_height as i64,
                    choices: t
                        .choices
                        .iter()
                        .map(|(agenda, choice)| VoteChoiceInfo {
                            agendaid: agenda.clone(),
                            choiceid: choice.clone(),
                        })
                        .collect(),
                };
                (*hash, info)
            })
            .collect())
    }

    async fn add_ticket_for_voting(
        &self,
        voting_wif: &str,
        block_hash: &Hash256,
        ticket_hex: &str,
    ) -> Result<()> {
        self.check_reachable()?;
        let txid = self
            .chain
            .txid_for_hex(ticket_hex)
            .ok_or_else(|| server_error(-22, "invalid transaction"))?;
        let height = self
            .chain
            .block_height(block_hash)
            .ok_or_else(|| server_error(-5, "unknown block"))?;

        let mut state = self.state.lock().unwrap();
        let entry = state.tickets.entry(txid).or_default();
        entry.voting_wif = voting_wif.to_string();
        entry.block_height = height;
        state.mutations += 1;
        Ok(())
    }

    async fn set_vote_choice(&self, agenda: &str, choice: &str, ticket: &Hash256) -> Result<()> {
        self.check_reachable()?;
        if self.unknown_agendas.lock().unwrap().contains(agenda) {
            return Err(server_error(-8, &format!("no agenda with ID {:?}", agenda)));
        }
        self.with_ticket(ticket, |t| {
            t.choices.insert(agenda.to_string(), choice.to_string());
        })
    }

    async fn set_tspend_policy(
        &self,
        tspend: &str,
        policy: &str,
        ticket: &Hash256,
    ) -> Result<()> {
        self.check_reachable()?;
        if self.unknown_policy_keys.lock().unwrap().contains(tspend) {
            return Err(server_error(-8, &format!("unknown tspend {}", tspend)));
        }
        self.with_ticket(ticket, |t| {
            t.tspend_policy.insert(tspend.to_string(), policy.to_string());
        })
    }

    async fn set_treasury_policy(
        &self,
        key: &str,
        policy: &str,
        ticket: &Hash256,
    ) -> Result<()> {
        self.check_reachable()?;
        if self.unknown_policy_keys.lock().unwrap().contains(key) {
            return Err(server_error(-8, &format!("unknown treasury key {}", key)));
        }
        self.with_ticket(ticket, |t| {
            t.treasury_policy.insert(key.to_string(), policy.to_string());
        })
    }

    async fn rescan_from(&self, height: u64) -> Result<()> {
        self.check_reachable()?;
        if self.rescans_fail.load(Ordering::SeqCst) {
            return Err(RpcError::connection(&self.addr, "operation timed out"));
        }
        let mut state = self.state.lock().unwrap();
        state.rescans.push(height);
        state.mutations += 1;
        Ok(())
    }
}

pub struct SimDialer {
    chain: Arc<SimChain>,
    wallets: Vec<Arc<SimWallet>>,
}

#[async_trait]
impl Dialer for SimDialer {
    async fn dial_chain(&self) -> Result<Arc<dyn ChainReader>> {
        self.chain.check_online()?;
        Ok(self.chain.clone())
    }

    async fn dial_wallet(&self, addr: &str) -> Result<Arc<dyn WalletVoter>> {
        let wallet = self
            .wallets
            .iter()
            .find(|w| w.address() == addr)
            .ok_or_else(|| RpcError::connection(addr, "unknown host"))?;
        wallet.check_reachable()?;
        Ok(wallet.clone())
    }
}

/// An engine wired to a simulated chain, wallets and an in-memory store
pub struct Harness {
    pub chain: Arc<SimChain>,
    pub wallets: Vec<Arc<SimWallet>>,
    pub store: Arc<MemoryStore>,
    pub engine: Arc<Engine>,
    pub shutdown: CancellationToken,
}

impl Harness {
    pub fn new(wallet_count: usize) -> Self {
        let chain = Arc::new(SimChain::new());
        let wallets: Vec<Arc<SimWallet>> = (0..wallet_count)
            .map(|i| Arc::new(SimWallet::new(&format!("wallet-{}:9110", i), chain.clone())))
            .collect();

        let settings = ConnectionSettings {
            network: NETWORK,
            wallet_addrs: wallets.iter().map(|w| w.address().to_string()).collect(),
            chain_version_req: VersionReq::parse("^8.0.0").unwrap(),
            wallet_version_req: VersionReq::parse("^9.0.0").unwrap(),
            dial_timeout: Duration::from_secs(5),
        };
        let dialer = Arc::new(SimDialer {
            chain: chain.clone(),
            wallets: wallets.clone(),
        });
        let peers = Arc::new(ConnectionManager::new(settings, dialer));

        let store = Arc::new(MemoryStore::new());
        let shutdown = CancellationToken::new();
        let engine = Arc::new(Engine::new(
            store.clone(),
            peers,
            NETWORK,
            shutdown.clone(),
        ));

        Self {
            chain,
            wallets,
            store,
            engine,
            shutdown,
        }
    }

    pub fn ticket(&self, hash: &Hash256) -> Ticket {
        self.store.get_ticket(hash).unwrap().unwrap()
    }

    /// A ticket already confirmed with a confirmed fee, mined at the current tip + 1
    pub fn votable_ticket(&self, n: u8) -> Ticket {
        let mut ticket = self.chain.purchase_ticket(n);
        let height = self.chain.mine_block();
        ticket.purchase_height = height;
        ticket.confirmed = true;
        ticket.fee_tx_status = FeeStatus::Confirmed;
        ticket.fee_tx_hash = Some(hash(0xfe, n as u64));
        self.store.insert_ticket(&ticket).unwrap();
        ticket
    }

    pub fn total_mutations(&self) -> usize {
        self.wallets.iter().map(|w| w.mutations()).sum()
    }
}
