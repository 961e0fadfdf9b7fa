//! Chain node bindings

use crate::client::JsonRpcClient;
use crate::error::{Result, RpcError};
use crate::traits::ChainReader;
use crate::types::{CFilterV2Result, NodeInfo, VersionMap, VersionResult, CHAIN_API_KEY};
use async_trait::async_trait;
use serde_json::{json, Value};
use vsp_core::{Block, BlockHeader, CompactFilter, Hash256, RawTransaction};

pub struct DcrdRpc {
    client: JsonRpcClient,
}

impl DcrdRpc {
    pub fn new(client: JsonRpcClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ChainReader for DcrdRpc {
    fn address(&self) -> &str {
        self.client.addr()
    }

    fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    async fn version(&self) -> Result<VersionResult> {
        let mut versions: VersionMap = self.client.call("version", &[]).await?;
        versions
            .remove(CHAIN_API_KEY)
            .ok_or_else(|| RpcError::invalid_response("version", "missing API version"))
    }

    async fn current_net(&self) -> Result<u32> {
        self.client.call("getcurrentnet", &[]).await
    }

    async fn node_info(&self) -> Result<NodeInfo> {
        self.client.call("getinfo", &[]).await
    }

    async fn get_raw_transaction(&self, txid: &Hash256) -> Result<RawTransaction> {
        self.client
            .call("getrawtransaction", &[json!(txid.to_string()), json!(1)])
            .await
    }

    async fn send_raw_transaction(&self, tx_hex: &str) -> Result<Hash256> {
        let txid: String = self
            .client
            .call("sendrawtransaction", &[json!(tx_hex), json!(false)])
            .await?;
        txid.parse()
            .map_err(|e| RpcError::invalid_response("sendrawtransaction", e))
    }

    async fn get_block_count(&self) -> Result<u64> {
        self.client.call("getblockcount", &[]).await
    }

    async fn get_block_hash(&self, height: u64) -> Result<Hash256> {
        self.client.call("getblockhash", &[json!(height)]).await
    }

    async fn get_block_header(&self, hash: &Hash256) -> Result<BlockHeader> {
        self.client
            .call("getblockheader", &[json!(hash.to_string()), json!(true)])
            .await
    }

    async fn get_cfilter_v2(&self, hash: &Hash256) -> Result<CompactFilter> {
        let params: [Value; 1] = [json!(hash.to_string())];
        let result: CFilterV2Result = self.client.call("getcfilterv2", &params).await?;
        let bytes =
            hex::decode(&result.data).map_err(|e| RpcError::invalid_response("getcfilterv2", e))?;
        CompactFilter::from_bytes(&bytes).map_err(|e| RpcError::invalid_response("getcfilterv2", e))
    }

    async fn get_block(&self, hash: &Hash256) -> Result<Block> {
        // verbose with decoded transactions
        self.client
            .call("getblock", &[json!(hash.to_string()), json!(true), json!(true)])
            .await
    }
}
