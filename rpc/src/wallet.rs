//! Voting wallet bindings

use crate::client::JsonRpcClient;
use crate::error::{Result, RpcError};
use crate::traits::WalletVoter;
use crate::types::{TicketInfo, VersionMap, VersionResult, WalletInfo, WALLET_API_KEY};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use vsp_core::Hash256;

/// Account voting keys are imported into
const IMPORT_ACCOUNT: &str = "imported";

/// `rescanwallet` answers only when the rescan is complete
const RESCAN_TIMEOUT: Duration = Duration::from_secs(60 * 60);

pub struct WalletRpc {
    client: JsonRpcClient,
}

impl WalletRpc {
    pub fn new(client: JsonRpcClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WalletVoter for WalletRpc {
    fn address(&self) -> &str {
        self.client.addr()
    }

    fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    async fn version(&self) -> Result<VersionResult> {
        let mut versions: VersionMap = self.client.call("version", &[]).await?;
        versions
            .remove(WALLET_API_KEY)
            .ok_or_else(|| RpcError::invalid_response("version", "missing API version"))
    }

    async fn current_net(&self) -> Result<u32> {
        self.client.call("getcurrentnet", &[]).await
    }

    async fn wallet_info(&self) -> Result<WalletInfo> {
        self.client.call("walletinfo", &[]).await
    }

    async fn ticket_info(&self, start_height: u64) -> Result<HashMap<Hash256, TicketInfo>> {
        let tickets: Vec<TicketInfo> = self
            .client
            .call("ticketinfo", &[json!(start_height)])
            .await?;
        Ok(tickets.into_iter().map(|t| (t.hash, t)).collect())
    }

    async fn add_ticket_for_voting(
        &self,
        voting_wif: &str,
        block_hash: &Hash256,
        ticket_hex: &str,
    ) -> Result<()> {
        // no rescan, the ticket is attached explicitly below
        let _: Value = self
            .client
            .call(
                "importprivkey",
                &[json!(voting_wif), json!(IMPORT_ACCOUNT), json!(false), json!(0)],
            )
            .await?;

        let _: Value = self
            .client
            .call(
                "addtransaction",
                &[json!(block_hash.to_string()), json!(ticket_hex)],
            )
            .await?;
        Ok(())
    }

    async fn set_vote_choice(&self, agenda: &str, choice: &str, ticket: &Hash256) -> Result<()> {
        let _: Value = self
            .client
            .call(
                "setvotechoice",
                &[json!(agenda), json!(choice), json!(ticket.to_string())],
            )
            .await?;
        Ok(())
    }

    async fn set_tspend_policy(
        &self,
        tspend: &str,
        policy: &str,
        ticket: &Hash256,
    ) -> Result<()> {
        let _: Value = self
            .client
            .call(
                "settspendpolicy",
                &[json!(tspend), json!(policy), json!(ticket.to_string())],
            )
            .await?;
        Ok(())
    }

    async fn set_treasury_policy(
        &self,
        key: &str,
        policy: &str,
        ticket: &Hash256,
    ) -> Result<()> {
        let _: Value = self
            .client
            .call(
                "settreasurypolicy",
                &[json!(key), json!(policy), json!(ticket.to_string())],
            )
            .await?;
        Ok(())
    }

    async fn rescan_from(&self, height: u64) -> Result<()> {
        let _: Value = self
            .client
            .call_with_timeout("rescanwallet", &[json!(height)], RESCAN_TIMEOUT)
            .await?;
        Ok(())
    }
}
