use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use serde_json::json;
use tracing::debug;

use crate::ethereum::contract::{decode_can_mint, encode_can_mint, encode_mint_for_multiple};
use crate::ethereum::{
    Address, LegacyTransaction, SignedTransaction, Signer, U256, format_address, format_quantity,
    parse_quantity,
};

/// Extra gas on top of `eth_estimateGas` for batch mints, in percent.
const MINT_GAS_HEADROOM_PERCENT: u64 = 20;

/// What the disbursement flows need from the chain.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn balance_at(&self, address: Address) -> Result<U256>;

    async fn pending_nonce_at(&self, address: Address) -> Result<u64>;

    /// Broadcasts a signed transaction and returns its hash.
    async fn send_transaction(&self, transaction: &SignedTransaction) -> Result<String>;

    /// How many of `count` recipients the reward event can still mint for.
    async fn can_mint(&self, event_id: U256, count: U256) -> Result<U256>;

    /// Builds, signs and broadcasts one batch mint; returns the transaction hash.
    async fn mint_for_multiple(
        &self,
        signer: &Signer,
        event_id: U256,
        recipients: &[Address],
    ) -> Result<String>;
}

#[derive(Clone)]
pub struct RpcClient {
    inner: HttpClient,
    timeout: Duration,
}

impl RpcClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        assert!(!endpoint.is_empty(), "RPC endpoint must be provided");
        assert!(
            timeout >= Duration::from_millis(100),
            "Timeout below 100ms is unsafe"
        );

        let client = HttpClientBuilder::default()
            .request_timeout(timeout)
            .build(endpoint)
            .with_context(|| format!("Failed to build RPC client for {endpoint}"))?;

        Ok(Self {
            inner: client,
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        assert!(
            self.timeout <= Duration::from_secs(60),
            "Timeout exceeds maximum bound"
        );
        self.timeout
    }

    pub async fn get_balance(&self, address: &Address) -> Result<U256> {
        let response: String = self
            .inner
            .request("eth_getBalance", rpc_params![format_address(address), "latest"])
            .await
            .context("RPC call eth_getBalance failed")?;
        parse_quantity(&response)
    }

    pub async fn get_pending_transaction_count(&self, address: &Address) -> Result<u64> {
        let response: String = self
            .inner
            .request(
                "eth_getTransactionCount",
                rpc_params![format_address(address), "pending"],
            )
            .await
            .context("RPC call eth_getTransactionCount failed")?;
        let count = parse_quantity(&response)?;
        if count > U256::from(u64::MAX) {
            return Err(anyhow!("Transaction count {count} exceeds u64"));
        }
        Ok(count.low_u64())
    }

    pub async fn gas_price(&self) -> Result<U256> {
        let response: String = self
            .inner
            .request("eth_gasPrice", rpc_params![])
            .await
            .context("RPC call eth_gasPrice failed")?;
        parse_quantity(&response)
    }

    pub async fn estimate_gas(&self, from: &Address, to: &Address, data: &[u8]) -> Result<u64> {
        let call = json!({
            "from": format_address(from),
            "to": format_address(to),
            "data": format!("0x{}", hex::encode(data)),
        });
        let response: String = self
            .inner
            .request("eth_estimateGas", rpc_params![call])
            .await
            .context("RPC call eth_estimateGas failed")?;
        let gas = parse_quantity(&response)?;
        if gas > U256::from(u64::MAX) {
            return Err(anyhow!("Gas estimate {gas} exceeds u64"));
        }
        Ok(gas.low_u64())
    }

    pub async fn call(&self, to: &Address, data: &[u8]) -> Result<Vec<u8>> {
        let call = json!({
            "to": format_address(to),
            "data": format!("0x{}", hex::encode(data)),
        });
        let response: String = self
            .inner
            .request("eth_call", rpc_params![call, "latest"])
            .await
            .context("RPC call eth_call failed")?;
        hex::decode(response.trim_start_matches("0x")).context("eth_call returned invalid hex")
    }

    pub async fn send_raw_transaction(&self, transaction: &SignedTransaction) -> Result<String> {
        let response: String = self
            .inner
            .request("eth_sendRawTransaction", rpc_params![transaction.raw_hex()])
            .await
            .context("RPC call eth_sendRawTransaction failed")?;
        if response.is_empty() {
            return Err(anyhow!("Node returned an empty transaction hash"));
        }
        Ok(response.to_ascii_lowercase())
    }
}

/// `ChainClient` backed by a JSON-RPC node and the deployed reward token.
#[derive(Clone)]
pub struct EthereumChain {
    rpc: RpcClient,
    chain_id: u64,
    reward_token: Address,
}

impl EthereumChain {
    pub fn new(rpc: RpcClient, chain_id: u64, reward_token: Address) -> Self {
        assert!(chain_id > 0, "Chain id must be positive");
        Self {
            rpc,
            chain_id,
            reward_token,
        }
    }
}

#[async_trait]
impl ChainClient for EthereumChain {
    async fn balance_at(&self, address: Address) -> Result<U256> {
        self.rpc.get_balance(&address).await
    }

    async fn pending_nonce_at(&self, address: Address) -> Result<u64> {
        self.rpc.get_pending_transaction_count(&address).await
    }

    async fn send_transaction(&self, transaction: &SignedTransaction) -> Result<String> {
        self.rpc.send_raw_transaction(transaction).await
    }

    async fn can_mint(&self, event_id: U256, count: U256) -> Result<U256> {
        let output = self
            .rpc
            .call(&self.reward_token, &encode_can_mint(event_id, count))
            .await?;
        decode_can_mint(&output)
    }

    async fn mint_for_multiple(
        &self,
        signer: &Signer,
        event_id: U256,
        recipients: &[Address],
    ) -> Result<String> {
        assert!(!recipients.is_empty(), "Mint batch must not be empty");
        let data = encode_mint_for_multiple(event_id, recipients);
        let from = signer.address();

        let nonce = self.rpc.get_pending_transaction_count(&from).await?;
        let gas_price = self.rpc.gas_price().await?;
        let estimate = self
            .rpc
            .estimate_gas(&from, &self.reward_token, &data)
            .await?;
        let gas_limit = estimate + estimate * MINT_GAS_HEADROOM_PERCENT / 100;
        debug!(
            "Mint transaction nonce={nonce} gas_price={} gas_limit={gas_limit}",
            format_quantity(&gas_price)
        );

        let transaction = LegacyTransaction {
            nonce,
            gas_price,
            gas_limit,
            to: self.reward_token,
            value: U256::zero(),
            data,
        };
        let signed = transaction.sign(signer, self.chain_id)?;
        self.rpc.send_raw_transaction(&signed).await
    }
}
