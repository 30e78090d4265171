//! Network and signing client used by migration steps.
//!
//! [`ChainClient`] is the seam between the migration engine and the chain:
//! steps submit creation and call transactions through it, and the driver
//! waits on it for confirmations. [`RpcChainClient`] is the JSON-RPC
//! implementation used by the CLI.

use alloy_core::primitives::{Address, Bytes, TxHash, U64, U128, U256};
use anyhow::{Context, Result};
use futures::{FutureExt, future::BoxFuture};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use url::Url;

use crate::{
    rpc::{self, DEFAULT_POLL_INTERVAL},
    signer::{LegacyTransaction, LocalSigner},
};

/// A contract-creation transaction that has been accepted by the node.
///
/// The address is known before the transaction is mined since it only
/// depends on the sender and its nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingDeployment {
    pub address: Address,
    pub hash: TxHash,
}

/// Receipt of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: TxHash,
    #[serde(deserialize_with = "deserialize_u64_from_hex")]
    pub block_number: u64,
    /// `1` on success, `0` on revert. Absent on pre-Byzantium chains.
    #[serde(default, deserialize_with = "deserialize_opt_u64_from_hex")]
    pub status: Option<u64>,
    #[serde(default)]
    pub contract_address: Option<Address>,
}

impl TransactionReceipt {
    pub fn succeeded(&self) -> bool {
        self.status != Some(0)
    }
}

/// Deserialize a u64 from a hex string (with 0x prefix).
fn deserialize_u64_from_hex<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    u64::from_str_radix(s.trim_start_matches("0x"), 16).map_err(serde::de::Error::custom)
}

fn deserialize_opt_u64_from_hex<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: Option<String> = Deserialize::deserialize(deserializer)?;
    s.map(|s| u64::from_str_radix(s.trim_start_matches("0x"), 16))
        .transpose()
        .map_err(serde::de::Error::custom)
}

/// Submit-transaction and wait-for-receipt primitives for a single signer.
///
/// Implementations must serialize nonce assignment, since steps of a single
/// stage submit concurrently.
pub trait ChainClient: Send + Sync {
    /// Address of the account signing every transaction.
    fn signer_address(&self) -> Address;

    /// Submit a contract-creation transaction.
    fn deploy(
        &self,
        init_code: Bytes,
        gas_price: Option<u128>,
    ) -> BoxFuture<'_, Result<PendingDeployment>>;

    /// Submit a call transaction to `to`.
    fn send(&self, to: Address, input: Bytes, gas_price: Option<u128>)
    -> BoxFuture<'_, Result<TxHash>>;

    /// Execute a read-only call against the latest block.
    fn call(&self, to: Address, input: Bytes) -> BoxFuture<'_, Result<Bytes>>;

    /// Resolve once `hash` is mined with at least `confirmations` blocks on top
    /// of (and including) its block. Does not time out by itself.
    fn wait_for_confirmations(
        &self,
        hash: TxHash,
        confirmations: u64,
    ) -> BoxFuture<'_, Result<TransactionReceipt>>;
}

/// [`ChainClient`] backed by a JSON-RPC endpoint and a local private key.
#[derive(Debug)]
pub struct RpcChainClient {
    client: reqwest::Client,
    url: Url,
    signer: LocalSigner,
    chain_id: u64,
    /// Next nonce to use. Fetched from the node on first submission.
    next_nonce: Mutex<Option<u64>>,
}

impl RpcChainClient {
    /// Connect to `url` and fetch the chain id.
    pub async fn connect(url: Url, signer: LocalSigner) -> Result<Self> {
        let client = rpc::create_client()?;
        let chain_id: U64 = rpc::json_rpc_call(&client, url.as_str(), "eth_chainId", vec![])
            .await
            .with_context(|| format!("Failed to reach JSON-RPC endpoint {url}"))?;
        let chain_id = chain_id.to::<u64>();

        tracing::info!(
            rpc_url = %url,
            chain_id,
            signer = %signer.address(),
            "Connected to chain"
        );

        Ok(Self {
            client,
            url,
            signer,
            chain_id,
            next_nonce: Mutex::new(None),
        })
    }

    async fn rpc<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<T> {
        rpc::json_rpc_call(&self.client, self.url.as_str(), method, params).await
    }

    async fn block_number(&self) -> Result<u64> {
        let number: U64 = self.rpc("eth_blockNumber", vec![]).await?;
        Ok(number.to::<u64>())
    }

    /// Sign and broadcast a transaction, returning the nonce it used and its hash.
    ///
    /// The nonce lock is held across the whole submission so concurrent
    /// callers are assigned consecutive nonces in submission order.
    async fn submit(
        &self,
        to: Option<Address>,
        input: Bytes,
        gas_price: Option<u128>,
    ) -> Result<(u64, TxHash)> {
        let mut next_nonce = self.next_nonce.lock().await;
        let from = self.signer.address();

        let nonce = match *next_nonce {
            Some(nonce) => nonce,
            None => {
                let nonce: U64 = self
                    .rpc("eth_getTransactionCount", vec![json!(from), json!("pending")])
                    .await
                    .context("Failed to fetch signer nonce")?;
                nonce.to::<u64>()
            }
        };

        let gas_price = match gas_price {
            Some(gas_price) => gas_price,
            None => {
                let gas_price: U128 = self
                    .rpc("eth_gasPrice", vec![])
                    .await
                    .context("Failed to fetch gas price")?;
                gas_price.to::<u128>()
            }
        };

        let mut request = json!({ "from": from, "data": input });
        if let Some(to) = to {
            request["to"] = json!(to);
        }
        let gas_limit: U64 = self
            .rpc("eth_estimateGas", vec![request])
            .await
            .context("Failed to estimate gas")?;

        let tx = LegacyTransaction {
            chain_id: self.chain_id,
            nonce,
            gas_price,
            gas_limit: gas_limit.to::<u64>(),
            to,
            value: U256::ZERO,
            input,
        };
        let (raw, hash) = self.signer.sign_transaction(&tx)?;

        let accepted: TxHash = self
            .rpc("eth_sendRawTransaction", vec![json!(raw)])
            .await
            .context("Node rejected transaction")?;
        if accepted != hash {
            tracing::warn!(%accepted, computed = %hash, "Node returned an unexpected transaction hash");
        }

        *next_nonce = Some(nonce + 1);
        tracing::debug!(nonce, %hash, gas_price, gas_limit = tx.gas_limit, "Transaction submitted");
        Ok((nonce, accepted))
    }
}

impl ChainClient for RpcChainClient {
    fn signer_address(&self) -> Address {
        self.signer.address()
    }

    fn deploy(
        &self,
        init_code: Bytes,
        gas_price: Option<u128>,
    ) -> BoxFuture<'_, Result<PendingDeployment>> {
        async move {
            let (nonce, hash) = self.submit(None, init_code, gas_price).await?;
            Ok(PendingDeployment {
                address: self.signer.address().create(nonce),
                hash,
            })
        }
        .boxed()
    }

    fn send(
        &self,
        to: Address,
        input: Bytes,
        gas_price: Option<u128>,
    ) -> BoxFuture<'_, Result<TxHash>> {
        async move {
            let (_, hash) = self.submit(Some(to), input, gas_price).await?;
            Ok(hash)
        }
        .boxed()
    }

    fn call(&self, to: Address, input: Bytes) -> BoxFuture<'_, Result<Bytes>> {
        async move {
            self.rpc("eth_call", vec![json!({ "to": to, "data": input }), json!("latest")])
                .await
        }
        .boxed()
    }

    fn wait_for_confirmations(
        &self,
        hash: TxHash,
        confirmations: u64,
    ) -> BoxFuture<'_, Result<TransactionReceipt>> {
        async move {
            rpc::poll_until("transaction confirmations", DEFAULT_POLL_INTERVAL, move || async move {
                let receipt: Option<TransactionReceipt> = self
                    .rpc("eth_getTransactionReceipt", vec![json!(hash)])
                    .await?;
                let Some(receipt) = receipt else {
                    return Ok(None);
                };

                let head = self.block_number().await?;
                let depth = (head + 1).saturating_sub(receipt.block_number);
                tracing::trace!(%hash, depth, confirmations, "Waiting for confirmations");
                Ok((depth >= confirmations).then_some(receipt))
            })
            .await
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_core::primitives::address;

    #[test]
    fn test_deployment_address_from_nonce() {
        let deployer = address!("f39fd6e51aad88f6f4ce6ab8827279cfffb92266");
        assert_eq!(deployer.create(0), address!("5fbdb2315678afecb367f032d93f642f64180aa3"));
    }

    #[test]
    fn test_receipt_from_json() {
        let receipt: TransactionReceipt = serde_json::from_value(json!({
            "transactionHash": "0x1111111111111111111111111111111111111111111111111111111111111111",
            "blockNumber": "0x1a",
            "status": "0x1",
            "contractAddress": "0x5fbdb2315678afecb367f032d93f642f64180aa3",
            "gasUsed": "0x5208"
        }))
        .unwrap();

        assert_eq!(receipt.block_number, 26);
        assert!(receipt.succeeded());
        assert_eq!(
            receipt.contract_address,
            Some(address!("5fbdb2315678afecb367f032d93f642f64180aa3"))
        );
    }

    #[test]
    fn test_reverted_receipt() {
        let receipt: TransactionReceipt = serde_json::from_value(json!({
            "transactionHash": "0x1111111111111111111111111111111111111111111111111111111111111111",
            "blockNumber": "0x2",
            "status": "0x0",
            "contractAddress": null
        }))
        .unwrap();

        assert!(!receipt.succeeded());
        assert_eq!(receipt.contract_address, None);
    }
}
