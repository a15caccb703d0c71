//! Blockchain RPC client with timeout and error handling.
//!
//! # Responsibilities
//! - Connect to JSON-RPC endpoints (primary + failovers)
//! - Query chain state (height, blocks, logs, receipts, balances, nonces, fees)
//! - Submit raw signed transactions
//! - Bound every call by the configured timeout

use alloy::consensus::Transaction as ConsensusTransaction;
use alloy::eips::BlockNumberOrTag;
use alloy::network::{TransactionBuilder, TransactionResponse};
use alloy::primitives::{Address, TxHash, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, TransactionRequest};
use alloy::sol_types::SolEvent;
use alloy::transports::{RpcError, TransportError, TransportResult};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::blockchain::abi::{self, Transfer};
use crate::blockchain::types::{
    CallRequest, ChainConfig, ChainError, ChainId, ChainResult, FeeParams, LogEvent, ReceiptInfo,
    SignedTransaction, Transaction, TxStatus,
};

/// Chain primitives consumed by the engine.
///
/// A missing receipt is `Ok(None)`, distinct from an RPC failure.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn chain_id(&self) -> ChainResult<u64>;

    async fn current_height(&self) -> ChainResult<u64>;

    /// Transactions of one block. Contract creations are omitted.
    async fn block_transactions(&self, height: u64) -> ChainResult<Vec<Transaction>>;

    /// `Transfer` event logs emitted by `contract` in `[from_height, to_height]`.
    async fn token_transfer_logs(
        &self,
        contract: Address,
        from_height: u64,
        to_height: u64,
    ) -> ChainResult<Vec<LogEvent>>;

    async fn receipt(&self, hash: TxHash) -> ChainResult<Option<ReceiptInfo>>;

    /// Native balance, or the `balanceOf` of `contract` when given.
    async fn balance(&self, address: Address, contract: Option<Address>) -> ChainResult<U256>;

    async fn pending_nonce(&self, address: Address) -> ChainResult<u64>;

    /// Nonce of the next transaction from `address` at the latest block.
    async fn confirmed_nonce(&self, address: Address) -> ChainResult<u64>;

    async fn suggest_fee_cap(&self) -> ChainResult<u128>;

    async fn suggest_tip(&self) -> ChainResult<u128>;

    async fn estimate_gas(&self, call: &CallRequest) -> ChainResult<u64>;

    async fn broadcast(&self, tx: &SignedTransaction) -> ChainResult<()>;

    /// Verify the connected chain ID matches `expected`.
    async fn verify_chain_id(&self, expected: u64) -> ChainResult<()> {
        let actual = self.chain_id().await?;
        if actual != expected {
            return Err(ChainError::ChainMismatch { expected, actual });
        }
        Ok(())
    }
}

type DynProvider = Arc<dyn Provider + Send + Sync>;

/// Blockchain RPC client wrapper with failover support.
#[derive(Clone)]
pub struct BlockchainClient {
    /// List of providers (primary + failovers).
    providers: Vec<DynProvider>,
    /// Configuration.
    config: ChainConfig,
    /// Request timeout duration.
    timeout_duration: Duration,
}

impl BlockchainClient {
    /// Create a new blockchain client.
    ///
    /// Fails only on an unparseable primary URL; reachability is checked by
    /// [`ChainClient::verify_chain_id`].
    pub fn new(config: ChainConfig) -> ChainResult<Self> {
        let timeout_duration = Duration::from_secs(config.rpc_timeout_secs);
        let mut providers = Vec::new();

        let primary_url: url::Url = config.rpc_url.parse().map_err(|e| {
            ChainError::Rpc(format!("Invalid RPC URL '{}': {}", config.rpc_url, e))
        })?;
        providers.push(Arc::new(ProviderBuilder::new().connect_http(primary_url)) as DynProvider);

        for url_str in &config.failover_urls {
            if let Ok(url) = url_str.parse() {
                providers.push(Arc::new(ProviderBuilder::new().connect_http(url)) as DynProvider);
            } else {
                tracing::warn!(url = %url_str, "Ignoring invalid failover RPC URL");
            }
        }

        tracing::info!(
            rpc_url = %config.rpc_url,
            failovers = providers.len() - 1,
            chain_id = config.chain_id,
            "Blockchain client initialized"
        );

        Ok(Self {
            providers,
            config,
            timeout_duration,
        })
    }

    /// Run `call` against each provider in order until one answers in time.
    async fn with_failover<T, F, Fut>(&self, op: &'static str, call: F) -> ChainResult<T>
    where
        F: Fn(DynProvider) -> Fut,
        Fut: Future<Output = TransportResult<T>>,
    {
        let mut last_error = None;
        for (i, provider) in self.providers.iter().enumerate() {
            match timeout(self.timeout_duration, call(provider.clone())).await {
                Ok(Ok(result)) => return Ok(result),
                Ok(Err(e)) => {
                    tracing::warn!(provider_idx = i, op, error = %e, "RPC error");
                    last_error = Some(ChainError::Rpc(e.to_string()));
                }
                Err(_) => {
                    tracing::warn!(provider_idx = i, op, "RPC timeout");
                    last_error = Some(ChainError::Timeout(self.config.rpc_timeout_secs));
                }
            }
        }
        Err(last_error.unwrap_or_else(|| ChainError::Rpc(format!("All providers failed: {op}"))))
    }
}

#[async_trait]
impl ChainClient for BlockchainClient {
    async fn chain_id(&self) -> ChainResult<u64> {
        self.with_failover("chain_id", |p| async move { p.get_chain_id().await })
            .await
            .map(|id| ChainId(id).into())
    }

    async fn current_height(&self) -> ChainResult<u64> {
        self.with_failover("block_number", |p| async move { p.get_block_number().await })
            .await
    }

    async fn block_transactions(&self, height: u64) -> ChainResult<Vec<Transaction>> {
        let block = self
            .with_failover("block_by_number", |p| async move {
                p.get_block_by_number(BlockNumberOrTag::Number(height)).full().await
            })
            .await?
            .ok_or(ChainError::BlockNotFound(height))?;

        let block_hash = block.header.hash;
        let transactions = block
            .transactions
            .txns()
            .filter_map(|tx| {
                // Contract creations have no recipient.
                let to = ConsensusTransaction::to(tx)?;
                let fee = match ConsensusTransaction::max_priority_fee_per_gas(tx) {
                    Some(tip) => FeeParams::Dynamic {
                        max_fee_per_gas: ConsensusTransaction::max_fee_per_gas(tx),
                        max_priority_fee_per_gas: tip,
                    },
                    None => FeeParams::Legacy {
                        gas_price: ConsensusTransaction::gas_price(tx).unwrap_or_default(),
                    },
                };
                Some(Transaction {
                    hash: TransactionResponse::tx_hash(tx),
                    block_number: Some(height),
                    block_hash: Some(block_hash),
                    from: TransactionResponse::from(tx),
                    to,
                    value: ConsensusTransaction::value(tx),
                    input: ConsensusTransaction::input(tx).clone(),
                    nonce: ConsensusTransaction::nonce(tx),
                    gas_limit: ConsensusTransaction::gas_limit(tx),
                    fee,
                    contract: None,
                    coin: String::new(),
                    log_index: None,
                    status: TxStatus::Pending,
                    has_check: false,
                    dirty: true,
                })
            })
            .collect();

        Ok(transactions)
    }

    async fn token_transfer_logs(
        &self,
        contract: Address,
        from_height: u64,
        to_height: u64,
    ) -> ChainResult<Vec<LogEvent>> {
        let filter = Filter::new()
            .address(contract)
            .from_block(from_height)
            .to_block(to_height)
            .event_signature(Transfer::SIGNATURE_HASH);

        let logs = self
            .with_failover("get_logs", |p| {
                let filter = filter.clone();
                async move { p.get_logs(&filter).await }
            })
            .await?;

        Ok(logs
            .into_iter()
            .filter_map(|log| {
                Some(LogEvent {
                    address: log.address(),
                    topics: log.topics().to_vec(),
                    data: log.data().data.clone(),
                    tx_hash: log.transaction_hash?,
                    block_number: log.block_number?,
                    block_hash: log.block_hash,
                    log_index: log.log_index,
                })
            })
            .collect())
    }

    async fn receipt(&self, hash: TxHash) -> ChainResult<Option<ReceiptInfo>> {
        let receipt = self
            .with_failover("transaction_receipt", |p| async move {
                p.get_transaction_receipt(hash).await
            })
            .await?;

        Ok(receipt.and_then(|r| {
            // A receipt without a block is not mined yet.
            Some(ReceiptInfo {
                success: r.status(),
                block_number: r.block_number?,
                block_hash: r.block_hash,
            })
        }))
    }

    async fn balance(&self, address: Address, contract: Option<Address>) -> ChainResult<U256> {
        match contract {
            None => {
                self.with_failover("balance", |p| async move { p.get_balance(address).await })
                    .await
            }
            Some(contract) => {
                let request = TransactionRequest::default()
                    .with_to(contract)
                    .with_input(abi::encode_balance_of(address));
                let output = self
                    .with_failover("balance_of", |p| {
                        let request = request.clone();
                        async move { p.call(request).await }
                    })
                    .await?;
                abi::decode_uint_word(&output)
            }
        }
    }

    async fn pending_nonce(&self, address: Address) -> ChainResult<u64> {
        self.with_failover("pending_nonce", |p| async move {
            p.get_transaction_count(address).pending().await
        })
        .await
    }

    async fn confirmed_nonce(&self, address: Address) -> ChainResult<u64> {
        self.with_failover("confirmed_nonce", |p| async move {
            p.get_transaction_count(address).latest().await
        })
        .await
    }

    async fn suggest_fee_cap(&self) -> ChainResult<u128> {
        self.with_failover("gas_price", |p| async move { p.get_gas_price().await })
            .await
    }

    async fn suggest_tip(&self) -> ChainResult<u128> {
        self.with_failover("max_priority_fee", |p| async move {
            p.get_max_priority_fee_per_gas().await
        })
        .await
    }

    async fn estimate_gas(&self, call: &CallRequest) -> ChainResult<u64> {
        let request = TransactionRequest::default()
            .with_from(call.from)
            .with_to(call.to)
            .with_value(call.value)
            .with_input(call.input.clone());
        self.with_failover("estimate_gas", |p| {
            let request = request.clone();
            async move { p.estimate_gas(request).await }
        })
        .await
    }

    async fn broadcast(&self, tx: &SignedTransaction) -> ChainResult<()> {
        // Send to the primary only: a node-level rejection is final and must
        // surface to the caller rather than be retried elsewhere.
        let provider = self.providers[0].clone();
        match timeout(self.timeout_duration, provider.send_raw_transaction(&tx.raw)).await {
            Ok(Ok(_pending)) => Ok(()),
            Ok(Err(e)) => Err(broadcast_error(e)),
            Err(_) => Err(ChainError::Timeout(self.config.rpc_timeout_secs)),
        }
    }
}

/// A JSON-RPC error response is the node refusing the transaction; anything
/// else never got an answer.
fn broadcast_error(e: TransportError) -> ChainError {
    match e {
        RpcError::ErrorResp(payload) => ChainError::Rejected(payload.message.to_string()),
        other => ChainError::Rpc(other.to_string()),
    }
}

impl std::fmt::Debug for BlockchainClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockchainClient")
            .field("rpc_url", &self.config.rpc_url)
            .field("chain_id", &self.config.chain_id)
            .field("timeout_secs", &self.config.rpc_timeout_secs)
            .finish()
    }
}
