//! Transfer issuance: draft, nonce, sign, broadcast, track.

use alloy::primitives::{Address, TxHash, U256};
use std::sync::Arc;

use crate::blockchain::client::ChainClient;
use crate::blockchain::transaction::{Replacement, TransferDraft, TxBuilder, NATIVE_TRANSFER_GAS};
use crate::blockchain::types::{Coin, FeeParams, Transaction, TxStatus};
use crate::blockchain::wallet::Wallet;
use crate::engine::coins::CoinRegistry;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::nonce::NonceManager;
use crate::engine::pending::PendingRegistry;
use crate::observability::metrics;

/// Result of a successful broadcast.
#[derive(Debug, Clone)]
pub struct IssuedTransfer {
    pub from: Address,
    pub hash: TxHash,
    pub nonce: u64,
    /// The record inserted into the pending registry.
    pub tx: Transaction,
}

/// Outcome of a sweep attempt.
#[derive(Debug, Clone)]
pub struct SweepOutcome {
    /// Amount moved; zero when nothing was sent.
    pub amount: U256,
    pub issued: Option<IssuedTransfer>,
}

impl SweepOutcome {
    fn skipped() -> Self {
        Self {
            amount: U256::ZERO,
            issued: None,
        }
    }
}

/// Issues transfers on behalf of one engine.
pub struct TransferIssuer {
    coin: Coin,
    chain_id: u64,
    chain: Arc<dyn ChainClient>,
    builder: TxBuilder,
    nonces: Arc<NonceManager>,
    pending: Arc<PendingRegistry>,
    coins: Arc<CoinRegistry>,
}

impl TransferIssuer {
    pub fn new(
        coin: Coin,
        chain_id: u64,
        chain: Arc<dyn ChainClient>,
        nonces: Arc<NonceManager>,
        pending: Arc<PendingRegistry>,
        coins: Arc<CoinRegistry>,
    ) -> Self {
        Self {
            coin,
            chain_id,
            builder: TxBuilder::new(chain.clone()),
            chain,
            nonces,
            pending,
            coins,
        }
    }

    /// The asset moved by `contract`: a registered coin, an unregistered
    /// fungible token, or the native coin.
    fn resolve_coin(&self, contract: Option<Address>) -> Option<Coin> {
        let contract = contract?;
        Some(
            self.coins
                .get(&contract)
                .unwrap_or_else(|| Coin::token(contract.to_string(), contract, false)),
        )
    }

    /// Sign and broadcast a transfer, then register it as pending.
    ///
    /// # Arguments
    /// * `private_key` - Hex signing key
    /// * `to` - Logical recipient
    /// * `amount` - Value, token amount or NFT token id
    /// * `nonce` - Explicit nonce; `None` takes the next one
    /// * `contract` - Token contract; `None` for the native coin
    pub async fn issue(
        &self,
        private_key: &str,
        to: Address,
        amount: U256,
        nonce: Option<u64>,
        contract: Option<Address>,
    ) -> EngineResult<IssuedTransfer> {
        let wallet = Wallet::from_private_key(private_key, self.chain_id)?;
        let coin = self.resolve_coin(contract);
        let draft = self
            .builder
            .build(wallet.address(), to, amount, coin.as_ref())
            .await?;

        let coin = coin.unwrap_or_else(|| Coin::native(self.coin.name.clone()));
        self.send(&wallet, draft, nonce, &coin).await
    }

    /// Re-issue a pending transaction at its nonce with doubled fees.
    ///
    /// `Cancel` replaces it with a zero-value transfer to the sender.
    pub async fn replace(&self, private_key: &str, hash: TxHash, mode: Replacement) -> EngineResult<IssuedTransfer> {
        let entry = self.pending.get(&hash).ok_or(EngineError::NotPending(hash))?;
        let wallet = Wallet::from_private_key(private_key, self.chain_id)?;
        if wallet.address() != entry.tx.from {
            return Err(EngineError::KeyMismatch(entry.tx.from));
        }

        let draft = self.builder.replacement(&entry.tx, mode).await?;
        let coin = match mode {
            Replacement::SpeedUp => Coin {
                name: entry.tx.coin.clone(),
                contract: entry.tx.contract,
                is_nft: false,
            },
            Replacement::Cancel => Coin::native(self.coin.name.clone()),
        };

        let issued = self.send(&wallet, draft, Some(entry.tx.nonce), &coin).await?;
        self.pending.mark_replaced(&hash, issued.hash);
        tracing::info!(
            coin = %self.coin.name,
            original = %hash,
            replacement = %issued.hash,
            mode = ?mode,
            "Pending transaction replaced"
        );
        Ok(issued)
    }

    /// Move the balance of `from` to `to` if it reaches `threshold`.
    ///
    /// Native sweeps keep back the worst-case fee, so a balance that cannot
    /// cover it is left alone. NFT balances are counts, not amounts, and are
    /// never swept.
    pub async fn sweep(
        &self,
        private_key: &str,
        from: Address,
        to: Address,
        threshold: U256,
    ) -> EngineResult<SweepOutcome> {
        if self.coin.is_nft {
            tracing::debug!(coin = %self.coin.name, "NFT balances are not swept");
            return Ok(SweepOutcome::skipped());
        }

        let balance = self.chain.balance(from, self.coin.contract).await?;
        if balance.is_zero() || balance < threshold {
            return Ok(SweepOutcome::skipped());
        }

        let amount = if self.coin.is_native() {
            let (fee_cap, _) = self.builder.fees().await?;
            let reserve = U256::from(NATIVE_TRANSFER_GAS) * U256::from(fee_cap);
            if balance <= reserve {
                tracing::debug!(
                    coin = %self.coin.name,
                    address = %from,
                    balance = %balance,
                    reserve = %reserve,
                    "Balance does not cover the sweep fee"
                );
                return Ok(SweepOutcome::skipped());
            }
            balance - reserve
        } else {
            balance
        };

        let issued = self.issue(private_key, to, amount, None, self.coin.contract).await?;
        Ok(SweepOutcome {
            amount,
            issued: Some(issued),
        })
    }

    async fn send(
        &self,
        wallet: &Wallet,
        draft: TransferDraft,
        nonce: Option<u64>,
        coin: &Coin,
    ) -> EngineResult<IssuedTransfer> {
        let result = self.send_inner(wallet, draft, nonce, coin).await;
        metrics::record_transfer(&coin.name, result.is_ok());
        if let Err(e) = &result {
            tracing::warn!(coin = %coin.name, from = %wallet.address(), error = %e, "Transfer failed");
        }
        result
    }

    async fn send_inner(
        &self,
        wallet: &Wallet,
        draft: TransferDraft,
        nonce: Option<u64>,
        coin: &Coin,
    ) -> EngineResult<IssuedTransfer> {
        self.pending.check_capacity()?;

        let from = wallet.address();
        let lease = self.nonces.reserve(from, nonce).await?;
        let nonce = lease.nonce();
        let signed = wallet.sign_transfer(&draft.with_nonce(nonce))?;
        self.chain.broadcast(&signed).await?;
        lease.commit();

        let tx = Transaction {
            hash: signed.hash,
            block_number: None,
            block_hash: None,
            from,
            to: draft.call_to,
            value: draft.value,
            input: draft.input,
            nonce,
            gas_limit: draft.gas_limit,
            fee: FeeParams::Dynamic {
                max_fee_per_gas: draft.max_fee_per_gas,
                max_priority_fee_per_gas: draft.max_priority_fee_per_gas,
            },
            contract: coin.contract,
            coin: coin.name.clone(),
            log_index: None,
            status: TxStatus::Pending,
            has_check: false,
            dirty: true,
        };
        self.pending.insert(tx.clone());

        tracing::info!(
            coin = %coin.name,
            from = %from,
            to = %tx.to,
            nonce,
            tx_hash = %tx.hash,
            "Transfer broadcast"
        );

        Ok(IssuedTransfer {
            from,
            hash: tx.hash,
            nonce,
            tx,
        })
    }
}
