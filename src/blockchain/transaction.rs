//! Transaction drafting: payload, gas limit and fee parameters.
//!
//! # Responsibilities
//! - Encode native, ERC-20 and ERC-721 transfers
//! - Read fresh fee suggestions on every draft
//! - Estimate gas for contract calls, with a doubling safety margin
//! - Derive replacement (speed-up / cancel) drafts at a fixed nonce

use alloy::primitives::{Address, Bytes, U256};
use std::sync::Arc;

use crate::blockchain::abi;
use crate::blockchain::client::ChainClient;
use crate::blockchain::types::{CallRequest, ChainResult, Coin, FeeParams, Transaction};
use crate::blockchain::wallet::UnsignedTransfer;

/// Gas limit for plain value transfers. 21000 is the exact cost; the margin
/// covers receivers with cheap fallback logic.
pub const NATIVE_TRANSFER_GAS: u64 = 28_000;

/// Multiplier applied to estimated gas for contract calls.
pub const CONTRACT_GAS_MULTIPLIER: u64 = 2;

/// Multiplier applied to fees when replacing a pending transaction.
pub const REPLACEMENT_FEE_MULTIPLIER: u128 = 2;

/// A transfer with everything but its nonce decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferDraft {
    pub from: Address,
    /// On-chain recipient: the token contract for token transfers.
    pub call_to: Address,
    pub value: U256,
    pub input: Bytes,
    pub gas_limit: u64,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

impl TransferDraft {
    pub fn with_nonce(&self, nonce: u64) -> UnsignedTransfer {
        UnsignedTransfer {
            nonce,
            to: self.call_to,
            value: self.value,
            input: self.input.clone(),
            gas_limit: self.gas_limit,
            max_fee_per_gas: self.max_fee_per_gas,
            max_priority_fee_per_gas: self.max_priority_fee_per_gas,
        }
    }

    /// Worst-case fee this draft can spend.
    pub fn max_fee_cost(&self) -> U256 {
        U256::from(self.gas_limit) * U256::from(self.max_fee_per_gas)
    }
}

/// Replacement mode for a pending transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replacement {
    /// Same call, higher fees.
    SpeedUp,
    /// Zero-value self transfer, higher fees.
    Cancel,
}

/// Call target, value and payload for moving `amount` of `coin` to `to`.
///
/// `coin == None` is a native transfer. For NFTs `amount` is the token id.
pub fn transfer_call(from: Address, to: Address, amount: U256, coin: Option<&Coin>) -> (Address, U256, Bytes) {
    match coin.and_then(|c| c.contract.map(|contract| (contract, c.is_nft))) {
        None => (to, amount, Bytes::new()),
        Some((contract, false)) => (contract, U256::ZERO, abi::encode_transfer(to, amount)),
        Some((contract, true)) => (contract, U256::ZERO, abi::encode_transfer_from(from, to, amount)),
    }
}

/// Transaction builder for common operations.
#[derive(Clone)]
pub struct TxBuilder {
    client: Arc<dyn ChainClient>,
}

impl TxBuilder {
    /// Create a new transaction builder.
    pub fn new(client: Arc<dyn ChainClient>) -> Self {
        Self { client }
    }

    /// Current fee cap and tip, with the cap never below the tip.
    pub async fn fees(&self) -> ChainResult<(u128, u128)> {
        let tip = self.client.suggest_tip().await?;
        let cap = self.client.suggest_fee_cap().await?;
        Ok((cap.max(tip), tip))
    }

    /// Draft a transfer with fresh fees and a gas limit.
    ///
    /// # Arguments
    /// * `from` - Sender address
    /// * `to` - Logical recipient
    /// * `amount` - Value, token amount or token id
    /// * `coin` - Token being moved, `None` for the native coin
    pub async fn build(
        &self,
        from: Address,
        to: Address,
        amount: U256,
        coin: Option<&Coin>,
    ) -> ChainResult<TransferDraft> {
        let (call_to, value, input) = transfer_call(from, to, amount, coin);

        let gas_limit = if input.is_empty() {
            NATIVE_TRANSFER_GAS
        } else {
            let estimated = self
                .client
                .estimate_gas(&CallRequest {
                    from,
                    to: call_to,
                    value,
                    input: input.clone(),
                })
                .await?;
            estimated.saturating_mul(CONTRACT_GAS_MULTIPLIER)
        };

        let (max_fee_per_gas, max_priority_fee_per_gas) = self.fees().await?;

        Ok(TransferDraft {
            from,
            call_to,
            value,
            input,
            gas_limit,
            max_fee_per_gas,
            max_priority_fee_per_gas,
        })
    }

    /// Draft a replacement for `pending`, to be signed at its nonce.
    pub async fn replacement(&self, pending: &Transaction, mode: Replacement) -> ChainResult<TransferDraft> {
        let (fresh_cap, fresh_tip) = self.fees().await?;
        let (old_cap, old_tip) = match pending.fee {
            FeeParams::Dynamic {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => (max_fee_per_gas, max_priority_fee_per_gas),
            FeeParams::Legacy { gas_price } => (gas_price, gas_price),
        };
        let max_fee_per_gas = fresh_cap.max(old_cap).saturating_mul(REPLACEMENT_FEE_MULTIPLIER);
        let max_priority_fee_per_gas = fresh_tip
            .max(old_tip)
            .saturating_mul(REPLACEMENT_FEE_MULTIPLIER)
            .min(max_fee_per_gas);

        let draft = match mode {
            Replacement::SpeedUp => TransferDraft {
                from: pending.from,
                call_to: pending.to,
                value: pending.value,
                input: pending.input.clone(),
                gas_limit: pending.gas_limit.max(NATIVE_TRANSFER_GAS),
                max_fee_per_gas,
                max_priority_fee_per_gas,
            },
            Replacement::Cancel => TransferDraft {
                from: pending.from,
                call_to: pending.from,
                value: U256::ZERO,
                input: Bytes::new(),
                gas_limit: NATIVE_TRANSFER_GAS,
                max_fee_per_gas,
                max_priority_fee_per_gas,
            },
        };
        Ok(draft)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_call() {
        let to = Address::repeat_byte(2);
        let (call_to, value, input) = transfer_call(Address::repeat_byte(1), to, U256::from(5), None);
        assert_eq!(call_to, to);
        assert_eq!(value, U256::from(5));
        assert!(input.is_empty());

        let native = Coin::native("ETH");
        let (call_to, _, input) = transfer_call(Address::repeat_byte(1), to, U256::from(5), Some(&native));
        assert_eq!(call_to, to);
        assert!(input.is_empty());
    }

    #[test]
    fn test_token_call_targets_contract() {
        let contract = Address::repeat_byte(0xcc);
        let to = Address::repeat_byte(2);
        let coin = Coin::token("USDX", contract, false);
        let (call_to, value, input) = transfer_call(Address::repeat_byte(1), to, U256::from(5), Some(&coin));
        assert_eq!(call_to, contract);
        assert_eq!(value, U256::ZERO);
        let decoded = abi::decode_transfer_payload(&input).unwrap();
        assert_eq!(decoded.to, to);
        assert_eq!(decoded.value, U256::from(5));
    }

    #[test]
    fn test_nft_call_uses_transfer_from() {
        let from = Address::repeat_byte(1);
        let coin = Coin::token("PUNK", Address::repeat_byte(0xcc), true);
        let (_, _, input) = transfer_call(from, Address::repeat_byte(2), U256::from(77), Some(&coin));
        let decoded = abi::decode_transfer_payload(&input).unwrap();
        assert_eq!(decoded.from, Some(from));
        assert_eq!(decoded.value, U256::from(77));
    }

    #[test]
    fn test_max_fee_cost() {
        let draft = TransferDraft {
            from: Address::ZERO,
            call_to: Address::ZERO,
            value: U256::ZERO,
            input: Bytes::new(),
            gas_limit: NATIVE_TRANSFER_GAS,
            max_fee_per_gas: 10,
            max_priority_fee_per_gas: 1,
        };
        assert_eq!(draft.max_fee_cost(), U256::from(280_000u64));
        assert_eq!(draft.with_nonce(4).nonce, 4);
    }
}
