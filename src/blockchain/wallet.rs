//! Custodial key handling and transaction signing.
//!
//! # Security
//! - The withdrawal key is loaded ONLY from an environment variable
//! - Keys are never logged; `Debug` prints the address only

use alloy::consensus::{SignableTransaction, TxEip1559, TxEnvelope};
use alloy::eips::eip2718::Encodable2718;
use alloy::network::TxSignerSync;
use alloy::primitives::{Address, Bytes, TxKind, U256};
use alloy::signers::local::PrivateKeySigner;

use crate::blockchain::types::{ChainError, ChainResult, SignedTransaction};

/// Unsigned EIP-1559 transfer, fully parameterised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransfer {
    pub nonce: u64,
    pub to: Address,
    pub value: U256,
    pub input: Bytes,
    pub gas_limit: u64,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

/// A signing key bound to a chain.
#[derive(Clone)]
pub struct Wallet {
    signer: PrivateKeySigner,
    /// Chain ID for EIP-155 replay protection.
    chain_id: u64,
}

impl Wallet {
    /// Create a wallet from a hex-encoded private key string.
    ///
    /// # Arguments
    /// * `private_key_hex` - Hex string (with or without 0x prefix)
    /// * `chain_id` - Chain ID for transaction signing
    pub fn from_private_key(private_key_hex: &str, chain_id: u64) -> ChainResult<Self> {
        let key_hex = private_key_hex.trim();
        let key_hex = key_hex.strip_prefix("0x").unwrap_or(key_hex);

        let signer: PrivateKeySigner = key_hex
            .parse()
            .map_err(|e| ChainError::Wallet(format!("Invalid private key format: {}", e)))?;

        Ok(Self { signer, chain_id })
    }

    /// Load a wallet from the environment variable named `var`.
    pub fn from_env(var: &str, chain_id: u64) -> ChainResult<Self> {
        let private_key = std::env::var(var).map_err(|_| {
            ChainError::Wallet(format!("Environment variable {} not set", var))
        })?;

        Self::from_private_key(&private_key, chain_id)
    }

    /// Generate a fresh random key.
    pub fn generate(chain_id: u64) -> Self {
        Self {
            signer: PrivateKeySigner::random(),
            chain_id,
        }
    }

    /// Get the wallet's address.
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Get the chain ID this wallet is configured for.
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Hex encoding of the private key, without `0x`, for the key store.
    pub fn private_key_hex(&self) -> String {
        alloy::hex::encode(self.signer.to_bytes())
    }

    /// Sign an EIP-1559 transfer and encode it for broadcast.
    pub fn sign_transfer(&self, transfer: &UnsignedTransfer) -> ChainResult<SignedTransaction> {
        let mut tx = TxEip1559 {
            chain_id: self.chain_id,
            nonce: transfer.nonce,
            gas_limit: transfer.gas_limit,
            max_fee_per_gas: transfer.max_fee_per_gas,
            max_priority_fee_per_gas: transfer.max_priority_fee_per_gas,
            to: TxKind::Call(transfer.to),
            value: transfer.value,
            access_list: Default::default(),
            input: transfer.input.clone(),
        };

        let signature = self
            .signer
            .sign_transaction_sync(&mut tx)
            .map_err(|e| ChainError::Wallet(format!("Signing failed: {}", e)))?;

        let signed = tx.into_signed(signature);
        let hash = *signed.hash();
        let envelope = TxEnvelope::Eip1559(signed);

        Ok(SignedTransaction {
            hash,
            raw: envelope.encoded_2718().into(),
        })
    }
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.address())
            .field("chain_id", &self.chain_id)
            .finish()
    }
}
