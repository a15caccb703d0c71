//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the wallet
//! service. All types derive Serde traits for deserialization from config files.

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};

/// Root configuration for the hot-wallet service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct WalletConfig {
    /// Chain RPC settings shared by every engine.
    pub chain: ChainConfig,

    /// Key-value store settings.
    pub storage: StorageConfig,

    /// Webhook endpoints for deposit and withdrawal notices.
    pub notify: NotifyConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// One engine per monitored asset.
    pub engines: Vec<EngineConfig>,
}

/// Chain RPC configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChainConfig {
    /// JSON-RPC endpoint URL.
    pub rpc_url: String,

    /// Failover JSON-RPC endpoint URLs.
    pub failover_urls: Vec<String>,

    /// Chain ID (e.g., 1 for Ethereum mainnet, 31337 for local Anvil).
    pub chain_id: u64,

    /// RPC request timeout in seconds.
    pub rpc_timeout_secs: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".to_string(),
            failover_urls: Vec::new(),
            chain_id: 1,
            rpc_timeout_secs: 10,
        }
    }
}

/// Key-value store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON snapshot file. Empty keeps the store in memory only.
    pub path: String,

    /// Prefix of custodial wallet keys (`prefix + address -> private key`).
    pub wallet_prefix: String,

    /// Prefix of the withdrawal index (`prefix + hash -> order id`).
    pub hash_prefix: String,

    /// Prefix of settled transaction records.
    pub tx_prefix: String,

    /// Prefix of coins registered at runtime.
    pub coin_prefix: String,

    /// Prefix of withdrawal order records (`prefix + order id -> order`).
    pub order_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "wallet-store.json".to_string(),
            wallet_prefix: "wallet-".to_string(),
            hash_prefix: "hash-".to_string(),
            tx_prefix: "tx-".to_string(),
            coin_prefix: "coin-".to_string(),
            order_prefix: "order-".to_string(),
        }
    }
}

/// Webhook configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Deposit callback URL. Empty disables deposit delivery.
    pub deposit_url: String,

    /// Withdrawal settlement callback URL.
    pub withdraw_url: String,

    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            deposit_url: String::new(),
            withdraw_url: String::new(),
            timeout_secs: 10,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Sweep retry policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Attempts before a sweep is dead-lettered. 0 retries forever.
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            max_attempts: 0,
        }
    }
}

/// Per-asset engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Display name of the asset.
    pub coin_name: String,

    /// Token contract address. Empty for the native coin.
    pub contract: String,

    /// The contract is an ERC-721 collection.
    pub is_nft: bool,

    /// Blocks required on top of a receipt's block, inclusive.
    pub confirmations: u64,

    /// Maximum blocks per scan pass.
    pub batch_size: u64,

    /// First block to scan. 0 starts from the current height.
    pub start_block: u64,

    /// Sleep between scan passes when no new block exists.
    pub block_poll_secs: u64,

    /// Receipt tracker pool size.
    pub receipt_workers: usize,

    /// Delay before an unresolved receipt is checked again.
    pub receipt_retry_secs: u64,

    /// Items a scheduler may hold before `submit` waits.
    pub queue_capacity: usize,

    /// Maximum in-flight transactions issued by this engine.
    pub pending_capacity: usize,

    /// Age after which an unresolved pending entry is evicted.
    pub pending_ttl_secs: u64,

    /// Collection timer period.
    pub collection_interval_secs: u64,

    /// Sweep worker pool size.
    pub collection_workers: usize,

    /// Decimal minimum balance that triggers a sweep. "0" disables collection.
    pub sweep_threshold: String,

    /// Destination of sweeps.
    pub treasury_address: String,

    /// Environment variable holding the withdrawal key.
    pub withdraw_key_env: String,

    /// Sweep retry policy.
    pub sweep_retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            coin_name: "ETH".to_string(),
            contract: String::new(),
            is_nft: false,
            confirmations: 12,
            batch_size: 100,
            start_block: 0,
            block_poll_secs: 5,
            receipt_workers: 4,
            receipt_retry_secs: 5,
            queue_capacity: 256,
            pending_capacity: 10_000,
            pending_ttl_secs: 86_400,
            collection_interval_secs: 600,
            collection_workers: 2,
            sweep_threshold: "0".to_string(),
            treasury_address: String::new(),
            withdraw_key_env: "HOT_WALLET_WITHDRAW_KEY".to_string(),
            sweep_retry: RetryConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Template for a runtime-added coin, keeping this engine's tuning.
    pub fn for_coin(&self, name: &str, contract: &str, is_nft: bool) -> Self {
        Self {
            coin_name: name.to_string(),
            contract: contract.to_string(),
            is_nft,
            start_block: 0,
            ..self.clone()
        }
    }

    /// Parsed token contract, `None` for the native coin.
    pub fn contract_address(&self) -> Result<Option<Address>, String> {
        parse_optional_address(&self.contract)
    }

    /// Parsed sweep destination, `None` when unset.
    pub fn treasury(&self) -> Result<Option<Address>, String> {
        parse_optional_address(&self.treasury_address)
    }

    /// Parsed sweep threshold in base units.
    pub fn threshold(&self) -> Result<U256, String> {
        U256::from_str_radix(self.sweep_threshold.trim(), 10)
            .map_err(|e| format!("'{}' is not a decimal amount: {}", self.sweep_threshold, e))
    }
}

fn parse_optional_address(raw: &str) -> Result<Option<Address>, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<Address>()
        .map(Some)
        .map_err(|e| format!("'{}' is not an address: {}", raw, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_file_uses_defaults() {
        let config: WalletConfig = toml::from_str(
            r#"
            [chain]
            rpc_url = "http://127.0.0.1:8545"

            [[engines]]
            coin_name = "USDX"
            contract = "0x000000000000000000000000000000000000000c"
            "#,
        )
        .unwrap();

        assert_eq!(config.chain.chain_id, 1);
        assert_eq!(config.storage.wallet_prefix, "wallet-");
        assert_eq!(config.engines.len(), 1);
        assert_eq!(config.engines[0].batch_size, 100);
        assert_eq!(config.engines[0].sweep_retry.max_attempts, 0);
    }

    #[test]
    fn test_for_coin_resets_cursor() {
        let base = EngineConfig {
            start_block: 900,
            confirmations: 3,
            ..EngineConfig::default()
        };
        let derived = base.for_coin("PUNK", "0xabc", true);
        assert_eq!(derived.coin_name, "PUNK");
        assert!(derived.is_nft);
        assert_eq!(derived.start_block, 0);
        assert_eq!(derived.confirmations, 3);
    }

    #[test]
    fn test_parsed_fields() {
        let mut config = EngineConfig::default();
        assert_eq!(config.contract_address().unwrap(), None);
        assert_eq!(config.threshold().unwrap(), U256::ZERO);

        config.contract = "0x000000000000000000000000000000000000000c".to_string();
        config.sweep_threshold = "1000000000000000000".to_string();
        assert!(config.contract_address().unwrap().is_some());
        assert_eq!(config.threshold().unwrap(), U256::from(10u64).pow(U256::from(18)));

        config.sweep_threshold = "1.5".to_string();
        assert!(config.threshold().is_err());
        config.treasury_address = "nope".to_string();
        assert!(config.treasury().is_err());
    }
}
