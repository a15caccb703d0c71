//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Parse addresses, URLs and decimal amounts once, before startup
//! - Validate value ranges (timeouts > 0, pool sizes > 0)
//! - Detect engines monitoring the same asset twice
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: WalletConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::config::schema::{EngineConfig, WalletConfig};

/// One semantic problem in a config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Validate a parsed configuration.
pub fn validate_config(config: &WalletConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.chain.rpc_url.parse::<url::Url>().is_err() {
        errors.push(ValidationError::new("chain.rpc_url", "must be a valid URL"));
    }
    for (i, failover) in config.chain.failover_urls.iter().enumerate() {
        if failover.parse::<url::Url>().is_err() {
            errors.push(ValidationError::new(
                format!("chain.failover_urls[{}]", i),
                "must be a valid URL",
            ));
        }
    }
    if config.chain.chain_id == 0 {
        errors.push(ValidationError::new("chain.chain_id", "must be non-zero"));
    }
    if config.chain.rpc_timeout_secs == 0 {
        errors.push(ValidationError::new("chain.rpc_timeout_secs", "must be > 0"));
    }

    for (field, value) in [
        ("storage.wallet_prefix", &config.storage.wallet_prefix),
        ("storage.hash_prefix", &config.storage.hash_prefix),
        ("storage.tx_prefix", &config.storage.tx_prefix),
        ("storage.coin_prefix", &config.storage.coin_prefix),
        ("storage.order_prefix", &config.storage.order_prefix),
    ] {
        if value.is_empty() {
            errors.push(ValidationError::new(field, "must not be empty"));
        }
    }
    let prefixes: HashSet<&str> = [
        config.storage.wallet_prefix.as_str(),
        config.storage.hash_prefix.as_str(),
        config.storage.tx_prefix.as_str(),
        config.storage.coin_prefix.as_str(),
        config.storage.order_prefix.as_str(),
    ]
    .into_iter()
    .collect();
    if prefixes.len() != 5 {
        errors.push(ValidationError::new("storage", "key prefixes must be distinct"));
    }

    for (field, value) in [
        ("notify.deposit_url", &config.notify.deposit_url),
        ("notify.withdraw_url", &config.notify.withdraw_url),
    ] {
        if !value.is_empty() && value.parse::<url::Url>().is_err() {
            errors.push(ValidationError::new(field, "must be a valid URL"));
        }
    }
    if config.notify.timeout_secs == 0 {
        errors.push(ValidationError::new("notify.timeout_secs", "must be > 0"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "must be a socket address",
        ));
    }

    if config.engines.is_empty() {
        errors.push(ValidationError::new("engines", "at least one engine is required"));
    }

    let mut assets = HashSet::new();
    for (i, engine) in config.engines.iter().enumerate() {
        validate_engine(&format!("engines[{}]", i), engine, &mut errors);
        // Native engines share the `None` key.
        if let Ok(contract) = engine.contract_address() {
            if !assets.insert(contract) {
                errors.push(ValidationError::new(
                    format!("engines[{}].contract", i),
                    "asset is already monitored by another engine",
                ));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate one engine section, appending problems to `errors`.
pub fn validate_engine(path: &str, engine: &EngineConfig, errors: &mut Vec<ValidationError>) {
    let field = |name: &str| format!("{}.{}", path, name);

    if engine.coin_name.trim().is_empty() {
        errors.push(ValidationError::new(field("coin_name"), "must not be empty"));
    }
    match engine.contract_address() {
        Ok(None) if engine.is_nft => {
            errors.push(ValidationError::new(field("is_nft"), "NFT engines need a contract"));
        }
        Ok(_) => {}
        Err(e) => errors.push(ValidationError::new(field("contract"), e)),
    }
    if engine.confirmations == 0 {
        errors.push(ValidationError::new(field("confirmations"), "must be >= 1"));
    }
    for (name, value) in [
        ("batch_size", engine.batch_size),
        ("block_poll_secs", engine.block_poll_secs),
        ("receipt_retry_secs", engine.receipt_retry_secs),
        ("pending_ttl_secs", engine.pending_ttl_secs),
        ("collection_interval_secs", engine.collection_interval_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field(name), "must be > 0"));
        }
    }
    for (name, value) in [
        ("receipt_workers", engine.receipt_workers),
        ("collection_workers", engine.collection_workers),
        ("queue_capacity", engine.queue_capacity),
        ("pending_capacity", engine.pending_capacity),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field(name), "must be > 0"));
        }
    }

    let treasury = engine.treasury();
    if let Err(e) = &treasury {
        errors.push(ValidationError::new(field("treasury_address"), e.clone()));
    }
    match engine.threshold() {
        Ok(threshold) if !threshold.is_zero() => {
            if matches!(treasury, Ok(None)) {
                errors.push(ValidationError::new(
                    field("treasury_address"),
                    "required when sweep_threshold is non-zero",
                ));
            }
        }
        Ok(_) => {}
        Err(e) => errors.push(ValidationError::new(field("sweep_threshold"), e)),
    }

    if engine.withdraw_key_env.trim().is_empty() {
        errors.push(ValidationError::new(field("withdraw_key_env"), "must not be empty"));
    }
    if engine.sweep_retry.base_delay_ms == 0 {
        errors.push(ValidationError::new(field("sweep_retry.base_delay_ms"), "must be > 0"));
    }
    if engine.sweep_retry.max_delay_ms < engine.sweep_retry.base_delay_ms {
        errors.push(ValidationError::new(
            field("sweep_retry.max_delay_ms"),
            "must be >= base_delay_ms",
        ));
    }
}
