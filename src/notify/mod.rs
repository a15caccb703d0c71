//! Outbound settlement notices.
//!
//! Both calls must be idempotent for the receiver: the tracker re-delivers
//! a notice until one delivery is acknowledged.

pub mod webhook;

use alloy::primitives::{Address, TxHash, U256};
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::blockchain::types::TxStatus;

pub use webhook::WebhookNotifier;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification transport error: {0}")]
    Transport(String),

    #[error("Notification rejected with HTTP {status}")]
    Status { status: u16 },
}

/// A confirmed transfer into a custodial address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepositNotice {
    pub hash: TxHash,
    pub status: TxStatus,
    pub to: Address,
    #[serde(serialize_with = "as_decimal")]
    pub amount: U256,
    pub coin: String,
    pub contract: Option<Address>,
}

/// The resolution of a withdrawal this system issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WithdrawalNotice {
    pub hash: TxHash,
    pub status: TxStatus,
    pub order_id: String,
    pub to: Address,
    #[serde(serialize_with = "as_decimal")]
    pub amount: U256,
    pub coin: String,
}

fn as_decimal<S: serde::Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_deposit(&self, notice: &DepositNotice) -> Result<(), NotifyError>;

    async fn notify_withdrawal_settled(&self, notice: &WithdrawalNotice) -> Result<(), NotifyError>;
}
