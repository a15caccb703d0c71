//! JSON webhook delivery.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use crate::config::schema::NotifyConfig;
use crate::notify::{DepositNotice, Notifier, NotifyError, WithdrawalNotice};
use crate::observability::metrics;

/// Posts notices to the configured callback URLs.
///
/// An empty URL turns that kind of notice into a logged no-op.
pub struct WebhookNotifier {
    client: Client,
    deposit_url: String,
    withdraw_url: String,
}

impl WebhookNotifier {
    pub fn new(config: &NotifyConfig) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            deposit_url: config.deposit_url.clone(),
            withdraw_url: config.withdraw_url.clone(),
        })
    }

    async fn post<T: Serialize + Sync>(&self, kind: &'static str, url: &str, body: &T) -> Result<(), NotifyError> {
        if url.is_empty() {
            tracing::info!(kind, "Webhook not configured, dropping notice");
            return Ok(());
        }

        let result = match self.client.post(url).json(body).send().await {
            Ok(resp) if resp.status().is_success() => Ok(()),
            Ok(resp) => Err(NotifyError::Status {
                status: resp.status().as_u16(),
            }),
            Err(e) => Err(NotifyError::Transport(e.to_string())),
        };

        metrics::record_notification(kind, result.is_ok());
        if let Err(e) = &result {
            tracing::warn!(kind, url, error = %e, "Webhook delivery failed");
        }
        result
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify_deposit(&self, notice: &DepositNotice) -> Result<(), NotifyError> {
        self.post("deposit", &self.deposit_url, notice).await
    }

    async fn notify_withdrawal_settled(&self, notice: &WithdrawalNotice) -> Result<(), NotifyError> {
        self.post("withdrawal", &self.withdraw_url, notice).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::types::TxStatus;
    use alloy::primitives::{Address, TxHash, U256};

    fn notice() -> DepositNotice {
        DepositNotice {
            hash: TxHash::repeat_byte(1),
            status: TxStatus::Success,
            to: Address::repeat_byte(2),
            amount: U256::from(5),
            coin: "ETH".to_string(),
            contract: None,
        }
    }

    #[tokio::test]
    async fn test_unconfigured_url_is_noop() {
        let notifier = WebhookNotifier::new(&NotifyConfig::default()).unwrap();
        assert!(notifier.notify_deposit(&notice()).await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_error() {
        let config = NotifyConfig {
            deposit_url: "http://127.0.0.1:1/deposit".to_string(),
            timeout_secs: 2,
            ..NotifyConfig::default()
        };
        let notifier = WebhookNotifier::new(&config).unwrap();
        let err = notifier.notify_deposit(&notice()).await.unwrap_err();
        assert!(matches!(err, NotifyError::Transport(_)));
    }

    /// Answer every request on an ephemeral port with `status`.
    async fn mock_endpoint(status: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let _ = socket.read(&mut buf).await;
                    let response = format!("HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n", status);
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        format!("http://{}/hook", addr)
    }

    #[tokio::test]
    async fn test_non_success_status_is_error() {
        let config = NotifyConfig {
            withdraw_url: mock_endpoint("503 Service Unavailable").await,
            ..NotifyConfig::default()
        };
        let notifier = WebhookNotifier::new(&config).unwrap();
        let notice = WithdrawalNotice {
            hash: TxHash::repeat_byte(1),
            status: TxStatus::Failed,
            order_id: "order-1".to_string(),
            to: Address::repeat_byte(2),
            amount: U256::from(5),
            coin: "ETH".to_string(),
        };
        let err = notifier.notify_withdrawal_settled(&notice).await.unwrap_err();
        assert!(matches!(err, NotifyError::Status { status: 503 }));
    }

    #[tokio::test]
    async fn test_success_status_is_delivered() {
        let config = NotifyConfig {
            deposit_url: mock_endpoint("200 OK").await,
            ..NotifyConfig::default()
        };
        let notifier = WebhookNotifier::new(&config).unwrap();
        assert!(notifier.notify_deposit(&notice()).await.is_ok());
    }
}
