//! HTTP client for source-wallet positions and market prices.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoffBuilder;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::error::DataError;
use crate::models::PositionSnapshot;
use crate::trading::ReplicationConfig;

use super::types::{ApiPosition, ApiPrice};
use super::{MarketData, PortfolioProvider};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_PRICE_AGE_SECS: i64 = 60;
const MAX_RETRY_ELAPSED: Duration = Duration::from_secs(10);

/// Read-only client for the portfolio / market data API.
///
/// Reads are retried with exponential backoff on transport errors and 5xx
/// responses. This client never places orders.
pub struct DataClient {
    client: Client,
    base_url: String,
    max_price_age_secs: i64,
}

impl DataClient {
    /// Create a client for `base_url`.
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            max_price_age_secs: DEFAULT_MAX_PRICE_AGE_SECS,
        })
    }

    pub fn from_config(config: &ReplicationConfig) -> anyhow::Result<Self> {
        Ok(Self::new(config.data_api_url.clone())?.with_max_price_age(config.max_price_age_secs))
    }

    pub fn with_max_price_age(mut self, secs: i64) -> Self {
        self.max_price_age_secs = secs;
        self
    }

    /// GET `url` and decode JSON, classifying failures for the retry loop.
    ///
    /// A 404 is permanent and reported as `not_found`, which each endpoint
    /// chooses for itself.
    async fn get_json<T>(&self, url: &str, not_found: DataError) -> Result<T, DataError>
    where
        T: serde::de::DeserializeOwned + Send,
    {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(200))
            .with_max_elapsed_time(Some(MAX_RETRY_ELAPSED))
            .build();

        let not_found = &not_found;
        retry(policy, || async move {
            debug!(url = %url, "Fetching");

            let response = self.client.get(url).send().await.map_err(|e| {
                warn!(url = %url, error = %e, "Request failed, retrying");
                backoff::Error::transient(DataError::Unavailable(e.to_string()))
            })?;

            let status = response.status();
            if status == StatusCode::NOT_FOUND {
                return Err(backoff::Error::permanent(not_found.clone()));
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let err = DataError::Unavailable(format!("{} - {}", status, body));
                return Err(if status.is_server_error() {
                    warn!(url = %url, status = %status, "Server error, retrying");
                    backoff::Error::transient(err)
                } else {
                    backoff::Error::permanent(err)
                });
            }

            response.json::<T>().await.map_err(|e| {
                backoff::Error::permanent(DataError::Unavailable(format!(
                    "Failed to parse response: {}",
                    e
                )))
            })
        })
        .await
    }
}

#[async_trait]
impl PortfolioProvider for DataClient {
    async fn get_positions(&self, wallet: &str) -> Result<Vec<PositionSnapshot>, DataError> {
        let url = format!("{}/positions?user={}", self.base_url, wallet);
        let not_found = DataError::Unavailable(format!("no portfolio for wallet {}", wallet));
        let items: Vec<ApiPosition> = self.get_json(&url, not_found).await?;

        let positions = items
            .into_iter()
            .filter_map(|p| {
                let symbol = p.symbol.clone();
                let side = p.side.clone();
                let snapshot = p.into_snapshot();
                if snapshot.is_none() {
                    warn!(symbol = %symbol, side = %side, "Unknown position side");
                }
                snapshot
            })
            .collect::<Vec<_>>();

        debug!(wallet = %wallet, count = positions.len(), "Fetched positions");
        Ok(positions)
    }
}

#[async_trait]
impl MarketData for DataClient {
    async fn get_price(&self, symbol: &str) -> Result<Decimal, DataError> {
        let url = format!("{}/price?symbol={}", self.base_url, symbol);
        let quote: ApiPrice = self
            .get_json(&url, DataError::SymbolNotFound(symbol.to_string()))
            .await?;

        let age_secs = Utc::now().timestamp() - quote.timestamp;
        if age_secs > self.max_price_age_secs {
            return Err(DataError::Stale {
                symbol: symbol.to_string(),
                age_secs,
            });
        }
        if quote.price <= Decimal::ZERO {
            return Err(DataError::SymbolNotFound(symbol.to_string()));
        }

        Ok(quote.price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Local HTTP endpoint answering every request with an empty 404.
    async fn not_found_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    let _ = socket
                        .write_all(b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                        .await;
                });
            }
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = DataClient::new("http://localhost:9999/").unwrap();
        assert_eq!(client.base_url, "http://localhost:9999");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_unavailable() {
        let client = DataClient::new("http://127.0.0.1:9").unwrap();
        let err = client.get_positions("0xabc").await.unwrap_err();
        assert!(matches!(err, DataError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_not_found_depends_on_endpoint() {
        let client = DataClient::new(not_found_server().await).unwrap();

        let err = client.get_positions("0xabc").await.unwrap_err();
        assert!(matches!(err, DataError::Unavailable(msg) if msg.contains("0xabc")));

        let err = client.get_price("XYZ").await.unwrap_err();
        assert_eq!(err, DataError::SymbolNotFound("XYZ".to_string()));
    }
}
