//! Replication configuration.

use std::env;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::models::{MinimumTable, PlatformMinimum, ScalingMode};

/// Configuration for sizing, validation and execution of copy requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Platform orders are placed on (used for minimum lookups)
    pub platform: String,

    /// How entries below the platform minimum are handled
    pub scaling_mode: ScalingMode,

    /// Minimum order notional when no table entry matches
    pub default_minimum_notional: Decimal,

    /// Per-symbol (or `*`) platform minimums
    pub minimums: Vec<PlatformMinimum>,

    /// Decimal places of the quote currency (2 = cents)
    pub notional_scale: u32,

    /// Decimal places for order sizes
    pub size_scale: u32,

    /// Per-order submission timeout
    pub order_timeout_secs: u64,

    /// Absolute percentage drift that makes a rebalance worth proposing
    pub rebalance_threshold: Decimal,

    /// Prices older than this are rejected as stale
    pub max_price_age_secs: i64,

    /// Base URL of the portfolio / market data API
    pub data_api_url: String,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            platform: "hyperliquid".to_string(),
            scaling_mode: ScalingMode::Proportional,
            default_minimum_notional: dec!(10),  // $10 exchange minimum
            minimums: Vec::new(),
            notional_scale: 2,
            size_scale: 6,
            order_timeout_secs: 15,
            rebalance_threshold: dec!(0.05),     // 5 percentage points
            max_price_age_secs: 60,
            data_api_url: "http://localhost:8080".to_string(),
        }
    }
}

impl ReplicationConfig {
    /// Defaults overridden by environment variables (a `.env` file is loaded first).
    ///
    /// - COPIER_PLATFORM
    /// - COPIER_SCALING_MODE (proportional | minimum_enforced)
    /// - COPIER_MIN_NOTIONAL
    /// - COPIER_ORDER_TIMEOUT_SECS
    /// - COPIER_REBALANCE_THRESHOLD
    /// - COPIER_MAX_PRICE_AGE_SECS
    /// - COPIER_DATA_API_URL
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::default();

        if let Ok(platform) = env::var("COPIER_PLATFORM") {
            config.platform = platform;
        }
        if let Ok(mode) = env::var("COPIER_SCALING_MODE") {
            config.scaling_mode = ScalingMode::from_str(&mode);
        }
        if let Ok(min) = env::var("COPIER_MIN_NOTIONAL") {
            config.default_minimum_notional = min.parse().context("Invalid COPIER_MIN_NOTIONAL")?;
        }
        if let Ok(secs) = env::var("COPIER_ORDER_TIMEOUT_SECS") {
            config.order_timeout_secs = secs.parse().context("Invalid COPIER_ORDER_TIMEOUT_SECS")?;
        }
        if let Ok(threshold) = env::var("COPIER_REBALANCE_THRESHOLD") {
            config.rebalance_threshold = threshold
                .parse()
                .context("Invalid COPIER_REBALANCE_THRESHOLD")?;
        }
        if let Ok(age) = env::var("COPIER_MAX_PRICE_AGE_SECS") {
            config.max_price_age_secs = age.parse().context("Invalid COPIER_MAX_PRICE_AGE_SECS")?;
        }
        if let Ok(url) = env::var("COPIER_DATA_API_URL") {
            config.data_api_url = url;
        }

        Ok(config)
    }

    /// Load from a JSON file; missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse config {}", path.display()))
    }

    pub fn minimum_table(&self) -> MinimumTable {
        MinimumTable::with_entries(self.default_minimum_notional, self.minimums.clone())
    }

    pub fn order_timeout(&self) -> Duration {
        Duration::from_secs(self.order_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: ReplicationConfig = serde_json::from_str(
            r#"{"scaling_mode":"minimum_enforced","minimums":[{"platform":"hyperliquid","symbol":"BTC","minimumNotional":"12"}]}"#,
        )
        .unwrap();

        assert_eq!(config.scaling_mode, ScalingMode::MinimumEnforced);
        assert_eq!(config.notional_scale, 2);
        assert_eq!(config.minimum_table().minimum_for("hyperliquid", "BTC"), dec!(12));
        assert_eq!(config.minimum_table().minimum_for("hyperliquid", "ETH"), dec!(10));
    }

    #[test]
    fn test_order_timeout() {
        let config = ReplicationConfig {
            order_timeout_secs: 3,
            ..Default::default()
        };
        assert_eq!(config.order_timeout(), Duration::from_secs(3));
    }
}
