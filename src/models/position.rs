//! Position snapshots for source and user portfolios.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a perpetual position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "long",
            PositionSide::Short => "short",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "long" | "buy" | "b" => Some(PositionSide::Long),
            "short" | "sell" | "a" | "s" => Some(PositionSide::Short),
            _ => None,
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Point-in-time view of one open position, indexed by symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionSnapshot {
    /// Asset symbol (e.g. "BTC")
    pub symbol: String,

    /// Long or short
    pub side: PositionSide,

    /// Dollar-equivalent size, independent of margin used
    pub notional_value: Decimal,

    /// Declared leverage
    #[serde(default = "default_leverage")]
    pub leverage: u32,

    /// Position size in units of the asset
    #[serde(default)]
    pub size: Decimal,

    /// Average entry price
    #[serde(default)]
    pub entry_price: Decimal,
}

fn default_leverage() -> u32 {
    1
}

impl PositionSnapshot {
    /// Create a snapshot from notional value only.
    pub fn new(symbol: impl Into<String>, side: PositionSide, notional_value: Decimal, leverage: u32) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            notional_value,
            leverage,
            size: Decimal::ZERO,
            entry_price: Decimal::ZERO,
        }
    }

    /// Attach size and entry price (needed to merge into this position).
    pub fn with_fill(mut self, size: Decimal, entry_price: Decimal) -> Self {
        self.size = size;
        self.entry_price = entry_price;
        self
    }

    /// Whether size and entry price are known, so a fill can be averaged in.
    pub fn has_cost_basis(&self) -> bool {
        self.size > Decimal::ZERO && self.entry_price > Decimal::ZERO
    }
}

/// A user position after a copied fill has been averaged into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedPosition {
    pub symbol: String,
    pub side: PositionSide,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub leverage: u32,
}

impl MergedPosition {
    /// Average a new fill into an existing position.
    ///
    /// `entry = (existing_size * existing_entry + added_size * added_entry) / (existing_size + added_size)`
    pub fn merge(existing: &PositionSnapshot, added_size: Decimal, added_entry_price: Decimal) -> Self {
        let total_size = existing.size + added_size;
        let total_cost = existing.size * existing.entry_price + added_size * added_entry_price;

        let entry_price = if total_size.is_zero() {
            existing.entry_price
        } else {
            total_cost / total_size
        };

        Self {
            symbol: existing.symbol.clone(),
            side: existing.side,
            size: total_size,
            entry_price,
            leverage: existing.leverage,
        }
    }

    /// Notional at the averaged entry price.
    pub fn notional(&self) -> Decimal {
        self.size * self.entry_price
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_weighted_average_merge() {
        let existing = PositionSnapshot::new("BTC", PositionSide::Long, dec!(60000), 5)
            .with_fill(dec!(1), dec!(60000));

        let merged = MergedPosition::merge(&existing, dec!(0.5), dec!(62000));

        assert_eq!(merged.size, dec!(1.5));
        assert_eq!(merged.entry_price.round(), dec!(60667));
        assert_eq!(merged.leverage, 5);
        // Cost basis is preserved: 60000 + 31000
        assert_eq!(merged.notional().round_dp(6), dec!(91000));
    }

    #[test]
    fn test_side_parsing() {
        assert_eq!(PositionSide::from_str("LONG"), Some(PositionSide::Long));
        assert_eq!(PositionSide::from_str("sell"), Some(PositionSide::Short));
        assert_eq!(PositionSide::from_str("flat"), None);
    }

    #[test]
    fn test_snapshot_defaults_from_json() {
        let snap: PositionSnapshot =
            serde_json::from_str(r#"{"symbol":"ETH","side":"short","notionalValue":"300"}"#).unwrap();
        assert_eq!(snap.leverage, 1);
        assert_eq!(snap.notional_value, dec!(300));
        assert!(!snap.has_cost_basis());
    }
}
