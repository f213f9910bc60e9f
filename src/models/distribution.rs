//! Normalized percentage distribution of a source portfolio.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{PositionCopyRequest, PositionSide};

/// One symbol's share of the source portfolio and its proportional target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionEntry {
    pub symbol: String,
    pub side: PositionSide,
    /// Share of total source notional (0..1)
    pub percentage_of_portfolio: Decimal,
    /// `available_balance * allocation_fraction * percentage_of_portfolio`, before minimum-size adjustment
    pub target_notional: Decimal,
    pub leverage: u32,
}

/// Distribution in source snapshot order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionDistribution {
    pub entries: Vec<DistributionEntry>,
    /// Capital the targets were computed against
    pub allocated_capital: Decimal,
    /// Sum of source notional values
    pub source_total: Decimal,
}

impl PositionDistribution {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, symbol: &str) -> Option<&DistributionEntry> {
        self.entries.iter().find(|e| e.symbol == symbol)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.symbol.as_str())
    }

    /// Sum of all percentages (1 for a complete distribution).
    pub fn percentage_sum(&self) -> Decimal {
        self.entries.iter().map(|e| e.percentage_of_portfolio).sum()
    }

    /// Whether percentages sum to 1 within `tolerance`.
    pub fn is_complete(&self, tolerance: Decimal) -> bool {
        (self.percentage_sum() - Decimal::ONE).abs() <= tolerance
    }
}

/// Distribution captured at copy time, kept as the user's target ratio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetRatio {
    pub account: String,
    pub source_wallet: String,
    pub allocation_fraction: Decimal,
    pub distribution: PositionDistribution,
    pub captured_at: DateTime<Utc>,
}

impl TargetRatio {
    /// Capture `distribution` as the target for this copy relationship.
    pub fn capture(request: &PositionCopyRequest, distribution: PositionDistribution) -> Self {
        Self {
            account: request.account().to_string(),
            source_wallet: request.source_wallet().to_string(),
            allocation_fraction: request.allocation_fraction(),
            distribution,
            captured_at: Utc::now(),
        }
    }
}
