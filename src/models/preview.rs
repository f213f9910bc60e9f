//! Sized, validated copy plan shown to the user before execution.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::{PositionDistribution, PositionSide, PositionSnapshot};

/// How entries below the platform minimum are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingMode {
    /// Exact proportional sizes; entries below the minimum are skipped.
    #[default]
    Proportional,
    /// Entries below the minimum are raised to it, changing the allocation ratio.
    MinimumEnforced,
}

impl ScalingMode {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "minimum" | "minimum_enforced" | "minimum-enforced" | "enforced" => {
                Self::MinimumEnforced
            }
            _ => Self::Proportional,
        }
    }
}

impl fmt::Display for ScalingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalingMode::Proportional => write!(f, "proportional"),
            ScalingMode::MinimumEnforced => write!(f, "minimum-enforced"),
        }
    }
}

/// What the scaler did with an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Proportional,
    SkippedBelowMinimum,
    AdjustedToMinimum,
}

/// A distribution entry after price conversion and minimum-size scaling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaledPosition {
    pub symbol: String,
    pub side: PositionSide,
    pub leverage: u32,
    pub percentage_of_portfolio: Decimal,

    /// Proportional target before minimum adjustment
    pub target_notional: Decimal,
    /// Proportional target in asset units
    pub target_size: Decimal,

    /// Market price used for conversion
    pub price: Decimal,
    /// Platform minimum consulted
    pub minimum_notional: Decimal,

    /// Notional that will actually be ordered (zero when skipped)
    pub final_notional: Decimal,
    /// Size that will actually be ordered (zero when skipped)
    pub final_size: Decimal,

    /// `final_notional / target_notional`: 1 when proportional, 0 when skipped
    pub scaling_factor: Decimal,
    pub disposition: Disposition,

    /// User's current position in the symbol, merged on fill
    #[serde(default)]
    pub existing: Option<PositionSnapshot>,
}

impl ScaledPosition {
    pub fn is_executable(&self) -> bool {
        self.disposition != Disposition::SkippedBelowMinimum
    }

    pub fn is_skipped(&self) -> bool {
        self.disposition == Disposition::SkippedBelowMinimum
    }

    pub fn is_adjusted(&self) -> bool {
        self.disposition == Disposition::AdjustedToMinimum
    }
}

/// Go/no-go copy plan. Carries no timestamps so identical inputs give identical previews.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preview {
    pub request_id: Uuid,
    pub account: String,
    pub source_wallet: String,
    pub mode: ScalingMode,

    /// Entries in source snapshot order
    pub entries: Vec<ScaledPosition>,
    /// Distribution the entries were sized from
    pub distribution: PositionDistribution,

    pub available_balance: Decimal,
    pub allocation_fraction: Decimal,
    /// `available_balance * allocation_fraction`
    pub allocated_capital: Decimal,
    /// Sum of executable final notionals
    pub total_notional: Decimal,
    /// `available_balance - total_notional`
    pub remaining_balance: Decimal,

    pub skipped_count: usize,
    pub adjusted_count: usize,

    /// Ledger version the balance was read at
    pub balance_version: u64,
}

impl Preview {
    pub fn executable(&self) -> impl Iterator<Item = &ScaledPosition> {
        self.entries.iter().filter(|e| e.is_executable())
    }

    pub fn executable_count(&self) -> usize {
        self.executable().count()
    }

    /// Whether any entry's ratio differs from the pure-proportional value.
    pub fn diverges_from_proportional(&self) -> bool {
        self.adjusted_count > 0
    }
}

impl fmt::Display for Preview {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Copy Preview ({}) ===", self.mode)?;
        writeln!(f, "Source:      {}", self.source_wallet)?;
        writeln!(f, "Allocated:   ${:.2} of ${:.2}", self.allocated_capital, self.available_balance)?;
        writeln!(
            f,
            "\n{:<10} {:<6} {:>8} {:>12} {:>14} {:>14} {:>8}  {}",
            "SYMBOL", "SIDE", "PCT", "TARGET $", "FINAL $", "SIZE", "FACTOR", "STATUS"
        )?;
        writeln!(f, "{}", "-".repeat(92))?;

        for e in &self.entries {
            let status = match e.disposition {
                Disposition::Proportional => "ok",
                Disposition::SkippedBelowMinimum => "skipped (below minimum)",
                Disposition::AdjustedToMinimum => "raised to minimum",
            };
            writeln!(
                f,
                "{:<10} {:<6} {:>7.2}% {:>12.2} {:>14.2} {:>14} {:>8.3}  {}",
                e.symbol,
                e.side,
                e.percentage_of_portfolio * Decimal::ONE_HUNDRED,
                e.target_notional,
                e.final_notional,
                e.final_size,
                e.scaling_factor,
                status
            )?;
        }

        writeln!(f, "\nTotal:       ${:.2}", self.total_notional)?;
        writeln!(f, "Remaining:   ${:.2}", self.remaining_balance)?;
        write!(
            f,
            "Skipped:     {}   Adjusted: {}",
            self.skipped_count, self.adjusted_count
        )
    }
}
