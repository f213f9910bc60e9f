//! Drift between a captured target ratio and the source's current distribution.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{PositionCopyRequest, PositionSide};

/// Change in one symbol's share of the source portfolio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolDelta {
    pub symbol: String,
    /// Current side, or the stored side for a closed symbol
    pub side: PositionSide,
    pub stored_percentage: Decimal,
    pub current_percentage: Decimal,
    /// `current_percentage - stored_percentage`
    pub delta_percentage: Decimal,
    /// Source opened a position the user never copied
    pub is_new: bool,
    /// Source closed a position the user copied
    pub is_closed: bool,
    /// Source flipped direction
    pub side_changed: bool,
}

impl SymbolDelta {
    pub fn is_unchanged(&self) -> bool {
        self.delta_percentage.is_zero() && !self.is_new && !self.is_closed && !self.side_changed
    }
}

/// Proposed adjustment toward the source's current distribution. Never executed automatically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebalanceProposal {
    /// Stored symbols in stored order, then new symbols in current order
    pub deltas: Vec<SymbolDelta>,
    pub max_abs_delta: Decimal,
    /// Copy request reflecting the new target, for the user to preview
    pub proposed_request: Option<PositionCopyRequest>,
}

impl RebalanceProposal {
    pub fn delta_for(&self, symbol: &str) -> Option<&SymbolDelta> {
        self.deltas.iter().find(|d| d.symbol == symbol)
    }

    pub fn has_changes(&self) -> bool {
        self.deltas.iter().any(|d| !d.is_unchanged())
    }

    /// Whether drift is large enough to act on: any share moved more than
    /// `threshold`, or any position flipped side.
    pub fn exceeds(&self, threshold: Decimal) -> bool {
        self.max_abs_delta > threshold || self.deltas.iter().any(|d| d.side_changed)
    }

    pub fn new_symbols(&self) -> impl Iterator<Item = &SymbolDelta> {
        self.deltas.iter().filter(|d| d.is_new)
    }

    pub fn closed_symbols(&self) -> impl Iterator<Item = &SymbolDelta> {
        self.deltas.iter().filter(|d| d.is_closed)
    }
}

impl fmt::Display for RebalanceProposal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<10} {:<6} {:>10} {:>10} {:>10}  {}",
            "SYMBOL", "SIDE", "STORED", "CURRENT", "DELTA", "NOTE"
        )?;
        writeln!(f, "{}", "-".repeat(60))?;
        for d in &self.deltas {
            let note = if d.is_new {
                "new"
            } else if d.is_closed {
                "closed"
            } else if d.side_changed {
                "side flipped"
            } else {
                ""
            };
            writeln!(
                f,
                "{:<10} {:<6} {:>9.2}% {:>9.2}% {:>+9.2}%  {}",
                d.symbol,
                d.side,
                d.stored_percentage * Decimal::ONE_HUNDRED,
                d.current_percentage * Decimal::ONE_HUNDRED,
                d.delta_percentage * Decimal::ONE_HUNDRED,
                note
            )?;
        }
        write!(f, "Max drift: {:.2}%", self.max_abs_delta * Decimal::ONE_HUNDRED)
    }
}
