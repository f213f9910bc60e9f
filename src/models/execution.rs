//! Execution outcomes for a copy batch.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::{MergedPosition, PositionSide};

/// Outcome of one symbol in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Succeeded,
    Failed,
    SkippedBelowMinimum,
    /// Not submitted because the batch was cancelled first
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Succeeded => "succeeded",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::SkippedBelowMinimum => "skipped-below-minimum",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Why an order did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// Exchange rejected the order
    OrderRejected(String),
    /// Submission exceeded the caller's timeout; outcome unknown, not retried
    Timeout,
    /// Exchange accepted the order but nothing filled
    NoFill,
    /// Exchange could not be reached
    Unavailable(String),
    /// Notional under the platform minimum
    BelowPlatformMinimum { minimum: String },
    /// Cancellation observed before submission
    Cancelled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::OrderRejected(msg) => write!(f, "rejected: {}", msg),
            FailureReason::Timeout => write!(f, "timeout"),
            FailureReason::NoFill => write!(f, "no fill"),
            FailureReason::Unavailable(msg) => write!(f, "unavailable: {}", msg),
            FailureReason::BelowPlatformMinimum { minimum } => {
                write!(f, "below platform minimum ${}", minimum)
            }
            FailureReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One attempted (or skipped) order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub symbol: String,
    pub side: PositionSide,
    pub status: ExecutionStatus,
    pub requested_size: Decimal,
    pub actual_size: Decimal,
    pub actual_entry_price: Option<Decimal>,
    pub error_reason: Option<FailureReason>,
    /// Position after averaging the fill into an existing one
    pub merged_position: Option<MergedPosition>,
}

impl ExecutionResult {
    pub fn succeeded(
        symbol: String,
        side: PositionSide,
        requested_size: Decimal,
        actual_size: Decimal,
        entry_price: Decimal,
    ) -> Self {
        Self {
            symbol,
            side,
            status: ExecutionStatus::Succeeded,
            requested_size,
            actual_size,
            actual_entry_price: Some(entry_price),
            error_reason: None,
            merged_position: None,
        }
    }

    pub fn failed(symbol: String, side: PositionSide, requested_size: Decimal, reason: FailureReason) -> Self {
        Self {
            symbol,
            side,
            status: ExecutionStatus::Failed,
            requested_size,
            actual_size: Decimal::ZERO,
            actual_entry_price: None,
            error_reason: Some(reason),
            merged_position: None,
        }
    }

    pub fn skipped(symbol: String, side: PositionSide, requested_size: Decimal, minimum: Decimal) -> Self {
        Self {
            symbol,
            side,
            status: ExecutionStatus::SkippedBelowMinimum,
            requested_size,
            actual_size: Decimal::ZERO,
            actual_entry_price: None,
            error_reason: Some(FailureReason::BelowPlatformMinimum {
                minimum: minimum.to_string(),
            }),
            merged_position: None,
        }
    }

    pub fn cancelled(symbol: String, side: PositionSide, requested_size: Decimal) -> Self {
        Self {
            symbol,
            side,
            status: ExecutionStatus::Cancelled,
            requested_size,
            actual_size: Decimal::ZERO,
            actual_entry_price: None,
            error_reason: Some(FailureReason::Cancelled),
            merged_position: None,
        }
    }

    pub fn with_merge(mut self, merged: MergedPosition) -> Self {
        self.merged_position = Some(merged);
        self
    }

    /// Whether this entry was submitted to the exchange.
    pub fn was_attempted(&self) -> bool {
        matches!(self.status, ExecutionStatus::Succeeded | ExecutionStatus::Failed)
    }

    pub fn is_partial_fill(&self) -> bool {
        self.status == ExecutionStatus::Succeeded && self.actual_size < self.requested_size
    }

    /// Filled notional at the actual entry price.
    pub fn filled_notional(&self) -> Decimal {
        self.actual_entry_price
            .map(|p| p * self.actual_size)
            .unwrap_or(Decimal::ZERO)
    }
}

/// Aggregate outcome of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Every attempted order succeeded
    AllSucceeded,
    /// At least one attempted order failed
    Partial,
    /// Cancellation stopped the batch before every order was attempted
    Aborted,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::AllSucceeded => "all-succeeded",
            BatchStatus::Partial => "partial",
            BatchStatus::Aborted => "aborted",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Immutable record of one copy operation, handed to the caller on completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionBatch {
    pub id: Uuid,
    pub request_id: Uuid,
    pub account: String,
    pub source_wallet: String,
    pub status: BatchStatus,
    pub results: Vec<ExecutionResult>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl ExecutionBatch {
    pub fn result_for(&self, symbol: &str) -> Option<&ExecutionResult> {
        self.results.iter().find(|r| r.symbol == symbol)
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &ExecutionResult> {
        self.results
            .iter()
            .filter(|r| r.status == ExecutionStatus::Succeeded)
    }

    pub fn failed(&self) -> impl Iterator<Item = &ExecutionResult> {
        self.results
            .iter()
            .filter(|r| r.status == ExecutionStatus::Failed)
    }

    pub fn count(&self, status: ExecutionStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    /// Total notional filled across successful orders.
    pub fn filled_notional(&self) -> Decimal {
        self.succeeded().map(|r| r.filled_notional()).sum()
    }
}

impl fmt::Display for ExecutionBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Execution Batch {} ===", self.id)?;
        writeln!(f, "Status:  {}", self.status)?;
        writeln!(f, "Filled:  ${:.2}", self.filled_notional())?;
        writeln!(
            f,
            "\n{:<10} {:<6} {:<22} {:>14} {:>14} {:>14}  {}",
            "SYMBOL", "SIDE", "STATUS", "REQUESTED", "FILLED", "ENTRY", "REASON"
        )?;
        writeln!(f, "{}", "-".repeat(100))?;

        for r in &self.results {
            let entry = r
                .actual_entry_price
                .map(|p| format!("{:.4}", p))
                .unwrap_or_else(|| "-".to_string());
            let reason = r
                .error_reason
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_default();
            writeln!(
                f,
                "{:<10} {:<6} {:<22} {:>14} {:>14} {:>14}  {}",
                r.symbol, r.side, r.status, r.requested_size, r.actual_size, entry, reason
            )?;
        }

        writeln!(f)?;
        write!(
            f,
            "Succeeded: {}  Failed: {}  Skipped: {}  Cancelled: {}",
            self.count(ExecutionStatus::Succeeded),
            self.count(ExecutionStatus::Failed),
            self.count(ExecutionStatus::SkippedBelowMinimum),
            self.count(ExecutionStatus::Cancelled)
        )
    }
}
