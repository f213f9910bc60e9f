//! Execution orchestrator: places one order per executable preview entry.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::{OrderExecutor, OrderRequest};
use crate::error::OrderError;
use crate::models::{
    BatchStatus, ExecutionBatch, ExecutionResult, ExecutionStatus, FailureReason, MergedPosition,
    Preview, ScaledPosition,
};

/// Submits a confirmed preview's orders sequentially, best effort.
///
/// Orders go out one at a time in preview order. A failure is recorded and
/// the next entry is still attempted; nothing already filled is unwound.
/// Cancellation is checked before each submission and never interrupts one
/// in flight.
pub struct ExecutionOrchestrator {
    executor: Arc<dyn OrderExecutor>,
    order_timeout: Duration,
}

impl ExecutionOrchestrator {
    pub fn new(executor: Arc<dyn OrderExecutor>, order_timeout: Duration) -> Self {
        Self {
            executor,
            order_timeout,
        }
    }

    pub async fn execute_batch(&self, preview: &Preview, cancel: &CancellationToken) -> ExecutionBatch {
        let started_at = Utc::now();
        let mut results = Vec::with_capacity(preview.entries.len());
        let mut cancelled = false;

        for entry in &preview.entries {
            if entry.is_skipped() {
                results.push(ExecutionResult::skipped(
                    entry.symbol.clone(),
                    entry.side,
                    entry.target_size,
                    entry.minimum_notional,
                ));
                continue;
            }

            if !cancelled && cancel.is_cancelled() {
                warn!(
                    request_id = %preview.request_id,
                    next_symbol = %entry.symbol,
                    "Cancellation observed, no further orders"
                );
                cancelled = true;
            }
            if cancelled {
                results.push(ExecutionResult::cancelled(
                    entry.symbol.clone(),
                    entry.side,
                    entry.final_size,
                ));
                continue;
            }

            let result = self.submit(entry).await;
            results.push(result);
        }

        let status = aggregate_status(&results);
        let batch = ExecutionBatch {
            id: Uuid::new_v4(),
            request_id: preview.request_id,
            account: preview.account.clone(),
            source_wallet: preview.source_wallet.clone(),
            status,
            results,
            started_at,
            completed_at: Utc::now(),
        };

        info!(
            batch_id = %batch.id,
            status = %batch.status,
            succeeded = batch.count(ExecutionStatus::Succeeded),
            failed = batch.count(ExecutionStatus::Failed),
            skipped = batch.count(ExecutionStatus::SkippedBelowMinimum),
            cancelled = batch.count(ExecutionStatus::Cancelled),
            filled = %batch.filled_notional(),
            "Batch complete"
        );

        batch
    }

    /// Place one order and turn its outcome into a result. Never retried.
    async fn submit(&self, entry: &ScaledPosition) -> ExecutionResult {
        let order = OrderRequest {
            symbol: entry.symbol.clone(),
            side: entry.side,
            size: entry.final_size,
            leverage: entry.leverage,
        };

        let outcome = tokio::time::timeout(self.order_timeout, self.executor.place_order(&order)).await;

        let fill = match outcome {
            Err(_) => {
                warn!(
                    symbol = %entry.symbol,
                    timeout_ms = self.order_timeout.as_millis() as u64,
                    "Order timed out"
                );
                return failed(entry, FailureReason::Timeout);
            }
            Ok(Err(e)) => {
                warn!(symbol = %entry.symbol, error = %e, "Order failed");
                let reason = match e {
                    OrderError::Rejected(msg) => FailureReason::OrderRejected(msg),
                    OrderError::Unavailable(msg) => FailureReason::Unavailable(msg),
                };
                return failed(entry, reason);
            }
            Ok(Ok(fill)) => fill,
        };

        if fill.filled_size <= Decimal::ZERO {
            warn!(symbol = %entry.symbol, "Order accepted with no fill");
            return failed(entry, FailureReason::NoFill);
        }

        let mut result = ExecutionResult::succeeded(
            entry.symbol.clone(),
            entry.side,
            entry.final_size,
            fill.filled_size,
            fill.entry_price,
        );

        if let Some(existing) = entry
            .existing
            .as_ref()
            .filter(|p| p.side == entry.side && p.has_cost_basis())
        {
            let merged = MergedPosition::merge(existing, fill.filled_size, fill.entry_price);
            info!(
                symbol = %entry.symbol,
                size = %merged.size,
                entry_price = %merged.entry_price,
                "Merged into existing position"
            );
            result = result.with_merge(merged);
        }

        info!(
            symbol = %entry.symbol,
            side = %entry.side,
            size = %fill.filled_size,
            price = %fill.entry_price,
            "Order filled"
        );

        result
    }
}

fn failed(entry: &ScaledPosition, reason: FailureReason) -> ExecutionResult {
    ExecutionResult::failed(entry.symbol.clone(), entry.side, entry.final_size, reason)
}

/// `Aborted` if anything was cancelled, `AllSucceeded` if every attempted
/// order succeeded, otherwise `Partial`.
pub fn aggregate_status(results: &[ExecutionResult]) -> BatchStatus {
    if results.iter().any(|r| r.status == ExecutionStatus::Cancelled) {
        BatchStatus::Aborted
    } else if results
        .iter()
        .filter(|r| r.was_attempted())
        .all(|r| r.status == ExecutionStatus::Succeeded)
    {
        BatchStatus::AllSucceeded
    } else {
        BatchStatus::Partial
    }
}
