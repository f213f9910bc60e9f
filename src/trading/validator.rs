//! Capital validator: checks a sized distribution against the allocation and builds the preview.

use std::collections::HashMap;

use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::error::{CopyError, Result};
use crate::models::{MinimumTable, PositionCopyRequest, PositionDistribution, Preview, ScaledPosition};

use super::distribution::SUM_TOLERANCE;
use super::{MinimumSizeScaler, ReplicationConfig};

/// Market prices keyed by symbol, fetched before previewing.
pub type PriceSheet = HashMap<String, Decimal>;

/// Build a go/no-go preview.
///
/// Pure: the same request, distribution, minimums, prices and config always
/// produce the same preview, so a UI can recompute it freely before the user
/// confirms.
///
/// # Errors
/// - `IncompleteDistribution` if percentages do not sum to 1
/// - `MissingPrice` if a symbol has no usable price
/// - `NothingToExecute` if every entry falls below the platform minimum
/// - `InsufficientBalance` if the sized total exceeds `available_balance * allocation_fraction`
pub fn build_preview(
    request: &PositionCopyRequest,
    distribution: &PositionDistribution,
    minimums: &MinimumTable,
    prices: &PriceSheet,
    config: &ReplicationConfig,
) -> Result<Preview> {
    if !distribution.is_complete(SUM_TOLERANCE) {
        return Err(CopyError::IncompleteDistribution {
            sum: distribution.percentage_sum(),
        });
    }

    let scaler = MinimumSizeScaler::from_config(config);

    let entries = distribution
        .entries
        .iter()
        .map(|entry| {
            let price = prices
                .get(&entry.symbol)
                .copied()
                .ok_or_else(|| CopyError::MissingPrice(entry.symbol.clone()))?;
            let minimum = minimums.minimum_for(&config.platform, &entry.symbol);
            let existing = request
                .existing_position(&entry.symbol)
                .filter(|p| p.side == entry.side);
            scaler.scale(entry, price, minimum, existing)
        })
        .collect::<Result<Vec<ScaledPosition>>>()?;

    let skipped_count = entries.iter().filter(|e| e.is_skipped()).count();
    let adjusted_count = entries.iter().filter(|e| e.is_adjusted()).count();

    if skipped_count == entries.len() {
        warn!(
            wallet = %request.source_wallet(),
            skipped = skipped_count,
            "Every position is below the platform minimum"
        );
        return Err(CopyError::NothingToExecute { skipped: skipped_count });
    }

    let total_notional: Decimal = entries.iter().map(|e| e.final_notional).sum();
    let allocated = request.allocated_capital();

    if total_notional > allocated {
        let shortfall = total_notional - allocated;
        warn!(
            required = %total_notional,
            available = %allocated,
            shortfall = %shortfall,
            "Allocation cannot cover sized positions"
        );
        return Err(CopyError::InsufficientBalance {
            required: total_notional,
            available: allocated,
            shortfall,
        });
    }

    info!(
        wallet = %request.source_wallet(),
        mode = %scaler.mode(),
        positions = entries.len(),
        skipped = skipped_count,
        adjusted = adjusted_count,
        total = %total_notional,
        "Preview built"
    );

    Ok(Preview {
        request_id: request.id(),
        account: request.account().to_string(),
        source_wallet: request.source_wallet().to_string(),
        mode: scaler.mode(),
        entries,
        distribution: distribution.clone(),
        available_balance: request.available_balance(),
        allocation_fraction: request.allocation_fraction(),
        allocated_capital: allocated,
        total_notional,
        remaining_balance: request.available_balance() - total_notional,
        skipped_count,
        adjusted_count,
        balance_version: request.balance_version(),
    })
}
