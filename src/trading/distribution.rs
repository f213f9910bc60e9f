//! Distribution calculator: source portfolio snapshot → percentage distribution.

use std::collections::HashSet;

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use tracing::debug;

use crate::error::{CopyError, Result};
use crate::models::{DistributionEntry, PositionCopyRequest, PositionDistribution};

/// Tolerance for percentage sums to count as complete.
pub const SUM_TOLERANCE: Decimal = dec!(0.000001);

/// Quote currency scale used when none is configured (cents).
pub const DEFAULT_NOTIONAL_SCALE: u32 = 2;

/// Compute the distribution at the default currency scale.
pub fn compute_distribution(request: &PositionCopyRequest) -> Result<PositionDistribution> {
    compute_distribution_scaled(request, DEFAULT_NOTIONAL_SCALE)
}

/// Compute each source position's share of total notional and its proportional target.
///
/// Targets are `allocated_capital * percentage`, rounded toward zero to
/// `notional_scale` decimal places so the sum never exceeds the allocation.
/// Output order follows the source snapshot.
pub fn compute_distribution_scaled(
    request: &PositionCopyRequest,
    notional_scale: u32,
) -> Result<PositionDistribution> {
    let source = request.source_portfolio();
    if source.is_empty() {
        return Err(CopyError::EmptyPortfolio);
    }

    let mut seen = HashSet::with_capacity(source.len());
    for position in source {
        if !seen.insert(position.symbol.as_str()) {
            return Err(CopyError::DuplicateSymbol(position.symbol.clone()));
        }
    }

    let invalid: Vec<String> = source
        .iter()
        .filter(|p| p.notional_value <= Decimal::ZERO)
        .map(|p| p.symbol.clone())
        .collect();
    if !invalid.is_empty() {
        return Err(CopyError::InvalidMagnitude { symbols: invalid });
    }

    let total: Decimal = source.iter().map(|p| p.notional_value).sum();
    let allocated = request.allocated_capital();

    let entries: Vec<DistributionEntry> = source
        .iter()
        .map(|p| {
            let percentage = p.notional_value / total;
            // Multiply before dividing so exact splits stay exact (33 * 1/3 = 11),
            // unless the product would overflow.
            let target_notional = allocated
                .checked_mul(p.notional_value)
                .map(|product| product / total)
                .unwrap_or_else(|| allocated * percentage)
                .round_dp_with_strategy(notional_scale, RoundingStrategy::ToZero);

            DistributionEntry {
                symbol: p.symbol.clone(),
                side: p.side,
                percentage_of_portfolio: percentage,
                target_notional,
                leverage: p.leverage,
            }
        })
        .collect();

    let distribution = PositionDistribution {
        entries,
        allocated_capital: allocated,
        source_total: total,
    };

    if !distribution.is_complete(SUM_TOLERANCE) {
        return Err(CopyError::IncompleteDistribution {
            sum: distribution.percentage_sum(),
        });
    }

    debug!(
        wallet = %request.source_wallet(),
        positions = distribution.len(),
        source_total = %total,
        allocated = %allocated,
        "Distribution computed"
    );

    Ok(distribution)
}
