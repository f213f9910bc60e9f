//! Minimum-size scaler: maps percentage targets onto order sizes under platform minimums.

use rust_decimal::{Decimal, RoundingStrategy};
use tracing::debug;

use crate::error::{CopyError, Result};
use crate::models::{DistributionEntry, Disposition, PositionSnapshot, ScaledPosition, ScalingMode};

use super::ReplicationConfig;

/// Converts distribution entries into sized orders.
#[derive(Debug, Clone)]
pub struct MinimumSizeScaler {
    mode: ScalingMode,
    size_scale: u32,
}

impl MinimumSizeScaler {
    pub fn new(mode: ScalingMode, size_scale: u32) -> Self {
        Self { mode, size_scale }
    }

    pub fn from_config(config: &ReplicationConfig) -> Self {
        Self::new(config.scaling_mode, config.size_scale)
    }

    pub fn mode(&self) -> ScalingMode {
        self.mode
    }

    /// Size one entry at `price` against the platform `minimum` notional.
    ///
    /// Proportional mode never raises an entry: anything under the minimum is
    /// skipped. Minimum-enforced mode raises it and records the divergence in
    /// `scaling_factor`. A zero target is skipped in both modes.
    ///
    /// The minimum is checked against the order actually submitted, i.e. the
    /// size after rounding down, so a target just over the minimum whose
    /// rounded order falls under it counts as below.
    pub fn scale(
        &self,
        entry: &DistributionEntry,
        price: Decimal,
        minimum: Decimal,
        existing: Option<&PositionSnapshot>,
    ) -> Result<ScaledPosition> {
        if price <= Decimal::ZERO {
            return Err(CopyError::MissingPrice(entry.symbol.clone()));
        }

        let target_size = self.round_size_down(entry.target_notional / price);

        let order_notional = target_size * price;
        let below_minimum = entry.target_notional < minimum
            || order_notional < minimum
            || target_size.is_zero();
        let (disposition, final_notional, final_size, scaling_factor) = if !below_minimum {
            (Disposition::Proportional, entry.target_notional, target_size, Decimal::ONE)
        } else if self.mode == ScalingMode::MinimumEnforced && entry.target_notional > Decimal::ZERO {
            let raised_size = self.round_size_up(minimum / price);
            (
                Disposition::AdjustedToMinimum,
                minimum,
                raised_size,
                minimum / entry.target_notional,
            )
        } else {
            (Disposition::SkippedBelowMinimum, Decimal::ZERO, Decimal::ZERO, Decimal::ZERO)
        };

        if disposition != Disposition::Proportional {
            debug!(
                symbol = %entry.symbol,
                target = %entry.target_notional,
                minimum = %minimum,
                disposition = ?disposition,
                "Entry below platform minimum"
            );
        }

        Ok(ScaledPosition {
            symbol: entry.symbol.clone(),
            side: entry.side,
            leverage: entry.leverage,
            percentage_of_portfolio: entry.percentage_of_portfolio,
            target_notional: entry.target_notional,
            target_size,
            price,
            minimum_notional: minimum,
            final_notional,
            final_size,
            scaling_factor,
            disposition,
            existing: existing.cloned(),
        })
    }

    fn round_size_down(&self, size: Decimal) -> Decimal {
        size.round_dp_with_strategy(self.size_scale, RoundingStrategy::ToZero)
    }

    fn round_size_up(&self, size: Decimal) -> Decimal {
        size.round_dp_with_strategy(self.size_scale, RoundingStrategy::AwayFromZero)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PositionSide;
    use rust_decimal_macros::dec;

    fn entry(symbol: &str, pct: Decimal, target: Decimal) -> DistributionEntry {
        DistributionEntry {
            symbol: symbol.to_string(),
            side: PositionSide::Long,
            percentage_of_portfolio: pct,
            target_notional: target,
            leverage: 1,
        }
    }

    #[test]
    fn test_proportional_size_from_price() {
        let scaler = MinimumSizeScaler::new(ScalingMode::Proportional, 6);
        let scaled = scaler
            .scale(&entry("BTC", dec!(0.5), dec!(500)), dec!(60000), dec!(10), None)
            .unwrap();

        assert_eq!(scaled.disposition, Disposition::Proportional);
        assert_eq!(scaled.final_notional, dec!(500));
        // 500 / 60000 = 0.00833333.. truncated to 6 dp
        assert_eq!(scaled.final_size, dec!(0.008333));
        assert_eq!(scaled.scaling_factor, Decimal::ONE);
    }

    #[test]
    fn test_proportional_skips_below_minimum() {
        let scaler = MinimumSizeScaler::new(ScalingMode::Proportional, 6);
        let scaled = scaler
            .scale(&entry("SOL", dec!(0.2), dec!(6)), dec!(150), dec!(12), None)
            .unwrap();

        assert!(scaled.is_skipped());
        assert_eq!(scaled.final_notional, Decimal::ZERO);
        assert_eq!(scaled.final_size, Decimal::ZERO);
        // Proportional target is still reported
        assert_eq!(scaled.target_size, dec!(0.04));
    }

    #[test]
    fn test_minimum_enforced_raises_and_flags() {
        let scaler = MinimumSizeScaler::new(ScalingMode::MinimumEnforced, 6);
        let scaled = scaler
            .scale(&entry("SOL", dec!(0.2), dec!(6)), dec!(150), dec!(12), None)
            .unwrap();

        assert!(scaled.is_adjusted());
        assert_eq!(scaled.final_notional, dec!(12));
        assert_eq!(scaled.final_size, dec!(0.08));
        assert_eq!(scaled.scaling_factor, dec!(2));
        assert_ne!(scaled.scaling_factor, Decimal::ONE);
    }

    #[test]
    fn test_minimum_enforced_size_rounds_up() {
        let scaler = MinimumSizeScaler::new(ScalingMode::MinimumEnforced, 2);
        let scaled = scaler
            .scale(&entry("ETH", dec!(0.1), dec!(5)), dec!(3000), dec!(10), None)
            .unwrap();
        // 10 / 3000 = 0.00333 → 0.01 so the order clears the minimum
        assert_eq!(scaled.final_size, dec!(0.01));
    }

    #[test]
    fn test_rounded_order_under_minimum_is_skipped() {
        // 10 / 3000 = 0.003333 after truncation, an order worth 9.999
        let scaler = MinimumSizeScaler::new(ScalingMode::Proportional, 6);
        let scaled = scaler
            .scale(&entry("ETH", dec!(0.1), dec!(10)), dec!(3000), dec!(10), None)
            .unwrap();
        assert!(scaled.is_skipped());
        assert_eq!(scaled.final_size, Decimal::ZERO);

        // Minimum-enforced rounds up instead, so the order clears the minimum
        let scaler = MinimumSizeScaler::new(ScalingMode::MinimumEnforced, 6);
        let scaled = scaler
            .scale(&entry("ETH", dec!(0.1), dec!(10)), dec!(3000), dec!(10), None)
            .unwrap();
        assert!(scaled.is_adjusted());
        assert_eq!(scaled.final_size, dec!(0.003334));
        assert!(scaled.final_size * scaled.price >= dec!(10));
    }

    #[test]
    fn test_size_rounding_to_zero_is_never_submitted() {
        // 100 / 60000 at whole units truncates to 0
        let scaler = MinimumSizeScaler::new(ScalingMode::Proportional, 0);
        let scaled = scaler
            .scale(&entry("BTC", dec!(1), dec!(100)), dec!(60000), dec!(10), None)
            .unwrap();
        assert!(scaled.is_skipped());
        assert!(!scaled.is_executable());
    }

    #[test]
    fn test_zero_target_skipped_in_both_modes() {
        for mode in [ScalingMode::Proportional, ScalingMode::MinimumEnforced] {
            let scaler = MinimumSizeScaler::new(mode, 6);
            let scaled = scaler
                .scale(&entry("DOGE", dec!(0.00001), dec!(0)), dec!(0.1), dec!(10), None)
                .unwrap();
            assert!(scaled.is_skipped());
        }
    }

    #[test]
    fn test_missing_price() {
        let scaler = MinimumSizeScaler::new(ScalingMode::Proportional, 6);
        let err = scaler
            .scale(&entry("BTC", dec!(1), dec!(100)), Decimal::ZERO, dec!(10), None)
            .unwrap_err();
        assert_eq!(err, CopyError::MissingPrice("BTC".to_string()));
    }
}
