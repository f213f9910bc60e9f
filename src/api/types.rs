//! Wire types for the portfolio / market data API.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{PositionSide, PositionSnapshot};

/// Position entry from the /positions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiPosition {
    #[serde(alias = "coin")]
    pub symbol: String,
    pub side: String,
    pub position_value: Decimal,
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    #[serde(default, alias = "szi")]
    pub size: Decimal,
    #[serde(default, alias = "entryPx")]
    pub entry_price: Decimal,
}

fn default_leverage() -> u32 {
    1
}

impl ApiPosition {
    /// Convert to a snapshot. `None` for an unrecognised side.
    ///
    /// Signed sizes are normalised to their magnitude since the side carries direction.
    pub fn into_snapshot(self) -> Option<PositionSnapshot> {
        let side = PositionSide::from_str(&self.side)?;
        Some(
            PositionSnapshot::new(self.symbol, side, self.position_value.abs(), self.leverage.max(1))
                .with_fill(self.size.abs(), self.entry_price),
        )
    }
}

/// Price quote from the /price endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiPrice {
    pub symbol: String,
    pub price: Decimal,
    /// Unix seconds the quote was taken at
    pub timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_position_with_exchange_field_names() {
        let raw = r#"{"coin":"ETH","side":"short","positionValue":"3000.5","szi":"-1.0","entryPx":"3000.5","leverage":5}"#;
        let snap = serde_json::from_str::<ApiPosition>(raw)
            .unwrap()
            .into_snapshot()
            .unwrap();

        assert_eq!(snap.symbol, "ETH");
        assert_eq!(snap.side, PositionSide::Short);
        assert_eq!(snap.size, dec!(1.0));
        assert_eq!(snap.leverage, 5);
    }

    #[test]
    fn test_unknown_side_dropped() {
        let raw = r#"{"symbol":"BTC","side":"flat","positionValue":"10"}"#;
        let pos: ApiPosition = serde_json::from_str(raw).unwrap();
        assert!(pos.into_snapshot().is_none());
    }
}
