//! Platform minimum order sizes.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Symbol value matching every symbol on a platform.
pub const WILDCARD: &str = "*";

/// Minimum order notional for a symbol (or `*`) on a platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformMinimum {
    pub platform: String,
    pub symbol: String,
    pub minimum_notional: Decimal,
}

impl PlatformMinimum {
    pub fn new(platform: impl Into<String>, symbol: impl Into<String>, minimum_notional: Decimal) -> Self {
        Self {
            platform: platform.into(),
            symbol: symbol.into(),
            minimum_notional,
        }
    }
}

/// Static lookup table of platform minimums.
///
/// Resolution order: exact `(platform, symbol)`, then `(platform, *)`, then the fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinimumTable {
    entries: Vec<PlatformMinimum>,
    fallback: Decimal,
}

impl MinimumTable {
    pub fn new(fallback: Decimal) -> Self {
        Self {
            entries: Vec::new(),
            fallback,
        }
    }

    pub fn with_entries(fallback: Decimal, entries: Vec<PlatformMinimum>) -> Self {
        Self { entries, fallback }
    }

    /// Add or replace an entry.
    pub fn insert(&mut self, minimum: PlatformMinimum) {
        self.entries
            .retain(|m| !(m.platform == minimum.platform && m.symbol == minimum.symbol));
        self.entries.push(minimum);
    }

    pub fn fallback(&self) -> Decimal {
        self.fallback
    }

    /// Minimum notional for a symbol on a platform.
    pub fn minimum_for(&self, platform: &str, symbol: &str) -> Decimal {
        let on_platform = |m: &&PlatformMinimum| m.platform.eq_ignore_ascii_case(platform);

        self.entries
            .iter()
            .filter(on_platform)
            .find(|m| m.symbol.eq_ignore_ascii_case(symbol))
            .or_else(|| {
                self.entries
                    .iter()
                    .filter(on_platform)
                    .find(|m| m.symbol == WILDCARD)
            })
            .map(|m| m.minimum_notional)
            .unwrap_or(self.fallback)
    }
}
