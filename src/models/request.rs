//! Copy request: one user action to mirror a source wallet.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CopyError, Result};

use super::PositionSnapshot;

/// Immutable input to the replication pipeline.
///
/// Fields are private so a request can only be built through [`PositionCopyRequest::new`],
/// which enforces `allocation_fraction ∈ (0, 1]` and a non-negative balance.
/// Deserialization goes through the same checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RequestRecord")]
pub struct PositionCopyRequest {
    id: Uuid,
    account: String,
    source_wallet: String,
    source_portfolio: Vec<PositionSnapshot>,
    available_balance: Decimal,
    allocation_fraction: Decimal,
    existing_user_positions: Vec<PositionSnapshot>,
    balance_version: u64,
}

/// Wire shape of a request, validated on the way in.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestRecord {
    id: Uuid,
    account: String,
    source_wallet: String,
    source_portfolio: Vec<PositionSnapshot>,
    available_balance: Decimal,
    allocation_fraction: Decimal,
    #[serde(default)]
    existing_user_positions: Vec<PositionSnapshot>,
    #[serde(default)]
    balance_version: u64,
}

impl TryFrom<RequestRecord> for PositionCopyRequest {
    type Error = CopyError;

    fn try_from(record: RequestRecord) -> Result<Self> {
        let mut request = Self::new(
            record.account,
            record.source_wallet,
            record.source_portfolio,
            record.available_balance,
            record.allocation_fraction,
        )?
        .with_existing_positions(record.existing_user_positions)
        .with_balance_version(record.balance_version);
        request.id = record.id;
        Ok(request)
    }
}

impl PositionCopyRequest {
    pub fn new(
        account: impl Into<String>,
        source_wallet: impl Into<String>,
        source_portfolio: Vec<PositionSnapshot>,
        available_balance: Decimal,
        allocation_fraction: Decimal,
    ) -> Result<Self> {
        if allocation_fraction <= Decimal::ZERO || allocation_fraction > Decimal::ONE {
            return Err(CopyError::InvalidAllocation(format!(
                "allocation fraction {} outside (0, 1]",
                allocation_fraction
            )));
        }
        if available_balance < Decimal::ZERO {
            return Err(CopyError::InvalidAllocation(format!(
                "available balance {} is negative",
                available_balance
            )));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            account: account.into(),
            source_wallet: source_wallet.into(),
            source_portfolio,
            available_balance,
            allocation_fraction,
            existing_user_positions: Vec::new(),
            balance_version: 0,
        })
    }

    /// Attach the user's current open positions.
    pub fn with_existing_positions(mut self, positions: Vec<PositionSnapshot>) -> Self {
        self.existing_user_positions = positions;
        self
    }

    /// Record the ledger version the balance was read at.
    pub fn with_balance_version(mut self, version: u64) -> Self {
        self.balance_version = version;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn source_wallet(&self) -> &str {
        &self.source_wallet
    }

    pub fn source_portfolio(&self) -> &[PositionSnapshot] {
        &self.source_portfolio
    }

    pub fn available_balance(&self) -> Decimal {
        self.available_balance
    }

    pub fn allocation_fraction(&self) -> Decimal {
        self.allocation_fraction
    }

    pub fn existing_user_positions(&self) -> &[PositionSnapshot] {
        &self.existing_user_positions
    }

    pub fn balance_version(&self) -> u64 {
        self.balance_version
    }

    /// Capital committed to this copy: `available_balance * allocation_fraction`.
    pub fn allocated_capital(&self) -> Decimal {
        self.available_balance * self.allocation_fraction
    }

    /// Existing user position for a symbol, if any.
    pub fn existing_position(&self, symbol: &str) -> Option<&PositionSnapshot> {
        self.existing_user_positions.iter().find(|p| p.symbol == symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PositionSide;
    use rust_decimal_macros::dec;

    #[test]
    fn test_fraction_bounds() {
        assert!(PositionCopyRequest::new("acct", "0xsrc", vec![], dec!(100), dec!(0)).is_err());
        assert!(PositionCopyRequest::new("acct", "0xsrc", vec![], dec!(100), dec!(1.01)).is_err());
        assert!(PositionCopyRequest::new("acct", "0xsrc", vec![], dec!(100), dec!(1)).is_ok());
        assert!(PositionCopyRequest::new("acct", "0xsrc", vec![], dec!(-1), dec!(0.5)).is_err());
    }

    #[test]
    fn test_deserialize_validates_fraction() {
        let req = PositionCopyRequest::new("acct", "0xsrc", vec![], dec!(100), dec!(0.5))
            .unwrap()
            .with_balance_version(3);
        let json = serde_json::to_string(&req).unwrap();
        let back: PositionCopyRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, req);

        let tampered = json.replace(r#""allocationFraction":"0.5""#, r#""allocationFraction":"2""#);
        assert_ne!(tampered, json);
        let err = serde_json::from_str::<PositionCopyRequest>(&tampered).unwrap_err();
        assert!(err.to_string().contains("allocation fraction 2 outside (0, 1]"));
    }

    #[test]
    fn test_allocated_capital_and_lookup() {
        let existing = PositionSnapshot::new("BTC", PositionSide::Long, dec!(100), 2);
        let req = PositionCopyRequest::new("acct", "0xsrc", vec![], dec!(1000), dec!(0.25))
            .unwrap()
            .with_existing_positions(vec![existing]);

        assert_eq!(req.allocated_capital(), dec!(250));
        assert!(req.existing_position("BTC").is_some());
        assert!(req.existing_position("ETH").is_none());
    }
}
