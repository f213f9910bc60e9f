//! Ratio tracker and rebalance delta computation.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::api::PortfolioProvider;
use crate::error::{CopyError, Result};
use crate::models::{
    PositionCopyRequest, PositionDistribution, PositionSnapshot, RebalanceProposal, SymbolDelta,
    TargetRatio,
};

use super::compute_distribution;

/// Per-symbol drift between a stored and a current distribution.
///
/// Symbols only in `current` are flagged `is_new`; symbols only in `stored`
/// are flagged `is_closed` with a current share of zero. The result carries
/// no proposed request; see [`RatioTracker::check`] for that.
pub fn compute_rebalance_delta(
    stored: &PositionDistribution,
    current: &PositionDistribution,
) -> RebalanceProposal {
    let mut deltas = Vec::with_capacity(stored.len().max(current.len()));

    for old in &stored.entries {
        let delta = match current.get(&old.symbol) {
            Some(now) => SymbolDelta {
                symbol: old.symbol.clone(),
                side: now.side,
                stored_percentage: old.percentage_of_portfolio,
                current_percentage: now.percentage_of_portfolio,
                delta_percentage: now.percentage_of_portfolio - old.percentage_of_portfolio,
                is_new: false,
                is_closed: false,
                side_changed: now.side != old.side,
            },
            None => SymbolDelta {
                symbol: old.symbol.clone(),
                side: old.side,
                stored_percentage: old.percentage_of_portfolio,
                current_percentage: Decimal::ZERO,
                delta_percentage: -old.percentage_of_portfolio,
                is_new: false,
                is_closed: true,
                side_changed: false,
            },
        };
        deltas.push(delta);
    }

    for now in current.entries.iter().filter(|e| stored.get(&e.symbol).is_none()) {
        deltas.push(SymbolDelta {
            symbol: now.symbol.clone(),
            side: now.side,
            stored_percentage: Decimal::ZERO,
            current_percentage: now.percentage_of_portfolio,
            delta_percentage: now.percentage_of_portfolio,
            is_new: true,
            is_closed: false,
            side_changed: false,
        });
    }

    let max_abs_delta = deltas
        .iter()
        .map(|d| d.delta_percentage.abs())
        .max()
        .unwrap_or(Decimal::ZERO);

    RebalanceProposal {
        deltas,
        max_abs_delta,
        proposed_request: None,
    }
}

type RatioKey = (String, String);

/// Target ratios captured at copy time, keyed by (account, source wallet).
#[derive(Clone, Default)]
pub struct RatioTracker {
    ratios: Arc<RwLock<HashMap<RatioKey, TargetRatio>>>,
}

impl RatioTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store (or replace) the target ratio for a copy relationship.
    pub async fn record(&self, ratio: TargetRatio) {
        debug!(
            account = %ratio.account,
            wallet = %ratio.source_wallet,
            positions = ratio.distribution.len(),
            "Recording target ratio"
        );
        let key = (ratio.account.clone(), ratio.source_wallet.clone());
        self.ratios.write().await.insert(key, ratio);
    }

    pub async fn get(&self, account: &str, source_wallet: &str) -> Option<TargetRatio> {
        self.ratios
            .read()
            .await
            .get(&(account.to_string(), source_wallet.to_string()))
            .cloned()
    }

    pub async fn remove(&self, account: &str, source_wallet: &str) -> Option<TargetRatio> {
        self.ratios
            .write()
            .await
            .remove(&(account.to_string(), source_wallet.to_string()))
    }

    /// Source wallets tracked for `account`, sorted.
    pub async fn wallets(&self, account: &str) -> Vec<String> {
        let mut wallets: Vec<String> = self
            .ratios
            .read()
            .await
            .keys()
            .filter(|(a, _)| a == account)
            .map(|(_, w)| w.clone())
            .collect();
        wallets.sort();
        wallets
    }

    /// Compare the stored ratio against the wallet's current positions.
    ///
    /// When anything moved, the proposal carries a copy request for the new
    /// distribution at the originally chosen allocation fraction. If the source
    /// has closed everything, every stored symbol is reported closed and no
    /// request is proposed.
    pub async fn check(
        &self,
        account: &str,
        source_wallet: &str,
        provider: &dyn PortfolioProvider,
        available_balance: Decimal,
        existing_positions: &[PositionSnapshot],
    ) -> Result<RebalanceProposal> {
        let stored = self
            .get(account, source_wallet)
            .await
            .ok_or_else(|| CopyError::NotTracked {
                account: account.to_string(),
                source_wallet: source_wallet.to_string(),
            })?;

        let positions = provider.get_positions(source_wallet).await?;

        if positions.is_empty() {
            let proposal = compute_rebalance_delta(&stored.distribution, &PositionDistribution::default());
            info!(account = %account, wallet = %source_wallet, "Source closed every position");
            return Ok(proposal);
        }

        let request = PositionCopyRequest::new(
            account,
            source_wallet,
            positions,
            available_balance,
            stored.allocation_fraction,
        )?
        .with_existing_positions(existing_positions.to_vec());
        let current = compute_distribution(&request)?;

        let mut proposal = compute_rebalance_delta(&stored.distribution, &current);
        if proposal.has_changes() {
            proposal.proposed_request = Some(request);
        }

        info!(
            account = %account,
            wallet = %source_wallet,
            max_drift = %proposal.max_abs_delta,
            new = proposal.new_symbols().count(),
            closed = proposal.closed_symbols().count(),
            "Rebalance check"
        );

        Ok(proposal)
    }

    /// Check every wallet tracked for `account` concurrently.
    pub async fn check_all(
        &self,
        account: &str,
        provider: &dyn PortfolioProvider,
        available_balance: Decimal,
        existing_positions: &[PositionSnapshot],
    ) -> Vec<(String, Result<RebalanceProposal>)> {
        let wallets = self.wallets(account).await;
        let checks = wallets.iter().map(|wallet| {
            self.check(account, wallet, provider, available_balance, existing_positions)
        });
        let results = join_all(checks).await;
        wallets.into_iter().zip(results).collect()
    }
}
