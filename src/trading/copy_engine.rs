//! Copy engine: request → preview → confirmed execution, under the account's capital lock.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{MarketData, OrderExecutor, PortfolioProvider};
use crate::db::Database;
use crate::error::Result;
use crate::models::{
    BatchStatus, ExecutionBatch, ExecutionStatus, FailureReason, PositionCopyRequest, Preview,
    RebalanceProposal, TargetRatio,
};

use super::capital::{BalanceSnapshot, CapitalGuard, CapitalLedger};
use super::distribution::compute_distribution_scaled;
use super::orchestrator::ExecutionOrchestrator;
use super::rebalancer::RatioTracker;
use super::validator::{build_preview, PriceSheet};
use super::ReplicationConfig;

/// Copy-trading engine state.
///
/// Previews are pure and can be rebuilt as often as the caller likes.
/// Execution takes the account's capital lock and refuses a preview whose
/// balance version is out of date, so two requests can never spend the same
/// capital.
pub struct CopyEngine {
    config: ReplicationConfig,
    portfolio: Arc<dyn PortfolioProvider>,
    market: Arc<dyn MarketData>,
    orchestrator: ExecutionOrchestrator,
    ledger: CapitalLedger,
    tracker: RatioTracker,
    store: Option<Database>,
    stats: Arc<RwLock<EngineStats>>,
}

impl CopyEngine {
    pub fn new(
        config: ReplicationConfig,
        portfolio: Arc<dyn PortfolioProvider>,
        market: Arc<dyn MarketData>,
        executor: Arc<dyn OrderExecutor>,
    ) -> Self {
        let orchestrator = ExecutionOrchestrator::new(executor, config.order_timeout());
        Self {
            config,
            portfolio,
            market,
            orchestrator,
            ledger: CapitalLedger::new(),
            tracker: RatioTracker::new(),
            store: None,
            stats: Arc::new(RwLock::new(EngineStats::default())),
        }
    }

    /// Share a ledger with other engines (e.g. one per source wallet).
    pub fn with_ledger(mut self, ledger: CapitalLedger) -> Self {
        self.ledger = ledger;
        self
    }

    /// Persist previews, batches and target ratios.
    pub fn with_store(mut self, store: Database) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    pub fn ledger(&self) -> &CapitalLedger {
        &self.ledger
    }

    pub fn tracker(&self) -> &RatioTracker {
        &self.tracker
    }

    /// Load stored target ratios into the tracker.
    pub async fn restore_ratios(&self) -> anyhow::Result<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let ratios = store.load_target_ratios().await?;
        let count = ratios.len();
        for ratio in ratios {
            self.tracker.record(ratio).await;
        }
        info!(count, "Restored target ratios");
        Ok(count)
    }

    /// Build a request from the source wallet's and the account's current positions.
    pub async fn prepare_request(
        &self,
        account: &str,
        source_wallet: &str,
        allocation_fraction: Decimal,
    ) -> Result<PositionCopyRequest> {
        let balance = self.ledger.snapshot(account).await;
        self.request_at(account, source_wallet, allocation_fraction, balance).await
    }

    async fn request_at(
        &self,
        account: &str,
        source_wallet: &str,
        allocation_fraction: Decimal,
        balance: BalanceSnapshot,
    ) -> Result<PositionCopyRequest> {
        let (source, existing) = futures::join!(
            self.portfolio.get_positions(source_wallet),
            self.portfolio.get_positions(account)
        );

        let request = PositionCopyRequest::new(
            account,
            source_wallet,
            source?,
            balance.balance,
            allocation_fraction,
        )?
        .with_existing_positions(existing?)
        .with_balance_version(balance.version);

        debug!(
            request_id = %request.id(),
            account = %account,
            wallet = %source_wallet,
            balance = %balance.balance,
            version = balance.version,
            "Prepared copy request"
        );

        Ok(request)
    }

    /// Fetch prices for every symbol concurrently. The first failure aborts.
    pub async fn fetch_prices<'a, I>(&self, symbols: I) -> Result<PriceSheet>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let unique: Vec<&str> = {
            let mut seen = HashSet::new();
            symbols.into_iter().filter(|s| seen.insert(*s)).collect()
        };

        let quotes = join_all(unique.iter().map(|s| self.market.get_price(s))).await;

        let mut prices = PriceSheet::with_capacity(unique.len());
        for (symbol, quote) in unique.into_iter().zip(quotes) {
            prices.insert(symbol.to_string(), quote?);
        }
        Ok(prices)
    }

    /// Distribution, sizing and validation for `request`. No side effects.
    pub async fn preview(&self, request: &PositionCopyRequest) -> Result<Preview> {
        let distribution = compute_distribution_scaled(request, self.config.notional_scale)?;
        let prices = self.fetch_prices(distribution.symbols()).await?;
        let preview = build_preview(
            request,
            &distribution,
            &self.config.minimum_table(),
            &prices,
            &self.config,
        )?;

        self.stats.write().await.previews_built += 1;
        Ok(preview)
    }

    /// Execute a confirmed preview.
    ///
    /// Fails with `StaleBalance` if the account's balance changed since the
    /// preview was built; the caller should re-preview and confirm again.
    /// A preview whose balance is not the ledger's (`BalanceMismatch`) or an
    /// account that was never synced (`Unsynced`) is refused outright.
    pub async fn execute(&self, preview: &Preview, cancel: &CancellationToken) -> Result<ExecutionBatch> {
        let mut guard = self.ledger.lock(&preview.account).await;
        guard.ensure_version(preview.balance_version)?;
        guard.ensure_balance(preview.available_balance)?;
        Ok(self.run_locked(&mut guard, preview, cancel).await)
    }

    /// Prepare, preview and execute in one step while holding the capital lock,
    /// so concurrent calls for the same account are serialized.
    pub async fn copy_now(
        &self,
        account: &str,
        source_wallet: &str,
        allocation_fraction: Decimal,
        cancel: &CancellationToken,
    ) -> Result<ExecutionBatch> {
        let mut guard = self.ledger.lock(account).await;
        let request = self
            .request_at(account, source_wallet, allocation_fraction, guard.snapshot())
            .await?;
        let preview = self.preview(&request).await?;
        Ok(self.run_locked(&mut guard, &preview, cancel).await)
    }

    async fn run_locked(
        &self,
        guard: &mut CapitalGuard,
        preview: &Preview,
        cancel: &CancellationToken,
    ) -> ExecutionBatch {
        info!(
            request_id = %preview.request_id,
            account = %preview.account,
            wallet = %preview.source_wallet,
            orders = preview.executable_count(),
            total = %preview.total_notional,
            "Executing copy"
        );

        let batch = self.orchestrator.execute_batch(preview, cancel).await;
        let unresolved = unresolved_notional(preview, &batch);
        if unresolved > Decimal::ZERO {
            warn!(
                account = %preview.account,
                reserved = %unresolved,
                "Timed-out orders may still fill; capital held until the next balance sync"
            );
        }
        let after = guard.debit(batch.filled_notional() + unresolved);

        if batch.count(ExecutionStatus::Succeeded) > 0 {
            let ratio = TargetRatio {
                account: preview.account.clone(),
                source_wallet: preview.source_wallet.clone(),
                allocation_fraction: preview.allocation_fraction,
                distribution: preview.distribution.clone(),
                captured_at: batch.completed_at,
            };
            self.persist_ratio(&ratio).await;
            self.tracker.record(ratio).await;
        }

        self.persist_batch(preview, &batch).await;
        self.stats.write().await.record(&batch);

        info!(
            batch_id = %batch.id,
            status = %batch.status,
            remaining_balance = %after.balance,
            "Copy finished"
        );

        batch
    }

    /// Storage failures are logged, never surfaced: the orders are already placed
    /// and the caller must still receive the batch.
    async fn persist_batch(&self, preview: &Preview, batch: &ExecutionBatch) {
        let Some(store) = &self.store else { return };
        if let Err(e) = store.save_preview(preview).await {
            warn!(request_id = %preview.request_id, error = %e, "Failed to store copy request");
        }
        if let Err(e) = store.save_batch(batch).await {
            warn!(batch_id = %batch.id, error = %e, "Failed to store batch");
        }
    }

    async fn persist_ratio(&self, ratio: &TargetRatio) {
        let Some(store) = &self.store else { return };
        if let Err(e) = store.save_target_ratio(ratio).await {
            warn!(account = %ratio.account, wallet = %ratio.source_wallet, error = %e, "Failed to store target ratio");
        }
    }

    /// Compare one copied wallet against its stored target ratio.
    pub async fn check_rebalance(&self, account: &str, source_wallet: &str) -> Result<RebalanceProposal> {
        let balance = self.ledger.snapshot(account).await;
        let existing = self.portfolio.get_positions(account).await?;
        let mut proposal = self
            .tracker
            .check(account, source_wallet, self.portfolio.as_ref(), balance.balance, &existing)
            .await?;
        proposal.proposed_request = proposal
            .proposed_request
            .map(|r| r.with_balance_version(balance.version));
        Ok(proposal)
    }

    /// Check every wallet the account copies, returning only proposals whose
    /// drift exceeds the configured threshold. Failed checks are logged and skipped.
    pub async fn check_rebalances(&self, account: &str) -> Result<Vec<(String, RebalanceProposal)>> {
        let balance = self.ledger.snapshot(account).await;
        let existing = self.portfolio.get_positions(account).await?;
        let threshold = self.config.rebalance_threshold;

        let results = self
            .tracker
            .check_all(account, self.portfolio.as_ref(), balance.balance, &existing)
            .await;

        let mut proposals = Vec::new();
        for (wallet, result) in results {
            match result {
                Ok(mut proposal) if proposal.exceeds(threshold) => {
                    proposal.proposed_request = proposal
                        .proposed_request
                        .map(|r| r.with_balance_version(balance.version));
                    proposals.push((wallet, proposal));
                }
                Ok(_) => debug!(wallet = %wallet, "Within rebalance threshold"),
                Err(e) => warn!(wallet = %wallet, error = %e, "Rebalance check failed"),
            }
        }
        Ok(proposals)
    }

    pub async fn stats(&self) -> EngineStats {
        self.stats.read().await.clone()
    }
}

/// Notional of timed-out orders, whose outcome the exchange never reported.
fn unresolved_notional(preview: &Preview, batch: &ExecutionBatch) -> Decimal {
    batch
        .results
        .iter()
        .filter(|r| matches!(r.error_reason, Some(FailureReason::Timeout)))
        .filter_map(|r| preview.entries.iter().find(|e| e.symbol == r.symbol))
        .map(|e| e.final_notional)
        .sum()
}

/// Engine statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineStats {
    pub previews_built: u64,
    pub batches_executed: u64,
    pub batches_partial: u64,
    pub batches_aborted: u64,
    pub orders_succeeded: u64,
    pub orders_failed: u64,
    pub entries_skipped: u64,
    pub capital_deployed: Decimal,
}

impl EngineStats {
    fn record(&mut self, batch: &ExecutionBatch) {
        self.batches_executed += 1;
        match batch.status {
            BatchStatus::AllSucceeded => {}
            BatchStatus::Partial => self.batches_partial += 1,
            BatchStatus::Aborted => self.batches_aborted += 1,
        }
        self.orders_succeeded += batch.count(ExecutionStatus::Succeeded) as u64;
        self.orders_failed += batch.count(ExecutionStatus::Failed) as u64;
        self.entries_skipped += batch.count(ExecutionStatus::SkippedBelowMinimum) as u64;
        self.capital_deployed += batch.filled_notional();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::PaperExchange;
    use crate::error::{CopyError, DataError};
    use crate::models::{PositionSide, PositionSnapshot};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    struct Wallets(HashMap<String, Vec<PositionSnapshot>>);

    #[async_trait]
    impl PortfolioProvider for Wallets {
        async fn get_positions(&self, wallet: &str) -> std::result::Result<Vec<PositionSnapshot>, DataError> {
            Ok(self.0.get(wallet).cloned().unwrap_or_default())
        }
    }

    fn sources() -> Vec<PositionSnapshot> {
        vec![
            PositionSnapshot::new("BTC", PositionSide::Long, dec!(50000), 10),
            PositionSnapshot::new("ETH", PositionSide::Long, dec!(30000), 10),
            PositionSnapshot::new("SOL", PositionSide::Short, dec!(20000), 5),
        ]
    }

    fn engine(exchange: PaperExchange) -> CopyEngine {
        let wallets = Wallets(HashMap::from([("0xsrc".to_string(), sources())]));
        let exchange = Arc::new(exchange);
        CopyEngine::new(
            ReplicationConfig::default(),
            Arc::new(wallets),
            exchange.clone(),
            exchange,
        )
    }

    fn exchange() -> PaperExchange {
        PaperExchange::new().with_prices([
            ("BTC", dec!(50000)),
            ("ETH", dec!(2500)),
            ("SOL", dec!(100)),
        ])
    }

    #[tokio::test]
    async fn test_preview_then_execute_debits_ledger() {
        let engine = engine(exchange());
        engine.ledger().sync_balance("alice", dec!(1000)).await;

        let request = engine.prepare_request("alice", "0xsrc", dec!(1)).await.unwrap();
        let preview = engine.preview(&request).await.unwrap();
        let batch = engine.execute(&preview, &CancellationToken::new()).await.unwrap();

        assert_eq!(batch.status, BatchStatus::AllSucceeded);
        assert_eq!(batch.filled_notional(), dec!(1000));
        assert_eq!(engine.ledger().snapshot("alice").await.balance, Decimal::ZERO);
        assert!(engine.tracker().get("alice", "0xsrc").await.is_some());

        let stats = engine.stats().await;
        assert_eq!(stats.orders_succeeded, 3);
        assert_eq!(stats.capital_deployed, dec!(1000));
    }

    #[tokio::test]
    async fn test_stale_preview_rejected() {
        let engine = engine(exchange());
        engine.ledger().sync_balance("alice", dec!(1000)).await;

        let request = engine.prepare_request("alice", "0xsrc", dec!(0.5)).await.unwrap();
        let first = engine.preview(&request).await.unwrap();
        let second = engine.preview(&request).await.unwrap();

        engine.execute(&first, &CancellationToken::new()).await.unwrap();
        let err = engine.execute(&second, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, CopyError::StaleBalance { .. }));
    }

    #[tokio::test]
    async fn test_request_claiming_more_than_ledger_is_refused() {
        let exchange = exchange();
        let engine = engine(exchange.clone());
        let synced = engine.ledger().sync_balance("alice", dec!(100)).await;

        // Built by hand at the current version, but with a balance the account does not hold
        let request = PositionCopyRequest::new("alice", "0xsrc", sources(), dec!(10000), dec!(1))
            .unwrap()
            .with_balance_version(synced.version);
        let preview = engine.preview(&request).await.unwrap();

        let err = engine.execute(&preview, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(
            err,
            CopyError::BalanceMismatch {
                previewed: dec!(10000),
                ledger: dec!(100),
            }
        );
        assert!(exchange.submitted().await.is_empty());
        assert_eq!(engine.ledger().snapshot("alice").await.balance, dec!(100));
    }

    #[tokio::test]
    async fn test_unsynced_account_cannot_execute() {
        let exchange = exchange();
        let engine = engine(exchange.clone());

        let request = PositionCopyRequest::new("bob", "0xsrc", sources(), dec!(1000), dec!(1)).unwrap();
        let preview = engine.preview(&request).await.unwrap();
        assert_eq!(preview.balance_version, 0);

        let err = engine.execute(&preview, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err, CopyError::Unsynced("bob".to_string()));
        assert!(exchange.submitted().await.is_empty());
    }

    #[tokio::test]
    async fn test_timed_out_order_keeps_capital_reserved() {
        let exchange = exchange().delayed("ETH", std::time::Duration::from_millis(1500));
        let wallets = Wallets(HashMap::from([("0xsrc".to_string(), sources())]));
        let exchange = Arc::new(exchange);
        let config = ReplicationConfig {
            order_timeout_secs: 1,
            ..Default::default()
        };
        let engine = CopyEngine::new(config, Arc::new(wallets), exchange.clone(), exchange);
        engine.ledger().sync_balance("alice", dec!(1000)).await;

        let batch = engine
            .copy_now("alice", "0xsrc", dec!(1), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(batch.status, BatchStatus::Partial);
        assert_eq!(batch.filled_notional(), dec!(700));

        // ETH's 300 may still fill on the exchange, so it is not spendable again
        assert_eq!(engine.ledger().snapshot("alice").await.balance, Decimal::ZERO);

        // A sync from the exchange's reported balance releases it
        engine.ledger().sync_balance("alice", dec!(300)).await;
        assert_eq!(engine.ledger().snapshot("alice").await.balance, dec!(300));
    }

    #[tokio::test]
    async fn test_missing_price_aborts_preview() {
        let engine = engine(PaperExchange::new().with_prices([("BTC", dec!(50000))]));
        engine.ledger().sync_balance("alice", dec!(1000)).await;

        let request = engine.prepare_request("alice", "0xsrc", dec!(1)).await.unwrap();
        let err = engine.preview(&request).await.unwrap_err();
        assert!(matches!(err, CopyError::SymbolNotFound(_)));
    }

    #[tokio::test]
    async fn test_stored_batches_and_ratios() {
        let store = Database::in_memory().await.unwrap();
        let copier = engine(exchange()).with_store(store.clone());
        copier.ledger().sync_balance("alice", dec!(500)).await;

        let batch = copier
            .copy_now("alice", "0xsrc", dec!(1), &CancellationToken::new())
            .await
            .unwrap();

        let loaded = store.get_batch(&batch.id.to_string()).await.unwrap().unwrap();
        assert_eq!(loaded.status, batch.status);
        assert!(store.get_preview(&batch.request_id.to_string()).await.unwrap().is_some());
        assert_eq!(store.load_target_ratios().await.unwrap().len(), 1);

        let restored = engine(exchange()).with_store(store);
        assert_eq!(restored.restore_ratios().await.unwrap(), 1);
    }
}
