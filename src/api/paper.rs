//! Simulated exchange for dry runs and tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::{DataError, OrderError};
use crate::models::{PositionSide, PositionSnapshot};

use super::{MarketData, OrderExecutor, OrderFill, OrderRequest, PortfolioProvider};

/// Fills orders instantly at the quoted price plus slippage.
///
/// Per-symbol failures, latency and partial fills can be injected to
/// exercise the orchestrator's failure paths.
#[derive(Clone, Default)]
pub struct PaperExchange {
    prices: Arc<RwLock<HashMap<String, Decimal>>>,
    /// Consulted for symbols with no local price
    quotes: Option<Arc<dyn MarketData>>,
    /// Simulated slippage (0.0 to 1.0)
    slippage: Decimal,
    /// Trading fee rate (0.0 to 1.0)
    fee_rate: Decimal,
    failures: HashMap<String, OrderError>,
    delays: HashMap<String, Duration>,
    /// Fraction of the requested size filled, per symbol
    fill_ratios: HashMap<String, Decimal>,
    submitted: Arc<Mutex<Vec<OrderRequest>>>,
    total_fees: Arc<Mutex<Decimal>>,
}

impl PaperExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prices<I, S>(mut self, prices: I) -> Self
    where
        I: IntoIterator<Item = (S, Decimal)>,
        S: Into<String>,
    {
        self.prices = Arc::new(RwLock::new(
            prices.into_iter().map(|(s, p)| (s.into(), p)).collect(),
        ));
        self
    }

    /// Fill at prices from `source` for symbols without a local price.
    pub fn with_quote_source(mut self, source: Arc<dyn MarketData>) -> Self {
        self.quotes = Some(source);
        self
    }

    pub fn with_slippage(mut self, slippage: Decimal) -> Self {
        self.slippage = slippage;
        self
    }

    pub fn with_fee_rate(mut self, fee_rate: Decimal) -> Self {
        self.fee_rate = fee_rate;
        self
    }

    /// Reject every order for `symbol` with `error`.
    pub fn failing(mut self, symbol: impl Into<String>, error: OrderError) -> Self {
        self.failures.insert(symbol.into(), error);
        self
    }

    /// Hold every order for `symbol` for `delay` before filling.
    pub fn delayed(mut self, symbol: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(symbol.into(), delay);
        self
    }

    /// Fill only `ratio` of each order for `symbol`.
    pub fn partially_filling(mut self, symbol: impl Into<String>, ratio: Decimal) -> Self {
        self.fill_ratios.insert(symbol.into(), ratio);
        self
    }

    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices.write().await.insert(symbol.to_string(), price);
    }

    /// Orders received so far, in submission order.
    pub async fn submitted(&self) -> Vec<OrderRequest> {
        self.submitted.lock().await.clone()
    }

    pub async fn total_fees(&self) -> Decimal {
        *self.total_fees.lock().await
    }

    fn apply_slippage(&self, price: Decimal, side: PositionSide) -> Decimal {
        match side {
            PositionSide::Long => price * (Decimal::ONE + self.slippage),
            PositionSide::Short => price * (Decimal::ONE - self.slippage),
        }
    }
}

#[async_trait]
impl MarketData for PaperExchange {
    async fn get_price(&self, symbol: &str) -> Result<Decimal, DataError> {
        if let Some(price) = self.prices.read().await.get(symbol).copied() {
            return Ok(price);
        }
        match &self.quotes {
            Some(source) => source.get_price(symbol).await,
            None => Err(DataError::SymbolNotFound(symbol.to_string())),
        }
    }
}

#[async_trait]
impl OrderExecutor for PaperExchange {
    async fn place_order(&self, order: &OrderRequest) -> Result<OrderFill, OrderError> {
        self.submitted.lock().await.push(order.clone());

        if let Some(delay) = self.delays.get(&order.symbol) {
            tokio::time::sleep(*delay).await;
        }
        if let Some(err) = self.failures.get(&order.symbol) {
            debug!(symbol = %order.symbol, error = %err, "Paper order rejected");
            return Err(err.clone());
        }

        let price = self
            .get_price(&order.symbol)
            .await
            .map_err(|e| OrderError::Rejected(e.to_string()))?;

        let ratio = self
            .fill_ratios
            .get(&order.symbol)
            .copied()
            .unwrap_or(Decimal::ONE);
        let filled_size = order.size * ratio;
        let entry_price = self.apply_slippage(price, order.side);

        let fee = entry_price * filled_size * self.fee_rate;
        *self.total_fees.lock().await += fee;

        info!(
            symbol = %order.symbol,
            side = %order.side,
            size = %filled_size,
            price = %entry_price,
            leverage = order.leverage,
            "Paper order filled"
        );

        Ok(OrderFill {
            filled_size,
            entry_price,
        })
    }
}

/// In-memory wallet positions, the portfolio-side counterpart of [`PaperExchange`].
#[derive(Clone, Default)]
pub struct PaperPortfolio {
    wallets: Arc<RwLock<HashMap<String, Vec<PositionSnapshot>>>>,
    unavailable: Arc<RwLock<Vec<String>>>,
}

impl PaperPortfolio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_wallets(wallets: HashMap<String, Vec<PositionSnapshot>>) -> Self {
        Self {
            wallets: Arc::new(RwLock::new(wallets)),
            unavailable: Arc::default(),
        }
    }

    pub async fn set_positions(&self, wallet: &str, positions: Vec<PositionSnapshot>) {
        self.wallets.write().await.insert(wallet.to_string(), positions);
    }

    /// Make every lookup for `wallet` fail with `Unavailable`.
    pub async fn set_unavailable(&self, wallet: &str) {
        self.unavailable.write().await.push(wallet.to_string());
    }
}

#[async_trait]
impl PortfolioProvider for PaperPortfolio {
    /// Unknown wallets hold no positions.
    async fn get_positions(&self, wallet: &str) -> Result<Vec<PositionSnapshot>, DataError> {
        if self.unavailable.read().await.iter().any(|w| w == wallet) {
            return Err(DataError::Unavailable(format!("{} unreachable", wallet)));
        }
        Ok(self
            .wallets
            .read()
            .await
            .get(wallet)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order(symbol: &str, side: PositionSide, size: Decimal) -> OrderRequest {
        OrderRequest {
            symbol: symbol.to_string(),
            side,
            size,
            leverage: 1,
        }
    }

    #[tokio::test]
    async fn test_fill_with_slippage_and_fee() {
        let exchange = PaperExchange::new()
            .with_prices([("BTC", dec!(60000))])
            .with_slippage(dec!(0.001))
            .with_fee_rate(dec!(0.001));

        let fill = exchange
            .place_order(&order("BTC", PositionSide::Long, dec!(0.5)))
            .await
            .unwrap();
        assert_eq!(fill.entry_price, dec!(60060));
        assert_eq!(fill.filled_size, dec!(0.5));
        assert_eq!(exchange.total_fees().await, dec!(30.03));

        let short = exchange
            .place_order(&order("BTC", PositionSide::Short, dec!(0.5)))
            .await
            .unwrap();
        assert_eq!(short.entry_price, dec!(59940));
    }

    #[tokio::test]
    async fn test_injected_failure_and_partial_fill() {
        let exchange = PaperExchange::new()
            .with_prices([("ETH", dec!(3000)), ("SOL", dec!(150))])
            .failing("ETH", OrderError::Rejected("margin".to_string()))
            .partially_filling("SOL", dec!(0.5));

        let err = exchange
            .place_order(&order("ETH", PositionSide::Long, dec!(1)))
            .await
            .unwrap_err();
        assert_eq!(err, OrderError::Rejected("margin".to_string()));

        let fill = exchange
            .place_order(&order("SOL", PositionSide::Long, dec!(2)))
            .await
            .unwrap();
        assert_eq!(fill.filled_size, dec!(1));

        assert_eq!(exchange.submitted().await.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_symbol_price() {
        let exchange = PaperExchange::new();
        assert_eq!(
            exchange.get_price("XYZ").await,
            Err(DataError::SymbolNotFound("XYZ".to_string()))
        );
        exchange.set_price("XYZ", dec!(2)).await;
        assert_eq!(exchange.get_price("XYZ").await, Ok(dec!(2)));
    }

    #[tokio::test]
    async fn test_quote_source_fallback() {
        let upstream = PaperExchange::new().with_prices([("BTC", dec!(60000))]);
        let exchange = PaperExchange::new()
            .with_prices([("ETH", dec!(3000))])
            .with_quote_source(Arc::new(upstream));

        assert_eq!(exchange.get_price("BTC").await, Ok(dec!(60000)));
        assert_eq!(exchange.get_price("ETH").await, Ok(dec!(3000)));
        assert!(exchange.get_price("SOL").await.is_err());
    }

    #[tokio::test]
    async fn test_paper_portfolio() {
        let portfolio = PaperPortfolio::new();
        portfolio
            .set_positions("0xa", vec![PositionSnapshot::new("BTC", PositionSide::Long, dec!(10), 1)])
            .await;

        assert_eq!(portfolio.get_positions("0xa").await.unwrap().len(), 1);
        assert!(portfolio.get_positions("0xb").await.unwrap().is_empty());

        portfolio.set_unavailable("0xa").await;
        assert!(matches!(
            portfolio.get_positions("0xa").await,
            Err(DataError::Unavailable(_))
        ));
    }
}
