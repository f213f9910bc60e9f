//! Collaborator contracts for portfolio data, market prices and order execution,
//! plus an HTTP data client and a simulated exchange.

mod data_client;
mod paper;
mod types;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{DataError, OrderError};
use crate::models::{PositionSide, PositionSnapshot};

pub use data_client::DataClient;
pub use paper::{PaperExchange, PaperPortfolio};
pub use types::{ApiPosition, ApiPrice};

/// Source of open positions for a wallet.
#[async_trait]
pub trait PortfolioProvider: Send + Sync {
    async fn get_positions(&self, wallet: &str) -> Result<Vec<PositionSnapshot>, DataError>;
}

/// Source of current market prices.
#[async_trait]
pub trait MarketData: Send + Sync {
    async fn get_price(&self, symbol: &str) -> Result<Decimal, DataError>;
}

/// Places orders on the user's account.
#[async_trait]
pub trait OrderExecutor: Send + Sync {
    async fn place_order(&self, order: &OrderRequest) -> Result<OrderFill, OrderError>;
}

/// A single order submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: PositionSide,
    pub size: Decimal,
    pub leverage: u32,
}

/// What the exchange actually filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderFill {
    pub filled_size: Decimal,
    pub entry_price: Decimal,
}
