//! Replication pipeline: distribution, sizing, validation, execution and rebalancing.

mod capital;
mod config;
mod copy_engine;
mod distribution;
mod orchestrator;
mod rebalancer;
mod scaler;
mod validator;

pub use capital::{BalanceSnapshot, CapitalGuard, CapitalLedger};
pub use config::ReplicationConfig;
pub use copy_engine::{CopyEngine, EngineStats};
pub use distribution::{
    compute_distribution, compute_distribution_scaled, DEFAULT_NOTIONAL_SCALE, SUM_TOLERANCE,
};
pub use orchestrator::{aggregate_status, ExecutionOrchestrator};
pub use rebalancer::{compute_rebalance_delta, RatioTracker};
pub use scaler::MinimumSizeScaler;
pub use validator::{build_preview, PriceSheet};
