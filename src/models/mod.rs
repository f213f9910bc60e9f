//! Data models for copy requests, distributions, previews, execution batches and rebalancing.

mod distribution;
mod execution;
mod minimum;
mod position;
mod preview;
mod rebalance;
mod request;

pub use distribution::{DistributionEntry, PositionDistribution, TargetRatio};
pub use execution::{BatchStatus, ExecutionBatch, ExecutionResult, ExecutionStatus, FailureReason};
pub use minimum::{MinimumTable, PlatformMinimum, WILDCARD};
pub use position::{MergedPosition, PositionSide, PositionSnapshot};
pub use preview::{Disposition, Preview, ScaledPosition, ScalingMode};
pub use rebalance::{RebalanceProposal, SymbolDelta};
pub use request::PositionCopyRequest;
