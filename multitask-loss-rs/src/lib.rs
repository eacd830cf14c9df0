//! # multitask-loss-rs
//!
//! Loss combination for a four-headed vision model trained on the Oxford-IIIT
//! Pet dataset: breed classification, trimap segmentation, bounding-box
//! regression and colorization. Each step the per-task losses are reduced to
//! the single scalar that is backpropagated.
//!
//! ## Strategies
//!
//! - **Static-weighted**: fixed coefficients, all four tasks
//! - **Geometric**: `(L * S * B)^(1/n)`, scale-invariant
//! - **Soft-adapt**: softmax weights driven by each task's rate of change,
//!   so the task whose loss falls fastest gets the most weight
//!
//! ## Quick Start
//!
//! ```
//! use candle_core::Device;
//! use multitask_loss_rs::{BaseLosses, CombinerConfig, HistoryPolicy, SoftAdaptConfig, StrategyConfig};
//!
//! # fn main() -> multitask_loss_rs::Result<()> {
//! let soft_adapt = SoftAdaptConfig::default().with_history_policy(HistoryPolicy::ResetEachEpoch);
//! let mut combiner = CombinerConfig::default()
//!     .with_strategy(StrategyConfig::SoftAdapt(soft_adapt))
//!     .build()?;
//!
//! for epoch in 0..2 {
//!     combiner.begin_epoch();
//!     for step in 0..4 {
//!         let shrink = 1.0 / f64::from(epoch * 4 + step + 1);
//!         let losses = BaseLosses::from_scalars(2.0 * shrink, 0.5, 400.0, None, &Device::Cpu)?;
//!         let combined = combiner.combine_losses(&losses)?;
//!         // backpropagate `combined.total` here
//!         let breakdown = combined.breakdown()?;
//!         assert!(breakdown.total.is_finite());
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`task`]: Task identifiers, enable flags and per-head tensors
//! - [`criteria`]: Per-task base loss functions
//! - [`combiner`]: The three combination strategies
//! - [`telemetry`]: Per-step recording, epoch means and statistics
//! - [`config`]: Strategy configuration, presets and YAML files
//! - [`error`]: Error types and result aliases

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod combiner;
pub mod config;
pub mod criteria;
pub mod error;
pub mod task;
pub mod telemetry;

// Re-export main types at crate root for convenience
pub use combiner::{
    soft_adapt_weights, CombinedLoss, GeometricCombiner, LossBreakdown, LossCombiner, LossHistory,
    SoftAdaptCombiner, StaticWeightedCombiner,
};
pub use config::{
    CombinerConfig, GeometricConfig, HistoryPolicy, NegativeLossPolicy, RateConvention,
    SoftAdaptConfig, StaticWeights, StrategyConfig,
};
pub use criteria::BaseLosses;
pub use error::{LossError, LossScope, Result};
pub use task::{Task, TaskFlags, TaskTensors};
pub use telemetry::{
    EpochSummary, LossRecord, LossStatistics, LossTracker, LossTrackerConfig, Split,
};
