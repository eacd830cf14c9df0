//! Configuration types for loss combination.
//!
//! This module provides configuration structs for every combiner:
//! - [`StaticWeights`]: Fixed per-task coefficients
//! - [`GeometricConfig`]: Geometric-mean combiner settings
//! - [`SoftAdaptConfig`]: Adaptive rate-of-change weighting settings
//! - [`CombinerConfig`]: Strategy selection plus per-run task flags
//!
//! A run selects its strategy once, typically from YAML:
//!
//! ```yaml
//! strategy:
//!   kind: soft_adapt
//!   beta: 0.01
//!   history_policy: reset_each_epoch
//! flags:
//!   color: false
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::combiner::{GeometricCombiner, LossCombiner, SoftAdaptCombiner, StaticWeightedCombiner};
use crate::error::{LossError, Result};
use crate::task::TaskFlags;

/// Fixed coefficients of the static-weighted combiner.
///
/// `total = label * L + segmentation * S + bbox * bbox_multiplier * B + color * C`.
/// The defaults bring the four task losses into comparable magnitude.
///
/// # Example
///
/// ```
/// use multitask_loss_rs::StaticWeights;
///
/// let weights = StaticWeights::default();
/// assert!((weights.bbox_coefficient() - 0.00014).abs() < 1e-12);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticWeights {
    /// Classification coefficient.
    pub label: f64,
    /// Segmentation coefficient.
    pub segmentation: f64,
    /// Bounding-box coefficient.
    pub bbox: f64,
    /// Extra bounding-box multiplier applied on top of `bbox`.
    pub bbox_multiplier: f64,
    /// Colorization coefficient.
    pub color: f64,
}

impl Default for StaticWeights {
    fn default() -> Self {
        Self {
            label: 1.0,
            segmentation: 20.0,
            bbox: 0.000_07,
            bbox_multiplier: 2.0,
            color: 1.0,
        }
    }
}

impl StaticWeights {
    /// Effective bounding-box coefficient (`bbox * bbox_multiplier`).
    #[must_use]
    pub fn bbox_coefficient(&self) -> f64 {
        self.bbox * self.bbox_multiplier
    }

    /// Set the classification coefficient.
    #[must_use]
    pub const fn with_label(mut self, weight: f64) -> Self {
        self.label = weight;
        self
    }

    /// Set the segmentation coefficient.
    #[must_use]
    pub const fn with_segmentation(mut self, weight: f64) -> Self {
        self.segmentation = weight;
        self
    }

    /// Set the bounding-box coefficient and multiplier.
    #[must_use]
    pub const fn with_bbox(mut self, weight: f64, multiplier: f64) -> Self {
        self.bbox = weight;
        self.bbox_multiplier = multiplier;
        self
    }

    /// Set the colorization coefficient.
    #[must_use]
    pub const fn with_color(mut self, weight: f64) -> Self {
        self.color = weight;
        self
    }

    fn validate(&self) -> Result<()> {
        let all = [
            ("label", self.label),
            ("segmentation", self.segmentation),
            ("bbox", self.bbox),
            ("bbox_multiplier", self.bbox_multiplier),
            ("color", self.color),
        ];
        for (name, value) in all {
            if !value.is_finite() || value < 0.0 {
                return Err(LossError::InvalidConfig(format!(
                    "static weight {name} must be finite and >= 0, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// What the geometric combiner does with a negative task loss.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegativeLossPolicy {
    /// Clamp negative losses to zero and log a warning.
    #[default]
    Clamp,
    /// Fail with [`LossError::DomainError`].
    Reject,
}

/// Configuration for the geometric-mean combiner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometricConfig {
    /// Handling of negative task losses.
    pub negative_policy: NegativeLossPolicy,
}

impl GeometricConfig {
    /// Set the negative-loss policy.
    #[must_use]
    pub const fn with_negative_policy(mut self, policy: NegativeLossPolicy) -> Self {
        self.negative_policy = policy;
        self
    }
}

/// How rate of change is read from the two-slot loss history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateConvention {
    /// Always `slot[1] - slot[0]`. The sign flips on odd steps, since odd
    /// steps write slot 0.
    #[default]
    FixedSlot,
    /// Always the slot just written minus the other slot.
    Chronological,
}

/// Whether the adaptive history survives epoch boundaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryPolicy {
    /// Keep one history for the whole run.
    #[default]
    Continuous,
    /// Return to the cold state at every epoch start.
    ResetEachEpoch,
}

/// Configuration for soft-adapt weighting.
///
/// # Example
///
/// ```
/// use multitask_loss_rs::{HistoryPolicy, SoftAdaptConfig};
///
/// let config = SoftAdaptConfig::default()
///     .with_beta(0.05)
///     .with_history_policy(HistoryPolicy::ResetEachEpoch);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct SoftAdaptConfig {
    /// Softmax temperature applied to the negated rates of change.
    pub beta: f64,

    /// Added to the normalizer to avoid division by zero.
    pub epsilon: f64,

    /// Fixed prior applied to the bounding-box loss inside the weighted sum.
    pub bbox_scale: f64,

    /// Which slot difference counts as the rate of change.
    pub rate_convention: RateConvention,

    /// Whether history resets between epochs.
    pub history_policy: HistoryPolicy,

    /// Divide rates by `sum |rate| + epsilon` before the softmax.
    pub normalize_rates: bool,

    /// Multiply each weight by its current (scaled) loss before normalizing.
    pub loss_weighted: bool,
}

impl Default for SoftAdaptConfig {
    fn default() -> Self {
        Self {
            beta: 0.01,
            epsilon: 1e-8,
            bbox_scale: 0.001,
            rate_convention: RateConvention::FixedSlot,
            history_policy: HistoryPolicy::Continuous,
            normalize_rates: false,
            loss_weighted: false,
        }
    }
}

impl SoftAdaptConfig {
    /// Set the softmax temperature.
    #[must_use]
    pub const fn with_beta(mut self, beta: f64) -> Self {
        self.beta = beta;
        self
    }

    /// Set the normalizer epsilon.
    #[must_use]
    pub const fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    /// Set the bounding-box prior.
    #[must_use]
    pub const fn with_bbox_scale(mut self, scale: f64) -> Self {
        self.bbox_scale = scale;
        self
    }

    /// Set the rate-of-change convention.
    #[must_use]
    pub const fn with_rate_convention(mut self, convention: RateConvention) -> Self {
        self.rate_convention = convention;
        self
    }

    /// Set the epoch reset policy.
    #[must_use]
    pub const fn with_history_policy(mut self, policy: HistoryPolicy) -> Self {
        self.history_policy = policy;
        self
    }

    /// Set whether rates are normalized by their absolute sum.
    #[must_use]
    pub const fn with_normalize_rates(mut self, normalize: bool) -> Self {
        self.normalize_rates = normalize;
        self
    }

    /// Set whether weights are scaled by the current losses.
    #[must_use]
    pub const fn with_loss_weighted(mut self, loss_weighted: bool) -> Self {
        self.loss_weighted = loss_weighted;
        self
    }

    /// Check parameter ranges.
    ///
    /// # Errors
    ///
    /// Returns [`LossError::InvalidConfig`] for a non-finite beta, a
    /// non-positive epsilon or a non-positive bbox scale.
    pub fn validate(&self) -> Result<()> {
        if !self.beta.is_finite() {
            return Err(LossError::InvalidConfig(format!(
                "soft_adapt.beta must be finite, got {}",
                self.beta
            )));
        }
        if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            return Err(LossError::InvalidConfig(format!(
                "soft_adapt.epsilon must be > 0, got {}",
                self.epsilon
            )));
        }
        if !(self.bbox_scale.is_finite() && self.bbox_scale > 0.0) {
            return Err(LossError::InvalidConfig(format!(
                "soft_adapt.bbox_scale must be > 0, got {}",
                self.bbox_scale
            )));
        }
        Ok(())
    }
}

/// Which combiner a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyConfig {
    /// Fixed hand-tuned coefficients.
    Static(StaticWeights),
    /// Geometric mean of the task losses.
    Geometric(GeometricConfig),
    /// Rate-of-change driven adaptive weights.
    SoftAdapt(SoftAdaptConfig),
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self::Static(StaticWeights::default())
    }
}

/// Complete combiner configuration for one run.
///
/// # Example
///
/// ```
/// use multitask_loss_rs::CombinerConfig;
///
/// # fn main() -> multitask_loss_rs::Result<()> {
/// let config = CombinerConfig::from_yaml_str(
///     "strategy:\n  kind: soft_adapt\n  beta: 0.02\nflags:\n  color: false\n",
/// )?;
/// let combiner = config.build()?;
/// assert_eq!(combiner.name(), "soft_adapt");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CombinerConfig {
    /// Selected strategy and its parameters.
    pub strategy: StrategyConfig,
    /// Per-run task switches.
    pub flags: TaskFlags,
}

impl CombinerConfig {
    /// Set the strategy.
    #[must_use]
    pub const fn with_strategy(mut self, strategy: StrategyConfig) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the task flags.
    #[must_use]
    pub const fn with_flags(mut self, flags: TaskFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Named presets: `baseline`, `geometric`, `soft-adapt`.
    ///
    /// # Errors
    ///
    /// Returns [`LossError::InvalidConfig`] for an unknown preset.
    pub fn from_preset(preset: &str) -> Result<Self> {
        let strategy = match preset {
            "baseline" => StrategyConfig::Static(StaticWeights::default()),
            "geometric" => StrategyConfig::Geometric(GeometricConfig::default()),
            "soft-adapt" => StrategyConfig::SoftAdapt(SoftAdaptConfig::default()),
            _ => {
                return Err(LossError::InvalidConfig(format!(
                    "unknown preset: {preset}"
                )))
            }
        };
        Ok(Self::default().with_strategy(strategy))
    }

    /// Parse from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`LossError::ConfigParse`] on malformed YAML.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Load from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an IO or parse error.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Save to a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an IO or serialization error.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check the selected strategy's parameters.
    ///
    /// # Errors
    ///
    /// Returns [`LossError::InvalidConfig`] describing the first bad value.
    pub fn validate(&self) -> Result<()> {
        match &self.strategy {
            StrategyConfig::Static(weights) => weights.validate(),
            StrategyConfig::Geometric(_) => Ok(()),
            StrategyConfig::SoftAdapt(config) => config.validate(),
        }
    }

    /// Validate and construct the combiner.
    ///
    /// # Errors
    ///
    /// Returns [`LossError::InvalidConfig`] if validation fails.
    pub fn build(&self) -> Result<LossCombiner> {
        self.validate()?;
        Ok(match self.strategy {
            StrategyConfig::Static(weights) => {
                StaticWeightedCombiner::new(weights, self.flags).into()
            }
            StrategyConfig::Geometric(config) => GeometricCombiner::new(config, self.flags).into(),
            StrategyConfig::SoftAdapt(config) => SoftAdaptCombiner::new(config, self.flags)?.into(),
        })
    }
}
