//! Multi-task loss combiners.
//!
//! Each training or validation step the loop hands the model's four heads
//! and their targets to the active combiner, which returns the scalar used
//! for backpropagation plus a per-task breakdown for logging.
//!
//! | Combiner | State | Total |
//! |----------|-------|-------|
//! | [`StaticWeightedCombiner`] | none | fixed weighted sum, color included |
//! | [`GeometricCombiner`] | none | geometric mean of the enabled losses |
//! | [`SoftAdaptCombiner`] | two-slot history | rate-of-change softmax weights |
//!
//! The strategy is chosen once per run through [`LossCombiner`]. The
//! training loop brackets each call in the usual order: clear gradients,
//! forward pass, `combine`, backpropagate `total`, optimizer step.
//!
//! Stateful combiners are not meant to be shared: each run owns its own
//! instance.

mod geometric;
mod history;
mod soft_adapt;
mod static_weighted;

use candle_core::Tensor;
use serde::{Deserialize, Serialize};

use crate::criteria::{scalar_value, BaseLosses};
use crate::error::Result;
use crate::task::{Task, TaskFlags, TaskTensors};

pub use geometric::GeometricCombiner;
pub use history::LossHistory;
pub use soft_adapt::{soft_adapt_weights, SoftAdaptCombiner};
pub use static_weighted::StaticWeightedCombiner;

/// Result of one combiner call.
///
/// All four slots are always present. `color` is `Some` only for the
/// static-weighted combiner, the only one that tracks colorization.
#[derive(Debug, Clone)]
pub struct CombinedLoss {
    /// Scalar loss to backpropagate.
    pub total: Tensor,
    /// Classification contribution.
    pub label: Tensor,
    /// Segmentation contribution.
    pub segmentation: Tensor,
    /// Bounding-box contribution.
    pub bbox: Tensor,
    /// Colorization contribution.
    pub color: Option<Tensor>,
}

impl CombinedLoss {
    /// Scalar value of the total loss.
    ///
    /// # Errors
    ///
    /// Returns a tensor error if the value cannot be read back.
    pub fn total_value(&self) -> Result<f64> {
        scalar_value(&self.total)
    }

    /// Detached scalar export for logging.
    ///
    /// # Errors
    ///
    /// Returns a tensor error if a value cannot be read back.
    pub fn breakdown(&self) -> Result<LossBreakdown> {
        Ok(LossBreakdown {
            total: scalar_value(&self.total)?,
            label: scalar_value(&self.label)?,
            segmentation: scalar_value(&self.segmentation)?,
            bbox: scalar_value(&self.bbox)?,
            color: self.color.as_ref().map(scalar_value).transpose()?,
        })
    }
}

/// Scalar per-task losses of one step, as recorded by telemetry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LossBreakdown {
    /// Total loss.
    pub total: f64,
    /// Classification value.
    pub label: f64,
    /// Segmentation value.
    pub segmentation: f64,
    /// Bounding-box value.
    pub bbox: f64,
    /// Colorization value, when tracked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<f64>,
}

impl LossBreakdown {
    /// Value for `task`, if tracked.
    #[must_use]
    pub fn task(&self, task: Task) -> Option<f64> {
        match task {
            Task::Label => Some(self.label),
            Task::Segmentation => Some(self.segmentation),
            Task::BBox => Some(self.bbox),
            Task::Color => self.color,
        }
    }
}

/// The loss itself when `enabled`, otherwise a zero of the same dtype/device.
pub(crate) fn masked(loss: &Tensor, enabled: bool) -> Result<Tensor> {
    if enabled {
        Ok(loss.clone())
    } else {
        Ok(loss.zeros_like()?)
    }
}

/// `sum(weight * loss)` over the given terms, in the dtype of `like`.
pub(crate) fn weighted_sum(like: &Tensor, terms: &[(&Tensor, f64)]) -> Result<Tensor> {
    let dtype = like.dtype();
    let mut total = Tensor::zeros((), dtype, like.device())?;
    for (loss, weight) in terms {
        let term = loss.to_dtype(dtype)?.affine(*weight, 0.0)?;
        total = total.add(&term)?;
    }
    Ok(total)
}

/// The active combination strategy for a run.
///
/// # Example
///
/// ```
/// use candle_core::Device;
/// use multitask_loss_rs::{BaseLosses, CombinerConfig};
///
/// # fn main() -> multitask_loss_rs::Result<()> {
/// let mut combiner = CombinerConfig::from_preset("soft-adapt")?.build()?;
/// let losses = BaseLosses::from_scalars(0.7, 0.2, 150.0, None, &Device::Cpu)?;
/// let combined = combiner.combine_losses(&losses)?;
/// assert!(combined.total_value()? > 0.0);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub enum LossCombiner {
    /// Fixed coefficients.
    Static(StaticWeightedCombiner),
    /// Geometric mean.
    Geometric(GeometricCombiner),
    /// Soft-adapt weighting.
    SoftAdapt(SoftAdaptCombiner),
}

impl LossCombiner {
    /// Compute base losses from predictions and targets and combine them.
    ///
    /// # Errors
    ///
    /// Propagates shape, dtype and numeric errors from the active combiner.
    pub fn combine(&mut self, outputs: &TaskTensors, targets: &TaskTensors) -> Result<CombinedLoss> {
        match self {
            Self::Static(c) => c.combine(outputs, targets),
            Self::Geometric(c) => c.combine(outputs, targets),
            Self::SoftAdapt(c) => c.combine(outputs, targets),
        }
    }

    /// Combine already-computed base losses.
    ///
    /// # Errors
    ///
    /// Propagates numeric errors from the active combiner.
    pub fn combine_losses(&mut self, losses: &BaseLosses) -> Result<CombinedLoss> {
        match self {
            Self::Static(c) => c.combine_losses(losses),
            Self::Geometric(c) => c.combine_losses(losses),
            Self::SoftAdapt(c) => c.combine_losses(losses),
        }
    }

    /// Notify the combiner that a new epoch starts.
    pub fn begin_epoch(&mut self) {
        if let Self::SoftAdapt(c) = self {
            c.begin_epoch();
        }
    }

    /// Strategy name as used in configuration.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Static(_) => "static",
            Self::Geometric(_) => "geometric",
            Self::SoftAdapt(_) => "soft_adapt",
        }
    }

    /// Task flags of the active combiner.
    #[must_use]
    pub const fn flags(&self) -> &TaskFlags {
        match self {
            Self::Static(c) => c.flags(),
            Self::Geometric(c) => c.flags(),
            Self::SoftAdapt(c) => c.flags(),
        }
    }

    /// Whether the combiner consumes the color head.
    #[must_use]
    pub const fn uses_color(&self) -> bool {
        matches!(self, Self::Static(_))
    }
}

impl From<StaticWeightedCombiner> for LossCombiner {
    fn from(c: StaticWeightedCombiner) -> Self {
        Self::Static(c)
    }
}

impl From<GeometricCombiner> for LossCombiner {
    fn from(c: GeometricCombiner) -> Self {
        Self::Geometric(c)
    }
}

impl From<SoftAdaptCombiner> for LossCombiner {
    fn from(c: SoftAdaptCombiner) -> Self {
        Self::SoftAdapt(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_weighted_sum() {
        let a = Tensor::new(2.0f64, &Device::Cpu).unwrap();
        let b = Tensor::new(3.0f64, &Device::Cpu).unwrap();
        let total = weighted_sum(&a, &[(&a, 0.5), (&b, 2.0)]).unwrap();
        assert!((scalar_value(&total).unwrap() - 7.0).abs() < 1e-12);
    }

    #[test]
    fn test_masked_disabled_is_zero() {
        let a = Tensor::new(f64::NAN, &Device::Cpu).unwrap();
        let zero = masked(&a, false).unwrap();
        assert_eq!(scalar_value(&zero).unwrap(), 0.0);
    }

    #[test]
    fn test_breakdown_omits_color_when_untracked() {
        let one = Tensor::new(1.0f64, &Device::Cpu).unwrap();
        let combined = CombinedLoss {
            total: one.clone(),
            label: one.clone(),
            segmentation: one.clone(),
            bbox: one,
            color: None,
        };
        let breakdown = combined.breakdown().unwrap();
        assert_eq!(breakdown.task(Task::Color), None);
        let json = serde_json::to_string(&breakdown).unwrap();
        assert!(!json.contains("color"));
    }

    #[test]
    fn test_enum_dispatch_names() {
        let combiner: LossCombiner =
            StaticWeightedCombiner::new(crate::StaticWeights::default(), TaskFlags::default())
                .into();
        assert_eq!(combiner.name(), "static");
        assert!(combiner.uses_color());
    }
}
