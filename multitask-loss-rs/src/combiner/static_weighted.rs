//! Fixed-coefficient combination of all four task losses.

use crate::config::StaticWeights;
use crate::criteria::{scalar_value, BaseLosses};
use crate::error::{ensure_finite, LossError, LossScope, Result};
use crate::task::{Task, TaskFlags, TaskTensors};

use super::{masked, weighted_sum, CombinedLoss};

/// Weighted sum with hand-tuned coefficients.
///
/// Pure: no state is kept between calls. Disabled tasks report exactly
/// zero and contribute nothing to the total.
#[derive(Debug, Clone)]
pub struct StaticWeightedCombiner {
    weights: StaticWeights,
    flags: TaskFlags,
}

impl StaticWeightedCombiner {
    /// Create a combiner with the given coefficients and task flags.
    #[must_use]
    pub const fn new(weights: StaticWeights, flags: TaskFlags) -> Self {
        Self { weights, flags }
    }

    /// Coefficients in use.
    #[must_use]
    pub const fn weights(&self) -> &StaticWeights {
        &self.weights
    }

    /// Task flags in use.
    #[must_use]
    pub const fn flags(&self) -> &TaskFlags {
        &self.flags
    }

    /// Evaluate all enabled task losses and combine them.
    ///
    /// # Errors
    ///
    /// Returns shape or dtype errors for the first enabled task whose
    /// prediction and target disagree.
    pub fn combine(&self, outputs: &TaskTensors, targets: &TaskTensors) -> Result<CombinedLoss> {
        let losses = BaseLosses::compute(outputs, targets, &self.flags, true)?;
        self.combine_losses(&losses)
    }

    /// Combine precomputed base losses.
    ///
    /// The returned per-task values are the raw (unscaled) base losses.
    ///
    /// # Errors
    ///
    /// Returns [`LossError::MissingInput`] if color is enabled but `losses`
    /// carries no color loss, and [`LossError::NumericInstability`] for a
    /// non-finite enabled loss or total.
    pub fn combine_losses(&self, losses: &BaseLosses) -> Result<CombinedLoss> {
        let flags = &self.flags;
        for task in Task::ALL {
            if let (true, Some(loss)) = (flags.is_enabled(task), losses.get(task)) {
                ensure_finite(LossScope::Task(task), "base loss", scalar_value(loss)?)?;
            }
        }

        let label = masked(&losses.label, flags.label)?;
        let segmentation = masked(&losses.segmentation, flags.segmentation)?;
        let bbox = masked(&losses.bbox, flags.bbox)?;
        let color = match (&losses.color, flags.color) {
            (Some(color), enabled) => masked(color, enabled)?,
            (None, false) => losses.label.zeros_like()?,
            (None, true) => return Err(LossError::MissingInput(Task::Color)),
        };

        let total = weighted_sum(
            &losses.label,
            &[
                (&label, self.weights.label),
                (&segmentation, self.weights.segmentation),
                (&bbox, self.weights.bbox_coefficient()),
                (&color, self.weights.color),
            ],
        )?;
        ensure_finite(LossScope::Total, "weighted sum", scalar_value(&total)?)?;

        Ok(CombinedLoss {
            total,
            label,
            segmentation,
            bbox,
            color: Some(color),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn combiner(flags: TaskFlags) -> StaticWeightedCombiner {
        StaticWeightedCombiner::new(StaticWeights::default(), flags)
    }

    #[test]
    fn test_published_coefficients() {
        let losses = BaseLosses::from_scalars(2.0, 0.1, 1000.0, Some(0.5), &Device::Cpu).unwrap();
        let c = combiner(TaskFlags::default());
        assert!((c.weights().bbox_coefficient() - 0.000_14).abs() < 1e-12);
        let combined = c.combine_losses(&losses).unwrap();
        // 1 * 2.0 + 20 * 0.1 + 0.00014 * 1000 + 0.5
        assert!((combined.total_value().unwrap() - 4.64).abs() < 1e-9);
    }

    #[test]
    fn test_disabled_color_contributes_zero() {
        let losses = BaseLosses::from_scalars(2.0, 0.1, 1000.0, Some(0.5), &Device::Cpu).unwrap();
        let combined = combiner(TaskFlags::default().with_color(false))
            .combine_losses(&losses)
            .unwrap();
        let breakdown = combined.breakdown().unwrap();
        assert_eq!(breakdown.color, Some(0.0));
        assert!((breakdown.total - 4.14).abs() < 1e-9);
    }

    #[test]
    fn test_missing_color_loss() {
        let losses = BaseLosses::from_scalars(2.0, 0.1, 1000.0, None, &Device::Cpu).unwrap();
        let err = combiner(TaskFlags::default()).combine_losses(&losses).unwrap_err();
        assert!(matches!(err, LossError::MissingInput(Task::Color)));
    }

    #[test]
    fn test_nan_loss_is_reported() {
        let losses = BaseLosses::from_scalars(f64::NAN, 0.1, 1000.0, Some(0.5), &Device::Cpu).unwrap();
        let err = combiner(TaskFlags::default()).combine_losses(&losses).unwrap_err();
        assert!(matches!(
            err,
            LossError::NumericInstability {
                scope: LossScope::Task(Task::Label),
                quantity: "base loss",
                ..
            }
        ));

        let losses = BaseLosses::from_scalars(2.0, 0.1, 1000.0, Some(f64::INFINITY), &Device::Cpu).unwrap();
        let err = combiner(TaskFlags::default()).combine_losses(&losses).unwrap_err();
        assert!(matches!(
            err,
            LossError::NumericInstability {
                scope: LossScope::Task(Task::Color),
                ..
            }
        ));
    }

    #[test]
    fn test_overflowing_total_is_reported() {
        let weights = StaticWeights::default().with_segmentation(1e300);
        let losses = BaseLosses::from_scalars(2.0, 1e300, 1000.0, Some(0.5), &Device::Cpu).unwrap();
        let err = StaticWeightedCombiner::new(weights, TaskFlags::default())
            .combine_losses(&losses)
            .unwrap_err();
        assert!(matches!(
            err,
            LossError::NumericInstability {
                scope: LossScope::Total,
                ..
            }
        ));
    }

    #[test]
    fn test_disabled_nan_loss_is_ignored() {
        let losses = BaseLosses::from_scalars(2.0, 0.1, 1000.0, Some(f64::NAN), &Device::Cpu).unwrap();
        let combined = combiner(TaskFlags::default().with_color(false))
            .combine_losses(&losses)
            .unwrap();
        assert!((combined.total_value().unwrap() - 4.14).abs() < 1e-9);
    }

    #[test]
    fn test_per_task_values_are_raw() {
        let losses = BaseLosses::from_scalars(2.0, 0.1, 1000.0, Some(0.5), &Device::Cpu).unwrap();
        let combined = combiner(TaskFlags::default()).combine_losses(&losses).unwrap();
        assert!((scalar_value(&combined.bbox).unwrap() - 1000.0).abs() < 1e-9);
        assert!((scalar_value(&combined.segmentation).unwrap() - 0.1).abs() < 1e-12);
    }
}
