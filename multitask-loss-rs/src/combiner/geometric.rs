//! Geometric-mean combination of the label, segmentation and bbox losses.
//!
//! `total = (L * S * B)^(1/n)` over the `n` enabled tasks. Rescaling any one
//! loss by `k` rescales the total by `k^(1/n)`, so no hand-tuned
//! coefficients are needed, and a task collapsing towards zero drags the
//! whole product down with it.

use tracing::warn;

use crate::config::{GeometricConfig, NegativeLossPolicy};
use crate::criteria::{scalar_value, BaseLosses};
use crate::error::{ensure_finite, LossError, LossScope, Result};
use crate::task::{Task, TaskFlags, TaskTensors};

use super::{masked, CombinedLoss};

/// Scale-invariant geometric-mean combiner.
#[derive(Debug, Clone)]
pub struct GeometricCombiner {
    config: GeometricConfig,
    flags: TaskFlags,
}

impl GeometricCombiner {
    /// Create a combiner with the given configuration and task flags.
    #[must_use]
    pub const fn new(config: GeometricConfig, flags: TaskFlags) -> Self {
        Self { config, flags }
    }

    /// Task flags in use.
    #[must_use]
    pub const fn flags(&self) -> &TaskFlags {
        &self.flags
    }

    /// Evaluate the enabled task losses and combine them.
    ///
    /// # Errors
    ///
    /// Returns shape or dtype errors from the criteria, and the errors of
    /// [`Self::combine_losses`].
    pub fn combine(&self, outputs: &TaskTensors, targets: &TaskTensors) -> Result<CombinedLoss> {
        let losses = BaseLosses::compute(outputs, targets, &self.flags, false)?;
        self.combine_losses(&losses)
    }

    /// Combine precomputed base losses.
    ///
    /// Disabled tasks are left out of the product and the exponent. With
    /// no task enabled the total is zero.
    ///
    /// # Errors
    ///
    /// Returns [`LossError::NumericInstability`] for a non-finite loss or
    /// result, and [`LossError::DomainError`] for a negative loss under
    /// [`NegativeLossPolicy::Reject`].
    pub fn combine_losses(&self, losses: &BaseLosses) -> Result<CombinedLoss> {
        let mask = self.flags.weighted_mask();
        let label = masked(&losses.label, mask[0])?;
        let segmentation = masked(&losses.segmentation, mask[1])?;
        let bbox = masked(&losses.bbox, mask[2])?;

        let mut enabled = Vec::with_capacity(3);
        for ((task, tensor), on) in Task::WEIGHTED
            .iter()
            .zip([&label, &segmentation, &bbox])
            .zip(mask)
        {
            if on {
                let value = scalar_value(tensor)?;
                ensure_finite(LossScope::Task(*task), "base loss", value)?;
                enabled.push((*task, tensor, value));
            }
        }

        if enabled.is_empty() {
            return Ok(CombinedLoss {
                total: losses.label.zeros_like()?,
                label,
                segmentation,
                bbox,
                color: None,
            });
        }

        let values: Vec<f64> = enabled.iter().map(|(_, _, v)| *v).collect();
        let clamp = if values.iter().any(|v| *v < 0.0) {
            let product: f64 = values.iter().product();
            match self.config.negative_policy {
                NegativeLossPolicy::Reject => {
                    return Err(LossError::DomainError {
                        product,
                        losses: values,
                    })
                }
                NegativeLossPolicy::Clamp => {
                    for (task, _, value) in enabled.iter().filter(|(_, _, v)| *v < 0.0) {
                        warn!(task = %task, value, "negative loss clamped to zero before geometric mean");
                    }
                    true
                }
            }
        } else {
            false
        };

        let mut product = None;
        for (_, tensor, _) in &enabled {
            let factor = if clamp { tensor.relu()? } else { (*tensor).clone() };
            product = Some(match product {
                None => factor,
                Some(acc) => factor.mul(&acc)?,
            });
        }
        let product = match product {
            Some(p) => p,
            None => losses.label.zeros_like()?,
        };

        #[allow(clippy::cast_precision_loss)]
        let exponent = 1.0 / enabled.len() as f64;
        let total = product.powf(exponent)?;
        ensure_finite(LossScope::Total, "geometric mean", scalar_value(&total)?)?;

        Ok(CombinedLoss {
            total,
            label,
            segmentation,
            bbox,
            color: None,
        })
    }
}
