//! Soft-adapt: task weights from the relative rate of change of each loss.
//!
//! Each call records the three base losses into a two-slot history, derives
//! a per-task rate of change, and turns the rates into weights with a
//! numerically stable softmax:
//!
//! ```text
//! s[t]     = -beta * rate[t]
//! w[t]     = exp(s[t] - max(s))
//! alpha[t] = w[t] / (sum(w) + eps)
//! total    = alpha[0] * L + alpha[1] * S + alpha[2] * B * bbox_scale
//! ```
//!
//! A task whose loss falls fastest gets the largest weight; a task that has
//! stalled or is getting worse is down-weighted. The weights of step `k`
//! come from the history available at step `k`, so they trail the loss
//! trend by one observation.
//!
//! # States
//!
//! ```text
//! Cold (steps 1-2, rates = 0, uniform weights) -> Warm (step >= 3)
//! ```
//!
//! The transition happens once per instance, unless the history is reset.

use tracing::{debug, info};

use crate::config::{HistoryPolicy, SoftAdaptConfig};
use crate::criteria::{scalar_value, BaseLosses};
use crate::error::{ensure_finite, LossScope, Result};
use crate::task::{Task, TaskFlags, TaskTensors};

use super::history::LossHistory;
use super::{masked, CombinedLoss};

const UNIFORM: [f64; 3] = [1.0 / 3.0; 3];

/// Turn per-task rates of change into normalized weights.
///
/// Disabled tasks (`enabled[t] == false`) get weight zero and do not take
/// part in the softmax. `losses` is only read when
/// [`SoftAdaptConfig::loss_weighted`] is set.
///
/// # Example
///
/// ```
/// use multitask_loss_rs::{soft_adapt_weights, SoftAdaptConfig};
///
/// # fn main() -> multitask_loss_rs::Result<()> {
/// let alpha = soft_adapt_weights(
///     &[-5.0, -1.0, 0.0],
///     &[1.0, 1.0, 1.0],
///     [true; 3],
///     &SoftAdaptConfig::default(),
/// )?;
/// assert!(alpha[0] > alpha[1] && alpha[0] > alpha[2]);
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns [`crate::LossError::NumericInstability`] naming the task whose
/// rate or weight is not finite.
pub fn soft_adapt_weights(
    rates: &[f64; 3],
    losses: &[f64; 3],
    enabled: [bool; 3],
    config: &SoftAdaptConfig,
) -> Result<[f64; 3]> {
    for ((task, rate), on) in Task::WEIGHTED.iter().zip(rates).zip(enabled) {
        if on {
            ensure_finite(LossScope::Task(*task), "rate of change", *rate)?;
        }
    }

    let mut x = *rates;
    if config.normalize_rates {
        let norm: f64 = x
            .iter()
            .zip(enabled)
            .filter(|(_, on)| *on)
            .map(|(r, _)| r.abs())
            .sum::<f64>()
            + config.epsilon;
        for r in &mut x {
            *r /= norm;
        }
    }

    if !enabled.contains(&true) {
        return Ok([0.0; 3]);
    }
    let scores = x.map(|r| -config.beta * r);
    let max_score = scores
        .iter()
        .zip(enabled)
        .filter(|(_, on)| *on)
        .map(|(s, _)| *s)
        .fold(f64::NEG_INFINITY, f64::max);

    let mut w = [0.0; 3];
    for i in 0..3 {
        if enabled[i] {
            w[i] = (scores[i] - max_score).exp();
            if config.loss_weighted {
                w[i] *= losses[i];
            }
        }
    }

    let denom = w.iter().sum::<f64>() + config.epsilon;
    let alpha = w.map(|wi| wi / denom);
    for (task, a) in Task::WEIGHTED.iter().zip(alpha) {
        ensure_finite(LossScope::Task(*task), "weight", a)?;
    }
    Ok(alpha)
}

/// Stateful soft-adapt combiner over the label, segmentation and bbox tasks.
///
/// Owns its history exclusively; one instance per training run. Calls must
/// be sequential since every call mutates the history.
///
/// # Example
///
/// ```
/// use candle_core::Device;
/// use multitask_loss_rs::{BaseLosses, SoftAdaptCombiner, SoftAdaptConfig, TaskFlags};
///
/// # fn main() -> multitask_loss_rs::Result<()> {
/// let mut combiner = SoftAdaptCombiner::new(SoftAdaptConfig::default(), TaskFlags::default())?;
/// for label in [1.0, 0.8, 0.6, 0.3] {
///     let losses = BaseLosses::from_scalars(label, 0.5, 100.0, None, &Device::Cpu)?;
///     combiner.combine_losses(&losses)?;
/// }
/// // the label loss is the only one falling
/// let alpha = combiner.weights();
/// assert!(alpha[0] > alpha[1]);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SoftAdaptCombiner {
    config: SoftAdaptConfig,
    flags: TaskFlags,
    history: LossHistory,
    /// 1-based index of the next call.
    step: u64,
    rates: [f64; 3],
    weights: [f64; 3],
    epoch: u64,
}

impl SoftAdaptCombiner {
    /// Create a cold combiner.
    ///
    /// # Errors
    ///
    /// Returns [`crate::LossError::InvalidConfig`] if `config` is invalid.
    pub fn new(config: SoftAdaptConfig, flags: TaskFlags) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            flags,
            history: LossHistory::default(),
            step: 1,
            rates: [0.0; 3],
            weights: UNIFORM,
            epoch: 0,
        })
    }

    /// Evaluate the enabled task losses and combine them.
    ///
    /// # Errors
    ///
    /// Returns shape or dtype errors from the criteria, and the errors of
    /// [`Self::combine_losses`].
    pub fn combine(&mut self, outputs: &TaskTensors, targets: &TaskTensors) -> Result<CombinedLoss> {
        let losses = BaseLosses::compute(outputs, targets, &self.flags, false)?;
        self.combine_losses(&losses)
    }

    /// Record precomputed base losses and combine them with fresh weights.
    ///
    /// The per-task values returned are the weighted contributions
    /// (bbox including its fixed prior), so they sum to `total`.
    ///
    /// On error the history, step counter and weights are left exactly as
    /// they were before the call.
    ///
    /// # Errors
    ///
    /// Returns [`crate::LossError::NumericInstability`] if a base loss,
    /// rate, weight or the total is not finite.
    pub fn combine_losses(&mut self, losses: &BaseLosses) -> Result<CombinedLoss> {
        let enabled = self.flags.weighted_mask();
        let raw = losses.weighted_values()?;

        let mut values = [0.0; 3];
        for i in 0..3 {
            if enabled[i] {
                ensure_finite(LossScope::Task(Task::WEIGHTED[i]), "base loss", raw[i])?;
                values[i] = raw[i];
            }
        }

        let slot = LossHistory::slot_for_step(self.step);
        let mut history = self.history;
        history.write(slot, values);

        let rates = if self.step > 2 {
            history.rate_of_change(self.config.rate_convention, slot)
        } else {
            [0.0; 3]
        };

        let bbox_scale = self.config.bbox_scale;
        let scaled = [values[0], values[1], values[2] * bbox_scale];
        let alpha = soft_adapt_weights(&rates, &scaled, enabled, &self.config)?;

        let label = masked(&losses.label, enabled[0])?.affine(alpha[0], 0.0)?;
        let segmentation = masked(&losses.segmentation, enabled[1])?
            .to_dtype(label.dtype())?
            .affine(alpha[1], 0.0)?;
        let bbox = masked(&losses.bbox, enabled[2])?
            .to_dtype(label.dtype())?
            .affine(alpha[2] * bbox_scale, 0.0)?;
        let total = label.add(&segmentation)?.add(&bbox)?;

        let total_value = scalar_value(&total)?;
        ensure_finite(LossScope::Total, "weighted sum", total_value)?;

        debug!(
            step = self.step,
            slot,
            ?rates,
            ?alpha,
            total = total_value,
            "soft-adapt weights"
        );

        self.history = history;
        self.rates = rates;
        self.weights = alpha;
        self.step += 1;

        Ok(CombinedLoss {
            total,
            label,
            segmentation,
            bbox,
            color: None,
        })
    }

    /// Mark the start of a new epoch and apply the history policy.
    pub fn begin_epoch(&mut self) {
        self.epoch += 1;
        if self.config.history_policy == HistoryPolicy::ResetEachEpoch && self.step > 1 {
            info!(epoch = self.epoch, "soft-adapt history reset at epoch start");
            self.reset();
        }
    }

    /// Return to the cold state.
    pub fn reset(&mut self) {
        self.history.clear();
        self.step = 1;
        self.rates = [0.0; 3];
        self.weights = UNIFORM;
    }

    /// Weights used by the most recent call (uniform before the first).
    #[must_use]
    pub const fn weights(&self) -> [f64; 3] {
        self.weights
    }

    /// Rates of change used by the most recent call.
    #[must_use]
    pub const fn rates(&self) -> [f64; 3] {
        self.rates
    }

    /// 1-based index of the next call.
    #[must_use]
    pub const fn step(&self) -> u64 {
        self.step
    }

    /// Whether the next call derives weights from a genuine previous/current
    /// pair.
    #[must_use]
    pub const fn is_warm(&self) -> bool {
        self.step > 2
    }

    /// Number of epochs started.
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Current loss history.
    #[must_use]
    pub const fn history(&self) -> &LossHistory {
        &self.history
    }

    /// Task flags in use.
    #[must_use]
    pub const fn flags(&self) -> &TaskFlags {
        &self.flags
    }
}
