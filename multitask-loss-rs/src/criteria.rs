//! Per-task base loss functions.
//!
//! | Task | Loss | Prediction | Target |
//! |------|------|------------|--------|
//! | label | cross-entropy | `(N, C)` logits | `(N,)` class indices |
//! | segmentation | cross-entropy | `(N, C, H, W)` logits | `(N, H, W)` class indices |
//! | bbox | mean squared error | any | same shape |
//! | color | mean absolute error | any | same shape |
//!
//! Every function validates shapes up front and fails with
//! [`LossError::ShapeMismatch`] instead of letting candle broadcast.

use candle_core::{DType, Device, Tensor};

use crate::error::{LossError, Result};
use crate::task::{Task, TaskFlags, TaskTensors};

const INDEX_DTYPES: &str = "u8, u32 or i64 class indices";

fn ensure_index_dtype(task: Task, target: &Tensor) -> Result<()> {
    match target.dtype() {
        DType::U8 | DType::U32 | DType::I64 => Ok(()),
        actual => Err(LossError::DTypeMismatch {
            task,
            expected: INDEX_DTYPES,
            actual,
        }),
    }
}

fn ensure_index_range(task: Task, target: &Tensor, classes: usize) -> Result<()> {
    if target.elem_count() == 0 {
        return Ok(());
    }
    let flat = target.to_dtype(DType::F64)?.flatten_all()?;
    let min = flat.min(0)?.to_scalar::<f64>()?;
    let max = flat.max(0)?.to_scalar::<f64>()?;
    #[allow(clippy::cast_precision_loss)]
    let bad = if min < 0.0 {
        Some(min)
    } else if max >= classes as f64 {
        Some(max)
    } else {
        None
    };
    match bad {
        #[allow(clippy::cast_possible_truncation)]
        Some(index) => Err(LossError::ClassIndexOutOfRange {
            task,
            index: index as i64,
            classes,
        }),
        None => Ok(()),
    }
}

fn mismatch(task: Task, prediction: &Tensor, target: &Tensor, reason: &'static str) -> LossError {
    LossError::ShapeMismatch {
        task,
        prediction: prediction.dims().to_vec(),
        target: target.dims().to_vec(),
        reason,
    }
}

/// Cross-entropy between classification logits `(N, C)` and indices `(N,)`.
///
/// # Errors
///
/// Returns [`LossError::ShapeMismatch`] on rank or batch disagreement,
/// [`LossError::DTypeMismatch`] for non-integer targets and
/// [`LossError::ClassIndexOutOfRange`] for an index outside `0..C`.
pub fn classification_loss(logits: &Tensor, target: &Tensor) -> Result<Tensor> {
    const REASON: &str = "expected (N, C) logits and (N,) indices";
    let (batch, classes) = logits
        .dims2()
        .map_err(|_| mismatch(Task::Label, logits, target, REASON))?;
    if target.dims() != [batch] {
        return Err(mismatch(Task::Label, logits, target, REASON));
    }
    ensure_index_dtype(Task::Label, target)?;
    ensure_index_range(Task::Label, target, classes)?;

    Ok(candle_nn::loss::cross_entropy(logits, target)?)
}

/// Per-pixel cross-entropy between `(N, C, H, W)` logits and `(N, H, W)`
/// indices, averaged over every pixel in the batch.
///
/// A `(N, 1, H, W)` target is accepted and squeezed.
///
/// # Errors
///
/// Returns [`LossError::ShapeMismatch`] when spatial or batch dimensions
/// disagree, [`LossError::DTypeMismatch`] for non-integer targets and
/// [`LossError::ClassIndexOutOfRange`] for an index outside `0..C`.
pub fn segmentation_loss(logits: &Tensor, target: &Tensor) -> Result<Tensor> {
    const REASON: &str = "expected (N, C, H, W) logits and (N, H, W) indices";
    let (batch, classes, height, width) = logits
        .dims4()
        .map_err(|_| mismatch(Task::Segmentation, logits, target, REASON))?;

    let squeezed = match target.dims() {
        [n, 1, h, w] if (*n, *h, *w) == (batch, height, width) => target.squeeze(1)?,
        [n, h, w] if (*n, *h, *w) == (batch, height, width) => target.clone(),
        _ => return Err(mismatch(Task::Segmentation, logits, target, REASON)),
    };
    ensure_index_dtype(Task::Segmentation, &squeezed)?;
    ensure_index_range(Task::Segmentation, &squeezed, classes)?;

    let pixels = batch * height * width;
    let flat_logits = logits
        .permute((0, 2, 3, 1))?
        .contiguous()?
        .reshape((pixels, classes))?;
    let flat_target = squeezed.flatten_all()?;

    Ok(candle_nn::loss::cross_entropy(&flat_logits, &flat_target)?)
}

/// Mean squared error for bounding-box regression.
///
/// # Errors
///
/// Returns [`LossError::ShapeMismatch`] unless both shapes are identical.
pub fn bbox_loss(prediction: &Tensor, target: &Tensor) -> Result<Tensor> {
    if prediction.dims() != target.dims() {
        return Err(mismatch(Task::BBox, prediction, target, "identical shapes"));
    }
    let target = target.to_dtype(prediction.dtype())?;
    Ok(candle_nn::loss::mse(prediction, &target)?)
}

/// Mean absolute error for chrominance regression.
///
/// # Errors
///
/// Returns [`LossError::ShapeMismatch`] unless both shapes are identical.
pub fn color_loss(prediction: &Tensor, target: &Tensor) -> Result<Tensor> {
    if prediction.dims() != target.dims() {
        return Err(mismatch(
            Task::Color,
            prediction,
            target,
            "identical shapes",
        ));
    }
    let target = target.to_dtype(prediction.dtype())?;
    Ok(prediction.sub(&target)?.abs()?.mean_all()?)
}

/// Base loss for `task`.
///
/// # Errors
///
/// Propagates the validation errors of the task's loss function.
pub fn task_loss(task: Task, prediction: &Tensor, target: &Tensor) -> Result<Tensor> {
    match task {
        Task::Label => classification_loss(prediction, target),
        Task::Segmentation => segmentation_loss(prediction, target),
        Task::BBox => bbox_loss(prediction, target),
        Task::Color => color_loss(prediction, target),
    }
}

/// Reduce a loss tensor to an `f64` scalar.
///
/// # Errors
///
/// Returns a tensor error if the value cannot be read back.
pub fn scalar_value(loss: &Tensor) -> Result<f64> {
    Ok(loss.to_dtype(DType::F64)?.sum_all()?.to_scalar::<f64>()?)
}

/// Scalar zero on the given device and dtype, used for disabled tasks.
///
/// # Errors
///
/// Returns a tensor error if allocation fails.
pub fn zero_loss(dtype: DType, device: &Device) -> Result<Tensor> {
    Ok(Tensor::zeros((), dtype, device)?)
}

/// Unweighted per-task losses for one step.
#[derive(Debug, Clone)]
pub struct BaseLosses {
    /// Classification loss.
    pub label: Tensor,
    /// Segmentation loss.
    pub segmentation: Tensor,
    /// Bounding-box loss.
    pub bbox: Tensor,
    /// Colorization loss, when the combiner tracks it.
    pub color: Option<Tensor>,
}

impl BaseLosses {
    /// Evaluate every enabled task.
    ///
    /// Disabled tasks are skipped entirely (no shape checks) and yield a
    /// scalar zero in the dtype and device of the classification logits.
    ///
    /// # Arguments
    ///
    /// * `outputs` - Model predictions
    /// * `targets` - Ground truth
    /// * `flags` - Per-run task switches
    /// * `include_color` - Whether the caller's combiner uses the color slot
    ///
    /// # Errors
    ///
    /// Returns [`LossError::MissingInput`] when color is enabled and
    /// requested but absent, or any validation error from the criteria.
    pub fn compute(
        outputs: &TaskTensors,
        targets: &TaskTensors,
        flags: &TaskFlags,
        include_color: bool,
    ) -> Result<Self> {
        let dtype = outputs.labels.dtype();
        let device = outputs.labels.device();

        let evaluate = |task: Task| -> Result<Tensor> {
            if !flags.is_enabled(task) {
                return zero_loss(dtype, device);
            }
            match (outputs.get(task), targets.get(task)) {
                (Some(prediction), Some(target)) => task_loss(task, prediction, target),
                _ => Err(LossError::MissingInput(task)),
            }
        };

        let color = if include_color {
            Some(evaluate(Task::Color)?)
        } else {
            None
        };

        Ok(Self {
            label: evaluate(Task::Label)?,
            segmentation: evaluate(Task::Segmentation)?,
            bbox: evaluate(Task::BBox)?,
            color,
        })
    }

    /// Build from already-known scalar losses (f64 tensors on `device`).
    ///
    /// Useful when the losses were computed by another component.
    ///
    /// # Errors
    ///
    /// Returns a tensor error if allocation fails.
    pub fn from_scalars(
        label: f64,
        segmentation: f64,
        bbox: f64,
        color: Option<f64>,
        device: &Device,
    ) -> Result<Self> {
        Ok(Self {
            label: Tensor::new(label, device)?,
            segmentation: Tensor::new(segmentation, device)?,
            bbox: Tensor::new(bbox, device)?,
            color: color.map(|c| Tensor::new(c, device)).transpose()?,
        })
    }

    /// Loss tensor for `task`, if tracked.
    #[must_use]
    pub fn get(&self, task: Task) -> Option<&Tensor> {
        match task {
            Task::Label => Some(&self.label),
            Task::Segmentation => Some(&self.segmentation),
            Task::BBox => Some(&self.bbox),
            Task::Color => self.color.as_ref(),
        }
    }

    /// Scalar values of the label, segmentation and bbox losses.
    ///
    /// # Errors
    ///
    /// Returns a tensor error if a value cannot be read back.
    pub fn weighted_values(&self) -> Result<[f64; 3]> {
        Ok([
            scalar_value(&self.label)?,
            scalar_value(&self.segmentation)?,
            scalar_value(&self.bbox)?,
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpu() -> Device {
        Device::Cpu
    }

    #[test]
    fn test_classification_uniform_logits() {
        // Uniform logits over two classes: loss = ln 2
        let logits = Tensor::zeros((4, 2), DType::F32, &cpu()).unwrap();
        let target = Tensor::new(&[0u32, 1, 1, 0], &cpu()).unwrap();
        let loss = scalar_value(&classification_loss(&logits, &target).unwrap()).unwrap();
        assert!((loss - std::f64::consts::LN_2).abs() < 1e-5);
    }

    #[test]
    fn test_classification_batch_mismatch() {
        let logits = Tensor::zeros((4, 2), DType::F32, &cpu()).unwrap();
        let target = Tensor::new(&[0u32, 1, 1], &cpu()).unwrap();
        let err = classification_loss(&logits, &target).unwrap_err();
        assert!(matches!(
            err,
            LossError::ShapeMismatch {
                task: Task::Label,
                ..
            }
        ));
    }

    #[test]
    fn test_classification_float_target_rejected() {
        let logits = Tensor::zeros((2, 2), DType::F32, &cpu()).unwrap();
        let target = Tensor::new(&[0f32, 1.0], &cpu()).unwrap();
        let err = classification_loss(&logits, &target).unwrap_err();
        assert!(matches!(err, LossError::DTypeMismatch { .. }));
    }

    #[test]
    fn test_classification_index_out_of_range() {
        let logits = Tensor::zeros((2, 3), DType::F32, &cpu()).unwrap();
        let target = Tensor::new(&[0u32, 7], &cpu()).unwrap();
        let err = classification_loss(&logits, &target).unwrap_err();
        assert!(matches!(
            err,
            LossError::ClassIndexOutOfRange {
                task: Task::Label,
                index: 7,
                classes: 3,
            }
        ));
        assert!(err.to_string().contains("label"));
    }

    #[test]
    fn test_segmentation_negative_index_rejected() {
        let logits = Tensor::zeros((1, 2, 2, 2), DType::F32, &cpu()).unwrap();
        let target = Tensor::new(&[[[0i64, 1], [-1, 0]]], &cpu()).unwrap();
        let err = segmentation_loss(&logits, &target).unwrap_err();
        assert!(matches!(
            err,
            LossError::ClassIndexOutOfRange {
                task: Task::Segmentation,
                index: -1,
                classes: 2,
            }
        ));
    }

    #[test]
    fn test_segmentation_uniform_logits() {
        let logits = Tensor::zeros((2, 2, 3, 3), DType::F32, &cpu()).unwrap();
        let target = Tensor::zeros((2, 3, 3), DType::U32, &cpu()).unwrap();
        let loss = scalar_value(&segmentation_loss(&logits, &target).unwrap()).unwrap();
        assert!((loss - std::f64::consts::LN_2).abs() < 1e-5);
    }

    #[test]
    fn test_segmentation_accepts_channel_target() {
        let logits = Tensor::zeros((2, 2, 3, 3), DType::F32, &cpu()).unwrap();
        let target = Tensor::zeros((2, 1, 3, 3), DType::I64, &cpu()).unwrap();
        assert!(segmentation_loss(&logits, &target).is_ok());
    }

    #[test]
    fn test_segmentation_spatial_mismatch() {
        let logits = Tensor::zeros((2, 2, 3, 3), DType::F32, &cpu()).unwrap();
        let target = Tensor::zeros((2, 4, 3), DType::U32, &cpu()).unwrap();
        let err = segmentation_loss(&logits, &target).unwrap_err();
        assert!(matches!(
            err,
            LossError::ShapeMismatch {
                task: Task::Segmentation,
                ..
            }
        ));
    }

    #[test]
    fn test_bbox_mse() {
        let pred = Tensor::new(&[[1f32, 2.0], [3.0, 4.0]], &cpu()).unwrap();
        let target = Tensor::new(&[[0f32, 2.0], [3.0, 2.0]], &cpu()).unwrap();
        // (1 + 0 + 0 + 4) / 4
        let loss = scalar_value(&bbox_loss(&pred, &target).unwrap()).unwrap();
        assert!((loss - 1.25).abs() < 1e-6);
    }

    #[test]
    fn test_bbox_no_broadcast() {
        let pred = Tensor::zeros((2, 4), DType::F32, &cpu()).unwrap();
        let target = Tensor::zeros((1, 4), DType::F32, &cpu()).unwrap();
        assert!(matches!(
            bbox_loss(&pred, &target).unwrap_err(),
            LossError::ShapeMismatch {
                task: Task::BBox,
                ..
            }
        ));
    }

    #[test]
    fn test_color_mae() {
        let pred = Tensor::new(&[1f32, -1.0, 0.5, 0.0], &cpu()).unwrap();
        let target = Tensor::new(&[0f32, 1.0, 0.5, 2.0], &cpu()).unwrap();
        // (1 + 2 + 0 + 2) / 4
        let loss = scalar_value(&color_loss(&pred, &target).unwrap()).unwrap();
        assert!((loss - 1.25).abs() < 1e-6);
    }

    #[test]
    fn test_disabled_task_skips_validation() {
        let outputs = TaskTensors::new(
            Tensor::zeros((2, 2), DType::F32, &cpu()).unwrap(),
            Tensor::zeros((2, 2, 3, 3), DType::F32, &cpu()).unwrap(),
            Tensor::zeros((2, 4), DType::F32, &cpu()).unwrap(),
        );
        // bbox target is malformed but bbox is disabled
        let targets = TaskTensors::new(
            Tensor::new(&[0u32, 1], &cpu()).unwrap(),
            Tensor::zeros((2, 3, 3), DType::U32, &cpu()).unwrap(),
            Tensor::zeros(7, DType::F32, &cpu()).unwrap(),
        );
        let flags = TaskFlags::default().with_bbox(false);
        let losses = BaseLosses::compute(&outputs, &targets, &flags, false).unwrap();
        assert_eq!(scalar_value(&losses.bbox).unwrap(), 0.0);
        assert!(losses.color.is_none());
    }

    #[test]
    fn test_missing_color_input() {
        let outputs = TaskTensors::new(
            Tensor::zeros((2, 2), DType::F32, &cpu()).unwrap(),
            Tensor::zeros((2, 2, 3, 3), DType::F32, &cpu()).unwrap(),
            Tensor::zeros((2, 4), DType::F32, &cpu()).unwrap(),
        );
        let targets = TaskTensors::new(
            Tensor::new(&[0u32, 1], &cpu()).unwrap(),
            Tensor::zeros((2, 3, 3), DType::U32, &cpu()).unwrap(),
            Tensor::zeros((2, 4), DType::F32, &cpu()).unwrap(),
        );
        let err = BaseLosses::compute(&outputs, &targets, &TaskFlags::default(), true).unwrap_err();
        assert!(matches!(err, LossError::MissingInput(Task::Color)));
    }
}
