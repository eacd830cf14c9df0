//! Task identities, per-run enable flags and the per-task tensor bundle.
//!
//! The model produces four heads per step: classification logits,
//! segmentation logits, a bounding-box regressor and a two-channel
//! chrominance image. Predictions and targets are both passed around as a
//! [`TaskTensors`] bundle.

use std::fmt;

use candle_core::Tensor;
use serde::{Deserialize, Serialize};

/// One of the jointly trained tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    /// Binary image classification.
    Label,
    /// Per-pixel semantic segmentation.
    Segmentation,
    /// Bounding-box regression.
    #[serde(rename = "bbox")]
    BBox,
    /// Chrominance (ab channel) regression from lightness.
    Color,
}

impl Task {
    /// All tasks in canonical slot order.
    pub const ALL: [Self; 4] = [Self::Label, Self::Segmentation, Self::BBox, Self::Color];

    /// The three tasks governed by the geometric and soft-adapt combiners.
    pub const WEIGHTED: [Self; 3] = [Self::Label, Self::Segmentation, Self::BBox];
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Label => write!(f, "label"),
            Self::Segmentation => write!(f, "segmentation"),
            Self::BBox => write!(f, "bbox"),
            Self::Color => write!(f, "color"),
        }
    }
}

/// Which tasks contribute to the loss for a run.
///
/// Set once per run. A disabled task is never evaluated; its slot carries a
/// zero placeholder so result shapes stay stable.
///
/// # Example
///
/// ```
/// use multitask_loss_rs::{Task, TaskFlags};
///
/// let flags = TaskFlags::default().with_color(false);
/// assert!(flags.is_enabled(Task::Label));
/// assert!(!flags.is_enabled(Task::Color));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct TaskFlags {
    /// Classification enabled.
    pub label: bool,
    /// Segmentation enabled.
    pub segmentation: bool,
    /// Bounding-box regression enabled.
    pub bbox: bool,
    /// Colorization enabled.
    pub color: bool,
}

impl Default for TaskFlags {
    fn default() -> Self {
        Self {
            label: true,
            segmentation: true,
            bbox: true,
            color: true,
        }
    }
}

impl TaskFlags {
    /// Set whether the classification task is enabled.
    #[must_use]
    pub const fn with_label(mut self, enabled: bool) -> Self {
        self.label = enabled;
        self
    }

    /// Set whether the segmentation task is enabled.
    #[must_use]
    pub const fn with_segmentation(mut self, enabled: bool) -> Self {
        self.segmentation = enabled;
        self
    }

    /// Set whether the bounding-box task is enabled.
    #[must_use]
    pub const fn with_bbox(mut self, enabled: bool) -> Self {
        self.bbox = enabled;
        self
    }

    /// Set whether the colorization task is enabled.
    #[must_use]
    pub const fn with_color(mut self, enabled: bool) -> Self {
        self.color = enabled;
        self
    }

    /// Whether `task` is enabled.
    #[must_use]
    pub const fn is_enabled(&self, task: Task) -> bool {
        match task {
            Task::Label => self.label,
            Task::Segmentation => self.segmentation,
            Task::BBox => self.bbox,
            Task::Color => self.color,
        }
    }

    /// Enable mask over [`Task::WEIGHTED`].
    #[must_use]
    pub const fn weighted_mask(&self) -> [bool; 3] {
        [self.label, self.segmentation, self.bbox]
    }
}

/// Per-task tensors for one step, used for both predictions and targets.
///
/// Shapes agreed with the model:
/// - `labels`: logits `(N, C)` / class indices `(N,)`
/// - `segmentation`: logits `(N, C, H, W)` / class indices `(N, H, W)`
/// - `bboxes`: `(N, 4)` or any shape, identical for prediction and target
/// - `color`: `(N, 2, H, W)`, identical for prediction and target
#[derive(Debug, Clone)]
pub struct TaskTensors {
    /// Classification head.
    pub labels: Tensor,
    /// Segmentation head.
    pub segmentation: Tensor,
    /// Bounding-box head.
    pub bboxes: Tensor,
    /// Colorization head, absent for combiners that do not use it.
    pub color: Option<Tensor>,
}

impl TaskTensors {
    /// Bundle the three weighted heads without a color tensor.
    #[must_use]
    pub fn new(labels: Tensor, segmentation: Tensor, bboxes: Tensor) -> Self {
        Self {
            labels,
            segmentation,
            bboxes,
            color: None,
        }
    }

    /// Attach the colorization tensor.
    #[must_use]
    pub fn with_color(mut self, color: Tensor) -> Self {
        self.color = Some(color);
        self
    }

    /// Tensor for `task`, if present.
    #[must_use]
    pub fn get(&self, task: Task) -> Option<&Tensor> {
        match task {
            Task::Label => Some(&self.labels),
            Task::Segmentation => Some(&self.segmentation),
            Task::BBox => Some(&self.bboxes),
            Task::Color => self.color.as_ref(),
        }
    }
}
