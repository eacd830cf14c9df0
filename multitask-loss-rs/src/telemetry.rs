//! Per-task loss tracking for logging and epoch-level analysis.
//!
//! The combiners hand back a [`LossBreakdown`] every step; the training loop
//! records it here together with the split and epoch. The tracker provides
//! per-epoch means, rolling statistics, JSON export and the epoch-level
//! soft-adapt weights computed from successive training-epoch means.
//!
//! # Example
//!
//! ```
//! use multitask_loss_rs::{LossBreakdown, LossTracker, Split, Task};
//!
//! let mut tracker = LossTracker::new(1000);
//! tracker.start_epoch(0);
//! tracker.record(Split::Train, LossBreakdown { total: 1.0, label: 0.6, ..Default::default() });
//! tracker.record(Split::Train, LossBreakdown { total: 0.8, label: 0.4, ..Default::default() });
//!
//! let summary = tracker.epoch_summary(0, Split::Train).unwrap();
//! assert!((summary.mean.label - 0.5).abs() < 1e-12);
//! assert!(tracker.rolling_average(Task::Label, Split::Train, 2).is_some());
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::combiner::{soft_adapt_weights, LossBreakdown};
use crate::config::SoftAdaptConfig;
use crate::error::Result;
use crate::task::Task;

/// Which loop a measurement came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    /// Training step.
    Train,
    /// Validation step.
    Validation,
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Train => write!(f, "train"),
            Self::Validation => write!(f, "validation"),
        }
    }
}

/// A single step's losses with metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LossRecord {
    /// Global step index when recorded.
    pub step: usize,
    /// Epoch the step belongs to.
    pub epoch: usize,
    /// Train or validation.
    pub split: Split,
    /// Scalar losses of the step.
    pub losses: LossBreakdown,
    /// Time since tracker creation.
    #[serde(skip)]
    pub timestamp: Duration,
}

/// Statistical summary of one task's losses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LossStatistics {
    /// Number of measurements in window.
    pub count: usize,
    /// Mean loss value.
    pub mean: f64,
    /// Variance of loss values.
    pub variance: f64,
    /// Standard deviation of loss values.
    pub std_dev: f64,
    /// Minimum loss value.
    pub min: f64,
    /// Maximum loss value.
    pub max: f64,
    /// Median loss value.
    pub median: f64,
}

/// Mean losses of one epoch and split.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochSummary {
    /// Epoch index.
    pub epoch: usize,
    /// Train or validation.
    pub split: Split,
    /// Number of steps averaged.
    pub steps: usize,
    /// Per-field means; `color` only when every step tracked it.
    pub mean: LossBreakdown,
}

/// Configuration for loss tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LossTrackerConfig {
    /// Maximum number of records to keep.
    pub max_history: usize,
    /// Emit an `info!` summary whenever an epoch ends.
    pub log_epochs: bool,
}

impl Default for LossTrackerConfig {
    fn default() -> Self {
        Self {
            max_history: 100_000,
            log_epochs: true,
        }
    }
}

impl LossTrackerConfig {
    /// Builder: Set maximum history size.
    #[must_use]
    pub const fn with_max_history(mut self, max: usize) -> Self {
        self.max_history = max;
        self
    }

    /// Builder: Set whether epoch summaries are logged.
    #[must_use]
    pub const fn with_log_epochs(mut self, log: bool) -> Self {
        self.log_epochs = log;
        self
    }
}

/// Bounded record of per-step task losses.
pub struct LossTracker {
    config: LossTrackerConfig,
    records: VecDeque<LossRecord>,
    start_time: Instant,
    current_step: usize,
    epoch: usize,
}

impl LossTracker {
    /// Create a tracker keeping at most `max_history` records.
    #[must_use]
    pub fn new(max_history: usize) -> Self {
        Self::with_config(LossTrackerConfig {
            max_history,
            ..Default::default()
        })
    }

    /// Create a tracker with custom configuration.
    #[must_use]
    pub fn with_config(config: LossTrackerConfig) -> Self {
        Self {
            records: VecDeque::with_capacity(config.max_history.min(4096)),
            config,
            start_time: Instant::now(),
            current_step: 0,
            epoch: 0,
        }
    }

    /// Start a new epoch, logging the summary of the previous one.
    pub fn start_epoch(&mut self, epoch: usize) {
        if self.config.log_epochs && epoch != self.epoch {
            self.log_epoch_summary(self.epoch);
        }
        self.epoch = epoch;
    }

    /// Epoch new records are attributed to.
    #[must_use]
    pub const fn current_epoch(&self) -> usize {
        self.epoch
    }

    /// Record one step's losses.
    pub fn record(&mut self, split: Split, losses: LossBreakdown) {
        self.records.push_back(LossRecord {
            step: self.current_step,
            epoch: self.epoch,
            split,
            losses,
            timestamp: self.start_time.elapsed(),
        });

        while self.records.len() > self.config.max_history {
            self.records.pop_front();
        }

        self.current_step += 1;
    }

    /// Most recent record.
    #[must_use]
    pub fn latest(&self) -> Option<&LossRecord> {
        self.records.back()
    }

    /// All retained records.
    #[must_use]
    pub fn records(&self) -> &VecDeque<LossRecord> {
        &self.records
    }

    /// Records of one split.
    #[must_use]
    pub fn records_for(&self, split: Split) -> Vec<&LossRecord> {
        self.records.iter().filter(|r| r.split == split).collect()
    }

    /// Most recent `window` values of `task` in `split` (all if `None`),
    /// oldest first.
    fn task_values(&self, task: Task, split: Split, window: Option<usize>) -> Vec<f64> {
        let values: Vec<f64> = self
            .records
            .iter()
            .filter(|r| r.split == split)
            .filter_map(|r| r.losses.task(task))
            .collect();
        let start = values.len().saturating_sub(window.unwrap_or(values.len()));
        values[start..].to_vec()
    }

    /// Statistics of `task` over the most recent window.
    ///
    /// # Arguments
    ///
    /// * `task` - Task to summarize
    /// * `split` - Train or validation records
    /// * `window` - Number of recent records to include (None = all)
    #[must_use]
    pub fn compute_statistics(
        &self,
        task: Task,
        split: Split,
        window: Option<usize>,
    ) -> Option<LossStatistics> {
        let values = self.task_values(task, split, window);
        if values.is_empty() {
            return None;
        }
        Some(compute_stats(&values))
    }

    /// Rolling average of `task` over the last `window` records of `split`.
    #[must_use]
    pub fn rolling_average(&self, task: Task, split: Split, window: usize) -> Option<f64> {
        let values = self.task_values(task, split, Some(window));
        if window == 0 || values.len() < window {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        Some(values.iter().sum::<f64>() / window as f64)
    }

    /// Per-field means of one epoch and split.
    #[must_use]
    pub fn epoch_summary(&self, epoch: usize, split: Split) -> Option<EpochSummary> {
        let records: Vec<&LossRecord> = self
            .records
            .iter()
            .filter(|r| r.epoch == epoch && r.split == split)
            .collect();
        if records.is_empty() {
            return None;
        }

        #[allow(clippy::cast_precision_loss)]
        let n = records.len() as f64;
        let mean_of = |f: fn(&LossBreakdown) -> f64| records.iter().map(|r| f(&r.losses)).sum::<f64>() / n;
        let color = records
            .iter()
            .map(|r| r.losses.color)
            .sum::<Option<f64>>()
            .map(|sum| sum / n);

        Some(EpochSummary {
            epoch,
            split,
            steps: records.len(),
            mean: LossBreakdown {
                total: mean_of(|l| l.total),
                label: mean_of(|l| l.label),
                segmentation: mean_of(|l| l.segmentation),
                bbox: mean_of(|l| l.bbox),
                color,
            },
        })
    }

    /// Log the train and validation means of `epoch`.
    pub fn log_epoch_summary(&self, epoch: usize) {
        for split in [Split::Train, Split::Validation] {
            if let Some(summary) = self.epoch_summary(epoch, split) {
                let m = summary.mean;
                info!(
                    epoch,
                    split = %split,
                    steps = summary.steps,
                    total = m.total,
                    label = m.label,
                    segmentation = m.segmentation,
                    bbox = m.bbox,
                    color = ?m.color,
                    "epoch loss summary"
                );
            }
        }
    }

    /// Epoch-level soft-adapt weights for `epoch`.
    ///
    /// Rates are the change in the training-split means of label,
    /// segmentation and bbox from `epoch - 1` to `epoch`; the current means
    /// (bbox scaled by `config.bbox_scale`) feed the loss-weighted variant.
    /// Returns `None` when either epoch has no training records.
    ///
    /// # Errors
    ///
    /// Returns [`crate::LossError::NumericInstability`] for non-finite
    /// rates or weights.
    pub fn epoch_weights(&self, epoch: usize, config: &SoftAdaptConfig) -> Result<Option<[f64; 3]>> {
        let Some(previous) = epoch
            .checked_sub(1)
            .and_then(|prev| self.epoch_summary(prev, Split::Train))
        else {
            return Ok(None);
        };
        let Some(current) = self.epoch_summary(epoch, Split::Train) else {
            return Ok(None);
        };

        let prev = previous.mean;
        let curr = current.mean;
        let rates = [
            curr.label - prev.label,
            curr.segmentation - prev.segmentation,
            curr.bbox - prev.bbox,
        ];
        let losses = [curr.label, curr.segmentation, curr.bbox * config.bbox_scale];
        soft_adapt_weights(&rates, &losses, [true; 3], config).map(Some)
    }

    /// Clear all records.
    pub fn clear(&mut self) {
        self.records.clear();
        self.start_time = Instant::now();
        self.current_step = 0;
        self.epoch = 0;
    }

    /// Number of retained records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no records are retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Export records to JSON.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.records)?)
    }
}

#[allow(clippy::cast_precision_loss)]
fn compute_stats(values: &[f64]) -> LossStatistics {
    let count = values.len();
    let mean = values.iter().sum::<f64>() / count as f64;

    let variance = values
        .iter()
        .map(|&v| {
            let diff = v - mean;
            diff * diff
        })
        .sum::<f64>()
        / count as f64;

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let median = if count % 2 == 0 {
        (sorted[count / 2 - 1] + sorted[count / 2]) / 2.0
    } else {
        sorted[count / 2]
    };

    LossStatistics {
        count,
        mean,
        variance,
        std_dev: variance.sqrt(),
        min: sorted[0],
        max: sorted[count - 1],
        median,
    }
}
