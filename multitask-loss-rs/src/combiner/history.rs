//! Two-slot per-task loss history backing soft-adapt.

use serde::Serialize;

use crate::config::RateConvention;
use crate::task::Task;

/// Last two observed losses of the label, segmentation and bbox tasks.
///
/// Step `k` (1-based) writes slot `0` when `k` is odd and slot `1` when
/// `k` is even, so the slots alternate between "previous" and "current".
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LossHistory {
    slots: [[f64; 2]; 3],
}

impl LossHistory {
    /// Slot written at 1-based step `step`.
    #[must_use]
    pub const fn slot_for_step(step: u64) -> usize {
        if step % 2 == 0 {
            1
        } else {
            0
        }
    }

    /// Overwrite `slot` of every task row.
    pub fn write(&mut self, slot: usize, values: [f64; 3]) {
        for (row, value) in self.slots.iter_mut().zip(values) {
            row[slot] = value;
        }
    }

    /// Both slots of `task`'s row, or `None` for the untracked color task.
    #[must_use]
    pub fn row(&self, task: Task) -> Option<[f64; 2]> {
        Task::WEIGHTED
            .iter()
            .position(|&t| t == task)
            .map(|i| self.slots[i])
    }

    /// Per-task rate of change after `current_slot` was written.
    #[must_use]
    pub fn rate_of_change(&self, convention: RateConvention, current_slot: usize) -> [f64; 3] {
        let mut rates = [0.0; 3];
        for (rate, row) in rates.iter_mut().zip(&self.slots) {
            *rate = match convention {
                RateConvention::FixedSlot => row[1] - row[0],
                RateConvention::Chronological => row[current_slot] - row[1 - current_slot],
            };
        }
        rates
    }

    /// Zero both slots.
    pub fn clear(&mut self) {
        self.slots = [[0.0; 2]; 3];
    }
}
