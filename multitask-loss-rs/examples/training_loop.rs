//! Multi-task training loop driven by a configurable loss combiner.
//!
//! A small four-headed model (label, segmentation, bbox, color) is trained
//! on synthetic data. The combination strategy is picked by preset name.
//!
//! Run with:
//! ```bash
//! cargo run --example training_loop -- soft-adapt
//! RUST_LOG=multitask_loss_rs=debug cargo run --example training_loop -- geometric
//! ```

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{linear, Linear, Optimizer, VarBuilder, VarMap, SGD};
use multitask_loss_rs::{CombinerConfig, LossTracker, Result, Split, TaskTensors};
use tracing::info;

const BATCH: usize = 8;
const FEATURES: usize = 16;
const CLASSES: usize = 3;
const SIDE: usize = 8;
const EPOCHS: usize = 4;
const STEPS_PER_EPOCH: usize = 10;

struct MultiHeadModel {
    label: Linear,
    segmentation: Linear,
    bbox: Linear,
    color: Linear,
}

impl MultiHeadModel {
    fn new(vb: &VarBuilder) -> Result<Self> {
        Ok(Self {
            label: linear(FEATURES, CLASSES, vb.pp("label"))?,
            segmentation: linear(FEATURES, CLASSES * SIDE * SIDE, vb.pp("segmentation"))?,
            bbox: linear(FEATURES, 4, vb.pp("bbox"))?,
            color: linear(FEATURES, 2 * SIDE * SIDE, vb.pp("color"))?,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<TaskTensors> {
        let n = x.dim(0)?;
        let segmentation = self
            .segmentation
            .forward(x)?
            .reshape((n, CLASSES, SIDE, SIDE))?;
        let color = self.color.forward(x)?.reshape((n, 2, SIDE, SIDE))?;
        Ok(TaskTensors::new(self.label.forward(x)?, segmentation, self.bbox.forward(x)?)
            .with_color(color))
    }
}

struct Batch {
    inputs: Tensor,
    targets: TaskTensors,
}

fn synthetic_batch(device: &Device) -> Result<Batch> {
    let inputs = Tensor::randn(0f32, 1.0, (BATCH, FEATURES), device)?;
    let labels: Vec<u32> = (0..BATCH as u32).map(|i| i % CLASSES as u32).collect();
    let labels = Tensor::new(labels.as_slice(), device)?;
    let segmentation = Tensor::zeros((BATCH, SIDE, SIDE), DType::U32, device)?;
    // pixel-space boxes dominate the raw loss scale
    let bboxes = Tensor::rand(0f32, 200.0, (BATCH, 4), device)?;
    let color = Tensor::rand(-1f32, 1.0, (BATCH, 2, SIDE, SIDE), device)?;

    Ok(Batch {
        inputs,
        targets: TaskTensors::new(labels, segmentation, bboxes).with_color(color),
    })
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let preset = std::env::args().nth(1).unwrap_or_else(|| "soft-adapt".into());
    let device = Device::Cpu;

    let mut combiner = CombinerConfig::from_preset(&preset)?.build()?;
    info!(strategy = combiner.name(), "starting training");

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let model = MultiHeadModel::new(&vb)?;
    let mut optimizer = SGD::new(varmap.all_vars(), 1e-3)?;
    let mut tracker = LossTracker::new(10_000);

    let train = synthetic_batch(&device)?;
    let validation = synthetic_batch(&device)?;

    for epoch in 0..EPOCHS {
        combiner.begin_epoch();
        tracker.start_epoch(epoch);

        for _ in 0..STEPS_PER_EPOCH {
            let outputs = model.forward(&train.inputs)?;
            let combined = combiner.combine(&outputs, &train.targets)?;
            // backward_step clears the previous gradients itself
            optimizer.backward_step(&combined.total)?;
            tracker.record(Split::Train, combined.breakdown()?);
        }

        let outputs = model.forward(&validation.inputs)?;
        let combined = combiner.combine(&outputs, &validation.targets)?;
        tracker.record(Split::Validation, combined.breakdown()?);

        if let Some(summary) = tracker.epoch_summary(epoch, Split::Train) {
            info!(epoch, mean_total = summary.mean.total, "epoch finished");
        }
    }
    tracker.log_epoch_summary(EPOCHS - 1);

    println!("{}", tracker.to_json()?);
    Ok(())
}
