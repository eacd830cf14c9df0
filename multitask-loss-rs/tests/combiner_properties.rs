//! Behavioral properties of the three combiners on scalar losses.

use candle_core::Device;
use multitask_loss_rs::{
    soft_adapt_weights, BaseLosses, GeometricCombiner, GeometricConfig, RateConvention,
    SoftAdaptCombiner, SoftAdaptConfig, StaticWeightedCombiner, StaticWeights, TaskFlags,
};

fn scalars(label: f64, segmentation: f64, bbox: f64, color: Option<f64>) -> BaseLosses {
    BaseLosses::from_scalars(label, segmentation, bbox, color, &Device::Cpu).unwrap()
}

fn soft_adapt(convention: RateConvention) -> SoftAdaptCombiner {
    SoftAdaptCombiner::new(
        SoftAdaptConfig::default().with_rate_convention(convention),
        TaskFlags::default(),
    )
    .unwrap()
}

#[test]
fn test_warm_weights_sum_to_one() {
    let mut combiner = soft_adapt(RateConvention::FixedSlot);
    let label = [3.0, 2.5, 2.7, 1.9, 1.2, 1.3, 0.9, 0.4];
    let segmentation = [1.0, 1.1, 0.7, 0.8, 0.6, 0.2, 0.25, 0.2];

    for (step, (l, s)) in label.iter().zip(segmentation).enumerate() {
        let bbox = 500.0 - 40.0 * step as f64;
        combiner.combine_losses(&scalars(*l, s, bbox, None)).unwrap();
        if combiner.step() > 3 {
            let sum: f64 = combiner.weights().iter().sum();
            assert!((sum - 1.0).abs() < 1e-6, "step {step}: sum {sum}");
        }
    }
}

#[test]
fn test_cold_start_is_uniform_regardless_of_losses() {
    for (a, b) in [((1.0, 1.0, 1.0), (1.0, 1.0, 1.0)), ((1e3, 1e-4, 7.0), (0.0, 5e2, 1e5))] {
        let mut combiner = soft_adapt(RateConvention::FixedSlot);
        combiner.combine_losses(&scalars(a.0, a.1, a.2, None)).unwrap();
        assert_eq!(combiner.rates(), [0.0; 3]);
        for alpha in combiner.weights() {
            assert!((alpha - 1.0 / 3.0).abs() < 1e-7);
        }

        combiner.combine_losses(&scalars(b.0, b.1, b.2, None)).unwrap();
        assert_eq!(combiner.rates(), [0.0; 3]);
        for alpha in combiner.weights() {
            assert!((alpha - 1.0 / 3.0).abs() < 1e-7);
        }
        assert!(combiner.is_warm());
    }
}

#[test]
fn test_fastest_improving_task_gets_most_weight() {
    let alpha = soft_adapt_weights(
        &[-5.0, -1.0, 0.0],
        &[1.0; 3],
        [true; 3],
        &SoftAdaptConfig::default().with_beta(0.01),
    )
    .unwrap();
    assert!(alpha[0] > alpha[1]);
    assert!(alpha[0] > alpha[2]);
    assert!(alpha[1] > alpha[2]);
}

#[test]
fn test_static_disabled_task_is_zeroed() {
    let flags = TaskFlags::default().with_bbox(false);
    let combiner = StaticWeightedCombiner::new(StaticWeights::default(), flags);

    for bbox in [0.0, 1.0, 1e9, f64::NAN] {
        let breakdown = combiner
            .combine_losses(&scalars(2.0, 0.1, bbox, Some(0.5)))
            .unwrap()
            .breakdown()
            .unwrap();
        assert_eq!(breakdown.bbox, 0.0);
        assert!((breakdown.total - 4.5).abs() < 1e-9);
    }
}

#[test]
fn test_geometric_scale_invariance() {
    let combiner = GeometricCombiner::new(GeometricConfig::default(), TaskFlags::default());
    let base = combiner
        .combine_losses(&scalars(0.7, 0.3, 120.0, None))
        .unwrap()
        .total_value()
        .unwrap();

    for k in [0.01, 2.0, 1000.0] {
        let scaled = combiner
            .combine_losses(&scalars(0.7, 0.3 * k, 120.0, None))
            .unwrap()
            .total_value()
            .unwrap();
        let expected = base * k.powf(1.0 / 3.0);
        assert!(
            (scaled - expected).abs() < 1e-9 * expected.max(1.0),
            "k={k}: {scaled} vs {expected}"
        );
    }
}

#[test]
fn test_static_exact_arithmetic() {
    let combiner = StaticWeightedCombiner::new(StaticWeights::default(), TaskFlags::default());
    let total = combiner
        .combine_losses(&scalars(2.0, 0.1, 1000.0, Some(0.5)))
        .unwrap()
        .total_value()
        .unwrap();
    assert!((total - 4.64).abs() < 1e-9);
}

#[test]
fn test_history_parity_fixed_slot() {
    let mut combiner = soft_adapt(RateConvention::FixedSlot);
    let mut rates = Vec::new();
    for label in [10.0, 8.0, 6.0, 4.0] {
        combiner.combine_losses(&scalars(label, 1.0, 1.0, None)).unwrap();
        rates.push(combiner.rates()[0]);
    }
    // call 3 writes slot 0 (6) and reads slot1 - slot0 = 8 - 6
    // call 4 writes slot 1 (4) and reads 4 - 6
    assert_eq!(rates, vec![0.0, 0.0, 2.0, -2.0]);
    assert_eq!(combiner.history().row(multitask_loss_rs::Task::Label), Some([6.0, 4.0]));
}

#[test]
fn test_history_parity_chronological() {
    let mut combiner = soft_adapt(RateConvention::Chronological);
    let mut rates = Vec::new();
    for label in [10.0, 8.0, 6.0, 4.0] {
        combiner.combine_losses(&scalars(label, 1.0, 1.0, None)).unwrap();
        rates.push(combiner.rates()[0]);
    }
    assert_eq!(rates, vec![0.0, 0.0, -2.0, -2.0]);
    assert_eq!(combiner.rates()[1], 0.0);
}

#[test]
fn test_combiner_instances_are_independent() {
    let mut first = soft_adapt(RateConvention::FixedSlot);
    let mut second = soft_adapt(RateConvention::FixedSlot);
    for label in [5.0, 4.0, 3.0] {
        first.combine_losses(&scalars(label, 1.0, 1.0, None)).unwrap();
    }
    second.combine_losses(&scalars(1.0, 1.0, 1.0, None)).unwrap();
    assert_eq!(second.step(), 2);
    assert_eq!(first.step(), 4);
    assert_eq!(second.rates(), [0.0; 3]);
}
