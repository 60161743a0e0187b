#![allow(dead_code)]

use ndarray::{ArrayD, IxDyn};
use omescale::pyramid::PyramidLevel;
use proptest::prelude::*;
use proptest::strategy::BoxedStrategy;
use proptest::test_runner::{Config as ProptestConfig, FileFailurePersistence};

pub fn proptest_config() -> ProptestConfig {
    let cases = std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(64);

    let mut config = ProptestConfig::with_failure_persistence(FileFailurePersistence::WithSource(
        "proptest-regressions",
    ));
    config.cases = cases;
    config.max_shrink_iters = 1024;
    config
}

/// A `C×H×W` array whose spatial sides are exact multiples of `factor`,
/// paired with that factor.
pub fn arb_blocked_u16() -> BoxedStrategy<(ArrayD<u16>, usize)> {
    (1usize..=3, 1usize..=4, 1usize..=4, 1usize..=4)
        .prop_flat_map(|(channels, blocks_y, blocks_x, factor)| {
            let shape = vec![channels, blocks_y * factor, blocks_x * factor];
            let len = shape.iter().product::<usize>();
            (
                proptest::collection::vec(any::<u16>(), len..=len),
                Just(shape),
                Just(factor),
            )
        })
        .prop_map(|(values, shape, factor)| {
            let array = ArrayD::from_shape_vec(IxDyn(&shape), values).expect("shape matches");
            (array, factor)
        })
        .boxed()
}

/// Like [`arb_blocked_u16`] for `f64` samples in a modest range.
pub fn arb_blocked_f64() -> BoxedStrategy<(ArrayD<f64>, usize)> {
    (1usize..=2, 1usize..=4, 1usize..=4, 1usize..=4)
        .prop_flat_map(|(channels, blocks_y, blocks_x, factor)| {
            let shape = vec![channels, blocks_y * factor, blocks_x * factor];
            let len = shape.iter().product::<usize>();
            (
                proptest::collection::vec(-1.0e6f64..1.0e6, len..=len),
                Just(shape),
                Just(factor),
            )
        })
        .prop_map(|(values, shape, factor)| {
            let array = ArrayD::from_shape_vec(IxDyn(&shape), values).expect("shape matches");
            (array, factor)
        })
        .boxed()
}

/// Level lists built from a base pixel size and target, as analysis would
/// produce them.
pub fn arb_levels() -> BoxedStrategy<(Vec<PyramidLevel>, f64, f64)> {
    (0.05f64..4.0, 0.1f64..8.0, 1usize..=6)
        .prop_map(|(base, target, count)| {
            let levels = (0..count)
                .map(|index| PyramidLevel::from_scale(index, base, target))
                .collect();
            (levels, base, target)
        })
        .boxed()
}

/// Mean of the `factor×factor` block at output position `(c, y, x)`.
pub fn block_mean<T: Copy + Into<f64>>(
    array: &ArrayD<T>,
    factor: usize,
    c: usize,
    y: usize,
    x: usize,
) -> f64 {
    let mut sum = 0.0;
    for dy in 0..factor {
        for dx in 0..factor {
            sum += Into::<f64>::into(array[[c, y * factor + dy, x * factor + dx]]);
        }
    }
    sum / (factor * factor) as f64
}
