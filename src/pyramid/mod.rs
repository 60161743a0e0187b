//! Per-level resolution analysis.
//!
//! Each candidate level is assumed to halve the resolution of the one before
//! it, so level `n` has an effective pixel size of `base × 2^n`. The pixel
//! size is never derived from the level's shape; instead
//! [`TiffSource::levels`](crate::tiff_io::TiffSource::levels) drops series
//! that do not follow the halving pattern, with a warning.

pub mod report;
pub mod select;

pub use report::{AnalysisReport, LevelRow};
pub use select::{select_level, RescaleDecision, SelectionReason, ACCEPTABLE_ERROR, TIE_WINDOW};

use crate::context::RunContext;
use crate::ome::{resolve_axes, AxisConfidence};
use crate::pixels::DType;
use crate::tiff_io::LevelSource;

/// One candidate resolution level and what reaching the target from it
/// would take.
#[derive(Clone, Debug, PartialEq)]
pub struct PyramidLevel {
    pub index: usize,
    /// Raw shape of the level as stored.
    pub shape: Vec<usize>,
    pub dtype: DType,
    /// Resolved axis label.
    pub axes: String,
    pub y_index: usize,
    pub x_index: usize,
    pub confidence: AxisConfidence,
    /// Assumed downsampling of this level relative to the base (`2^index`).
    pub scale_factor: u64,
    /// Pixel size of this level.
    pub effective_mpp: f64,
    /// Additional integer factor needed to approach the target; 0 when the
    /// target is finer than half this level's pixel size.
    pub integer_scale: u64,
    /// Pixel size after applying `integer_scale`.
    pub final_mpp: f64,
    /// Absolute difference between `final_mpp` and the target.
    pub scale_error: f64,
}

impl PyramidLevel {
    /// Compute the scale figures for a level with the given index.
    ///
    /// Axis fields are left as a low-confidence `YX` on the trailing axes;
    /// [`analyze_levels`] fills them in from the level's shape.
    pub fn from_scale(index: usize, base_mpp: f64, target_mpp: f64) -> Self {
        let scale_factor = 1u64.checked_shl(index as u32).unwrap_or(u64::MAX);
        let effective_mpp = base_mpp * scale_factor as f64;
        let ratio = target_mpp / effective_mpp;
        // Round half up; saturates for absurd ratios.
        let integer_scale = (ratio + 0.5).floor() as u64;
        let final_mpp = effective_mpp * integer_scale as f64;
        let scale_error = (final_mpp - target_mpp).abs();

        Self {
            index,
            shape: Vec::new(),
            dtype: DType::U8,
            axes: "YX".to_string(),
            y_index: 0,
            x_index: 1,
            confidence: AxisConfidence::LowConfidence,
            scale_factor,
            effective_mpp,
            integer_scale,
            final_mpp,
            scale_error,
        }
    }

    /// True when the level can be used as-is.
    pub fn needs_scaling(&self) -> bool {
        self.integer_scale != 1
    }

    /// True when no positive integer factor fits the target.
    pub fn is_degenerate(&self) -> bool {
        self.integer_scale == 0
    }
}

/// Analyze every candidate level against `target_mpp`.
pub fn analyze_levels(
    ctx: &RunContext,
    sources: &[LevelSource],
    base_mpp: f64,
    target_mpp: f64,
) -> Vec<PyramidLevel> {
    sources
        .iter()
        .map(|source| {
            let axes = resolve_axes(ctx, source.declared_axes.as_deref(), &source.shape);
            let level = PyramidLevel {
                shape: source.shape.clone(),
                dtype: source.series.info.dtype,
                axes: axes.label,
                y_index: axes.y_index,
                x_index: axes.x_index,
                confidence: axes.confidence,
                ..PyramidLevel::from_scale(source.index, base_mpp, target_mpp)
            };
            tracing::info!(
                parent: &ctx.span,
                level = level.index,
                shape = ?level.shape,
                axes = %level.axes,
                scale = level.scale_factor,
                effective_mpp = %format!("{:.4}", level.effective_mpp),
                int_scale_needed = level.integer_scale,
                final_mpp = %format!("{:.4}", level.final_mpp),
                "Analyzed level"
            );
            level
        })
        .collect()
}
