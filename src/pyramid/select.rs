//! Greedy choice of the pyramid level to rescale from.

use serde::Serialize;

use super::PyramidLevel;
use crate::context::RunContext;
use crate::error::RescaleError;

/// Largest error (in target units) accepted for an early exit.
pub const ACCEPTABLE_ERROR: f64 = 0.15;
/// Errors closer than this are treated as equivalent.
pub const TIE_WINDOW: f64 = 0.1;

/// Why a level was chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionReason {
    /// The first level that needs no scaling and is within tolerance.
    WithinTolerance,
    /// The running best after scanning every level.
    BestCandidate,
}

/// The level to read and the integer factor to downsample it by.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct RescaleDecision {
    pub level: usize,
    pub factor: u64,
    pub error: f64,
    pub reason: SelectionReason,
}

impl RescaleDecision {
    fn from_level(level: &PyramidLevel, reason: SelectionReason) -> Self {
        Self {
            level: level.index,
            factor: level.integer_scale,
            error: level.scale_error,
            reason,
        }
    }
}

/// Pick a level in one left-to-right pass over `levels`.
///
/// Degenerate levels are skipped. The first level that needs no extra
/// scaling and is within [`ACCEPTABLE_ERROR`] wins immediately. Otherwise a
/// running best is kept: a candidate replaces it when its error is lower by
/// more than [`TIE_WINDOW`], or when the errors are within the window and
/// the candidate either avoids scaling the best needs, or is in the same
/// scaling class with a higher index.
///
/// Fails with [`RescaleError::NoUsableLevel`] when every level is
/// degenerate.
pub fn select_level(
    ctx: &RunContext,
    levels: &[PyramidLevel],
) -> Result<RescaleDecision, RescaleError> {
    let mut best: Option<&PyramidLevel> = None;

    for level in levels {
        if level.is_degenerate() {
            tracing::debug!(parent: &ctx.span, level = level.index, "Skipping degenerate level");
            continue;
        }

        if level.scale_error <= ACCEPTABLE_ERROR && !level.needs_scaling() {
            tracing::info!(
                parent: &ctx.span,
                level = level.index,
                error = %format!("{:.4}", level.scale_error),
                threshold = ACCEPTABLE_ERROR,
                "Level needs no scaling and error is within threshold"
            );
            return Ok(RescaleDecision::from_level(
                level,
                SelectionReason::WithinTolerance,
            ));
        }

        let replaces = match best {
            None => true,
            Some(current) => beats(level, current),
        };
        if replaces {
            best = Some(level);
        }
    }

    let Some(best) = best else {
        return Err(RescaleError::NoUsableLevel {
            path: ctx.source.clone(),
            message: format!(
                "all {} level(s) need an integer scale of 0 for this target",
                levels.len()
            ),
        });
    };

    tracing::info!(
        parent: &ctx.span,
        level = best.index,
        scaling = if best.needs_scaling() { "scaling required" } else { "no scaling needed" },
        error = %format!("{:.4}", best.scale_error),
        "Selected level"
    );
    Ok(RescaleDecision::from_level(
        best,
        SelectionReason::BestCandidate,
    ))
}

fn beats(candidate: &PyramidLevel, current: &PyramidLevel) -> bool {
    if candidate.scale_error < current.scale_error - TIE_WINDOW {
        return true;
    }
    if (candidate.scale_error - current.scale_error).abs() < TIE_WINDOW {
        if !candidate.needs_scaling() && current.needs_scaling() {
            return true;
        }
        if candidate.needs_scaling() == current.needs_scaling() {
            return candidate.index > current.index;
        }
    }
    false
}
