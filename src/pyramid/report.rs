//! Analysis report for `--analyze-only`.

use std::fmt;

use serde::Serialize;

use super::select::RescaleDecision;
use super::PyramidLevel;
use crate::ome::rewrite::format_float;
use crate::ome::AxisConfidence;
use crate::pixels::DType;

/// Per-level analysis and the chosen level.
#[derive(Clone, Debug, Serialize)]
pub struct AnalysisReport {
    pub input: String,
    pub physical_size_x: f64,
    pub physical_size_y: f64,
    pub target_mpp: f64,
    pub channel_names: Vec<String>,
    pub levels: Vec<LevelRow>,
    pub optimal_level: usize,
    pub decision: RescaleDecision,
}

/// One level as shown in the report.
#[derive(Clone, Debug, Serialize)]
pub struct LevelRow {
    pub level: usize,
    pub shape: Vec<usize>,
    pub dtype: DType,
    pub axes: String,
    /// How the axis label was obtained; `low_confidence` means no rule
    /// matched the shape.
    pub axis_confidence: AxisConfidence,
    pub scale_factor: u64,
    pub effective_mpp: f64,
    pub integer_scale: u64,
    pub final_mpp: f64,
    pub scale_error: f64,
}

impl From<&PyramidLevel> for LevelRow {
    fn from(level: &PyramidLevel) -> Self {
        Self {
            level: level.index,
            shape: level.shape.clone(),
            dtype: level.dtype,
            axes: level.axes.clone(),
            axis_confidence: level.confidence,
            scale_factor: level.scale_factor,
            effective_mpp: level.effective_mpp,
            integer_scale: level.integer_scale,
            final_mpp: level.final_mpp,
            scale_error: level.scale_error,
        }
    }
}

impl fmt::Display for AnalysisReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f)?;
        writeln!(f, "Pyramid Analysis for {}:", self.input)?;
        writeln!(
            f,
            "Base PhysicalSizeX: {} µm/pixel",
            format_float(self.physical_size_x)
        )?;
        writeln!(f, "Target: {} µm/pixel", format_float(self.target_mpp))?;
        writeln!(f)?;
        writeln!(f, "Levels:")?;
        for row in &self.levels {
            writeln!(f, "  Level {}:", row.level)?;
            write!(f, "    Shape: {}, Axes: {}", format_shape(&row.shape), row.axes)?;
            if row.axis_confidence == AxisConfidence::LowConfidence {
                write!(f, " (low confidence)")?;
            }
            writeln!(f)?;
            writeln!(f, "    Effective MPP: {:.4}", row.effective_mpp)?;
            writeln!(f, "    Integer scale needed: {}", row.integer_scale)?;
            writeln!(f, "    Final MPP: {:.4}", row.final_mpp)?;
        }
        writeln!(f)?;
        writeln!(f, "Optimal level: {}", self.optimal_level)?;
        Ok(())
    }
}

fn format_shape(shape: &[usize]) -> String {
    match shape {
        [single] => format!("({single},)"),
        _ => {
            let dims: Vec<String> = shape.iter().map(ToString::to_string).collect();
            format!("({})", dims.join(", "))
        }
    }
}
