//! End-to-end analyze and rescale runs.
//!
//! [`analyze`] reads only the descriptor and page inventory; [`process`]
//! additionally decodes the chosen level, downsamples it, and writes the
//! output image plus its provenance sidecar.

use std::path::{Path, PathBuf};

use crate::context::RunContext;
use crate::error::RescaleError;
use crate::ome::{extract_descriptor, rewrite_descriptor, ImageDescriptor, PhysicalSize, RewriteRequest};
use crate::pixels::{downsample, normalize_layout};
use crate::provenance::{sidecar_path, write_provenance, ProvenanceRecord};
use crate::pyramid::{analyze_levels, select_level, AnalysisReport, LevelRow, PyramidLevel, RescaleDecision};
use crate::tiff_io::{open_tiff, read_level, write_ome_tiff, LevelSource, TiffSource};

/// Everything derived from the input before any pixels are read.
#[derive(Clone, Debug)]
pub struct Analysis {
    pub source: TiffSource,
    pub descriptor: ImageDescriptor,
    pub physical_size: PhysicalSize,
    pub target_mpp: f64,
    pub level_sources: Vec<LevelSource>,
    pub levels: Vec<PyramidLevel>,
    pub decision: RescaleDecision,
}

impl Analysis {
    /// The level the decision points at.
    pub fn selected(&self) -> (&PyramidLevel, &LevelSource) {
        let idx = self.decision.level;
        (&self.levels[idx], &self.level_sources[idx])
    }

    pub fn report(&self) -> AnalysisReport {
        AnalysisReport {
            input: self.source.path.display().to_string(),
            physical_size_x: self.physical_size.x,
            physical_size_y: self.physical_size.y,
            target_mpp: self.target_mpp,
            channel_names: self.descriptor.channel_names.clone(),
            levels: self.levels.iter().map(LevelRow::from).collect(),
            optimal_level: self.decision.level,
            decision: self.decision,
        }
    }
}

/// Paths and record produced by a successful [`process`] run.
#[derive(Clone, Debug)]
pub struct RescaleOutcome {
    pub output: PathBuf,
    pub sidecar: PathBuf,
    pub record: ProvenanceRecord,
}

/// Output image path for a prefix: `<prefix>.downscaled.ome.tiff`.
pub fn output_path(prefix: &str) -> PathBuf {
    PathBuf::from(format!("{prefix}.downscaled.ome.tiff"))
}

fn validate_target(target_mpp: f64) -> Result<(), RescaleError> {
    if target_mpp.is_finite() && target_mpp > 0.0 {
        Ok(())
    } else {
        Err(RescaleError::InvalidArgument(format!(
            "target micron-per-pixel must be positive and finite, got {target_mpp}"
        )))
    }
}

/// Inspect the input and choose a level, without reading pixel data.
///
/// # Errors
/// Fails if the target is not a positive finite number, the TIFF cannot be
/// read, the descriptor has no usable physical size, or no level fits.
pub fn analyze(ctx: &RunContext, input: &Path, target_mpp: f64) -> Result<Analysis, RescaleError> {
    validate_target(target_mpp)?;
    tracing::info!(parent: &ctx.span, "Analyzing {}", input.display());

    let source = open_tiff(input)?;
    let descriptor = extract_descriptor(ctx, source.description.as_deref());

    let physical_size = descriptor
        .physical_size
        .as_found()
        .cloned()
        .ok_or_else(|| RescaleError::MissingPhysicalSize {
            path: input.to_path_buf(),
        })?;
    tracing::info!(parent: &ctx.span, "Base PhysicalSizeX: {} µm/pixel", physical_size.x);

    let level_sources = source.levels(ctx, &descriptor);
    let levels = analyze_levels(ctx, &level_sources, physical_size.x, target_mpp);
    let decision = select_level(ctx, &levels)?;

    Ok(Analysis {
        source,
        descriptor,
        physical_size,
        target_mpp,
        level_sources,
        levels,
        decision,
    })
}

/// Rescale `input` to `target_mpp` and write the result to `output`.
///
/// The provenance sidecar is written next to `output`.
pub fn process(
    ctx: &RunContext,
    input: &Path,
    output: &Path,
    target_mpp: f64,
) -> Result<RescaleOutcome, RescaleError> {
    let analysis = analyze(ctx, input, target_mpp)?;
    let (level, level_source) = analysis.selected();
    let factor = usize::try_from(analysis.decision.factor).map_err(|_| {
        RescaleError::InvalidArgument(format!(
            "integer scale {} is too large for this platform",
            analysis.decision.factor
        ))
    })?;

    tracing::info!(parent: &ctx.span, level = level.index, "Extracting level");
    let data = read_level(input, level_source)?;
    tracing::info!(parent: &ctx.span, shape = ?data.shape(), dtype = %data.dtype(), "Extracted");

    let data = if factor == 1 {
        tracing::info!(parent: &ctx.span, "No rescaling needed (scale factor = 1)");
        data
    } else {
        tracing::info!(parent: &ctx.span, factor, "Downsampling by integer factor");
        downsample(ctx, data, factor, level.y_index, level.x_index)?
    };

    let final_mpp = level.final_mpp;
    tracing::info!(parent: &ctx.span, "Final PhysicalSize: {final_mpp:.4} µm/pixel");

    let normalized = normalize_layout(ctx, data, &level.axes)?;
    tracing::info!(
        parent: &ctx.span,
        shape = ?normalized.data.shape(),
        axes = %normalized.axes,
        "Final shape after normalization"
    );

    let shape = normalized.data.shape().to_vec();
    let request = RewriteRequest {
        shape: &shape,
        axes: &normalized.axes,
        physical_size: final_mpp,
        channel_names: &analysis.descriptor.channel_names,
        pixel_type: Some(normalized.data.dtype().ome_type()),
        plane_count: normalized.plane_count(),
    };
    let description = rewrite_descriptor(ctx, analysis.source.description.as_deref(), &request)
        .unwrap_or_else(|| shaped_description(&shape, &normalized.axes));

    write_ome_tiff(ctx, output, &normalized, Some(&description))?;

    let record = ProvenanceRecord {
        original_file: input.display().to_string(),
        original_physical_size_x: analysis.physical_size.x,
        original_physical_size_y: analysis.physical_size.y,
        pyramid_level_used: level.index,
        pyramid_scale_factor: level.scale_factor,
        integer_scale_applied: level.integer_scale,
        final_physical_size_x: final_mpp,
        final_physical_size_y: final_mpp,
        target_micron_per_pixel: target_mpp,
        output_shape: shape,
        output_axes: normalized.axes.clone(),
        original_axes: level.axes.clone(),
        channel_names: analysis.descriptor.channel_names.clone(),
    };
    let sidecar = sidecar_path(output);
    write_provenance(&sidecar, &record)?;
    tracing::info!(parent: &ctx.span, path = %sidecar.display(), "Metadata saved");
    tracing::info!(parent: &ctx.span, "Processing complete");

    Ok(RescaleOutcome {
        output: output.to_path_buf(),
        sidecar,
        record,
    })
}

/// Minimal shape/axes description used when there is no OME-XML to carry.
fn shaped_description(shape: &[usize], axes: &str) -> String {
    serde_json::json!({ "shape": shape, "axes": axes }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_path_appends_suffix() {
        assert_eq!(
            output_path("out/run1"),
            PathBuf::from("out/run1.downscaled.ome.tiff")
        );
    }

    #[test]
    fn target_must_be_positive_and_finite() {
        assert!(validate_target(1.0).is_ok());
        assert!(validate_target(0.0).is_err());
        assert!(validate_target(-2.0).is_err());
        assert!(validate_target(f64::NAN).is_err());
        assert!(validate_target(f64::INFINITY).is_err());
    }

    #[test]
    fn shaped_description_is_json() {
        let text = shaped_description(&[1, 4, 5], "CYX");
        let value: serde_json::Value = serde_json::from_str(&text).expect("json");
        assert_eq!(value["axes"], "CYX");
        assert_eq!(value["shape"][2], 5);
    }

    #[test]
    fn analyze_rejects_bad_target_before_touching_the_file() {
        let ctx = RunContext::detached(Path::new("does-not-exist.tiff"));
        let err = analyze(&ctx, Path::new("does-not-exist.tiff"), -1.0).unwrap_err();
        assert!(matches!(err, RescaleError::InvalidArgument(_)));
    }
}
