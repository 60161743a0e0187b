//! Axis role inference.
//!
//! Declared labels come from the file; when they are absent or lack a Y/X
//! pair the roles are guessed from the shape using an ordered rule table.

use crate::context::RunContext;

use super::AxisSizes;

/// Axis letters the rescaler understands; anything else becomes `C`.
const KNOWN_AXES: [char; 5] = ['T', 'C', 'Z', 'Y', 'X'];

/// How an axis assignment was obtained.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisConfidence {
    /// Taken from the declared label.
    Declared,
    /// Inferred from the shape by a fallback rule.
    Inferred,
    /// No rule matched; trailing two axes assumed to be Y and X.
    LowConfidence,
}

/// Resolved axis label plus the positions of the spatial axes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedAxes {
    pub label: String,
    pub y_index: usize,
    pub x_index: usize,
    pub confidence: AxisConfidence,
}

/// One row of the shape-based fallback table.
struct FallbackRule {
    ndim: usize,
    /// Allowed sizes of the last dimension; empty means any.
    last_dim_in: &'static [usize],
    label: &'static str,
    y_index: usize,
    x_index: usize,
}

impl FallbackRule {
    fn matches(&self, shape: &[usize]) -> bool {
        if shape.len() != self.ndim {
            return false;
        }
        self.last_dim_in.is_empty()
            || shape
                .last()
                .is_some_and(|last| self.last_dim_in.contains(last))
    }
}

/// Ordered fallback rules; the first match wins.
const FALLBACK_RULES: &[FallbackRule] = &[
    FallbackRule {
        ndim: 2,
        last_dim_in: &[],
        label: "YX",
        y_index: 0,
        x_index: 1,
    },
    FallbackRule {
        ndim: 3,
        last_dim_in: &[3, 4],
        label: "YXC",
        y_index: 0,
        x_index: 1,
    },
    FallbackRule {
        ndim: 3,
        last_dim_in: &[],
        label: "ZYX",
        y_index: 1,
        x_index: 2,
    },
    FallbackRule {
        ndim: 4,
        last_dim_in: &[],
        label: "CZYX",
        y_index: 2,
        x_index: 3,
    },
    FallbackRule {
        ndim: 5,
        last_dim_in: &[],
        label: "TCZYX",
        y_index: 3,
        x_index: 4,
    },
];

/// Upper-cases a declared label and maps unknown letters to `C`.
///
/// Sample (`S`), index (`I`), or vendor-specific axes are non-spatial and
/// are treated as channels.
pub fn coerce_axes(declared: &str) -> String {
    declared
        .chars()
        .map(|c| {
            let upper = c.to_ascii_uppercase();
            if KNOWN_AXES.contains(&upper) {
                upper
            } else {
                'C'
            }
        })
        .collect()
}

/// Resolve axis roles for a raw `shape`.
///
/// A declared label is used when, after coercion, it has one letter per
/// dimension and contains both `Y` and `X`. Otherwise the fallback table
/// decides; unsupported dimensionalities get a low-confidence `YX` on the
/// trailing axes.
pub fn resolve_axes(ctx: &RunContext, declared: Option<&str>, shape: &[usize]) -> ResolvedAxes {
    if let Some(declared) = declared.filter(|d| !d.is_empty()) {
        let label = coerce_axes(declared);
        match (label.find('Y'), label.find('X')) {
            (Some(y_index), Some(x_index)) if label.len() == shape.len() => {
                tracing::info!(parent: &ctx.span, axes = %label, "Using declared axes");
                return ResolvedAxes {
                    label,
                    y_index,
                    x_index,
                    confidence: AxisConfidence::Declared,
                };
            }
            _ => {
                tracing::warn!(
                    parent: &ctx.span,
                    declared,
                    ?shape,
                    "Declared axes missing Y or X or not matching the shape; falling back to heuristic"
                );
            }
        }
    }

    if let Some(rule) = FALLBACK_RULES.iter().find(|rule| rule.matches(shape)) {
        return ResolvedAxes {
            label: rule.label.to_string(),
            y_index: rule.y_index,
            x_index: rule.x_index,
            confidence: AxisConfidence::Inferred,
        };
    }

    tracing::warn!(parent: &ctx.span, ?shape, "Unexpected image dimensions");
    let ndim = shape.len();
    ResolvedAxes {
        label: "YX".to_string(),
        y_index: ndim.saturating_sub(2),
        x_index: ndim.saturating_sub(1),
        confidence: AxisConfidence::LowConfidence,
    }
}

/// Derive the declared label and shape of an OME series.
///
/// OME `DimensionOrder` lists axes fastest first (`XYCZT`), so the in-memory
/// order is its reverse. Non-spatial axes of size 1 are dropped, and a
/// trailing `S` axis is added for interleaved multi-sample pages. Returns
/// `None` if the order is not a permutation of `XYZCT` or X/Y sizes are
/// unknown.
pub fn declared_layout(
    dimension_order: &str,
    sizes: &AxisSizes,
    samples_per_pixel: usize,
) -> Option<(String, Vec<usize>)> {
    let order = dimension_order.trim().to_ascii_uppercase();
    if order.len() != 5 || !"XYZCT".chars().all(|axis| order.contains(axis)) {
        return None;
    }

    sizes.x?;
    sizes.y?;

    let mut label = String::new();
    let mut shape = Vec::new();
    for axis in order.chars().rev() {
        let mut size = sizes.get(axis).unwrap_or(1);
        if axis == 'C' && samples_per_pixel > 1 {
            size = if size >= samples_per_pixel && size % samples_per_pixel == 0 {
                size / samples_per_pixel
            } else {
                1
            };
        }
        if matches!(axis, 'Y' | 'X') || size > 1 {
            label.push(axis);
            shape.push(size);
        }
    }

    if samples_per_pixel > 1 {
        label.push('S');
        shape.push(samples_per_pixel);
    }

    Some((label, shape))
}
