//! Channel-first layout normalization before writing.

use ndarray::{Axis, IxDyn};

use super::{map_pixels, PixelData};
use crate::context::RunContext;
use crate::error::RescaleError;

/// Pixel data whose last two axes are Y and X.
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedLayout {
    pub data: PixelData,
    pub axes: String,
}

impl NormalizedLayout {
    /// Number of 2-D planes over the leading (non-spatial) axes.
    pub fn plane_count(&self) -> usize {
        let shape = self.data.shape();
        shape[..shape.len().saturating_sub(2)].iter().product()
    }
}

/// Bring `data` into a channel-first layout.
///
/// `YX` gains a leading channel axis of size 1, `YXC` moves the channel axis
/// to the front, and any other label with Y/X not in the trailing position
/// has them permuted to the end. The result is in standard (C) memory order.
pub fn normalize_layout(
    ctx: &RunContext,
    data: PixelData,
    axes: &str,
) -> Result<NormalizedLayout, RescaleError> {
    if axes.len() != data.ndim() {
        return Err(RescaleError::UnsupportedShape {
            shape: data.shape().to_vec(),
            message: format!("axis label '{axes}' does not match the array rank"),
        });
    }
    let (Some(y_index), Some(x_index)) = (axes.find('Y'), axes.find('X')) else {
        return Err(RescaleError::UnsupportedShape {
            shape: data.shape().to_vec(),
            message: format!("axis label '{axes}' has no Y/X pair"),
        });
    };

    if axes == "YX" {
        tracing::info!(parent: &ctx.span, "Adding channel dimension: YX -> CYX");
        let data = map_pixels!(data, arr => arr.insert_axis(Axis(0)).as_standard_layout().into_owned());
        return Ok(NormalizedLayout {
            data,
            axes: "CYX".to_string(),
        });
    }

    let ndim = axes.len();
    if y_index == ndim - 2 && x_index == ndim - 1 {
        let data = map_pixels!(data, arr => arr.as_standard_layout().into_owned());
        return Ok(NormalizedLayout {
            data,
            axes: axes.to_string(),
        });
    }

    let mut order: Vec<usize> = (0..ndim).filter(|&i| i != y_index && i != x_index).collect();
    order.push(y_index);
    order.push(x_index);
    let normalized: String = order
        .iter()
        .filter_map(|&i| axes.as_bytes().get(i).map(|&b| b as char))
        .collect();

    tracing::info!(
        parent: &ctx.span,
        from = axes,
        to = %normalized,
        "Transposing to channel-first layout"
    );
    let data = map_pixels!(data, arr => arr
        .permuted_axes(IxDyn(&order))
        .as_standard_layout()
        .into_owned());

    Ok(NormalizedLayout {
        data,
        axes: normalized,
    })
}
