//! Integer-factor block averaging along the two spatial axes.

use ndarray::{ArrayD, IxDyn, Zip};

use super::PixelData;
use crate::context::RunContext;
use crate::error::RescaleError;

/// Downsample `data` by `factor` along the Y and X axes.
///
/// Y and X are cropped to the largest multiple of `factor` (the remainder is
/// dropped from the high end), then each `factor`×`factor` block is replaced
/// by its mean. Other axes are left untouched. Unsigned integer input is
/// rounded to the nearest integer (ties to even) and keeps its width; `f32`
/// stays `f32`; everything else becomes `f64`.
pub fn downsample(
    ctx: &RunContext,
    data: PixelData,
    factor: usize,
    y_index: usize,
    x_index: usize,
) -> Result<PixelData, RescaleError> {
    if factor == 0 {
        return Err(RescaleError::InvalidArgument(
            "downsampling factor must be at least 1".to_string(),
        ));
    }
    if factor == 1 {
        return Ok(data);
    }

    let shape = data.shape().to_vec();
    if y_index == x_index || y_index >= shape.len() || x_index >= shape.len() {
        return Err(RescaleError::UnsupportedShape {
            shape,
            message: format!("invalid spatial axes Y={y_index}, X={x_index}"),
        });
    }
    if shape[y_index] < factor || shape[x_index] < factor {
        return Err(RescaleError::UnsupportedShape {
            shape,
            message: format!("spatial axes are smaller than the downsampling factor {factor}"),
        });
    }

    tracing::info!(
        parent: &ctx.span,
        factor,
        y = y_index,
        x = x_index,
        "Downsampling with block averaging"
    );

    let out = match data {
        PixelData::U8(arr) => PixelData::U8(
            block_mean(&arr, factor, y_index, x_index).mapv(|m| m.round_ties_even() as u8),
        ),
        PixelData::U16(arr) => PixelData::U16(
            block_mean(&arr, factor, y_index, x_index).mapv(|m| m.round_ties_even() as u16),
        ),
        PixelData::U32(arr) => PixelData::U32(
            block_mean(&arr, factor, y_index, x_index).mapv(|m| m.round_ties_even() as u32),
        ),
        PixelData::F32(arr) => {
            PixelData::F32(block_mean(&arr, factor, y_index, x_index).mapv(|m| m as f32))
        }
        PixelData::I8(arr) => PixelData::F64(block_mean(&arr, factor, y_index, x_index)),
        PixelData::I16(arr) => PixelData::F64(block_mean(&arr, factor, y_index, x_index)),
        PixelData::I32(arr) => PixelData::F64(block_mean(&arr, factor, y_index, x_index)),
        PixelData::F64(arr) => PixelData::F64(block_mean(&arr, factor, y_index, x_index)),
    };

    tracing::info!(parent: &ctx.span, shape = ?out.shape(), dtype = %out.dtype(), "Downsampled");
    Ok(out)
}

/// Mean of every `factor`×`factor` block over the (Y, X) axes.
///
/// `exact_chunks` skips trailing partial blocks, which is the high-end crop.
fn block_mean<T>(array: &ArrayD<T>, factor: usize, y_index: usize, x_index: usize) -> ArrayD<f64>
where
    T: Copy + Into<f64>,
{
    let mut block = vec![1; array.ndim()];
    block[y_index] = factor;
    block[x_index] = factor;
    let area = (factor * factor) as f64;

    Zip::from(array.exact_chunks(IxDyn(&block)))
        .map_collect(|chunk| chunk.iter().map(|&value| Into::<f64>::into(value)).sum::<f64>() / area)
}
