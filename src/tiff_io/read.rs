//! TIFF input: page inventory, series grouping, and level decoding.
//!
//! The top-level IFD chain is split into series of consecutive pages with the
//! same geometry. Series 0 is the full-resolution image; following series
//! that shrink in both X and Y are treated as pre-computed pyramid levels.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use ndarray::{ArrayD, Dimension, IxDyn};
use serde::Deserialize;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;
use tiff::ColorType;

use crate::context::RunContext;
use crate::error::RescaleError;
use crate::ome::{declared_layout, ImageDescriptor};
use crate::pixels::{DType, PixelData};

/// Geometry and element type of one TIFF page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageInfo {
    pub width: u32,
    pub height: u32,
    pub samples: usize,
    pub dtype: DType,
}

/// A run of consecutive pages sharing one [`PageInfo`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Series {
    pub first_page: usize,
    pub page_count: usize,
    pub info: PageInfo,
}

/// One candidate resolution level as stored in the file.
#[derive(Clone, Debug, PartialEq)]
pub struct LevelSource {
    pub index: usize,
    pub series: Series,
    /// Array shape the level decodes to.
    pub shape: Vec<usize>,
    /// Axis label the file declares for this shape, if any.
    pub declared_axes: Option<String>,
}

/// An opened TIFF file: its descriptor text and page inventory.
#[derive(Clone, Debug)]
pub struct TiffSource {
    pub path: PathBuf,
    /// ImageDescription of the first page.
    pub description: Option<String>,
    pub pages: Vec<PageInfo>,
}

/// Shape/axes description written by tifffile-compatible writers.
#[derive(Debug, Deserialize)]
struct ShapedDescription {
    shape: Vec<usize>,
    #[serde(default)]
    axes: Option<String>,
}

fn open_decoder(path: &Path) -> Result<Decoder<BufReader<File>>, RescaleError> {
    let file = File::open(path).map_err(RescaleError::Io)?;
    Decoder::new(BufReader::new(file))
        .map(|decoder| decoder.with_limits(Limits::unlimited()))
        .map_err(|source| decode_error(path, source))
}

fn decode_error(path: &Path, source: tiff::TiffError) -> RescaleError {
    RescaleError::TiffDecode {
        path: path.to_path_buf(),
        source,
    }
}

fn layout_error(path: &Path, message: impl Into<String>) -> RescaleError {
    RescaleError::TiffLayout {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

/// Open `path` and inventory every page in the main IFD chain.
pub fn open_tiff(path: &Path) -> Result<TiffSource, RescaleError> {
    let mut decoder = open_decoder(path)?;

    let description = decoder
        .find_tag(Tag::ImageDescription)
        .map_err(|source| decode_error(path, source))?
        .map(|value| value.into_string())
        .transpose()
        .map_err(|source| decode_error(path, source))?;

    let mut pages = Vec::new();
    loop {
        pages.push(page_info(&mut decoder, path)?);
        if !decoder.more_images() {
            break;
        }
        decoder
            .next_image()
            .map_err(|source| decode_error(path, source))?;
    }

    Ok(TiffSource {
        path: path.to_path_buf(),
        description,
        pages,
    })
}

fn page_info(
    decoder: &mut Decoder<BufReader<File>>,
    path: &Path,
) -> Result<PageInfo, RescaleError> {
    let (width, height) = decoder
        .dimensions()
        .map_err(|source| decode_error(path, source))?;
    let (samples, bits) = match decoder
        .colortype()
        .map_err(|source| decode_error(path, source))?
    {
        ColorType::Gray(bits) => (1, bits),
        ColorType::GrayA(bits) => (2, bits),
        ColorType::RGB(bits) => (3, bits),
        ColorType::RGBA(bits) | ColorType::CMYK(bits) => (4, bits),
        other => {
            return Err(layout_error(
                path,
                format!("unsupported color type {other:?}"),
            ))
        }
    };
    let sample_format = decoder
        .find_tag_unsigned_vec::<u16>(Tag::SampleFormat)
        .map_err(|source| decode_error(path, source))?
        .and_then(|formats| formats.first().copied())
        .unwrap_or(1);
    let dtype = DType::from_tiff(bits, sample_format).ok_or_else(|| {
        layout_error(
            path,
            format!("unsupported sample type: {bits} bits, SampleFormat {sample_format}"),
        )
    })?;

    Ok(PageInfo {
        width,
        height,
        samples,
        dtype,
    })
}

/// Group consecutive pages with identical geometry into series.
pub fn group_series(pages: &[PageInfo]) -> Vec<Series> {
    let mut series: Vec<Series> = Vec::new();
    for (idx, page) in pages.iter().enumerate() {
        match series.last_mut() {
            Some(current) if current.info == *page => current.page_count += 1,
            _ => series.push(Series {
                first_page: idx,
                page_count: 1,
                info: *page,
            }),
        }
    }
    series
}

impl TiffSource {
    /// Candidate resolution levels, base first.
    ///
    /// After the base series, each following series counts as a level only
    /// while it keeps the page count, is strictly smaller in both X and Y
    /// than the level before it, and is `2^index` times smaller than the
    /// base. Level pixel sizes are derived from the index alone, so the
    /// scan stops at the first series that breaks the halving pattern.
    pub fn levels(&self, ctx: &RunContext, descriptor: &ImageDescriptor) -> Vec<LevelSource> {
        let series = group_series(&self.pages);
        let Some(base) = series.first().copied() else {
            return Vec::new();
        };

        let mut chosen = vec![base];
        for candidate in series.iter().skip(1) {
            let previous = chosen[chosen.len() - 1];
            let shrinks = candidate.info.width < previous.info.width
                && candidate.info.height < previous.info.height;
            if !shrinks || candidate.page_count != base.page_count {
                break;
            }
            if !halves_from(&base.info, &candidate.info, chosen.len()) {
                tracing::warn!(
                    parent: &ctx.span,
                    level = chosen.len(),
                    base = ?(base.info.width, base.info.height),
                    found = ?(candidate.info.width, candidate.info.height),
                    "Series is not a power-of-two reduction of the base; ignoring it and any coarser levels"
                );
                break;
            }
            chosen.push(*candidate);
        }

        let declared = self.declared_base_layout(descriptor, &base);

        chosen
            .into_iter()
            .enumerate()
            .map(|(index, series)| {
                let (shape, declared_axes) = match &declared {
                    Some((label, shape)) => {
                        let mut shape = shape.clone();
                        if let (Some(y), Some(x)) = (label.find('Y'), label.find('X')) {
                            shape[y] = series.info.height as usize;
                            shape[x] = series.info.width as usize;
                        }
                        (shape, Some(label.clone()))
                    }
                    None => (raw_shape(&series), None),
                };
                LevelSource {
                    index,
                    series,
                    shape,
                    declared_axes,
                }
            })
            .collect()
    }

    /// Declared label and shape for the base series, when the file states
    /// one that agrees with the pages actually present.
    fn declared_base_layout(
        &self,
        descriptor: &ImageDescriptor,
        base: &Series,
    ) -> Option<(String, Vec<usize>)> {
        let total: usize = raw_shape(base).iter().product();

        if let Some(order) = descriptor.dimension_order.as_deref() {
            if let Some((label, shape)) = declared_layout(order, &descriptor.sizes, base.info.samples)
            {
                let fits = shape.iter().product::<usize>() == total
                    && label
                        .find('Y')
                        .is_some_and(|y| shape[y] == base.info.height as usize)
                    && label
                        .find('X')
                        .is_some_and(|x| shape[x] == base.info.width as usize);
                if fits {
                    return Some((label, shape));
                }
            }
        }

        let shaped: ShapedDescription =
            serde_json::from_str(self.description.as_deref()?.trim()).ok()?;
        let axes = shaped.axes?;
        (axes.len() == shaped.shape.len() && shaped.shape.iter().product::<usize>() == total)
            .then_some((axes, shaped.shape))
    }
}

/// True when `level` is the base reduced by `2^index` in both X and Y,
/// allowing one pixel of slack for floor or ceil rounding at each step.
fn halves_from(base: &PageInfo, level: &PageInfo, index: usize) -> bool {
    let Some(step) = 1u64.checked_shl(index as u32) else {
        return false;
    };
    let step = step as f64;
    let near = |full: u32, reduced: u32| (f64::from(full) / step - f64::from(reduced)).abs() <= 1.0;
    near(base.width, level.width) && near(base.height, level.height)
}

/// Shape of a series when nothing is declared: `(pages, H, W, S)` with
/// single pages and single samples squeezed.
pub fn raw_shape(series: &Series) -> Vec<usize> {
    let mut shape = Vec::with_capacity(4);
    if series.page_count > 1 {
        shape.push(series.page_count);
    }
    shape.push(series.info.height as usize);
    shape.push(series.info.width as usize);
    if series.info.samples > 1 {
        shape.push(series.info.samples);
    }
    shape
}

/// Decode every page of `level` into one array of `level.shape`.
pub fn read_level(path: &Path, level: &LevelSource) -> Result<PixelData, RescaleError> {
    let mut decoder = open_decoder(path)?;
    let mut planes = Vec::with_capacity(level.series.page_count);
    for page in 0..level.series.page_count {
        decoder
            .seek_to_image(level.series.first_page + page)
            .map_err(|source| decode_error(path, source))?;
        planes.push(
            decoder
                .read_image()
                .map_err(|source| decode_error(path, source))?,
        );
    }

    let shape = IxDyn(&level.shape);
    let mismatch = || layout_error(path, "pages decoded to an unexpected sample type");
    let data = match level.series.info.dtype {
        DType::U8 => PixelData::U8(to_array(
            path,
            shape,
            concat(planes, |plane| match plane {
                DecodingResult::U8(values) => Some(values),
                _ => None,
            })
            .ok_or_else(mismatch)?,
        )?),
        DType::U16 => PixelData::U16(to_array(
            path,
            shape,
            concat(planes, |plane| match plane {
                DecodingResult::U16(values) => Some(values),
                _ => None,
            })
            .ok_or_else(mismatch)?,
        )?),
        DType::U32 => PixelData::U32(to_array(
            path,
            shape,
            concat(planes, |plane| match plane {
                DecodingResult::U32(values) => Some(values),
                _ => None,
            })
            .ok_or_else(mismatch)?,
        )?),
        DType::I8 => PixelData::I8(to_array(
            path,
            shape,
            concat(planes, |plane| match plane {
                DecodingResult::I8(values) => Some(values),
                _ => None,
            })
            .ok_or_else(mismatch)?,
        )?),
        DType::I16 => PixelData::I16(to_array(
            path,
            shape,
            concat(planes, |plane| match plane {
                DecodingResult::I16(values) => Some(values),
                _ => None,
            })
            .ok_or_else(mismatch)?,
        )?),
        DType::I32 => PixelData::I32(to_array(
            path,
            shape,
            concat(planes, |plane| match plane {
                DecodingResult::I32(values) => Some(values),
                _ => None,
            })
            .ok_or_else(mismatch)?,
        )?),
        DType::F32 => PixelData::F32(to_array(
            path,
            shape,
            concat(planes, |plane| match plane {
                DecodingResult::F32(values) => Some(values),
                _ => None,
            })
            .ok_or_else(mismatch)?,
        )?),
        DType::F64 => PixelData::F64(to_array(
            path,
            shape,
            concat(planes, |plane| match plane {
                DecodingResult::F64(values) => Some(values),
                _ => None,
            })
            .ok_or_else(mismatch)?,
        )?),
    };

    Ok(data)
}

fn concat<T>(
    planes: Vec<DecodingResult>,
    pick: impl Fn(DecodingResult) -> Option<Vec<T>>,
) -> Option<Vec<T>> {
    let mut out = Vec::new();
    for plane in planes {
        out.extend(pick(plane)?);
    }
    Some(out)
}

fn to_array<T>(path: &Path, shape: IxDyn, values: Vec<T>) -> Result<ArrayD<T>, RescaleError> {
    let expected = shape.size();
    let actual = values.len();
    ArrayD::from_shape_vec(shape, values).map_err(|_| {
        layout_error(
            path,
            format!("decoded {actual} samples, expected {expected} for the level shape"),
        )
    })
}
