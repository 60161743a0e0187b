//! In-memory pixel arrays.
//!
//! A decoded resolution level is held as an N-dimensional [`ndarray`] array
//! whose element type follows the file. [`PixelData`] wraps the supported
//! element types so the pipeline can stay generic over them.

pub mod downsample;
pub mod layout;

pub use downsample::downsample;
pub use layout::{normalize_layout, NormalizedLayout};

use std::fmt;

use ndarray::ArrayD;
use serde::Serialize;

/// Element type of a pixel array.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    U8,
    U16,
    U32,
    I8,
    I16,
    I32,
    F32,
    F64,
}

impl DType {
    /// Size of one element in bytes.
    pub fn size_bytes(self) -> usize {
        match self {
            DType::U8 | DType::I8 => 1,
            DType::U16 | DType::I16 => 2,
            DType::U32 | DType::I32 | DType::F32 => 4,
            DType::F64 => 8,
        }
    }

    pub fn is_unsigned(self) -> bool {
        matches!(self, DType::U8 | DType::U16 | DType::U32)
    }

    /// The OME-XML `Pixels/@Type` name.
    pub fn ome_type(self) -> &'static str {
        match self {
            DType::U8 => "uint8",
            DType::U16 => "uint16",
            DType::U32 => "uint32",
            DType::I8 => "int8",
            DType::I16 => "int16",
            DType::I32 => "int32",
            DType::F32 => "float",
            DType::F64 => "double",
        }
    }

    /// Map a TIFF BitsPerSample / SampleFormat pair.
    pub fn from_tiff(bits: u8, sample_format: u16) -> Option<Self> {
        match (sample_format, bits) {
            (1, 8) => Some(DType::U8),
            (1, 16) => Some(DType::U16),
            (1, 32) => Some(DType::U32),
            (2, 8) => Some(DType::I8),
            (2, 16) => Some(DType::I16),
            (2, 32) => Some(DType::I32),
            (3, 32) => Some(DType::F32),
            (3, 64) => Some(DType::F64),
            _ => None,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ome_type())
    }
}

/// A pixel array of one of the supported element types.
#[derive(Clone, Debug, PartialEq)]
pub enum PixelData {
    U8(ArrayD<u8>),
    U16(ArrayD<u16>),
    U32(ArrayD<u32>),
    I8(ArrayD<i8>),
    I16(ArrayD<i16>),
    I32(ArrayD<i32>),
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
}

/// Run `$body` with `$arr` bound to the inner array, whatever its type.
macro_rules! visit_pixels {
    ($data:expr, $arr:ident => $body:expr) => {
        match $data {
            PixelData::U8($arr) => $body,
            PixelData::U16($arr) => $body,
            PixelData::U32($arr) => $body,
            PixelData::I8($arr) => $body,
            PixelData::I16($arr) => $body,
            PixelData::I32($arr) => $body,
            PixelData::F32($arr) => $body,
            PixelData::F64($arr) => $body,
        }
    };
}

/// Like [`visit_pixels`], but re-wraps the result in the same variant.
macro_rules! map_pixels {
    ($data:expr, $arr:ident => $body:expr) => {
        match $data {
            PixelData::U8($arr) => PixelData::U8($body),
            PixelData::U16($arr) => PixelData::U16($body),
            PixelData::U32($arr) => PixelData::U32($body),
            PixelData::I8($arr) => PixelData::I8($body),
            PixelData::I16($arr) => PixelData::I16($body),
            PixelData::I32($arr) => PixelData::I32($body),
            PixelData::F32($arr) => PixelData::F32($body),
            PixelData::F64($arr) => PixelData::F64($body),
        }
    };
}

pub(crate) use map_pixels;
pub(crate) use visit_pixels;

impl PixelData {
    pub fn dtype(&self) -> DType {
        match self {
            PixelData::U8(_) => DType::U8,
            PixelData::U16(_) => DType::U16,
            PixelData::U32(_) => DType::U32,
            PixelData::I8(_) => DType::I8,
            PixelData::I16(_) => DType::I16,
            PixelData::I32(_) => DType::I32,
            PixelData::F32(_) => DType::F32,
            PixelData::F64(_) => DType::F64,
        }
    }

    pub fn shape(&self) -> &[usize] {
        visit_pixels!(self, arr => arr.shape())
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Uncompressed size of the pixel buffer.
    pub fn nbytes(&self) -> u64 {
        let elements: usize = self.shape().iter().product();
        (elements as u64) * (self.dtype().size_bytes() as u64)
    }
}
