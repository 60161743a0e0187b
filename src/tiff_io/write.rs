//! Tiled, Deflate-compressed TIFF/BigTIFF output.
//!
//! The `tiff` crate's encoder only writes strips, so tiles are laid out
//! here directly: tile payloads first, then the IFD that points at them.
//! Every 2-D plane over the leading axes becomes one IFD in the main chain.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use ndarray::ArrayD;

use crate::context::RunContext;
use crate::error::RescaleError;
use crate::pixels::{visit_pixels, NormalizedLayout, PixelData};

/// Tile edge length in pixels.
pub const TILE_SIZE: usize = 256;
/// zlib compression level for tile payloads.
pub const DEFLATE_LEVEL: u32 = 6;
/// Uncompressed size above which BigTIFF is used.
pub const BIGTIFF_THRESHOLD: u64 = 3_758_096_384;

const SOFTWARE: &str = concat!("omescale ", env!("CARGO_PKG_VERSION"));

mod tag {
    pub const NEW_SUBFILE_TYPE: u16 = 254;
    pub const IMAGE_WIDTH: u16 = 256;
    pub const IMAGE_LENGTH: u16 = 257;
    pub const BITS_PER_SAMPLE: u16 = 258;
    pub const COMPRESSION: u16 = 259;
    pub const PHOTOMETRIC: u16 = 262;
    pub const IMAGE_DESCRIPTION: u16 = 270;
    pub const SAMPLES_PER_PIXEL: u16 = 277;
    pub const PLANAR_CONFIGURATION: u16 = 284;
    pub const SOFTWARE: u16 = 305;
    pub const TILE_WIDTH: u16 = 322;
    pub const TILE_LENGTH: u16 = 323;
    pub const TILE_OFFSETS: u16 = 324;
    pub const TILE_BYTE_COUNTS: u16 = 325;
    pub const SAMPLE_FORMAT: u16 = 339;
}

const COMPRESSION_ADOBE_DEFLATE: u16 = 8;
const PHOTOMETRIC_MIN_IS_BLACK: u16 = 1;

/// Element types that can be stored as TIFF samples.
pub trait TiffSample: Copy {
    const BITS: u16;
    /// TIFF SampleFormat: 1 unsigned, 2 signed, 3 IEEE float.
    const FORMAT: u16;
    fn put_le(self, out: &mut Vec<u8>);
}

macro_rules! tiff_sample {
    ($($ty:ty => $bits:expr, $format:expr;)*) => {
        $(
            impl TiffSample for $ty {
                const BITS: u16 = $bits;
                const FORMAT: u16 = $format;
                fn put_le(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

tiff_sample! {
    u8 => 8, 1;
    u16 => 16, 1;
    u32 => 32, 1;
    i8 => 8, 2;
    i16 => 16, 2;
    i32 => 32, 2;
    f32 => 32, 3;
    f64 => 64, 3;
}

#[derive(Debug)]
enum TagValue {
    Short(Vec<u16>),
    Long(Vec<u32>),
    Long8(Vec<u64>),
    Ascii(String),
}

impl TagValue {
    fn field_type(&self) -> u16 {
        match self {
            TagValue::Ascii(_) => 2,
            TagValue::Short(_) => 3,
            TagValue::Long(_) => 4,
            TagValue::Long8(_) => 16,
        }
    }

    fn count(&self) -> u64 {
        match self {
            TagValue::Short(values) => values.len() as u64,
            TagValue::Long(values) => values.len() as u64,
            TagValue::Long8(values) => values.len() as u64,
            TagValue::Ascii(text) => text.len() as u64 + 1,
        }
    }

    fn bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            TagValue::Short(values) => values.iter().for_each(|v| out.extend(v.to_le_bytes())),
            TagValue::Long(values) => values.iter().for_each(|v| out.extend(v.to_le_bytes())),
            TagValue::Long8(values) => values.iter().for_each(|v| out.extend(v.to_le_bytes())),
            TagValue::Ascii(text) => {
                out.extend_from_slice(text.as_bytes());
                out.push(0);
            }
        }
        out
    }
}

/// Streams images into a single TIFF file, one IFD per plane.
pub struct TiffWriter<W: Write + Seek> {
    inner: W,
    bigtiff: bool,
    /// File offset of the previous IFD's next-IFD pointer.
    next_pointer_at: u64,
    ifd_count: usize,
}

impl<W: Write + Seek> TiffWriter<W> {
    /// Write the file header.
    pub fn new(mut inner: W, bigtiff: bool) -> std::io::Result<Self> {
        inner.seek(SeekFrom::Start(0))?;
        let next_pointer_at = if bigtiff {
            inner.write_all(b"II")?;
            inner.write_all(&43u16.to_le_bytes())?;
            inner.write_all(&8u16.to_le_bytes())?;
            inner.write_all(&0u16.to_le_bytes())?;
            inner.write_all(&0u64.to_le_bytes())?;
            8
        } else {
            inner.write_all(b"II")?;
            inner.write_all(&42u16.to_le_bytes())?;
            inner.write_all(&0u32.to_le_bytes())?;
            4
        };
        Ok(Self {
            inner,
            bigtiff,
            next_pointer_at,
            ifd_count: 0,
        })
    }

    /// Number of IFDs written so far.
    pub fn ifd_count(&self) -> usize {
        self.ifd_count
    }

    /// Append every Y/X plane of `data` (Y and X must be the last two axes).
    ///
    /// `description` is stored on the first plane of this image only.
    pub fn append_image(
        &mut self,
        data: &PixelData,
        description: Option<&str>,
    ) -> std::io::Result<()> {
        visit_pixels!(data, arr => self.append_array(arr, description))
    }

    fn append_array<T: TiffSample>(
        &mut self,
        array: &ArrayD<T>,
        description: Option<&str>,
    ) -> std::io::Result<()> {
        let shape = array.shape();
        if shape.len() < 2 {
            return Err(invalid_input(format!(
                "cannot write an array of shape {shape:?} as image planes"
            )));
        }
        let height = shape[shape.len() - 2];
        let width = shape[shape.len() - 1];
        let plane_len = height * width;

        let standard = array.as_standard_layout();
        let values = standard
            .as_slice()
            .ok_or_else(|| invalid_input("pixel buffer is not contiguous".to_string()))?;

        if plane_len == 0 {
            return Err(invalid_input(format!("empty image plane in shape {shape:?}")));
        }
        for (plane_index, plane) in values.chunks_exact(plane_len).enumerate() {
            let description = if plane_index == 0 { description } else { None };
            self.append_plane(plane, width, height, description)?;
        }
        Ok(())
    }

    fn append_plane<T: TiffSample>(
        &mut self,
        plane: &[T],
        width: usize,
        height: usize,
        description: Option<&str>,
    ) -> std::io::Result<()> {
        let sample_bytes = (T::BITS / 8) as usize;
        let tiles_across = width.div_ceil(TILE_SIZE);
        let tiles_down = height.div_ceil(TILE_SIZE);

        let mut offsets = Vec::with_capacity(tiles_across * tiles_down);
        let mut byte_counts = Vec::with_capacity(tiles_across * tiles_down);
        let mut tile = Vec::with_capacity(TILE_SIZE * TILE_SIZE * sample_bytes);

        for tile_row in 0..tiles_down {
            for tile_col in 0..tiles_across {
                tile.clear();
                let x0 = tile_col * TILE_SIZE;
                let columns = TILE_SIZE.min(width - x0);
                for row in 0..TILE_SIZE {
                    let y = tile_row * TILE_SIZE + row;
                    if y < height {
                        let start = y * width + x0;
                        for &value in &plane[start..start + columns] {
                            value.put_le(&mut tile);
                        }
                        tile.resize(tile.len() + (TILE_SIZE - columns) * sample_bytes, 0);
                    } else {
                        tile.resize(tile.len() + TILE_SIZE * sample_bytes, 0);
                    }
                }

                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(DEFLATE_LEVEL));
                encoder.write_all(&tile)?;
                let compressed = encoder.finish()?;

                offsets.push(self.inner.stream_position()?);
                byte_counts.push(compressed.len() as u64);
                self.inner.write_all(&compressed)?;
            }
        }

        let mut entries = vec![
            (tag::NEW_SUBFILE_TYPE, TagValue::Long(vec![0])),
            (tag::IMAGE_WIDTH, TagValue::Long(vec![to_u32(width)?])),
            (tag::IMAGE_LENGTH, TagValue::Long(vec![to_u32(height)?])),
            (tag::BITS_PER_SAMPLE, TagValue::Short(vec![T::BITS])),
            (tag::COMPRESSION, TagValue::Short(vec![COMPRESSION_ADOBE_DEFLATE])),
            (tag::PHOTOMETRIC, TagValue::Short(vec![PHOTOMETRIC_MIN_IS_BLACK])),
            (tag::SAMPLES_PER_PIXEL, TagValue::Short(vec![1])),
            (tag::PLANAR_CONFIGURATION, TagValue::Short(vec![1])),
            (tag::SOFTWARE, TagValue::Ascii(SOFTWARE.to_string())),
            (tag::TILE_WIDTH, TagValue::Short(vec![TILE_SIZE as u16])),
            (tag::TILE_LENGTH, TagValue::Short(vec![TILE_SIZE as u16])),
            (tag::SAMPLE_FORMAT, TagValue::Short(vec![T::FORMAT])),
        ];
        if let Some(text) = description {
            entries.push((tag::IMAGE_DESCRIPTION, TagValue::Ascii(text.to_string())));
        }
        if self.bigtiff {
            entries.push((tag::TILE_OFFSETS, TagValue::Long8(offsets)));
            entries.push((tag::TILE_BYTE_COUNTS, TagValue::Long8(byte_counts)));
        } else {
            let offsets: Vec<u32> = offsets.into_iter().map(to_u32).collect::<Result<_, _>>()?;
            let byte_counts: Vec<u32> = byte_counts.into_iter().map(to_u32).collect::<Result<_, _>>()?;
            entries.push((tag::TILE_OFFSETS, TagValue::Long(offsets)));
            entries.push((tag::TILE_BYTE_COUNTS, TagValue::Long(byte_counts)));
        }
        entries.sort_by_key(|(tag, _)| *tag);

        self.write_ifd(&entries)
    }

    fn write_ifd(&mut self, entries: &[(u16, TagValue)]) -> std::io::Result<()> {
        let mut ifd_offset = self.inner.seek(SeekFrom::End(0))?;
        if ifd_offset % 2 == 1 {
            self.inner.write_all(&[0])?;
            ifd_offset += 1;
        }

        let (count_size, entry_size, pointer_size) = if self.bigtiff {
            (8u64, 20u64, 8u64)
        } else {
            (2, 12, 4)
        };
        let inline_limit = pointer_size as usize;
        let table_len = count_size + entry_size * entries.len() as u64 + pointer_size;
        let mut overflow_at = ifd_offset + table_len;

        let mut table = Vec::with_capacity(table_len as usize);
        let mut overflow = Vec::new();
        if self.bigtiff {
            table.extend((entries.len() as u64).to_le_bytes());
        } else {
            table.extend((entries.len() as u16).to_le_bytes());
        }

        for (tag, value) in entries {
            table.extend(tag.to_le_bytes());
            table.extend(value.field_type().to_le_bytes());
            if self.bigtiff {
                table.extend(value.count().to_le_bytes());
            } else {
                table.extend(to_u32(value.count())?.to_le_bytes());
            }

            let mut bytes = value.bytes();
            if bytes.len() <= inline_limit {
                bytes.resize(inline_limit, 0);
                table.extend(bytes);
            } else {
                if self.bigtiff {
                    table.extend(overflow_at.to_le_bytes());
                } else {
                    table.extend(to_u32(overflow_at)?.to_le_bytes());
                }
                if bytes.len() % 2 == 1 {
                    bytes.push(0);
                }
                overflow_at += bytes.len() as u64;
                overflow.extend(bytes);
            }
        }
        // Next-IFD pointer; patched when another IFD follows.
        let pointer_at = ifd_offset + table.len() as u64;
        table.resize(table.len() + pointer_size as usize, 0);

        self.inner.write_all(&table)?;
        self.inner.write_all(&overflow)?;

        self.inner.seek(SeekFrom::Start(self.next_pointer_at))?;
        if self.bigtiff {
            self.inner.write_all(&ifd_offset.to_le_bytes())?;
        } else {
            self.inner.write_all(&to_u32(ifd_offset)?.to_le_bytes())?;
        }
        self.inner.seek(SeekFrom::End(0))?;

        self.next_pointer_at = pointer_at;
        self.ifd_count += 1;
        Ok(())
    }

    /// Flush and return the underlying writer.
    pub fn finish(mut self) -> std::io::Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

fn to_u32<T>(value: T) -> std::io::Result<u32>
where
    T: TryInto<u32> + Copy + std::fmt::Display,
{
    value
        .try_into()
        .map_err(|_| invalid_input(format!("{value} does not fit a classic TIFF field; use BigTIFF")))
}

fn invalid_input(message: String) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidInput, message)
}

/// Whether `nbytes` of uncompressed pixel data calls for BigTIFF offsets.
pub fn needs_bigtiff(nbytes: u64) -> bool {
    nbytes > BIGTIFF_THRESHOLD
}

/// Write `layout` as a tiled OME-TIFF at `path`.
///
/// BigTIFF is chosen when the uncompressed pixel data exceeds
/// [`BIGTIFF_THRESHOLD`].
pub fn write_ome_tiff(
    ctx: &RunContext,
    path: &Path,
    layout: &NormalizedLayout,
    description: Option<&str>,
) -> Result<(), RescaleError> {
    let nbytes = layout.data.nbytes();
    let bigtiff = needs_bigtiff(nbytes);
    tracing::info!(
        parent: &ctx.span,
        size_gib = %format!("{:.2}", nbytes as f64 / (1u64 << 30) as f64),
        bigtiff,
        "Output size"
    );
    tracing::info!(
        parent: &ctx.span,
        path = %path.display(),
        shape = ?layout.data.shape(),
        axes = %layout.axes,
        "Saving OME-TIFF"
    );

    let write_error = |source: std::io::Error| RescaleError::TiffWrite {
        path: path.to_path_buf(),
        message: source.to_string(),
    };

    let file = File::create(path)?;
    let mut writer = TiffWriter::new(BufWriter::new(file), bigtiff).map_err(write_error)?;
    writer
        .append_image(&layout.data, description)
        .map_err(write_error)?;
    tracing::debug!(parent: &ctx.span, ifds = writer.ifd_count(), "Wrote image planes");
    writer.finish().map_err(write_error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use ndarray::{Dimension, IxDyn};
    use tiff::decoder::{Decoder, DecodingResult};
    use tiff::tags::Tag;

    fn gradient(shape: &[usize]) -> ArrayD<u16> {
        ArrayD::from_shape_fn(IxDyn(shape), |idx| {
            let n = idx.ndim();
            (idx[n - 2] * 3 + idx[n - 1] + if n > 2 { idx[0] * 1000 } else { 0 }) as u16
        })
    }

    fn encode(data: &PixelData, description: Option<&str>, bigtiff: bool) -> Vec<u8> {
        let mut writer = TiffWriter::new(Cursor::new(Vec::new()), bigtiff).expect("header");
        writer.append_image(data, description).expect("append");
        writer.finish().expect("finish").into_inner()
    }

    #[test]
    fn classic_header_and_planes_decode() {
        // 300 wide forces a padded second tile column.
        let data = PixelData::U16(gradient(&[2, 20, 300]));
        let bytes = encode(&data, Some("<OME/>"), false);
        assert_eq!(&bytes[..4], b"II\x2a\x00");

        let mut decoder = Decoder::new(Cursor::new(bytes)).expect("decoder");
        assert_eq!(decoder.dimensions().expect("dims"), (300, 20));
        let description = decoder
            .find_tag(Tag::ImageDescription)
            .expect("tag")
            .map(|v| v.into_string().expect("ascii"));
        assert_eq!(description.as_deref(), Some("<OME/>"));

        match decoder.read_image().expect("plane 0") {
            DecodingResult::U16(values) => {
                assert_eq!(values.len(), 20 * 300);
                assert_eq!(values[299], 299);
                assert_eq!(values[300], 3);
            }
            _ => panic!("unexpected sample type"),
        }

        assert!(decoder.more_images());
        decoder.next_image().expect("plane 1");
        assert!(decoder
            .find_tag(Tag::ImageDescription)
            .expect("tag")
            .is_none());
        match decoder.read_image().expect("plane 1") {
            DecodingResult::U16(values) => assert_eq!(values[0], 1000),
            _ => panic!("unexpected sample type"),
        }
        assert!(!decoder.more_images());
    }

    #[test]
    fn bigtiff_header_is_written_when_requested() {
        let data = PixelData::F32(ArrayD::from_elem(IxDyn(&[8, 8]), 1.5f32));
        let bytes = encode(&data, None, true);
        assert_eq!(&bytes[..4], b"II\x2b\x00");

        let mut decoder = Decoder::new(Cursor::new(bytes)).expect("decoder");
        match decoder.read_image().expect("plane") {
            DecodingResult::F32(values) => assert!(values.iter().all(|&v| v == 1.5)),
            _ => panic!("unexpected sample type"),
        }
    }

    #[test]
    fn signed_samples_keep_their_format() {
        let data = PixelData::I16(ArrayD::from_elem(IxDyn(&[1, 4, 4]), -7i16));
        let bytes = encode(&data, None, false);
        let mut decoder = Decoder::new(Cursor::new(bytes)).expect("decoder");
        match decoder.read_image().expect("plane") {
            DecodingResult::I16(values) => assert!(values.iter().all(|&v| v == -7)),
            _ => panic!("unexpected sample type"),
        }
    }

    #[test]
    fn bigtiff_only_above_three_and_a_half_gib() {
        assert!(!needs_bigtiff(0));
        assert!(!needs_bigtiff(3 * (1 << 30)));
        assert!(!needs_bigtiff(BIGTIFF_THRESHOLD));
        assert!(needs_bigtiff(BIGTIFF_THRESHOLD + 1));
        assert!(needs_bigtiff(5 * (1 << 30)));
        assert_eq!(BIGTIFF_THRESHOLD, 7 * (1 << 29));
    }

    #[test]
    fn scalar_arrays_are_rejected() {
        let data = PixelData::U8(ArrayD::zeros(IxDyn(&[5])));
        let mut writer = TiffWriter::new(Cursor::new(Vec::new()), false).expect("header");
        assert!(writer.append_image(&data, None).is_err());
    }

    #[test]
    fn write_ome_tiff_creates_a_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.ome.tiff");
        let layout = NormalizedLayout {
            data: PixelData::U8(ArrayD::zeros(IxDyn(&[1, 10, 10]))),
            axes: "CYX".to_string(),
        };
        let ctx = RunContext::detached(&path);
        write_ome_tiff(&ctx, &path, &layout, Some("<OME/>")).expect("write");
        assert!(path.metadata().expect("metadata").len() > 8);
    }
}
