//! TIFF container input and output.

pub mod read;
pub mod write;

pub use read::{group_series, open_tiff, raw_shape, read_level, LevelSource, PageInfo, Series, TiffSource};
pub use write::{needs_bigtiff, write_ome_tiff, TiffSample, TiffWriter, BIGTIFF_THRESHOLD, DEFLATE_LEVEL, TILE_SIZE};
