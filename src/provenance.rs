//! Provenance sidecar written next to each output image.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::RescaleError;

/// How an output image was derived from its input.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub original_file: String,
    pub original_physical_size_x: f64,
    pub original_physical_size_y: f64,
    pub pyramid_level_used: usize,
    pub pyramid_scale_factor: u64,
    pub integer_scale_applied: u64,
    pub final_physical_size_x: f64,
    pub final_physical_size_y: f64,
    pub target_micron_per_pixel: f64,
    pub output_shape: Vec<usize>,
    pub output_axes: String,
    pub original_axes: String,
    pub channel_names: Vec<String>,
}

/// Sidecar location for an output image: the image path with its last
/// extension replaced by `json`.
pub fn sidecar_path(output: &Path) -> PathBuf {
    output.with_extension("json")
}

/// Writes the record as pretty-printed JSON.
///
/// # Errors
/// Returns an error if the file cannot be created or serialized.
pub fn write_provenance(path: &Path, record: &ProvenanceRecord) -> Result<(), RescaleError> {
    let file = File::create(path).map_err(RescaleError::Io)?;
    let writer = BufWriter::new(file);

    serde_json::to_writer_pretty(writer, record).map_err(|source| RescaleError::ProvenanceWrite {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads a record back, e.g. to inspect an earlier run.
pub fn read_provenance(path: &Path) -> Result<ProvenanceRecord, RescaleError> {
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(|source| RescaleError::ProvenanceRead {
        path: path.to_path_buf(),
        source,
    })
}
