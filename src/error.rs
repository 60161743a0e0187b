use std::path::PathBuf;
use thiserror::Error;

/// The main error type for omescale operations.
#[derive(Debug, Error)]
pub enum RescaleError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to decode TIFF {path}: {source}")]
    TiffDecode {
        path: PathBuf,
        #[source]
        source: tiff::TiffError,
    },

    #[error("Unsupported TIFF layout in {path}: {message}")]
    TiffLayout { path: PathBuf, message: String },

    #[error("Failed to write TIFF to {path}: {message}")]
    TiffWrite { path: PathBuf, message: String },

    #[error("Cannot extract PhysicalSizeX from OME metadata in {path}")]
    MissingPhysicalSize { path: PathBuf },

    #[error("No usable pyramid level in {path}: {message}")]
    NoUsableLevel { path: PathBuf, message: String },

    #[error("Unsupported image shape {shape:?}: {message}")]
    UnsupportedShape { shape: Vec<usize>, message: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to write provenance JSON to {path}: {source}")]
    ProvenanceWrite {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to parse provenance JSON from {path}: {source}")]
    ProvenanceRead {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to render analysis report as JSON: {0}")]
    ReportJson(#[source] serde_json::Error),
}
