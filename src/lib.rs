//! omescale: rescale OME-TIFF images to a target micron-per-pixel size.
//!
//! The rescaler picks the pyramid level closest to the requested physical
//! pixel size, downsamples it by an integer factor using block averaging,
//! and writes a tiled OME-TIFF whose embedded OME-XML matches the new
//! geometry, plus a JSON provenance sidecar.
//!
//! # Modules
//!
//! - [`ome`]: OME-XML descriptor extraction, axis resolution, and rewriting
//! - [`pyramid`]: per-level scale analysis and level selection
//! - [`pixels`]: in-memory pixel arrays, downsampling, layout normalization
//! - [`tiff_io`]: TIFF container reading and tiled TIFF/BigTIFF writing
//! - [`pipeline`]: the analyze and process runs
//! - [`error`]: Error types for omescale operations

pub mod context;
pub mod error;
pub mod ome;
pub mod pipeline;
pub mod pixels;
pub mod provenance;
pub mod pyramid;
pub mod tiff_io;

use std::path::PathBuf;

use clap::Parser;

pub use context::{init_tracing, RunContext, Verbosity};
pub use error::RescaleError;

/// The omescale CLI application.
#[derive(Parser)]
#[command(name = "omescale")]
#[command(version, author, about)]
struct Cli {
    /// Input OME-TIFF file.
    input: PathBuf,

    /// Output file prefix; the image is written to '<prefix>.downscaled.ome.tiff'.
    #[arg(long, env = "OMESCALE_PREFIX")]
    prefix: String,

    /// Target microns per pixel.
    #[arg(
        long,
        default_value_t = 1.0,
        env = "OMESCALE_TARGET_MPP",
        allow_negative_numbers = true
    )]
    target_mpp: f64,

    /// Only analyze the pyramid structure; write nothing.
    #[arg(long)]
    analyze_only: bool,

    /// Output format for the analysis report ('text' or 'json').
    #[arg(long, default_value = "text", value_parser = ["text", "json"])]
    output: String,

    /// Log debug details.
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Log warnings and errors only.
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    fn verbosity(&self) -> Verbosity {
        if self.verbose {
            Verbosity::Verbose
        } else if self.quiet {
            Verbosity::Quiet
        } else {
            Verbosity::Normal
        }
    }
}

/// Run the omescale CLI.
///
/// This is the main entry point for the CLI, called from `main.rs`.
pub fn run() -> Result<(), RescaleError> {
    let cli = Cli::parse();
    init_tracing(cli.verbosity());

    let ctx = RunContext::new(&cli.input);

    if cli.analyze_only {
        let report = pipeline::analyze(&ctx, &cli.input, cli.target_mpp)?.report();
        match cli.output.as_str() {
            "json" => {
                let json = serde_json::to_string_pretty(&report).map_err(RescaleError::ReportJson)?;
                println!("{json}");
            }
            _ => print!("{report}"),
        }
        return Ok(());
    }

    let output = pipeline::output_path(&cli.prefix);
    let outcome = pipeline::process(&ctx, &cli.input, &output, cli.target_mpp)?;
    println!(
        "Successfully created rescaled image: {}",
        outcome.output.display()
    );
    Ok(())
}
