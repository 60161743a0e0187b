//! Per-run logging context.
//!
//! Every pipeline component takes a `&RunContext` and emits its events under
//! the context's span, so log lines from one run share the input path without
//! any global logger state.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use tracing::Span;
use tracing_subscriber::EnvFilter;

/// Context threaded through each step of a single rescaling run.
#[derive(Clone, Debug)]
pub struct RunContext {
    /// The input file this run operates on.
    pub source: PathBuf,
    /// Span that parents every event emitted for this run.
    pub span: Span,
}

impl RunContext {
    /// Creates a context whose span is tagged with the input path.
    pub fn new(source: &Path) -> Self {
        let span = tracing::info_span!("rescale", source = %source.display());
        Self {
            source: source.to_path_buf(),
            span,
        }
    }

    /// A context with a disabled span, for tests and library callers that
    /// do not care about log output.
    pub fn detached(source: &Path) -> Self {
        Self {
            source: source.to_path_buf(),
            span: Span::none(),
        }
    }
}

/// Log verbosity selected on the command line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
}

impl Verbosity {
    fn default_directive(self) -> &'static str {
        match self {
            Verbosity::Quiet => "warn",
            Verbosity::Normal => "info",
            Verbosity::Verbose => "debug",
        }
    }
}

/// Install the global `tracing` subscriber, writing to stderr.
///
/// `RUST_LOG` takes precedence over the verbosity flag. Calling this twice
/// is harmless: the second install attempt is ignored.
pub fn init_tracing(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.default_directive()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .try_init();
}
