//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use std::fmt;
use std::process;

use hydrodem::{MosaicError, PipelineError, TilerError};

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Invalid or inconsistent arguments
    Args(String),
    /// Tiling failed
    Tiling(TilerError),
    /// The acquisition pipeline failed
    Pipeline(PipelineError),
    /// Mosaic manifest construction failed
    Mosaic(MosaicError),
    /// Failed to set up a data source
    Source(String),
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        if let CliError::Pipeline(PipelineError::OutputExists(_)) = self {
            eprintln!();
            eprintln!("The output directory already holds a previous run.");
            eprintln!("  --resume     continue it, skipping completed tiles");
            eprintln!("  --overwrite  discard it and start over");
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Args(msg) => write!(f, "{}", msg),
            CliError::Tiling(e) => write!(f, "Tiling failed: {}", e),
            CliError::Pipeline(e) => write!(f, "Pipeline failed: {}", e),
            CliError::Mosaic(e) => write!(f, "Mosaic build failed: {}", e),
            CliError::Source(msg) => write!(f, "Source setup failed: {}", msg),
        }
    }
}

impl From<PipelineError> for CliError {
    fn from(e: PipelineError) -> Self {
        CliError::Pipeline(e)
    }
}

impl From<TilerError> for CliError {
    fn from(e: TilerError) -> Self {
        CliError::Tiling(e)
    }
}

impl From<MosaicError> for CliError {
    fn from(e: MosaicError) -> Self {
        CliError::Mosaic(e)
    }
}
