//! # Application Errors
//!
//! Everything the binary can fail with: engine errors from graft-core plus
//! file, JSON and schema-file problems.

use graft_core::GraftError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by CLI commands.
#[derive(Debug, Error)]
pub enum AppError {
    /// The engine rejected the input.
    #[error(transparent)]
    Graft(#[from] GraftError),

    /// A file could not be read.
    #[error("Cannot read '{}': {source}", path.display())]
    Io {
        /// The file being read.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// An input file exceeds the size limit.
    #[error("File '{}' is {size} bytes, maximum allowed is {max} bytes", path.display())]
    FileTooLarge {
        /// The offending file.
        path: PathBuf,
        /// Its size.
        size: u64,
        /// The limit.
        max: u64,
    },

    /// A JSON input could not be parsed.
    #[error("Invalid JSON in '{}': {reason}", path.display())]
    Json {
        /// The file being parsed.
        path: PathBuf,
        /// Parser message.
        reason: String,
    },

    /// The schema file is malformed.
    #[error("Invalid schema file: {0}")]
    Config(String),

    /// Output could not be rendered.
    #[error("Cannot render output: {0}")]
    Output(String),
}
