//! Error types for the highlight engine

use std::io;
use std::path::PathBuf;
use thiserror::Error;
use zonefit_scheduler::{BridgeError, Cancelled, WorkError};

/// Errors raised by engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// The operation observed cancellation
    #[error("operation cancelled")]
    Cancelled,

    /// An OCR word did not come from exactly one raster zone
    #[error("corrupt OCR data on page {page}: word {word} of line {line} has {zones} zones")]
    CorruptOcrWord {
        page: u32,
        line: usize,
        word: usize,
        zones: usize,
    },

    /// Pixel buffer does not match the stated dimensions
    #[error("bitmap data has {actual} pixels, expected {expected}")]
    InvalidBitmap { expected: usize, actual: usize },

    /// The UI bridge refused the call
    #[error("UI bridge error: {0}")]
    Bridge(BridgeError),
}

impl From<Cancelled> for EngineError {
    fn from(_: Cancelled) -> Self {
        EngineError::Cancelled
    }
}

impl From<BridgeError> for EngineError {
    fn from(error: BridgeError) -> Self {
        match error {
            BridgeError::Cancelled | BridgeError::Disconnected => EngineError::Cancelled,
            other => EngineError::Bridge(other),
        }
    }
}

impl From<EngineError> for WorkError {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::Cancelled => WorkError::Cancelled,
            other => WorkError::failed(other),
        }
    }
}

/// Errors reported by an OCR engine
#[derive(Debug, Error)]
pub enum OcrError {
    /// Recognition stopped because its token was cancelled
    #[error("OCR cancelled")]
    Cancelled,

    /// The engine could not recognize the page
    #[error("OCR failed on page {page}: {message}")]
    Engine { page: u32, message: String },

    /// The source file could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Errors that can occur during configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid value for a configuration key
    #[error("invalid value for configuration key: {0}")]
    InvalidValue(String),

    /// Malformed configuration document
    #[error("malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// I/O error reading or writing a configuration file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
