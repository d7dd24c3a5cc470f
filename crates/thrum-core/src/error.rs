//! Audio engine error types

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during audio operations
#[derive(Error, Debug)]
pub enum AudioError {
    /// Audio subsystem could not be brought up (device, threads, buffers)
    #[error("Audio initialization failed: {0}")]
    InitFailed(String),

    /// Device negotiation failed for all attempted output configurations
    #[error("Failed to open audio output: {0}")]
    OpenFailed(String),

    /// Unsupported or corrupt source file, or invalid source format
    #[error("Failed to decode {}: {reason}", .path.display())]
    DecodeFailed { path: PathBuf, reason: String },

    /// Format converter could not be constructed or accept data
    #[error("Format conversion failed: {0}")]
    ConversionFailed(String),
}

impl AudioError {
    /// Build a `DecodeFailed` for the given source path
    pub fn decode(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::DecodeFailed {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for audio operations
pub type AudioResult<T> = Result<T, AudioError>;
