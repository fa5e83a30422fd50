//! Error Handling Module
//!
//! Defines the error type shared by the library and both binaries.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for X-ray diagnosis operations
#[derive(Error, Debug)]
pub enum XrayError {
    /// The input bytes could not be decoded as an image
    #[error("Failed to decode image: {0}")]
    ImageDecode(String),

    /// The input file does not have an accepted image extension
    #[error("Unsupported image format '{0}' (expected jpg, jpeg or png)")]
    UnsupportedFormat(String),

    /// A checkpoint exists but could not be deserialized into the model
    #[error("Failed to load checkpoint '{0}': {1}")]
    CheckpointLoad(PathBuf, String),

    /// A checkpoint could not be written
    #[error("Failed to save checkpoint '{0}': {1}")]
    CheckpointSave(PathBuf, String),

    /// No model checkpoints were loaded
    #[error("No models loaded from '{0}'")]
    NoModels(PathBuf),

    /// Error during the forward pass or reading its output
    #[error("Inference error: {0}")]
    Inference(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Convenience Result type for X-ray diagnosis operations
pub type Result<T> = std::result::Result<T, XrayError>;

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, msg: &str) -> Result<T>;
}

impl<T, E: std::error::Error> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| XrayError::InvalidInput(format!("{}: {}", msg, e)))
    }
}
