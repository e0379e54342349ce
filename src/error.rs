//! Crate-wide error type.

use thiserror::Error;

/// Errors raised by layer setup, the math backends and configuration loading.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("unknown execution mode '{0}' (expected 'cpu' or 'gpu')")]
    UnknownMode(String),

    #[error("{layer} layer takes exactly {expected} {which} blob(s), got {actual}")]
    BlobCount {
        layer: &'static str,
        which: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("shape mismatch: {0}")]
    Shape(String),

    #[error("accelerator device error: {0}")]
    Device(String),

    /// Synchronization needed a copy that an outstanding view still borrows.
    #[error("memory is borrowed: {0}")]
    Borrowed(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
