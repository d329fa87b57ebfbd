//! Error types for pixelforge-hevc.

use thiserror::Error;

/// Main error type for header generation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HevcError {
    /// Configuration cannot be expressed as a valid HEVC sequence
    /// (unsupported chroma format, profile/level mismatch, malformed RPS).
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// The serialized access unit does not fit into the caller's buffer.
    #[error("Output buffer too small: {required_bits} bits required, {available_bits} available")]
    Capacity {
        /// Exact size of the serialized access unit.
        required_bits: usize,
        /// Size of the buffer that was offered.
        available_bits: usize,
    },

    /// The caller handed over a picture that violates the scheduling contract.
    #[error("Precondition violated: {0}")]
    Precondition(String),

    /// Invalid input (side data, call order, etc.).
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type for header generation.
pub type Result<T> = std::result::Result<T, HevcError>;
