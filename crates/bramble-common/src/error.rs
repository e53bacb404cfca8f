//! Error types for BrambleDB.

use thiserror::Error;

/// Result type alias using BrambleError.
pub type Result<T> = std::result::Result<T, BrambleError>;

/// Errors that can occur in BrambleDB operations.
#[derive(Debug, Error)]
pub enum BrambleError {
    // Configuration errors
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter { name: String, value: String },

    // Page codec errors
    #[error("Page overflow: need {needed} bytes, frame holds {capacity}")]
    PageOverflow { needed: usize, capacity: usize },

    #[error("Page corrupted: {page_id}, reason: {reason}")]
    PageCorrupted { page_id: u64, reason: String },

    #[error("Page size mismatch: expected at least {expected}, got {actual}")]
    PageSizeMismatch { expected: usize, actual: usize },
}
