//! Error types for the streamcache pipeline.

use std::io;
use thiserror::Error;

/// The result type used throughout streamcache.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for streamcache operations.
#[derive(Debug, Error)]
pub enum Error {
    /// An I/O error occurred in a storage backend.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// An invalid argument was provided.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A read extends past the end of the file.
    #[error("Out of range: offset {offset} + size {size} exceeds file length {file_length}")]
    OutOfRange {
        /// Requested start offset.
        offset: u64,
        /// Requested number of bytes.
        size: u64,
        /// Known length of the file.
        file_length: u64,
    },

    /// The requested item was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An operation was attempted in an invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The allocator could not provide the requested memory.
    #[error("Allocation failed: requested {requested} bytes, {available} available")]
    AllocationFailed {
        /// Number of bytes requested.
        requested: usize,
        /// Number of bytes still available in the budget.
        available: usize,
    },

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Creates a new not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Creates a new invalid state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    /// Creates a new internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }
}
