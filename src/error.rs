//! Error types for framelink.

use thiserror::Error;

/// Result type alias using framelink's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for framelink operations.
#[derive(Error, Debug)]
pub enum Error {
    /// No stream with the requested name was declared by the pipeline.
    #[error("queue for stream name '{0}' doesn't exist")]
    NotFound(String),

    /// Two declared streams collapse to the same name.
    #[error("streams have duplicate name '{0}'")]
    DuplicateStream(String),

    /// Operation on a queue that has transitioned to closed.
    #[error("queue '{0}' is closed")]
    QueueClosed(String),

    /// Record and replay paths were both configured; neither is enabled.
    #[error("both record and replay paths are set; record and replay disabled")]
    ConfigConflict,

    /// Record/replay directory is missing or not writable.
    #[error("path '{0}' does not exist or is not writable")]
    PathUnavailable(String),

    /// Input message exceeds the stream's declared maximum payload size.
    #[error("message of {size} bytes exceeds stream '{stream}' limit of {limit} bytes")]
    MessageTooLarge {
        /// Stream the send was attempted on.
        stream: String,
        /// Size of the rejected payload.
        size: usize,
        /// Declared maximum payload size for the stream.
        limit: usize,
    },

    /// Message serialization failed.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Transport channel failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
