use miette::Diagnostic;
use thiserror::Error;

/// Unified error type for all relwatch operations.
#[derive(Debug, Error, Diagnostic)]
pub enum RelwatchError {
    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Bad framing or schema while decoding binary data.
    #[error("Decode error at offset {offset}: {message}")]
    Decode { message: String, offset: usize },

    /// The upstream repository misbehaved: unexpected HTTP status,
    /// unparseable document, or a paging mismatch in the search API.
    #[error("Upstream error: {message}")]
    Upstream { message: String },

    /// Network request or transport failed.
    #[error("Network error: {message}")]
    Network { message: String },

    /// Invalid configuration: bad regex, bad duration literal, malformed file.
    #[error("Config error: {message}")]
    #[diagnostic(help("Check the tracker properties and blacklist rules for invalid values"))]
    Config { message: String },

    /// Shutdown is in progress.
    #[error("Interrupted: shutdown in progress")]
    Interrupted,

    /// Catch-all for miscellaneous errors.
    #[error("{message}")]
    Generic { message: String },
}

impl RelwatchError {
    /// Construct a decode error at a known buffer offset.
    pub fn decode(message: impl Into<String>, offset: usize) -> Self {
        Self::Decode {
            message: message.into(),
            offset,
        }
    }
}

/// Convenience alias for `miette::Result<T>`.
pub type RelwatchResult<T> = miette::Result<T>;
