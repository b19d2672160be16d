//! # Error Handling
//!
//! Error types for the statistics subsystem.
//!
//! ## Design Principles
//!
//! 1. **Never on the I/O path**: recording an operation cannot fail; errors
//!    only surface from query helpers, configuration, and history sinks
//! 2. **Contextual**: errors carry the offending value or path
//! 3. **Recoverable**: a failed collection cycle never poisons later ones

use thiserror::Error;

/// Result type alias for statistics operations
pub type Result<T> = std::result::Result<T, Error>;

/// Primary error type for the statistics subsystem
#[derive(Error, Debug)]
pub enum Error {
    // Input Errors
    #[error("Value out of range: {message}")]
    ValueOutOfRange { message: String },

    #[error("Invalid histogram: expected {expected} bins, got {actual}")]
    InvalidHistogram { expected: usize, actual: usize },

    // Persistence Errors
    #[error("History sink error: {message}")]
    Sink {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    // System Errors
    #[error("IO error: {message}")]
    Io { message: String, source: std::io::Error },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Shorthand for a sink failure without an underlying cause
    pub fn sink(message: impl Into<String>) -> Self {
        Error::Sink {
            message: message.into(),
            source: None,
        }
    }

    /// Check if error is recoverable
    ///
    /// Sink and IO failures only lose one collection cycle, so the collector
    /// keeps running after them.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::ValueOutOfRange { .. } => false,
            Error::InvalidHistogram { .. } => false,
            Error::Configuration { .. } => false,
            _ => true,
        }
    }

    /// Get error code for monitoring
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::ValueOutOfRange { .. } => "VALUE_OUT_OF_RANGE",
            Error::InvalidHistogram { .. } => "INVALID_HISTOGRAM",
            Error::Sink { .. } => "SINK_ERROR",
            Error::Serialization { .. } => "SERIALIZATION_ERROR",
            Error::Io { .. } => "IO_ERROR",
            Error::Configuration { .. } => "CONFIG_ERROR",
            Error::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization {
            message: err.to_string(),
        }
    }
}

/// Extension trait for adding context to results
pub trait ResultExt<T> {
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| match e.into() {
            Error::Io { message, source } => Error::Io {
                message: format!("{}: {}", f(), message),
                source,
            },
            other => Error::Internal {
                message: format!("{}: {}", f(), other),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = Error::InvalidHistogram { expected: 32, actual: 7 };
        assert_eq!(err.error_code(), "INVALID_HISTOGRAM");
        assert_eq!(err.to_string(), "Invalid histogram: expected 32 bins, got 7");
        assert!(!err.is_recoverable());

        assert!(Error::sink("down").is_recoverable());
    }

    #[test]
    fn test_with_context_keeps_io_kind() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let result: Result<()> = Err(io.into());
        let err = result.with_context(|| "opening history".to_string()).unwrap_err();
        match err {
            Error::Io { message, source } => {
                assert!(message.starts_with("opening history"));
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
