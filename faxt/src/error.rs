//! Error handling module for the faxt CLI.
//!
//! This module provides custom error types using `thiserror` for structured
//! error handling throughout the application.

use thiserror::Error;

/// Main error type for the faxt CLI application.
#[derive(Error, Debug)]
pub enum FaxtError {
    /// Error when a configuration file is present but malformed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error when IO operations fail (reading a script, a config file, stdin).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using FaxtError.
pub type Result<T> = std::result::Result<T, FaxtError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = FaxtError::Config("missing field".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing field");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let faxt_err: FaxtError = io_err.into();
        assert!(matches!(faxt_err, FaxtError::Io(_)));
    }
}
