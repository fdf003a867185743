//! Custom error types for hivreport.
//!
//! Only setup steps (loading tables, building clients, validating
//! configuration) return these errors. The per-request report pipeline is
//! total and degrades to fallback values instead.

use thiserror::Error;

/// Main error type for hivreport operations.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Network/HTTP request error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Completion API returned a non-success status
    #[error("API error: {code} - {message}")]
    Api {
        /// HTTP status code
        code: i32,
        /// Error message from API
        message: String,
    },

    /// Malformed input (CSV headers, API payloads)
    #[error("Parse error: {0}")]
    Parse(String),

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV reading/writing error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type alias using `ReportError`
pub type Result<T> = std::result::Result<T, ReportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_and_json_conversions() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: ReportError = io.into();
        assert!(matches!(err, ReportError::Io(_)));
        assert_eq!(err.to_string(), "IO error: gone");

        let json = serde_json::from_str::<serde_json::Value>("{").err().map(ReportError::from);
        assert!(matches!(json, Some(ReportError::Json(_))));
    }
}
