/**
 * Error Handling Module
 *
 * Centralized error taxonomy for the lore library. Every fallible operation
 * returns `Result<T>`; library code never panics. The variants map onto the
 * failure classes the stores and the server expose:
 *
 * - `Validation`       caller-side programmer errors, never retried
 * - `LessonNotFound`   vote/update on an absent or out-of-scope lesson
 * - `Auth`             missing, unknown, or revoked API key (401/403)
 * - `RateLimited`      server answered 429; carries the retry-after hint
 * - `Connection`       network-level failure or deadline expiry; outcome of
 *                      a mutating call is indeterminate
 * - `Integrity`        stored data violates an invariant (corrupt vector
 *                      blob, dimension mismatch); never auto-repaired
 *
 * The remaining variants wrap external failures (database, serialization,
 * I/O) without losing their message.
 */

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Invalid caller input (empty required field, confidence out of range,
    /// wrong embedding dimension, malformed pattern).
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Lesson does not exist or is outside the caller's scope.
    #[error("Lesson not found: {0}")]
    LessonNotFound(String),

    /// The server rejected the API key.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The server applied its rate limit; retry after the hinted delay.
    #[error("Rate limited (retry after {retry_after_secs:?} seconds)")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Network-level failure, timeout, or abort talking to the server.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Stored data violates an invariant; fatal to the request.
    #[error("Integrity violation: {0}")]
    Integrity(String),

    /// Embedded or server database failure.
    #[error("Database error: {0}")]
    Database(String),

    /// JSON or vector serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic I/O error (file create, read, write).
    #[error("I/O error: {0}")]
    Io(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias used across the library.
pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(err.to_string())
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Database(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Connection(format!("request timed out: {}", err))
        } else {
            Error::Connection(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::LessonNotFound("les-123".to_string());
        assert_eq!(err.to_string(), "Lesson not found: les-123");

        let err = Error::Validation("confidence must be within [0, 1]".to_string());
        assert!(err.to_string().contains("confidence"));

        let err = Error::RateLimited {
            retry_after_secs: Some(12),
        };
        assert!(err.to_string().contains("12"));
    }

    #[test]
    fn test_error_traits() {
        let err1 = Error::Auth("revoked key".to_string());
        let err2 = err1.clone();
        assert_eq!(err1, err2);
        assert_ne!(err1, Error::Internal("other".to_string()));
    }

    #[test]
    fn test_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: Error = json_err.into();
        match err {
            Error::Serialization(_) => {}
            other => panic!("Expected Serialization error, got {:?}", other),
        }

        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing file");
        let err: Error = io_err.into();
        match err {
            Error::Io(msg) => assert!(msg.contains("missing file")),
            other => panic!("Expected Io error, got {:?}", other),
        }
    }
}
