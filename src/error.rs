//! Error types for feedcore.

use thiserror::Error;

/// Common error type for feedcore.
#[derive(Error, Debug)]
pub enum FeedcoreError {
    /// Database error.
    ///
    /// Database errors from sqlx are automatically converted.
    #[error("database error: {0}")]
    Database(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Outbound HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Validation error for caller input.
    #[error("validation error: {0}")]
    Validation(String),

    /// A link was expected to be an absolute URL.
    #[error("link is not absolute: {0}")]
    NotAbsolute(String),

    /// Discovery produced no feed candidates.
    #[error("no feed found at {0}")]
    NoFeed(String),

    /// A per-article entity (scores, extract, thumbnail) does not exist yet.
    #[error("no content")]
    NoContent,

    /// An optional subsystem is not configured.
    #[error("{0} is not configured")]
    NotConfigured(String),

    /// Feed body could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// Hub (WebSub) interaction failed.
    #[error("hub error: {0}")]
    Hub(String),

    /// Image decoding or encoding failed.
    #[error("image error: {0}")]
    Image(String),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<sqlx::Error> for FeedcoreError {
    fn from(e: sqlx::Error) -> Self {
        FeedcoreError::Database(e.to_string())
    }
}

impl From<reqwest::Error> for FeedcoreError {
    fn from(e: reqwest::Error) -> Self {
        FeedcoreError::Http(e.to_string())
    }
}

impl From<url::ParseError> for FeedcoreError {
    fn from(e: url::ParseError) -> Self {
        FeedcoreError::NotAbsolute(e.to_string())
    }
}

impl From<image::ImageError> for FeedcoreError {
    fn from(e: image::ImageError) -> Self {
        FeedcoreError::Image(e.to_string())
    }
}

/// Result type alias for feedcore operations.
pub type Result<T> = std::result::Result<T, FeedcoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = FeedcoreError::Validation("empty link".to_string());
        assert_eq!(err.to_string(), "validation error: empty link");
    }

    #[test]
    fn test_not_absolute_display() {
        let err = FeedcoreError::NotAbsolute("/feed.xml".to_string());
        assert_eq!(err.to_string(), "link is not absolute: /feed.xml");
    }

    #[test]
    fn test_no_feed_display() {
        let err = FeedcoreError::NoFeed("https://example.com/".to_string());
        assert_eq!(err.to_string(), "no feed found at https://example.com/");
    }

    #[test]
    fn test_not_configured_display() {
        let err = FeedcoreError::NotConfigured("hubbub".to_string());
        assert_eq!(err.to_string(), "hubbub is not configured");
    }

    #[test]
    fn test_not_found_display() {
        let err = FeedcoreError::NotFound("feed".to_string());
        assert_eq!(err.to_string(), "feed not found");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: FeedcoreError = io_err.into();
        assert!(matches!(err, FeedcoreError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_sqlx_error_conversion() {
        let err: FeedcoreError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, FeedcoreError::Database(_)));
    }

    #[test]
    fn test_result_alias() {
        fn sample_ok() -> Result<i32> {
            Ok(42)
        }

        fn sample_err() -> Result<i32> {
            Err(FeedcoreError::NoContent)
        }

        assert_eq!(sample_ok().unwrap(), 42);
        assert!(sample_err().is_err());
    }
}
