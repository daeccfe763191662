use serde::Serialize;
use thiserror::Error;

/// Failures of the completion service, kept apart so callers can tell
/// retryable conditions from hard rejections.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("completion service timed out after {after_secs}s")]
    Timeout { after_secs: u64 },

    #[error("completion service rate limited the request")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("completion service unavailable: {0}")]
    Unavailable(String),

    #[error("completion service rejected the request (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("completion service returned no content")]
    NoContent,
}

#[derive(Debug, Error)]
pub enum LabelError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("authentication required: {0}")]
    Authentication(String),

    #[error("forbidden: {0}")]
    Authorization(String),

    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("payload too large: {actual} exceeds limit of {limit}")]
    PayloadTooLarge { limit: usize, actual: usize },

    #[error("content extraction failed: {0}")]
    ExtractionFailed(String),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("model response could not be parsed: {0}")]
    ResponseParse(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type LabelResult<T> = Result<T, LabelError>;

/// Stable machine-readable error code carried in every error envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    AuthenticationError,
    AuthorizationError,
    ValidationError,
    UnsupportedMediaType,
    PayloadTooLarge,
    ExtractionFailed,
    NotFound,
    UpstreamTimeout,
    UpstreamRateLimited,
    UpstreamUnavailable,
    UpstreamRejected,
    UpstreamNoContent,
    ResponseParseError,
    PersistenceError,
    ConfigError,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthenticationError => "authentication_error",
            Self::AuthorizationError => "authorization_error",
            Self::ValidationError => "validation_error",
            Self::UnsupportedMediaType => "unsupported_media_type",
            Self::PayloadTooLarge => "payload_too_large",
            Self::ExtractionFailed => "extraction_failed",
            Self::NotFound => "not_found",
            Self::UpstreamTimeout => "upstream_timeout",
            Self::UpstreamRateLimited => "upstream_rate_limited",
            Self::UpstreamUnavailable => "upstream_unavailable",
            Self::UpstreamRejected => "upstream_rejected",
            Self::UpstreamNoContent => "upstream_no_content",
            Self::ResponseParseError => "response_parse_error",
            Self::PersistenceError => "persistence_error",
            Self::ConfigError => "config_error",
            Self::InternalError => "internal_error",
        }
    }
}

impl LabelError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Config(_) => ErrorCode::ConfigError,
            Self::Database(_) => ErrorCode::PersistenceError,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Validation(_) => ErrorCode::ValidationError,
            Self::Authentication(_) => ErrorCode::AuthenticationError,
            Self::Authorization(_) => ErrorCode::AuthorizationError,
            Self::UnsupportedMediaType(_) => ErrorCode::UnsupportedMediaType,
            Self::PayloadTooLarge { .. } => ErrorCode::PayloadTooLarge,
            Self::ExtractionFailed(_) => ErrorCode::ExtractionFailed,
            Self::Upstream(UpstreamError::Timeout { .. }) => ErrorCode::UpstreamTimeout,
            Self::Upstream(UpstreamError::RateLimited { .. }) => ErrorCode::UpstreamRateLimited,
            Self::Upstream(UpstreamError::Unavailable(_)) => ErrorCode::UpstreamUnavailable,
            Self::Upstream(UpstreamError::Rejected { .. }) => ErrorCode::UpstreamRejected,
            Self::Upstream(UpstreamError::NoContent) => ErrorCode::UpstreamNoContent,
            Self::ResponseParse(_) => ErrorCode::ResponseParseError,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Only timeouts and rate limits are worth retrying unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Upstream(UpstreamError::Timeout { .. })
                | Self::Upstream(UpstreamError::RateLimited { .. })
        )
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::Upstream(UpstreamError::RateLimited { retry_after_secs }) => *retry_after_secs,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_subtypes_have_distinct_codes() {
        let timeout = LabelError::from(UpstreamError::Timeout { after_secs: 90 });
        let unavailable = LabelError::from(UpstreamError::Unavailable("502".to_string()));
        assert_eq!(timeout.code(), ErrorCode::UpstreamTimeout);
        assert_eq!(unavailable.code(), ErrorCode::UpstreamUnavailable);
        assert_ne!(timeout.code(), unavailable.code());
    }

    #[test]
    fn only_timeout_and_rate_limit_are_retryable() {
        assert!(LabelError::from(UpstreamError::Timeout { after_secs: 1 }).is_retryable());
        assert!(LabelError::from(UpstreamError::RateLimited {
            retry_after_secs: Some(3)
        })
        .is_retryable());
        assert!(!LabelError::from(UpstreamError::NoContent).is_retryable());
        assert!(!LabelError::ResponseParse("bad".to_string()).is_retryable());
        assert!(!LabelError::Database("down".to_string()).is_retryable());
    }

    #[test]
    fn retry_after_only_for_rate_limit() {
        let err = LabelError::from(UpstreamError::RateLimited {
            retry_after_secs: Some(12),
        });
        assert_eq!(err.retry_after_secs(), Some(12));
        assert_eq!(
            LabelError::from(UpstreamError::Timeout { after_secs: 5 }).retry_after_secs(),
            None
        );
    }

    #[test]
    fn code_serializes_as_snake_case() {
        let json = serde_json::to_string(&ErrorCode::ResponseParseError).unwrap();
        assert_eq!(json, "\"response_parse_error\"");
        assert_eq!(ErrorCode::PersistenceError.as_str(), "persistence_error");
    }
}
