use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use labelcheck_common::error::{LabelError, UpstreamError};

pub struct ApiError(pub LabelError);

impl From<LabelError> for ApiError {
    fn from(err: LabelError) -> Self {
        Self(err)
    }
}

/// Extractor rejections become validation errors so they share the envelope.
macro_rules! rejection_is_validation {
    ($($rejection:ty),+) => {
        $(impl From<$rejection> for ApiError {
            fn from(rejection: $rejection) -> Self {
                Self(LabelError::Validation(rejection.body_text()))
            }
        })+
    };
}

rejection_is_validation!(JsonRejection, MultipartRejection, PathRejection, QueryRejection);

fn status_for(err: &LabelError) -> StatusCode {
    match err {
        LabelError::Authentication(_) => StatusCode::UNAUTHORIZED,
        LabelError::Authorization(_) => StatusCode::FORBIDDEN,
        LabelError::Validation(_) => StatusCode::BAD_REQUEST,
        LabelError::NotFound(_) => StatusCode::NOT_FOUND,
        LabelError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        LabelError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        LabelError::ExtractionFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
        LabelError::Upstream(UpstreamError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
        LabelError::Upstream(UpstreamError::RateLimited { .. }) => StatusCode::SERVICE_UNAVAILABLE,
        LabelError::Upstream(_) | LabelError::ResponseParse(_) => StatusCode::BAD_GATEWAY,
        LabelError::Database(_) | LabelError::Config(_) | LabelError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let message = match &self.0 {
            // Store and config details stay in the log.
            LabelError::Database(_) | LabelError::Config(_) | LabelError::Internal(_) => {
                tracing::error!(error = %self.0, "request failed");
                "internal error".to_string()
            }
            other => other.to_string(),
        };

        let body = serde_json::json!({
            "error": message,
            "code": self.0.code(),
            "retryable": self.0.is_retryable(),
        });
        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = self.0.retry_after_secs() {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
