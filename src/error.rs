// HTTP API Error Types
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};

use crate::auth::AuthFailure;

/// Client-facing gateway failure. Every variant renders the same
/// `{success: false, message, error?, code?}` envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    // 400 Bad Request
    InvalidJson(Option<String>),
    InvalidPath(String),

    // 401 Unauthorized
    AuthMissing,
    AuthExpired,

    // 403 Forbidden
    AuthInvalid,
    Forbidden(String),

    // 404 Not Found
    RouteNotFound(String),

    // 413 Payload Too Large
    PayloadTooLarge(usize),

    // 429 Too Many Requests
    RateLimited(String),

    // 500 Internal Server Error
    InternalServerError(String),

    // 502 Bad Gateway (upstream issues)
    UpstreamTimeout { service: String, detail: Option<String> },
    UpstreamUnreachable { service: String, detail: Option<String> },
    UpstreamOtherError { service: String, detail: Option<String> },
}

impl ApiError {
    /// Get HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidJson(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidPath(_) => StatusCode::BAD_REQUEST,
            ApiError::AuthMissing => StatusCode::UNAUTHORIZED,
            ApiError::AuthExpired => StatusCode::UNAUTHORIZED,
            ApiError::AuthInvalid => StatusCode::FORBIDDEN,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::RouteNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::UpstreamTimeout { .. } => StatusCode::BAD_GATEWAY,
            ApiError::UpstreamUnreachable { .. } => StatusCode::BAD_GATEWAY,
            ApiError::UpstreamOtherError { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    /// Get client-safe error message
    pub fn message(&self) -> String {
        match self {
            ApiError::InvalidJson(_) => "Invalid JSON payload".to_string(),
            ApiError::InvalidPath(_) => "Invalid request path".to_string(),
            ApiError::AuthMissing => "Access denied. No token provided.".to_string(),
            ApiError::AuthExpired => "Token expired".to_string(),
            ApiError::AuthInvalid => "Invalid token".to_string(),
            ApiError::Forbidden(msg) => msg.clone(),
            ApiError::RouteNotFound(_) => "Route not found".to_string(),
            ApiError::PayloadTooLarge(limit) => {
                format!("Request body exceeds the {} byte limit", limit)
            }
            ApiError::RateLimited(msg) => msg.clone(),
            ApiError::InternalServerError(msg) => msg.clone(),
            ApiError::UpstreamTimeout { service, .. }
            | ApiError::UpstreamUnreachable { service, .. }
            | ApiError::UpstreamOtherError { service, .. } => {
                format!("{} service is currently unavailable", service)
            }
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::InvalidJson(_) => "INVALID_JSON",
            ApiError::InvalidPath(_) => "INVALID_PATH",
            ApiError::AuthMissing => "AUTH_MISSING",
            ApiError::AuthExpired => "AUTH_EXPIRED",
            ApiError::AuthInvalid => "AUTH_INVALID",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::RouteNotFound(_) => "ROUTE_NOT_FOUND",
            ApiError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            ApiError::RateLimited(_) => "RATE_LIMITED",
            ApiError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
            ApiError::UpstreamTimeout { .. } => "UPSTREAM_TIMEOUT",
            ApiError::UpstreamUnreachable { .. } => "UPSTREAM_UNREACHABLE",
            ApiError::UpstreamOtherError { .. } => "UPSTREAM_ERROR",
        }
    }

    /// Extra detail for the `error` field, if any is safe to show
    fn detail(&self) -> Option<&str> {
        match self {
            ApiError::InvalidJson(detail) => detail.as_deref(),
            ApiError::InvalidPath(path) => Some(path),
            ApiError::RouteNotFound(path) => Some(path),
            ApiError::UpstreamTimeout { detail, .. }
            | ApiError::UpstreamUnreachable { detail, .. }
            | ApiError::UpstreamOtherError { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }

    /// Convert to JSON response body
    pub fn to_json(&self) -> Value {
        let mut response = json!({
            "success": false,
            "message": self.message(),
            "code": self.error_code()
        });

        if let Some(detail) = self.detail() {
            response["error"] = json!(detail);
        }

        response
    }
}

// Static constructor methods
impl ApiError {
    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden(message.into())
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        ApiError::RateLimited(message.into())
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        ApiError::InternalServerError(message.into())
    }
}

impl From<AuthFailure> for ApiError {
    fn from(failure: AuthFailure) -> Self {
        match failure {
            AuthFailure::Missing => ApiError::AuthMissing,
            AuthFailure::Expired => ApiError::AuthExpired,
            AuthFailure::Invalid(_) => ApiError::AuthInvalid,
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ApiError {}

// Automatic HTTP response conversion for Axum
impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status_code(), Json(self.to_json())).into_response()
    }
}

/// Panic handler for `CatchPanicLayer`: a panic anywhere in the pipeline
/// becomes a 500 envelope instead of a dropped connection.
pub fn handle_panic(err: Box<dyn std::any::Any + Send + 'static>) -> axum::response::Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic payload".to_string()
    };

    tracing::error!("Request handler panicked: {}", detail);
    ApiError::internal_server_error("Internal server error").into_response()
}
