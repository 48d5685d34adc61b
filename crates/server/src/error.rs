use axum::Json;
use axum::http::StatusCode;
use serde::Serialize;

/// Every failure the service can surface, mapped to one HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    RateLimited,
    UpstreamAuth,
    UpstreamSearch,
    UpstreamLlm,
    UpstreamFetch,
    UnsupportedMediaType,
    PayloadTooLarge,
    InvalidUrl,
    Misconfigured,
    NoModelAvailable,
    Internal,
}

impl ErrorKind {
    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::Validation | ErrorKind::InvalidUrl => StatusCode::BAD_REQUEST,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::UpstreamAuth => StatusCode::UNAUTHORIZED,
            ErrorKind::UpstreamSearch | ErrorKind::UpstreamLlm | ErrorKind::UpstreamFetch => {
                StatusCode::BAD_GATEWAY
            }
            ErrorKind::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ErrorKind::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorKind::Misconfigured | ErrorKind::NoModelAvailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Typed error carried through the ask pipeline. Clone is required so a
/// coalesced failure can be fanned out to every waiting caller.
#[derive(Debug, Clone)]
pub struct HttpError {
    pub kind: ErrorKind,
    pub message: String,
}

impl HttpError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for HttpError {}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(rename = "requestId")]
    pub request_id: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn json_error(status: StatusCode, message: impl Into<String>, request_id: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            message: message.into(),
            request_id: request_id.to_string(),
        }),
    )
}

/// Maps a pipeline error to the wire envelope. Unclassified failures in
/// production keep the fixed message so internals never leak.
pub fn to_api_error(err: &HttpError, request_id: &str, production: bool) -> ApiError {
    let message = if production && err.kind == ErrorKind::Internal {
        "Internal Server Error".to_string()
    } else {
        err.message.clone()
    };
    json_error(err.kind.status(), message, request_id)
}
