use serde_json::json;

/// Errors the service reports in its response bodies
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Unknown error: {0}")]
    Unknown(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    pub fn status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Error::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::PermissionDenied => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    /// JSON body describing this error
    pub fn contents(&self) -> serde_json::Value {
        match self {
            Error::Unknown(msg) => json!({
                "message": msg,
                "code": "unknown",
            }),
            Error::InvalidRequest(msg) => json!({
                "detail": msg,
                "code": "invalid-request",
            }),
            Error::Unauthorized => json!({
                "code": "unauthorized",
            }),
            Error::PermissionDenied => json!({
                "message": "permission denied",
                "code": "permission-denied",
            }),
            Error::NotFound(what) => json!({
                "message": format!("{what} does not exist"),
                "code": "not-found",
            }),
        }
    }
}
