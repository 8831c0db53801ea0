use std::sync::Arc;

use crate::api::RemoteError;

/// Keys of an error payload that may carry a human-readable message, by priority
const MESSAGE_KEYS: &[&str] = &["message", "error", "detail"];

/// Keys of an error payload that may carry a machine-readable code, by priority
const CODE_KEYS: &[&str] = &["code", "error"];

const FALLBACK_MESSAGE: &str = "An error occurred";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// 4xx: repeating the request will not help
    Client,
    /// 5xx
    Server,
    /// No response reached us
    Transport,
    Unknown,
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Server | ErrorKind::Transport)
    }
}

/// Uniform shape of a failed remote call, ready to be shown to a user
#[derive(Clone, Debug, thiserror::Error)]
#[error("{message}")]
pub struct NormalizedError {
    pub kind: ErrorKind,
    pub status: Option<u16>,
    pub code: Option<String>,
    pub message: String,
    pub raw: Arc<RemoteError>,
}

impl NormalizedError {
    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
    }
}

impl From<RemoteError> for NormalizedError {
    fn from(e: RemoteError) -> NormalizedError {
        normalize(e)
    }
}

fn status_phrase(status: u16) -> Option<&'static str> {
    match status {
        400 => Some("Invalid request"),
        401 => Some("Unauthorized"),
        403 => Some("Access denied"),
        404 => Some("Not found"),
        s if s >= 500 => Some("Server error"),
        _ => None,
    }
}

fn first_string(body: Option<&serde_json::Value>, keys: &[&str]) -> Option<String> {
    let body = body?.as_object()?;
    keys.iter()
        .filter_map(|k| body.get(*k).and_then(|v| v.as_str()))
        .find(|s| !s.is_empty())
        .map(String::from)
}

pub fn classify(e: &RemoteError) -> ErrorKind {
    match e {
        RemoteError::Status { status, .. } if (400..500).contains(status) => ErrorKind::Client,
        RemoteError::Status { status, .. } if *status >= 500 => ErrorKind::Server,
        RemoteError::Status { .. } => ErrorKind::Unknown,
        RemoteError::Transport { .. } => ErrorKind::Transport,
        RemoteError::Other(_) => ErrorKind::Unknown,
    }
}

/// Never fails: whatever went wrong, there is a message to show
pub fn normalize(e: RemoteError) -> NormalizedError {
    let kind = classify(&e);
    let (status, code, message) = match &e {
        RemoteError::Status { status, body } => {
            let message = first_string(body.as_ref(), MESSAGE_KEYS)
                .or_else(|| status_phrase(*status).map(String::from))
                .unwrap_or_else(|| e.to_string());
            (Some(*status), first_string(body.as_ref(), CODE_KEYS), message)
        }
        RemoteError::Transport { code, message } => {
            let message = match message.is_empty() {
                true => String::from(FALLBACK_MESSAGE),
                false => message.clone(),
            };
            (None, code.clone(), message)
        }
        RemoteError::Other(_) => (None, None, String::from(FALLBACK_MESSAGE)),
    };
    NormalizedError {
        kind,
        status,
        code,
        message,
        raw: Arc::new(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Error as ApiError;
    use serde_json::json;

    fn status(status: u16, body: Option<serde_json::Value>) -> RemoteError {
        RemoteError::Status { status, body }
    }

    #[test]
    fn payload_message_wins() {
        let e = normalize(status(
            409,
            Some(json!({ "message": "title already taken", "code": "conflict" })),
        ));
        assert_eq!(e.message, "title already taken");
        assert_eq!(e.code.as_deref(), Some("conflict"));
        assert_eq!(e.kind, ErrorKind::Client);
    }

    #[test]
    fn message_keys_are_tried_in_order() {
        let e = normalize(status(400, Some(json!({ "message": "", "detail": "bad title" }))));
        assert_eq!(e.message, "bad title");
        let e = normalize(status(400, Some(json!({ "error": "nope", "detail": "bad" }))));
        assert_eq!(e.message, "nope");
        assert_eq!(e.code.as_deref(), Some("nope"));
    }

    #[test]
    fn status_phrases() {
        for (code, phrase) in [
            (400, "Invalid request"),
            (401, "Unauthorized"),
            (403, "Access denied"),
            (404, "Not found"),
            (500, "Server error"),
            (503, "Server error"),
        ] {
            let e = normalize(status(code, Some(json!("not an object"))));
            assert_eq!(e.message, phrase, "status {code}");
            assert_eq!(e.status, Some(code));
        }
    }

    #[test]
    fn unknown_status_without_payload_uses_transport_message() {
        let e = normalize(status(418, None));
        assert_eq!(e.message, "request failed with status code 418");
        assert_eq!(e.kind, ErrorKind::Client);
        assert!(!e.kind.is_retryable());
    }

    #[test]
    fn transport_and_fallback() {
        let e = normalize(RemoteError::Transport {
            code: Some(String::from("ECONNREFUSED")),
            message: String::from("network unreachable"),
        });
        assert_eq!(e.message, "network unreachable");
        assert_eq!(e.code.as_deref(), Some("ECONNREFUSED"));
        assert_eq!(e.kind, ErrorKind::Transport);
        assert!(e.kind.is_retryable());

        let e = normalize(RemoteError::transport(""));
        assert_eq!(e.message, FALLBACK_MESSAGE);

        let e = normalize(RemoteError::Other(anyhow::anyhow!("garbled json")));
        assert_eq!(e.message, FALLBACK_MESSAGE);
        assert_eq!(e.kind, ErrorKind::Unknown);
        assert_eq!(e.status, None);
    }

    #[test]
    fn api_errors_normalize_through_their_contents() {
        let e = normalize(ApiError::NotFound(String::from("post 3")).into());
        assert!(e.is_not_found());
        assert_eq!(e.message, "post 3 does not exist");
        assert_eq!(e.code.as_deref(), Some("not-found"));

        let e = normalize(ApiError::Unauthorized.into());
        assert_eq!(e.message, "Unauthorized");

        let e = normalize(ApiError::Unknown(String::from("db down")).into());
        assert_eq!(e.kind, ErrorKind::Server);
        assert_eq!(e.message, "db down");
    }
}
