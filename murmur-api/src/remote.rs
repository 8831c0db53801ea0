use crate::Error;

/// Any way a call to the remote service can fail
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// The service answered with a non-success status
    #[error("request failed with status code {status}")]
    Status {
        status: u16,
        /// Response body, if it was valid JSON
        body: Option<serde_json::Value>,
    },

    /// No response reached us
    #[error("{message}")]
    Transport {
        code: Option<String>,
        message: String,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RemoteError {
    pub fn transport(message: impl Into<String>) -> RemoteError {
        RemoteError::Transport {
            code: None,
            message: message.into(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<Error> for RemoteError {
    fn from(e: Error) -> RemoteError {
        RemoteError::Status {
            status: e.status_code().as_u16(),
            body: Some(e.contents()),
        }
    }
}
