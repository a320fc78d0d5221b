use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unavailable,
    Validation,
    NotFound,
    Internal,
}

/// Error payload returned to HTTP callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Failures visible to a direct command submitter. Fire-and-forget callers
/// never observe these; the bridge logs and drops the command instead.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BridgeError {
    #[error("physical link is not connected")]
    LinkUnavailable,
    #[error("write to physical link failed: {0}")]
    WriteFailure(String),
    #[error("bridge has shut down")]
    Closed,
}

impl From<BridgeError> for ApiError {
    fn from(error: BridgeError) -> Self {
        let code = match error {
            BridgeError::LinkUnavailable => ErrorCode::Unavailable,
            BridgeError::WriteFailure(_) | BridgeError::Closed => ErrorCode::Internal,
        };
        ApiError::new(code, error.to_string())
    }
}
