use kindred_types::events::ErrorCode;
use thiserror::Error;

/// Failure taxonomy shared by every service. REST maps it to a status code,
/// the gateway to a `CommandError` event.
#[derive(Debug, Error)]
pub enum KindredError {
    /// Missing or malformed input.
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    /// The actor is not allowed to touch the resource.
    #[error("{0}")]
    Forbidden(String),

    /// The request is well-formed but the resource is in the wrong state.
    #[error("{0}")]
    StateConflict(String),

    /// A collaborator (push service) failed.
    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, KindredError>;

impl KindredError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::StateConflict(msg.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) => ErrorCode::Validation,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Forbidden(_) => ErrorCode::Forbidden,
            Self::StateConflict(_) => ErrorCode::StateConflict,
            Self::Upstream(_) => ErrorCode::Upstream,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Message safe to show a client. Internal details stay in the logs.
    pub fn public_reason(&self) -> String {
        match self {
            Self::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}
