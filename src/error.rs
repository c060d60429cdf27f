//! Error taxonomy for the control plane
//!
//! Every failure a caller can see is one of these variants; the HTTP layer
//! maps them onto status codes and the lifecycle controller uses
//! `is_retryable` to decide whether a runtime call may be re-issued.

use hyper::StatusCode;
use thiserror::Error;

/// Errors surfaced by the registry, lifecycle controller and runtime adapter
#[derive(Debug, Error)]
pub enum ControlError {
    /// The container engine endpoint is unreachable or returned a server
    /// error. Transient: callers may retry with backoff.
    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// The runtime rejected the request because of a port or name
    /// collision. Not retryable; the caller must change its input.
    #[error("container runtime conflict: {0}")]
    RuntimeConflict(String),

    /// The referenced container no longer exists. Triggers registry
    /// reconciliation to Removed rather than a hard failure.
    #[error("container not found: {0}")]
    RuntimeNotFound(String),

    /// A server with this name already exists.
    #[error("server name already in use: {0}")]
    DuplicateName(String),

    /// No free port pair remains in the configured range.
    #[error("no free port pair in the configured range")]
    PortExhausted,

    /// Another lifecycle operation for this server is still in flight.
    #[error("operation already in progress for server {0}")]
    OperationInProgress(String),

    /// No managed server with this id.
    #[error("unknown server: {0}")]
    UnknownServer(String),

    /// The requested transition is not valid from the server's current state.
    #[error("invalid transition for server {id}: {reason}")]
    InvalidTransition { id: String, reason: String },

    /// Writing or reloading the proxy configuration failed after retries.
    /// The previously applied config remains in effect.
    #[error("proxy config apply failed: {0}")]
    ProxyApplyFailed(String),

    /// Persistence layer failure.
    #[error("store error: {0}")]
    Store(String),
}

impl ControlError {
    /// Whether the operation that produced this error may be retried as-is
    pub fn is_retryable(&self) -> bool {
        matches!(self, ControlError::RuntimeUnavailable(_))
    }

    /// HTTP status code for the control API
    pub fn status_code(&self) -> StatusCode {
        match self {
            ControlError::RuntimeUnavailable(_) => StatusCode::BAD_GATEWAY,
            ControlError::RuntimeConflict(_) => StatusCode::CONFLICT,
            ControlError::RuntimeNotFound(_) => StatusCode::NOT_FOUND,
            ControlError::DuplicateName(_) => StatusCode::CONFLICT,
            ControlError::PortExhausted => StatusCode::CONFLICT,
            ControlError::OperationInProgress(_) => StatusCode::CONFLICT,
            ControlError::UnknownServer(_) => StatusCode::NOT_FOUND,
            ControlError::InvalidTransition { .. } => StatusCode::CONFLICT,
            ControlError::ProxyApplyFailed(_) => StatusCode::BAD_GATEWAY,
            ControlError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<rusqlite::Error> for ControlError {
    fn from(e: rusqlite::Error) -> Self {
        ControlError::Store(e.to_string())
    }
}

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, ControlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unavailable_is_retryable() {
        assert!(ControlError::RuntimeUnavailable("down".into()).is_retryable());
        assert!(!ControlError::RuntimeConflict("port".into()).is_retryable());
        assert!(!ControlError::PortExhausted.is_retryable());
        assert!(!ControlError::OperationInProgress("a".into()).is_retryable());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ControlError::DuplicateName("alpha".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ControlError::UnknownServer("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ControlError::OperationInProgress("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ControlError::RuntimeUnavailable("down".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }
}
