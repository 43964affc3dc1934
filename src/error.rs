//! Error types for coach-context

use thiserror::Error;

/// Result type for session and compaction operations
pub type Result<T> = std::result::Result<T, CoachError>;

/// Classifies a completion-service failure for caller-level retry decisions.
///
/// The core surfaces both kinds through the same error variant; only the
/// caller's retry policy should care about the distinction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorKind {
    /// Network or rate-limit failure; the same request may succeed later.
    Transient,
    /// The request itself was rejected; retrying will not help.
    Permanent,
}

/// Errors that can occur during session management
#[derive(Error, Debug)]
pub enum CoachError {
    #[error("invalid message role: {0}")]
    InvalidRole(String),

    #[error("message content must not be empty")]
    EmptyContent,

    #[error("completion service error ({kind:?}): {message}")]
    Service {
        kind: ServiceErrorKind,
        message: String,
    },

    #[error("session {0} has a completion call in flight")]
    SessionBusy(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session already active for key: {0}")]
    SessionAlreadyActive(String),

    #[error("session {0} already ended")]
    AlreadyEnded(String),

    #[error("session {0} is not active")]
    SessionEnded(String),
}

impl CoachError {
    /// True for a completion-service failure worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Service {
                kind: ServiceErrorKind::Transient,
                ..
            }
        )
    }
}
