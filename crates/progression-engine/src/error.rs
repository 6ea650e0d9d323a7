//! Error types for progression-engine.

use thiserror::Error;

use crate::model::SessionId;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by a [`Store`](crate::Store) backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not complete the write or read.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A persisted record could not be decoded.
    #[error("corrupt record '{key}': {reason}")]
    Corrupt { key: String, reason: String },
}

/// Coarse error class, used by callers to decide how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input. Rejected, no state change.
    Validation,
    /// Valid input in the wrong state. Rejected, no state change.
    Conflict,
    /// Referenced entity does not exist.
    NotFound,
    /// Storage failure. Nothing was applied; retry is safe.
    Transient,
}

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("option index {index} out of range (session has {options} options)")]
    InvalidOption { index: usize, options: usize },

    #[error("invalid level {level} for node '{node_key}' (max level {max_level})")]
    InvalidLevel {
        node_key: String,
        level: u32,
        max_level: u32,
    },

    #[error("invalid engagement: {0}")]
    InvalidEngagement(String),

    #[error("node '{0}' is not an eligible vote candidate")]
    IneligibleCandidate(String),

    #[error("voter identity could not be resolved")]
    UnknownIdentity,

    #[error("'{voter}' already voted in session {session_id}")]
    AlreadyVoted {
        session_id: SessionId,
        voter: String,
    },

    #[error("voting session {0} is not open")]
    SessionClosed(SessionId),

    #[error("voting session {0} is already open")]
    SessionAlreadyOpen(SessionId),

    #[error("a target is already in progress: '{0}'")]
    TargetInProgress(String),

    #[error("node '{0}' is already at max level")]
    AlreadyAtMaxLevel(String),

    #[error("no nodes are eligible for unlock")]
    NoEligibleNodes,

    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("no active progress for '{0}'")]
    NoActiveProgress(String),

    #[error("no voting session is open")]
    NoActiveSession,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidOption { .. }
            | Error::InvalidLevel { .. }
            | Error::InvalidEngagement(_)
            | Error::IneligibleCandidate(_)
            | Error::UnknownIdentity => ErrorKind::Validation,
            Error::AlreadyVoted { .. }
            | Error::SessionClosed(_)
            | Error::SessionAlreadyOpen(_)
            | Error::TargetInProgress(_)
            | Error::AlreadyAtMaxLevel(_)
            | Error::NoEligibleNodes => ErrorKind::Conflict,
            Error::NodeNotFound(_) | Error::NoActiveProgress(_) | Error::NoActiveSession => {
                ErrorKind::NotFound
            }
            Error::Store(_) => ErrorKind::Transient,
        }
    }

    /// Whether the same call may succeed if simply retried.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(
            Error::InvalidOption {
                index: 3,
                options: 2
            }
            .kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            Error::AlreadyVoted {
                session_id: SessionId(1),
                voter: "u1".into()
            }
            .kind(),
            ErrorKind::Conflict
        );
        assert_eq!(Error::NodeNotFound("x".into()).kind(), ErrorKind::NotFound);
        let store = Error::from(StoreError::Unavailable("disk".into()));
        assert_eq!(store.kind(), ErrorKind::Transient);
        assert!(store.is_retryable());
        assert!(!Error::NoEligibleNodes.is_retryable());
    }
}
