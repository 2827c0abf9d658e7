//! Error kinds shared by every layer of the fleet engine.
//!
//! Errors fall into two families. Configuration-resolution errors ([ErrorKind::MalformedCredential],
//! [ErrorKind::UnknownEnvironment], [ErrorKind::UnknownHost], [ErrorKind::CredentialCount]) are
//! caller mistakes and stop an invocation before anything is dispatched. Everything else is a
//! per-target condition, carried as a [Failure] inside that target's [DispatchResult] and never
//! allowed to affect sibling targets.
//!
//! [DispatchResult]: crate::dispatch::DispatchResult

use std::fmt::{self, Display};
use thiserror::Error;

/// The closed set of error classifications.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MalformedCredential,
    UnknownEnvironment,
    UnknownHost,
    CredentialCount,
    ConnectError,
    AuthenticationError,
    CommandError,
    SubmissionFailed,
    JobFailed,
    ArtifactRetrievalFailed,
    TimedOut,
    Cancelled,

    /// The operation panicked. The panic was caught at the per-target boundary.
    Faulted,
}

impl ErrorKind {
    /// Returns whether this kind is a caller mistake that aborts before dispatch.
    pub fn is_configuration_error(self) -> bool {
        use ErrorKind::*;
        matches!(
            self,
            MalformedCredential | UnknownEnvironment | UnknownHost | CredentialCount
        )
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The terminal failure of one target's operation.
///
/// Messages must never contain a credential secret. Only usernames may appear in diagnostics.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Failure {
            kind,
            message: message.into(),
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }
}

/// Errors raised by an appliance session (the external collaborator).
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("could not connect to {address}: {reason}")]
    Connect { address: String, reason: String },

    #[error("authentication failed for user {username}: {reason}")]
    Authentication { username: String, reason: String },

    #[error("{0}")]
    Command(String),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Connect { .. } => ErrorKind::ConnectError,
            SessionError::Authentication { .. } => ErrorKind::AuthenticationError,
            SessionError::Command(_) => ErrorKind::CommandError,
        }
    }
}

impl From<SessionError> for Failure {
    fn from(error: SessionError) -> Self {
        Failure::new(error.kind(), error.to_string())
    }
}
