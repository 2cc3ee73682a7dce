//! Driver error taxonomy
//!
//! Every failure surfaced to callers is a [`DriverError`]: the command that
//! failed plus an [`ErrorKind`]. Backend-level failures ([`BackendError`]) are
//! translated here so transport loss, lookup misses and rejections stay
//! distinguishable all the way to the wire.

use thiserror::Error;

use crate::driver::BackendError;
use crate::session::command::CommandName;

/// What went wrong, independent of which command hit it
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ErrorKind {
    #[error("capability mismatch: {0}")]
    CapabilityMismatch(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("session has ended")]
    SessionEnded,

    #[error("no such element ({locator}): {cause}")]
    NoSuchElement { locator: String, cause: String },

    #[error("unknown context: {0}")]
    UnknownContext(String),

    #[error("command is not supported in context '{context}'")]
    UnsupportedInContext { context: String },

    #[error("unknown log kind '{0}'")]
    UnknownLogKind(String),

    #[error("unsupported orientation '{0}'")]
    UnsupportedOrientation(String),

    #[error("Currently only getting current window size is supported (requested '{0}')")]
    InvalidWindowTarget(String),

    #[error("Method has not yet been implemented")]
    NotImplemented,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("command failed: {0}")]
    CommandFailed(String),
}

/// A failed command
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{command}: {kind}")]
pub struct DriverError {
    pub command: CommandName,
    pub kind: ErrorKind,
}

impl DriverError {
    pub fn new(command: CommandName, kind: ErrorKind) -> Self {
        Self { command, kind }
    }

    pub fn session_ended(command: CommandName) -> Self {
        Self::new(command, ErrorKind::SessionEnded)
    }

    pub fn not_implemented(command: CommandName) -> Self {
        Self::new(command, ErrorKind::NotImplemented)
    }

    pub fn invalid_argument(command: CommandName, message: impl Into<String>) -> Self {
        Self::new(command, ErrorKind::InvalidArgument(message.into()))
    }

    /// Translate a backend failure for `command`.
    ///
    /// `locator` is only used for lookup misses, so the final error names what
    /// was being searched for alongside the backend's own explanation.
    pub fn from_backend(command: CommandName, locator: Option<String>, err: BackendError) -> Self {
        let kind = match err {
            BackendError::Transport(msg) => ErrorKind::BackendUnavailable(msg),
            BackendError::NoSuchElement(cause) => ErrorKind::NoSuchElement {
                locator: locator.unwrap_or_default(),
                cause,
            },
            BackendError::PageClosed(page) => ErrorKind::UnknownContext(page),
            BackendError::Rejected(msg) => ErrorKind::CommandFailed(msg),
        };
        Self::new(command, kind)
    }

    /// Fatal errors terminate the owning session
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind, ErrorKind::BackendUnavailable(_))
    }

    /// W3C-style error code string used on the wire
    pub fn wire_code(&self) -> &'static str {
        match self.kind {
            ErrorKind::CapabilityMismatch(_) => "session not created",
            ErrorKind::BackendUnavailable(_) => "unknown error",
            ErrorKind::SessionEnded => "invalid session id",
            ErrorKind::NoSuchElement { .. } => "no such element",
            ErrorKind::UnknownContext(_) => "no such context",
            ErrorKind::UnsupportedInContext { .. } => "unsupported operation",
            ErrorKind::UnknownLogKind(_)
            | ErrorKind::UnsupportedOrientation(_)
            | ErrorKind::InvalidWindowTarget(_)
            | ErrorKind::InvalidArgument(_) => "invalid argument",
            ErrorKind::NotImplemented => "unknown method",
            ErrorKind::CommandFailed(_) => "unknown error",
        }
    }

    /// Numeric status of the legacy JSON wire protocol
    pub fn legacy_status(&self) -> u32 {
        match self.kind {
            ErrorKind::NoSuchElement { .. } => 7,
            ErrorKind::SessionEnded => 6,
            ErrorKind::UnknownContext(_) => 35,
            ErrorKind::CapabilityMismatch(_) => 33,
            ErrorKind::NotImplemented => 405,
            _ => 13,
        }
    }

    /// HTTP status for the front end
    pub fn http_status(&self) -> u16 {
        match self.kind {
            ErrorKind::NoSuchElement { .. }
            | ErrorKind::SessionEnded
            | ErrorKind::UnknownContext(_) => 404,
            ErrorKind::UnsupportedInContext { .. }
            | ErrorKind::UnknownLogKind(_)
            | ErrorKind::UnsupportedOrientation(_)
            | ErrorKind::InvalidWindowTarget(_)
            | ErrorKind::InvalidArgument(_) => 400,
            ErrorKind::NotImplemented => 501,
            ErrorKind::CapabilityMismatch(_)
            | ErrorKind::BackendUnavailable(_)
            | ErrorKind::CommandFailed(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_miss_keeps_cause() {
        let err = DriverError::from_backend(
            CommandName::FindElement,
            Some("accessibility id=WrongLocator".to_string()),
            BackendError::NoSuchElement("nothing matched after 3 scans".to_string()),
        );
        assert_eq!(err.legacy_status(), 7);
        assert!(!err.is_fatal());
        let text = err.to_string();
        assert!(text.starts_with("findElement"));
        assert!(text.contains("WrongLocator"));
        assert!(text.contains("nothing matched after 3 scans"));
    }

    #[test]
    fn test_transport_loss_is_fatal() {
        let err = DriverError::from_backend(
            CommandName::GetSource,
            None,
            BackendError::Transport("connection refused".to_string()),
        );
        assert!(err.is_fatal());
        assert_eq!(err.kind, ErrorKind::BackendUnavailable("connection refused".into()));
    }

    #[test]
    fn test_stub_messages() {
        let err = DriverError::not_implemented(CommandName::Shake);
        assert!(err.to_string().contains("Method has not yet been implemented"));
        assert_eq!(err.http_status(), 501);

        let err = DriverError::new(
            CommandName::GetWindowSize,
            ErrorKind::InvalidWindowTarget("something-random".into()),
        );
        assert!(err
            .to_string()
            .contains("Currently only getting current window size is supported"));
    }
}
