pub mod adapter;
pub mod ios;
pub mod logs;
pub mod sim;
pub mod traits;
pub mod web;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use logs::LogBuffer;
use traits::{NativeBackend, WebBackend};

/// Failure reported by a backend
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    /// The backend could not be reached; the session cannot continue
    #[error("transport failure: {0}")]
    Transport(String),

    /// A lookup found nothing (recoverable)
    #[error("no such element: {0}")]
    NoSuchElement(String),

    /// The attached webview page went away
    #[error("page {0} is closed")]
    PageClosed(String),

    /// The backend understood the request and refused it
    #[error("rejected: {0}")]
    Rejected(String),
}

impl BackendError {
    /// Demote transport loss on the web inspector side
    ///
    /// The native backend still carries the session, so losing the debug
    /// proxy fails the command without ending the session.
    pub fn web_side(self) -> Self {
        match self {
            BackendError::Transport(msg) => {
                BackendError::Rejected(format!("web inspector unreachable: {}", msg))
            }
            other => other,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        BackendError::Transport(err.to_string())
    }
}

/// The set of collaborators a session drives
#[derive(Clone)]
pub struct Backends {
    pub native: Arc<dyn NativeBackend>,
    pub web: Option<Arc<dyn WebBackend>>,
    pub logs: LogBuffer,
}

/// Produces a fresh, independent set of backends for each new session
#[async_trait]
pub trait BackendFactory: Send + Sync {
    async fn connect(&self) -> Result<Backends, BackendError>;
}
