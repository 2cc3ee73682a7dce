//! Execution contexts
//!
//! A session always has exactly one active context: the native app or one of
//! the webviews the web backend has discovered. The registry re-enumerates
//! webviews on every list and before every switch, since a webview can close
//! (or attach late) at any time.

use serde::Serialize;
use std::sync::{Arc, RwLock};
use thiserror::Error;

use crate::driver::traits::{WebBackend, WebPage};
use crate::driver::BackendError;

/// Reserved id of the native context
pub const NATIVE_CONTEXT: &str = "NATIVE_APP";

/// Prefix of discovered webview context ids
pub const WEBVIEW_PREFIX: &str = "WEBVIEW_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ContextKind {
    Native,
    Web,
}

/// An addressable execution target
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub id: String,
    pub kind: ContextKind,
    /// Web backend page id (webviews only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl ExecutionContext {
    pub fn native() -> Self {
        Self {
            id: NATIVE_CONTEXT.to_string(),
            kind: ContextKind::Native,
            page_id: None,
            title: None,
            url: None,
        }
    }

    pub fn webview(page: &WebPage) -> Self {
        Self {
            id: format!("{}{}", WEBVIEW_PREFIX, page.id),
            kind: ContextKind::Web,
            page_id: Some(page.id.clone()),
            title: Some(page.title.clone()),
            url: Some(page.url.clone()),
        }
    }

    pub fn is_native(&self) -> bool {
        self.kind == ContextKind::Native
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ContextError {
    #[error("unknown context '{0}'")]
    Unknown(String),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Tracks available contexts and the active one
pub struct ContextRegistry {
    web: Option<Arc<dyn WebBackend>>,
    /// Snapshot of the active context; read without the session lane
    current: RwLock<ExecutionContext>,
}

impl ContextRegistry {
    pub fn new(web: Option<Arc<dyn WebBackend>>) -> Self {
        Self {
            web,
            current: RwLock::new(ExecutionContext::native()),
        }
    }

    /// Enumerate contexts: native first, then webviews in discovery order
    pub async fn list(&self) -> Result<Vec<ExecutionContext>, BackendError> {
        let mut contexts = vec![ExecutionContext::native()];
        if let Some(web) = &self.web {
            let pages = web.pages().await.map_err(BackendError::web_side)?;
            contexts.extend(pages.iter().map(ExecutionContext::webview));
        }
        Ok(contexts)
    }

    /// The active context
    pub fn current(&self) -> ExecutionContext {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn publish(&self, context: ExecutionContext) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = context;
    }

    /// Make `id` the active context
    ///
    /// Callers must hold the session lane. The new context is published only
    /// once the web backend is attached to it; if attaching fails the session
    /// falls back to the native context.
    pub async fn switch(&self, id: &str) -> Result<ExecutionContext, ContextError> {
        let previous = self.current();
        if id == NATIVE_CONTEXT {
            if !previous.is_native() {
                if let Some(web) = &self.web {
                    web.detach().await.map_err(BackendError::web_side)?;
                }
                self.publish(ExecutionContext::native());
            }
            return Ok(ExecutionContext::native());
        }

        let web = self
            .web
            .as_ref()
            .ok_or_else(|| ContextError::Unknown(id.to_string()))?;

        let target = self
            .list()
            .await?
            .into_iter()
            .find(|ctx| ctx.id == id)
            .ok_or_else(|| ContextError::Unknown(id.to_string()))?;

        let page_id = target.page_id.clone().unwrap_or_default();
        if let Err(err) = web.attach(&page_id).await {
            log::warn!("Failed to attach to {}: {}", id, err);
            self.publish(ExecutionContext::native());
            return Err(match err.web_side() {
                BackendError::PageClosed(_) => ContextError::Unknown(id.to_string()),
                other => ContextError::Backend(other),
            });
        }

        self.publish(target.clone());
        Ok(target)
    }

    /// Detach from any webview and return to the native context
    pub async fn reset(&self) -> Result<(), BackendError> {
        let was_native = self.current().is_native();
        self.publish(ExecutionContext::native());
        match (&self.web, was_native) {
            (Some(web), false) => web.detach().await.map_err(BackendError::web_side),
            _ => Ok(()),
        }
    }
}
