//! Web inspector client
//!
//! Talks to a WebKit remote debugging proxy (ios-webkit-debug-proxy style):
//! pages are listed over HTTP at `/json`, and each page exposes a websocket
//! that accepts `Runtime.evaluate`. Everything else the web backend offers is
//! built on script evaluation.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::driver::traits::{WebBackend, WebPage};
use crate::driver::BackendError;

/// Default port of the debug proxy
pub const DEFAULT_INSPECTOR_PORT: u16 = 27753;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One entry of the proxy's `/json` listing
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageEntry {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    web_socket_debugger_url: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

impl PageEntry {
    /// Explicit id, else the last segment of the debugger url
    fn page_id(&self) -> Option<String> {
        self.id.clone().or_else(|| {
            self.web_socket_debugger_url
                .as_deref()
                .and_then(|ws| ws.rsplit('/').next())
                .filter(|id| !id.is_empty())
                .map(str::to_string)
        })
    }

    fn is_page(&self) -> bool {
        self.web_socket_debugger_url.is_some()
            && self.kind.as_deref().map_or(true, |kind| kind == "page")
    }
}

struct Attachment {
    page_id: String,
    socket: Socket,
}

pub struct InspectorClient {
    base_url: String,
    http: reqwest::Client,
    timeout: Duration,
    attached: Mutex<Option<Attachment>>,
    next_id: AtomicU64,
}

impl InspectorClient {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Transport(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            base_url: format!("http://{}:{}", host, port),
            http,
            timeout,
            attached: Mutex::new(None),
            next_id: AtomicU64::new(1),
        })
    }

    async fn entries(&self) -> Result<Vec<PageEntry>, BackendError> {
        let url = format!("{}/json", self.base_url);
        let entries: Vec<PageEntry> = self
            .http
            .get(&url)
            .send()
            .await?
            .json()
            .await
            .map_err(|e| BackendError::Rejected(format!("unreadable page list: {}", e)))?;
        Ok(entries.into_iter().filter(PageEntry::is_page).collect())
    }

    /// Send one protocol message and wait for its reply
    async fn send(&self, attachment: &mut Attachment, method: &str, params: Value) -> Result<Value, BackendError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let message = json!({ "id": id, "method": method, "params": params });
        let page_id = attachment.page_id.clone();
        let closed = |_| BackendError::PageClosed(page_id.clone());

        attachment
            .socket
            .send(Message::Text(message.to_string()))
            .await
            .map_err(closed)?;

        let reply = tokio::time::timeout(self.timeout, async {
            while let Some(frame) = attachment.socket.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) | Err(_) => break,
                    // events and keepalives
                    Ok(_) => continue,
                };
                let Ok(reply) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };
                if reply.get("id").and_then(Value::as_u64) == Some(id) {
                    return Some(reply);
                }
            }
            None
        })
        .await
        .map_err(|_| BackendError::Rejected(format!("{} timed out after {:?}", method, self.timeout)))?;

        let reply = reply.ok_or_else(|| BackendError::PageClosed(page_id.clone()))?;
        if let Some(error) = reply.get("error") {
            return Err(BackendError::Rejected(format!("{} failed: {}", method, error)));
        }
        Ok(reply.get("result").cloned().unwrap_or(Value::Null))
    }
}

/// Wrap a WebDriver-style script body so `arguments` holds `args`
fn evaluation(script: &str, args: &[Value]) -> Result<String, BackendError> {
    let args = serde_json::to_string(args).map_err(|e| BackendError::Rejected(e.to_string()))?;
    Ok(format!("(function() {{ {} }}).apply(null, {})", script, args))
}

/// Pull the returned value (or the thrown exception) out of an evaluate result
fn evaluated(result: Value) -> Result<Value, BackendError> {
    if let Some(details) = result.get("exceptionDetails") {
        let text = details
            .pointer("/exception/description")
            .or_else(|| details.get("text"))
            .and_then(Value::as_str)
            .unwrap_or("script threw an exception");
        return Err(BackendError::Rejected(text.to_string()));
    }
    Ok(result
        .pointer("/result/value")
        .cloned()
        .unwrap_or(Value::Null))
}

#[async_trait]
impl WebBackend for InspectorClient {
    async fn pages(&self) -> Result<Vec<WebPage>, BackendError> {
        Ok(self
            .entries()
            .await?
            .into_iter()
            .filter_map(|entry| {
                Some(WebPage {
                    id: entry.page_id()?,
                    title: entry.title,
                    url: entry.url,
                })
            })
            .collect())
    }

    async fn attach(&self, page_id: &str) -> Result<(), BackendError> {
        let entry = self
            .entries()
            .await?
            .into_iter()
            .find(|entry| entry.page_id().as_deref() == Some(page_id))
            .ok_or_else(|| BackendError::PageClosed(page_id.to_string()))?;
        let ws_url = entry
            .web_socket_debugger_url
            .ok_or_else(|| BackendError::PageClosed(page_id.to_string()))?;

        self.detach().await?;
        let (socket, _) = connect_async(ws_url.as_str())
            .await
            .map_err(|e| {
                log::warn!("Failed to open inspector socket {}: {}", ws_url, e);
                BackendError::PageClosed(page_id.to_string())
            })?;
        log::debug!("Attached to webview page {}", page_id);

        *self.attached.lock().await = Some(Attachment {
            page_id: page_id.to_string(),
            socket,
        });
        Ok(())
    }

    async fn detach(&self) -> Result<(), BackendError> {
        if let Some(mut previous) = self.attached.lock().await.take() {
            // the page may already be gone
            let _ = previous.socket.close(None).await;
        }
        Ok(())
    }

    async fn execute_script(&self, script: &str, args: &[Value]) -> Result<Value, BackendError> {
        let expression = evaluation(script, args)?;
        let mut attached = self.attached.lock().await;
        let attachment = attached
            .as_mut()
            .ok_or_else(|| BackendError::Rejected("not attached to a webview".to_string()))?;

        let result = self
            .send(
                attachment,
                "Runtime.evaluate",
                json!({ "expression": expression, "returnByValue": true }),
            )
            .await;
        if let Err(BackendError::PageClosed(_)) = &result {
            attached.take();
        }
        evaluated(result?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_entries() {
        let entries: Vec<PageEntry> = serde_json::from_value(json!([
            {
                "devtoolsFrontendUrl": "",
                "title": "I am a page title",
                "url": "http://localhost:4994/test/guinea-pig",
                "webSocketDebuggerUrl": "ws://localhost:27753/devtools/page/3"
            },
            { "title": "detached", "url": "about:blank" },
            {
                "id": "sw",
                "type": "service_worker",
                "url": "http://localhost/sw.js",
                "webSocketDebuggerUrl": "ws://localhost:27753/devtools/page/4"
            }
        ]))
        .unwrap();

        let pages: Vec<_> = entries.into_iter().filter(PageEntry::is_page).collect();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].page_id().as_deref(), Some("3"));
    }

    #[test]
    fn test_evaluation_wraps_arguments() {
        let expr = evaluation("return arguments[0] + 1;", &[json!(41)]).unwrap();
        assert_eq!(expr, "(function() { return arguments[0] + 1; }).apply(null, [41])");
    }

    #[test]
    fn test_evaluated_values_and_exceptions() {
        let ok = evaluated(json!({"result": {"type": "string", "value": "I am a page title"}})).unwrap();
        assert_eq!(ok, "I am a page title");

        let undefined = evaluated(json!({"result": {"type": "undefined"}})).unwrap();
        assert_eq!(undefined, Value::Null);

        let err = evaluated(json!({
            "result": {"type": "object"},
            "exceptionDetails": {"text": "Uncaught", "exception": {"description": "ReferenceError: nope"}}
        }))
        .unwrap_err();
        assert_eq!(err, BackendError::Rejected("ReferenceError: nope".to_string()));
    }
}
