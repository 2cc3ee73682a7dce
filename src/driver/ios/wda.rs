//! WebDriverAgent (WDA) HTTP Client
//!
//! Native backend for real iOS devices and simulators: WDA runs next to the
//! app under test (port 8100 by default) and drives it through XCTest.

use async_trait::async_trait;
use base64::Engine;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::RwLock;
use std::time::Duration;

use crate::driver::traits::{NativeBackend, NativeRequest, NativeResponse};
use crate::driver::BackendError;

/// Default WDA port
pub const DEFAULT_WDA_PORT: u16 = 8100;

/// Legacy JSON wire status for a lookup miss
const STATUS_NO_SUCH_ELEMENT: i64 = 7;

/// WDA HTTP client
pub struct WdaClient {
    /// Base URL for WDA (e.g., "http://localhost:8100")
    base_url: String,
    client: reqwest::Client,
    /// Current session ID
    session_id: RwLock<Option<String>>,
}

/// Every WDA reply is wrapped in this envelope
#[derive(Debug, Deserialize)]
struct WdaResponse {
    #[serde(default)]
    value: Value,
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
    /// Legacy numeric status; absent or 0 on success
    status: Option<i64>,
}

impl WdaClient {
    /// Create a client for WDA at `host:port`
    pub fn new(host: &str, port: u16, timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Transport(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: format!("http://{}:{}", host, port),
            client,
            session_id: RwLock::new(None),
        })
    }

    fn session_path(&self, suffix: &str) -> Result<String, BackendError> {
        let session = self.session_id.read().unwrap_or_else(|e| e.into_inner());
        let id = session
            .as_deref()
            .ok_or_else(|| BackendError::Rejected("no active WDA session".to_string()))?;
        Ok(format!("/session/{}{}", id, suffix))
    }

    async fn call(&self, method: Method, path: &str, body: Option<Value>) -> Result<WdaResponse, BackendError> {
        let url = format!("{}{}", self.base_url, path);
        log::debug!("WDA {} {}", method, path);

        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let text = request.send().await?.text().await?;
        let envelope: WdaResponse = serde_json::from_str(&text).map_err(|e| {
            BackendError::Rejected(format!("unreadable WDA response from {}: {}", path, e))
        })?;
        check(envelope)
    }

    async fn session_call(&self, method: Method, suffix: &str, body: Option<Value>) -> Result<Value, BackendError> {
        let path = self.session_path(suffix)?;
        Ok(self.call(method, &path, body).await?.value)
    }

    async fn element_call(
        &self,
        method: Method,
        request: &NativeRequest,
        action: &str,
        body: Option<Value>,
    ) -> Result<Value, BackendError> {
        let element = request.param_str("element")?;
        self.session_call(method, &format!("/element/{}/{}", element, action), body)
            .await
    }

    async fn gesture(&self, gesture: &str, args: &Value) -> Result<NativeResponse, BackendError> {
        let element = args
            .get("element")
            .and_then(|el| el.get("ELEMENT").or(Some(el)))
            .and_then(Value::as_str)
            .unwrap_or("0");
        self.session_call(
            Method::POST,
            &format!("/wda/element/{}/{}", element, gesture),
            Some(args.clone()),
        )
        .await?;
        Ok(NativeResponse::Ack)
    }
}

/// Turn an error envelope into a [`BackendError`]
fn check(envelope: WdaResponse) -> Result<WdaResponse, BackendError> {
    let error = envelope.value.get("error").and_then(Value::as_str);
    let status = envelope.status.unwrap_or(0);
    if error.is_none() && status == 0 {
        return Ok(envelope);
    }

    let message = envelope
        .value
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| envelope.value.to_string());
    if error == Some("no such element") || status == STATUS_NO_SUCH_ELEMENT {
        return Err(BackendError::NoSuchElement(message));
    }
    Err(BackendError::Rejected(match error {
        Some(error) => format!("{}: {}", error, message),
        None => format!("status {}: {}", status, message),
    }))
}

#[async_trait]
impl NativeBackend for WdaClient {
    fn name(&self) -> &str {
        "wda"
    }

    async fn status(&self) -> Result<Value, BackendError> {
        Ok(self.call(Method::GET, "/status", None).await?.value)
    }

    async fn start_session(
        &self,
        requested: &Map<String, Value>,
    ) -> Result<Map<String, Value>, BackendError> {
        let body = json!({ "capabilities": { "alwaysMatch": requested } });
        let response = self.call(Method::POST, "/session", Some(body)).await?;

        let session_id = response
            .session_id
            .clone()
            .or_else(|| {
                response
                    .value
                    .get("sessionId")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .ok_or_else(|| BackendError::Rejected("No session ID in response".to_string()))?;
        *self.session_id.write().unwrap_or_else(|e| e.into_inner()) = Some(session_id);

        let actual = response
            .value
            .get("capabilities")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        Ok(actual)
    }

    async fn delete_session(&self) -> Result<(), BackendError> {
        let id = self
            .session_id
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(id) = id {
            self.call(Method::DELETE, &format!("/session/{}", id), None)
                .await?;
        }
        Ok(())
    }

    async fn request(&self, request: NativeRequest) -> Result<NativeResponse, BackendError> {
        let value = match request.command {
            "findElement" => {
                self.session_call(Method::POST, "/element", Some(request.params.clone()))
                    .await?
            }
            "findElements" => {
                self.session_call(Method::POST, "/elements", Some(request.params.clone()))
                    .await?
            }
            "click" => {
                self.element_call(Method::POST, &request, "click", Some(json!({})))
                    .await?;
                return Ok(NativeResponse::Ack);
            }
            "clear" => {
                self.element_call(Method::POST, &request, "clear", Some(json!({})))
                    .await?;
                return Ok(NativeResponse::Ack);
            }
            "sendKeys" => {
                // WDA expects each character as a separate string in the array
                let chars: Vec<String> = request
                    .param_str("text")?
                    .chars()
                    .map(|c| c.to_string())
                    .collect();
                self.element_call(Method::POST, &request, "value", Some(json!({ "value": chars })))
                    .await?;
                return Ok(NativeResponse::Ack);
            }
            "text" => self.element_call(Method::GET, &request, "text", None).await?,
            "source" => {
                let tree = self.session_call(Method::GET, "/source", None).await?;
                return match tree {
                    Value::String(tree) => Ok(NativeResponse::Tree(tree)),
                    other => Err(BackendError::Rejected(format!("unexpected source payload: {}", other))),
                };
            }
            "screenshot" => {
                let encoded = self.call(Method::GET, "/screenshot", None).await?.value;
                let encoded = encoded.as_str().unwrap_or_default().replace('\n', "");
                let png = base64::engine::general_purpose::STANDARD
                    .decode(encoded)
                    .map_err(|e| BackendError::Rejected(format!("Failed to decode screenshot: {}", e)))?;
                return Ok(NativeResponse::Image(png));
            }
            "getOrientation" => self.session_call(Method::GET, "/orientation", None).await?,
            "setOrientation" => {
                self.session_call(Method::POST, "/orientation", Some(request.params.clone()))
                    .await?;
                return Ok(NativeResponse::Ack);
            }
            "windowSize" => self.session_call(Method::GET, "/window/size", None).await?,
            "deactivateApp" => {
                self.session_call(Method::POST, "/wda/deactivateApp", Some(request.params.clone()))
                    .await?;
                return Ok(NativeResponse::Ack);
            }
            "back" => {
                self.session_call(Method::POST, "/back", Some(json!({})))
                    .await?;
                return Ok(NativeResponse::Ack);
            }
            "scroll" => return self.gesture("scroll", &request.params).await,
            "mobile" => {
                let name = request.param_str("name")?;
                let args = request.params.get("args").cloned().unwrap_or_else(|| json!({}));
                return match name {
                    "scroll" | "swipe" => self.gesture(name, &args).await,
                    other => Ok(NativeResponse::Value(
                        self.session_call(Method::POST, &format!("/wda/{}", other), Some(args))
                            .await?,
                    )),
                };
            }
            other => {
                return Err(BackendError::Rejected(format!(
                    "WDA does not support '{}'",
                    other
                )))
            }
        };
        Ok(NativeResponse::Value(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(raw: Value) -> WdaResponse {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn test_client_with_host() {
        let client = WdaClient::new("192.168.1.100", DEFAULT_WDA_PORT, Duration::from_secs(30)).unwrap();
        assert_eq!(client.base_url, "http://192.168.1.100:8100");
        assert!(client.session_path("/source").is_err());
    }

    #[test]
    fn test_check_passes_values_through() {
        let ok = check(envelope(json!({"value": {"ELEMENT": "1"}, "sessionId": "s", "status": 0}))).unwrap();
        assert_eq!(ok.value["ELEMENT"], "1");
        assert_eq!(ok.session_id.as_deref(), Some("s"));
    }

    #[test]
    fn test_check_maps_lookup_miss() {
        let w3c = check(envelope(json!({
            "value": {"error": "no such element", "message": "unable to find an element"}
        })));
        assert!(matches!(w3c, Err(BackendError::NoSuchElement(m)) if m == "unable to find an element"));

        let legacy = check(envelope(json!({"value": "gone", "status": 7})));
        assert!(matches!(legacy, Err(BackendError::NoSuchElement(_))));
    }

    #[test]
    fn test_check_rejects_other_errors() {
        let err = check(envelope(json!({
            "value": {"error": "invalid session id", "message": "Session does not exist"}
        })))
        .err()
        .unwrap();
        assert_eq!(
            err,
            BackendError::Rejected("invalid session id: Session does not exist".to_string())
        );
    }
}
