use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::screen::{self, Action, SimElement};
use super::SimDevice;
use crate::driver::logs::LogKind;
use crate::driver::traits::{Locator, NativeBackend, NativeRequest, NativeResponse, Orientation};
use crate::driver::BackendError;

const BUNDLE_ID: &str = "com.example.apple-samplecode.UICatalog";

/// WebDriverAgent-like backend of a [`SimDevice`]
pub struct SimNative {
    device: Arc<SimDevice>,
}

impl SimNative {
    pub fn new(device: Arc<SimDevice>) -> Self {
        Self { device }
    }

    fn element_id(generation: u64, index: usize) -> String {
        format!("{}.{}", generation, index)
    }

    /// Resolve an element id against the screen currently shown
    fn resolve(&self, id: &str) -> Result<(usize, SimElement), BackendError> {
        let state = self.device.state();
        let parsed = id
            .split_once('.')
            .and_then(|(gen, idx)| Some((gen.parse::<u64>().ok()?, idx.parse::<usize>().ok()?)));
        let (generation, index) = parsed.ok_or_else(|| {
            BackendError::NoSuchElement(format!("'{}' is not an element id", id))
        })?;
        if generation != state.generation {
            return Err(BackendError::NoSuchElement(format!(
                "element {} is no longer on screen",
                id
            )));
        }
        screen::elements(state.screen(), &state.address)
            .into_iter()
            .nth(index)
            .map(|el| (index, el))
            .ok_or_else(|| BackendError::NoSuchElement(format!("element {} does not exist", id)))
    }

    fn lookup(&self, request: &NativeRequest) -> Result<Vec<String>, BackendError> {
        let locator = Locator::parse(request.param_str("using")?, request.param_str("value")?)
            .map_err(BackendError::Rejected)?;
        let state = self.device.state();
        let items = screen::elements(state.screen(), &state.address);
        Ok(screen::matching(&items, &locator)?
            .into_iter()
            .map(|index| Self::element_id(state.generation, index))
            .collect())
    }

    fn tap(&self, id: &str) -> Result<(), BackendError> {
        let (_, element) = self.resolve(id)?;
        let mut state = self.device.state();
        match element.action {
            Action::Open(target) => state.open(target, Instant::now()),
            Action::Back => state.back(),
            Action::Go => {
                let address = state.address.clone();
                if let Some(webview) = state.webview.as_mut() {
                    webview.load(&address);
                }
            }
            Action::Focus | Action::None => {}
        }
        Ok(())
    }

    fn edit(&self, id: &str, append: Option<&str>) -> Result<(), BackendError> {
        let (_, element) = self.resolve(id)?;
        if element.action != Action::Focus {
            return Err(BackendError::Rejected(format!(
                "{} '{}' does not accept text",
                element.kind, element.name
            )));
        }
        let mut state = self.device.state();
        match append {
            Some(text) => state.address.push_str(text),
            None => state.address.clear(),
        }
        Ok(())
    }

    fn source(&self) -> Result<String, BackendError> {
        let state = self.device.state();
        let items = screen::elements(state.screen(), &state.address);
        screen::source(&items, state.orientation)
    }

    fn screenshot(&self) -> Result<Vec<u8>, BackendError> {
        let started = Instant::now();
        let (current, rows, orientation) = {
            let state = self.device.state();
            let rows = screen::content_rows(&screen::elements(state.screen(), &state.address));
            (state.screen(), rows, state.orientation)
        };
        let png = screen::screenshot(current, rows, orientation)?;
        self.device.logs.push(
            LogKind::Performance,
            "info",
            format!("screenshot rendered in {} ms", started.elapsed().as_millis()),
        );
        Ok(png)
    }

    fn mobile(&self, request: &NativeRequest) -> Result<NativeResponse, BackendError> {
        match request.param_str("name")? {
            "scroll" | "swipe" => Ok(NativeResponse::Ack),
            "activeAppInfo" => Ok(NativeResponse::Value(json!({
                "bundleId": BUNDLE_ID,
                "name": screen::APP_NAME,
            }))),
            other => Err(BackendError::Rejected(format!(
                "unknown mobile command '{}'",
                other
            ))),
        }
    }
}

#[async_trait]
impl NativeBackend for SimNative {
    fn name(&self) -> &str {
        "wda"
    }

    async fn status(&self) -> Result<Value, BackendError> {
        self.device.ensure_reachable()?;
        Ok(json!({
            "state": "success",
            "ready": true,
            "os": { "name": "iOS", "version": self.device.options.platform_version },
            "ios": { "simulatorVersion": self.device.options.platform_version },
            "build": { "productBundleIdentifier": "com.facebook.WebDriverAgentRunner" },
        }))
    }

    async fn start_session(
        &self,
        _requested: &Map<String, Value>,
    ) -> Result<Map<String, Value>, BackendError> {
        self.device.ensure_reachable()?;
        let udid = uuid::Uuid::new_v4().to_string().to_uppercase();
        {
            let mut state = self.device.state();
            state.reset();
            state.session = Some(udid.clone());
        }
        self.device
            .logs
            .push(LogKind::Syslog, "info", format!("Launched {}", BUNDLE_ID));

        let mut actual = Map::new();
        actual.insert("udid".to_string(), Value::String(udid));
        actual.insert("CFBundleIdentifier".to_string(), json!(BUNDLE_ID));
        actual.insert("browserName".to_string(), json!(screen::APP_NAME));
        actual.insert("device".to_string(), json!("iphone"));
        actual.insert(
            "sdkVersion".to_string(),
            json!(self.device.options.platform_version),
        );
        Ok(actual)
    }

    async fn delete_session(&self) -> Result<(), BackendError> {
        let mut state = self.device.state();
        state.reset();
        state.session = None;
        Ok(())
    }

    async fn request(&self, request: NativeRequest) -> Result<NativeResponse, BackendError> {
        self.device.ensure_reachable()?;
        if !self.device.has_session() {
            return Err(BackendError::Rejected("no active session".to_string()));
        }
        self.device
            .logs
            .push(LogKind::Syslog, "debug", format!("handling {}", request.command));

        match request.command {
            "findElement" => {
                let first = self.lookup(&request)?.into_iter().next().ok_or_else(|| {
                    BackendError::NoSuchElement(
                        "no element on screen matched the locator".to_string(),
                    )
                })?;
                Ok(NativeResponse::Value(json!({ "ELEMENT": first })))
            }
            "findElements" => {
                let ids = self.lookup(&request)?;
                Ok(NativeResponse::Value(Value::Array(
                    ids.into_iter().map(|id| json!({ "ELEMENT": id })).collect(),
                )))
            }
            "click" => {
                self.tap(request.param_str("element")?)?;
                Ok(NativeResponse::Ack)
            }
            "clear" => {
                self.edit(request.param_str("element")?, None)?;
                Ok(NativeResponse::Ack)
            }
            "sendKeys" => {
                self.edit(request.param_str("element")?, Some(request.param_str("text")?))?;
                Ok(NativeResponse::Ack)
            }
            "text" => {
                let (_, element) = self.resolve(request.param_str("element")?)?;
                Ok(NativeResponse::Value(Value::String(element.text())))
            }
            "source" => Ok(NativeResponse::Tree(self.source()?)),
            "screenshot" => Ok(NativeResponse::Image(self.screenshot()?)),
            "getOrientation" => Ok(NativeResponse::Value(json!(self
                .device
                .state()
                .orientation
                .as_str()))),
            "setOrientation" => {
                let mode = request
                    .param_str("orientation")?
                    .parse::<Orientation>()
                    .map_err(|raw| BackendError::Rejected(format!("unknown orientation '{}'", raw)))?;
                self.device.state().orientation = mode;
                Ok(NativeResponse::Ack)
            }
            "windowSize" => {
                let size = screen::window_size(self.device.state().orientation);
                Ok(NativeResponse::Value(json!(size)))
            }
            "deactivateApp" => {
                let seconds = request
                    .params
                    .get("duration")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0)
                    .max(0.0);
                let pause = Duration::try_from_secs_f64(seconds).map_err(|e| {
                    BackendError::Rejected(format!("background duration {}s: {}", seconds, e))
                })?;
                self.device.logs.push(
                    LogKind::Syslog,
                    "info",
                    format!("{} moved to background for {}s", BUNDLE_ID, seconds),
                );
                tokio::time::sleep(pause).await;
                Ok(NativeResponse::Ack)
            }
            "back" => {
                self.device.state().back();
                Ok(NativeResponse::Ack)
            }
            "mobile" => self.mobile(&request),
            "scroll" => Ok(NativeResponse::Ack),
            other => Err(BackendError::Rejected(format!("unknown command '{}'", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::sim::SimOptions;

    async fn started() -> (Arc<SimDevice>, SimNative) {
        let device = SimDevice::new(SimOptions::fast());
        let native = SimNative::new(device.clone());
        native.start_session(&Map::new()).await.unwrap();
        (device, native)
    }

    async fn find(native: &SimNative, using: &str, value: &str) -> Result<String, BackendError> {
        let response = native
            .request(NativeRequest::new(
                "findElement",
                json!({ "using": using, "value": value }),
            ))
            .await?;
        match response {
            NativeResponse::Value(v) => Ok(v["ELEMENT"].as_str().unwrap().to_string()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ids_go_stale_after_navigation() {
        let (_, native) = started().await;
        let buttons = find(&native, "accessibility id", "Buttons").await.unwrap();
        native
            .request(NativeRequest::new("click", json!({ "element": buttons })))
            .await
            .unwrap();

        let err = native
            .request(NativeRequest::new("click", json!({ "element": buttons })))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::NoSuchElement(_)));
        assert!(find(&native, "accessibility id", "Button").await.is_ok());
    }

    #[tokio::test]
    async fn test_requires_session_and_connection() {
        let device = SimDevice::new(SimOptions::fast());
        let native = SimNative::new(device.clone());
        let err = native.request(NativeRequest::bare("source")).await.unwrap_err();
        assert!(matches!(err, BackendError::Rejected(_)));

        native.start_session(&Map::new()).await.unwrap();
        device.set_reachable(false);
        let err = native.request(NativeRequest::bare("source")).await.unwrap_err();
        assert!(matches!(err, BackendError::Transport(_)));
    }

    #[tokio::test]
    async fn test_background_duration_out_of_range() {
        let (_, native) = started().await;
        let err = native
            .request(NativeRequest::new("deactivateApp", json!({ "duration": 1e20 })))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_typing_into_address_field() {
        let (device, native) = started().await;
        let web_view = find(&native, "accessibility id", "Web View").await.unwrap();
        native
            .request(NativeRequest::new("click", json!({ "element": web_view })))
            .await
            .unwrap();
        let field = find(&native, "class name", "XCUIElementTypeTextField").await.unwrap();
        native
            .request(NativeRequest::new(
                "sendKeys",
                json!({ "element": field, "text": "http://example.test" }),
            ))
            .await
            .unwrap();
        assert_eq!(device.state().address, "http://example.test");

        let go = find(&native, "accessibility id", "Go").await.unwrap();
        let err = native
            .request(NativeRequest::new("sendKeys", json!({ "element": go, "text": "x" })))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Rejected(_)));
    }
}
