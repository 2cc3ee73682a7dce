//! WebDriver wire endpoints
//!
//! Every reply uses the JSON wire envelope `{sessionId, status, value}`.
//! Failures keep the envelope, with `status` set to the legacy numeric code
//! and `value` describing the error.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use base64::Engine;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::session::command::CommandName;
use crate::session::{ElementHandle, SessionCore, SessionManager};
use crate::error::DriverError;

/// W3C element reference key, sent alongside the legacy `ELEMENT`
const W3C_ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Shared state for API handlers
pub struct AppState {
    pub manager: Arc<SessionManager>,
}

/// A failed request, rendered in the wire envelope
#[derive(Debug)]
pub struct ApiError {
    session_id: Option<String>,
    error: DriverError,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.error.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = json!({
            "sessionId": self.session_id,
            "status": self.error.legacy_status(),
            "value": {
                "error": self.error.wire_code(),
                "message": self.error.to_string(),
                "command": self.error.command.as_str(),
            }
        });
        (status, Json(body)).into_response()
    }
}

trait AtSession<T> {
    fn at(self, session_id: &str) -> Result<T, ApiError>;
}

impl<T> AtSession<T> for Result<T, DriverError> {
    fn at(self, session_id: &str) -> Result<T, ApiError> {
        self.map_err(|error| ApiError {
            session_id: Some(session_id.to_string()),
            error,
        })
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

fn reply(session_id: Option<&str>, command: CommandName, value: impl Serialize) -> ApiResult {
    let value = serde_json::to_value(value)
        .map_err(|e| DriverError::new(command, crate::error::ErrorKind::CommandFailed(e.to_string())))
        .map_err(|error| ApiError {
            session_id: session_id.map(str::to_string),
            error,
        })?;
    Ok(Json(json!({
        "sessionId": session_id,
        "status": 0,
        "value": value,
    })))
}

fn element_value(handle: &ElementHandle) -> Value {
    json!({ "ELEMENT": handle.id, W3C_ELEMENT_KEY: handle.id })
}

/// Request body of a command; an empty body reads as `{}`
struct Params {
    command: CommandName,
    body: Value,
}

impl Params {
    fn parse(command: CommandName, raw: &Bytes) -> Result<Self, DriverError> {
        let body = if raw.iter().all(u8::is_ascii_whitespace) {
            json!({})
        } else {
            serde_json::from_slice(raw)
                .map_err(|e| DriverError::invalid_argument(command, format!("malformed JSON body: {}", e)))?
        };
        Ok(Self { command, body })
    }

    fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key).filter(|value| !value.is_null())
    }

    fn str(&self, key: &str) -> Result<&str, DriverError> {
        self.get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| self.missing(key, "a string"))
    }

    fn f64(&self, key: &str) -> Result<f64, DriverError> {
        self.get(key)
            .and_then(Value::as_f64)
            .ok_or_else(|| self.missing(key, "a number"))
    }

    fn missing(&self, key: &str, wanted: &str) -> DriverError {
        DriverError::invalid_argument(self.command, format!("'{}' must be {}", key, wanted))
    }

    /// `ms` as a duration, rejecting negatives
    fn millis(&self, key: &str) -> Result<Duration, DriverError> {
        let ms = self.f64(key)?;
        if !ms.is_finite() || ms < 0.0 {
            return Err(self.missing(key, "a non-negative number"));
        }
        Ok(Duration::from_millis(ms as u64))
    }
}

impl AppState {
    fn session(&self, id: &str, command: CommandName) -> Result<Arc<SessionCore>, ApiError> {
        self.manager.get(id, command).at(id)
    }
}

/// Build API router
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/status", get(server_status))
        .route("/session", post(create_session))
        .route("/session/:id", get(get_session).delete(delete_session))
        .route("/session/:id/timeouts/implicit_wait", post(set_implicit_wait))
        .route("/session/:id/timeouts", post(set_timeouts))
        .route("/session/:id/element", post(find_element))
        .route("/session/:id/elements", post(find_elements))
        .route("/session/:id/element/:eid/click", post(click))
        .route("/session/:id/element/:eid/clear", post(clear))
        .route("/session/:id/element/:eid/value", post(send_keys))
        .route("/session/:id/element/:eid/text", get(text))
        .route("/session/:id/source", get(source))
        .route("/session/:id/screenshot", get(screenshot))
        .route("/session/:id/orientation", get(get_orientation).post(set_orientation))
        .route("/session/:id/window/:handle/size", get(window_size))
        .route("/session/:id/appium/app/background", post(background_app))
        .route("/session/:id/log/types", get(log_types))
        .route("/session/:id/log", post(get_log))
        .route("/session/:id/location", post(set_location))
        .route("/session/:id/appium/device/shake", post(shake))
        .route("/session/:id/appium/device/lock", post(lock))
        .route("/session/:id/contexts", get(contexts))
        .route("/session/:id/context", get(current_context).post(switch_context))
        .route("/session/:id/title", get(title))
        .route("/session/:id/url", get(get_url).post(navigate))
        .route("/session/:id/back", post(back))
        .route("/session/:id/execute", post(execute))
}

// ============================================================================
// Server and sessions
// ============================================================================

/// GET /status - never waits on any session
async fn server_status(State(state): State<Arc<AppState>>) -> ApiResult {
    let mut value = json!({
        "build": { "version": env!("CARGO_PKG_VERSION") },
        "sessions": state.manager.list(),
    });
    match state.manager.latest_status() {
        Some(status) => {
            value["ready"] = json!(status.ready);
            value[status.backend.name.as_str()] = status.backend.info.clone();
            value["session"] = serde_json::to_value(&status).unwrap_or(Value::Null);
        }
        None => value["ready"] = json!(true),
    }
    reply(None, CommandName::Status, value)
}

/// POST /session
async fn create_session(State(state): State<Arc<AppState>>, raw: Bytes) -> ApiResult {
    let name = CommandName::NewSession;
    let params = Params::parse(name, &raw).map_err(|error| ApiError {
        session_id: None,
        error,
    })?;
    let session = state
        .manager
        .create(&params.body)
        .await
        .map_err(|error| ApiError {
            session_id: None,
            error,
        })?;
    reply(Some(session.id()), name, session.capabilities())
}

/// GET /session/:id
async fn get_session(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    let name = CommandName::GetCapabilities;
    let session = state.session(&id, name)?;
    if !session.is_active() {
        return Err(DriverError::session_ended(name)).at(&id);
    }
    reply(Some(&id), name, session.capabilities())
}

/// DELETE /session/:id
async fn delete_session(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    state.manager.delete(&id).await.at(&id)?;
    reply(Some(&id), CommandName::DeleteSession, Value::Null)
}

// ============================================================================
// Timeouts
// ============================================================================

/// POST /session/:id/timeouts/implicit_wait - `{ms}`
async fn set_implicit_wait(State(state): State<Arc<AppState>>, Path(id): Path<String>, raw: Bytes) -> ApiResult {
    let name = CommandName::SetImplicitWait;
    let session = state.session(&id, name)?;
    let params = Params::parse(name, &raw).at(&id)?;
    session.set_implicit_wait(params.millis("ms").at(&id)?).at(&id)?;
    reply(Some(&id), name, Value::Null)
}

/// POST /session/:id/timeouts - `{type: "implicit", ms}` or W3C `{implicit}`
async fn set_timeouts(State(state): State<Arc<AppState>>, Path(id): Path<String>, raw: Bytes) -> ApiResult {
    let name = CommandName::SetImplicitWait;
    let session = state.session(&id, name)?;
    let params = Params::parse(name, &raw).at(&id)?;

    let wait = if params.get("implicit").is_some() {
        Some(params.millis("implicit").at(&id)?)
    } else if params.get("type").and_then(Value::as_str) == Some("implicit") {
        Some(params.millis("ms").at(&id)?)
    } else {
        None
    };
    match wait {
        Some(wait) => session.set_implicit_wait(wait).at(&id)?,
        None => log::debug!("Session {}: ignoring timeouts {}", id, params.body),
    }
    reply(Some(&id), name, Value::Null)
}

// ============================================================================
// Elements
// ============================================================================

/// POST /session/:id/element - `{using, value}`
async fn find_element(State(state): State<Arc<AppState>>, Path(id): Path<String>, raw: Bytes) -> ApiResult {
    let name = CommandName::FindElement;
    let session = state.session(&id, name)?;
    let params = Params::parse(name, &raw).at(&id)?;
    let handle = session
        .find_element(params.str("using").at(&id)?, params.str("value").at(&id)?)
        .await
        .at(&id)?;
    reply(Some(&id), name, element_value(&handle))
}

/// POST /session/:id/elements - `{using, value}`
async fn find_elements(State(state): State<Arc<AppState>>, Path(id): Path<String>, raw: Bytes) -> ApiResult {
    let name = CommandName::FindElements;
    let session = state.session(&id, name)?;
    let params = Params::parse(name, &raw).at(&id)?;
    let handles = session
        .find_elements(params.str("using").at(&id)?, params.str("value").at(&id)?)
        .await
        .at(&id)?;
    let values: Vec<Value> = handles.iter().map(element_value).collect();
    reply(Some(&id), name, values)
}

/// POST /session/:id/element/:eid/click
async fn click(State(state): State<Arc<AppState>>, Path((id, eid)): Path<(String, String)>) -> ApiResult {
    let name = CommandName::Click;
    state.session(&id, name)?.click(&eid).await.at(&id)?;
    reply(Some(&id), name, Value::Null)
}

/// POST /session/:id/element/:eid/clear
async fn clear(State(state): State<Arc<AppState>>, Path((id, eid)): Path<(String, String)>) -> ApiResult {
    let name = CommandName::Clear;
    state.session(&id, name)?.clear(&eid).await.at(&id)?;
    reply(Some(&id), name, Value::Null)
}

/// POST /session/:id/element/:eid/value - `{value: [chars]}` or `{text}`
async fn send_keys(
    State(state): State<Arc<AppState>>,
    Path((id, eid)): Path<(String, String)>,
    raw: Bytes,
) -> ApiResult {
    let name = CommandName::SendKeys;
    let session = state.session(&id, name)?;
    let params = Params::parse(name, &raw).at(&id)?;
    let text = match (params.get("text"), params.get("value")) {
        (Some(Value::String(text)), _) => text.clone(),
        (_, Some(Value::Array(keys))) => keys.iter().filter_map(Value::as_str).collect(),
        (_, Some(Value::String(text))) => text.clone(),
        _ => return Err(params.missing("value", "an array of strings")).at(&id),
    };
    session.send_keys(&eid, &text).await.at(&id)?;
    reply(Some(&id), name, Value::Null)
}

/// GET /session/:id/element/:eid/text
async fn text(State(state): State<Arc<AppState>>, Path((id, eid)): Path<(String, String)>) -> ApiResult {
    let name = CommandName::GetText;
    let text = state.session(&id, name)?.text(&eid).await.at(&id)?;
    reply(Some(&id), name, text)
}

// ============================================================================
// Device
// ============================================================================

/// GET /session/:id/source
async fn source(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    let name = CommandName::GetSource;
    let source = state.session(&id, name)?.source().await.at(&id)?;
    reply(Some(&id), name, source)
}

/// GET /session/:id/screenshot - base64 PNG
async fn screenshot(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    let name = CommandName::Screenshot;
    let png = state.session(&id, name)?.screenshot().await.at(&id)?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(png);
    reply(Some(&id), name, encoded)
}

/// GET /session/:id/orientation
async fn get_orientation(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    let name = CommandName::GetOrientation;
    let mode = state.session(&id, name)?.orientation().await.at(&id)?;
    reply(Some(&id), name, mode)
}

/// POST /session/:id/orientation - `{orientation}`
async fn set_orientation(State(state): State<Arc<AppState>>, Path(id): Path<String>, raw: Bytes) -> ApiResult {
    let name = CommandName::SetOrientation;
    let session = state.session(&id, name)?;
    let params = Params::parse(name, &raw).at(&id)?;
    session
        .set_orientation(params.str("orientation").at(&id)?)
        .await
        .at(&id)?;
    reply(Some(&id), name, Value::Null)
}

/// GET /session/:id/window/:handle/size
async fn window_size(
    State(state): State<Arc<AppState>>,
    Path((id, handle)): Path<(String, String)>,
) -> ApiResult {
    let name = CommandName::GetWindowSize;
    let size = state.session(&id, name)?.window_size(&handle).await.at(&id)?;
    reply(Some(&id), name, size)
}

/// POST /session/:id/appium/app/background - `{seconds}`
async fn background_app(State(state): State<Arc<AppState>>, Path(id): Path<String>, raw: Bytes) -> ApiResult {
    let name = CommandName::BackgroundApp;
    let session = state.session(&id, name)?;
    let params = Params::parse(name, &raw).at(&id)?;
    // newer clients send `{seconds: {timeout: ms}}`
    let seconds = match params.get("seconds") {
        Some(Value::Object(inner)) => inner
            .get("timeout")
            .and_then(Value::as_f64)
            .map(|ms| ms / 1000.0)
            .ok_or_else(|| params.missing("seconds.timeout", "a number"))
            .at(&id)?,
        _ => params.f64("seconds").at(&id)?,
    };
    session.background_app(seconds).await.at(&id)?;
    reply(Some(&id), name, Value::Null)
}

/// POST /session/:id/back
async fn back(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    let name = CommandName::Back;
    state.session(&id, name)?.back().await.at(&id)?;
    reply(Some(&id), name, Value::Null)
}

/// POST /session/:id/execute - `{script, args}`
async fn execute(State(state): State<Arc<AppState>>, Path(id): Path<String>, raw: Bytes) -> ApiResult {
    let name = CommandName::ExecuteScript;
    let session = state.session(&id, name)?;
    let params = Params::parse(name, &raw).at(&id)?;
    let script = params.str("script").at(&id)?;
    let args = match params.get("args") {
        Some(Value::Array(args)) => args.clone(),
        Some(other) => vec![other.clone()],
        None => Vec::new(),
    };
    let value = session.execute(script, args).await.at(&id)?;
    reply(Some(&id), name, value)
}

// ============================================================================
// Logs
// ============================================================================

/// GET /session/:id/log/types
async fn log_types(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    let name = CommandName::LogTypes;
    let kinds = state.session(&id, name)?.log_types().at(&id)?;
    reply(Some(&id), name, kinds)
}

/// POST /session/:id/log - `{type}`
async fn get_log(State(state): State<Arc<AppState>>, Path(id): Path<String>, raw: Bytes) -> ApiResult {
    let name = CommandName::GetLog;
    let session = state.session(&id, name)?;
    let params = Params::parse(name, &raw).at(&id)?;
    let entries = session.log(params.str("type").at(&id)?).at(&id)?;
    reply(Some(&id), name, entries)
}

// ============================================================================
// Unsupported device features
// ============================================================================

/// POST /session/:id/location
async fn set_location(State(state): State<Arc<AppState>>, Path(id): Path<String>, raw: Bytes) -> ApiResult {
    let name = CommandName::SetGeoLocation;
    let session = state.session(&id, name)?;
    let params = Params::parse(name, &raw).at(&id)?;
    let location = params.get("location").unwrap_or(&params.body);
    let coordinate = |key: &str| location.get(key).and_then(Value::as_f64).unwrap_or(0.0);
    session
        .set_geo_location(coordinate("latitude"), coordinate("longitude"), coordinate("altitude"))
        .at(&id)?;
    reply(Some(&id), name, Value::Null)
}

/// POST /session/:id/appium/device/shake
async fn shake(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    let name = CommandName::Shake;
    state.session(&id, name)?.shake().at(&id)?;
    reply(Some(&id), name, Value::Null)
}

/// POST /session/:id/appium/device/lock - `{seconds?}`
async fn lock(State(state): State<Arc<AppState>>, Path(id): Path<String>, raw: Bytes) -> ApiResult {
    let name = CommandName::Lock;
    let session = state.session(&id, name)?;
    let params = Params::parse(name, &raw).at(&id)?;
    let seconds = params.get("seconds").and_then(Value::as_f64);
    session.lock(seconds).at(&id)?;
    reply(Some(&id), name, Value::Null)
}

// ============================================================================
// Contexts and web
// ============================================================================

/// GET /session/:id/contexts
async fn contexts(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    let name = CommandName::Contexts;
    let contexts = state.session(&id, name)?.contexts().await.at(&id)?;
    let ids: Vec<String> = contexts.into_iter().map(|context| context.id).collect();
    reply(Some(&id), name, ids)
}

/// GET /session/:id/context
async fn current_context(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    let name = CommandName::CurrentContext;
    let context = state.session(&id, name)?.current_context().at(&id)?;
    reply(Some(&id), name, context)
}

/// POST /session/:id/context - `{name}`
async fn switch_context(State(state): State<Arc<AppState>>, Path(id): Path<String>, raw: Bytes) -> ApiResult {
    let name = CommandName::SwitchContext;
    let session = state.session(&id, name)?;
    let params = Params::parse(name, &raw).at(&id)?;
    session.switch_context(params.str("name").at(&id)?).await.at(&id)?;
    reply(Some(&id), name, Value::Null)
}

/// GET /session/:id/title
async fn title(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    let name = CommandName::Title;
    let title = state.session(&id, name)?.title().await.at(&id)?;
    reply(Some(&id), name, title)
}

/// GET /session/:id/url
async fn get_url(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    let name = CommandName::GetUrl;
    let url = state.session(&id, name)?.url().await.at(&id)?;
    reply(Some(&id), name, url)
}

/// POST /session/:id/url - `{url}`
async fn navigate(State(state): State<Arc<AppState>>, Path(id): Path<String>, raw: Bytes) -> ApiResult {
    let name = CommandName::Navigate;
    let session = state.session(&id, name)?;
    let params = Params::parse(name, &raw).at(&id)?;
    session.navigate(params.str("url").at(&id)?).await.at(&id)?;
    reply(Some(&id), name, Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::sim::{SimOptions, SimulatorFactory};
    use crate::session::SessionSettings;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use tower::ServiceExt;

    fn app() -> Router {
        let manager = SessionManager::new(
            Arc::new(SimulatorFactory::new(SimOptions::fast())),
            SessionSettings {
                heartbeat_interval: None,
                poll_interval: Duration::from_millis(20),
                ..SessionSettings::default()
            },
        );
        api_router().with_state(Arc::new(AppState {
            manager: Arc::new(manager),
        }))
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn new_session(app: &Router) -> String {
        let (status, body) = call(
            app,
            Method::POST,
            "/session",
            Some(json!({"desiredCapabilities": {"platformName": "iOS"}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body["sessionId"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let app = app();
        let id = new_session(&app).await;

        let (status, body) = call(&app, Method::GET, &format!("/session/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], 0);
        assert_eq!(body["value"]["platformName"], "iOS");
        assert_eq!(body["value"]["browserName"], "UICatalog");

        let (_, body) = call(&app, Method::GET, "/status", None).await;
        assert_eq!(body["value"]["ready"], true);
        assert!(body["value"]["wda"].is_object());

        let (status, _) = call(&app, Method::DELETE, &format!("/session/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = call(&app, Method::GET, &format!("/session/{}/source", id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], 6);
        assert_eq!(body["value"]["error"], "invalid session id");
    }

    #[tokio::test]
    async fn test_wrong_platform() {
        let app = app();
        let (status, body) = call(
            &app,
            Method::POST,
            "/session",
            Some(json!({"capabilities": {"alwaysMatch": {"platformName": "Android"}}})),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["status"], 33);
        assert_eq!(body["value"]["command"], "createSession");
    }

    #[tokio::test]
    async fn test_element_round_trip() {
        let app = app();
        let id = new_session(&app).await;

        let (status, body) = call(
            &app,
            Method::POST,
            &format!("/session/{}/element", id),
            Some(json!({"using": "accessibility id", "value": "Buttons"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let element = body["value"]["ELEMENT"].as_str().unwrap().to_string();
        assert_eq!(body["value"][W3C_ELEMENT_KEY], element);

        let (_, body) = call(&app, Method::GET, &format!("/session/{}/element/{}/text", id, element), None).await;
        assert_eq!(body["value"], "Buttons");

        let (status, body) = call(
            &app,
            Method::POST,
            &format!("/session/{}/element", id),
            Some(json!({"using": "accessibility id", "value": "WrongLocator"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], 7);
        assert!(body["value"]["message"].as_str().unwrap().contains("WrongLocator"));
    }

    #[tokio::test]
    async fn test_device_endpoints() {
        let app = app();
        let id = new_session(&app).await;

        let (_, body) = call(&app, Method::GET, &format!("/session/{}/screenshot", id), None).await;
        let png = base64::engine::general_purpose::STANDARD
            .decode(body["value"].as_str().unwrap())
            .unwrap();
        assert!(png.starts_with(&[0x89, b'P', b'N', b'G']));

        let (_, body) = call(&app, Method::GET, &format!("/session/{}/window/current/size", id), None).await;
        assert!(body["value"]["width"].as_u64().unwrap() > 0);
        let (status, body) =
            call(&app, Method::GET, &format!("/session/{}/window/something-random/size", id), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["value"]["message"]
            .as_str()
            .unwrap()
            .contains("Currently only getting current window size is supported"));

        let orientation = format!("/session/{}/orientation", id);
        call(&app, Method::POST, &orientation, Some(json!({"orientation": "LANDSCAPE"}))).await;
        let (_, body) = call(&app, Method::GET, &orientation, None).await;
        assert_eq!(body["value"], "LANDSCAPE");

        let (_, body) = call(&app, Method::POST, &format!("/session/{}/log", id), Some(json!({"type": "syslog"}))).await;
        assert!(body["value"].is_array());
        let (status, _) =
            call(&app, Method::POST, &format!("/session/{}/log", id), Some(json!({"type": "something-random"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        for stub in ["location", "appium/device/shake", "appium/device/lock"] {
            let (status, body) = call(&app, Method::POST, &format!("/session/{}/{}", id, stub), None).await;
            assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
            assert!(body["value"]["message"]
                .as_str()
                .unwrap()
                .contains("Method has not yet been implemented"));
        }
    }

    #[tokio::test]
    async fn test_timeouts_and_bad_bodies() {
        let app = app();
        let id = new_session(&app).await;

        let (status, _) = call(
            &app,
            Method::POST,
            &format!("/session/{}/timeouts", id),
            Some(json!({"type": "implicit", "ms": 250})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(
            &app,
            Method::POST,
            &format!("/session/{}/timeouts/implicit_wait", id),
            Some(json!({"ms": -1})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["value"]["error"], "invalid argument");

        let (status, _) = call(&app, Method::POST, &format!("/session/{}/element", id), Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let background = format!("/session/{}/appium/app/background", id);
        for body in [json!({"seconds": 1e20}), json!({"seconds": {"timeout": 1e23}})] {
            let (status, body) = call(&app, Method::POST, &background, Some(body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["value"]["error"], "invalid argument");
        }
        let (status, _) = call(&app, Method::GET, &format!("/session/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_contexts_start_native() {
        let app = app();
        let id = new_session(&app).await;
        let (_, body) = call(&app, Method::GET, &format!("/session/{}/contexts", id), None).await;
        assert_eq!(body["value"], json!(["NATIVE_APP"]));
        let (_, body) = call(&app, Method::GET, &format!("/session/{}/context", id), None).await;
        assert_eq!(body["value"], "NATIVE_APP");

        let (status, body) = call(
            &app,
            Method::POST,
            &format!("/session/{}/context", id),
            Some(json!({"name": "WEBVIEW_42"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], 35);
    }
}
