//! Session execution core
//!
//! A [`SessionCore`] owns one automation session. Blocking commands go
//! through the dispatcher's lane one at a time; NonBlocking commands (status,
//! implicit wait, logs, current context) only read atomics and short-lived
//! snapshots, so they answer immediately even while a long element lookup is
//! sleeping between attempts.

use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use super::capabilities;
use super::command::{Command, CommandName, CommandOutput, ElementHandle};
use super::context::{ContextError, ContextRegistry, ExecutionContext};
use super::dispatcher::{Dispatcher, LaneGuard, PendingCommand};
use super::retry::{CancelToken, Retry, RetryError};
use crate::driver::adapter::{BackendAdapter, NativeAdapter, WebAdapter};
use crate::driver::logs::{LogBuffer, LogEntry, LogKind};
use crate::driver::traits::{Locator, NativeBackend, Orientation, WindowSize};
use crate::driver::Backends;
use crate::error::{DriverError, ErrorKind};

/// Prefix routing `execute` scripts to the native backend
const MOBILE_PREFIX: &str = "mobile:";

/// Only window handle `window_size` accepts
const CURRENT_WINDOW: &str = "current";

/// Per-session tunables
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Platform this driver serves, matched against `platformName`
    pub platform_name: String,
    pub implicit_wait: Duration,
    /// Pause between element lookup attempts
    pub poll_interval: Duration,
    /// Backend status polling; `None` disables the heartbeat
    pub heartbeat_interval: Option<Duration>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            platform_name: "iOS".to_string(),
            implicit_wait: Duration::ZERO,
            poll_interval: Duration::from_millis(100),
            heartbeat_interval: Some(Duration::from_secs(5)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Lifecycle {
    Created = 0,
    Active = 1,
    Terminated = 2,
}

impl Lifecycle {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Lifecycle::Created,
            1 => Lifecycle::Active,
            _ => Lifecycle::Terminated,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::Created => "created",
            Lifecycle::Active => "active",
            Lifecycle::Terminated => "terminated",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BackendStatus {
    pub name: String,
    pub info: Value,
}

/// Liveness snapshot, assembled without the Blocking lane
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub ready: bool,
    pub session_id: String,
    pub state: &'static str,
    pub backend: BackendStatus,
    pub context: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingCommand>,
    pub queued: usize,
}

pub struct SessionCore {
    id: String,
    settings: SessionSettings,
    capabilities: Map<String, Value>,
    lifecycle: AtomicU8,
    ready: AtomicBool,
    implicit_wait_ms: AtomicU64,
    backend_info: RwLock<Value>,
    native: Arc<dyn NativeBackend>,
    contexts: ContextRegistry,
    dispatcher: Dispatcher,
    logs: LogBuffer,
    cancel: CancelToken,
    /// Context each handed-out element id was found in
    elements: Mutex<HashMap<String, String>>,
}

impl SessionCore {
    /// Negotiate capabilities and start a backend session
    pub async fn start(
        backends: Backends,
        settings: SessionSettings,
        request: &Value,
    ) -> Result<Arc<Self>, DriverError> {
        let name = CommandName::NewSession;
        let requested = capabilities::flatten(request).map_err(|kind| DriverError::new(name, kind))?;
        capabilities::validate(&requested, &settings.platform_name)
            .map_err(|kind| DriverError::new(name, kind))?;

        let implicit_wait = requested
            .get("implicitWait")
            .and_then(Value::as_f64)
            .map(|ms| Duration::from_millis(ms as u64))
            .unwrap_or(settings.implicit_wait);

        let native = backends.native.clone();
        let info = native
            .status()
            .await
            .map_err(|err| DriverError::from_backend(name, None, err))?;
        let actual = native
            .start_session(&requested)
            .await
            .map_err(|err| DriverError::from_backend(name, None, err))?;

        let native_adapter: Arc<dyn BackendAdapter> = Arc::new(NativeAdapter::new(native.clone()));
        let web_adapter = backends
            .web
            .clone()
            .map(|web| Arc::new(WebAdapter::new(web)) as Arc<dyn BackendAdapter>);

        let session = Arc::new(Self {
            id: uuid::Uuid::new_v4().to_string(),
            capabilities: capabilities::merge(requested, actual),
            lifecycle: AtomicU8::new(Lifecycle::Created as u8),
            ready: AtomicBool::new(false),
            implicit_wait_ms: AtomicU64::new(implicit_wait.as_millis() as u64),
            backend_info: RwLock::new(info),
            native,
            contexts: ContextRegistry::new(backends.web),
            dispatcher: Dispatcher::new(native_adapter, web_adapter),
            logs: backends.logs,
            cancel: CancelToken::new(),
            elements: Mutex::new(HashMap::new()),
            settings,
        });

        session
            .lifecycle
            .store(Lifecycle::Active as u8, Ordering::Release);
        session.ready.store(true, Ordering::Release);
        log::info!(
            "Session {} started on {} ({})",
            session.id,
            session.native.name(),
            session.settings.platform_name
        );

        if let Some(every) = session.settings.heartbeat_interval {
            Self::spawn_heartbeat(&session, every);
        }
        Ok(session)
    }

    fn spawn_heartbeat(session: &Arc<Self>, every: Duration) {
        let weak = Arc::downgrade(session);
        let cancel = session.cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = cancel.cancelled() => break,
                }
                let Some(session) = weak.upgrade() else { break };
                session.beat().await;
            }
        });
    }

    /// One heartbeat: refresh backend info and the liveness flag
    async fn beat(&self) {
        match self.native.status().await {
            Ok(info) => {
                *self.backend_info.write().unwrap_or_else(|e| e.into_inner()) = info;
                self.ready.store(self.is_active(), Ordering::Release);
            }
            Err(err) => {
                if self.ready.swap(false, Ordering::AcqRel) {
                    log::warn!("Session {}: backend heartbeat failed: {}", self.id, err);
                }
            }
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn capabilities(&self) -> &Map<String, Value> {
        &self.capabilities
    }

    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle::from_u8(self.lifecycle.load(Ordering::Acquire))
    }

    pub fn is_active(&self) -> bool {
        self.lifecycle() == Lifecycle::Active
    }

    fn ensure_active(&self, name: CommandName) -> Result<(), DriverError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(DriverError::session_ended(name))
        }
    }

    /// Queue for the Blocking lane; fails if the session ended while waiting
    async fn lane(&self, name: CommandName) -> Result<LaneGuard<'_>, DriverError> {
        self.ensure_active(name)?;
        let lane = self.dispatcher.acquire(name).await;
        self.ensure_active(name)?;
        Ok(lane)
    }

    /// Terminate the session if `err` means the backend is gone
    fn fail(&self, err: DriverError) -> DriverError {
        if err.is_fatal() {
            let previous = self
                .lifecycle
                .swap(Lifecycle::Terminated as u8, Ordering::AcqRel);
            self.ready.store(false, Ordering::Release);
            self.cancel.cancel();
            if previous != Lifecycle::Terminated as u8 {
                log::warn!("Session {} lost its backend: {}", self.id, err);
            }
        }
        err
    }

    fn remember(&self, handles: &[ElementHandle]) {
        let mut elements = self.elements.lock().unwrap_or_else(|e| e.into_inner());
        for handle in handles {
            elements.insert(handle.id.clone(), handle.context.clone());
        }
    }

    /// Resolve a wire element id to a handle
    ///
    /// Ids this session never handed out are assumed to belong to the active
    /// context and left for the backend to reject.
    fn handle(&self, id: &str) -> ElementHandle {
        let context = self
            .elements
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
            .unwrap_or_else(|| self.contexts.current().id);
        ElementHandle {
            id: id.to_string(),
            context,
        }
    }

    /// Run one backend command inside the lane
    async fn run(&self, command: Command) -> Result<CommandOutput, DriverError> {
        let name = command.name();
        let lane = self.lane(name).await?;
        let context = self.contexts.current();
        self.dispatcher
            .execute(&lane, &context, &command)
            .await
            .map_err(|err| self.fail(err))
    }

    async fn run_ack(&self, command: Command) -> Result<(), DriverError> {
        self.run(command).await.map(|_| ())
    }

    async fn run_text(&self, command: Command) -> Result<String, DriverError> {
        let name = command.name();
        match self.run(command).await? {
            CommandOutput::Text(text) => Ok(text),
            other => Err(unexpected(name, &other, "text")),
        }
    }

    // ========================================================================
    // Liveness
    // ========================================================================

    /// Never waits on the Blocking lane
    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            ready: self.ready.load(Ordering::Acquire),
            session_id: self.id.clone(),
            state: self.lifecycle().as_str(),
            backend: BackendStatus {
                name: self.native.name().to_string(),
                info: self
                    .backend_info
                    .read()
                    .unwrap_or_else(|e| e.into_inner())
                    .clone(),
            },
            context: self.contexts.current().id,
            pending: self.dispatcher.pending(),
            queued: self.dispatcher.queued(),
        }
    }

    pub fn set_implicit_wait(&self, wait: Duration) -> Result<(), DriverError> {
        self.ensure_active(CommandName::SetImplicitWait)?;
        self.implicit_wait_ms
            .store(wait.as_millis() as u64, Ordering::Release);
        log::debug!("Session {}: implicit wait set to {:?}", self.id, wait);
        Ok(())
    }

    pub fn implicit_wait(&self) -> Duration {
        Duration::from_millis(self.implicit_wait_ms.load(Ordering::Acquire))
    }

    fn lookup_policy(&self) -> Retry {
        Retry::new(self.settings.poll_interval, self.implicit_wait())
    }

    // ========================================================================
    // Elements
    // ========================================================================

    fn locator(name: CommandName, strategy: &str, value: &str) -> Result<Locator, DriverError> {
        Locator::parse(strategy, value).map_err(|msg| DriverError::invalid_argument(name, msg))
    }

    /// Find one element, retrying lookup misses for the implicit wait
    pub async fn find_element(&self, strategy: &str, value: &str) -> Result<ElementHandle, DriverError> {
        let name = CommandName::FindElement;
        self.ensure_active(name)?;
        let locator = Self::locator(name, strategy, value)?;

        let lane = self.lane(name).await?;
        let context = self.contexts.current();
        let command = Command::FindElement(locator);
        let (dispatcher, lane, context, command) = (&self.dispatcher, &lane, &context, &command);

        let result = self
            .lookup_policy()
            .run_while(
                &self.cancel,
                move || dispatcher.execute(lane, context, command),
                |err: &DriverError| matches!(err.kind, ErrorKind::NoSuchElement { .. }),
            )
            .await;

        match result {
            Ok(CommandOutput::Element(handle)) => {
                self.remember(std::slice::from_ref(&handle));
                Ok(handle)
            }
            Ok(other) => Err(unexpected(name, &other, "element")),
            Err(RetryError::Exhausted { last, attempts }) => {
                log::debug!("{} gave up after {} attempts", name, attempts);
                Err(self.fail(last))
            }
            Err(RetryError::Cancelled { .. }) => Err(DriverError::session_ended(name)),
        }
    }

    /// Find all matching elements; waits for at least one, else returns none
    pub async fn find_elements(
        &self,
        strategy: &str,
        value: &str,
    ) -> Result<Vec<ElementHandle>, DriverError> {
        let name = CommandName::FindElements;
        self.ensure_active(name)?;
        let locator = Self::locator(name, strategy, value)?;

        let lane = self.lane(name).await?;
        let context = self.contexts.current();
        let command = Command::FindElements(locator);
        let (dispatcher, lane, context, command) = (&self.dispatcher, &lane, &context, &command);

        // `Err(None)` is an empty result worth retrying
        let result = self
            .lookup_policy()
            .run_while(
                &self.cancel,
                move || async move {
                    match dispatcher.execute(lane, context, command).await {
                        Ok(CommandOutput::Elements(found)) if found.is_empty() => Err(None),
                        Ok(output) => Ok(output),
                        Err(err) => Err(Some(err)),
                    }
                },
                |err: &Option<DriverError>| err.is_none(),
            )
            .await;

        match result {
            Ok(CommandOutput::Elements(handles)) => {
                self.remember(&handles);
                Ok(handles)
            }
            Ok(other) => Err(unexpected(name, &other, "elements")),
            Err(RetryError::Exhausted { last: None, .. }) => Ok(Vec::new()),
            Err(RetryError::Exhausted { last: Some(err), .. }) => Err(self.fail(err)),
            Err(RetryError::Cancelled { .. }) => Err(DriverError::session_ended(name)),
        }
    }

    pub async fn click(&self, element: &str) -> Result<(), DriverError> {
        self.run_ack(Command::Click(self.handle(element))).await
    }

    pub async fn clear(&self, element: &str) -> Result<(), DriverError> {
        self.run_ack(Command::Clear(self.handle(element))).await
    }

    pub async fn send_keys(&self, element: &str, text: &str) -> Result<(), DriverError> {
        self.run_ack(Command::SendKeys(self.handle(element), text.to_string()))
            .await
    }

    pub async fn text(&self, element: &str) -> Result<String, DriverError> {
        self.run_text(Command::GetText(self.handle(element))).await
    }

    // ========================================================================
    // Device
    // ========================================================================

    /// Content of the active context
    pub async fn source(&self) -> Result<String, DriverError> {
        self.run_text(Command::GetSource).await
    }

    /// PNG screenshot, always from the native backend
    pub async fn screenshot(&self) -> Result<Vec<u8>, DriverError> {
        match self.run(Command::Screenshot).await? {
            CommandOutput::Image(png) => Ok(png),
            other => Err(unexpected(CommandName::Screenshot, &other, "image")),
        }
    }

    pub async fn orientation(&self) -> Result<Orientation, DriverError> {
        match self.run(Command::GetOrientation).await? {
            CommandOutput::Orientation(mode) => Ok(mode),
            other => Err(unexpected(CommandName::GetOrientation, &other, "orientation")),
        }
    }

    /// Rotate the device; a no-op when already in `mode`
    pub async fn set_orientation(&self, mode: &str) -> Result<(), DriverError> {
        let name = CommandName::SetOrientation;
        self.ensure_active(name)?;
        let target = mode
            .parse::<Orientation>()
            .map_err(|raw| DriverError::new(name, ErrorKind::UnsupportedOrientation(raw)))?;

        let lane = self.lane(name).await?;
        let context = self.contexts.current();
        let current = self
            .dispatcher
            .execute(&lane, &context, &Command::GetOrientation)
            .await
            .map_err(|err| self.fail(err))?;
        if current == CommandOutput::Orientation(target) {
            return Ok(());
        }

        self.dispatcher
            .execute(&lane, &context, &Command::SetOrientation(target))
            .await
            .map(|_| ())
            .map_err(|err| self.fail(err))
    }

    pub async fn window_size(&self, target: &str) -> Result<WindowSize, DriverError> {
        let name = CommandName::GetWindowSize;
        self.ensure_active(name)?;
        if target != CURRENT_WINDOW {
            return Err(DriverError::new(
                name,
                ErrorKind::InvalidWindowTarget(target.to_string()),
            ));
        }
        match self.run(Command::GetWindowSize).await? {
            CommandOutput::Size(size) => Ok(size),
            other => Err(unexpected(name, &other, "size")),
        }
    }

    /// Send the app to the background; returns no sooner than `seconds`
    pub async fn background_app(&self, seconds: f64) -> Result<(), DriverError> {
        let name = CommandName::BackgroundApp;
        self.ensure_active(name)?;
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(DriverError::invalid_argument(
                name,
                format!("background duration must be a non-negative number, got {}", seconds),
            ));
        }

        let duration = Duration::try_from_secs_f64(seconds).map_err(|e| {
            DriverError::invalid_argument(
                name,
                format!("background duration {} is out of range: {}", seconds, e),
            )
        })?;
        let started = Instant::now();
        self.run_ack(Command::BackgroundApp(duration)).await?;
        if let Some(rest) = duration.checked_sub(started.elapsed()) {
            tokio::time::sleep(rest).await;
        }
        Ok(())
    }

    pub async fn back(&self) -> Result<(), DriverError> {
        self.run_ack(Command::Back).await
    }

    /// Native gesture scroll
    pub async fn scroll(&self, args: Value) -> Result<(), DriverError> {
        self.run_ack(Command::Scroll(args)).await
    }

    /// Run a script
    ///
    /// `mobile: <name>` scripts go to the native backend whatever the active
    /// context; anything else needs a webview.
    pub async fn execute(&self, script: &str, args: Vec<Value>) -> Result<Value, DriverError> {
        let command = match script.trim().strip_prefix(MOBILE_PREFIX) {
            Some(mobile) => {
                let mobile = mobile.trim();
                if mobile.is_empty() {
                    return Err(DriverError::invalid_argument(
                        CommandName::MobileCommand,
                        "mobile command name must not be empty",
                    ));
                }
                Command::MobileCommand {
                    name: mobile.to_string(),
                    args: args.into_iter().next().unwrap_or_else(|| json!({})),
                }
            }
            None => Command::ExecuteScript {
                script: script.to_string(),
                args,
            },
        };

        let name = command.name();
        match self.run(command).await? {
            CommandOutput::Value(value) => Ok(value),
            CommandOutput::Ack => Ok(Value::Null),
            other => Err(unexpected(name, &other, "value")),
        }
    }

    // ========================================================================
    // Web
    // ========================================================================

    pub async fn title(&self) -> Result<String, DriverError> {
        self.run_text(Command::Title).await
    }

    pub async fn url(&self) -> Result<String, DriverError> {
        self.run_text(Command::GetUrl).await
    }

    pub async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        self.run_ack(Command::Navigate(url.to_string())).await
    }

    // ========================================================================
    // Contexts
    // ========================================================================

    /// Re-enumerate contexts: native first, then webviews
    pub async fn contexts(&self) -> Result<Vec<ExecutionContext>, DriverError> {
        let name = CommandName::Contexts;
        let _lane = self.lane(name).await?;
        self.contexts
            .list()
            .await
            .map_err(|err| self.fail(DriverError::from_backend(name, None, err)))
    }

    pub fn current_context(&self) -> Result<String, DriverError> {
        self.ensure_active(CommandName::CurrentContext)?;
        Ok(self.contexts.current().id)
    }

    pub async fn switch_context(&self, id: &str) -> Result<(), DriverError> {
        let name = CommandName::SwitchContext;
        let _lane = self.lane(name).await?;
        match self.contexts.switch(id).await {
            Ok(context) => {
                log::info!("Session {}: switched to {}", self.id, context.id);
                Ok(())
            }
            Err(ContextError::Unknown(id)) => {
                Err(DriverError::new(name, ErrorKind::UnknownContext(id)))
            }
            Err(ContextError::Backend(err)) => {
                Err(self.fail(DriverError::from_backend(name, None, err)))
            }
        }
    }

    // ========================================================================
    // Logs
    // ========================================================================

    pub fn log_types(&self) -> Result<Vec<&'static str>, DriverError> {
        self.ensure_active(CommandName::LogTypes)?;
        Ok(LogKind::ALL.iter().map(LogKind::as_str).collect())
    }

    /// Entries of `kind` appended since the last read
    pub fn log(&self, kind: &str) -> Result<Vec<LogEntry>, DriverError> {
        let name = CommandName::GetLog;
        self.ensure_active(name)?;
        let kind = kind
            .parse::<LogKind>()
            .map_err(|raw| DriverError::new(name, ErrorKind::UnknownLogKind(raw)))?;
        Ok(self.logs.read(kind))
    }

    // ========================================================================
    // Unsupported
    // ========================================================================

    pub fn set_geo_location(&self, _latitude: f64, _longitude: f64, _altitude: f64) -> Result<(), DriverError> {
        Err(DriverError::not_implemented(CommandName::SetGeoLocation))
    }

    pub fn shake(&self) -> Result<(), DriverError> {
        Err(DriverError::not_implemented(CommandName::Shake))
    }

    pub fn lock(&self, _seconds: Option<f64>) -> Result<(), DriverError> {
        Err(DriverError::not_implemented(CommandName::Lock))
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// End the session
    ///
    /// Cancels any in-flight lookup, waits for the lane, then releases the
    /// backends. Calling it again is a no-op.
    pub async fn teardown(&self) -> Result<(), DriverError> {
        let previous = self
            .lifecycle
            .swap(Lifecycle::Terminated as u8, Ordering::AcqRel);
        if previous == Lifecycle::Terminated as u8 {
            return Ok(());
        }
        self.ready.store(false, Ordering::Release);
        self.cancel.cancel();

        let _lane = self.dispatcher.acquire(CommandName::DeleteSession).await;
        if let Err(err) = self.contexts.reset().await {
            log::warn!("Session {}: failed to detach web backend: {}", self.id, err);
        }
        if let Err(err) = self.native.delete_session().await {
            log::warn!("Session {}: failed to delete backend session: {}", self.id, err);
        }
        log::info!("Session {} ended", self.id);
        Ok(())
    }
}

fn unexpected(name: CommandName, output: &CommandOutput, wanted: &str) -> DriverError {
    DriverError::new(name, ErrorKind::CommandFailed(output.unexpected(wanted)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::sim::{SimDevice, SimOptions, GUINEA_PIG_TITLE};
    use crate::driver::traits::{WebBackend, WebPage};
    use crate::driver::BackendError;

    fn settings() -> SessionSettings {
        SessionSettings {
            heartbeat_interval: None,
            poll_interval: Duration::from_millis(20),
            ..SessionSettings::default()
        }
    }

    async fn start() -> (Arc<SimDevice>, Arc<SessionCore>) {
        let device = SimDevice::new(SimOptions::fast());
        let session = SessionCore::start(device.backends(), settings(), &json!({"platformName": "iOS"}))
            .await
            .unwrap();
        (device, session)
    }

    #[tokio::test]
    async fn test_start_merges_backend_capabilities() {
        let (_, session) = start().await;
        let caps = session.capabilities();
        assert_eq!(caps["platformName"], "iOS");
        assert_eq!(caps["browserName"], "UICatalog");
        assert!(caps.contains_key("udid"));
        assert!(session.is_active());
    }

    #[tokio::test]
    async fn test_start_rejects_wrong_platform() {
        let device = SimDevice::new(SimOptions::fast());
        let err = SessionCore::start(device.backends(), settings(), &json!({"platformName": "Android"}))
            .await
            .err()
            .unwrap();
        assert!(matches!(err.kind, ErrorKind::CapabilityMismatch(_)));
    }

    #[tokio::test]
    async fn test_start_fails_when_backend_is_down() {
        let device = SimDevice::new(SimOptions::fast());
        device.set_reachable(false);
        let err = SessionCore::start(device.backends(), settings(), &Value::Null)
            .await
            .err()
            .unwrap();
        assert!(matches!(err.kind, ErrorKind::BackendUnavailable(_)));
    }

    #[tokio::test]
    async fn test_status_answers_during_long_lookup() {
        let (_, session) = start().await;
        session.set_implicit_wait(Duration::from_secs(10)).unwrap();

        let finder = session.clone();
        let lookup = tokio::spawn(async move { finder.find_element("id", "WrongLocator").await });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let asked = std::time::Instant::now();
        let status = session.status();
        assert!(asked.elapsed() < Duration::from_millis(50));
        assert!(status.ready);
        assert_eq!(status.backend.name, "wda");
        assert_eq!(status.pending.map(|p| p.command), Some("findElement"));
        assert!(!lookup.is_finished());

        // teardown cuts the wait short
        let stopping = std::time::Instant::now();
        session.teardown().await.unwrap();
        let err = lookup.await.unwrap().unwrap_err();
        assert_eq!(err.kind, ErrorKind::SessionEnded);
        assert!(stopping.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_lookup_exhaustion_is_no_such_element() {
        let (_, session) = start().await;
        session.set_implicit_wait(Duration::from_millis(300)).unwrap();

        let started = std::time::Instant::now();
        let err = session.find_element("id", "WrongLocator").await.unwrap_err();
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert_eq!(err.legacy_status(), 7);
        assert!(err.to_string().contains("WrongLocator"));
        assert!(session.is_active());
    }

    #[tokio::test]
    async fn test_invalid_locator_is_rejected_locally() {
        let (_, session) = start().await;
        let err = session.find_element("telepathy", "x").await.unwrap_err();
        assert!(matches!(err.kind, ErrorKind::InvalidArgument(_)));
        assert!(session.status().pending.is_none());
    }

    #[tokio::test]
    async fn test_orientation_round_trip() {
        let (_, session) = start().await;
        session.set_orientation("PORTRAIT").await.unwrap();
        session.set_orientation("LANDSCAPE").await.unwrap();
        assert_eq!(session.orientation().await.unwrap(), Orientation::Landscape);

        // idempotent
        session.set_orientation("landscape").await.unwrap();
        assert_eq!(session.orientation().await.unwrap(), Orientation::Landscape);

        let err = session.set_orientation("UPSIDE_DOWN").await.unwrap_err();
        assert!(matches!(err.kind, ErrorKind::UnsupportedOrientation(_)));
        assert_eq!(session.orientation().await.unwrap(), Orientation::Landscape);
    }

    #[tokio::test]
    async fn test_interact_in_landscape() {
        let (_, session) = start().await;
        session.set_orientation("LANDSCAPE").await.unwrap();
        let buttons = session.find_element("accessibility id", "Buttons").await.unwrap();
        session.click(&buttons.id).await.unwrap();
        session.find_element("accessibility id", "Button").await.unwrap();
        session.back().await.unwrap();
        session.find_element("accessibility id", "Buttons").await.unwrap();
    }

    #[tokio::test]
    async fn test_screenshots_follow_orientation() {
        let (_, session) = start().await;
        let portrait = session.screenshot().await.unwrap();
        assert!(portrait.starts_with(b"\x89PNG"));

        session.set_orientation("LANDSCAPE").await.unwrap();
        let landscape = session.screenshot().await.unwrap();
        assert_ne!(portrait, landscape);
    }

    #[tokio::test]
    async fn test_source_is_wrapped() {
        let (_, session) = start().await;
        let source = session.source().await.unwrap();
        assert!(source.contains("<AppiumAUT>"));
        assert!(source.contains("<XCUIElementTypeApplication"));
        assert!(source.contains("<XCUIElementTypeWindow"));
    }

    #[tokio::test]
    async fn test_logs() {
        let (_, session) = start().await;
        assert_eq!(
            session.log_types().unwrap(),
            vec!["syslog", "crashlog", "performance"]
        );
        session.source().await.unwrap();
        assert!(!session.log("syslog").unwrap().is_empty());
        assert!(session.log("crashlog").is_ok());

        let err = session.log("something-random").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownLogKind("something-random".into()));
    }

    #[tokio::test]
    async fn test_window_size() {
        let (_, session) = start().await;
        let WindowSize { width, height } = session.window_size("current").await.unwrap();
        assert!(width > 0 && height > 0);

        let err = session.window_size("something-random").await.unwrap_err();
        assert!(err
            .to_string()
            .contains("Currently only getting current window size is supported"));
    }

    #[tokio::test]
    async fn test_background_waits_at_least_duration() {
        let (_, session) = start().await;
        let started = std::time::Instant::now();
        session.background_app(0.3).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert!(session.source().await.unwrap().contains("<AppiumAUT>"));

        assert!(session.background_app(-1.0).await.is_err());
    }

    #[tokio::test]
    async fn test_background_rejects_out_of_range() {
        let (_, session) = start().await;
        let err = session.background_app(1e20).await.unwrap_err();
        assert!(matches!(err.kind, ErrorKind::InvalidArgument(_)));
        assert_eq!(err.command, CommandName::BackgroundApp);
        let err = session.background_app(f64::INFINITY).await.unwrap_err();
        assert!(matches!(err.kind, ErrorKind::InvalidArgument(_)));
        assert!(session.is_active());
        assert!(session.source().await.is_ok());
    }

    #[tokio::test]
    async fn test_stubs_are_not_implemented() {
        let (_, session) = start().await;
        for err in [
            session.set_geo_location(0.0, 0.0, 0.0).unwrap_err(),
            session.shake().unwrap_err(),
            session.lock(None).unwrap_err(),
        ] {
            assert_eq!(err.kind, ErrorKind::NotImplemented);
            assert!(err.to_string().contains("Method has not yet been implemented"));
        }

        session.teardown().await.unwrap();
        assert_eq!(session.shake().unwrap_err().kind, ErrorKind::NotImplemented);
    }

    #[tokio::test]
    async fn test_webview_context_flow() {
        let (_, session) = start().await;
        session.set_implicit_wait(Duration::from_secs(1)).unwrap();

        let web_view = session.find_element("accessibility id", "Web View").await.unwrap();
        session
            .execute(
                "mobile: scroll",
                vec![json!({"element": {"ELEMENT": web_view.id}, "toVisible": true})],
            )
            .await
            .unwrap();
        session.click(&web_view.id).await.unwrap();

        let session_ref = &session;
        let contexts = Retry::new(Duration::from_millis(50), Duration::from_secs(2))
            .run(&CancelToken::new(), move || async move {
                let found = session_ref.contexts().await.map_err(|e| e.to_string())?;
                if found.len() >= 2 {
                    Ok(found)
                } else {
                    Err(format!("only {} contexts", found.len()))
                }
            })
            .await
            .unwrap();
        assert_eq!(contexts[0].id, "NATIVE_APP");
        assert!(contexts[1].id.starts_with("WEBVIEW_"));

        let url_bar = session
            .find_element("class name", "XCUIElementTypeTextField")
            .await
            .unwrap();
        session.clear(&url_bar.id).await.unwrap();
        session
            .send_keys(&url_bar.id, "http://localhost:4994/test/guinea-pig")
            .await
            .unwrap();
        let buttons = session
            .find_elements("class name", "XCUIElementTypeButton")
            .await
            .unwrap();
        session.click(&buttons.last().unwrap().id).await.unwrap();

        // title is web-only
        let err = session.title().await.unwrap_err();
        assert!(matches!(err.kind, ErrorKind::UnsupportedInContext { .. }));

        session.switch_context(&contexts[1].id).await.unwrap();
        assert_eq!(session.current_context().unwrap(), contexts[1].id);
        assert_eq!(session.status().context, contexts[1].id);
        assert_eq!(session.title().await.unwrap(), GUINEA_PIG_TITLE);
        assert!(session.source().await.unwrap().contains("<html"));

        // native element handles don't work in the webview
        let err = session.click(&url_bar.id).await.unwrap_err();
        assert!(matches!(err.kind, ErrorKind::UnsupportedInContext { .. }));
        // device commands still reach the native backend
        assert!(session.screenshot().await.is_ok());

        session.switch_context(&contexts[0].id).await.unwrap();
        assert!(session.source().await.unwrap().contains("<AppiumAUT>"));
        let err = session.switch_context("WEBVIEW_999").await.unwrap_err();
        assert!(matches!(err.kind, ErrorKind::UnknownContext(_)));
        assert_eq!(session.current_context().unwrap(), "NATIVE_APP");
    }

    /// Open the web view screen, load the guinea pig page and wait for its context
    async fn open_guinea_pig(session: &Arc<SessionCore>) -> ExecutionContext {
        let web_view = session.find_element("accessibility id", "Web View").await.unwrap();
        session
            .execute(
                "mobile: scroll",
                vec![json!({"element": {"ELEMENT": web_view.id}, "toVisible": true})],
            )
            .await
            .unwrap();
        session.click(&web_view.id).await.unwrap();

        let session_ref = session;
        let contexts = Retry::new(Duration::from_millis(50), Duration::from_secs(2))
            .run(&CancelToken::new(), move || async move {
                let found = session_ref.contexts().await.map_err(|e| e.to_string())?;
                if found.len() >= 2 {
                    Ok(found)
                } else {
                    Err(format!("only {} contexts", found.len()))
                }
            })
            .await
            .unwrap();

        let url_bar = session
            .find_element("class name", "XCUIElementTypeTextField")
            .await
            .unwrap();
        session.clear(&url_bar.id).await.unwrap();
        session
            .send_keys(&url_bar.id, "http://localhost:4994/test/guinea-pig")
            .await
            .unwrap();
        let go = session.find_element("accessibility id", "Go").await.unwrap();
        session.click(&go.id).await.unwrap();

        contexts[1].clone()
    }

    #[tokio::test]
    async fn test_switch_waits_for_in_flight_command() {
        let (_, session) = start().await;
        session.set_implicit_wait(Duration::from_secs(1)).unwrap();
        let webview = open_guinea_pig(&session).await;
        session.switch_context(&webview.id).await.unwrap();
        session.set_implicit_wait(Duration::from_millis(300)).unwrap();

        let started = Instant::now();
        let first = session.clone();
        let missing = tokio::spawn(async move {
            let result = first.find_element("id", "Missing").await;
            (result, Instant::now())
        });
        while session.status().pending.is_none() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let second = session.clone();
        let link = tokio::spawn(async move { second.find_element("link text", "i am a link").await });
        while session.status().queued < 1 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let third = session.clone();
        let switch = tokio::spawn(async move {
            let result = third.switch_context("NATIVE_APP").await;
            (result, Instant::now())
        });
        while session.status().queued < 2 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        // nothing has switched while the lookup holds the lane
        assert_eq!(session.current_context().unwrap(), webview.id);

        let (switched, switched_at) = switch.await.unwrap();
        switched.unwrap();
        let (missed, missed_at) = missing.await.unwrap();
        assert!(matches!(missed.unwrap_err().kind, ErrorKind::NoSuchElement { .. }));
        assert!(switched_at >= missed_at);
        assert!(started.elapsed() >= Duration::from_millis(300));

        // queued ahead of the switch, so it ran in the webview
        let handle = link.await.unwrap().unwrap();
        assert_eq!(handle.context, webview.id);
        assert_eq!(session.current_context().unwrap(), "NATIVE_APP");
    }

    #[tokio::test]
    async fn test_lane_free_commands_answer_while_lane_is_held() {
        let (_, session) = start().await;
        session.set_implicit_wait(Duration::from_secs(10)).unwrap();
        let finder = session.clone();
        let lookup = tokio::spawn(async move { finder.find_element("id", "WrongLocator").await });
        while session.status().pending.is_none() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        for name in CommandName::ALL.iter().filter(|name| !name.is_blocking()) {
            let asked = Instant::now();
            match name {
                CommandName::Status => assert!(session.status().pending.is_some()),
                CommandName::GetCapabilities => assert!(!session.capabilities().is_empty()),
                CommandName::SetImplicitWait => {
                    session.set_implicit_wait(Duration::from_secs(10)).unwrap()
                }
                CommandName::LogTypes => assert_eq!(session.log_types().unwrap().len(), 3),
                CommandName::GetLog => assert!(session.log("syslog").is_ok()),
                CommandName::CurrentContext => {
                    assert_eq!(session.current_context().unwrap(), "NATIVE_APP")
                }
                CommandName::SetGeoLocation => {
                    assert!(session.set_geo_location(0.0, 0.0, 0.0).is_err())
                }
                CommandName::Shake => assert!(session.shake().is_err()),
                CommandName::Lock => assert!(session.lock(None).is_err()),
                other => panic!("{} has no lane-free entry point", other),
            }
            assert!(asked.elapsed() < Duration::from_millis(50), "{} waited", name);
        }
        assert!(!lookup.is_finished());

        session.teardown().await.unwrap();
        let err = lookup.await.unwrap().unwrap_err();
        assert_eq!(err.kind, ErrorKind::SessionEnded);
    }

    struct ProxyDown;

    #[async_trait::async_trait]
    impl WebBackend for ProxyDown {
        async fn pages(&self) -> Result<Vec<WebPage>, BackendError> {
            Err(BackendError::Transport("debug proxy connection refused".into()))
        }

        async fn attach(&self, _: &str) -> Result<(), BackendError> {
            Err(BackendError::Transport("debug proxy connection refused".into()))
        }

        async fn detach(&self) -> Result<(), BackendError> {
            Err(BackendError::Transport("debug proxy connection refused".into()))
        }

        async fn execute_script(&self, _: &str, _: &[Value]) -> Result<Value, BackendError> {
            Err(BackendError::Transport("debug proxy connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_web_inspector_loss_keeps_session() {
        let device = SimDevice::new(SimOptions::fast());
        let backends = Backends {
            web: Some(Arc::new(ProxyDown) as Arc<dyn WebBackend>),
            ..device.backends()
        };
        let session = SessionCore::start(backends, settings(), &json!({"platformName": "iOS"}))
            .await
            .unwrap();

        let err = session.contexts().await.unwrap_err();
        assert!(!err.is_fatal());
        assert!(matches!(err.kind, ErrorKind::CommandFailed(_)));

        let err = session.switch_context("WEBVIEW_1").await.unwrap_err();
        assert!(!err.is_fatal());
        assert_eq!(session.current_context().unwrap(), "NATIVE_APP");

        assert!(session.is_active());
        assert!(session.source().await.unwrap().contains("<AppiumAUT>"));
        session.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_find_elements_returns_empty_after_wait() {
        let (_, session) = start().await;
        session.set_implicit_wait(Duration::from_millis(100)).unwrap();
        let found = session.find_elements("id", "Nothing").await.unwrap();
        assert!(found.is_empty());

        let found = session
            .find_elements("class name", "XCUIElementTypeCell")
            .await
            .unwrap();
        assert!(found.len() >= 2);
    }

    #[tokio::test]
    async fn test_blocking_commands_queue_in_order() {
        let (_, session) = start().await;
        session.set_implicit_wait(Duration::from_millis(200)).unwrap();

        let slow = session.clone();
        let lookup = tokio::spawn(async move { slow.find_element("id", "Missing").await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let queued = session.clone();
        let source = tokio::spawn(async move { queued.source().await });
        while session.status().queued < 1 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(!source.is_finished());

        assert!(lookup.await.unwrap().is_err());
        assert!(source.await.unwrap().is_ok());
        assert_eq!(session.status().queued, 0);
    }

    #[tokio::test]
    async fn test_teardown_ends_session() {
        let (device, session) = start().await;
        session.teardown().await.unwrap();
        session.teardown().await.unwrap();

        assert!(!session.status().ready);
        assert_eq!(session.status().state, "terminated");
        assert!(!device.has_session());
        for err in [
            session.source().await.unwrap_err(),
            session.find_element("id", "x").await.unwrap_err(),
            session.log("syslog").unwrap_err(),
            session.set_implicit_wait(Duration::ZERO).unwrap_err(),
        ] {
            assert_eq!(err.kind, ErrorKind::SessionEnded);
        }
    }

    #[tokio::test]
    async fn test_transport_loss_terminates() {
        let (device, session) = start().await;
        device.set_reachable(false);

        let err = session.source().await.unwrap_err();
        assert!(matches!(err.kind, ErrorKind::BackendUnavailable(_)));
        assert!(!session.status().ready);
        assert_eq!(session.lifecycle(), Lifecycle::Terminated);
        assert_eq!(session.screenshot().await.unwrap_err().kind, ErrorKind::SessionEnded);
    }

    #[tokio::test]
    async fn test_heartbeat_tracks_backend() {
        let device = SimDevice::new(SimOptions::fast());
        let settings = SessionSettings {
            heartbeat_interval: Some(Duration::from_millis(20)),
            ..settings()
        };
        let session = SessionCore::start(device.backends(), settings, &Value::Null)
            .await
            .unwrap();

        device.set_reachable(false);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!session.status().ready);
        // heartbeat misses alone don't end the session
        assert!(session.is_active());

        device.set_reachable(true);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(session.status().ready);
    }
}
