//! Simulated device
//!
//! A deterministic in-process stand-in for a device running the UICatalog
//! sample app: a WebDriverAgent-like native backend, a web inspector backend
//! for its single webview, and a log buffer fed by both. Used by the test
//! suite and by `serve --simulator`.

mod native;
pub mod screen;
mod web;

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::logs::LogBuffer;
use super::traits::Orientation;
use super::{BackendError, BackendFactory, Backends};
use native::SimNative;
use screen::Screen;
use web::{SimWeb, WebView};

pub use web::GUINEA_PIG_TITLE;

#[derive(Debug, Clone)]
pub struct SimOptions {
    /// How long a freshly opened webview takes to become discoverable
    pub webview_attach_delay: Duration,
    pub log_capacity: usize,
    pub platform_version: String,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            webview_attach_delay: Duration::from_millis(300),
            log_capacity: 1000,
            platform_version: "17.2".to_string(),
        }
    }
}

impl SimOptions {
    /// Short timings for tests
    pub fn fast() -> Self {
        Self {
            webview_attach_delay: Duration::from_millis(20),
            ..Self::default()
        }
    }
}

struct DeviceState {
    session: Option<String>,
    orientation: Orientation,
    /// Navigation stack, root first
    stack: Vec<Screen>,
    /// Bumped on every screen change; element ids embed it
    generation: u64,
    /// Contents of the web view screen's address field
    address: String,
    webview: Option<WebView>,
    /// Page the inspector is attached to
    attached: Option<String>,
    next_page: u64,
}

impl DeviceState {
    fn screen(&self) -> Screen {
        self.stack.last().copied().unwrap_or(Screen::Catalog)
    }

    fn open(&mut self, screen: Screen, now: Instant) {
        self.stack.push(screen);
        self.generation += 1;
        if screen == Screen::WebView {
            self.next_page += 1;
            self.address.clear();
            self.webview = Some(WebView::new(self.next_page.to_string(), now));
        }
    }

    fn back(&mut self) {
        if self.stack.len() > 1 {
            // an attached inspector keeps pointing at the closed page
            if self.stack.pop() == Some(Screen::WebView) {
                self.webview = None;
            }
            self.generation += 1;
        }
    }

    fn reset(&mut self) {
        self.stack = vec![Screen::Catalog];
        self.generation += 1;
        self.address.clear();
        self.webview = None;
        self.attached = None;
    }
}

pub struct SimDevice {
    options: SimOptions,
    reachable: AtomicBool,
    state: Mutex<DeviceState>,
    logs: LogBuffer,
}

impl SimDevice {
    pub fn new(options: SimOptions) -> Arc<Self> {
        let logs = LogBuffer::new(options.log_capacity);
        Arc::new(Self {
            options,
            reachable: AtomicBool::new(true),
            state: Mutex::new(DeviceState {
                session: None,
                orientation: Orientation::Portrait,
                stack: vec![Screen::Catalog],
                generation: 0,
                address: String::new(),
                webview: None,
                attached: None,
                next_page: 0,
            }),
            logs,
        })
    }

    /// Backends wired to this device
    pub fn backends(self: &Arc<Self>) -> Backends {
        Backends {
            native: Arc::new(SimNative::new(self.clone())),
            web: Some(Arc::new(SimWeb::new(self.clone()))),
            logs: self.logs.clone(),
        }
    }

    /// Simulate losing (or regaining) the connection to the device
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::Release);
    }

    pub fn has_session(&self) -> bool {
        self.state().session.is_some()
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_reachable(&self) -> Result<(), BackendError> {
        if self.reachable.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(BackendError::Transport(
                "connection refused by simulated device".to_string(),
            ))
        }
    }
}

/// Creates an independent simulated device per session
pub struct SimulatorFactory {
    options: SimOptions,
}

impl SimulatorFactory {
    pub fn new(options: SimOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl BackendFactory for SimulatorFactory {
    async fn connect(&self) -> Result<Backends, BackendError> {
        Ok(SimDevice::new(self.options.clone()).backends())
    }
}
