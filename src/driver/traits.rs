use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use super::BackendError;

/// Element locator strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocatorStrategy {
    AccessibilityId,
    Id,
    Name,
    ClassName,
    XPath,
    /// CSS selector (Web only)
    Css,
    /// Tag name (Web only)
    TagName,
    /// Link text (Web only)
    LinkText,
    /// NSPredicate string (native only)
    Predicate,
    /// XCUITest class chain (native only)
    ClassChain,
}

impl LocatorStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocatorStrategy::AccessibilityId => "accessibility id",
            LocatorStrategy::Id => "id",
            LocatorStrategy::Name => "name",
            LocatorStrategy::ClassName => "class name",
            LocatorStrategy::XPath => "xpath",
            LocatorStrategy::Css => "css selector",
            LocatorStrategy::TagName => "tag name",
            LocatorStrategy::LinkText => "link text",
            LocatorStrategy::Predicate => "-ios predicate string",
            LocatorStrategy::ClassChain => "-ios class chain",
        }
    }
}

impl FromStr for LocatorStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "accessibility id" => Ok(LocatorStrategy::AccessibilityId),
            "id" => Ok(LocatorStrategy::Id),
            "name" => Ok(LocatorStrategy::Name),
            "class name" => Ok(LocatorStrategy::ClassName),
            "xpath" => Ok(LocatorStrategy::XPath),
            "css selector" => Ok(LocatorStrategy::Css),
            "tag name" => Ok(LocatorStrategy::TagName),
            "link text" => Ok(LocatorStrategy::LinkText),
            "-ios predicate string" => Ok(LocatorStrategy::Predicate),
            "-ios class chain" => Ok(LocatorStrategy::ClassChain),
            other => Err(format!("unknown locator strategy '{}'", other)),
        }
    }
}

/// A strategy + value pair used to look up elements
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    pub strategy: LocatorStrategy,
    pub value: String,
}

impl Locator {
    /// Parse a wire-level strategy name and value
    pub fn parse(strategy: &str, value: &str) -> Result<Self, String> {
        if value.is_empty() {
            return Err("locator value must not be empty".to_string());
        }
        Ok(Self {
            strategy: strategy.parse()?,
            value: value.to_string(),
        })
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.strategy.as_str(), self.value)
    }
}

/// Device orientation modes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Orientation {
    Portrait,
    Landscape,
}

impl Orientation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Orientation::Portrait => "PORTRAIT",
            Orientation::Landscape => "LANDSCAPE",
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Orientation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "PORTRAIT" => Ok(Orientation::Portrait),
            "LANDSCAPE" => Ok(Orientation::Landscape),
            _ => Err(s.to_string()),
        }
    }
}

/// Screen size in points
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct WindowSize {
    pub width: u32,
    pub height: u32,
}

// ============================================================================
// Native backend
// ============================================================================

/// A request to the native UI backend: a command name and a parameter bag
#[derive(Debug, Clone)]
pub struct NativeRequest {
    pub command: &'static str,
    pub params: Value,
}

impl NativeRequest {
    pub fn new(command: &'static str, params: Value) -> Self {
        Self { command, params }
    }

    pub fn bare(command: &'static str) -> Self {
        Self::new(command, Value::Null)
    }

    /// String parameter lookup
    pub fn param_str(&self, key: &str) -> Result<&str, BackendError> {
        self.params
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                BackendError::Rejected(format!("{}: missing parameter '{}'", self.command, key))
            })
    }
}

/// What the native backend hands back
#[derive(Debug, Clone, PartialEq)]
pub enum NativeResponse {
    /// Structured UI tree dump (XML)
    Tree(String),
    /// Binary image buffer (PNG)
    Image(Vec<u8>),
    /// Scalar or structured value
    Value(Value),
    Ack,
}

/// Native UI automation backend
///
/// Walks the accessibility tree, performs gestures and captures the screen.
/// The backend is reachable in every context: context switching is a driver
/// concept, so screenshots and orientation go here even while a webview is
/// the active context.
#[async_trait]
pub trait NativeBackend: Send + Sync {
    /// Short backend name reported in status payloads (e.g. "wda")
    fn name(&self) -> &str;

    /// Backend liveness and build info
    async fn status(&self) -> Result<Value, BackendError>;

    /// Start a backend session
    ///
    /// # Returns
    /// The capabilities the backend actually applied
    async fn start_session(
        &self,
        requested: &Map<String, Value>,
    ) -> Result<Map<String, Value>, BackendError>;

    /// End the backend session
    async fn delete_session(&self) -> Result<(), BackendError>;

    /// Execute one request/response exchange
    ///
    /// Command names understood by every backend: `findElement`,
    /// `findElements`, `click`, `clear`, `sendKeys`, `text`, `source`,
    /// `screenshot`, `getOrientation`, `setOrientation`, `windowSize`,
    /// `deactivateApp`, `back`, `mobile`, `scroll`.
    async fn request(&self, request: NativeRequest) -> Result<NativeResponse, BackendError>;
}

// ============================================================================
// Web backend
// ============================================================================

/// A webview page discovered by the web backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebPage {
    pub id: String,
    pub title: String,
    pub url: String,
}

/// Web inspector backend driving DOM content inside a webview
///
/// Implementations must provide discovery, attachment and script evaluation;
/// everything else has a default built on `execute_script`, so a debugger
/// connection that can only evaluate JavaScript is already a full backend.
#[async_trait]
pub trait WebBackend: Send + Sync {
    /// Enumerate currently visible webview pages in discovery order
    async fn pages(&self) -> Result<Vec<WebPage>, BackendError>;

    /// Attach to a page; replaces any previous attachment
    async fn attach(&self, page_id: &str) -> Result<(), BackendError>;

    /// Detach from the current page (no-op when not attached)
    async fn detach(&self) -> Result<(), BackendError>;

    /// Run a script body (WebDriver `execute` semantics: `arguments` holds `args`)
    async fn execute_script(&self, script: &str, args: &[Value]) -> Result<Value, BackendError>;

    /// Get the page title
    async fn title(&self) -> Result<String, BackendError> {
        let value = self.execute_script("return document.title;", &[]).await?;
        expect_string(value)
    }

    /// Get the current URL
    async fn url(&self) -> Result<String, BackendError> {
        let value = self
            .execute_script("return window.location.href;", &[])
            .await?;
        expect_string(value)
    }

    /// Navigate to a URL
    async fn navigate(&self, url: &str) -> Result<(), BackendError> {
        self.execute_script(
            "window.location.href = arguments[0]; return null;",
            &[Value::String(url.to_string())],
        )
        .await?;
        Ok(())
    }

    /// Get the document HTML
    async fn source(&self) -> Result<String, BackendError> {
        let value = self
            .execute_script("return document.documentElement.outerHTML;", &[])
            .await?;
        expect_string(value)
    }

    /// Navigate back in history
    async fn back(&self) -> Result<(), BackendError> {
        self.execute_script("window.history.back(); return null;", &[])
            .await?;
        Ok(())
    }

    /// Find elements and return their backend ids
    async fn find_elements(&self, locator: &Locator) -> Result<Vec<String>, BackendError> {
        let lookup = lookup_expression(locator)?;
        let script = format!(
            r"var found = Array.prototype.slice.call({lookup});
            var registry = window.__lumiElements = window.__lumiElements || {{}};
            var next = window.__lumiNextId = window.__lumiNextId || 0;
            return found.map(function(el) {{
                var id = 'el-' + (next++);
                registry[id] = el;
                window.__lumiNextId = next;
                return id;
            }});"
        );
        let value = self.execute_script(&script, &[]).await?;
        match value {
            Value::Array(ids) => Ok(ids
                .into_iter()
                .filter_map(|id| id.as_str().map(str::to_string))
                .collect()),
            other => Err(BackendError::Rejected(format!(
                "unexpected lookup result: {}",
                other
            ))),
        }
    }

    /// Click an element
    async fn click(&self, element_id: &str) -> Result<(), BackendError> {
        self.with_element(element_id, "el.click(); return null;", &[])
            .await?;
        Ok(())
    }

    /// Clear an input element
    async fn clear(&self, element_id: &str) -> Result<(), BackendError> {
        self.with_element(
            element_id,
            "el.value = ''; el.dispatchEvent(new Event('input', {bubbles: true})); return null;",
            &[],
        )
        .await?;
        Ok(())
    }

    /// Type into an input element
    async fn send_keys(&self, element_id: &str, text: &str) -> Result<(), BackendError> {
        self.with_element(
            element_id,
            "el.value = (el.value || '') + arguments[1]; el.dispatchEvent(new Event('input', {bubbles: true})); return null;",
            &[Value::String(text.to_string())],
        )
        .await?;
        Ok(())
    }

    /// Visible text of an element
    async fn text(&self, element_id: &str) -> Result<String, BackendError> {
        let value = self
            .with_element(element_id, "return (el.innerText || el.textContent || '').trim();", &[])
            .await?;
        expect_string(value)
    }

    /// Resolve a registered element and run `body` with it bound to `el`
    async fn with_element(
        &self,
        element_id: &str,
        body: &str,
        extra: &[Value],
    ) -> Result<Value, BackendError> {
        let script = format!(
            r"var el = (window.__lumiElements || {{}})[arguments[0]];
            if (!el || !el.isConnected) {{ return {{ __lumiMissing: true }}; }}
            {body}"
        );
        let mut args = vec![Value::String(element_id.to_string())];
        args.extend_from_slice(extra);
        let value = self.execute_script(&script, &args).await?;
        if value.get("__lumiMissing").is_some() {
            return Err(BackendError::NoSuchElement(format!(
                "element {} is no longer attached to the page",
                element_id
            )));
        }
        Ok(value)
    }
}

fn expect_string(value: Value) -> Result<String, BackendError> {
    match value {
        Value::String(s) => Ok(s),
        Value::Null => Ok(String::new()),
        other => Err(BackendError::Rejected(format!(
            "expected a string, got {}",
            other
        ))),
    }
}

/// JavaScript expression producing an array-like of matches for `locator`
pub fn lookup_expression(locator: &Locator) -> Result<String, BackendError> {
    let value = serde_json::to_string(&locator.value)
        .map_err(|e| BackendError::Rejected(e.to_string()))?;
    let expr = match locator.strategy {
        LocatorStrategy::Css => format!("document.querySelectorAll({value})"),
        LocatorStrategy::Id => format!("[document.getElementById({value})].filter(Boolean)"),
        LocatorStrategy::Name => format!("document.getElementsByName({value})"),
        LocatorStrategy::ClassName => format!("document.getElementsByClassName({value})"),
        LocatorStrategy::TagName => format!("document.getElementsByTagName({value})"),
        LocatorStrategy::AccessibilityId => format!(
            "Array.prototype.filter.call(document.querySelectorAll('[aria-label]'), function(e) {{ return e.getAttribute('aria-label') === {value}; }})"
        ),
        LocatorStrategy::LinkText => format!(
            "Array.prototype.filter.call(document.getElementsByTagName('a'), function(e) {{ return (e.textContent || '').trim() === {value}; }})"
        ),
        LocatorStrategy::XPath => format!(
            "(function() {{ var r = document.evaluate({value}, document, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null); var out = []; for (var i = 0; i < r.snapshotLength; i++) {{ out.push(r.snapshotItem(i)); }} return out; }})()"
        ),
        LocatorStrategy::Predicate | LocatorStrategy::ClassChain => {
            return Err(BackendError::Rejected(format!(
                "locator strategy '{}' is not available in a web context",
                locator.strategy.as_str()
            )))
        }
    };
    Ok(expr)
}
