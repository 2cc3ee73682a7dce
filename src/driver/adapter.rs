//! Backend adapters
//!
//! The dispatcher picks one adapter per command based on the active context;
//! each adapter translates [`Command`]s into calls on its backend, so command
//! implementations never need to know that contexts exist.

use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::{json, Value};
use std::sync::Arc;

use super::traits::{NativeBackend, NativeRequest, NativeResponse, Orientation, WebBackend, WindowSize};
use super::BackendError;
use crate::session::command::{Command, CommandOutput, ElementHandle};
use crate::session::context::{ContextKind, ExecutionContext};

/// Root marker wrapped around native source dumps
pub const NATIVE_SOURCE_ROOT: &str = "AppiumAUT";

/// Key used by W3C element references
const W3C_ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Executes commands against one backend
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// The context kind this adapter serves
    fn kind(&self) -> ContextKind;

    async fn execute(
        &self,
        context: &ExecutionContext,
        command: &Command,
    ) -> Result<CommandOutput, BackendError>;
}

// ============================================================================
// Native
// ============================================================================

pub struct NativeAdapter {
    backend: Arc<dyn NativeBackend>,
}

impl NativeAdapter {
    pub fn new(backend: Arc<dyn NativeBackend>) -> Self {
        Self { backend }
    }

    async fn call(&self, command: &'static str, params: Value) -> Result<NativeResponse, BackendError> {
        self.backend.request(NativeRequest::new(command, params)).await
    }

    async fn value(&self, command: &'static str, params: Value) -> Result<Value, BackendError> {
        match self.call(command, params).await? {
            NativeResponse::Value(value) => Ok(value),
            NativeResponse::Ack => Ok(Value::Null),
            other => Err(unexpected(command, &other)),
        }
    }

    async fn ack(&self, command: &'static str, params: Value) -> Result<CommandOutput, BackendError> {
        self.call(command, params).await?;
        Ok(CommandOutput::Ack)
    }
}

#[async_trait]
impl BackendAdapter for NativeAdapter {
    fn kind(&self) -> ContextKind {
        ContextKind::Native
    }

    async fn execute(
        &self,
        context: &ExecutionContext,
        command: &Command,
    ) -> Result<CommandOutput, BackendError> {
        match command {
            Command::FindElement(locator) => {
                let value = self
                    .value(
                        "findElement",
                        json!({ "using": locator.strategy.as_str(), "value": locator.value }),
                    )
                    .await?;
                let id = element_id(&value).ok_or_else(|| {
                    BackendError::Rejected(format!("malformed element reference: {}", value))
                })?;
                Ok(CommandOutput::Element(ElementHandle {
                    id,
                    context: context.id.clone(),
                }))
            }
            Command::FindElements(locator) => {
                let value = self
                    .value(
                        "findElements",
                        json!({ "using": locator.strategy.as_str(), "value": locator.value }),
                    )
                    .await?;
                let handles = value
                    .as_array()
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(element_id)
                            .map(|id| ElementHandle {
                                id,
                                context: context.id.clone(),
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(CommandOutput::Elements(handles))
            }
            Command::Click(el) => self.ack("click", json!({ "element": el.id })).await,
            Command::Clear(el) => self.ack("clear", json!({ "element": el.id })).await,
            Command::SendKeys(el, text) => {
                self.ack("sendKeys", json!({ "element": el.id, "text": text }))
                    .await
            }
            Command::GetText(el) => {
                let value = self.value("text", json!({ "element": el.id })).await?;
                Ok(CommandOutput::Text(value.as_str().unwrap_or_default().to_string()))
            }
            Command::GetSource => match self.call("source", Value::Null).await? {
                NativeResponse::Tree(tree) => Ok(CommandOutput::Text(wrap_native_source(&tree)?)),
                NativeResponse::Value(Value::String(tree)) => {
                    Ok(CommandOutput::Text(wrap_native_source(&tree)?))
                }
                other => Err(unexpected("source", &other)),
            },
            Command::Back => self.ack("back", Value::Null).await,
            Command::Screenshot => match self.call("screenshot", Value::Null).await? {
                NativeResponse::Image(bytes) => Ok(CommandOutput::Image(bytes)),
                other => Err(unexpected("screenshot", &other)),
            },
            Command::GetOrientation => {
                let value = self.value("getOrientation", Value::Null).await?;
                let raw = value.as_str().unwrap_or_default();
                raw.parse::<Orientation>()
                    .map(CommandOutput::Orientation)
                    .map_err(|raw| BackendError::Rejected(format!("unknown orientation '{}'", raw)))
            }
            Command::SetOrientation(mode) => {
                self.ack("setOrientation", json!({ "orientation": mode.as_str() }))
                    .await
            }
            Command::GetWindowSize => {
                let value = self.value("windowSize", Value::Null).await?;
                let size: WindowSize = serde_json::from_value(value)
                    .map_err(|e| BackendError::Rejected(format!("malformed window size: {}", e)))?;
                Ok(CommandOutput::Size(size))
            }
            Command::BackgroundApp(duration) => {
                self.ack("deactivateApp", json!({ "duration": duration.as_secs_f64() }))
                    .await
            }
            Command::MobileCommand { name, args } => {
                let value = self
                    .value("mobile", json!({ "name": name, "args": args }))
                    .await?;
                Ok(CommandOutput::Value(value))
            }
            Command::Scroll(args) => self.ack("scroll", args.clone()).await,
            Command::Title | Command::GetUrl | Command::Navigate(_) | Command::ExecuteScript { .. } => {
                Err(BackendError::Rejected(format!(
                    "{} is not available on the native backend",
                    command.name()
                )))
            }
        }
    }
}

fn unexpected(command: &str, response: &NativeResponse) -> BackendError {
    let kind = match response {
        NativeResponse::Tree(_) => "tree",
        NativeResponse::Image(_) => "image",
        NativeResponse::Value(_) => "value",
        NativeResponse::Ack => "ack",
    };
    BackendError::Rejected(format!("{}: unexpected {} response", command, kind))
}

/// Pull an element id out of a legacy or W3C element reference
fn element_id(value: &Value) -> Option<String> {
    value
        .get("ELEMENT")
        .or_else(|| value.get(W3C_ELEMENT_KEY))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Validate a native tree dump and wrap it in the provenance marker
pub fn wrap_native_source(tree: &str) -> Result<String, BackendError> {
    let mut reader = Reader::from_str(tree);
    let mut body_start = None;
    loop {
        let position = reader.buffer_position();
        match reader.read_event() {
            Ok(Event::Eof) => break,
            Ok(Event::Decl(_)) | Ok(Event::Comment(_)) | Ok(Event::DocType(_)) => {}
            Ok(Event::Text(text)) if body_start.is_none() && text.iter().all(u8::is_ascii_whitespace) => {}
            Ok(_) => {
                if body_start.is_none() {
                    body_start = Some(position);
                }
            }
            Err(e) => {
                return Err(BackendError::Rejected(format!(
                    "malformed source tree at byte {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
        }
    }

    let body = body_start.map(|start| tree[start..].trim()).unwrap_or_default();
    Ok(format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><{root}>{body}</{root}>",
        root = NATIVE_SOURCE_ROOT
    ))
}

// ============================================================================
// Web
// ============================================================================

pub struct WebAdapter {
    backend: Arc<dyn WebBackend>,
}

impl WebAdapter {
    pub fn new(backend: Arc<dyn WebBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl BackendAdapter for WebAdapter {
    fn kind(&self) -> ContextKind {
        ContextKind::Web
    }

    async fn execute(
        &self,
        context: &ExecutionContext,
        command: &Command,
    ) -> Result<CommandOutput, BackendError> {
        let handles = |ids: Vec<String>| -> Vec<ElementHandle> {
            ids.into_iter()
                .map(|id| ElementHandle {
                    id,
                    context: context.id.clone(),
                })
                .collect()
        };

        match command {
            Command::FindElement(locator) => {
                let ids = self.backend.find_elements(locator).await?;
                handles(ids)
                    .into_iter()
                    .next()
                    .map(CommandOutput::Element)
                    .ok_or_else(|| {
                        BackendError::NoSuchElement(format!("no element in {} matched", context.id))
                    })
            }
            Command::FindElements(locator) => {
                let ids = self.backend.find_elements(locator).await?;
                Ok(CommandOutput::Elements(handles(ids)))
            }
            Command::Click(el) => {
                self.backend.click(&el.id).await?;
                Ok(CommandOutput::Ack)
            }
            Command::Clear(el) => {
                self.backend.clear(&el.id).await?;
                Ok(CommandOutput::Ack)
            }
            Command::SendKeys(el, text) => {
                self.backend.send_keys(&el.id, text).await?;
                Ok(CommandOutput::Ack)
            }
            Command::GetText(el) => Ok(CommandOutput::Text(self.backend.text(&el.id).await?)),
            Command::GetSource => Ok(CommandOutput::Text(self.backend.source().await?)),
            Command::Back => {
                self.backend.back().await?;
                Ok(CommandOutput::Ack)
            }
            Command::Title => Ok(CommandOutput::Text(self.backend.title().await?)),
            Command::GetUrl => Ok(CommandOutput::Text(self.backend.url().await?)),
            Command::Navigate(url) => {
                self.backend.navigate(url).await?;
                Ok(CommandOutput::Ack)
            }
            Command::ExecuteScript { script, args } => Ok(CommandOutput::Value(
                self.backend.execute_script(script, args).await?,
            )),
            other => Err(BackendError::Rejected(format!(
                "{} is not available on the web backend",
                other.name()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_strips_declaration() {
        let tree = r#"<?xml version="1.0" encoding="UTF-8"?>
<XCUIElementTypeApplication name="UICatalog"><XCUIElementTypeWindow/></XCUIElementTypeApplication>"#;
        let wrapped = wrap_native_source(tree).unwrap();
        assert!(wrapped.contains("<AppiumAUT><XCUIElementTypeApplication"));
        assert!(wrapped.ends_with("</XCUIElementTypeApplication></AppiumAUT>"));
        assert_eq!(wrapped.matches("<?xml").count(), 1);
    }

    #[test]
    fn test_wrap_rejects_malformed_tree() {
        assert!(wrap_native_source("<XCUIElementTypeApplication><oops></XCUIElementTypeApplication>").is_err());
    }

    #[test]
    fn test_element_id_accepts_both_forms() {
        assert_eq!(element_id(&json!({"ELEMENT": "42"})), Some("42".to_string()));
        assert_eq!(
            element_id(&json!({ W3C_ELEMENT_KEY: "43" })),
            Some("43".to_string())
        );
        assert_eq!(element_id(&json!({"value": 1})), None);
    }
}
