//! Command vocabulary
//!
//! Every operation a session accepts has a [`CommandName`] whose
//! classification and context requirement are fixed, never derived from the
//! arguments. Backend-bound operations carry their parameters in [`Command`].

use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;

use crate::driver::traits::{Locator, Orientation, WindowSize};

/// Whether a command needs the session's exclusive lane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Blocking,
    NonBlocking,
}

/// Which backend a command may run against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextRequirement {
    /// Handled by the session itself
    Agnostic,
    /// Always the native backend, whatever the active context
    Device,
    /// The backend of the active context
    Routed,
    /// Only valid while the native context is active
    NativeOnly,
    /// Only valid while a webview context is active
    WebOnly,
}

macro_rules! command_names {
    ($($variant:ident => $wire:literal, $class:ident, $req:ident;)+) => {
        /// Static name of every session command
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum CommandName {
            $($variant,)+
        }

        impl CommandName {
            pub const ALL: &'static [CommandName] = &[$(CommandName::$variant,)+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(CommandName::$variant => $wire,)+
                }
            }

            pub fn classification(&self) -> Classification {
                match self {
                    $(CommandName::$variant => Classification::$class,)+
                }
            }

            pub fn requirement(&self) -> ContextRequirement {
                match self {
                    $(CommandName::$variant => ContextRequirement::$req,)+
                }
            }
        }
    };
}

command_names! {
    Status => "status", NonBlocking, Agnostic;
    NewSession => "createSession", Blocking, Agnostic;
    GetCapabilities => "getSession", NonBlocking, Agnostic;
    DeleteSession => "deleteSession", Blocking, Agnostic;
    SetImplicitWait => "implicitWait", NonBlocking, Agnostic;
    FindElement => "findElement", Blocking, Routed;
    FindElements => "findElements", Blocking, Routed;
    Click => "click", Blocking, Routed;
    Clear => "clear", Blocking, Routed;
    SendKeys => "setValue", Blocking, Routed;
    GetText => "getText", Blocking, Routed;
    GetSource => "getPageSource", Blocking, Routed;
    Back => "back", Blocking, Routed;
    Screenshot => "getScreenshot", Blocking, Device;
    GetOrientation => "getOrientation", Blocking, Device;
    SetOrientation => "setOrientation", Blocking, Device;
    GetWindowSize => "getWindowSize", Blocking, Device;
    BackgroundApp => "background", Blocking, Device;
    MobileCommand => "mobile", Blocking, Device;
    Scroll => "scroll", Blocking, NativeOnly;
    Title => "title", Blocking, WebOnly;
    GetUrl => "getUrl", Blocking, WebOnly;
    Navigate => "setUrl", Blocking, WebOnly;
    ExecuteScript => "execute", Blocking, WebOnly;
    LogTypes => "getLogTypes", NonBlocking, Agnostic;
    GetLog => "getLog", NonBlocking, Agnostic;
    Contexts => "getContexts", Blocking, Agnostic;
    CurrentContext => "getCurrentContext", NonBlocking, Agnostic;
    SwitchContext => "setContext", Blocking, Agnostic;
    SetGeoLocation => "setGeoLocation", NonBlocking, Agnostic;
    Shake => "mobileShake", NonBlocking, Agnostic;
    Lock => "lock", NonBlocking, Agnostic;
}

impl CommandName {
    /// Non-zero code used by the lock-free in-flight marker
    pub fn code(&self) -> u8 {
        *self as u8 + 1
    }

    pub fn from_code(code: u8) -> Option<CommandName> {
        Self::ALL.iter().copied().find(|name| name.code() == code)
    }

    pub fn is_blocking(&self) -> bool {
        self.classification() == Classification::Blocking
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to an element found in a specific context
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ElementHandle {
    #[serde(rename = "ELEMENT")]
    pub id: String,
    #[serde(skip)]
    pub context: String,
}

/// A backend-bound command and its parameters
#[derive(Debug, Clone)]
pub enum Command {
    FindElement(Locator),
    FindElements(Locator),
    Click(ElementHandle),
    Clear(ElementHandle),
    SendKeys(ElementHandle, String),
    GetText(ElementHandle),
    GetSource,
    Back,
    Screenshot,
    GetOrientation,
    SetOrientation(Orientation),
    GetWindowSize,
    BackgroundApp(Duration),
    MobileCommand { name: String, args: Value },
    Scroll(Value),
    Title,
    GetUrl,
    Navigate(String),
    ExecuteScript { script: String, args: Vec<Value> },
}

impl Command {
    pub fn name(&self) -> CommandName {
        match self {
            Command::FindElement(_) => CommandName::FindElement,
            Command::FindElements(_) => CommandName::FindElements,
            Command::Click(_) => CommandName::Click,
            Command::Clear(_) => CommandName::Clear,
            Command::SendKeys(..) => CommandName::SendKeys,
            Command::GetText(_) => CommandName::GetText,
            Command::GetSource => CommandName::GetSource,
            Command::Back => CommandName::Back,
            Command::Screenshot => CommandName::Screenshot,
            Command::GetOrientation => CommandName::GetOrientation,
            Command::SetOrientation(_) => CommandName::SetOrientation,
            Command::GetWindowSize => CommandName::GetWindowSize,
            Command::BackgroundApp(_) => CommandName::BackgroundApp,
            Command::MobileCommand { .. } => CommandName::MobileCommand,
            Command::Scroll(_) => CommandName::Scroll,
            Command::Title => CommandName::Title,
            Command::GetUrl => CommandName::GetUrl,
            Command::Navigate(_) => CommandName::Navigate,
            Command::ExecuteScript { .. } => CommandName::ExecuteScript,
        }
    }

    /// Element the command operates on, if any
    pub fn element(&self) -> Option<&ElementHandle> {
        match self {
            Command::Click(el) | Command::Clear(el) | Command::GetText(el) => Some(el),
            Command::SendKeys(el, _) => Some(el),
            _ => None,
        }
    }

    pub fn locator(&self) -> Option<&Locator> {
        match self {
            Command::FindElement(loc) | Command::FindElements(loc) => Some(loc),
            _ => None,
        }
    }
}

/// What a backend adapter returns
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutput {
    Ack,
    Element(ElementHandle),
    Elements(Vec<ElementHandle>),
    Text(String),
    Image(Vec<u8>),
    Orientation(Orientation),
    Size(WindowSize),
    Value(Value),
}

impl CommandOutput {
    fn kind(&self) -> &'static str {
        match self {
            CommandOutput::Ack => "ack",
            CommandOutput::Element(_) => "element",
            CommandOutput::Elements(_) => "elements",
            CommandOutput::Text(_) => "text",
            CommandOutput::Image(_) => "image",
            CommandOutput::Orientation(_) => "orientation",
            CommandOutput::Size(_) => "size",
            CommandOutput::Value(_) => "value",
        }
    }

    /// Describe an output that didn't match what the caller expected
    pub fn unexpected(&self, wanted: &str) -> String {
        format!("expected {} response, backend returned {}", wanted, self.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip() {
        for name in CommandName::ALL {
            assert_ne!(name.code(), 0);
            assert_eq!(CommandName::from_code(name.code()), Some(*name));
        }
        assert_eq!(CommandName::from_code(0), None);
    }

    #[test]
    fn test_status_is_the_only_liveness_read() {
        assert_eq!(CommandName::Status.classification(), Classification::NonBlocking);
        assert_eq!(CommandName::FindElement.classification(), Classification::Blocking);
        // context switches take the lane
        assert!(CommandName::SwitchContext.is_blocking());
        assert!(!CommandName::Shake.is_blocking());
    }

    #[test]
    fn test_requirements() {
        assert_eq!(CommandName::Screenshot.requirement(), ContextRequirement::Device);
        assert_eq!(CommandName::Title.requirement(), ContextRequirement::WebOnly);
        assert_eq!(CommandName::Scroll.requirement(), ContextRequirement::NativeOnly);
        assert_eq!(CommandName::GetSource.requirement(), ContextRequirement::Routed);
    }

    #[test]
    fn test_backend_bound_commands_take_the_lane() {
        for name in CommandName::ALL {
            if name.requirement() != ContextRequirement::Agnostic {
                assert!(name.is_blocking(), "{} reaches a backend", name);
            }
            if !name.is_blocking() {
                assert_eq!(name.requirement(), ContextRequirement::Agnostic, "{}", name);
            }
        }
    }
}
