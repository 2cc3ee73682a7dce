use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

use super::SimDevice;
use crate::driver::traits::{Locator, LocatorStrategy, WebBackend, WebPage};
use crate::driver::BackendError;

pub const GUINEA_PIG_TITLE: &str = "I am a page title";

const BLANK_URL: &str = "about:blank";

#[derive(Debug, Clone, PartialEq)]
struct WebNode {
    tag: &'static str,
    id: &'static str,
    text: &'static str,
    value: String,
}

impl WebNode {
    fn new(tag: &'static str, id: &'static str, text: &'static str) -> Self {
        Self {
            tag,
            id,
            text,
            value: String::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct LoadedPage {
    url: String,
    title: String,
    nodes: Vec<WebNode>,
}

impl LoadedPage {
    fn blank() -> Self {
        Self::fetch(BLANK_URL)
    }

    fn fetch(url: &str) -> Self {
        if url.contains("guinea-pig") {
            Self {
                url: url.to_string(),
                title: GUINEA_PIG_TITLE.to_string(),
                nodes: vec![
                    WebNode::new("h1", "", "This page is a Selenium sandbox"),
                    WebNode::new("a", "i am a link", "i am a link"),
                    WebNode::new("div", "i_am_an_id", "I am a div"),
                    WebNode::new("input", "i_am_a_textbox", ""),
                ],
            }
        } else {
            Self {
                url: url.to_string(),
                title: String::new(),
                nodes: Vec::new(),
            }
        }
    }

    fn html(&self) -> String {
        let body: String = self
            .nodes
            .iter()
            .map(|node| match node.tag {
                "input" => format!("<input id=\"{}\" value=\"{}\">", node.id, node.value),
                tag => format!("<{tag} id=\"{}\">{}</{tag}>", node.id, node.text),
            })
            .collect();
        format!(
            "<html><head><title>{}</title></head><body>{}</body></html>",
            self.title, body
        )
    }
}

/// The single webview hosted by the web view screen
pub(super) struct WebView {
    page_id: String,
    opened_at: Instant,
    page: LoadedPage,
    history: Vec<String>,
    /// Bumped on navigation; element ids embed it
    generation: u64,
}

impl WebView {
    pub(super) fn new(page_id: String, opened_at: Instant) -> Self {
        Self {
            page_id,
            opened_at,
            page: LoadedPage::blank(),
            history: Vec::new(),
            generation: 0,
        }
    }

    pub(super) fn load(&mut self, url: &str) {
        let url = if url.is_empty() { BLANK_URL } else { url };
        self.history.push(self.page.url.clone());
        self.page = LoadedPage::fetch(url);
        self.generation += 1;
    }

    fn back(&mut self) {
        if let Some(previous) = self.history.pop() {
            self.page = LoadedPage::fetch(&previous);
            self.generation += 1;
        }
    }

    fn describe(&self) -> WebPage {
        WebPage {
            id: self.page_id.clone(),
            title: self.page.title.clone(),
            url: self.page.url.clone(),
        }
    }
}

/// Web inspector backend of a [`SimDevice`]
pub struct SimWeb {
    device: Arc<SimDevice>,
}

impl SimWeb {
    pub fn new(device: Arc<SimDevice>) -> Self {
        Self { device }
    }

    /// Run `f` against the attached page
    fn with_page<T>(&self, f: impl FnOnce(&mut WebView) -> Result<T, BackendError>) -> Result<T, BackendError> {
        self.device.ensure_reachable()?;
        let mut state = self.device.state();
        let attached = state
            .attached
            .clone()
            .ok_or_else(|| BackendError::Rejected("not attached to a webview".to_string()))?;
        match state.webview.as_mut() {
            Some(webview) if webview.page_id == attached => f(webview),
            _ => Err(BackendError::PageClosed(attached)),
        }
    }

    fn node_index(webview: &WebView, element_id: &str) -> Result<usize, BackendError> {
        let stale = || BackendError::NoSuchElement(format!("element {} is no longer attached to the page", element_id));
        let (generation, index) = element_id
            .strip_prefix("el-")
            .and_then(|rest| rest.split_once('-'))
            .ok_or_else(stale)?;
        let (generation, index) = (
            generation.parse::<u64>().map_err(|_| stale())?,
            index.parse::<usize>().map_err(|_| stale())?,
        );
        if generation != webview.generation || index >= webview.page.nodes.len() {
            return Err(stale());
        }
        Ok(index)
    }
}

#[async_trait]
impl WebBackend for SimWeb {
    async fn pages(&self) -> Result<Vec<WebPage>, BackendError> {
        self.device.ensure_reachable()?;
        let delay = self.device.options.webview_attach_delay;
        let state = self.device.state();
        Ok(state
            .webview
            .iter()
            .filter(|webview| webview.opened_at.elapsed() >= delay)
            .map(WebView::describe)
            .collect())
    }

    async fn attach(&self, page_id: &str) -> Result<(), BackendError> {
        let visible = self.pages().await?.iter().any(|page| page.id == page_id);
        if !visible {
            return Err(BackendError::PageClosed(page_id.to_string()));
        }
        self.device.state().attached = Some(page_id.to_string());
        Ok(())
    }

    async fn detach(&self) -> Result<(), BackendError> {
        self.device.state().attached = None;
        Ok(())
    }

    /// Only a handful of well-known scripts are understood
    async fn execute_script(&self, script: &str, args: &[Value]) -> Result<Value, BackendError> {
        let script = script.trim();
        self.with_page(|webview| {
            if script == "return arguments;" {
                Ok(Value::Array(args.to_vec()))
            } else if script.contains("document.title") {
                Ok(Value::String(webview.page.title.clone()))
            } else if script.contains("location.href") && script.starts_with("return") {
                Ok(Value::String(webview.page.url.clone()))
            } else {
                Err(BackendError::Rejected(format!(
                    "the simulated webview cannot evaluate '{}'",
                    script
                )))
            }
        })
    }

    async fn title(&self) -> Result<String, BackendError> {
        self.with_page(|webview| Ok(webview.page.title.clone()))
    }

    async fn url(&self) -> Result<String, BackendError> {
        self.with_page(|webview| Ok(webview.page.url.clone()))
    }

    async fn navigate(&self, url: &str) -> Result<(), BackendError> {
        self.with_page(|webview| {
            webview.load(url);
            Ok(())
        })
    }

    async fn source(&self) -> Result<String, BackendError> {
        self.with_page(|webview| Ok(webview.page.html()))
    }

    async fn back(&self) -> Result<(), BackendError> {
        self.with_page(|webview| {
            webview.back();
            Ok(())
        })
    }

    async fn find_elements(&self, locator: &Locator) -> Result<Vec<String>, BackendError> {
        let value = locator.value.as_str();
        let strategy = locator.strategy;
        self.with_page(|webview| {
            let matches = |node: &WebNode| match strategy {
                LocatorStrategy::Id | LocatorStrategy::Name | LocatorStrategy::AccessibilityId => {
                    Ok(node.id == value)
                }
                LocatorStrategy::TagName => Ok(node.tag == value),
                LocatorStrategy::LinkText => Ok(node.tag == "a" && node.text == value),
                LocatorStrategy::Css => match value.strip_prefix('#') {
                    Some(id) => Ok(node.id == id),
                    None => Ok(node.tag == value),
                },
                other => Err(BackendError::Rejected(format!(
                    "locator strategy '{}' is not supported by the simulated webview",
                    other.as_str()
                ))),
            };

            let mut ids = Vec::new();
            for (index, node) in webview.page.nodes.iter().enumerate() {
                if matches(node)? {
                    ids.push(format!("el-{}-{}", webview.generation, index));
                }
            }
            Ok(ids)
        })
    }

    async fn click(&self, element_id: &str) -> Result<(), BackendError> {
        self.with_page(|webview| Self::node_index(webview, element_id).map(|_| ()))
    }

    async fn clear(&self, element_id: &str) -> Result<(), BackendError> {
        self.with_page(|webview| {
            let index = Self::node_index(webview, element_id)?;
            webview.page.nodes[index].value.clear();
            Ok(())
        })
    }

    async fn send_keys(&self, element_id: &str, text: &str) -> Result<(), BackendError> {
        self.with_page(|webview| {
            let index = Self::node_index(webview, element_id)?;
            webview.page.nodes[index].value.push_str(text);
            Ok(())
        })
    }

    async fn text(&self, element_id: &str) -> Result<String, BackendError> {
        self.with_page(|webview| {
            let index = Self::node_index(webview, element_id)?;
            let node = &webview.page.nodes[index];
            Ok(if node.tag == "input" {
                node.value.clone()
            } else {
                node.text.to_string()
            })
        })
    }
}
