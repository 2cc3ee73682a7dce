//! Simulated UICatalog screens
//!
//! Each screen is a flat list of elements under a navigation bar. Element
//! lookups, the XML source dump and the rendered screenshot are all derived
//! from that list.

use image::{DynamicImage, Rgb, RgbImage};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::Writer;
use regex::Regex;
use std::io::Cursor;
use std::sync::OnceLock;

use crate::driver::traits::{Locator, LocatorStrategy, Orientation, WindowSize};
use crate::driver::BackendError;

pub const APP_NAME: &str = "UICatalog";

/// Portrait screen size in points
pub const SCREEN: WindowSize = WindowSize {
    width: 375,
    height: 667,
};

const ROW_HEIGHT: u32 = 44;
const NAV_HEIGHT: u32 = 64;

const CATALOG_ITEMS: [&str; 16] = [
    "Action Sheets",
    "Activity Indicators",
    "Alert Views",
    "Buttons",
    "Date Picker",
    "Image View",
    "Page Control",
    "Picker View",
    "Progress Views",
    "Segmented Controls",
    "Sliders",
    "Steppers",
    "Switches",
    "Text Fields",
    "Text View",
    "Web View",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Catalog,
    Buttons,
    WebView,
}

impl Screen {
    pub fn title(&self) -> &'static str {
        match self {
            Screen::Catalog => APP_NAME,
            Screen::Buttons => "Buttons",
            Screen::WebView => "Web View",
        }
    }

    fn background(&self) -> Rgb<u8> {
        match self {
            Screen::Catalog => Rgb([239, 239, 244]),
            Screen::Buttons => Rgb([255, 255, 255]),
            Screen::WebView => Rgb([250, 250, 250]),
        }
    }
}

/// What tapping an element does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    None,
    Open(Screen),
    Back,
    /// Load the URL typed into the address field
    Go,
    Focus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimElement {
    pub kind: &'static str,
    pub name: String,
    pub value: Option<String>,
    pub action: Action,
}

impl SimElement {
    fn new(kind: &'static str, name: &str, action: Action) -> Self {
        Self {
            kind,
            name: name.to_string(),
            value: None,
            action,
        }
    }

    /// Visible text
    pub fn text(&self) -> String {
        self.value.clone().unwrap_or_else(|| self.name.clone())
    }

    fn attribute(&self, attr: &str) -> Option<String> {
        match attr {
            "name" | "label" => Some(self.name.clone()),
            "value" => self.value.clone(),
            "type" => Some(self.kind.to_string()),
            _ => None,
        }
    }
}

/// Elements on `screen`, navigation bar first
pub fn elements(screen: Screen, address: &str) -> Vec<SimElement> {
    let mut items = vec![SimElement::new(
        "XCUIElementTypeNavigationBar",
        screen.title(),
        Action::None,
    )];
    match screen {
        Screen::Catalog => {
            items.extend(CATALOG_ITEMS.iter().map(|item| {
                let action = match *item {
                    "Buttons" => Action::Open(Screen::Buttons),
                    "Web View" => Action::Open(Screen::WebView),
                    _ => Action::None,
                };
                SimElement::new("XCUIElementTypeCell", item, action)
            }));
        }
        Screen::Buttons => {
            items.push(SimElement::new("XCUIElementTypeButton", APP_NAME, Action::Back));
            for name in ["Button", "X Button", "Image", "Attributed String"] {
                items.push(SimElement::new("XCUIElementTypeButton", name, Action::None));
            }
        }
        Screen::WebView => {
            items.push(SimElement::new("XCUIElementTypeButton", APP_NAME, Action::Back));
            let mut field = SimElement::new("XCUIElementTypeTextField", "URL", Action::Focus);
            field.value = Some(address.to_string());
            items.push(field);
            items.push(SimElement::new("XCUIElementTypeButton", "Go", Action::Go));
        }
    }
    items
}

fn xpath_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"^//(\*|[A-Za-z]+)(?:\[@(name|label|value)\s*=\s*['"]([^'"]*)['"]\])?$"#)
            .expect("static xpath pattern")
    })
}

fn predicate_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"^(name|label|value|type)\s*==\s*['"]([^'"]*)['"]$"#)
            .expect("static predicate pattern")
    })
}

fn class_chain_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"^\*\*/(\*|[A-Za-z]+)(?:\[`(name|label|value)\s*==\s*["']([^"']*)["']`\])?$"#)
            .expect("static class chain pattern")
    })
}

/// Indexes of the elements matching `locator`
pub fn matching(items: &[SimElement], locator: &Locator) -> Result<Vec<usize>, BackendError> {
    let value = locator.value.as_str();
    let by = |pred: &dyn Fn(&SimElement) -> bool| -> Vec<usize> {
        items
            .iter()
            .enumerate()
            .filter(|(_, el)| pred(el))
            .map(|(i, _)| i)
            .collect()
    };

    let structured = |pattern: &Regex, query: &str| -> Result<Vec<usize>, BackendError> {
        let caps = pattern.captures(query).ok_or_else(|| {
            BackendError::Rejected(format!(
                "unsupported {} '{}'",
                locator.strategy.as_str(),
                query
            ))
        })?;
        let kind = caps.get(1).map(|m| m.as_str()).unwrap_or("*");
        let filter = caps.get(2).zip(caps.get(3));
        Ok(by(&|el| {
            (kind == "*" || el.kind == kind)
                && filter.map_or(true, |(attr, expected)| {
                    el.attribute(attr.as_str()).as_deref() == Some(expected.as_str())
                })
        }))
    };

    match locator.strategy {
        LocatorStrategy::AccessibilityId | LocatorStrategy::Id | LocatorStrategy::Name => {
            Ok(by(&|el| el.name == value))
        }
        LocatorStrategy::ClassName => Ok(by(&|el| el.kind == value)),
        LocatorStrategy::XPath => structured(xpath_pattern(), value),
        LocatorStrategy::ClassChain => structured(class_chain_pattern(), value),
        LocatorStrategy::Predicate => {
            let caps = predicate_pattern().captures(value).ok_or_else(|| {
                BackendError::Rejected(format!("unsupported predicate '{}'", value))
            })?;
            let (attr, expected) = (&caps[1], &caps[2]);
            Ok(by(&|el| el.attribute(attr).as_deref() == Some(expected)))
        }
        LocatorStrategy::Css | LocatorStrategy::TagName | LocatorStrategy::LinkText => {
            Err(BackendError::Rejected(format!(
                "locator strategy '{}' is only available in web contexts",
                locator.strategy.as_str()
            )))
        }
    }
}

/// Screen size for `orientation`
pub fn window_size(orientation: Orientation) -> WindowSize {
    match orientation {
        Orientation::Portrait => SCREEN,
        Orientation::Landscape => WindowSize {
            width: SCREEN.height,
            height: SCREEN.width,
        },
    }
}

fn xml_error(err: impl std::fmt::Display) -> BackendError {
    BackendError::Rejected(format!("failed to write source tree: {}", err))
}

/// XCUITest-style source dump of `items`
pub fn source(items: &[SimElement], orientation: Orientation) -> Result<String, BackendError> {
    let size = window_size(orientation);
    let (width, height) = (size.width.to_string(), size.height.to_string());
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(xml_error)?;

    let mut app = BytesStart::new("XCUIElementTypeApplication");
    app.push_attribute(("type", "XCUIElementTypeApplication"));
    app.push_attribute(("name", APP_NAME));
    app.push_attribute(("label", APP_NAME));
    app.push_attribute(("enabled", "true"));
    app.push_attribute(("visible", "true"));
    app.push_attribute(("width", width.as_str()));
    app.push_attribute(("height", height.as_str()));
    writer.write_event(Event::Start(app)).map_err(xml_error)?;

    let mut window = BytesStart::new("XCUIElementTypeWindow");
    window.push_attribute(("type", "XCUIElementTypeWindow"));
    window.push_attribute(("enabled", "true"));
    window.push_attribute(("visible", "true"));
    writer.write_event(Event::Start(window)).map_err(xml_error)?;

    for (row, el) in items.iter().enumerate() {
        let y = if row == 0 {
            0
        } else {
            NAV_HEIGHT + (row as u32 - 1) * ROW_HEIGHT
        };
        let y = y.to_string();
        let mut node = BytesStart::new(el.kind);
        node.push_attribute(("type", el.kind));
        node.push_attribute(("name", el.name.as_str()));
        node.push_attribute(("label", el.name.as_str()));
        if let Some(value) = &el.value {
            node.push_attribute(("value", value.as_str()));
        }
        node.push_attribute(("enabled", "true"));
        node.push_attribute(("visible", "true"));
        node.push_attribute(("x", "0"));
        node.push_attribute(("y", y.as_str()));
        node.push_attribute(("width", width.as_str()));
        writer.write_event(Event::Empty(node)).map_err(xml_error)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("XCUIElementTypeWindow")))
        .map_err(xml_error)?;
    writer
        .write_event(Event::End(BytesEnd::new("XCUIElementTypeApplication")))
        .map_err(xml_error)?;

    String::from_utf8(writer.into_inner().into_inner()).map_err(xml_error)
}

/// Rows drawn below the navigation bar, which is always the first element
pub fn content_rows(items: &[SimElement]) -> usize {
    items.len().saturating_sub(1)
}

/// Render the screen as a PNG
///
/// The navigation bar and each row are drawn as bands, so the image changes
/// with both the screen and the orientation.
pub fn screenshot(screen: Screen, rows: usize, orientation: Orientation) -> Result<Vec<u8>, BackendError> {
    let size = window_size(orientation);
    let mut canvas = RgbImage::from_pixel(size.width, size.height, screen.background());

    let nav = Rgb([248, 248, 248]);
    let separator = Rgb([200, 199, 204]);
    for y in 0..NAV_HEIGHT.min(size.height) {
        for x in 0..size.width {
            canvas.put_pixel(x, y, nav);
        }
    }
    for row in 0..rows as u32 {
        let y = NAV_HEIGHT + (row + 1) * ROW_HEIGHT - 1;
        if y >= size.height {
            break;
        }
        for x in 16..size.width {
            canvas.put_pixel(x, y, separator);
        }
    }

    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(canvas)
        .write_to(&mut buf, image::ImageFormat::Png)
        .map_err(|e| BackendError::Rejected(format!("failed to encode screenshot: {}", e)))?;
    Ok(buf.into_inner())
}
