//! Capability negotiation
//!
//! Requests arrive either as a flat JSON-wire `desiredCapabilities` object or
//! as a W3C `{alwaysMatch, firstMatch}` pair; both flatten to one map with
//! vendor prefixes stripped.

use serde_json::{Map, Value};

use crate::error::ErrorKind;

const VENDOR_PREFIX: &str = "appium:";

/// Keys that must hold non-negative numbers when present
const DURATION_KEYS: [&str; 2] = ["implicitWait", "newCommandTimeout"];

/// Flatten a new-session request body into one capability map
pub fn flatten(request: &Value) -> Result<Map<String, Value>, ErrorKind> {
    let body = match request {
        Value::Null => return Ok(Map::new()),
        Value::Object(body) => body,
        other => {
            return Err(ErrorKind::CapabilityMismatch(format!(
                "capabilities must be an object, got {}",
                other
            )))
        }
    };

    let source = if let Some(desired) = body.get("desiredCapabilities") {
        merge_object(Map::new(), desired)?
    } else if let Some(w3c) = body.get("capabilities") {
        let always = w3c.get("alwaysMatch").cloned().unwrap_or(Value::Null);
        let first = w3c
            .get("firstMatch")
            .and_then(Value::as_array)
            .and_then(|entries| entries.first())
            .cloned()
            .unwrap_or(Value::Null);
        let merged = merge_object(Map::new(), &always)?;
        merge_object(merged, &first)?
    } else {
        body.clone()
    };

    Ok(source
        .into_iter()
        .map(|(key, value)| match key.strip_prefix(VENDOR_PREFIX) {
            Some(stripped) => (stripped.to_string(), value),
            None => (key, value),
        })
        .collect())
}

fn merge_object(mut into: Map<String, Value>, value: &Value) -> Result<Map<String, Value>, ErrorKind> {
    match value {
        Value::Null => Ok(into),
        Value::Object(map) => {
            into.extend(map.iter().map(|(k, v)| (k.clone(), v.clone())));
            Ok(into)
        }
        other => Err(ErrorKind::CapabilityMismatch(format!(
            "capability set must be an object, got {}",
            other
        ))),
    }
}

/// Check requested capabilities against what this driver serves
pub fn validate(caps: &Map<String, Value>, platform_name: &str) -> Result<(), ErrorKind> {
    if let Some(requested) = caps.get("platformName") {
        let requested = requested.as_str().ok_or_else(|| {
            ErrorKind::CapabilityMismatch("platformName must be a string".to_string())
        })?;
        if !requested.eq_ignore_ascii_case(platform_name) {
            return Err(ErrorKind::CapabilityMismatch(format!(
                "platformName '{}' is not supported (expected '{}')",
                requested, platform_name
            )));
        }
    }

    for key in DURATION_KEYS {
        if let Some(value) = caps.get(key) {
            match value.as_f64() {
                Some(n) if n >= 0.0 => {}
                _ => {
                    return Err(ErrorKind::CapabilityMismatch(format!(
                        "{} must be a non-negative number, got {}",
                        key, value
                    )))
                }
            }
        }
    }
    Ok(())
}

/// Overlay backend-reported capabilities on the requested ones
pub fn merge(requested: Map<String, Value>, actual: Map<String, Value>) -> Map<String, Value> {
    let mut merged = requested;
    merged.extend(actual);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten_w3c_strips_prefix() {
        let body = json!({
            "capabilities": {
                "alwaysMatch": { "platformName": "iOS", "appium:deviceName": "iPhone 15" },
                "firstMatch": [{ "appium:app": "UICatalog.app" }, { "appium:app": "ignored" }]
            }
        });
        let caps = flatten(&body).unwrap();
        assert_eq!(caps["deviceName"], "iPhone 15");
        assert_eq!(caps["app"], "UICatalog.app");
        assert_eq!(caps["platformName"], "iOS");
    }

    #[test]
    fn test_flatten_legacy_and_bare() {
        let caps = flatten(&json!({"desiredCapabilities": {"platformName": "ios"}})).unwrap();
        assert_eq!(caps["platformName"], "ios");

        let caps = flatten(&json!({"browserName": "Safari"})).unwrap();
        assert_eq!(caps["browserName"], "Safari");

        assert!(flatten(&Value::Null).unwrap().is_empty());
        assert!(flatten(&json!("iOS")).is_err());
        assert!(flatten(&json!({"desiredCapabilities": [1, 2]})).is_err());
    }

    #[test]
    fn test_validate() {
        let ok = flatten(&json!({"platformName": "IOS", "implicitWait": 0})).unwrap();
        assert!(validate(&ok, "iOS").is_ok());

        let wrong = flatten(&json!({"platformName": "Android"})).unwrap();
        assert!(matches!(validate(&wrong, "iOS"), Err(ErrorKind::CapabilityMismatch(_))));

        let negative = flatten(&json!({"newCommandTimeout": -1})).unwrap();
        assert!(validate(&negative, "iOS").is_err());

        let text = flatten(&json!({"implicitWait": "soon"})).unwrap();
        assert!(validate(&text, "iOS").is_err());
    }

    #[test]
    fn test_backend_wins_on_merge() {
        let requested = flatten(&json!({"deviceName": "any", "app": "x.app"})).unwrap();
        let actual = flatten(&json!({"deviceName": "iPhone 15", "udid": "abc"})).unwrap();
        let merged = merge(requested, actual);
        assert_eq!(merged["deviceName"], "iPhone 15");
        assert_eq!(merged["app"], "x.app");
        assert_eq!(merged["udid"], "abc");
    }
}
