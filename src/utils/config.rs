//! Driver configuration
//!
//! Loaded from an optional YAML file. `${VAR}` references anywhere in the
//! file are replaced with environment variables before parsing; unknown
//! variables are left as written. Every field has a default, so an empty
//! file (or no file at all) is a valid configuration.

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::driver::ios::DEFAULT_WDA_PORT;
use crate::driver::web::DEFAULT_INSPECTOR_PORT;
use crate::session::SessionSettings;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DriverConfig {
    /// Platform matched against the `platformName` capability
    pub platform_name: String,
    /// Implicit wait for new sessions (ms)
    pub implicit_wait_ms: u64,
    /// Pause between element lookup attempts (ms)
    pub poll_interval_ms: u64,
    /// Backend status polling (ms); 0 disables it
    pub heartbeat_interval_ms: u64,
    /// Entries kept per log kind
    pub log_capacity: usize,
    pub server: ServerConfig,
    pub wda: WdaConfig,
    /// Absent when the device has no debuggable webviews
    pub web_inspector: Option<InspectorConfig>,
    pub simulator: SimulatorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WdaConfig {
    pub host: String,
    pub port: u16,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InspectorConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SimulatorConfig {
    /// Delay before a freshly opened webview can be attached (ms)
    pub webview_attach_delay_ms: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            platform_name: "iOS".to_string(),
            implicit_wait_ms: 0,
            poll_interval_ms: 100,
            heartbeat_interval_ms: 5000,
            log_capacity: 1000,
            server: ServerConfig::default(),
            wda: WdaConfig::default(),
            web_inspector: None,
            simulator: SimulatorConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4723,
        }
    }
}

impl Default for WdaConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_WDA_PORT,
            timeout_secs: 30,
        }
    }
}

impl Default for InspectorConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_INSPECTOR_PORT,
        }
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            webview_attach_delay_ms: 300,
        }
    }
}

impl DriverConfig {
    /// Load from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Parse YAML text, substituting `${VAR}` from the environment first
    pub fn parse(content: &str) -> Result<Self> {
        let content = substitute_env(content, |name| std::env::var(name).ok());
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: DriverConfig =
            serde_yaml::from_str(&content).context("Failed to parse YAML content")?;
        Ok(config)
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            platform_name: self.platform_name.clone(),
            implicit_wait: Duration::from_millis(self.implicit_wait_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            heartbeat_interval: match self.heartbeat_interval_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
        }
    }
}

/// Replace `${NAME}` with `lookup(NAME)`, keeping unknown references verbatim
fn substitute_env(text: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
    re.replace_all(text, |caps: &regex::Captures| {
        lookup(&caps[1]).unwrap_or_else(|| caps[0].to_string())
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_default() {
        assert_eq!(DriverConfig::parse("").unwrap(), DriverConfig::default());
        let settings = DriverConfig::default().session_settings();
        assert_eq!(settings.platform_name, "iOS");
        assert_eq!(settings.heartbeat_interval, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_partial_config() {
        let config = DriverConfig::parse(
            r#"
implicitWaitMs: 2500
heartbeatIntervalMs: 0
wda:
  host: 192.168.1.20
webInspector:
  port: 9222
"#,
        )
        .unwrap();

        assert_eq!(config.wda.host, "192.168.1.20");
        assert_eq!(config.wda.port, DEFAULT_WDA_PORT);
        assert_eq!(config.server.port, 4723);
        let inspector = config.web_inspector.clone().unwrap();
        assert_eq!(inspector.host, "localhost");
        assert_eq!(inspector.port, 9222);

        let settings = config.session_settings();
        assert_eq!(settings.implicit_wait, Duration::from_millis(2500));
        assert_eq!(settings.heartbeat_interval, None);
    }

    #[test]
    fn test_substitute_env() {
        let lookup = |name: &str| (name == "WDA_HOST").then(|| "10.0.0.5".to_string());
        assert_eq!(
            substitute_env("host: ${WDA_HOST}\nport: ${WDA_PORT}", lookup),
            "host: 10.0.0.5\nport: ${WDA_PORT}"
        );
    }

    #[test]
    fn test_rejects_bad_types() {
        assert!(DriverConfig::parse("implicitWaitMs: soon").is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = DriverConfig::load(Path::new("/nonexistent/lumi-driver.yaml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
