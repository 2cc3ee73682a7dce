//! Real iOS devices and simulators
//!
//! WebDriverAgent is the native backend; webviews are reached through a
//! WebKit debug proxy when one is configured.

pub mod wda;

pub use wda::{WdaClient, DEFAULT_WDA_PORT};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::logs::LogBuffer;
use super::traits::WebBackend;
use super::web::InspectorClient;
use super::{BackendError, BackendFactory, Backends};
use crate::utils::config::{InspectorConfig, WdaConfig};

/// Connects each new session to a running WDA (and debug proxy)
pub struct DeviceFactory {
    wda: WdaConfig,
    inspector: Option<InspectorConfig>,
    log_capacity: usize,
}

impl DeviceFactory {
    pub fn new(wda: WdaConfig, inspector: Option<InspectorConfig>, log_capacity: usize) -> Self {
        Self {
            wda,
            inspector,
            log_capacity,
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.wda.timeout_secs.max(1))
    }
}

#[async_trait]
impl BackendFactory for DeviceFactory {
    async fn connect(&self) -> Result<Backends, BackendError> {
        let native = WdaClient::new(&self.wda.host, self.wda.port, self.timeout())?;
        log::debug!("Connecting to WDA at {}:{}", self.wda.host, self.wda.port);

        let web = match &self.inspector {
            Some(inspector) => {
                let client = InspectorClient::new(&inspector.host, inspector.port, self.timeout())?;
                Some(Arc::new(client) as Arc<dyn WebBackend>)
            }
            None => None,
        };

        Ok(Backends {
            native: Arc::new(native),
            web,
            logs: LogBuffer::new(self.log_capacity),
        })
    }
}
