//! Session Manager
//!
//! Owns every live [`SessionCore`] by id. Each new session gets its own
//! backends from the [`BackendFactory`], so sessions share nothing.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::command::CommandName;
use super::core::{SessionCore, SessionSettings, SessionStatus};
use crate::driver::BackendFactory;
use crate::error::DriverError;

pub struct SessionManager {
    factory: Arc<dyn BackendFactory>,
    settings: SessionSettings,
    sessions: RwLock<HashMap<String, Arc<SessionCore>>>,
    /// Most recently created session, reported by the server status
    latest: RwLock<Option<String>>,
}

impl SessionManager {
    pub fn new(factory: Arc<dyn BackendFactory>, settings: SessionSettings) -> Self {
        Self {
            factory,
            settings,
            sessions: RwLock::new(HashMap::new()),
            latest: RwLock::new(None),
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Connect fresh backends and start a session on them
    pub async fn create(&self, request: &Value) -> Result<Arc<SessionCore>, DriverError> {
        let backends = self
            .factory
            .connect()
            .await
            .map_err(|err| DriverError::from_backend(CommandName::NewSession, None, err))?;
        let session = SessionCore::start(backends, self.settings.clone(), request).await?;

        let id = session.id().to_string();
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), session.clone());
        *self.latest.write().unwrap_or_else(|e| e.into_inner()) = Some(id);
        Ok(session)
    }

    /// Look up a session; unknown and terminated ids behave like ended sessions
    pub fn get(&self, id: &str, command: CommandName) -> Result<Arc<SessionCore>, DriverError> {
        let session = self
            .sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
            .ok_or_else(|| DriverError::session_ended(command))?;
        if !session.is_active() {
            self.prune();
            return Err(DriverError::session_ended(command));
        }
        Ok(session)
    }

    /// Forget sessions that ended on backend loss without an explicit delete
    fn prune(&self) {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.retain(|id, session| {
            let keep = session.is_active();
            if !keep {
                log::info!("Forgetting terminated session {}", id);
            }
            keep
        });
        let mut latest = self.latest.write().unwrap_or_else(|e| e.into_inner());
        if latest.as_ref().is_some_and(|id| !sessions.contains_key(id)) {
            *latest = None;
        }
    }

    /// Tear a session down and forget it
    pub async fn delete(&self, id: &str) -> Result<(), DriverError> {
        let session = self
            .sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
            .ok_or_else(|| DriverError::session_ended(CommandName::DeleteSession))?;
        {
            let mut latest = self.latest.write().unwrap_or_else(|e| e.into_inner());
            if latest.as_deref() == Some(id) {
                *latest = None;
            }
        }
        session.teardown().await
    }

    /// Ids of sessions that are still active
    pub fn list(&self) -> Vec<String> {
        self.prune();
        let mut ids: Vec<String> = self
            .sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Status of the most recently created session still known
    pub fn latest_status(&self) -> Option<SessionStatus> {
        let id = self.latest.read().unwrap_or_else(|e| e.into_inner()).clone()?;
        self.get(&id, CommandName::Status)
            .ok()
            .map(|session| session.status())
    }

    /// End every session, used on server shutdown
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<SessionCore>> = self
            .sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, session)| session)
            .collect();
        for session in sessions {
            if let Err(err) = session.teardown().await {
                log::warn!("Failed to end session {}: {}", session.id(), err);
            }
        }
    }
}
