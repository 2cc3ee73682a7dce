//! Command dispatch
//!
//! The dispatcher owns the session's Blocking lane (a fair tokio mutex, so
//! waiters are served FIFO) and routes each command to the adapter that
//! serves the active context. What is running, and how many callers are
//! waiting, is published through atomics so `status` can report it without
//! ever touching the lane.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, MutexGuard};

use super::command::{Command, CommandName, CommandOutput, ContextRequirement};
use super::context::{ContextKind, ExecutionContext};
use crate::driver::adapter::BackendAdapter;
use crate::error::{DriverError, ErrorKind};

/// The command currently holding the lane
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCommand {
    pub command: &'static str,
    pub elapsed_ms: u64,
}

pub struct Dispatcher {
    lane: Mutex<()>,
    native: Arc<dyn BackendAdapter>,
    web: Option<Arc<dyn BackendAdapter>>,
    /// `CommandName::code` of the lane holder, 0 when idle
    in_flight: AtomicU8,
    /// Millis since `epoch` when the lane holder started
    started_at: AtomicU64,
    queued: AtomicUsize,
    epoch: Instant,
}

/// Exclusive hold on the Blocking lane
///
/// Dropping the guard clears the in-flight marker before the lane is handed
/// to the next waiter.
pub struct LaneGuard<'a> {
    dispatcher: &'a Dispatcher,
    command: CommandName,
    _slot: MutexGuard<'a, ()>,
}

impl LaneGuard<'_> {
    pub fn command(&self) -> CommandName {
        self.command
    }
}

impl Drop for LaneGuard<'_> {
    fn drop(&mut self) {
        self.dispatcher.in_flight.store(0, Ordering::Release);
    }
}

/// Counts a caller as queued until it gets the lane or gives up waiting
struct QueueTicket<'a>(&'a AtomicUsize);

impl<'a> QueueTicket<'a> {
    fn take(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for QueueTicket<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Dispatcher {
    pub fn new(native: Arc<dyn BackendAdapter>, web: Option<Arc<dyn BackendAdapter>>) -> Self {
        Self {
            lane: Mutex::new(()),
            native,
            web,
            in_flight: AtomicU8::new(0),
            started_at: AtomicU64::new(0),
            queued: AtomicUsize::new(0),
            epoch: Instant::now(),
        }
    }

    /// Wait for the lane, then mark `command` as in flight
    pub async fn acquire(&self, command: CommandName) -> LaneGuard<'_> {
        debug_assert!(command.is_blocking(), "{} does not take the lane", command);
        let slot = {
            let _ticket = QueueTicket::take(&self.queued);
            self.lane.lock().await
        };
        self.started_at
            .store(self.epoch.elapsed().as_millis() as u64, Ordering::Release);
        self.in_flight.store(command.code(), Ordering::Release);
        log::debug!("lane acquired by {}", command);
        LaneGuard {
            dispatcher: self,
            command,
            _slot: slot,
        }
    }

    /// What holds the lane right now, if anything
    pub fn pending(&self) -> Option<PendingCommand> {
        let code = self.in_flight.load(Ordering::Acquire);
        let command = CommandName::from_code(code)?;
        let now = self.epoch.elapsed().as_millis() as u64;
        let started = self.started_at.load(Ordering::Acquire);
        Some(PendingCommand {
            command: command.as_str(),
            elapsed_ms: now.saturating_sub(started),
        })
    }

    /// Callers waiting for the lane
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    /// Pick the adapter for `name` given the active context
    pub fn route(
        &self,
        context: &ExecutionContext,
        name: CommandName,
    ) -> Result<&Arc<dyn BackendAdapter>, DriverError> {
        let unsupported = || {
            DriverError::new(
                name,
                ErrorKind::UnsupportedInContext {
                    context: context.id.clone(),
                },
            )
        };

        match (name.requirement(), context.kind) {
            (ContextRequirement::Device, _) => Ok(&self.native),
            (ContextRequirement::Routed, ContextKind::Native)
            | (ContextRequirement::NativeOnly, ContextKind::Native) => Ok(&self.native),
            (ContextRequirement::Routed, ContextKind::Web)
            | (ContextRequirement::WebOnly, ContextKind::Web) => self
                .web
                .as_ref()
                .ok_or_else(|| DriverError::new(name, ErrorKind::UnknownContext(context.id.clone()))),
            (ContextRequirement::NativeOnly, ContextKind::Web)
            | (ContextRequirement::WebOnly, ContextKind::Native) => Err(unsupported()),
            (ContextRequirement::Agnostic, _) => Err(DriverError::new(
                name,
                ErrorKind::CommandFailed(format!("{} is not routed to a backend", name)),
            )),
        }
    }

    /// Run `command` against the adapter for `context`
    ///
    /// Taking the guard proves the caller holds the lane.
    pub async fn execute(
        &self,
        _lane: &LaneGuard<'_>,
        context: &ExecutionContext,
        command: &Command,
    ) -> Result<CommandOutput, DriverError> {
        let name = command.name();
        if let Some(element) = command.element() {
            if element.context != context.id {
                return Err(DriverError::new(
                    name,
                    ErrorKind::UnsupportedInContext {
                        context: context.id.clone(),
                    },
                ));
            }
        }

        let adapter = self.route(context, name)?;
        log::debug!("{} -> {:?} adapter ({})", name, adapter.kind(), context.id);
        adapter.execute(context, command).await.map_err(|err| {
            let err = match adapter.kind() {
                ContextKind::Web => err.web_side(),
                ContextKind::Native => err,
            };
            DriverError::from_backend(name, command.locator().map(|l| l.to_string()), err)
        })
    }
}
