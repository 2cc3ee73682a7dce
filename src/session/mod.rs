//! Automation sessions
//!
//! A session owns its backends, its contexts and a single Blocking lane.
//! The manager maps wire session ids to live sessions.

pub mod capabilities;
pub mod command;
pub mod context;
pub mod core;
pub mod dispatcher;
pub mod manager;
pub mod retry;

pub use self::core::{Lifecycle, SessionCore, SessionSettings, SessionStatus};
pub use command::{CommandName, ElementHandle};
pub use context::{ExecutionContext, NATIVE_CONTEXT};
pub use manager::SessionManager;
