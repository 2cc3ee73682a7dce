//! Web inspector backends

pub mod inspector;

pub use inspector::{InspectorClient, DEFAULT_INSPECTOR_PORT};
