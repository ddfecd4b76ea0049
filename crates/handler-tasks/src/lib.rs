//! Built-in task libraries.
//!
//! - [`common`]: shell commands, `kubectl` promotion and readiness checks
//! - [`notification`]: Slack messages, HTTP requests and GitHub workflow
//!   dispatches
//!
//! [`default_registry`] wires both into a [`TaskRegistry`].

use handler_core::registry::Result;
use handler_core::TaskRegistry;

pub mod common;
pub mod notification;

pub use common::CommonLibrary;
pub use notification::NotificationLibrary;

/// A registry holding every built-in library.
pub fn default_registry() -> Result<TaskRegistry> {
    let mut registry = TaskRegistry::new();
    registry.register(CommonLibrary)?;
    registry.register(NotificationLibrary)?;
    Ok(registry)
}
