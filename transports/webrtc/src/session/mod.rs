//! Session lifecycle
//!
//! [`SessionManager`] is the entry point: it owns the single [`Session`],
//! runs connect/close through the connection state machine and publishes
//! [`SessionEvent`]s.

pub mod events;
pub mod manager;
#[allow(clippy::module_inception)]
pub mod session;

pub use events::SessionEvent;
pub use manager::{SessionManager, SessionManagerBuilder};
pub use session::Session;
