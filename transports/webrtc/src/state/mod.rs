//! Observable state primitives
//!
//! Holds the generic [`Observable`] and the session-level
//! [`ConnectionStateMachine`] built on top of it.

pub mod machine;
pub mod observable;

pub use machine::{ConnectionState, ConnectionStateMachine};
pub use observable::Observable;
