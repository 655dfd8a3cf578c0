//! Notifications published by a session manager

use crate::media::{DeviceDescriptor, RemoteStream};
use crate::peer::NativeConnectionState;
use crate::state::ConnectionState;

/// Event on a [`SessionManager`](super::SessionManager) event stream
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The connection state changed
    StateChanged(ConnectionState),

    /// The remote stream carries video and has been handed to waiting sinks
    RemoteStreamAvailable(RemoteStream),

    /// The device actually granted for a captured track
    DeviceSynced(DeviceDescriptor),

    /// An established native connection failed on its own
    NativeFailure {
        /// Native handle that failed
        connection_id: String,
        /// Native state that triggered the teardown
        state: NativeConnectionState,
    },
}
