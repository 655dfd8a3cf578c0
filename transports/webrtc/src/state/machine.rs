//! Connection state of one logical session

use super::observable::Observable;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use tracing::debug;

/// Session connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No session has been started yet
    New,
    /// A session is under construction
    Connecting,
    /// Native connection settled as usable
    Connected,
    /// Teardown in progress
    Closing,
    /// Torn down cleanly
    Closed,
    /// Setup, negotiation or teardown failed
    Error,
}

impl ConnectionState {
    /// States in which no construction or teardown is in flight
    pub const SETTLED: [ConnectionState; 4] = [
        ConnectionState::Closed,
        ConnectionState::Connected,
        ConnectionState::Error,
        ConnectionState::New,
    ];

    /// Whether a fresh session may be started from this state
    pub fn can_start(&self) -> bool {
        matches!(
            self,
            ConnectionState::New | ConnectionState::Closed | ConnectionState::Error
        )
    }

    /// Whether this state is transitional (`Connecting` or `Closing`)
    pub fn is_transitional(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Closing)
    }

    /// Lowercase name, matching the serialized form
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::New => "new",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
            ConnectionState::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authoritative connection state with change notification and barriers
///
/// `set` does not validate transition legality; the session manager owns
/// that. `transition` is the compare-and-set used to claim the session after
/// a barrier wait.
#[derive(Debug, Clone)]
pub struct ConnectionStateMachine {
    label: String,
    state: Observable<ConnectionState>,
}

impl ConnectionStateMachine {
    /// Create a state machine in `New`
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            state: Observable::new(ConnectionState::New),
        }
    }

    /// Current state
    pub fn get(&self) -> ConnectionState {
        self.state.get()
    }

    /// Overwrite the state and notify subscribers
    pub fn set(&self, new_state: ConnectionState) {
        let old_state = self.state.set(new_state);
        if old_state != new_state {
            debug!(
                "Session {} state transition: {} -> {}",
                self.label, old_state, new_state
            );
        }
    }

    /// Move to `to` only if the current state is one of `from`
    ///
    /// Returns the previous state on success, or the current state if it is
    /// not in `from`.
    pub fn transition(
        &self,
        from: &[ConnectionState],
        to: ConnectionState,
    ) -> std::result::Result<ConnectionState, ConnectionState> {
        let result = self.state.compare_and_set(|s| from.contains(s), to);
        if let Ok(old_state) = result {
            debug!(
                "Session {} state transition: {} -> {}",
                self.label, old_state, to
            );
        }
        result
    }

    /// Wait until `predicate` holds for the state
    pub async fn wait_until<F>(&self, predicate: F) -> Result<ConnectionState>
    where
        F: Fn(&ConnectionState) -> bool + Send + 'static,
    {
        self.state.wait_until(predicate).await
    }

    /// Wait until the state is one of `states`
    pub async fn wait_until_in(&self, states: &[ConnectionState]) -> Result<ConnectionState> {
        let states = states.to_vec();
        self.state.wait_until(move |s| states.contains(s)).await
    }

    /// Subscribe to state changes
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionState> {
        self.state.subscribe()
    }
}
