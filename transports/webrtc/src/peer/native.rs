//! Native peer-connection capability surface
//!
//! Everything the session needs from a platform peer connection, and
//! nothing more. [`WebRtcPeerConnectionFactory`](super::WebRtcPeerConnectionFactory)
//! provides the production implementation; tests script their own.

use crate::config::PeerConfig;
use crate::media::{LocalTrack, MediaKind, RemoteTrack};
use crate::sdp::SessionDescription;
use crate::state::Observable;
use crate::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Aggregate connection state reported by the native connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl NativeConnectionState {
    /// Still settling (`New` or `Connecting`)
    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            NativeConnectionState::New | NativeConnectionState::Connecting
        )
    }

    /// The connection is gone or unusable
    pub fn is_terminal_failure(&self) -> bool {
        matches!(
            self,
            NativeConnectionState::Disconnected
                | NativeConnectionState::Failed
                | NativeConnectionState::Closed
        )
    }
}

impl fmt::Display for NativeConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NativeConnectionState::New => "new",
            NativeConnectionState::Connecting => "connecting",
            NativeConnectionState::Connected => "connected",
            NativeConnectionState::Disconnected => "disconnected",
            NativeConnectionState::Failed => "failed",
            NativeConnectionState::Closed => "closed",
        })
    }
}

/// Local candidate gathering status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IceGatheringState {
    New,
    Gathering,
    Complete,
}

impl fmt::Display for IceGatheringState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IceGatheringState::New => "new",
            IceGatheringState::Gathering => "gathering",
            IceGatheringState::Complete => "complete",
        })
    }
}

/// Callback invoked for every inbound track
pub type TrackHandler = Arc<dyn Fn(RemoteTrack) + Send + Sync>;

/// A platform peer connection
#[async_trait]
pub trait NativePeerConnection: Send + Sync {
    /// Identifier of this native handle, used to tell handles apart
    fn id(&self) -> &str;

    /// Create a local offer
    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    /// Current local description, including gathered candidates
    async fn local_description(&self) -> Option<SessionDescription>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    /// Send a captured track as part of stream `stream_id`
    async fn add_track(&self, track: Arc<dyn LocalTrack>, stream_id: &str) -> Result<()>;

    /// Register an inbound-track callback
    fn on_track(&self, handler: TrackHandler);

    /// Aggregate connection state
    fn connection_state(&self) -> Observable<NativeConnectionState>;

    /// Candidate gathering state
    fn ice_gathering_state(&self) -> Observable<IceGatheringState>;

    /// Close the connection; the connection state ends at `Closed`
    async fn close(&self) -> Result<()>;
}

/// Creates native peer connections
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    /// Create a connection for the given configuration snapshot
    async fn create(&self, config: &PeerConfig) -> Result<Arc<dyn NativePeerConnection>>;

    /// Sendable codecs of `kind` as `"<mime> <fmtp>"` strings, without the
    /// red/ulpfec/rtx helpers
    fn codec_capabilities(&self, kind: MediaKind) -> Vec<String>;
}
