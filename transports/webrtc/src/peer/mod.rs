//! Native peer connections and negotiation
//!
//! Defines the capability surface the session needs from a platform peer
//! connection, its webrtc-rs implementation, and the offer/answer driver.

pub mod connection;
pub mod native;
pub mod negotiation;

pub use connection::{WebRtcPeerConnection, WebRtcPeerConnectionFactory};
pub use native::{
    IceGatheringState, NativeConnectionState, NativePeerConnection, PeerConnectionFactory,
    TrackHandler,
};
pub use negotiation::{wait_for, with_timeout, NegotiationDriver};
