//! Session negotiation and connection-state engine for a webcam peer
//!
//! This crate drives a native WebRTC peer connection through offer creation,
//! candidate gathering, codec restriction and answer application, and keeps
//! one authoritative connection state per session.
//!
//! # Features
//!
//! - **Serialized lifecycle**: concurrent `connect`/`close_peer` calls queue
//!   on a state barrier; at most one session is built or torn down at a time
//! - **Codec restriction**: per-kind SDP rewriting that keeps RTX pairs
//! - **No trickle ICE**: the offer leaves once candidate gathering completes
//! - **Injectable timeouts**: gathering, exchange and settlement waits are
//!   unbounded by default and bounded on request
//! - **Comm bridge**: `{cmd, id, args}` / `{ans, id, res}` request matching,
//!   device sync and remote device-change handling
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │  Embedder (comm channel, render sink, devices)         │
//! │  ↓                                                     │
//! │  SessionManager                                        │
//! │  ├─ ConnectionStateMachine (Observable + barrier)      │
//! │  ├─ Session (native handle, local + remote stream)     │
//! │  └─ NegotiationDriver                                  │
//! │     ├─ CodecFilter (SDP rewrite)                       │
//! │     └─ SignalingExchange (CommExchange / FnExchange)   │
//! │     ↓                                                  │
//! │  NativePeerConnection (webrtc-rs adapter)              │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use webcam_rtc::config::{NegotiationTimeouts, SessionConfig};
//! use webcam_rtc::sdp::{CodecName, CodecPreferences};
//!
//! let config = SessionConfig::default()
//!     .with_codecs(CodecPreferences::default().with_video(CodecName::parse("VP8").unwrap()))
//!     .with_timeouts(NegotiationTimeouts::bounded());
//!
//! assert!(config.validate().is_ok());
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use futures::FutureExt;
//! use std::sync::Arc;
//! use webcam_rtc::sdp::SessionDescription;
//! use webcam_rtc::signaling::FnExchange;
//! use webcam_rtc::SessionManager;
//!
//! # async fn example() -> webcam_rtc::Result<()> {
//! let exchange = FnExchange::new(|offer: SessionDescription| {
//!     async move {
//!         // Hand the offer to the remote peer and return its answer
//!         Ok(SessionDescription::answer(offer.sdp))
//!     }
//!     .boxed()
//! });
//!
//! let manager = SessionManager::builder()
//!     .exchange(Arc::new(exchange))
//!     .build()?;
//!
//! manager.connect(None, false, false).await?;
//! manager.close_peer().await?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod media;
pub mod peer;
pub mod sdp;
pub mod session;
pub mod signaling;
pub mod state;

// Re-exports for public API
pub use config::{IceServerConfig, NegotiationTimeouts, PeerConfig, SessionConfig};
pub use error::{Error, Result};
pub use media::{MediaConstraints, MediaKind, RenderSink};
pub use peer::{NegotiationDriver, WebRtcPeerConnectionFactory};
pub use sdp::{filter_codec, CodecName, CodecPreference, CodecPreferences, SessionDescription};
pub use session::{SessionEvent, SessionManager};
pub use signaling::{CommBridge, CommChannel, SignalingExchange};
pub use state::{ConnectionState, ConnectionStateMachine, Observable};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
