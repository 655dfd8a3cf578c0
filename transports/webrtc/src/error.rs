//! Error types for session negotiation

use crate::state::ConnectionState;

/// Result type alias using the crate Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while negotiating or tearing down a session
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Operation not permitted in the current connection state
    #[error("Cannot {operation} while session is {state}")]
    InvalidState {
        /// Operation that was attempted
        operation: &'static str,
        /// State observed when the operation was rejected
        state: ConnectionState,
    },

    /// Native peer connection construction or control failed
    #[error("Peer connection error: {0}")]
    PeerConnectionError(String),

    /// Native connection settled to an unusable state
    #[error("NAT traversal failed: {0}")]
    NatTraversalFailed(String),

    /// SDP negotiation error
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// Codec name failed validation
    #[error("Invalid codec: {0}")]
    InvalidCodec(String),

    /// Codec filter left a media section without payload types
    #[error("Codec {codec} not offered in {kind} section")]
    CodecNotOffered {
        /// Media kind of the emptied section
        kind: crate::media::MediaKind,
        /// Codec that was requested
        codec: String,
    },

    /// Media capture or device error
    #[error("Media device error: {0}")]
    MediaDeviceError(String),

    /// Media track error
    #[error("Media track error: {0}")]
    MediaTrackError(String),

    /// Signaling exchange error
    #[error("Signaling error: {0}")]
    SignalingError(String),

    /// Comm channel error
    #[error("Comm channel error: {0}")]
    CommError(String),

    /// Operation timeout
    #[error("Operation timeout: {0}")]
    OperationTimeout(String),

    /// An observable was dropped while a waiter was pending
    #[error("State channel closed: {0}")]
    StateChannelClosed(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if calling `connect` again may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::SignalingError(_)
                | Error::CommError(_)
                | Error::NatTraversalFailed(_)
                | Error::OperationTimeout(_)
                | Error::IoError(_)
        )
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_) | Error::InvalidCodec(_))
    }

    /// Check if this error is a peer-related error
    pub fn is_peer_error(&self) -> bool {
        matches!(
            self,
            Error::PeerConnectionError(_)
                | Error::NatTraversalFailed(_)
                | Error::SdpError(_)
                | Error::CodecNotOffered { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidConfig("test".to_string());
        assert_eq!(err.to_string(), "Invalid configuration: test");

        let err = Error::InvalidState {
            operation: "close",
            state: ConnectionState::Connecting,
        };
        assert_eq!(err.to_string(), "Cannot close while session is connecting");
    }

    #[test]
    fn test_error_is_retryable() {
        assert!(Error::SignalingError("test".to_string()).is_retryable());
        assert!(Error::OperationTimeout("test".to_string()).is_retryable());
        assert!(!Error::InvalidConfig("test".to_string()).is_retryable());
    }

    #[test]
    fn test_error_is_config_error() {
        assert!(Error::InvalidConfig("test".to_string()).is_config_error());
        assert!(Error::InvalidCodec("".to_string()).is_config_error());
        assert!(!Error::SignalingError("test".to_string()).is_config_error());
    }

    #[test]
    fn test_error_is_peer_error() {
        assert!(Error::PeerConnectionError("test".to_string()).is_peer_error());
        assert!(Error::CodecNotOffered {
            kind: crate::media::MediaKind::Video,
            codec: "AV1".to_string(),
        }
        .is_peer_error());
        assert!(!Error::InvalidConfig("test".to_string()).is_peer_error());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::IoError(_)));
    }
}
