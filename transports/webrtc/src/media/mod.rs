//! Media handles exchanged with the session
//!
//! The session never touches frames. It only moves track and stream handles
//! between the capture side ([`MediaDevices`]), the native peer connection,
//! and the rendering side ([`RenderSink`]).

pub mod devices;
pub mod tracks;

pub use devices::{
    DeviceDescriptor, DeviceInfo, DeviceKind, MediaConstraints, MediaDevices, SyntheticMediaDevices,
    SyntheticTrack, TrackConstraint,
};
pub use tracks::{
    LocalStream, LocalTrack, RemoteStream, RemoteTrack, RenderSink, TrackCapabilities,
    TrackSettings,
};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Media kind of a track or SDP media section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Audio track / `m=audio` section
    Audio,
    /// Video track / `m=video` section
    Video,
}

impl MediaKind {
    /// Both kinds, in the order the negotiation filters them
    pub const ALL: [MediaKind; 2] = [MediaKind::Audio, MediaKind::Video];

    /// Media name as it appears on an SDP `m=` line
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }

    /// Input device kind that captures this media kind
    pub fn input_device(&self) -> DeviceKind {
        match self {
            MediaKind::Audio => DeviceKind::AudioInput,
            MediaKind::Video => DeviceKind::VideoInput,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_kind_names() {
        assert_eq!(MediaKind::Audio.to_string(), "audio");
        assert_eq!(MediaKind::Video.as_str(), "video");
        assert_eq!(MediaKind::Video.input_device(), DeviceKind::VideoInput);
    }
}
