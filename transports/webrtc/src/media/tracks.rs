//! Local and remote track/stream handles

use super::MediaKind;
use std::fmt;
use std::sync::Arc;

/// Capability query result for a captured track
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackCapabilities {
    /// Device backing the track, if the platform reports it
    pub device_id: Option<String>,
}

/// Current settings of a captured track
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackSettings {
    /// Device backing the track, if the platform reports it
    pub device_id: Option<String>,
}

/// A captured local track
///
/// `capabilities` returns `None` on platforms without a capability query;
/// callers then fall back to `settings`.
pub trait LocalTrack: Send + Sync + fmt::Debug {
    /// Track identifier
    fn id(&self) -> &str;

    /// Media kind of the track
    fn kind(&self) -> MediaKind;

    /// Capability query, if supported
    fn capabilities(&self) -> Option<TrackCapabilities>;

    /// Settings query
    fn settings(&self) -> TrackSettings;

    /// Stop capture on this track
    fn stop(&self);

    /// Whether `stop` has been called
    fn is_stopped(&self) -> bool;
}

/// Local capture stream
#[derive(Debug, Clone)]
pub struct LocalStream {
    id: String,
    tracks: Vec<Arc<dyn LocalTrack>>,
}

impl LocalStream {
    /// Create a stream from captured tracks
    pub fn new(id: impl Into<String>, tracks: Vec<Arc<dyn LocalTrack>>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    /// Stream identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Tracks in capture order
    pub fn tracks(&self) -> &[Arc<dyn LocalTrack>] {
        &self.tracks
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Stop every track of the stream
    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// Inbound track announced by the native connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    /// Track identifier
    pub id: String,
    /// Identifier of the stream the track belongs to
    pub stream_id: String,
    /// Media kind
    pub kind: MediaKind,
}

/// Inbound stream assembled from remote track events
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStream {
    id: String,
    tracks: Vec<RemoteTrack>,
}

impl RemoteStream {
    /// Start a stream from its first track
    pub fn from_track(track: RemoteTrack) -> Self {
        Self {
            id: track.stream_id.clone(),
            tracks: vec![track],
        }
    }

    /// Stream identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[RemoteTrack] {
        &self.tracks
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Whether the stream carries a video track
    pub fn has_video(&self) -> bool {
        self.tracks.iter().any(|t| t.kind == MediaKind::Video)
    }

    /// Add a track, ignoring duplicates by id
    pub fn add_track(&mut self, track: RemoteTrack) {
        if !self.tracks.iter().any(|t| t.id == track.id) {
            self.tracks.push(track);
        }
    }
}

/// Anything that can play back a remote stream
///
/// The session hands a stream to a sink at most once per session, and only
/// once the stream carries video.
pub trait RenderSink: Send + Sync {
    /// Attach a live stream for playback
    fn attach(&self, stream: RemoteStream);
}
