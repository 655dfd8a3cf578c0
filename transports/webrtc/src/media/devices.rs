//! Capture devices, constraints and the synthetic device set

use super::tracks::{LocalStream, LocalTrack, TrackCapabilities, TrackSettings};
use super::MediaKind;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Kind of a media device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    VideoInput,
    AudioInput,
    AudioOutput,
}

impl DeviceKind {
    /// Media kind captured by an input device, `None` for outputs
    pub fn media_kind(&self) -> Option<MediaKind> {
        match self {
            DeviceKind::VideoInput => Some(MediaKind::Video),
            DeviceKind::AudioInput => Some(MediaKind::Audio),
            DeviceKind::AudioOutput => None,
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeviceKind::VideoInput => "video_input",
            DeviceKind::AudioInput => "audio_input",
            DeviceKind::AudioOutput => "audio_output",
        })
    }
}

/// Device currently in use for one input kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: String,
    pub kind: DeviceKind,
}

/// Enumerated device, as reported back over the comm channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub device_id: String,
    pub kind: DeviceKind,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub group_id: String,
}

/// Capture request for one media kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackConstraint {
    /// Whether this kind is requested at all
    pub enabled: bool,
    /// Exact device to capture from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

impl TrackConstraint {
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            device_id: None,
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }
}

/// Per-kind capture request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    #[serde(default)]
    pub audio: TrackConstraint,
    #[serde(default)]
    pub video: TrackConstraint,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: TrackConstraint::disabled(),
            video: TrackConstraint::enabled(),
        }
    }
}

impl MediaConstraints {
    /// Constraint for one kind
    pub fn get(&self, kind: MediaKind) -> &TrackConstraint {
        match kind {
            MediaKind::Audio => &self.audio,
            MediaKind::Video => &self.video,
        }
    }

    /// Pin each requested kind to the remembered device, if any
    ///
    /// Kinds that are not requested stay unrequested; a pin never enables a
    /// kind on its own.
    pub fn pinned(&self, audio_device: Option<&str>, video_device: Option<&str>) -> Self {
        let pin = |constraint: &TrackConstraint, device: Option<&str>| {
            let mut constraint = constraint.clone();
            if constraint.enabled {
                if let Some(id) = device {
                    constraint.device_id = Some(id.to_string());
                }
            }
            constraint
        };
        Self {
            audio: pin(&self.audio, audio_device),
            video: pin(&self.video, video_device),
        }
    }

    /// Whether at least one kind is requested
    pub fn any_enabled(&self) -> bool {
        self.audio.enabled || self.video.enabled
    }
}

/// Capture and enumeration surface of the host platform
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Acquire a local stream satisfying `constraints`
    ///
    /// The granted device may differ from a pinned one; the session reads
    /// the real device back from the tracks.
    async fn get_user_media(&self, constraints: &MediaConstraints) -> Result<LocalStream>;

    /// List the available devices
    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>>;
}

/// Local track produced by [`SyntheticMediaDevices`]
#[derive(Debug)]
pub struct SyntheticTrack {
    id: String,
    kind: MediaKind,
    device_id: String,
    capability_query: bool,
    stopped: AtomicBool,
}

impl SyntheticTrack {
    pub fn new(kind: MediaKind, device_id: impl Into<String>, capability_query: bool) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            device_id: device_id.into(),
            capability_query,
            stopped: AtomicBool::new(false),
        }
    }
}

impl LocalTrack for SyntheticTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn capabilities(&self) -> Option<TrackCapabilities> {
        self.capability_query.then(|| TrackCapabilities {
            device_id: Some(self.device_id.clone()),
        })
    }

    fn settings(&self) -> TrackSettings {
        TrackSettings {
            device_id: Some(self.device_id.clone()),
        }
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Capture-less device set
///
/// Grants a [`SyntheticTrack`] per requested kind. An unknown pinned device
/// falls back to the first device of that kind, the way browsers substitute
/// a device when the requested one is gone.
#[derive(Debug, Clone)]
pub struct SyntheticMediaDevices {
    devices: Vec<DeviceInfo>,
    capability_query: bool,
}

impl Default for SyntheticMediaDevices {
    fn default() -> Self {
        let device = |id: &str, kind, label: &str| DeviceInfo {
            device_id: id.to_string(),
            kind,
            label: label.to_string(),
            group_id: "synthetic".to_string(),
        };
        Self::new(vec![
            device("synthetic-camera-0", DeviceKind::VideoInput, "Synthetic Camera"),
            device("synthetic-mic-0", DeviceKind::AudioInput, "Synthetic Microphone"),
            device("synthetic-speaker-0", DeviceKind::AudioOutput, "Synthetic Speaker"),
        ])
    }
}

impl SyntheticMediaDevices {
    pub fn new(devices: Vec<DeviceInfo>) -> Self {
        Self {
            devices,
            capability_query: true,
        }
    }

    /// Toggle whether granted tracks answer capability queries
    pub fn with_capability_query(mut self, enabled: bool) -> Self {
        self.capability_query = enabled;
        self
    }

    fn select(&self, kind: MediaKind, requested: Option<&str>) -> Result<&DeviceInfo> {
        let device_kind = kind.input_device();
        let mut candidates = self
            .devices
            .iter()
            .filter(|d| d.kind == device_kind && !d.device_id.is_empty());

        let first = candidates.clone().next();
        requested
            .and_then(|id| candidates.find(|d| d.device_id == id))
            .or(first)
            .ok_or_else(|| Error::MediaDeviceError(format!("No {} device available", device_kind)))
    }
}

#[async_trait]
impl MediaDevices for SyntheticMediaDevices {
    async fn get_user_media(&self, constraints: &MediaConstraints) -> Result<LocalStream> {
        if !constraints.any_enabled() {
            return Err(Error::MediaDeviceError(
                "At least one of audio and video must be requested".to_string(),
            ));
        }

        let mut tracks: Vec<Arc<dyn LocalTrack>> = Vec::new();
        for kind in MediaKind::ALL {
            let constraint = constraints.get(kind);
            if !constraint.enabled {
                continue;
            }
            let device = self.select(kind, constraint.device_id.as_deref())?;
            tracks.push(Arc::new(SyntheticTrack::new(
                kind,
                device.device_id.clone(),
                self.capability_query,
            )));
        }

        Ok(LocalStream::new(uuid::Uuid::new_v4().to_string(), tracks))
    }

    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(self.devices.clone())
    }
}
