//! WebRTC peer connection backed by webrtc-rs

use super::native::{
    IceGatheringState, NativeConnectionState, NativePeerConnection, PeerConnectionFactory,
    TrackHandler,
};
use crate::config::PeerConfig;
use crate::media::{LocalTrack, MediaKind, RemoteTrack};
use crate::sdp::{SdpType, SessionDescription};
use crate::state::Observable;
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{
    MediaEngine, MIME_TYPE_G722, MIME_TYPE_H264, MIME_TYPE_OPUS, MIME_TYPE_PCMA, MIME_TYPE_PCMU,
    MIME_TYPE_VP8, MIME_TYPE_VP9,
};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection as WebRTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCPFeedback;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

const MIME_TYPE_RTX: &str = "video/rtx";

/// Codec helpers that are never offered as a user choice
const HELPER_CODECS: [&str; 3] = ["red", "ulpfec", "rtx"];

fn video_feedback() -> Vec<RTCPFeedback> {
    [("goog-remb", ""), ("ccm", "fir"), ("nack", ""), ("nack", "pli")]
        .into_iter()
        .map(|(typ, parameter)| RTCPFeedback {
            typ: typ.to_owned(),
            parameter: parameter.to_owned(),
        })
        .collect()
}

fn codec(mime: &str, clock_rate: u32, channels: u16, fmtp: &str, payload_type: u8) -> RTCRtpCodecParameters {
    let rtcp_feedback = if mime.starts_with("video/") && mime != MIME_TYPE_RTX {
        video_feedback()
    } else {
        Vec::new()
    };
    RTCRtpCodecParameters {
        capability: RTCRtpCodecCapability {
            mime_type: mime.to_owned(),
            clock_rate,
            channels,
            sdp_fmtp_line: fmtp.to_owned(),
            rtcp_feedback,
        },
        payload_type,
        ..Default::default()
    }
}

/// Codecs registered on every media engine, in preference order
fn registered_codecs(kind: MediaKind) -> Vec<RTCRtpCodecParameters> {
    match kind {
        MediaKind::Audio => vec![
            codec(MIME_TYPE_OPUS, 48000, 2, "minptime=10;useinbandfec=1", 111),
            codec(MIME_TYPE_G722, 8000, 0, "", 9),
            codec(MIME_TYPE_PCMU, 8000, 0, "", 0),
            codec(MIME_TYPE_PCMA, 8000, 0, "", 8),
        ],
        MediaKind::Video => vec![
            codec(MIME_TYPE_VP8, 90000, 0, "", 96),
            codec(MIME_TYPE_RTX, 90000, 0, "apt=96", 97),
            codec(MIME_TYPE_VP9, 90000, 0, "profile-id=0", 98),
            codec(MIME_TYPE_RTX, 90000, 0, "apt=98", 99),
            codec(
                MIME_TYPE_H264,
                90000,
                0,
                "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42001f",
                102,
            ),
            codec(MIME_TYPE_RTX, 90000, 0, "apt=102", 103),
            codec(
                MIME_TYPE_H264,
                90000,
                0,
                "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f",
                125,
            ),
            codec(MIME_TYPE_RTX, 90000, 0, "apt=125", 107),
        ],
    }
}

fn rtp_codec_type(kind: MediaKind) -> RTPCodecType {
    match kind {
        MediaKind::Audio => RTPCodecType::Audio,
        MediaKind::Video => RTPCodecType::Video,
    }
}

/// Capability of the sample track that carries a local track of `kind`
fn sending_capability(kind: MediaKind) -> RTCRtpCodecCapability {
    match kind {
        MediaKind::Audio => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48000,
            channels: 2,
            sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
            rtcp_feedback: vec![],
        },
        MediaKind::Video => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            clock_rate: 90000,
            channels: 0,
            sdp_fmtp_line: String::new(),
            rtcp_feedback: vec![],
        },
    }
}

fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription> {
    let sdp_type = desc.sdp_type;
    let result = match sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp),
        SdpType::Rollback => {
            return Err(Error::SdpError(
                "Rollback descriptions are not supported".to_string(),
            ))
        }
    };
    result.map_err(|e| Error::SdpError(format!("Malformed {} description: {}", sdp_type, e)))
}

fn from_rtc_description(desc: RTCSessionDescription) -> Option<SessionDescription> {
    let sdp_type = match desc.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        _ => return None,
    };
    Some(SessionDescription {
        sdp_type,
        sdp: desc.sdp,
    })
}

/// WebRTC peer connection wrapper
///
/// Wraps a webrtc::RTCPeerConnection and mirrors its connection and
/// gathering states into observables.
pub struct WebRtcPeerConnection {
    /// Unique identifier for this connection instance
    connection_id: String,

    /// Actual WebRTC peer connection
    peer_connection: Arc<WebRTCPeerConnection>,

    state: Observable<NativeConnectionState>,
    gathering: Observable<IceGatheringState>,

    track_handlers: Arc<Mutex<Vec<TrackHandler>>>,

    /// Sample tracks carrying the local tracks, by local track id
    sample_tracks: Mutex<Vec<(String, Arc<TrackLocalStaticSample>)>>,

    /// RTP senders (retained to prevent track cleanup)
    senders: Mutex<Vec<Arc<RTCRtpSender>>>,
}

impl WebRtcPeerConnection {
    /// Create a new peer connection
    ///
    /// # Arguments
    ///
    /// * `config` - ICE servers for this connection
    #[instrument(skip_all, fields(ice_servers = config.ice_servers.len()))]
    pub async fn new(config: &PeerConfig) -> Result<Self> {
        let connection_id = uuid::Uuid::new_v4().to_string();

        info!("Creating peer connection: connection_id={}", connection_id);

        let mut media_engine = MediaEngine::default();
        for kind in MediaKind::ALL {
            for params in registered_codecs(kind) {
                media_engine
                    .register_codec(params, rtp_codec_type(kind))
                    .map_err(|e| Error::WebRtcError(format!("Failed to register codecs: {}", e)))?;
            }
        }

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::WebRtcError(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let ice_servers: Vec<RTCIceServer> = config
            .ice_servers
            .iter()
            .map(|server| {
                #[allow(clippy::needless_update)]
                RTCIceServer {
                    urls: server.urls.clone(),
                    username: server.username.clone().unwrap_or_default(),
                    credential: server.credential.clone().unwrap_or_default(),
                    ..Default::default()
                }
            })
            .collect();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let peer_connection =
            Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
                Error::PeerConnectionError(format!("Failed to create peer connection: {}", e))
            })?);

        let connection = Self {
            connection_id,
            peer_connection,
            state: Observable::new(NativeConnectionState::New),
            gathering: Observable::new(IceGatheringState::New),
            track_handlers: Arc::new(Mutex::new(Vec::new())),
            sample_tracks: Mutex::new(Vec::new()),
            senders: Mutex::new(Vec::new()),
        };
        connection.setup_event_handlers();

        Ok(connection)
    }

    fn setup_event_handlers(&self) {
        let state = self.state.clone();
        let connection_id = self.connection_id.clone();
        self.peer_connection
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let state = state.clone();
                let connection_id = connection_id.clone();

                Box::pin(async move {
                    let new_state = match s {
                        RTCPeerConnectionState::New => NativeConnectionState::New,
                        RTCPeerConnectionState::Connecting => NativeConnectionState::Connecting,
                        RTCPeerConnectionState::Connected => NativeConnectionState::Connected,
                        RTCPeerConnectionState::Disconnected => NativeConnectionState::Disconnected,
                        RTCPeerConnectionState::Failed => NativeConnectionState::Failed,
                        RTCPeerConnectionState::Closed => NativeConnectionState::Closed,
                        _ => return,
                    };
                    debug!("Peer {} connection -> {}", connection_id, new_state);
                    state.set(new_state);
                })
            }));

        let gathering = self.gathering.clone();
        let connection_id = self.connection_id.clone();
        self.peer_connection
            .on_ice_gathering_state_change(Box::new(move |s: RTCIceGathererState| {
                let gathering = gathering.clone();
                let connection_id = connection_id.clone();

                Box::pin(async move {
                    let new_state = match s {
                        RTCIceGathererState::New => IceGatheringState::New,
                        RTCIceGathererState::Gathering => IceGatheringState::Gathering,
                        RTCIceGathererState::Complete => IceGatheringState::Complete,
                        _ => return,
                    };
                    debug!("Peer {} iceGathering -> {}", connection_id, new_state);
                    gathering.set(new_state);
                })
            }));

        let connection_id = self.connection_id.clone();
        self.peer_connection
            .on_ice_connection_state_change(Box::new(move |s| {
                let connection_id = connection_id.clone();
                Box::pin(async move {
                    debug!("Peer {} iceConnection -> {}", connection_id, s);
                })
            }));

        let connection_id = self.connection_id.clone();
        self.peer_connection
            .on_signaling_state_change(Box::new(move |s: RTCSignalingState| {
                let connection_id = connection_id.clone();
                Box::pin(async move {
                    debug!("Peer {} signaling -> {}", connection_id, s);
                })
            }));

        let handlers = Arc::clone(&self.track_handlers);
        let connection_id = self.connection_id.clone();
        self.peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>, _receiver, _transceiver| {
                let handlers = Arc::clone(&handlers);
                let connection_id = connection_id.clone();

                Box::pin(async move {
                    let kind = match track.kind() {
                        RTPCodecType::Audio => MediaKind::Audio,
                        RTPCodecType::Video => MediaKind::Video,
                        _ => return,
                    };
                    let remote = RemoteTrack {
                        id: track.id(),
                        stream_id: track.stream_id(),
                        kind,
                    };
                    debug!(
                        "Peer {} received {} track {} (stream {})",
                        connection_id, kind, remote.id, remote.stream_id
                    );

                    let handlers = handlers.lock().clone();
                    for handler in handlers {
                        handler(remote.clone());
                    }
                })
            },
        ));
    }

    /// Get the connection ID
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Sample track that carries the local track `track_id`
    ///
    /// Media producers write samples into it; the session itself never does.
    pub fn sample_track(&self, track_id: &str) -> Option<Arc<TrackLocalStaticSample>> {
        self.sample_tracks
            .lock()
            .iter()
            .find(|(id, _)| id == track_id)
            .map(|(_, track)| Arc::clone(track))
    }
}

#[async_trait]
impl NativePeerConnection for WebRtcPeerConnection {
    fn id(&self) -> &str {
        &self.connection_id
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;

        from_rtc_description(offer)
            .ok_or_else(|| Error::SdpError("Offer without description type".to_string()))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        let desc = to_rtc_description(desc)?;
        self.peer_connection
            .set_local_description(desc)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.peer_connection
            .local_description()
            .await
            .and_then(from_rtc_description)
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        let desc = to_rtc_description(desc)?;
        self.peer_connection
            .set_remote_description(desc)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))?;

        debug!("Set remote description for peer {}", self.connection_id);
        Ok(())
    }

    async fn add_track(&self, track: Arc<dyn LocalTrack>, stream_id: &str) -> Result<()> {
        let sample_track = Arc::new(TrackLocalStaticSample::new(
            sending_capability(track.kind()),
            track.id().to_owned(),
            stream_id.to_owned(),
        ));

        let sender = self
            .peer_connection
            .add_track(Arc::clone(&sample_track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| Error::MediaTrackError(format!("Failed to add {} track: {}", track.kind(), e)))?;

        self.senders.lock().push(sender);
        self.sample_tracks
            .lock()
            .push((track.id().to_owned(), sample_track));

        info!(
            "Added {} track {} to peer {}",
            track.kind(),
            track.id(),
            self.connection_id
        );
        Ok(())
    }

    fn on_track(&self, handler: TrackHandler) {
        self.track_handlers.lock().push(handler);
    }

    fn connection_state(&self) -> Observable<NativeConnectionState> {
        self.state.clone()
    }

    fn ice_gathering_state(&self) -> Observable<IceGatheringState> {
        self.gathering.clone()
    }

    async fn close(&self) -> Result<()> {
        info!("Closing peer connection {}", self.connection_id);

        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::PeerConnectionError(format!("Failed to close peer connection: {}", e)))?;

        self.senders.lock().clear();
        self.state.set(NativeConnectionState::Closed);
        Ok(())
    }
}

/// Factory producing [`WebRtcPeerConnection`]s
#[derive(Debug, Clone, Default)]
pub struct WebRtcPeerConnectionFactory;

impl WebRtcPeerConnectionFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PeerConnectionFactory for WebRtcPeerConnectionFactory {
    async fn create(&self, config: &PeerConfig) -> Result<Arc<dyn NativePeerConnection>> {
        let connection = WebRtcPeerConnection::new(config).await?;
        Ok(Arc::new(connection))
    }

    fn codec_capabilities(&self, kind: MediaKind) -> Vec<String> {
        registered_codecs(kind)
            .into_iter()
            .filter(|params| {
                let mime = params.capability.mime_type.to_ascii_lowercase();
                !HELPER_CODECS
                    .iter()
                    .any(|helper| mime == format!("{}/{}", kind, helper))
            })
            .map(|params| {
                format!(
                    "{} {}",
                    params.capability.mime_type, params.capability.sdp_fmtp_line
                )
                .trim()
                .to_string()
            })
            .collect()
    }
}
