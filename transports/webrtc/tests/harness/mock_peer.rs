//! Scriptable native peer connection

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use webcam_rtc::config::PeerConfig;
use webcam_rtc::media::{LocalTrack, MediaKind, RemoteTrack};
use webcam_rtc::peer::{
    IceGatheringState, NativeConnectionState, NativePeerConnection, PeerConnectionFactory,
    TrackHandler,
};
use webcam_rtc::sdp::SessionDescription;
use webcam_rtc::state::Observable;
use webcam_rtc::{Error, Result};

/// Offer produced by every mock connection (before gathering)
pub const OFFER_SDP: &str = "v=0\r\n\
o=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
a=group:BUNDLE 0 1\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111 0\r\n\
c=IN IP4 0.0.0.0\r\n\
a=mid:0\r\n\
a=rtpmap:111 opus/48000/2\r\n\
a=fmtp:111 minptime=10;useinbandfec=1\r\n\
a=rtpmap:0 PCMU/8000\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96 97 102 103\r\n\
c=IN IP4 0.0.0.0\r\n\
a=mid:1\r\n\
a=rtpmap:96 VP8/90000\r\n\
a=rtcp-fb:96 nack\r\n\
a=rtpmap:97 rtx/90000\r\n\
a=fmtp:97 apt=96\r\n\
a=rtpmap:102 H264/90000\r\n\
a=rtcp-fb:102 nack\r\n\
a=fmtp:102 level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f\r\n\
a=rtpmap:103 rtx/90000\r\n\
a=fmtp:103 apt=102\r\n";

/// Candidate line appended once gathering completes
pub const CANDIDATE_LINE: &str = "a=candidate:1 1 udp 2130706431 192.168.1.2 50000 typ host\r\n";

/// Answer returned by the recording exchange
pub const ANSWER_SDP: &str = "v=0\r\n\
o=- 1 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96\r\n\
a=rtpmap:96 VP8/90000\r\n";

/// How a mock connection behaves
#[derive(Debug, Clone)]
pub struct PeerScript {
    /// Whether candidate gathering ever completes
    pub gathering_completes: bool,
    /// Native state reached after the remote description is applied
    pub settles_to: NativeConnectionState,
    /// Inbound tracks announced after the remote description is applied
    pub remote_tracks: Vec<MediaKind>,
    /// Whether `close` fails
    pub close_fails: bool,
    /// State reported right after settling, before anyone else runs
    pub then_reports: Option<NativeConnectionState>,
}

impl Default for PeerScript {
    fn default() -> Self {
        Self {
            gathering_completes: true,
            settles_to: NativeConnectionState::Connected,
            remote_tracks: vec![MediaKind::Video],
            close_fails: false,
            then_reports: None,
        }
    }
}

impl PeerScript {
    pub fn settling_to(state: NativeConnectionState) -> Self {
        Self {
            settles_to: state,
            ..Self::default()
        }
    }
}

/// Mock native connection following a [`PeerScript`]
pub struct MockPeerConnection {
    id: String,
    script: PeerScript,
    connection_state: Observable<NativeConnectionState>,
    gathering_state: Observable<IceGatheringState>,
    local: Mutex<Option<SessionDescription>>,
    remote: Mutex<Option<SessionDescription>>,
    tracks: Mutex<Vec<(Arc<dyn LocalTrack>, String)>>,
    handlers: Arc<Mutex<Vec<TrackHandler>>>,
    close_count: AtomicUsize,
}

impl MockPeerConnection {
    pub fn new(id: impl Into<String>, script: PeerScript) -> Self {
        Self {
            id: id.into(),
            script,
            connection_state: Observable::new(NativeConnectionState::New),
            gathering_state: Observable::new(IceGatheringState::New),
            local: Mutex::new(None),
            remote: Mutex::new(None),
            tracks: Mutex::new(Vec::new()),
            handlers: Arc::new(Mutex::new(Vec::new())),
            close_count: AtomicUsize::new(0),
        }
    }

    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> NativeConnectionState {
        self.connection_state.get()
    }

    /// Kinds of the local tracks added so far
    pub fn added_kinds(&self) -> Vec<MediaKind> {
        self.tracks.lock().iter().map(|(t, _)| t.kind()).collect()
    }

    pub fn added_tracks(&self) -> Vec<Arc<dyn LocalTrack>> {
        self.tracks.lock().iter().map(|(t, _)| t.clone()).collect()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.remote.lock().clone()
    }

    /// Simulate a failure reported by the platform
    pub fn report(&self, state: NativeConnectionState) {
        self.connection_state.set(state);
    }

    /// Announce an inbound track to every registered handler
    pub fn emit_track(&self, kind: MediaKind) {
        emit(&self.handlers, &self.id, kind);
    }
}

fn emit(handlers: &Mutex<Vec<TrackHandler>>, connection_id: &str, kind: MediaKind) {
    let track = RemoteTrack {
        id: format!("{}-remote-{}", connection_id, kind),
        stream_id: format!("{}-remote-stream", connection_id),
        kind,
    };
    let handlers: Vec<TrackHandler> = handlers.lock().clone();
    for handler in handlers {
        handler(track.clone());
    }
}

#[async_trait]
impl NativePeerConnection for MockPeerConnection {
    fn id(&self) -> &str {
        &self.id
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        Ok(SessionDescription::offer(OFFER_SDP))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        *self.local.lock() = Some(desc);
        self.gathering_state.set(IceGatheringState::Gathering);

        if self.script.gathering_completes {
            if let Some(local) = self.local.lock().as_mut() {
                local.sdp.push_str(CANDIDATE_LINE);
            }
            self.gathering_state.set(IceGatheringState::Complete);
        }
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.local.lock().clone()
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        if self.local.lock().is_none() {
            return Err(Error::SdpError("Remote description before local".to_string()));
        }
        *self.remote.lock() = Some(desc);
        self.connection_state.set(NativeConnectionState::Connecting);

        let state = self.connection_state.clone();
        let handlers = Arc::clone(&self.handlers);
        let id = self.id.clone();
        let script = self.script.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            for kind in script.remote_tracks {
                emit(&handlers, &id, kind);
            }
            state.set(script.settles_to);
            if let Some(next) = script.then_reports {
                state.set(next);
            }
        });
        Ok(())
    }

    async fn add_track(&self, track: Arc<dyn LocalTrack>, stream_id: &str) -> Result<()> {
        self.tracks.lock().push((track, stream_id.to_string()));
        Ok(())
    }

    fn on_track(&self, handler: TrackHandler) {
        self.handlers.lock().push(handler);
    }

    fn connection_state(&self) -> Observable<NativeConnectionState> {
        self.connection_state.clone()
    }

    fn ice_gathering_state(&self) -> Observable<IceGatheringState> {
        self.gathering_state.clone()
    }

    async fn close(&self) -> Result<()> {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        if self.script.close_fails {
            return Err(Error::PeerConnectionError("close refused".to_string()));
        }
        self.connection_state.set(NativeConnectionState::Closed);
        Ok(())
    }
}

/// Factory handing out [`MockPeerConnection`]s
///
/// Queued scripts are used first, then the default one.
pub struct MockFactory {
    default_script: PeerScript,
    scripts: Mutex<VecDeque<PeerScript>>,
    created: Mutex<Vec<Arc<MockPeerConnection>>>,
    configs: Mutex<Vec<PeerConfig>>,
    fail_create: Mutex<bool>,
}

impl MockFactory {
    pub fn new(default_script: PeerScript) -> Arc<Self> {
        Arc::new(Self {
            default_script,
            scripts: Mutex::new(VecDeque::new()),
            created: Mutex::new(Vec::new()),
            configs: Mutex::new(Vec::new()),
            fail_create: Mutex::new(false),
        })
    }

    pub fn connected() -> Arc<Self> {
        Self::new(PeerScript::default())
    }

    pub fn push_script(&self, script: PeerScript) {
        self.scripts.lock().push_back(script);
    }

    pub fn fail_next_create(&self) {
        *self.fail_create.lock() = true;
    }

    pub fn create_count(&self) -> usize {
        self.created.lock().len()
    }

    pub fn connections(&self) -> Vec<Arc<MockPeerConnection>> {
        self.created.lock().clone()
    }

    pub fn last(&self) -> Arc<MockPeerConnection> {
        self.created
            .lock()
            .last()
            .cloned()
            .expect("No connection created yet")
    }

    /// Peer configurations passed to `create`, in order
    pub fn configs(&self) -> Vec<PeerConfig> {
        self.configs.lock().clone()
    }
}

#[async_trait]
impl PeerConnectionFactory for MockFactory {
    async fn create(&self, config: &PeerConfig) -> Result<Arc<dyn NativePeerConnection>> {
        if std::mem::take(&mut *self.fail_create.lock()) {
            return Err(Error::PeerConnectionError("factory refused".to_string()));
        }
        self.configs.lock().push(config.clone());

        let script = self
            .scripts
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default_script.clone());
        let id = format!("mock-pc-{}", self.created.lock().len());
        let pc = Arc::new(MockPeerConnection::new(id, script));
        self.created.lock().push(pc.clone());
        Ok(pc)
    }

    fn codec_capabilities(&self, kind: MediaKind) -> Vec<String> {
        match kind {
            MediaKind::Audio => vec!["audio/opus".to_string(), "audio/PCMU".to_string()],
            MediaKind::Video => vec![
                "video/VP8".to_string(),
                "video/H264 level-asymmetry-allowed=1;packetization-mode=1".to_string(),
            ],
        }
    }
}
