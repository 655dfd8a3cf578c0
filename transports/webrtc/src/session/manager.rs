//! Session manager
//!
//! Owns at most one [`Session`] and drives it through the connection states:
//!
//! ```text
//!   New/Closed/Error --connect--> Connecting --settled ok--> Connected
//!                                     |                          |
//!                                     +--failure--> Closing <----+ close_peer / native failure
//!                                                     |
//!                                                     +--> Closed (or Error)
//! ```
//!
//! Every mutating entry point waits on the state barrier first and then
//! claims its transition with a compare-and-set, so at most one construction
//! or teardown runs at a time.

use super::events::SessionEvent;
use super::session::Session;
use crate::config::{IceServerConfig, SessionConfig};
use crate::media::{
    DeviceDescriptor, DeviceInfo, DeviceKind, LocalStream, LocalTrack, MediaDevices, MediaKind,
    RemoteStream, RenderSink, SyntheticMediaDevices,
};
use crate::peer::{
    wait_for, NativeConnectionState, NativePeerConnection, NegotiationDriver,
    PeerConnectionFactory, WebRtcPeerConnectionFactory,
};
use crate::signaling::{
    commands, CommBridge, CommExchange, CommandMessage, InboundCommand, SignalingExchange,
    SyncDeviceArgs,
};
use crate::state::{ConnectionState, ConnectionStateMachine};
use crate::{Error, Result};
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

/// Capacity of the session event channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Device last synced per input kind
#[derive(Debug, Default)]
struct SelectedDevices {
    audio_input: Option<String>,
    video_input: Option<String>,
}

impl SelectedDevices {
    fn get(&self, kind: MediaKind) -> Option<&str> {
        match kind {
            MediaKind::Audio => self.audio_input.as_deref(),
            MediaKind::Video => self.video_input.as_deref(),
        }
    }

    /// Returns whether the remembered device changed
    fn set(&mut self, kind: MediaKind, device_id: Option<String>) -> bool {
        let slot = match kind {
            MediaKind::Audio => &mut self.audio_input,
            MediaKind::Video => &mut self.video_input,
        };
        if *slot == device_id {
            return false;
        }
        *slot = device_id;
        true
    }
}

struct Inner {
    id: String,
    machine: ConnectionStateMachine,
    config: RwLock<SessionConfig>,
    selected: Mutex<SelectedDevices>,
    session: Mutex<Option<Arc<Session>>>,
    factory: Arc<dyn PeerConnectionFactory>,
    devices: Arc<dyn MediaDevices>,
    exchange: Arc<dyn SignalingExchange>,
    bridge: Option<Arc<CommBridge>>,
    events: broadcast::Sender<SessionEvent>,
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        if self.machine.get() != state {
            self.machine.set(state);
            let _ = self.events.send(SessionEvent::StateChanged(state));
        }
    }

    fn transition(&self, from: &[ConnectionState], to: ConnectionState) -> bool {
        match self.machine.transition(from, to) {
            Ok(_) => {
                let _ = self.events.send(SessionEvent::StateChanged(to));
                true
            }
            Err(_) => false,
        }
    }

    fn current_session(&self) -> Option<Arc<Session>> {
        self.session.lock().clone()
    }

    /// Forget `session` if it is still the current one
    fn clear_session(&self, session: &Arc<Session>) {
        let mut slot = self.session.lock();
        if slot.as_ref().is_some_and(|s| Arc::ptr_eq(s, session)) {
            *slot = None;
        }
    }
}

/// Builder for [`SessionManager`]
///
/// Defaults: the webrtc-rs factory, the synthetic device set, and, when a
/// comm bridge is attached, the `exchange_peer` command as signaling
/// exchange.
#[derive(Default)]
pub struct SessionManagerBuilder {
    id: Option<String>,
    config: SessionConfig,
    factory: Option<Arc<dyn PeerConnectionFactory>>,
    devices: Option<Arc<dyn MediaDevices>>,
    exchange: Option<Arc<dyn SignalingExchange>>,
    bridge: Option<Arc<CommBridge>>,
}

impl SessionManagerBuilder {
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn factory(mut self, factory: Arc<dyn PeerConnectionFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn devices(mut self, devices: Arc<dyn MediaDevices>) -> Self {
        self.devices = Some(devices);
        self
    }

    pub fn exchange(mut self, exchange: Arc<dyn SignalingExchange>) -> Self {
        self.exchange = Some(exchange);
        self
    }

    /// Attach a comm bridge for device sync and inbound commands
    pub fn bridge(mut self, bridge: Arc<CommBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// Validate the configuration and build the manager
    pub fn build(self) -> Result<SessionManager> {
        self.config.validate()?;

        let exchange: Arc<dyn SignalingExchange> = match (self.exchange, &self.bridge) {
            (Some(exchange), _) => exchange,
            (None, Some(bridge)) => Arc::new(CommExchange::new(Arc::clone(bridge))),
            (None, None) => {
                return Err(Error::InvalidConfig(
                    "A signaling exchange or a comm bridge is required".to_string(),
                ))
            }
        };

        let id = self
            .id
            .or_else(|| self.bridge.as_ref().map(|b| b.id().to_string()))
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(SessionManager {
            inner: Arc::new(Inner {
                machine: ConnectionStateMachine::new(id.clone()),
                id,
                config: RwLock::new(self.config),
                selected: Mutex::new(SelectedDevices::default()),
                session: Mutex::new(None),
                factory: self
                    .factory
                    .unwrap_or_else(|| Arc::new(WebRtcPeerConnectionFactory::new())),
                devices: self
                    .devices
                    .unwrap_or_else(|| Arc::new(SyntheticMediaDevices::default())),
                exchange,
                bridge: self.bridge,
                events,
            }),
        })
    }
}

/// Top-level handle of one logical webcam session
///
/// Cheap to clone; clones drive the same session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn builder() -> SessionManagerBuilder {
        SessionManagerBuilder::default()
    }

    /// Session model identifier
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.inner.machine.get()
    }

    /// The state machine, for barrier waits and state subscriptions
    pub fn state_machine(&self) -> &ConnectionStateMachine {
        &self.inner.machine
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Snapshot of the current configuration
    pub fn config(&self) -> SessionConfig {
        self.inner.config.read().clone()
    }

    pub fn local_stream(&self) -> Option<LocalStream> {
        self.inner.current_session()?.local_stream()
    }

    pub fn remote_stream(&self) -> Option<RemoteStream> {
        self.inner.current_session()?.remote_stream()
    }

    /// Device remembered for an input kind
    pub fn selected_device(&self, kind: MediaKind) -> Option<String> {
        self.inner.selected.lock().get(kind).map(str::to_string)
    }

    /// Sendable codecs of `kind`, as accepted by codec preferences
    pub fn available_codecs(&self, kind: MediaKind) -> Vec<String> {
        self.inner.factory.codec_capabilities(kind)
    }

    /// Start, reuse or restart the session
    ///
    /// - `Connected` without `force_reconnect`: only binds `sink`.
    /// - `Connected` with `force_reconnect`: tears the session down and
    ///   starts a fresh one.
    /// - `New`/`Closed`/`Error`: starts a session, unless
    ///   `only_if_already_connected` is set.
    ///
    /// Calls arriving while a connect or close is in flight wait for it to
    /// settle first. Returns the state this call left the session in.
    #[instrument(skip_all, fields(session_id = %self.inner.id))]
    pub async fn connect(
        &self,
        sink: Option<Arc<dyn RenderSink>>,
        force_reconnect: bool,
        only_if_already_connected: bool,
    ) -> Result<ConnectionState> {
        let mut force_reconnect = force_reconnect;
        let mut only_if_already_connected = only_if_already_connected;

        loop {
            let state = self
                .inner
                .machine
                .wait_until_in(&ConnectionState::SETTLED)
                .await?;

            match state {
                ConnectionState::Connected if !force_reconnect => {
                    if let Some(sink) = sink {
                        self.bind_video(sink);
                    }
                    return Ok(ConnectionState::Connected);
                }
                ConnectionState::Connected => {
                    if !self
                        .inner
                        .transition(&[ConnectionState::Connected], ConnectionState::Closing)
                    {
                        continue;
                    }
                    info!("Reconnecting session");
                    self.finish_close().await?;
                    force_reconnect = false;
                    only_if_already_connected = false;
                }
                _ if only_if_already_connected => {
                    debug!("Not connected ({}), skipping reconnect", state);
                    return Ok(state);
                }
                _ => {
                    if !self.inner.transition(
                        &[
                            ConnectionState::New,
                            ConnectionState::Closed,
                            ConnectionState::Error,
                        ],
                        ConnectionState::Connecting,
                    ) {
                        continue;
                    }
                    return self.start_session(sink).await;
                }
            }
        }
    }

    /// Tear the session down
    ///
    /// Rejected while the session is `New` or `Connecting`. Waits for an
    /// in-flight close and is a no-op once `Closed`. From `Error` it passes
    /// through `Closing`, closing a dangling handle if one is left.
    #[instrument(skip_all, fields(session_id = %self.inner.id))]
    pub async fn close_peer(&self) -> Result<ConnectionState> {
        loop {
            let state = self.inner.machine.get();
            match state {
                ConnectionState::New | ConnectionState::Connecting => {
                    return Err(Error::InvalidState {
                        operation: "close_peer",
                        state,
                    });
                }
                ConnectionState::Closing => {
                    self.inner
                        .machine
                        .wait_until(|s| *s != ConnectionState::Closing)
                        .await?;
                }
                ConnectionState::Closed => return Ok(state),
                ConnectionState::Connected | ConnectionState::Error => {
                    if self
                        .inner
                        .transition(&[state], ConnectionState::Closing)
                    {
                        return self.finish_close().await;
                    }
                }
            }
        }
    }

    /// Hand the remote stream to `sink` now, or once video arrives
    ///
    /// Without a session this does nothing.
    pub fn bind_video(&self, sink: Arc<dyn RenderSink>) {
        match self.inner.current_session() {
            Some(session) => session.bind_sink(sink),
            None => debug!("No session to bind a sink to"),
        }
    }

    /// Record the device actually backing `track`
    ///
    /// The capability query wins; platforms without one fall back to the
    /// track settings. The device is remembered for the track's kind, so the
    /// next capture pins it, reported as `sync_device` over the comm bridge
    /// and published as [`SessionEvent::DeviceSynced`].
    pub fn sync_device(&self, track: &dyn LocalTrack) -> Result<Option<DeviceDescriptor>> {
        let media_kind = track.kind();
        let kind = media_kind.input_device();
        let device_id = match track.capabilities() {
            Some(capabilities) => capabilities.device_id,
            None => track.settings().device_id,
        };

        if self
            .inner
            .selected
            .lock()
            .set(media_kind, device_id.clone())
        {
            debug!("Device in use for {} is now {:?}", kind, device_id);
        }

        if let Some(bridge) = &self.inner.bridge {
            let args = serde_json::to_value(SyncDeviceArgs {
                kind,
                id: device_id.clone(),
            })?;
            if let Err(e) = bridge.notify(commands::SYNC_DEVICE, args) {
                warn!("Failed to report {} device: {}", kind, e);
            }
        }

        let descriptor = device_id.map(|id| DeviceDescriptor { id, kind });
        if let Some(descriptor) = &descriptor {
            let _ = self
                .inner
                .events
                .send(SessionEvent::DeviceSynced(descriptor.clone()));
        }
        Ok(descriptor)
    }

    /// Devices of `kind` with a usable id
    pub async fn request_devices(&self, kind: DeviceKind) -> Result<Vec<DeviceInfo>> {
        let devices = self.inner.devices.enumerate_devices().await?;
        Ok(devices
            .into_iter()
            .filter(|d| d.kind == kind && !d.device_id.is_empty())
            .collect())
    }

    /// Remote side picked another input device
    ///
    /// Remembers the device and reconnects if a session is up. Output
    /// devices are not the session's concern.
    pub async fn notify_device_change(
        &self,
        kind: DeviceKind,
        device_id: Option<String>,
    ) -> Result<()> {
        let Some(media_kind) = kind.media_kind() else {
            debug!("Ignoring change of {} device", kind);
            return Ok(());
        };

        let changed = self.inner.selected.lock().set(media_kind, device_id);
        if changed {
            info!("Remote side selected another {} device", kind);
            self.connect(None, true, true).await?;
        }
        Ok(())
    }

    /// Replace the ICE servers and reconnect a running session
    pub async fn set_ice_servers(
        &self,
        ice_servers: Vec<IceServerConfig>,
    ) -> Result<()> {
        let config = self.config().with_ice_servers(ice_servers);
        self.update_config(config).await
    }

    /// Replace the configuration and reconnect a running session
    pub async fn update_config(&self, config: SessionConfig) -> Result<()> {
        config.validate()?;
        *self.inner.config.write() = config;
        self.connect(None, true, true).await?;
        Ok(())
    }

    /// Dispatch one inbound comm command
    pub async fn handle_command(&self, message: &CommandMessage) -> Result<()> {
        let Some(command) = InboundCommand::from_message(message)? else {
            debug!("Ignoring unhandled command {}", message.cmd);
            return Ok(());
        };

        match command {
            InboundCommand::RequestDevices(args) => {
                let devices = self.request_devices(args.kind).await?;
                let bridge = self.inner.bridge.as_ref().ok_or_else(|| {
                    Error::CommError("No comm bridge to reply on".to_string())
                })?;
                bridge.reply(&message.cmd, serde_json::to_value(devices)?)
            }
            InboundCommand::NotifyDeviceChange(args) => {
                self.notify_device_change(args.kind, args.change.new).await
            }
        }
    }

    /// Feed one raw inbound comm message through the bridge
    pub async fn handle_incoming(&self, message: serde_json::Value) -> Result<()> {
        let bridge = self
            .inner
            .bridge
            .as_ref()
            .ok_or_else(|| Error::CommError("No comm bridge attached".to_string()))?;
        match bridge.handle_incoming(message)? {
            Some(command) => self.handle_command(&command).await,
            None => Ok(()),
        }
    }

    /// Build a session after `Connecting` has been claimed
    async fn start_session(&self, sink: Option<Arc<dyn RenderSink>>) -> Result<ConnectionState> {
        let config = self.config();
        match self.establish(&config, sink).await {
            Ok(()) => {
                self.inner.set_state(ConnectionState::Connected);
                info!("Session connected");
                self.recheck_native_state().await
            }
            Err(e) => {
                error!("Failed to establish session: {}", e);
                self.abort_session(&config).await;
                Err(e)
            }
        }
    }

    async fn establish(
        &self,
        config: &SessionConfig,
        sink: Option<Arc<dyn RenderSink>>,
    ) -> Result<()> {
        let native = self.inner.factory.create(&config.peer_config()).await?;
        let session = Arc::new(Session::new(Arc::clone(&native)));
        *self.inner.session.lock() = Some(Arc::clone(&session));
        debug!("Created native connection {}", native.id());

        native.on_track(session.track_handler(self.inner.events.clone()));
        if let Some(sink) = sink {
            session.bind_sink(sink);
        }
        self.spawn_failure_monitor(Arc::clone(&native));

        let constraints = {
            let selected = self.inner.selected.lock();
            config.constraints.pinned(
                selected.get(MediaKind::Audio),
                selected.get(MediaKind::Video),
            )
        };
        let stream = self.inner.devices.get_user_media(&constraints).await?;
        session.set_local_stream(stream.clone());
        for track in stream.tracks() {
            self.sync_device(track.as_ref())?;
            native.add_track(Arc::clone(track), stream.id()).await?;
        }

        NegotiationDriver::from_config(config)
            .negotiate(native.as_ref(), self.inner.exchange.as_ref(), &config.codecs)
            .await?;

        let settled = wait_for(
            &native.connection_state(),
            |s| !s.is_transitional(),
            config.timeouts.settle,
            "Connection settlement",
        )
        .await?;

        match settled {
            NativeConnectionState::Connected => Ok(()),
            NativeConnectionState::Failed => Err(Error::NatTraversalFailed(format!(
                "Connection {} failed to connect",
                native.id()
            ))),
            other => Err(Error::PeerConnectionError(format!(
                "Connection {} settled as {}",
                native.id(),
                other
            ))),
        }
    }

    /// Catch a failure the monitor saw while the session was still
    /// `Connecting`; it only acts on `Connected`.
    async fn recheck_native_state(&self) -> Result<ConnectionState> {
        let Some(native) = self.inner.current_session().map(|s| s.native()) else {
            return Ok(self.state());
        };
        let state = native.connection_state().get();
        if !state.is_terminal_failure() {
            return Ok(ConnectionState::Connected);
        }

        self.handle_native_failure(native.id(), state).await;
        self.inner
            .machine
            .wait_until_in(&ConnectionState::SETTLED)
            .await
    }

    /// Close whatever was built and land in `Error`
    async fn abort_session(&self, config: &SessionConfig) {
        if let Some(session) = self.inner.current_session() {
            self.inner.set_state(ConnectionState::Closing);
            if let Err(e) = self.teardown(&session, config).await {
                warn!("Failed to close connection {}: {}", session.id(), e);
            }
        }
        self.inner.set_state(ConnectionState::Error);
    }

    /// Tear down after `Closing` has been claimed
    async fn finish_close(&self) -> Result<ConnectionState> {
        let Some(session) = self.inner.current_session() else {
            self.inner.set_state(ConnectionState::Closed);
            return Ok(ConnectionState::Closed);
        };

        let config = self.config();
        match self.teardown(&session, &config).await {
            Ok(()) => {
                self.inner.set_state(ConnectionState::Closed);
                info!("Session closed");
                Ok(ConnectionState::Closed)
            }
            Err(e) => {
                error!("Failed to close connection {}: {}", session.id(), e);
                self.inner.set_state(ConnectionState::Error);
                Err(e)
            }
        }
    }

    /// Release streams, close the native handle and wait for it to confirm
    ///
    /// The handle stays current if closing fails.
    async fn teardown(&self, session: &Arc<Session>, config: &SessionConfig) -> Result<()> {
        session.release();
        let native = session.native();
        native.close().await?;
        wait_for(
            &native.connection_state(),
            |s| *s == NativeConnectionState::Closed,
            config.timeouts.settle,
            "Connection close",
        )
        .await?;
        self.inner.clear_session(session);
        Ok(())
    }

    /// Watch an established connection for failures it reports on its own
    fn spawn_failure_monitor(&self, native: Arc<dyn NativePeerConnection>) {
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        let connection_state = native.connection_state();

        tokio::spawn(async move {
            let Ok(state) = connection_state
                .wait_until(NativeConnectionState::is_terminal_failure)
                .await
            else {
                return;
            };
            if let Some(inner) = inner.upgrade() {
                SessionManager { inner }
                    .handle_native_failure(native.id(), state)
                    .await;
            }
        });
    }

    async fn handle_native_failure(&self, connection_id: &str, state: NativeConnectionState) {
        let Some(session) = self
            .inner
            .current_session()
            .filter(|s| s.id() == connection_id)
        else {
            debug!("Stale connection {} reported {}", connection_id, state);
            return;
        };

        if !self
            .inner
            .transition(&[ConnectionState::Connected], ConnectionState::Closing)
        {
            debug!(
                "Connection {} reported {} while {}",
                connection_id,
                state,
                self.state()
            );
            return;
        }

        warn!("Connection {} reported {}, tearing down", connection_id, state);
        let config = self.config();
        if let Err(e) = self.teardown(&session, &config).await {
            warn!("Failed to close connection {}: {}", connection_id, e);
        }
        self.inner.set_state(ConnectionState::Error);
        let _ = self.inner.events.send(SessionEvent::NativeFailure {
            connection_id: connection_id.to_string(),
            state,
        });
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("session", &self.inner.current_session())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selected_devices_report_changes() {
        let mut selected = SelectedDevices::default();
        assert!(selected.set(MediaKind::Video, Some("cam-1".to_string())));
        assert!(!selected.set(MediaKind::Video, Some("cam-1".to_string())));
        assert_eq!(selected.get(MediaKind::Video), Some("cam-1"));
        assert_eq!(selected.get(MediaKind::Audio), None);
    }

    #[test]
    fn test_builder_requires_exchange() {
        let err = SessionManager::builder().build().unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let config = SessionConfig::default().with_constraints(crate::media::MediaConstraints {
            audio: crate::media::TrackConstraint::disabled(),
            video: crate::media::TrackConstraint::disabled(),
        });
        let exchange = Arc::new(crate::signaling::FnExchange::new(
            |offer: crate::sdp::SessionDescription| {
                Box::pin(async move { Ok(crate::sdp::SessionDescription::answer(offer.sdp)) })
                    as futures::future::BoxFuture<'static, Result<_>>
            },
        ));
        let result = SessionManager::builder()
            .config(config)
            .exchange(exchange)
            .build();
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}
