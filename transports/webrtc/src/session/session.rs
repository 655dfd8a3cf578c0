//! The session aggregate
//!
//! One native handle, the local capture stream and the inbound remote stream.
//! A [`Session`] is created by `connect` and released on teardown; nothing of
//! it outlives the release.

use super::events::SessionEvent;
use crate::media::{LocalStream, RemoteStream, RemoteTrack, RenderSink};
use crate::peer::{NativePeerConnection, TrackHandler};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Default)]
struct RemoteSide {
    stream: Option<RemoteStream>,
    /// Sinks waiting for the first video track
    sinks: Vec<Arc<dyn RenderSink>>,
    released: bool,
}

/// One live (or failed) peer session
pub struct Session {
    native: Arc<dyn NativePeerConnection>,
    local: Mutex<Option<LocalStream>>,
    remote: Arc<Mutex<RemoteSide>>,
}

impl Session {
    pub fn new(native: Arc<dyn NativePeerConnection>) -> Self {
        Self {
            native,
            local: Mutex::new(None),
            remote: Arc::new(Mutex::new(RemoteSide::default())),
        }
    }

    /// Identifier of the native handle
    pub fn id(&self) -> &str {
        self.native.id()
    }

    pub fn native(&self) -> Arc<dyn NativePeerConnection> {
        Arc::clone(&self.native)
    }

    pub fn set_local_stream(&self, stream: LocalStream) {
        *self.local.lock() = Some(stream);
    }

    pub fn local_stream(&self) -> Option<LocalStream> {
        self.local.lock().clone()
    }

    pub fn remote_stream(&self) -> Option<RemoteStream> {
        self.remote.lock().stream.clone()
    }

    /// Inbound-track callback for the native connection
    ///
    /// Tracks are collected into the remote stream. When the first video
    /// track arrives, every waiting sink gets the stream and
    /// [`SessionEvent::RemoteStreamAvailable`] is published. Tracks arriving
    /// after [`release`](Self::release) are dropped.
    pub fn track_handler(&self, events: broadcast::Sender<SessionEvent>) -> TrackHandler {
        let remote = Arc::clone(&self.remote);
        let connection_id = self.id().to_string();

        Arc::new(move |track: RemoteTrack| {
            let (stream, sinks) = {
                let mut side = remote.lock();
                if side.released {
                    debug!("Dropping track {} of released session {}", track.id, connection_id);
                    return;
                }

                let had_video = side.stream.as_ref().is_some_and(RemoteStream::has_video);
                match side.stream.as_mut() {
                    Some(stream) => stream.add_track(track),
                    None => side.stream = Some(RemoteStream::from_track(track)),
                }

                match side.stream.clone() {
                    Some(stream) if !had_video && stream.has_video() => {
                        (stream, std::mem::take(&mut side.sinks))
                    }
                    _ => return,
                }
            };

            debug!(
                "Remote stream {} available on {} ({} waiting sinks)",
                stream.id(),
                connection_id,
                sinks.len()
            );
            for sink in sinks {
                sink.attach(stream.clone());
            }
            let _ = events.send(SessionEvent::RemoteStreamAvailable(stream));
        })
    }

    /// Hand the remote stream to `sink` now, or once video arrives
    pub fn bind_sink(&self, sink: Arc<dyn RenderSink>) {
        let ready = {
            let mut side = self.remote.lock();
            if side.released {
                return;
            }
            match side.stream.clone() {
                Some(stream) if stream.has_video() => Some(stream),
                _ => {
                    side.sinks.push(Arc::clone(&sink));
                    None
                }
            }
        };

        if let Some(stream) = ready {
            sink.attach(stream);
        }
    }

    /// Stop local capture and forget both streams and any waiting sinks
    pub fn release(&self) {
        if let Some(stream) = self.local.lock().take() {
            stream.stop();
        }
        let mut side = self.remote.lock();
        side.released = true;
        side.stream = None;
        side.sinks.clear();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id())
            .field("remote", &self.remote_stream().map(|s| s.id().to_string()))
            .finish()
    }
}
