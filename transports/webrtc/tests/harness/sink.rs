//! Recording render sink and comm channel

use parking_lot::Mutex;
use serde_json::Value;

use webcam_rtc::media::{RemoteStream, RenderSink};
use webcam_rtc::signaling::CommChannel;
use webcam_rtc::Result;

/// Sink that keeps every stream it was handed
#[derive(Default)]
pub struct RecordingSink {
    attached: Mutex<Vec<RemoteStream>>,
}

impl RecordingSink {
    pub fn attached(&self) -> Vec<RemoteStream> {
        self.attached.lock().clone()
    }
}

impl RenderSink for RecordingSink {
    fn attach(&self, stream: RemoteStream) {
        self.attached.lock().push(stream);
    }
}

/// Comm channel that keeps every outbound message
#[derive(Default)]
pub struct RecordingChannel {
    sent: Mutex<Vec<Value>>,
}

impl RecordingChannel {
    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().clone()
    }

    /// Outbound messages with the given `cmd`
    pub fn commands(&self, cmd: &str) -> Vec<Value> {
        self.sent
            .lock()
            .iter()
            .filter(|m| m["cmd"] == cmd)
            .cloned()
            .collect()
    }

    /// Outbound replies with the given `ans`
    pub fn answers(&self, ans: &str) -> Vec<Value> {
        self.sent
            .lock()
            .iter()
            .filter(|m| m["ans"] == ans)
            .cloned()
            .collect()
    }
}

impl CommChannel for RecordingChannel {
    fn send(&self, message: Value) -> Result<()> {
        self.sent.lock().push(message);
        Ok(())
    }
}
