//! Request/response bridge over a comm channel
//!
//! The embedder supplies a [`CommChannel`] that can push one JSON value to
//! the remote side, and feeds every inbound value into
//! [`CommBridge::handle_incoming`].

use super::exchange::SignalingExchange;
use super::protocol::{commands, AnswerMessage, CommMessage, CommandMessage, ExchangePeerArgs};
use crate::sdp::SessionDescription;
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Raw outbound message sink
pub trait CommChannel: Send + Sync {
    fn send(&self, message: Value) -> Result<()>;
}

/// Matches replies to pending requests by command name and model id
pub struct CommBridge {
    id: String,
    channel: Arc<dyn CommChannel>,
    /// Pending replies per command, oldest first
    pending: Mutex<HashMap<String, VecDeque<oneshot::Sender<Value>>>>,
    closed: AtomicBool,
}

impl CommBridge {
    /// Create a bridge for the model `id`
    pub fn new(id: impl Into<String>, channel: Arc<dyn CommChannel>) -> Self {
        Self {
            id: id.into(),
            channel,
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Send `{cmd, id, args}` and wait for the matching `res`
    pub async fn send_command(&self, cmd: &str, args: Value) -> Result<Value> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::CommError(format!("Bridge closed, cannot send {}", cmd)));
        }

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .entry(cmd.to_string())
            .or_default()
            .push_back(tx);

        if let Err(e) = self.send_envelope(cmd, args) {
            // Only our own slot is closed once `rx` is gone
            drop(rx);
            if let Some(queue) = self.pending.lock().get_mut(cmd) {
                queue.retain(|tx| !tx.is_closed());
            }
            return Err(e);
        }

        rx.await
            .map_err(|_| Error::CommError(format!("Bridge closed before {} reply", cmd)))
    }

    /// Send `{cmd, id, args}` without waiting for a reply
    pub fn notify(&self, cmd: &str, args: Value) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::CommError(format!("Bridge closed, cannot send {}", cmd)));
        }
        self.send_envelope(cmd, args)
    }

    /// Answer an inbound command with `{ans, id, res}`
    pub fn reply(&self, ans: &str, res: Value) -> Result<()> {
        let message = AnswerMessage {
            ans: ans.to_string(),
            id: self.id.clone(),
            res,
        };
        self.channel.send(serde_json::to_value(message)?)
    }

    /// Feed one inbound message
    ///
    /// Replies resolve the oldest pending request for their command. Commands
    /// addressed to this model (or to no model) are returned for dispatch.
    /// Messages for another model are dropped.
    pub fn handle_incoming(&self, message: Value) -> Result<Option<CommandMessage>> {
        let message: CommMessage = serde_json::from_value(message)
            .map_err(|e| Error::CommError(format!("Unrecognized comm message: {}", e)))?;

        match message {
            CommMessage::Answer(answer) => {
                if answer.id != self.id {
                    debug!("Ignoring {} reply for model {}", answer.ans, answer.id);
                    return Ok(None);
                }
                let mut pending = self.pending.lock();
                let Some(queue) = pending.get_mut(&answer.ans) else {
                    warn!("Unsolicited {} reply", answer.ans);
                    return Ok(None);
                };
                let mut res = answer.res;
                while let Some(tx) = queue.pop_front() {
                    match tx.send(res) {
                        Ok(()) => break,
                        // Requester gave up; hand the reply to the next one
                        Err(returned) => res = returned,
                    }
                }
                if queue.is_empty() {
                    pending.remove(&answer.ans);
                }
                Ok(None)
            }
            CommMessage::Command(command) => {
                if !command.id.is_empty() && command.id != self.id {
                    debug!("Ignoring {} for model {}", command.cmd, command.id);
                    return Ok(None);
                }
                Ok(Some(command))
            }
        }
    }

    /// Number of requests still waiting for a reply
    pub fn pending_requests(&self) -> usize {
        self.pending.lock().values().map(VecDeque::len).sum()
    }

    /// Fail every pending request and refuse new ones
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let dropped = std::mem::take(&mut *self.pending.lock());
        if !dropped.is_empty() {
            debug!("Bridge {} dropped {} pending command kinds", self.id, dropped.len());
        }
    }

    fn send_envelope(&self, cmd: &str, args: Value) -> Result<()> {
        let message = CommandMessage {
            cmd: cmd.to_string(),
            id: self.id.clone(),
            args,
        };
        self.channel.send(serde_json::to_value(message)?)
    }
}

/// [`SignalingExchange`] realized as an `exchange_peer` command
pub struct CommExchange {
    bridge: Arc<CommBridge>,
}

impl CommExchange {
    pub fn new(bridge: Arc<CommBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl SignalingExchange for CommExchange {
    async fn exchange(&self, offer: SessionDescription) -> Result<SessionDescription> {
        let args = serde_json::to_value(ExchangePeerArgs { desc: offer })?;
        let res = self
            .bridge
            .send_command(commands::EXCHANGE_PEER, args)
            .await
            .map_err(|e| Error::SignalingError(e.to_string()))?;
        SessionDescription::from_value(res)
    }
}
