//! Comm channel envelope types
//!
//! Requests travel as `{cmd, id, args}` and replies as `{ans, id, res}`,
//! where `ans` repeats the command name and `id` identifies the session
//! model on both sides.

use crate::media::{DeviceInfo, DeviceKind};
use crate::sdp::SessionDescription;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Command names
pub mod commands {
    /// Offer out, answer back
    pub const EXCHANGE_PEER: &str = "exchange_peer";

    /// Report the device actually in use (no reply)
    pub const SYNC_DEVICE: &str = "sync_device";

    /// List devices of one kind
    pub const REQUEST_DEVICES: &str = "request_devices";

    /// Remote side selected another device
    pub const NOTIFY_DEVICE_CHANGE: &str = "notify_device_change";
}

/// Request envelope
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandMessage {
    pub cmd: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub args: Value,
}

/// Reply envelope
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnswerMessage {
    pub ans: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub res: Value,
}

/// Any message on the comm channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum CommMessage {
    Command(CommandMessage),
    Answer(AnswerMessage),
}

/// `exchange_peer` arguments
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExchangePeerArgs {
    pub desc: SessionDescription,
}

/// `sync_device` arguments
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncDeviceArgs {
    #[serde(rename = "type")]
    pub kind: DeviceKind,
    pub id: Option<String>,
}

/// `request_devices` arguments
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestDevicesArgs {
    #[serde(rename = "type")]
    pub kind: DeviceKind,
}

/// Old and new device id of a `notify_device_change`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceChange {
    #[serde(default)]
    pub old: Option<String>,
    #[serde(default)]
    pub new: Option<String>,
}

/// `notify_device_change` arguments
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotifyDeviceChangeArgs {
    #[serde(rename = "type")]
    pub kind: DeviceKind,
    pub change: DeviceChange,
}

/// Reply payload of `request_devices`
pub type RequestDevicesResult = Vec<DeviceInfo>;

/// Inbound command the session knows how to handle
#[derive(Debug, Clone, PartialEq)]
pub enum InboundCommand {
    RequestDevices(RequestDevicesArgs),
    NotifyDeviceChange(NotifyDeviceChangeArgs),
}

impl InboundCommand {
    /// Decode a command envelope
    ///
    /// Returns `Ok(None)` for commands this side does not handle.
    pub fn from_message(message: &CommandMessage) -> Result<Option<Self>> {
        let parse_error = |e: serde_json::Error| {
            Error::CommError(format!("Malformed {} arguments: {}", message.cmd, e))
        };

        let command = match message.cmd.as_str() {
            commands::REQUEST_DEVICES => InboundCommand::RequestDevices(
                serde_json::from_value(message.args.clone()).map_err(parse_error)?,
            ),
            commands::NOTIFY_DEVICE_CHANGE => InboundCommand::NotifyDeviceChange(
                serde_json::from_value(message.args.clone()).map_err(parse_error)?,
            ),
            _ => return Ok(None),
        };
        Ok(Some(command))
    }
}
