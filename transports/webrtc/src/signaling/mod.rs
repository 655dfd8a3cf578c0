//! Signaling: the offer/answer exchange and the comm channel carrying it

pub mod comm;
pub mod exchange;
pub mod protocol;

pub use comm::{CommBridge, CommChannel, CommExchange};
pub use exchange::{FnExchange, SignalingExchange};
pub use protocol::{
    commands, AnswerMessage, CommMessage, CommandMessage, InboundCommand, NotifyDeviceChangeArgs,
    RequestDevicesArgs, SyncDeviceArgs,
};
