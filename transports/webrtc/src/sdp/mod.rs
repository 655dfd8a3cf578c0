//! Session description handling

pub mod codec_filter;
pub mod description;

pub use codec_filter::{filter_codec, CodecName, CodecPreference, CodecPreferences, FilterOutcome};
pub use description::{SdpType, SessionDescription};
