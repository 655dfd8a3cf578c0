//! Offer/answer negotiation against a native peer connection
//!
//! ```text
//! create offer -> set local -> wait gathering complete -> re-read local
//!     -> filter audio/video codecs -> exchange(offer) -> set remote(answer)
//! ```
//!
//! There is no trickle ICE: the offer only leaves once every local candidate
//! is in it.

use super::native::{IceGatheringState, NativePeerConnection};
use crate::config::{NegotiationTimeouts, SessionConfig};
use crate::media::MediaKind;
use crate::sdp::{filter_codec, CodecPreferences, SessionDescription};
use crate::signaling::SignalingExchange;
use crate::state::Observable;
use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Wait until `predicate` holds for a native observable
///
/// `what` names the wait in the timeout error.
pub async fn wait_for<T, F>(
    observable: &Observable<T>,
    predicate: F,
    timeout: Option<Duration>,
    what: &str,
) -> Result<T>
where
    T: Clone + PartialEq + Send + 'static,
    F: Fn(&T) -> bool + Send + 'static,
{
    with_timeout(observable.wait_until(predicate), timeout, what).await
}

/// Bound a future by an optional timeout
pub async fn with_timeout<T, Fut>(future: Fut, timeout: Option<Duration>, what: &str) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, future)
            .await
            .map_err(|_| Error::OperationTimeout(format!("{} did not finish within {:?}", what, limit)))?,
        None => future.await,
    }
}

/// Drives one offer/answer exchange
#[derive(Debug, Clone, Default)]
pub struct NegotiationDriver {
    timeouts: NegotiationTimeouts,
    reject_unmatched_codec: bool,
}

impl NegotiationDriver {
    pub fn new(timeouts: NegotiationTimeouts, reject_unmatched_codec: bool) -> Self {
        Self {
            timeouts,
            reject_unmatched_codec,
        }
    }

    /// Driver configured from a session configuration snapshot
    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.timeouts, config.reject_unmatched_codec)
    }

    /// Run one negotiation
    ///
    /// Exactly one call to `exchange` happens if the offer could be built.
    /// Any failure propagates; nothing is retried here.
    #[instrument(skip_all, fields(connection_id = %pc.id()))]
    pub async fn negotiate(
        &self,
        pc: &dyn NativePeerConnection,
        exchange: &dyn SignalingExchange,
        codecs: &CodecPreferences,
    ) -> Result<()> {
        let offer = pc.create_offer().await?;
        pc.set_local_description(offer).await?;

        wait_for(
            &pc.ice_gathering_state(),
            |s| *s == IceGatheringState::Complete,
            self.timeouts.ice_gathering,
            "ICE candidate gathering",
        )
        .await?;
        debug!("ICE gathering complete");

        let mut offer = pc.local_description().await.ok_or_else(|| {
            Error::SdpError("No local description after candidate gathering".to_string())
        })?;
        self.apply_codec_preferences(&mut offer, codecs)?;

        let answer = with_timeout(
            exchange.exchange(offer),
            self.timeouts.exchange,
            "Signaling exchange",
        )
        .await?;
        debug!("Received {} from remote peer", answer.sdp_type);

        pc.set_remote_description(answer).await
    }

    fn apply_codec_preferences(
        &self,
        offer: &mut SessionDescription,
        codecs: &CodecPreferences,
    ) -> Result<()> {
        for kind in MediaKind::ALL {
            let Some(codec) = codecs.get(kind).codec() else {
                continue;
            };

            let outcome = filter_codec(&offer.sdp, kind, codec);
            if outcome.has_empty_section() {
                if self.reject_unmatched_codec {
                    return Err(Error::CodecNotOffered {
                        kind,
                        codec: codec.to_string(),
                    });
                }
                warn!(
                    "Codec {} not offered in {} section, payload list is now empty",
                    codec, kind
                );
            } else {
                debug!(
                    "Restricted {} to {} (payload types {:?})",
                    kind, codec, outcome.sections
                );
            }
            offer.sdp = outcome.sdp;
        }
        Ok(())
    }
}
