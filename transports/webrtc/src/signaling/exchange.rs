//! Signaling exchange collaborator

use crate::sdp::SessionDescription;
use crate::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;

/// One offer/answer round trip with the remote side
///
/// Resolves exactly once with the answer, or fails. The session makes no
/// assumption about the transport underneath.
#[async_trait]
pub trait SignalingExchange: Send + Sync {
    async fn exchange(&self, offer: SessionDescription) -> Result<SessionDescription>;
}

/// [`SignalingExchange`] backed by a closure
///
/// # Example
///
/// ```
/// use futures::FutureExt;
/// use webcam_rtc::sdp::SessionDescription;
/// use webcam_rtc::signaling::FnExchange;
///
/// let exchange = FnExchange::new(|offer: SessionDescription| {
///     async move { Ok(SessionDescription::answer(offer.sdp)) }.boxed()
/// });
/// # let _ = exchange;
/// ```
pub struct FnExchange<F> {
    f: F,
}

impl<F> FnExchange<F>
where
    F: Fn(SessionDescription) -> BoxFuture<'static, Result<SessionDescription>> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> SignalingExchange for FnExchange<F>
where
    F: Fn(SessionDescription) -> BoxFuture<'static, Result<SessionDescription>> + Send + Sync,
{
    async fn exchange(&self, offer: SessionDescription) -> Result<SessionDescription> {
        (self.f)(offer).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use futures::FutureExt;

    #[tokio::test]
    async fn test_fn_exchange_forwards_result() {
        let exchange = FnExchange::new(|offer: SessionDescription| {
            async move { Ok(SessionDescription::answer(offer.sdp)) }.boxed()
        });
        let answer = exchange
            .exchange(SessionDescription::offer("v=0\r\n"))
            .await
            .unwrap();
        assert_eq!(answer, SessionDescription::answer("v=0\r\n"));

        let failing = FnExchange::new(|_offer: SessionDescription| {
            async move { Err(Error::SignalingError("rejected".to_string())) }.boxed()
        });
        assert!(failing
            .exchange(SessionDescription::offer("v=0\r\n"))
            .await
            .is_err());
    }
}
