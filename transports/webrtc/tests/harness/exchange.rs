//! Recording signaling exchange

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::mock_peer::ANSWER_SDP;
use webcam_rtc::sdp::SessionDescription;
use webcam_rtc::signaling::SignalingExchange;
use webcam_rtc::{Error, Result};

/// What the exchange does with an offer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeMode {
    /// Reply with [`ANSWER_SDP`]
    Answer,
    /// Fail the round trip
    Reject,
    /// Never reply
    Hang,
}

/// Signaling exchange that records every offer
pub struct RecordingExchange {
    mode: Mutex<ExchangeMode>,
    delay: Mutex<Option<Duration>>,
    offers: Mutex<Vec<SessionDescription>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingExchange {
    pub fn new(mode: ExchangeMode) -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(mode),
            delay: Mutex::new(None),
            offers: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn answering() -> Arc<Self> {
        Self::new(ExchangeMode::Answer)
    }

    pub fn set_mode(&self, mode: ExchangeMode) {
        *self.mode.lock() = mode;
    }

    /// Delay every reply, widening the window for overlapping negotiations
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.offers.lock().len()
    }

    pub fn offers(&self) -> Vec<SessionDescription> {
        self.offers.lock().clone()
    }

    /// Highest number of exchanges that were in flight at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SignalingExchange for RecordingExchange {
    async fn exchange(&self, offer: SessionDescription) -> Result<SessionDescription> {
        self.offers.lock().push(offer);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mode = *self.mode.lock();
        match mode {
            ExchangeMode::Answer => Ok(SessionDescription::answer(ANSWER_SDP)),
            ExchangeMode::Reject => Err(Error::SignalingError("remote rejected offer".to_string())),
            ExchangeMode::Hang => futures::future::pending().await,
        }
    }
}
