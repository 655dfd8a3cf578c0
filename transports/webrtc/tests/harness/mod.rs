//! Session Test Harness
//!
//! Provides infrastructure for integration testing of the session engine with:
//! - A scriptable native peer connection and factory
//! - A recording signaling exchange
//! - A recording render sink and comm channel
//!
//! Basic usage pattern:
//!
//! 1. Create a `MockFactory` with a `PeerScript`
//! 2. Create a `RecordingExchange`
//! 3. Build a manager with `manager(&factory, &exchange)`
//! 4. Drive `connect` / `close_peer` and assert on the recorded calls

#![allow(dead_code)]

pub mod exchange;
pub mod mock_peer;
pub mod sink;

use std::sync::Arc;
use std::time::Duration;

use webcam_rtc::config::SessionConfig;
use webcam_rtc::media::SyntheticMediaDevices;
use webcam_rtc::SessionManager;

pub use exchange::{ExchangeMode, RecordingExchange};
pub use mock_peer::{MockFactory, MockPeerConnection, PeerScript, ANSWER_SDP, OFFER_SDP};
pub use sink::{RecordingChannel, RecordingSink};

/// Install a test subscriber once per process
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Manager over the mock factory, the synthetic devices and `exchange`
pub fn manager(factory: &Arc<MockFactory>, exchange: &Arc<RecordingExchange>) -> SessionManager {
    manager_with_config(factory, exchange, SessionConfig::default())
}

pub fn manager_with_config(
    factory: &Arc<MockFactory>,
    exchange: &Arc<RecordingExchange>,
    config: SessionConfig,
) -> SessionManager {
    SessionManager::builder()
        .id("test-session")
        .config(config)
        .factory(factory.clone())
        .devices(Arc::new(SyntheticMediaDevices::default()))
        .exchange(exchange.clone())
        .build()
        .expect("Failed to build session manager")
}

/// Let spawned tasks (native state changes, failure monitors) run
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

/// Poll `condition` until it holds or `limit` elapses
pub async fn eventually<F: Fn() -> bool>(condition: F, limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
