//! Webcam peer binary entry point
//!
//! Runs one session against a remote peer, speaking the comm protocol as
//! newline-delimited JSON: commands and replies for the remote side go to
//! stdout, everything the remote side sends is read from stdin. Logs go to
//! stderr.
//!
//! # Usage
//!
//! ```bash
//! # Connect with the built-in public STUN list and unbounded waits
//! cargo run --bin webcam_peer -- --id cam-1
//!
//! # Load a configuration file and bound every negotiation wait
//! cargo run --bin webcam_peer -- --config ./session.json --bounded-timeouts
//! ```

use clap::Parser;
use serde_json::Value;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use webcam_rtc::config::{NegotiationTimeouts, SessionConfig};
use webcam_rtc::signaling::{CommBridge, CommChannel};
use webcam_rtc::{SessionEvent, SessionManager};

/// Webcam session peer
///
/// Negotiates a WebRTC session over a JSON-lines comm channel on
/// stdin/stdout.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Session configuration file (JSON)
    #[arg(short, long, env = "WEBCAM_CONFIG")]
    config: Option<PathBuf>,

    /// Session model id used on the comm channel
    #[arg(long, env = "WEBCAM_SESSION_ID")]
    id: Option<String>,

    /// Bound candidate gathering, signaling exchange and settlement waits
    #[arg(long, default_value_t = false, env = "WEBCAM_BOUNDED_TIMEOUTS")]
    bounded_timeouts: bool,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info,webcam_rtc=debug", env = "WEBCAM_LOG")]
    log: String,

    /// Emit logs as JSON
    #[arg(long, default_value_t = false)]
    log_json: bool,
}

/// Comm channel writing one JSON document per stdout line
struct StdoutChannel;

impl CommChannel for StdoutChannel {
    fn send(&self, message: Value) -> webcam_rtc::Result<()> {
        let line = serde_json::to_string(&message)?;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", line)?;
        stdout.flush()?;
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = Arc::clone(&shutdown_flag);

    ctrlc::set_handler(move || {
        let was_already_set = shutdown_flag_handler.swap(true, Ordering::SeqCst);
        if was_already_set {
            eprintln!("Shutdown already in progress, forcing exit");
            std::process::exit(0);
        }
        eprintln!("Ctrl+C received, closing session...");
    })?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("webcam-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args, shutdown_flag))
}

async fn async_main(
    args: Args,
    shutdown_flag: Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing(&args.log, args.log_json)?;

    let mut config = match &args.config {
        Some(path) => SessionConfig::from_file(path)?,
        None => SessionConfig::default(),
    };
    if args.bounded_timeouts {
        config = config.with_timeouts(NegotiationTimeouts::bounded());
    }

    let id = args
        .id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    info!(
        version = env!("CARGO_PKG_VERSION"),
        session_id = %id,
        ice_servers = config.peer_config().ice_servers.len(),
        timeouts = ?config.timeouts,
        "Webcam peer starting"
    );

    let bridge = Arc::new(CommBridge::new(id, Arc::new(StdoutChannel)));
    let manager = SessionManager::builder()
        .config(config)
        .bridge(Arc::clone(&bridge))
        .build()?;

    spawn_stdin_reader(manager.clone());
    spawn_event_logger(&manager);

    // Connect in the background so that Ctrl-C still closes a stalled
    // negotiation's bridge
    let connecting = {
        let manager = manager.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.connect(None, false, false).await {
                error!("Connect failed: {}", e);
            }
        })
    };

    info!("Peer running. Press Ctrl+C to shutdown.");
    while !shutdown_flag.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }

    info!("Shutdown signal received, cleaning up...");
    bridge.shutdown();
    if let Err(e) = connecting.await {
        warn!("Connect task ended abnormally: {}", e);
    }

    match manager.close_peer().await {
        Ok(state) => info!("Session closed ({})", state),
        Err(e) => warn!("Close skipped: {}", e),
    }

    Ok(())
}

fn spawn_stdin_reader(manager: SessionManager) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    info!("Comm input closed");
                    break;
                }
                Err(e) => {
                    error!("Failed to read comm input: {}", e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let message: Value = match serde_json::from_str(&line) {
                Ok(message) => message,
                Err(e) => {
                    warn!("Dropping malformed comm line: {}", e);
                    continue;
                }
            };

            // Commands may reconnect; never block reply delivery behind them
            let manager = manager.clone();
            tokio::spawn(async move {
                if let Err(e) = manager.handle_incoming(message).await {
                    warn!("Comm message failed: {}", e);
                }
            });
        }
    });
}

fn spawn_event_logger(manager: &SessionManager) {
    let mut events = manager.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SessionEvent::StateChanged(state)) => info!(state = %state, "Session state"),
                Ok(SessionEvent::RemoteStreamAvailable(stream)) => {
                    info!(stream_id = %stream.id(), tracks = stream.tracks().len(), "Remote stream available")
                }
                Ok(SessionEvent::DeviceSynced(device)) => {
                    info!(kind = %device.kind, device_id = %device.id, "Device in use")
                }
                Ok(SessionEvent::NativeFailure {
                    connection_id,
                    state,
                }) => warn!(%connection_id, %state, "Native connection failed"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Event logger lagged by {} events", n)
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

fn init_tracing(default_filter: &str, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_filter))?;

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()?;
    }
    Ok(())
}
