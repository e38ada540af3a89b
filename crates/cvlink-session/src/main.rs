//! CVLink headless entry point.
//!
//! Opens a programming session against the configured command station and
//! pumps session events to the log. The graphical CV editor consumes the
//! same [`Session`] handle and event channel; this binary exists so the
//! protocol stack can run, be observed, and be soak-tested without a UI.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()          -- TOML from the platform config dir
//!  └─ Session::open()        -- connects both TCP stream pairs
//!       ├─ driver task       -- state machine + transmissions
//!       ├─ feedback reader   -- status stream to decoded frames
//!       └─ event pump        -- SessionEvents to the log
//! ```

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use cvlink_session::{load_config, Session, SessionEvent, StatusChannel};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;

    // Initialise structured logging. `RUST_LOG` overrides the config file.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.session.log_level.clone())),
        )
        .init();

    info!("CVLink starting");

    let programming_addr = config.connection.command_station_addr()?;
    let feedback_addr = config.connection.feedback_addr()?;

    let (session, mut events) =
        Session::open(programming_addr, feedback_addr, config.session.options()).await?;

    // ── Event pump ────────────────────────────────────────────────────────────
    let mut pump = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::WriteQueueDrained => info!("write transmitted"),
                SessionEvent::VerifyQueueDrained => info!("verify transmitted, awaiting reply"),
                SessionEvent::Feedback { address, cv, value } => {
                    info!(%address, %cv, value, "feedback received");
                }
                SessionEvent::VerifyTimedOut { address, cv } => {
                    warn!(%address, %cv, "verify timed out");
                }
                SessionEvent::Status { channel, text } => match channel {
                    StatusChannel::General => info!(status = %text, "general"),
                    StatusChannel::Send => info!(status = %text, "send"),
                    StatusChannel::Receive => info!(status = %text, "receive"),
                },
                SessionEvent::Progress(active) => info!(active, "progress"),
            }
        }
    });

    info!("CVLink ready. Press Ctrl-C to exit.");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
    }

    info!("shutdown signal received");
    session.close();
    drop(session);

    // Give the driver a moment to surface its closing status, then stop
    // the pump; the feedback peer may never close its side.
    let _ = tokio::time::timeout(std::time::Duration::from_secs(1), &mut pump).await;
    pump.abort();

    info!("CVLink stopped");
    Ok(())
}
