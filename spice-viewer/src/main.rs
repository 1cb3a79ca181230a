//! SPICE viewer: entry point.
//!
//! ```text
//! spice-viewer                         Connect with defaults
//! spice-viewer --config <path>         Use custom config TOML
//! spice-viewer --address 10.0.0.5 --port 5930 --dump screen.bmp
//! spice-viewer --gen-config            Dump default config and exit
//! ```

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use spice_core::{Session, SpiceError};

use spice_viewer::config::ViewerConfig;
use spice_viewer::dump::FrameDump;
use spice_viewer::logging;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "spice-viewer", about = "SPICE remote display client")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "spice-viewer.toml")]
    config: PathBuf,

    /// Server IP address (overrides config).
    #[arg(short, long)]
    address: Option<String>,

    /// Server port (overrides config).
    #[arg(short, long)]
    port: Option<u16>,

    /// Append logs to this file instead of stderr.
    #[arg(long)]
    log: Option<String>,

    /// Write every finished frame to this BMP file.
    #[arg(long)]
    dump: Option<String>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&ViewerConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let (mut config, source) = ViewerConfig::load(&cli.config);
    if let Some(address) = cli.address {
        config.network.address = address;
    }
    if let Some(port) = cli.port {
        config.network.port = port;
    }
    if let Some(log) = cli.log {
        config.logging.file = log;
    }
    if let Some(dump) = cli.dump {
        config.display.dump_path = dump;
    }

    logging::init(&config.logging)?;
    info!("spice-viewer v{}", env!("CARGO_PKG_VERSION"));
    source.log(&cli.config);

    // ── 1. Main channel ─────────────────────────────────────────

    let mut session = Session::init(config.session_options())?;
    info!(endpoint = %session.endpoint(), "connecting");

    let setup = Duration::from_millis(config.network.timeout_ms);
    let main_channel = tokio::time::timeout(setup, session.channel_init_main())
        .await
        .map_err(|_| format!("main channel setup timed out after {setup:?}"))??;
    info!(session_id = main_channel.session_id(), "connected");

    // ── 2. Display and inputs ───────────────────────────────────

    let display = session.display_channel()?;
    if let Err(e) = session.channel_init_inputs().await {
        warn!("inputs channel unavailable: {e}");
    }

    let cancel = session.cancel_token();
    let main_handle = spawn_channel(main_channel.run(), cancel.clone());
    let display_handle = spawn_channel(display.run(), cancel.clone());

    // ── 3. Frame loop ───────────────────────────────────────────

    let mut dump = (!config.display.dump_path.is_empty())
        .then(|| FrameDump::new(&config.display.dump_path));
    let mut frames = session.frames();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            _ = cancel.cancelled() => {
                info!("session ended");
                break;
            }
            next = frames.changed() => match next {
                Ok(Some(frame)) => {
                    if let Some(dump) = dump.as_mut() {
                        if let Err(e) = dump.write(&frame).await {
                            warn!("frame dump failed: {e}");
                        }
                    }
                }
                Ok(None) => info!("remote surface gone"),
                Err(e) => {
                    warn!("frame stream closed: {e}");
                    break;
                }
            },
        }
    }

    // ── 4. Shutdown ─────────────────────────────────────────────

    info!("shutting down");
    session.cancel();
    for (name, handle) in [("main", main_handle), ("display", display_handle)] {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("{name} channel error: {e}"),
            Err(e) => error!("{name} channel task failed: {e}"),
        }
    }
    if let Some(dump) = &dump {
        info!(frames = dump.written(), path = %dump.path().display(), "frames dumped");
    }
    session.deinit().await;

    Ok(())
}

/// Spawn a channel task that ends the session when it returns, so the
/// frame loop stops on a channel failure as well as on server close.
fn spawn_channel<F>(task: F, cancel: CancellationToken) -> JoinHandle<Result<(), SpiceError>>
where
    F: Future<Output = Result<(), SpiceError>> + Send + 'static,
{
    tokio::spawn(async move {
        let result = task.await;
        cancel.cancel();
        result
    })
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failed_channel_ends_session() {
        let cancel = CancellationToken::new();
        let handle = spawn_channel(async { Err(SpiceError::ConnectionClosed) }, cancel.clone());

        tokio::time::timeout(Duration::from_secs(1), cancel.cancelled())
            .await
            .expect("session not cancelled");
        assert!(matches!(handle.await.unwrap(), Err(SpiceError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn clean_channel_exit_ends_session() {
        let cancel = CancellationToken::new();
        spawn_channel(async { Ok(()) }, cancel.clone()).await.unwrap().unwrap();
        assert!(cancel.is_cancelled());
    }
}
