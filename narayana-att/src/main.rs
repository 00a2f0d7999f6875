// narayana-att node runner
// Detections in on stdin, robot commands out on stdout, one JSON object per line

use anyhow::Context;
use clap::Parser;
use narayana_att::{channels, AttentionConfig, AttentionLoop, BusMessage, Inbound, LocalBus};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "narayana-att")]
#[command(about = "Attention loop for a pan/tilt robot head", long_about = None)]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Seed for exploration sweeps
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Serialize)]
struct OutboundLine<'a> {
    channel: &'a str,
    message: &'a BusMessage,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let mut config = match &args.config {
        Some(path) => AttentionConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => AttentionConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.exploration.seed = Some(seed);
    }

    let bus = Arc::new(LocalBus::default());
    // Subscribe before the loop starts so the servo channel has a listener
    let writer = spawn_stdout_writer(&bus);

    let handle = AttentionLoop::new(config, bus.clone())?.spawn();
    info!("narayana-att ready, reading {} from stdin", channels::DETECTIONS);

    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    info!("Input closed");
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match Inbound::from_json(line) {
                    Ok(Some(message)) => handle.submit(message).await?,
                    Ok(None) => {}
                    Err(e) => warn!("Skipping malformed input line: {}", e),
                }
            }
        }
    }

    handle.shutdown().await?;
    drop(bus);

    if tokio::time::timeout(Duration::from_secs(1), writer).await.is_err() {
        warn!("Output writer did not drain in time");
    }

    info!("narayana-att stopped");
    Ok(())
}

/// Forward every outbound channel to stdout as JSON lines
fn spawn_stdout_writer(bus: &LocalBus) -> JoinHandle<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<(&'static str, BusMessage)>();

    for channel in channels::OUTBOUND {
        let mut subscription = bus.subscribe(channel);
        let tx = tx.clone();
        tokio::spawn(async move {
            loop {
                match subscription.recv().await {
                    Ok(message) => {
                        if tx.send((channel, message)).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Output for {} lagged, {} messages dropped", channel, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
    drop(tx);

    tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some((channel, message)) = rx.recv().await {
            let line = match serde_json::to_string(&OutboundLine {
                channel,
                message: &message,
            }) {
                Ok(line) => line,
                Err(e) => {
                    error!("Failed to encode {} message: {}", channel, e);
                    continue;
                }
            };
            debug!("-> {}", line);

            let written = async {
                stdout.write_all(line.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await
            };
            if let Err(e) = written.await {
                error!("Failed to write output: {}", e);
                break;
            }
        }
    })
}

/// Wait for Ctrl-C or SIGTERM
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
