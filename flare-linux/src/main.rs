// Flare Linux: reference host driving flare-core over UDP broadcast.

mod config;
mod medium;

use std::sync::Arc;

use anyhow::Context;
use flare_core::{EngineConfig, MeshEngine, SystemClock};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

// Enough for a full neighbor table.
const NEIGHBORS_JSON_MAX: usize = 1 << 16;

fn main() -> anyhow::Result<()> {
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("flare-linux {} (protocol {})", VERSION, flare_core::PROTOCOL_VERSION);
            return Ok(());
        }
    }

    let (cfg, config_problem) = config::load();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&cfg.log_level))
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    if let Some(e) = config_problem {
        warn!(error = %format!("{e:#}"), "config file ignored, using defaults");
    }

    let engine_config = EngineConfig {
        loopback: cfg.loopback,
        ..EngineConfig::default()
    };
    let engine = Arc::new(MeshEngine::with_config(
        Some(&cfg.device_id),
        engine_config,
        SystemClock,
    ));

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(async {
        let socket = Arc::new(
            medium::make_broadcast_socket(cfg.port)
                .with_context(|| format!("binding UDP port {}", cfg.port))?,
        );
        let dest = medium::broadcast_dest(&cfg.broadcast_addr, cfg.port)?;
        info!(device_id = %cfg.device_id, port = cfg.port, %dest, "flare host up");

        let (delivered_tx, mut delivered_rx) = mpsc::unbounded_channel();
        let recv = tokio::spawn(medium::recv_loop(
            engine.clone(),
            socket.clone(),
            delivered_tx.clone(),
        ));
        tokio::spawn(async move {
            while let Some(packet) = delivered_rx.recv().await {
                println!("{}", medium::format_packet(&packet));
            }
        });

        tokio::select! {
            r = stdin_loop(engine.clone(), socket, dest, delivered_tx) => r?,
            r = recv => {
                match r {
                    Ok(Err(e)) => return Err(anyhow::Error::new(e).context("receive loop")),
                    Ok(Ok(())) => {}
                    Err(e) => warn!(error = %e, "receive task ended"),
                }
            }
            r = shutdown_signal() => r?,
        }
        info!("shutting down");
        Ok::<(), anyhow::Error>(())
    });
    // A pending stdin read would otherwise hold the runtime open.
    rt.shutdown_background();
    result
}

/// Read lines from stdin: `/neighbors` prints the table, `/quit` exits, anything else is broadcast.
async fn stdin_loop(
    engine: Arc<MeshEngine>,
    socket: Arc<tokio::net::UdpSocket>,
    dest: std::net::SocketAddr,
    delivered_tx: mpsc::UnboundedSender<flare_core::DeliveredPacket>,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => {}
            "/quit" => break,
            "/neighbors" => println!("{}", engine.neighbors_json(NEIGHBORS_JSON_MAX)?),
            text => {
                if let Err(e) = medium::broadcast(&engine, &socket, dest, text).await {
                    warn!(error = %e, "broadcast failed");
                }
                // Loopback deliveries land in the queue during send.
                medium::drain(&engine, &delivered_tx);
            }
        }
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
