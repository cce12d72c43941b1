//! The featmill daemon.
//!
//! Listens on a loopback TCP socket and serves the command protocol, one
//! thread per connection. Non-loopback peers are rejected at accept time.

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use featmill::config::Config;
use featmill::engine::ProjectManager;
use featmill::protocol::handle_connection;

#[derive(Parser, Debug)]
#[command(name = "featmill-server", about = "The featmill feature-engineering daemon")]
struct Args {
    /// Path to a configuration file (featmill.toml by default).
    #[arg(long)]
    config: Option<String>,

    /// Overrides the configured port.
    #[arg(long)]
    port: Option<u16>,
}

fn init_logging(config: &Config) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));

    let guard = match &config.logging.file {
        Some(path) => {
            let dir = path.parent().unwrap_or(std::path::Path::new("."));
            let file = path
                .file_name()
                .context("logging.file has no file name")?;
            let appender = tracing_appender::rolling::never(dir, file);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            if config.logging.format == "json" {
                tracing_subscriber::fmt()
                    .json()
                    .with_env_filter(filter)
                    .with_writer(writer)
                    .init();
            } else {
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_writer(writer)
                    .init();
            }
            Some(guard)
        }
        None => {
            if config.logging.format == "json" {
                tracing_subscriber::fmt()
                    .json()
                    .with_env_filter(filter)
                    .with_writer(std::io::stderr)
                    .init();
            } else {
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_writer(std::io::stderr)
                    .init();
            }
            None
        }
    };
    Ok(guard)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => Config::from_file(path).context("cannot load configuration")?,
        None => Config::load().context("cannot load configuration")?,
    };
    if let Some(port) = args.port {
        config.server.port = port;
    }
    let _log_guard = init_logging(&config)?;

    rayon::ThreadPoolBuilder::new()
        .num_threads(config.resolved_num_threads())
        .build_global()
        .ok();

    std::fs::create_dir_all(&config.projects.root)
        .context("cannot create the projects root directory")?;

    let address = SocketAddr::from(([127, 0, 0, 1], config.server.port));
    let listener = TcpListener::bind(address)
        .with_context(|| format!("cannot bind {address}"))?;
    listener.set_nonblocking(true)?;
    info!(%address, "featmill daemon listening");

    let manager = Arc::new(ProjectManager::new(config));
    let (shutdown_tx, shutdown_rx) = crossbeam_channel::unbounded::<()>();

    loop {
        if shutdown_rx.try_recv().is_ok() {
            info!("shutting down");
            break;
        }
        match listener.accept() {
            Ok((mut stream, peer)) => {
                if !peer.ip().is_loopback() {
                    warn!(%peer, "rejecting non-loopback peer");
                    continue;
                }
                stream.set_nonblocking(false).ok();
                let manager = Arc::clone(&manager);
                let shutdown = shutdown_tx.clone();
                std::thread::spawn(move || {
                    handle_connection(manager, shutdown, &mut stream);
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
            }
        }
    }
    Ok(())
}
