use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use vnicd::config::Config;
use vnicd::control::ControlServer;
use vnicd::linux::{LinuxHost, ReactorConfig, ReactorHandle};
use vnicd::{Datapath, Manager, Registry};

/// Switch-port virtual interface daemon
#[derive(Parser)]
#[command(name = "vnicd", version)]
struct Args {
    /// JSON config file with interfaces to create at startup
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Control socket path (overrides the config file)
    #[arg(long)]
    control_socket: Option<PathBuf>,

    /// Datapath poll timeout in milliseconds (overrides the config file)
    #[arg(long)]
    poll_timeout_ms: Option<u16>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(path) = args.control_socket {
        config.control_socket = path;
    }
    if let Some(ms) = args.poll_timeout_ms {
        config.poll_timeout_ms = ms;
    }
    config.validate()?;

    info!(scheme = config.scheme.name(), "Starting vnicd");

    let registry = Arc::new(Registry::new());
    let host = Arc::new(LinuxHost::new());
    let datapath = Arc::new(Datapath::new(registry.clone(), host.clone(), config.scheme));
    let manager = Arc::new(Manager::new(registry, host, config.scheme));

    for command in config.commands() {
        let reply = manager.execute(&command);
        if !reply.ok {
            warn!(
                physical = %command.physical_interface_name,
                prefix = %command.virtual_interface_name_prefix,
                port = command.port,
                message = reply.message.as_deref().unwrap_or(""),
                "Startup interface not created"
            );
        }
    }

    let reactor = ReactorHandle::spawn(
        datapath.clone(),
        ReactorConfig {
            poll_timeout_ms: config.poll_timeout_ms,
            ..Default::default()
        },
    )
    .context("spawning datapath thread")?;

    let server = ControlServer::bind(&config.control_socket, manager.clone(), datapath)
        .with_context(|| format!("binding {}", config.control_socket.display()))?;

    let mut sigint = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;

    tokio::select! {
        _ = server.run() => {
            error!("Control server exited");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down...");
        }
    }

    manager.shutdown();
    drop(reactor);

    info!("vnicd stopped");
    Ok(())
}
