//! Netconsole daemon
//!
//! Serves this process's console over telnet: stdout/stderr and logs go to
//! the connected client, and lines the client types run as commands.

mod commands;
mod mdns;

use anyhow::{Context, Result};
use clap::Parser;
use netconsole_core::{Bridge, BridgeConfig, CommandDispatcher};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::commands::CommandRegistry;

/// Netconsole daemon - console access over telnet
#[derive(Parser, Debug)]
#[command(name = "consoled")]
#[command(author = "Netconsole Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Telnet bridge for the process console", long_about = None)]
struct Args {
    /// JSON config file; command-line flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listening address
    #[arg(short, long)]
    bind: Option<IpAddr>,

    /// Listening port
    #[arg(short, long)]
    port: Option<u16>,

    /// Output buffer capacity in bytes
    #[arg(long)]
    buffer_size: Option<usize>,

    /// Local device mirrored with console output
    #[arg(long)]
    mirror_device: Option<PathBuf>,

    /// Start with local mirroring disabled
    #[arg(long, default_value = "false")]
    no_mirror: bool,

    /// Leave stdout/stderr alone; only logs and command output are bridged
    #[arg(long, default_value = "false")]
    no_capture: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Advertise the console over mDNS
    #[arg(long, default_value = "false")]
    mdns: bool,

    /// mDNS hostname
    #[arg(long, default_value = "netconsole")]
    hostname: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = build_config(&args)?;
    let capture = config.capture_stdio;
    let port = config.port;

    let dispatcher = Arc::new(
        CommandDispatcher::new(CommandRegistry::with_builtins()).with_prompt(config.prompt.clone()),
    );

    let bridge = Bridge::initialize(config, dispatcher.clone())
        .context("Failed to initialize telnet bridge")?;

    setup_logging(&args.log_level, &bridge, capture)?;

    info!("Starting consoled v{}", env!("CARGO_PKG_VERSION"));

    bridge.start().context("Failed to start telnet task")?;

    // Dropping the daemon unpublishes the service
    let _mdns = if args.mdns {
        match mdns::advertise(&args.hostname, port) {
            Ok(daemon) => Some(daemon),
            Err(e) => {
                tracing::warn!("mDNS advertisement failed: {:#}", e);
                None
            }
        }
    } else {
        None
    };

    info!("Telnet server up and ready for connections. Type 'help' to print available commands.");
    dispatcher.print_prompt(bridge.console());

    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("Failed to setup SIGTERM handler")?;

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down...");
        }
    }

    bridge.console().flush();
    info!("Shutdown complete");
    Ok(())
}

/// Merge config file and command-line flags
fn build_config(args: &Args) -> Result<BridgeConfig> {
    let mut config = match &args.config {
        Some(path) => load_config_file(path)?,
        None => BridgeConfig::default().with_capture_stdio(true),
    };

    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(size) = args.buffer_size {
        config.buffer_capacity = size;
    }
    if let Some(device) = &args.mirror_device {
        config.mirror_device = Some(device.clone());
    }
    if args.no_mirror {
        config.mirror = false;
    }
    if args.no_capture {
        config.capture_stdio = false;
    }

    config.validate().context("Invalid bridge configuration")?;
    Ok(config)
}

fn load_config_file(path: &Path) -> Result<BridgeConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Invalid config file {}", path.display()))
}

/// Setup logging with tracing
///
/// With stdio captured, stderr already leads into the bridge. Otherwise the
/// log layer writes into the bridge directly.
fn setup_logging(level: &str, bridge: &Bridge, captured: bool) -> Result<()> {
    let log_level = level.parse::<Level>().unwrap_or(Level::INFO);

    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();

    let writer = if captured {
        BoxMakeWriter::new(std::io::stderr)
    } else {
        BoxMakeWriter::new(bridge.console().writer())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .init();

    Ok(())
}
