//! MouseShare node entry point.
//!
//! Loads (or creates) the settings document, wires the platform capabilities
//! into a [`Node`], and runs until Ctrl-C.
//!
//! # Platform adapters
//!
//! The capability set wired here is the headless one: the recording doubles
//! from `capabilities::mock` stand in for OS integration. A production build
//! replaces them with the per-OS adapters (Win32 low-level hooks +
//! `SendInput`, X11/XTest, CoreGraphics) behind the same traits; nothing
//! above this file changes.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mouseshare_core::Rect;
use mouseshare_node::capabilities::mock::{
    FixedScreenMetrics, MockClipboard, MockInputHook, RecordingSynthesis, StaticInterfaces,
};
use mouseshare_node::node::{Node, NodeCapabilities};
use mouseshare_node::{config, NodeEvent};

/// Share one mouse and keyboard across the machines on your desk.
#[derive(Debug, Parser)]
#[command(name = "mouseshare-node", version)]
struct Cli {
    /// Path to the settings document (defaults to the platform location).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the advertised machine name for this run.
    #[arg(long)]
    machine_name: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Structured logging; level overridden by RUST_LOG.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let path = match cli.config {
        Some(path) => path,
        None => config::settings_file_path()?,
    };
    let default_name = std::env::var("HOSTNAME").unwrap_or_else(|_| "mouseshare".to_string());
    let mut settings = config::load_or_init(&path, &default_name)?;
    if let Some(name) = cli.machine_name {
        settings.machine_name = name;
    }
    info!(
        "machine {} ({}), settings at {}",
        settings.machine_name,
        settings.machine_id,
        path.display()
    );

    let caps = NodeCapabilities {
        hook: Arc::new(MockInputHook::new()),
        synthesis: Arc::new(RecordingSynthesis::new()),
        screen: Arc::new(FixedScreenMetrics::new(Rect::new(0, 0, 1920, 1080))),
        clipboard: Arc::new(MockClipboard::new()),
        interfaces: Arc::new(StaticInterfaces::none()),
    };

    let node = Node::new(settings, caps);
    node.start().await?;
    node.connect_configured_peers().await;

    // Mirror node events into the log until shutdown.
    let mut events = node.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(NodeEvent::PeerDiscovered { id, name, addr }) => {
                    info!("discovered {name} ({id}) at {addr}");
                }
                Ok(NodeEvent::PeerLost { id }) => info!("lost {id}"),
                Ok(NodeEvent::PeerConnected { id, name }) => info!("connected: {name} ({id})"),
                Ok(NodeEvent::PeerDisconnected { id, reason }) => {
                    info!("disconnected: {id} ({reason})");
                }
                Ok(NodeEvent::ControlStateChanged { state }) => info!("control: {state}"),
                Ok(NodeEvent::ClipboardApplied { from }) => info!("clipboard applied from {from}"),
                Ok(NodeEvent::EngineError { detail }) => warn!("{detail}"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("event log lagged; {missed} events skipped");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    info!("ready; press Ctrl-C to exit");
    tokio::signal::ctrl_c().await?;
    node.shutdown().await;
    Ok(())
}
