//! bus-mgr node
//!
//! Attaches to an in-process loopback bus, advertises a service (or looks for
//! one as a client) and runs until Ctrl+C or SIGTERM.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bm_core::config::{self, BusConfig};
use bm_core::ConfigError;
use bm_node::{ConnectionManager, InterruptLatch, LoopbackBus, LoopbackNetwork, SignalWaiter};

#[derive(Parser)]
#[command(name = "bm-node")]
#[command(about = "bus-mgr node - advertises or discovers a service on the bus")]
#[command(version)]
struct Args {
    /// Application name the bus connection is created with
    #[arg(long, default_value = "bm-node")]
    app_name: String,

    /// Well-known name to advertise, or to look for with --client
    #[arg(short, long, default_value = "org.example.svc")]
    service_name: String,

    /// Enable discovery of advertised names
    #[arg(short, long)]
    discovery: bool,

    /// Only connect and join the service instead of advertising it
    #[arg(long)]
    client: bool,

    /// Also attach a client that discovers and joins the advertised service
    #[arg(long, conflicts_with = "client")]
    demo_client: bool,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the effective configuration to the config path and exit
    #[arg(long)]
    write_config: bool,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.foreground { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("bus-mgr node starting...");

    let config = load_config(args.config.as_ref(), args.write_config)?;
    config.validate().context("Invalid configuration")?;

    if args.write_config {
        let path = args
            .config
            .clone()
            .unwrap_or_else(config::default_config_path);
        config::save_config(&path, &config)
            .with_context(|| format!("Failed to write config to {:?}", path))?;
        tracing::info!("Configuration written to {:?}", path);
        return Ok(());
    }

    let network = LoopbackNetwork::new();
    let mut node = ConnectionManager::create(
        &args.app_name,
        &args.service_name,
        args.discovery,
        config.clone(),
        |app, discovery| LoopbackBus::new(&network, app, discovery),
    );

    let started = if args.client {
        start_client(&mut node, &args.service_name)
    } else {
        node.start_service(&args.service_name)
            .with_context(|| format!("Failed to start service {}", args.service_name))
    };
    if let Err(e) = started {
        if let Err(teardown) = node.delete() {
            tracing::warn!("Teardown after failed start also failed: {}", teardown);
        }
        return Err(e);
    }

    let mut demo_client = None;
    if args.demo_client {
        let mut client = ConnectionManager::create(
            &format!("{}-client", args.app_name),
            &args.service_name,
            true,
            config.clone(),
            |app, discovery| LoopbackBus::new(&network, app, discovery),
        );
        start_client(&mut client, &args.service_name)?;
        demo_client = Some(client);
    }

    let waiter = SignalWaiter::new(InterruptLatch::new(), config.interrupt_poll_interval);
    tracing::info!("Running; press Ctrl+C to stop");
    waiter.wait().await;

    if let Some(mut client) = demo_client {
        if let Ok(negotiator) = client.negotiator() {
            tracing::info!(
                "Demo client joined: {} (session {:?})",
                negotiator.name_found(),
                negotiator.session_id()
            );
        }
        client.delete().context("Failed to tear down demo client")?;
    }

    node.delete()
        .context("Failed to tear down bus connection")?;

    tracing::info!("bus-mgr node shutdown complete");
    Ok(())
}

/// Load the configuration file, falling back to defaults when absent.
///
/// An explicit path must exist unless `allow_missing` is set.
fn load_config(path: Option<&PathBuf>, allow_missing: bool) -> Result<BusConfig> {
    if let Some(path) = path {
        return match config::load_config(path) {
            Err(ConfigError::NotFound(_)) if allow_missing => Ok(BusConfig::default()),
            result => result.with_context(|| format!("Failed to load config from {:?}", path)),
        };
    }

    let default_path = config::default_config_path();
    if default_path.exists() {
        Ok(config::load_config(&default_path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
            BusConfig::default()
        }))
    } else {
        tracing::info!("Using default configuration");
        Ok(BusConfig::default())
    }
}

/// Connect as a client and look for `service_name`
fn start_client(node: &mut ConnectionManager<LoopbackBus>, service_name: &str) -> Result<()> {
    node.start_client().context("Failed to start client")?;

    if !node.discovery_enabled() {
        tracing::warn!("Discovery is disabled; {} will not be found", service_name);
    }
    node.bus()?
        .find_advertised_name(service_name)
        .with_context(|| format!("FindAdvertisedName({}) failed", service_name))?;
    Ok(())
}
