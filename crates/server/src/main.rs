//! usbip-tunnel host
//!
//! SSH endpoint for remote USB/IP servers. Peers connect with a reverse port
//! forward to their usbipd; the host then lists and imports their devices
//! through the tunnel.

use anyhow::{Context, Result};
use clap::Parser;
use client::UsbIpManager;
use common::setup_logging;
use server::attach::auto_attach_callback;
use server::config::ServerConfig;
use server::{SshTunnelServer, service};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "usbip-tunnel-host")]
#[command(
    author,
    version,
    about = "USB/IP tunnel host - reach remote USB devices over SSH"
)]
#[command(long_about = "
SSH server for USB/IP tunnels. Peers open a reverse port forward to their
USB/IP server; this host records the tunnel and can import the peer's
devices through it.

EXAMPLES:
    # Run with default config (port and password chosen at startup)
    usbip-tunnel-host

    # Fixed port and credentials
    usbip-tunnel-host --port 2222 --username usbip --password secret

    # Run as systemd service
    usbip-tunnel-host --service

    # On the peer exporting devices
    ssh -N -R 0:localhost:3240 -p 2222 usbip@host

CONFIGURATION:
    The host looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/usbip-tunnel/host.toml
    3. /etc/usbip-tunnel/host.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// SSH listen port (0 = first free port from 2222)
    #[arg(short, long)]
    port: Option<u16>,

    /// SSH username
    #[arg(short, long)]
    username: Option<String>,

    /// SSH password (generated when empty)
    #[arg(long)]
    password: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Run as systemd service
    #[arg(long)]
    service: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = ServerConfig::default();
        let path = ServerConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let mut config = if let Some(ref path) = args.config {
        ServerConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        ServerConfig::load_or_default()
    };

    // CLI overrides config
    if let Some(port) = args.port {
        config.ssh.port = port;
    }
    if let Some(username) = args.username {
        config.ssh.username = username;
    }
    if let Some(password) = args.password {
        config.ssh.password = password;
    }
    if let Some(level) = args.log_level {
        config.server.log_level = level;
    }
    config.validate().context("Invalid configuration")?;

    setup_logging(&config.server.log_level).context("Failed to setup logging")?;

    info!("usbip-tunnel host v{}", env!("CARGO_PKG_VERSION"));

    let service_mode = args.service || config.server.service_mode;
    if service_mode && service::is_systemd() {
        info!("Running under systemd");
    }

    run(config, service_mode).await
}

/// Own the SSH server and USB/IP manager until Ctrl+C
async fn run(config: ServerConfig, service_mode: bool) -> Result<()> {
    let manager = Arc::new(UsbIpManager::new());
    let server = SshTunnelServer::new(config.ssh_options()?);

    if config.usbip.auto_connect {
        server.set_tunnel_callback(auto_attach_callback(
            Arc::clone(&manager),
            config.usbip.auto_import.clone(),
        ));
    }

    let port = server
        .start(config.ssh.port, &config.ssh.username, &config.ssh.password)
        .await
        .context("Failed to start SSH tunnel server")?;

    if service_mode {
        service::notify_ready().context("Failed to notify systemd ready")?;
        service::notify_status(&format!("Listening on port {}", port))
            .context("Failed to send status to systemd")?;
    } else {
        println!("SSH tunnel server listening on port {}", port);
        println!("Username: {}", config.ssh.username);
        if config.ssh.password.is_empty() {
            println!("Password: {}", server.get_password());
        }
        println!(
            "On the peer: ssh -N -R 0:localhost:{} -p {} {}@<this-host>",
            config.usbip.default_port, port, config.ssh.username
        );
    }

    info!("Press Ctrl+C to shutdown");
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down gracefully..."),
        Err(e) => error!("Error waiting for Ctrl+C: {}", e),
    }

    if service_mode {
        service::notify_stopping().context("Failed to notify systemd stopping")?;
    }

    server.stop().await;

    // Client locks may be held by an attach still running on a blocking worker
    let disconnect = tokio::task::spawn_blocking(move || {
        let imported = manager.get_all_imported_devices();
        if !imported.is_empty() {
            info!("Releasing {} imported device(s)", imported.len());
        }
        manager.disconnect_all();
    });
    if let Err(e) = disconnect.await {
        error!("USB/IP disconnect failed: {}", e);
    }

    info!("Shutdown complete");
    Ok(())
}
