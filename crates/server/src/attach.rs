//! Automatic USB/IP attach through new tunnels
//!
//! usbipd serves one operation per connection: it closes after a device
//! list, and keeps the connection for the data phase after an import. So
//! listing uses a throwaway client and every import gets its own managed
//! client.

use crate::registry::TunnelInfo;
use crate::ssh::TunnelCallback;
use client::{UsbIpClient, UsbIpManager, lock_client};
use std::sync::Arc;
use tracing::{info, warn};

/// Host the forwarded ports listen on, from this side of the tunnel
const TUNNEL_HOST: &str = "127.0.0.1";

/// List devices behind `host:port` and import every bus id in `auto_import`
/// that the server exports
///
/// Imported sessions stay tracked by `manager`. Returns the imported bus ids.
pub fn attach_tunnel(
    manager: &UsbIpManager,
    host: &str,
    port: u16,
    auto_import: &[String],
) -> Vec<String> {
    let devices = {
        let mut lister = UsbIpClient::new();
        if let Err(e) = lister.connect(host, port) {
            warn!(host, port, "USB/IP server unreachable through tunnel: {}", e);
            return Vec::new();
        }
        match lister.get_device_list() {
            Ok(devices) => devices,
            Err(e) => {
                warn!(host, port, "listing devices through tunnel failed: {}", e);
                return Vec::new();
            }
        }
    };

    let mut imported = Vec::new();
    for busid in auto_import {
        if !devices.iter().any(|d| &d.busid == busid) {
            info!("{}:{} does not export {}, skipping", host, port, busid);
            continue;
        }

        let handle = match manager.create_client(host, port) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(host, port, busid = %busid, "connect for import failed: {}", e);
                continue;
            }
        };

        let result = lock_client(&handle).import_device(busid);
        match result {
            Ok(()) => imported.push(busid.clone()),
            Err(e) => {
                warn!(host, port, busid = %busid, "import through tunnel failed: {}", e);
                manager.remove_client(&handle);
            }
        }
    }

    imported
}

/// Tunnel callback that runs [`attach_tunnel`] on a blocking worker
///
/// Must be invoked from within a tokio runtime, which is where SSH sessions
/// call it.
pub fn auto_attach_callback(manager: Arc<UsbIpManager>, auto_import: Vec<String>) -> TunnelCallback {
    Arc::new(move |tunnel: &TunnelInfo| {
        let manager = Arc::clone(&manager);
        let auto_import = auto_import.clone();
        let tunnel = tunnel.clone();

        tokio::task::spawn_blocking(move || {
            info!(
                client = %tunnel.client_id,
                port = tunnel.forwarded_port,
                "attaching USB/IP devices through new tunnel"
            );
            let imported = attach_tunnel(&manager, TUNNEL_HOST, tunnel.forwarded_port, &auto_import);
            if imported.is_empty() && !auto_import.is_empty() {
                warn!(client = %tunnel.client_id, "no devices imported through tunnel");
            }
        });
    })
}
