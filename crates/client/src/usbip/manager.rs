//! Registry of USB/IP client sessions

use super::client::UsbIpClient;
use crate::error::Result;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::info;

/// Shared handle to a managed client
pub type ClientHandle = Arc<Mutex<UsbIpClient>>;

/// A device imported through one of the managed clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportedDevice {
    pub host: String,
    pub port: u16,
    pub busid: String,
}

/// Tracks the USB/IP clients created through it
///
/// The list lock is held only while the list itself changes. Client locks
/// are taken after it is released, never while holding it.
#[derive(Default)]
pub struct UsbIpManager {
    clients: Mutex<Vec<ClientHandle>>,
}

impl UsbIpManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a new client and start tracking it
    ///
    /// Nothing is tracked if the connection fails. Duplicate `(host, port)`
    /// pairs are not detected.
    pub fn create_client(&self, host: &str, port: u16) -> Result<ClientHandle> {
        let mut client = UsbIpClient::new();
        client.connect(host, port)?;

        let handle = Arc::new(Mutex::new(client));
        let count = {
            let mut clients = self.clients();
            clients.push(Arc::clone(&handle));
            clients.len()
        };

        info!("Tracking USB/IP client {}:{} ({} total)", host, port, count);
        Ok(handle)
    }

    /// Snapshot of the tracked clients
    pub fn get_clients(&self) -> Vec<ClientHandle> {
        self.clients().clone()
    }

    /// Disconnect and stop tracking a client
    ///
    /// Returns false if the handle was not tracked.
    pub fn remove_client(&self, handle: &ClientHandle) -> bool {
        let removed = {
            let mut clients = self.clients();
            let before = clients.len();
            clients.retain(|c| !Arc::ptr_eq(c, handle));
            clients.len() != before
        };

        if removed {
            let mut client = lock_client(handle);
            info!(
                "Removing USB/IP client {}:{}",
                client.host(),
                client.port()
            );
            client.disconnect();
        }

        removed
    }

    /// Imported devices across every connected client
    pub fn get_all_imported_devices(&self) -> Vec<ImportedDevice> {
        let mut devices = Vec::new();

        for handle in self.get_clients() {
            let client = lock_client(&handle);
            if !client.is_connected() {
                continue;
            }
            devices.extend(
                client
                    .get_imported_devices()
                    .into_iter()
                    .map(|busid| ImportedDevice {
                        host: client.host().to_string(),
                        port: client.port(),
                        busid,
                    }),
            );
        }

        devices
    }

    /// Disconnect and drop every tracked client
    pub fn disconnect_all(&self) {
        let clients = std::mem::take(&mut *self.clients());
        for handle in &clients {
            lock_client(handle).disconnect();
        }
        if !clients.is_empty() {
            info!("Disconnected {} USB/IP client(s)", clients.len());
        }
    }

    pub fn len(&self) -> usize {
        self.clients().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clients(&self) -> MutexGuard<'_, Vec<ClientHandle>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Lock a client, recovering from a panic on another thread
pub fn lock_client(handle: &ClientHandle) -> MutexGuard<'_, UsbIpClient> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}
