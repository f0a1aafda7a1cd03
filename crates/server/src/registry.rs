//! Tunnel bookkeeping
//!
//! A plain data cache shared by the SSH sessions and whoever wants to know
//! which reverse forwards exist. It holds no session state; every read hands
//! out copies.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// One reverse-forwarded port negotiated by an SSH session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TunnelInfo {
    /// `username@peer`, unique per SSH session
    pub client_id: String,
    pub client_ip: String,
    /// Local port listening for the forward
    pub forwarded_port: u16,
    /// Port the peer's USB/IP server is reached through
    pub remote_usbip_port: u16,
    pub active: bool,
}

/// Tunnels keyed by client id
#[derive(Debug, Default)]
pub struct TunnelRegistry {
    tunnels: Mutex<HashMap<String, TunnelInfo>>,
}

impl TunnelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a tunnel, replacing any entry with the same client id
    ///
    /// Returns the replaced entry.
    pub fn upsert(&self, tunnel: TunnelInfo) -> Option<TunnelInfo> {
        self.tunnels().insert(tunnel.client_id.clone(), tunnel)
    }

    /// Copies of every active tunnel, ordered by client id
    pub fn get_active_tunnels(&self) -> Vec<TunnelInfo> {
        let mut active: Vec<TunnelInfo> = self
            .tunnels()
            .values()
            .filter(|t| t.active)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        active
    }

    /// Look up a tunnel, active or not
    pub fn get_tunnel(&self, client_id: &str) -> Option<TunnelInfo> {
        self.tunnels().get(client_id).cloned()
    }

    /// Mark a tunnel inactive without forgetting it
    ///
    /// Returns false if no such tunnel exists.
    pub fn deactivate(&self, client_id: &str) -> bool {
        match self.tunnels().get_mut(client_id) {
            Some(tunnel) => {
                tunnel.active = false;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, client_id: &str) -> Option<TunnelInfo> {
        self.tunnels().remove(client_id)
    }

    pub fn clear(&self) {
        self.tunnels().clear();
    }

    pub fn len(&self) -> usize {
        self.tunnels().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn tunnels(&self) -> MutexGuard<'_, HashMap<String, TunnelInfo>> {
        self.tunnels.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tunnel(client_id: &str, port: u16) -> TunnelInfo {
        TunnelInfo {
            client_id: client_id.to_string(),
            client_ip: "192.168.1.20".to_string(),
            forwarded_port: port,
            remote_usbip_port: port,
            active: true,
        }
    }

    #[test]
    fn test_upsert_replaces() {
        let registry = TunnelRegistry::new();
        assert!(registry.upsert(tunnel("usbip@a", 3240)).is_none());

        let previous = registry.upsert(tunnel("usbip@a", 3241)).unwrap();
        assert_eq!(previous.forwarded_port, 3240);
        assert_eq!(registry.get_tunnel("usbip@a").unwrap().forwarded_port, 3241);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_inactive_hidden_from_active_list() {
        let registry = TunnelRegistry::new();
        registry.upsert(tunnel("usbip@b", 4000));
        registry.upsert(tunnel("usbip@a", 4001));

        assert!(registry.deactivate("usbip@b"));
        assert!(!registry.deactivate("usbip@missing"));

        let active = registry.get_active_tunnels();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].client_id, "usbip@a");
        assert!(!registry.get_tunnel("usbip@b").unwrap().active);
    }

    #[test]
    fn test_copies_do_not_alias() {
        let registry = TunnelRegistry::new();
        registry.upsert(tunnel("usbip@a", 4000));

        let mut copy = registry.get_tunnel("usbip@a").unwrap();
        copy.active = false;
        assert!(registry.get_tunnel("usbip@a").unwrap().active);
    }

    #[test]
    fn test_remove_and_clear() {
        let registry = TunnelRegistry::new();
        registry.upsert(tunnel("usbip@a", 4000));
        registry.upsert(tunnel("usbip@b", 4001));

        assert!(registry.remove("usbip@a").is_some());
        assert!(registry.remove("usbip@a").is_none());

        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.get_active_tunnels().is_empty());
    }
}
