//! Per-connection SSH handler
//!
//! Password authentication for the single configured account, no shell or
//! exec, and reverse port forwarding that feeds the tunnel registry.

use super::forward::ForwardListener;
use super::server::SessionContext;
use crate::registry::TunnelInfo;
use russh::server::{self as ssh_server, Auth, Msg, Session};
use russh::{Channel, ChannelId};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// State for one SSH connection
pub(crate) struct SessionHandler {
    ctx: Arc<SessionContext>,
    peer_addr: SocketAddr,
    username: Option<String>,
    /// Forward listeners keyed by the (address, port) the peer knows them by
    forwards: HashMap<(String, u32), ForwardListener>,
}

impl SessionHandler {
    pub(crate) fn new(ctx: Arc<SessionContext>, peer_addr: SocketAddr) -> Self {
        Self {
            ctx,
            peer_addr,
            username: None,
            forwards: HashMap::new(),
        }
    }

    pub(crate) fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// `username@peer`; the peer address tells apart sessions of one account
    fn client_id(&self) -> Option<String> {
        self.username
            .as_ref()
            .map(|user| format!("{}@{}", user, self.peer_addr))
    }
}

/// Address a forward listener binds for the address the peer asked for
///
/// Empty and `localhost` mean loopback; `*` means every interface.
fn listen_address(requested: &str) -> &str {
    match requested {
        "" | "localhost" => "127.0.0.1",
        "*" => "0.0.0.0",
        other => other,
    }
}

impl Drop for SessionHandler {
    fn drop(&mut self) {
        let forwards = self.forwards.len();
        self.forwards.clear();

        if let Some(client_id) = self.client_id()
            && self.ctx.registry.remove(&client_id).is_some()
        {
            info!(client = %client_id, forwards, "session ended, tunnel removed");
        }
    }
}

impl ssh_server::Handler for SessionHandler {
    type Error = russh::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        if user == self.ctx.username && password == self.ctx.password {
            self.username = Some(user.to_string());
            info!(peer = %self.peer_addr, user, "password authentication accepted");
            Ok(Auth::Accept)
        } else {
            warn!(peer = %self.peer_addr, user, "password authentication rejected");
            Ok(Auth::reject())
        }
    }

    async fn channel_open_session(
        &mut self,
        _channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }

    async fn shell_request(&mut self, channel: ChannelId, session: &mut Session) -> Result<(), Self::Error> {
        debug!(peer = %self.peer_addr, "shell request refused");
        session.channel_failure(channel)?;
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        _data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!(peer = %self.peer_addr, "exec request refused");
        session.channel_failure(channel)?;
        Ok(())
    }

    async fn tcpip_forward(
        &mut self,
        address: &str,
        port: &mut u32,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let Some(client_id) = self.client_id() else {
            return Ok(false);
        };
        info!(client = %client_id, address, port = *port, "reverse forward requested");

        let Ok(requested_port) = u16::try_from(*port) else {
            warn!(client = %client_id, port = *port, "reverse forward port out of range");
            return Ok(false);
        };

        let listener = match TcpListener::bind((listen_address(address), requested_port)).await {
            Ok(listener) => listener,
            Err(e) => {
                warn!(client = %client_id, address, port = requested_port, "reverse forward bind failed: {}", e);
                return Ok(false);
            }
        };
        let bound_port = listener.local_addr()?.port();
        *port = u32::from(bound_port);

        let forward = ForwardListener::spawn(listener, session.handle(), address.to_string(), bound_port);
        self.forwards.insert((address.to_string(), *port), forward);

        let tunnel = TunnelInfo {
            client_id: client_id.clone(),
            client_ip: self.peer_addr.ip().to_string(),
            forwarded_port: bound_port,
            remote_usbip_port: bound_port,
            active: true,
        };
        self.ctx.registry.upsert(tunnel.clone());
        info!(client = %client_id, port = bound_port, "reverse forward established");

        self.ctx.notify(&tunnel);
        Ok(true)
    }

    async fn cancel_tcpip_forward(
        &mut self,
        address: &str,
        port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let Some(forward) = self.forwards.remove(&(address.to_string(), port)) else {
            debug!(peer = %self.peer_addr, address, port, "cancel for unknown forward");
            return Ok(false);
        };
        let cancelled_port = forward.port();
        drop(forward);

        if let Some(client_id) = self.client_id() {
            let current = self.ctx.registry.get_tunnel(&client_id);
            if current.is_some_and(|t| t.forwarded_port == cancelled_port) {
                self.ctx.registry.deactivate(&client_id);
            }
            info!(client = %client_id, port = cancelled_port, "reverse forward cancelled");
        }

        Ok(true)
    }
}
