//! Reverse-forward listeners
//!
//! Each accepted `tcpip-forward` request owns one listener task. Every
//! inbound connection is relayed over a `forwarded-tcpip` channel opened
//! back to the SSH peer. Dropping the listener aborts its task, which in
//! turn aborts every relay it spawned.

use russh::server::Handle;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::copy_bidirectional;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// Back-off after a failed accept, so a persistent error (e.g. EMFILE)
/// does not spin
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// A running reverse-forward listener
pub(crate) struct ForwardListener {
    port: u16,
    task: JoinHandle<()>,
}

impl ForwardListener {
    pub(crate) fn spawn(listener: TcpListener, handle: Handle, address: String, port: u16) -> Self {
        let task = tokio::spawn(accept_forwarded(listener, handle, address, port));
        Self { port, task }
    }

    pub(crate) fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for ForwardListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn accept_forwarded(listener: TcpListener, handle: Handle, address: String, port: u16) {
    let mut relays = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, origin)) => {
                    debug!(port, origin = %origin, "forwarded connection accepted");
                    relays.spawn(relay(stream, origin, handle.clone(), address.clone(), port));
                }
                Err(e) => {
                    warn!(port, "accept on forwarded port failed: {}", e);
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            },
            Some(_) = relays.join_next(), if !relays.is_empty() => {}
        }
    }
}

async fn relay(
    mut stream: TcpStream,
    origin: SocketAddr,
    handle: Handle,
    address: String,
    port: u16,
) {
    let channel = match handle
        .channel_open_forwarded_tcpip(
            address,
            u32::from(port),
            origin.ip().to_string(),
            u32::from(origin.port()),
        )
        .await
    {
        Ok(channel) => channel,
        Err(e) => {
            warn!(port, origin = %origin, "peer refused forwarded-tcpip channel: {:?}", e);
            return;
        }
    };

    let mut remote = channel.into_stream();
    match copy_bidirectional(&mut stream, &mut remote).await {
        Ok((to_peer, from_peer)) => info!(
            port,
            origin = %origin,
            to_peer,
            from_peer,
            "forwarded connection closed"
        ),
        Err(e) => debug!(port, origin = %origin, "forwarded connection ended: {}", e),
    }
}
