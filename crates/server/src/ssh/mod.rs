//! SSH side: the tunnel server, its per-connection handler, and the
//! reverse-forward listeners

mod forward;
mod handler;
pub mod server;

pub use server::{
    DRAIN_TIMEOUT, DYNAMIC_PORT_ATTEMPTS, DYNAMIC_PORT_START, SshServerOptions, SshTunnelServer,
    TunnelCallback,
};
