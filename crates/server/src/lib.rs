//! USB/IP tunnel host
//!
//! Runs an SSH server that peers connect to with a reverse port forward
//! (`ssh -R`) to their USB/IP server. Each forward is recorded in a
//! [`TunnelRegistry`] and reported through a callback, which can attach the
//! peer's devices with the USB/IP client.

pub mod attach;
pub mod config;
pub mod error;
pub mod host_key;
pub mod password;
pub mod registry;
pub mod service;
pub mod ssh;

pub use error::{Result, ServerError};
pub use registry::{TunnelInfo, TunnelRegistry};
pub use ssh::{SshServerOptions, SshTunnelServer, TunnelCallback};
