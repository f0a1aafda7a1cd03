//! USB/IP client side: sessions, transports, and the session registry

pub mod client;
pub mod manager;
pub mod transport;

pub use client::UsbIpClient;
pub use manager::{ClientHandle, ImportedDevice, UsbIpManager, lock_client};
pub use transport::Transport;
