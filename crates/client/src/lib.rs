//! USB/IP client library
//!
//! Enumerates and imports devices exported by a USB/IP server, usually one
//! reached through a reverse SSH tunnel. Sockets are blocking; run these
//! calls on a blocking worker when used from async code.

pub mod error;
pub mod usbip;

pub use error::{ClientError, Result};
pub use usbip::{ClientHandle, ImportedDevice, Transport, UsbIpClient, UsbIpManager, lock_client};
