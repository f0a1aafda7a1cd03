//! USB/IP wire protocol for usbip-tunnel
//!
//! This crate implements the operation phase of the USB/IP protocol: the
//! device-list and import exchanges a client performs before any URB traffic.
//! Packets are decoded from exact-size buffers, field by field, in network
//! byte order; malformed input becomes a [`ProtocolError`].
//!
//! # Example
//!
//! ```
//! use protocol::{UsbDeviceInfo, encode_devlist_reply, read_devlist_reply};
//! use std::io::Cursor;
//!
//! let device = UsbDeviceInfo {
//!     busid: "1-1".to_string(),
//!     id_vendor: 0x1234,
//!     id_product: 0x5678,
//!     ..Default::default()
//! };
//!
//! let reply = encode_devlist_reply(0, &[device]).unwrap();
//! let devices = read_devlist_reply(&mut Cursor::new(reply)).unwrap();
//! assert_eq!(devices[0].busid, "1-1");
//! ```

pub mod codec;
pub mod error;
pub mod op;
pub mod types;
pub mod version;

pub use codec::{
    DEVLIST_REPLY_HEADER_SIZE, DevlistReplyHeader, IMPORT_REQUEST_SIZE, encode_devlist_reply,
    encode_devlist_request, encode_import_reply, encode_import_request, read_devlist_reply,
    read_import_reply, read_record, write_devlist_reply,
};
pub use error::{ProtocolError, Result};
pub use op::{OpCode, OpHeader};
pub use types::{BUSID_FIELD_LEN, DeviceSpeed, UsbDeviceInfo, UsbInterfaceInfo};
pub use version::{USBIP_VERSION, UsbIpVersion};

/// Default TCP port of a USB/IP server
pub const USBIP_PORT: u16 = 3240;

/// Longest bus id that fits the wire field
pub const MAX_BUSID_LEN: usize = BUSID_FIELD_LEN - 1;
