//! USB/IP device records
//!
//! Fixed-layout records exchanged in the device-list reply. Each record is
//! read into an exact-size buffer and decoded field by field; nothing is ever
//! reinterpreted in place.

use crate::error::{ProtocolError, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Cursor, Read, Write};

/// Size of the `path` field on the wire
pub const PATH_FIELD_LEN: usize = 256;

/// Size of the `busid` field on the wire (31 usable bytes + NUL)
pub const BUSID_FIELD_LEN: usize = 32;

/// USB device speed as reported by the exporting host (`enum usb_device_speed`)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeviceSpeed {
    Unknown,
    /// Low speed - 1.5 Mbps (USB 1.0)
    Low,
    /// Full speed - 12 Mbps (USB 1.1)
    Full,
    /// High speed - 480 Mbps (USB 2.0)
    High,
    /// Wireless USB
    Wireless,
    /// SuperSpeed - 5 Gbps (USB 3.0)
    Super,
    /// SuperSpeed+ - 10 Gbps (USB 3.1)
    SuperPlus,
}

impl DeviceSpeed {
    pub fn from_raw(value: u32) -> Self {
        match value {
            1 => Self::Low,
            2 => Self::Full,
            3 => Self::High,
            4 => Self::Wireless,
            5 => Self::Super,
            6 => Self::SuperPlus,
            _ => Self::Unknown,
        }
    }
}

/// Interface descriptor summary that follows each device record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbInterfaceInfo {
    pub interface_class: u8,
    pub interface_subclass: u8,
    pub interface_protocol: u8,
}

impl UsbInterfaceInfo {
    /// Size of an interface record on the wire (3 fields + 1 padding byte)
    pub const SIZE: usize = 4;

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(ProtocolError::BufferTooSmall {
                needed: Self::SIZE,
                available: buf.len(),
            });
        }

        Ok(Self {
            interface_class: buf[0],
            interface_subclass: buf[1],
            interface_protocol: buf[2],
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&[
            self.interface_class,
            self.interface_subclass,
            self.interface_protocol,
            0,
        ])?;
        Ok(())
    }
}

/// Exportable USB device as described by a USB/IP server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbDeviceInfo {
    /// Bus ID (e.g., "1-1")
    pub busid: String,
    /// Sysfs path on the exporting host
    pub path: String,
    pub busnum: u32,
    pub devnum: u32,
    /// Raw `usb_device_speed` value, see [`UsbDeviceInfo::device_speed`]
    pub speed: u32,
    pub id_vendor: u16,
    pub id_product: u16,
    pub bcd_device: u16,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    pub configuration_value: u8,
    pub num_configurations: u8,
    pub num_interfaces: u8,
    /// Interface records that followed the device record, in wire order
    pub interfaces: Vec<UsbInterfaceInfo>,
}

impl UsbDeviceInfo {
    /// Size of a device record on the wire, excluding interface records
    pub const SIZE: usize = PATH_FIELD_LEN + BUSID_FIELD_LEN + 3 * 4 + 3 * 2 + 6;

    /// Decode the fixed part of a device record
    ///
    /// `interfaces` is left empty; the caller reads `num_interfaces` interface
    /// records from the stream afterwards.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(ProtocolError::BufferTooSmall {
                needed: Self::SIZE,
                available: buf.len(),
            });
        }

        let path = decode_fixed_str(&buf[..PATH_FIELD_LEN]);
        let busid = decode_fixed_str(&buf[PATH_FIELD_LEN..PATH_FIELD_LEN + BUSID_FIELD_LEN]);

        let mut cursor = Cursor::new(&buf[PATH_FIELD_LEN + BUSID_FIELD_LEN..Self::SIZE]);
        let busnum = cursor.read_u32::<BigEndian>()?;
        let devnum = cursor.read_u32::<BigEndian>()?;
        let speed = cursor.read_u32::<BigEndian>()?;
        let id_vendor = cursor.read_u16::<BigEndian>()?;
        let id_product = cursor.read_u16::<BigEndian>()?;
        let bcd_device = cursor.read_u16::<BigEndian>()?;
        let device_class = cursor.read_u8()?;
        let device_subclass = cursor.read_u8()?;
        let device_protocol = cursor.read_u8()?;
        let configuration_value = cursor.read_u8()?;
        let num_configurations = cursor.read_u8()?;
        let num_interfaces = cursor.read_u8()?;

        Ok(Self {
            busid,
            path,
            busnum,
            devnum,
            speed,
            id_vendor,
            id_product,
            bcd_device,
            device_class,
            device_subclass,
            device_protocol,
            configuration_value,
            num_configurations,
            num_interfaces,
            interfaces: Vec::with_capacity(num_interfaces as usize),
        })
    }

    /// Write the fixed part of the record (no interface records)
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&encode_fixed_str::<PATH_FIELD_LEN>(&self.path))?;
        writer.write_all(&encode_fixed_str::<BUSID_FIELD_LEN>(&self.busid))?;
        writer.write_u32::<BigEndian>(self.busnum)?;
        writer.write_u32::<BigEndian>(self.devnum)?;
        writer.write_u32::<BigEndian>(self.speed)?;
        writer.write_u16::<BigEndian>(self.id_vendor)?;
        writer.write_u16::<BigEndian>(self.id_product)?;
        writer.write_u16::<BigEndian>(self.bcd_device)?;
        writer.write_all(&[
            self.device_class,
            self.device_subclass,
            self.device_protocol,
            self.configuration_value,
            self.num_configurations,
            self.num_interfaces,
        ])?;
        Ok(())
    }

    /// Read a device record followed by its interface records
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let buf: [u8; Self::SIZE] = crate::codec::read_record(reader)?;
        let mut device = Self::decode(&buf)?;

        // Interface records must be consumed even if unused, or the next
        // device record would be read from the middle of them.
        for _ in 0..device.num_interfaces {
            let iface: [u8; UsbInterfaceInfo::SIZE] = crate::codec::read_record(reader)?;
            device.interfaces.push(UsbInterfaceInfo::decode(&iface)?);
        }

        Ok(device)
    }

    pub fn device_speed(&self) -> DeviceSpeed {
        DeviceSpeed::from_raw(self.speed)
    }
}

impl fmt::Display for UsbDeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:04x}:{:04x}, {:?})",
            self.busid,
            self.id_vendor,
            self.id_product,
            self.device_speed()
        )
    }
}

/// Decode a NUL-padded fixed-width string field
///
/// Stops at the first NUL; a field without one uses its full width.
pub fn decode_fixed_str(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Encode a string into a NUL-padded fixed-width field
///
/// At most `N - 1` bytes are kept so the field is always NUL-terminated.
pub fn encode_fixed_str<const N: usize>(value: &str) -> [u8; N] {
    let mut field = [0u8; N];
    let bytes = value.as_bytes();
    let len = bytes.len().min(N.saturating_sub(1));
    field[..len].copy_from_slice(&bytes[..len]);
    field
}
