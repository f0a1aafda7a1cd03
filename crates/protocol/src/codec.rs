//! USB/IP op-phase packet encoding and decoding
//!
//! # Packet Layouts
//!
//! All multi-byte integers are big-endian and records are unpadded:
//!
//! ```text
//! OP_REQ_DEVLIST   [version u16][0x8005 u16][status u32 = 0]
//! OP_REP_DEVLIST   [version u16][0x0005 u16][status u32][num_devices u32]
//!                  then num_devices x ([device record: 312 bytes]
//!                                      [interface record: 4 bytes] x bNumInterfaces)
//! OP_REQ_IMPORT    [version u16][0x8003 u16][status u32 = 0][busid: 32 bytes]
//! OP_REP_IMPORT    [version u16][0x0003 u16][status u32]
//! ```
//!
//! The device record that trails a successful OP_REP_IMPORT belongs to the
//! data-transfer phase and is not decoded here.

use crate::error::{ProtocolError, Result};
use crate::op::{OpCode, OpHeader};
use crate::types::{BUSID_FIELD_LEN, UsbDeviceInfo, encode_fixed_str};
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use std::io::{ErrorKind, Read, Write};

/// Size of the OP_REP_DEVLIST header (common header + device count)
pub const DEVLIST_REPLY_HEADER_SIZE: usize = OpHeader::SIZE + 4;

/// Size of an OP_REQ_IMPORT packet
pub const IMPORT_REQUEST_SIZE: usize = OpHeader::SIZE + BUSID_FIELD_LEN;

/// Read exactly `N` bytes into a fixed-size record buffer
///
/// Unlike `read_exact`, a short stream is reported with the number of bytes
/// that did arrive. Interrupted reads are retried; EOF is not.
pub fn read_record<R: Read, const N: usize>(reader: &mut R) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    let mut filled = 0;

    while filled < N {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(ProtocolError::Truncated {
                    expected: N,
                    actual: filled,
                });
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Ok(buf)
}

/// Encode an OP_REQ_DEVLIST packet
pub fn encode_devlist_request() -> Vec<u8> {
    OpHeader::request(OpCode::ReqDevlist).to_bytes().to_vec()
}

/// Encode an OP_REQ_IMPORT packet
///
/// The bus id is truncated to 31 bytes and NUL-padded to 32.
pub fn encode_import_request(busid: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(IMPORT_REQUEST_SIZE);
    buf.extend_from_slice(&OpHeader::request(OpCode::ReqImport).to_bytes());
    buf.extend_from_slice(&encode_fixed_str::<BUSID_FIELD_LEN>(busid));
    buf
}

/// Decoded OP_REP_DEVLIST header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DevlistReplyHeader {
    pub header: OpHeader,
    pub num_devices: u32,
}

impl DevlistReplyHeader {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < DEVLIST_REPLY_HEADER_SIZE {
            return Err(ProtocolError::BufferTooSmall {
                needed: DEVLIST_REPLY_HEADER_SIZE,
                available: buf.len(),
            });
        }

        let header = OpHeader::decode(&buf[..OpHeader::SIZE])?;
        let num_devices = BigEndian::read_u32(&buf[OpHeader::SIZE..DEVLIST_REPLY_HEADER_SIZE]);

        Ok(Self {
            header,
            num_devices,
        })
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let buf: [u8; DEVLIST_REPLY_HEADER_SIZE] = read_record(reader)?;
        Self::decode(&buf)
    }
}

/// Read and validate a complete OP_REP_DEVLIST reply
///
/// Devices are returned in the order the server sent them. On success the
/// reader is positioned right after the last interface record.
pub fn read_devlist_reply<R: Read>(reader: &mut R) -> Result<Vec<UsbDeviceInfo>> {
    let reply = DevlistReplyHeader::read_from(reader)?;
    reply.header.expect(OpCode::RepDevlist)?;

    // The count comes from the peer; cap the preallocation, not the loop.
    let mut devices = Vec::with_capacity(reply.num_devices.min(256) as usize);
    for _ in 0..reply.num_devices {
        devices.push(UsbDeviceInfo::read_from(reader)?);
    }

    Ok(devices)
}

/// Read and validate an OP_REP_IMPORT header
///
/// Returns the header so callers can inspect the peer's version.
pub fn read_import_reply<R: Read>(reader: &mut R) -> Result<OpHeader> {
    let header = OpHeader::read_from(reader)?;
    header.expect(OpCode::RepImport)?;
    Ok(header)
}

/// Write an OP_REP_DEVLIST reply (server side)
///
/// Each device is followed by its `interfaces`, whose length must match
/// `num_interfaces` for a well-formed reply.
pub fn write_devlist_reply<W: Write>(
    writer: &mut W,
    status: u32,
    devices: &[UsbDeviceInfo],
) -> Result<()> {
    OpHeader::reply(OpCode::RepDevlist, status).write_to(writer)?;
    writer.write_u32::<BigEndian>(devices.len() as u32)?;

    for device in devices {
        device.write_to(writer)?;
        for iface in &device.interfaces {
            iface.write_to(writer)?;
        }
    }

    Ok(())
}

/// Encode an OP_REP_DEVLIST reply into a buffer (server side)
pub fn encode_devlist_reply(status: u32, devices: &[UsbDeviceInfo]) -> Result<Vec<u8>> {
    let mut buf =
        Vec::with_capacity(DEVLIST_REPLY_HEADER_SIZE + devices.len() * UsbDeviceInfo::SIZE);
    write_devlist_reply(&mut buf, status, devices)?;
    Ok(buf)
}

/// Encode an OP_REP_IMPORT header (server side)
pub fn encode_import_reply(status: u32) -> Vec<u8> {
    OpHeader::reply(OpCode::RepImport, status).to_bytes().to_vec()
}
