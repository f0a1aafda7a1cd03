//! USB/IP operation-phase header
//!
//! Every op-phase packet starts with the same 8-byte header:
//!
//! ```text
//! [version: u16][command: u16][status: u32]   (all big-endian)
//! ```

use crate::codec::read_record;
use crate::error::{ProtocolError, Result};
use crate::version::{USBIP_VERSION, UsbIpVersion};
use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use std::io::{Cursor, Read, Write};

/// USB/IP op-phase command codes
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    /// Request the exportable device list
    ReqDevlist = 0x8005,
    /// Device list reply
    RepDevlist = 0x0005,
    /// Request to import (attach) a device
    ReqImport = 0x8003,
    /// Import reply
    RepImport = 0x0003,
}

impl OpCode {
    pub fn from_u16(value: u16) -> Result<Self> {
        match value {
            0x8005 => Ok(Self::ReqDevlist),
            0x0005 => Ok(Self::RepDevlist),
            0x8003 => Ok(Self::ReqImport),
            0x0003 => Ok(Self::RepImport),
            _ => Err(ProtocolError::UnknownCommand(value)),
        }
    }
}

/// Common op-phase header (8 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpHeader {
    pub version: UsbIpVersion,
    pub command: u16,
    pub status: u32,
}

impl OpHeader {
    /// Size of the header in bytes
    pub const SIZE: usize = 8;

    /// Header for a client request (status is always 0)
    pub fn request(command: OpCode) -> Self {
        Self {
            version: USBIP_VERSION,
            command: command as u16,
            status: 0,
        }
    }

    /// Header for a server reply
    pub fn reply(command: OpCode, status: u32) -> Self {
        Self {
            version: USBIP_VERSION,
            command: command as u16,
            status,
        }
    }

    /// Decode a header from an exact-size buffer
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(ProtocolError::BufferTooSmall {
                needed: Self::SIZE,
                available: buf.len(),
            });
        }

        let mut cursor = Cursor::new(buf);
        let version = UsbIpVersion(cursor.read_u16::<BigEndian>()?);
        let command = cursor.read_u16::<BigEndian>()?;
        let status = cursor.read_u32::<BigEndian>()?;

        Ok(Self {
            version,
            command,
            status,
        })
    }

    /// Read header from a reader
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let buf: [u8; Self::SIZE] = read_record(reader)?;
        Self::decode(&buf)
    }

    /// Encode header to its wire form
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        BigEndian::write_u16(&mut buf[0..2], self.version.0);
        BigEndian::write_u16(&mut buf[2..4], self.command);
        BigEndian::write_u32(&mut buf[4..8], self.status);
        buf
    }

    /// Write header to a writer
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.to_bytes())?;
        Ok(())
    }

    /// Validate a reply header against the expected command
    ///
    /// A mismatched command is checked before the status: a reply to some
    /// other request says nothing about whether ours succeeded.
    pub fn expect(&self, expected: OpCode) -> Result<()> {
        if self.command != expected as u16 {
            return Err(ProtocolError::UnexpectedCommand {
                expected: expected as u16,
                actual: self.command,
            });
        }

        if self.status != 0 {
            return Err(ProtocolError::RequestFailed {
                command: self.command,
                status: self.status,
            });
        }

        Ok(())
    }

    /// Get command type
    pub fn command_type(&self) -> Result<OpCode> {
        OpCode::from_u16(self.command)
    }
}
