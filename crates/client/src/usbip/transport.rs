//! Byte transport under a USB/IP session

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};

/// Bidirectional byte stream carrying one USB/IP session
///
/// Implemented for [`TcpStream`]; tests plug in in-memory streams.
pub trait Transport: Read + Write {
    /// Close both directions. Called once on disconnect.
    fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for TcpStream {
    fn shutdown(&mut self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}
