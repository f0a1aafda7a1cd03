//! Client error types

use protocol::ProtocolError;
use thiserror::Error;

/// Errors from USB/IP client operations
///
/// Only [`ClientError::Connect`] and [`ClientError::Resolve`] happen before a
/// session exists. Everything else leaves the connection as it was; the
/// caller decides whether to disconnect.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Not connected to a USB/IP server")]
    NotConnected,

    #[error("Already connected to a USB/IP server")]
    AlreadyConnected,

    #[error("Failed to resolve host '{host}'")]
    Resolve { host: String },

    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

pub type Result<T> = std::result::Result<T, ClientError>;
