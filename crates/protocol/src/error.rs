//! Protocol error types

use thiserror::Error;

/// USB/IP wire protocol errors
///
/// Every variant is terminal for the operation that produced it; the
/// connection itself is left untouched so the caller decides whether to drop it.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Reply carried a different command code than the request expects
    #[error("Unexpected reply command: expected {expected:#06x}, got {actual:#06x}")]
    UnexpectedCommand { expected: u16, actual: u16 },

    /// Server rejected the request with a non-zero status
    #[error("Request {command:#06x} failed with status {status}")]
    RequestFailed { command: u16, status: u32 },

    /// Stream ended before a fixed-size record was complete
    #[error("Truncated record: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// Buffer too small for operation
    #[error("Buffer too small: needed {needed}, got {available}")]
    BufferTooSmall { needed: usize, available: usize },

    /// Command code outside the op-phase command set
    #[error("Unknown USB/IP command: {0:#06x}")]
    UnknownCommand(u16),

    /// I/O error while reading or writing a packet
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::UnexpectedCommand {
            expected: 0x0005,
            actual: 0x0003,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("0x0005"));
        assert!(msg.contains("0x0003"));
    }

    #[test]
    fn test_truncated_error() {
        let err = ProtocolError::Truncated {
            expected: 312,
            actual: 17,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Truncated"));
        assert!(msg.contains("312"));
    }
}
