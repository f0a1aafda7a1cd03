//! Common utilities for usbip-tunnel
//!
//! Shared error type, logging setup, and the test helpers (mock USB/IP
//! server, device fixtures) used by the client and server crates.

pub mod error;
pub mod logging;
pub mod test_utils;

pub use error::{Error, Result};
pub use logging::{log_filter, setup_logging};
