//! Server error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("SSH server is already running")]
    AlreadyRunning,

    #[error("No free port in {attempts} attempts starting at {start}")]
    NoFreePort { start: u16, attempts: u16 },

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Host key error: {0}")]
    HostKey(String),

    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),
}

pub type Result<T> = std::result::Result<T, ServerError>;
