use std::io;
use thiserror::Error;

/// The primary error type for the `pvlib` library.
#[derive(Error, Debug)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("timed out waiting for the inverter")]
    Timeout,

    #[error("framing violation: {0}")]
    Frame(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("authentication failed for device serial {serial:#010x}")]
    Auth { serial: u32 },

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("not connected")]
    NotConnected,

    #[error("invalid bluetooth address: {0}")]
    InvalidAddress(String),

    #[error("insufficient data: expected at least {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout
    }
}
