use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AcqError {
    #[error("Planning error: {0}")]
    Planning(String),

    #[error("Timed out after {timeout:?} waiting for buffer {buffer_index}")]
    HardwareTimeout {
        buffer_index: usize,
        timeout: Duration,
    },

    #[error("Hardware error: {0}")]
    Hardware(#[from] DeviceError),

    #[error("Configuration error: {0}")]
    Config(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("capture is not configured")]
    NotConfigured,

    #[error("capture is already running")]
    AlreadyRunning,

    #[error("DMA buffer overflow: no posted buffer available for record {record}")]
    BufferOverflow { record: usize },

    #[error("buffer {id} does not match capture geometry: {reason}")]
    InvalidBuffer { id: usize, reason: String },

    #[error("DMA engine disconnected")]
    Disconnected,

    #[error("device error: {0}")]
    Other(String),
}

/// Result type for acquisition engine operations
pub type Result<T> = std::result::Result<T, AcqError>;
