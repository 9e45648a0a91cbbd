use thiserror::Error;

use crate::core::descriptors::StreamDescription;

#[derive(Error, Debug)]
pub enum BusError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Stale {0} handle")]
    StaleHandle(&'static str),

    #[error("No stream matching {0} in stream set")]
    StreamNotFound(StreamDescription),

    #[error("Frame wait timed out")]
    Timeout,

    #[error("Connection is not started")]
    NotStarted,

    #[error("No stream bin linked to connection")]
    NoBinLinked,

    #[error("No frame has been published to the linked bin")]
    NoFrameAvailable,

    #[error("Stream bin still has linked connections")]
    BinInUse,

    #[error("Connection is detached from a destroyed stream")]
    Detached,

    #[error("Frame buffer allocation of {0} bytes failed")]
    AllocationFailed(usize),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, BusError>;
