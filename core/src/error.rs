use thiserror::Error;

use crate::config::DecoderMode;

#[derive(Debug, Error)]
pub enum DecoderError {
    #[error("Unknown decoder mode id {0}")]
    UnknownMode(u32),

    #[error("Decoder mode {0:?} is not available in this build")]
    UnsupportedMode(DecoderMode),

    #[error("Decoder has not been started")]
    NotStarted,

    #[error("Back frame is leased by the consumer")]
    FrameBusy,

    #[error("Unexpected control word {0:#x}")]
    ChannelProtocol(u32),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Operation timeout")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, DecoderError>;
