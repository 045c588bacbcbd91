//! Real-time CW and RTTY decoding engine
//!
//! Goertzel tone detection with adaptive thresholds feeds a Morse timing
//! decoder and a PLL-clocked Baudot decoder. Samples and decoded text move
//! between the acquisition and display contexts through lock-free queues and
//! a double-buffered frame exchange.

pub mod agc;
pub mod baudot;
pub mod config;
pub mod control;
pub mod cw;
pub mod decoder;
pub mod error;
pub mod filter;
pub mod goertzel;
pub mod morse;
pub mod producer;
pub mod ring_buffer;
pub mod rtty;
pub mod shared_frame;
pub mod supervisor;
pub mod synth;

pub use config::{DecoderConfig, DecoderMode};
pub use control::{control_channel, Command, ControlClient, ControlServer, Response};
pub use cw::CwDecoder;
pub use decoder::{AudioDecoder, DecodedData, DecoderStatus};
pub use error::{DecoderError, Result};
pub use producer::{BufferSource, ProducerLoop, SampleSource, SourcePoll, Step};
pub use ring_buffer::RingBuffer;
pub use rtty::RttyDecoder;
pub use shared_frame::{FrameExchange, FrameGuard, SharedFrame};
pub use supervisor::DecoderSupervisor;
pub use synth::{CwKeyer, RttyKeyer};

// Buffer sizes
pub const TEXT_BUFFER_SIZE: usize = 64; // decoded characters, 63 usable
pub const MAX_RAW_SAMPLES: usize = 1024;
pub const SPECTRUM_SIZE: usize = 512;
pub const CONTROL_FIFO_DEPTH: usize = 8; // words per direction
