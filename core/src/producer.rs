//! The producer context's poll loop: control, acquisition, decode, publish.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};

use crate::control::{Command, ControlServer, Response};
use crate::decoder::DecodedData;
use crate::shared_frame::FrameExchange;
use crate::supervisor::DecoderSupervisor;
use crate::MAX_RAW_SAMPLES;

/// Outcome of one non-blocking acquisition poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourcePoll {
    /// `n` samples were written to the front of the buffer
    Block(usize),
    /// Nothing ready yet
    Pending,
    /// The source has ended
    Exhausted,
}

/// Acquisition boundary: anything that can hand over blocks of raw samples
pub trait SampleSource {
    /// Fill up to `out.len()` samples without blocking
    fn poll_block(&mut self, out: &mut [i16]) -> SourcePoll;

    /// Called when the active decoder wants a different sampling rate
    fn set_sample_rate(&mut self, _sample_rate: u32) {}
}

/// What a single pass of the loop did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// No decoder active, acquisition left alone
    Idle,
    Pending,
    Processed { samples: usize, published: bool },
    Exhausted,
}

pub struct ProducerLoop<S: SampleSource> {
    supervisor: DecoderSupervisor,
    control: ControlServer,
    frames: Arc<FrameExchange>,
    source: S,
    block: [i16; MAX_RAW_SAMPLES],
    blocks_processed: u64,
}

impl<S: SampleSource> ProducerLoop<S> {
    pub fn new(supervisor: DecoderSupervisor, control: ControlServer, frames: Arc<FrameExchange>, source: S) -> Self {
        Self { supervisor, control, frames, source, block: [0; MAX_RAW_SAMPLES], blocks_processed: 0 }
    }

    pub fn supervisor(&self) -> &DecoderSupervisor {
        &self.supervisor
    }

    pub fn data(&self) -> &Arc<DecodedData> {
        self.supervisor.data()
    }

    pub fn blocks_processed(&self) -> u64 {
        self.blocks_processed
    }

    fn handle_command(&mut self, command: Command) -> Response {
        match command {
            Command::Stop => {
                self.supervisor.stop();
                Response::Ack
            }
            Command::SetConfig(config) => {
                let previous_rate = self.supervisor.sample_rate();
                match self.supervisor.apply_config(&config) {
                    Ok(()) => {
                        let rate = self.supervisor.sample_rate();
                        if rate != 0 && rate != previous_rate {
                            self.source.set_sample_rate(rate);
                        }
                        Response::Ack
                    }
                    Err(err) => {
                        warn!("Producer: config rejected: {}", err);
                        Response::Nack
                    }
                }
            }
            Command::GetDataBlockIndex => Response::DataBlock(self.frames.active_index()),
            Command::GetSamplingRate => Response::SamplingRate(self.supervisor.sample_rate()),
            Command::SetAdaptiveThreshold(enabled) => {
                self.supervisor.set_adaptive_threshold(enabled);
                Response::Ack
            }
            Command::ResetDecoder => match self.supervisor.reset() {
                Ok(()) => Response::Ack,
                Err(_) => Response::Nack,
            },
        }
    }

    /// Serve at most one command, then move at most one block through the
    /// active decoder and publish it.
    pub fn run_once(&mut self) -> Step {
        match self.control.poll() {
            Ok(Some(command)) => {
                debug!("Producer: command {:?}", command);
                let response = self.handle_command(command);
                self.control.respond(response);
            }
            Ok(None) => {}
            Err(err) => warn!("Producer: control channel: {}", err),
        }

        let block_size = self.supervisor.block_size();
        if block_size == 0 {
            return Step::Idle;
        }

        let samples = match self.source.poll_block(&mut self.block[..block_size]) {
            SourcePoll::Block(n) => n.min(block_size),
            SourcePoll::Pending => return Step::Pending,
            SourcePoll::Exhausted => return Step::Exhausted,
        };
        let block = &self.block[..samples];

        self.supervisor.process_samples(block);
        self.blocks_processed += 1;

        let display = self.supervisor.display_range();
        let published = self
            .frames
            .publish_with(|frame| {
                frame.set_raw(block);
                frame.spectrum_len = 0;
                frame.bin_width = 0.0;
                let peak = block.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0);
                frame.dominant_amp = peak as f32;
                frame.dominant_freq = 0.0;
                if let Some((low, high)) = display {
                    frame.display_min_freq = low;
                    frame.display_max_freq = high;
                }
            })
            .is_ok();

        Step::Processed { samples, published }
    }

    /// Loop until `stop` is raised or the source is exhausted
    pub fn run(&mut self, stop: &AtomicBool) -> u64 {
        while !stop.load(Ordering::Relaxed) {
            match self.run_once() {
                Step::Exhausted => {
                    info!("Producer: source exhausted after {} blocks", self.blocks_processed);
                    break;
                }
                Step::Idle | Step::Pending => std::thread::yield_now(),
                Step::Processed { .. } => {}
            }
        }
        self.blocks_processed
    }

    /// Stop the decoder and hand back the source
    pub fn into_source(mut self) -> S {
        self.supervisor.stop();
        let Self { source, .. } = self;
        source
    }
}

/// In-memory source handing out a fixed buffer, mainly for tests
pub struct BufferSource {
    samples: Vec<i16>,
    position: usize,
}

impl BufferSource {
    pub fn new(samples: Vec<i16>) -> Self {
        Self { samples, position: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.samples.len() - self.position
    }
}

impl SampleSource for BufferSource {
    fn poll_block(&mut self, out: &mut [i16]) -> SourcePoll {
        let n = out.len().min(self.remaining());
        if n == 0 {
            return SourcePoll::Exhausted;
        }
        out[..n].copy_from_slice(&self.samples[self.position..self.position + n]);
        self.position += n;
        SourcePoll::Block(n)
    }
}
