//! Owns the active decoder and applies configuration changes.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::config::{DecoderConfig, DecoderMode};
use crate::cw::CwDecoder;
use crate::decoder::{AudioDecoder, DecodedData};
use crate::error::{DecoderError, Result};
use crate::rtty::RttyDecoder;

pub type BoxedDecoder = Box<dyn AudioDecoder + Send>;

/// Builds a decoder for a mode, wired to the shared output
pub type DecoderFactory = Box<dyn Fn(DecoderMode, Arc<DecodedData>) -> Result<BoxedDecoder> + Send>;

/// Decoders this crate implements. SSTV and WEFAX are recognised modes
/// without an implementation here.
pub fn default_factory(mode: DecoderMode, data: Arc<DecodedData>) -> Result<BoxedDecoder> {
    match mode {
        DecoderMode::Cw => Ok(Box::new(CwDecoder::new(data))),
        DecoderMode::Rtty => Ok(Box::new(RttyDecoder::new(data))),
        DecoderMode::None | DecoderMode::Sstv | DecoderMode::Wefax => Err(DecoderError::UnsupportedMode(mode)),
    }
}

pub struct DecoderSupervisor {
    data: Arc<DecodedData>,
    factory: DecoderFactory,
    active: Option<BoxedDecoder>,
    config: Option<DecoderConfig>,
    adaptive: bool,
}

impl DecoderSupervisor {
    pub fn new(data: Arc<DecodedData>) -> Self {
        Self::with_factory(data, Box::new(default_factory))
    }

    pub fn with_factory(data: Arc<DecodedData>, factory: DecoderFactory) -> Self {
        Self { data, factory, active: None, config: None, adaptive: true }
    }

    pub fn data(&self) -> &Arc<DecodedData> {
        &self.data
    }

    /// Sanitized config of the running decoder
    pub fn config(&self) -> Option<&DecoderConfig> {
        self.config.as_ref()
    }

    pub fn mode(&self) -> DecoderMode {
        self.config.map_or(DecoderMode::None, |c| c.mode)
    }

    pub fn active_name(&self) -> Option<&'static str> {
        self.active.as_ref().map(|d| d.name())
    }

    /// Sampling rate acquisition should run at; 0 when idle
    pub fn sample_rate(&self) -> u32 {
        self.config.map_or(0, |c| c.sample_rate)
    }

    /// Samples per block acquisition should deliver; 0 when idle
    pub fn block_size(&self) -> usize {
        self.config.map_or(0, |c| c.block_size)
    }

    /// Replace the active decoder when `config` differs from the running one.
    ///
    /// The old decoder is stopped and dropped first, then the shared text and
    /// status are cleared before the new decoder is built and started. Mode
    /// `None` only stops. On error no decoder is left running.
    pub fn apply_config(&mut self, config: &DecoderConfig) -> Result<()> {
        let config = config.sanitized();
        if config.mode == DecoderMode::None {
            self.stop();
            return Ok(());
        }
        if self.active.is_some() && self.config == Some(config) {
            debug!("Supervisor: config unchanged, keeping {}", config.mode);
            return Ok(());
        }

        self.stop();

        let mut decoder = (self.factory)(config.mode, Arc::clone(&self.data))?;
        decoder.start(&config)?;
        decoder.set_adaptive_threshold(self.adaptive);
        info!("Supervisor: {} decoder active at {} Hz", decoder.name(), config.sample_rate);
        self.active = Some(decoder);
        self.config = Some(config);
        Ok(())
    }

    /// Stop and drop the active decoder, clearing everything it published
    pub fn stop(&mut self) {
        if let Some(mut decoder) = self.active.take() {
            decoder.stop();
            debug!("Supervisor: {} decoder stopped", decoder.name());
        }
        self.config = None;
        self.data.text.clear();
        self.data.clear_status();
    }

    pub fn process_samples(&mut self, samples: &[i16]) {
        if let Some(decoder) = self.active.as_mut() {
            decoder.process_samples(samples);
        }
    }

    /// Persisted across decoder rebuilds
    pub fn set_adaptive_threshold(&mut self, enabled: bool) {
        self.adaptive = enabled;
        if let Some(decoder) = self.active.as_mut() {
            decoder.set_adaptive_threshold(enabled);
        }
    }

    pub fn adaptive_threshold(&self) -> bool {
        self.adaptive
    }

    pub fn reset(&mut self) -> Result<()> {
        match self.active.as_mut() {
            Some(decoder) => {
                decoder.reset();
                Ok(())
            }
            None => {
                warn!("Supervisor: reset requested with no active decoder");
                Err(DecoderError::NotStarted)
            }
        }
    }

    pub fn display_range(&self) -> Option<(u16, u16)> {
        self.active.as_ref().and_then(|d| d.display_range())
    }
}

impl Drop for DecoderSupervisor {
    fn drop(&mut self) {
        if let Some(mut decoder) = self.active.take() {
            decoder.stop();
        }
    }
}
