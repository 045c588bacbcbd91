//! RTTY (ITA2 / Baudot FSK) decoder.
//!
//! Audio is processed in 64-sample blocks. Each tone is measured with three
//! Goertzel bins 35 Hz apart; per-tone level trackers clip the peaks into
//! `[noise floor, envelope]` and the log ratio of mark to space decides the
//! block. A software PLL advancing once per block recovers the bit clock and
//! a start/data/stop state machine assembles 5-bit codes.

use std::f32::consts::PI;
use std::sync::Arc;

use log::{debug, info, trace};

use crate::agc::ToneLevelTracker;
use crate::baudot::BaudotDecoder;
use crate::config::{DecoderConfig, DecoderMode};
use crate::decoder::{AudioDecoder, DecodedData};
use crate::error::{DecoderError, Result};
use crate::filter::{hann_window, Biquad};
use crate::goertzel::{GoertzelDetector, MagnitudeMode};

/// Samples per tone decision
pub const TONE_BLOCK: usize = 64;
const BINS_PER_TONE: usize = 3;
const BIN_SPACING_HZ: f32 = 35.0;
/// Blocks whose stronger raw peak stays below this are treated as no signal
const MIN_DOMINANT_MAG: f32 = 2.0;

const PLL_BANDWIDTH: f32 = 0.01;
const PLL_DAMPING: f32 = 0.707;
const PLL_WARMUP_BITS: u32 = 5;
const PLL_LOCK_CORRECTIONS: u32 = 10;
const PLL_FREQ_TOLERANCE: f32 = 0.02;

const AFC_DEADBAND_HZ: f32 = 5.0;
const AFC_GAIN: f32 = 0.25;
const AFC_MAX_STEP_HZ: f32 = 5.0;
const AFC_RANGE_HZ: f32 = 50.0;
/// Blocks with a weaker mark/space decision do not feed the AFC
const AFC_MIN_CONFIDENCE: f32 = 0.3;

/// Band-pass width around each tone: the shift plus margin, at least this wide
const MIN_BANDPASS_HZ: f32 = 200.0;
const BANDPASS_SHIFT_FACTOR: f32 = 1.2;

const LOSS_OF_SIGNAL_MS: f32 = 2_000.0;
const DISPLAY_MARGIN_HZ: f32 = 250.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitState {
    Idle,
    StartBit,
    DataBits,
    StopBit,
}

/// Three detectors spaced around one tone
#[derive(Debug, Clone, Copy)]
struct ToneBins {
    detectors: [GoertzelDetector; BINS_PER_TONE],
}

impl ToneBins {
    fn new(center: f32, sample_rate: f32) -> Self {
        let half = (BINS_PER_TONE / 2) as f32;
        Self {
            detectors: std::array::from_fn(|i| {
                GoertzelDetector::new(center + (i as f32 - half) * BIN_SPACING_HZ, sample_rate)
            }),
        }
    }

    fn magnitudes<S: Copy + Into<f32>>(&self, block: &[S]) -> [f32; BINS_PER_TONE] {
        std::array::from_fn(|i| self.detectors[i].magnitude(block, MagnitudeMode::Exact))
    }
}

fn peak_and_noise(mags: &[f32; BINS_PER_TONE]) -> (f32, f32) {
    let peak = mags.iter().copied().fold(0.0f32, f32::max);
    let sum: f32 = mags.iter().sum();
    (peak, (sum - peak) / (BINS_PER_TONE - 1) as f32)
}

/// Frequency offset of the energy within the three bins (Hz), by parabolic
/// interpolation over the bin magnitudes
fn bin_offset_hz(mags: &[f32; BINS_PER_TONE]) -> Option<f32> {
    let [low, mid, high] = *mags;
    let curvature = low - 2.0 * mid + high;
    if curvature >= 0.0 {
        return None;
    }
    let delta = (0.5 * (low - high) / curvature).clamp(-1.0, 1.0);
    Some(delta * BIN_SPACING_HZ)
}

pub struct RttyDecoder {
    data: Arc<DecodedData>,
    running: bool,
    sample_rate: f32,
    baud: f32,
    mark_freq: f32,
    space_freq: f32,
    use_agc: bool,
    adaptive: bool,
    afc_enabled: bool,

    // Optional conditioning ahead of the bins
    window: Option<[f32; TONE_BLOCK]>,
    use_bandpass: bool,
    mark_filter: Option<Biquad>,
    space_filter: Option<Biquad>,
    mark_buf: [f32; TONE_BLOCK],
    space_buf: [f32; TONE_BLOCK],

    mark_bins: ToneBins,
    space_bins: ToneBins,
    block: [i16; TONE_BLOCK],
    block_pos: usize,
    mark_level: ToneLevelTracker,
    space_level: ToneLevelTracker,
    last_tone: Option<bool>,

    // Bit clock, in bits; the sampled block ends where phase wraps
    phase: f32,
    d_phase: f32,
    nominal_d_phase: f32,
    edge_phase: f32,
    alpha: f32,
    beta: f32,
    bits_seen: u32,
    corrections: u32,
    locked: bool,

    state: BitState,
    bits_received: u8,
    code: u8,
    baudot: BaudotDecoder,

    afc_offset: f32,
    afc_sum: f32,
    afc_count: u32,

    undetected_blocks: u32,
    los_blocks: u32,
    chars_decoded: u64,
    framing_errors: u64,
}

impl RttyDecoder {
    pub fn new(data: Arc<DecodedData>) -> Self {
        let bins = ToneBins::new(1000.0, 8000.0);
        Self {
            data,
            running: false,
            sample_rate: 0.0,
            baud: 0.0,
            mark_freq: 0.0,
            space_freq: 0.0,
            use_agc: false,
            adaptive: true,
            afc_enabled: true,
            window: None,
            use_bandpass: false,
            mark_filter: None,
            space_filter: None,
            mark_buf: [0.0; TONE_BLOCK],
            space_buf: [0.0; TONE_BLOCK],
            mark_bins: bins,
            space_bins: bins,
            block: [0; TONE_BLOCK],
            block_pos: 0,
            mark_level: ToneLevelTracker::new(),
            space_level: ToneLevelTracker::new(),
            last_tone: None,
            phase: 0.0,
            d_phase: 0.0,
            nominal_d_phase: 0.0,
            edge_phase: 0.5,
            alpha: 0.0,
            beta: 0.0,
            bits_seen: 0,
            corrections: 0,
            locked: false,
            state: BitState::Idle,
            bits_received: 0,
            code: 0,
            baudot: BaudotDecoder::new(),
            afc_offset: 0.0,
            afc_sum: 0.0,
            afc_count: 0,
            undetected_blocks: 0,
            los_blocks: 0,
            chars_decoded: 0,
            framing_errors: 0,
        }
    }

    /// Scale both tones toward a fixed level before the decision
    pub fn with_agc(mut self, enabled: bool) -> Self {
        self.use_agc = enabled;
        self
    }

    pub fn with_afc(mut self, enabled: bool) -> Self {
        self.afc_enabled = enabled;
        self
    }

    /// Hann-window each tone block before the bins
    pub fn with_window(mut self, enabled: bool) -> Self {
        self.window = enabled.then(hann_window::<TONE_BLOCK>);
        self
    }

    /// Pass mark and space through their own band-pass filters before the bins
    pub fn with_bandpass(mut self, enabled: bool) -> Self {
        self.use_bandpass = enabled;
        self
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn state(&self) -> BitState {
        self.state
    }

    /// Current AFC correction applied to both tones (Hz)
    pub fn afc_offset(&self) -> f32 {
        self.afc_offset
    }

    /// Bit rate the PLL is currently running at
    pub fn tracked_baud(&self) -> f32 {
        self.d_phase * self.sample_rate / TONE_BLOCK as f32
    }

    pub fn chars_decoded(&self) -> u64 {
        self.chars_decoded
    }

    pub fn framing_errors(&self) -> u64 {
        self.framing_errors
    }

    fn retune(&mut self) {
        self.mark_bins = ToneBins::new(self.mark_freq + self.afc_offset, self.sample_rate);
        self.space_bins = ToneBins::new(self.space_freq + self.afc_offset, self.sample_rate);
        if self.use_bandpass {
            let width = (BANDPASS_SHIFT_FACTOR * (self.mark_freq - self.space_freq).abs()).max(MIN_BANDPASS_HZ);
            self.mark_filter = Biquad::bandpass(self.sample_rate, self.mark_freq + self.afc_offset, width);
            self.space_filter = Biquad::bandpass(self.sample_rate, self.space_freq + self.afc_offset, width);
        }
        self.data
            .set_rtty_tones(self.mark_freq + self.afc_offset, self.space_freq + self.afc_offset, self.baud);
    }

    fn init_pll(&mut self) {
        // Loop constants are per bit; the frequency term is scaled to per-block units
        let omega = 2.0 * PI * PLL_BANDWIDTH;
        self.alpha = 2.0 * PLL_DAMPING * omega;
        self.beta = omega * omega;
        self.nominal_d_phase = self.baud * TONE_BLOCK as f32 / self.sample_rate;
        self.d_phase = self.nominal_d_phase;
        // A tone change shows up on average one block after the true edge.
        // Expecting it one block past mid-phase centres the sampled block on
        // the middle of the bit.
        self.edge_phase = (0.5 + self.nominal_d_phase).min(0.95);
        self.phase = 0.0;
        self.bits_seen = 0;
        self.corrections = 0;
        self.set_locked(false);
    }

    fn set_locked(&mut self, locked: bool) {
        if self.locked != locked {
            debug!("RTTY: PLL {}", if locked { "locked" } else { "unlocked" });
        }
        self.locked = locked;
        self.data.set_rtty_locked(locked);
    }

    /// Filter and window the block into the per-tone buffers
    fn condition_block(&mut self) {
        for (i, &sample) in self.block.iter().enumerate() {
            let x = f32::from(sample);
            let weight = self.window.as_ref().map_or(1.0, |w| w[i]);
            self.mark_buf[i] = self.mark_filter.as_mut().map_or(x, |f| f.process(x)) * weight;
            self.space_buf[i] = self.space_filter.as_mut().map_or(x, |f| f.process(x)) * weight;
        }
    }

    fn process_block(&mut self) {
        let conditioned = self.window.is_some() || self.mark_filter.is_some() || self.space_filter.is_some();
        let (mark_mags, space_mags) = if conditioned {
            self.condition_block();
            (self.mark_bins.magnitudes(&self.mark_buf), self.space_bins.magnitudes(&self.space_buf))
        } else {
            (self.mark_bins.magnitudes(&self.block), self.space_bins.magnitudes(&self.block))
        };
        let (mark_peak, mark_noise) = peak_and_noise(&mark_mags);
        let (space_peak, space_noise) = peak_and_noise(&space_mags);

        self.mark_level.update(mark_peak, mark_noise);
        self.space_level.update(space_peak, space_noise);

        let (mut mark, mut space) = if self.adaptive {
            let floor = self.mark_level.noise_floor().min(self.space_level.noise_floor());
            (self.mark_level.clip(mark_peak, floor), self.space_level.clip(space_peak, floor))
        } else {
            (mark_peak, space_peak)
        };
        if self.use_agc {
            mark *= self.mark_level.gain();
            space *= self.space_level.gain();
        }

        let metric = ((mark + 1.0) / (space + 1.0)).log10();
        let is_mark = metric > 0.0;

        if mark_peak.max(space_peak) < MIN_DOMINANT_MAG {
            self.undetected_blocks = self.undetected_blocks.saturating_add(1);
            if self.undetected_blocks == self.los_blocks {
                self.on_signal_lost();
            }
            return;
        }
        self.undetected_blocks = 0;

        if self.afc_enabled && metric.abs() > AFC_MIN_CONFIDENCE {
            let mags = if is_mark { &mark_mags } else { &space_mags };
            if let Some(offset) = bin_offset_hz(mags) {
                self.afc_sum += offset;
                self.afc_count += 1;
            }
        }

        self.step_pll(is_mark);
        self.last_tone = Some(is_mark);
    }

    fn step_pll(&mut self, is_mark: bool) {
        let edge = self.last_tone.is_some_and(|last| last != is_mark);

        self.phase += self.d_phase;
        let mut sample = None;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
            self.bits_seen = self.bits_seen.saturating_add(1);
            sample = Some(is_mark);
        }

        if edge {
            if self.locked && self.state == BitState::Idle && !is_mark {
                // Start bit: restart the bit clock on its leading edge
                self.phase = self.edge_phase;
                self.state = BitState::StartBit;
                return;
            }
            if self.bits_seen > PLL_WARMUP_BITS {
                let mut error = self.phase - self.edge_phase;
                if error > 0.5 {
                    error -= 1.0;
                } else if error < -0.5 {
                    error += 1.0;
                }
                self.phase -= self.alpha * error;
                self.d_phase -= self.beta * error * self.nominal_d_phase;
                self.d_phase = self.d_phase.clamp(
                    self.nominal_d_phase * (1.0 - PLL_FREQ_TOLERANCE),
                    self.nominal_d_phase * (1.0 + PLL_FREQ_TOLERANCE),
                );
                if !self.locked {
                    self.corrections += 1;
                    if self.corrections >= PLL_LOCK_CORRECTIONS {
                        self.set_locked(true);
                    }
                }
            }
        }

        if let Some(bit) = sample {
            self.process_bit(bit);
        }
    }

    fn process_bit(&mut self, is_mark: bool) {
        if !self.locked {
            return;
        }

        match self.state {
            BitState::Idle | BitState::StartBit if !is_mark => {
                self.state = BitState::DataBits;
                self.bits_received = 0;
                self.code = 0;
            }
            BitState::Idle => {}
            BitState::StartBit => self.state = BitState::Idle,
            BitState::DataBits => {
                if is_mark {
                    self.code |= 1 << self.bits_received;
                }
                self.bits_received += 1;
                if self.bits_received >= 5 {
                    self.state = BitState::StopBit;
                }
            }
            BitState::StopBit => {
                if is_mark {
                    if let Some(ch) = self.baudot.decode(self.code) {
                        self.data.emit(ch);
                    }
                    self.chars_decoded += 1;
                    self.apply_afc();
                } else {
                    self.framing_errors += 1;
                    trace!("RTTY: framing error on code {:#04x}", self.code);
                    self.clear_afc_error();
                }
                self.state = BitState::Idle;
                self.bits_received = 0;
                self.code = 0;
            }
        }
    }

    fn clear_afc_error(&mut self) {
        self.afc_sum = 0.0;
        self.afc_count = 0;
    }

    fn apply_afc(&mut self) {
        if !self.afc_enabled || self.afc_count == 0 {
            return;
        }
        let mean = self.afc_sum / self.afc_count as f32;
        self.clear_afc_error();
        if mean.abs() <= AFC_DEADBAND_HZ {
            return;
        }

        let step = (mean * AFC_GAIN).clamp(-AFC_MAX_STEP_HZ, AFC_MAX_STEP_HZ);
        let offset = (self.afc_offset + step).clamp(-AFC_RANGE_HZ, AFC_RANGE_HZ);
        if offset != self.afc_offset {
            self.afc_offset = offset;
            debug!("RTTY: AFC offset {:+.1} Hz", offset);
            self.retune();
        }
    }

    fn on_signal_lost(&mut self) {
        if self.locked || self.state != BitState::Idle {
            debug!("RTTY: signal lost");
        }
        self.init_pll();
        self.state = BitState::Idle;
        self.bits_received = 0;
        self.code = 0;
        self.last_tone = None;
        self.clear_afc_error();
    }
}

impl AudioDecoder for RttyDecoder {
    fn name(&self) -> &'static str {
        "RTTY"
    }

    fn start(&mut self, config: &DecoderConfig) -> Result<()> {
        if config.mode != DecoderMode::Rtty {
            return Err(DecoderError::InvalidConfig(format!("RTTY decoder cannot run {} config", config.mode)));
        }
        let config = config.sanitized();
        self.sample_rate = config.sample_rate as f32;
        self.baud = config.baud();
        self.mark_freq = config.mark_hz();
        self.space_freq = config.space_hz();
        self.los_blocks = ((LOSS_OF_SIGNAL_MS / 1000.0 * self.sample_rate) / TONE_BLOCK as f32).ceil() as u32;
        self.reset();
        self.running = true;
        info!(
            "RTTY decoder started: {} Hz sampling, mark {:.0} Hz, space {:.0} Hz, {:.2} baud",
            config.sample_rate, self.mark_freq, self.space_freq, self.baud
        );
        Ok(())
    }

    fn stop(&mut self) {
        if self.running {
            info!(
                "RTTY decoder stopped: {} characters, {} framing errors",
                self.chars_decoded, self.framing_errors
            );
        }
        self.running = false;
        self.reset();
        self.data.set_rtty_tones(0.0, 0.0, 0.0);
    }

    fn process_samples(&mut self, samples: &[i16]) {
        if !self.running {
            return;
        }
        for &sample in samples {
            self.block[self.block_pos] = sample;
            self.block_pos += 1;
            if self.block_pos == TONE_BLOCK {
                self.block_pos = 0;
                self.process_block();
            }
        }
    }

    fn reset(&mut self) {
        self.block = [0; TONE_BLOCK];
        self.block_pos = 0;
        self.mark_level.reset();
        self.space_level.reset();
        self.last_tone = None;
        self.state = BitState::Idle;
        self.bits_received = 0;
        self.code = 0;
        self.baudot.reset();
        self.afc_offset = 0.0;
        self.afc_sum = 0.0;
        self.afc_count = 0;
        self.undetected_blocks = 0;
        self.chars_decoded = 0;
        self.framing_errors = 0;
        if self.sample_rate > 0.0 {
            self.init_pll();
            self.retune();
        }
    }

    fn set_adaptive_threshold(&mut self, enabled: bool) {
        self.adaptive = enabled;
    }

    fn display_range(&self) -> Option<(u16, u16)> {
        if !self.running {
            return None;
        }
        let low = self.mark_freq.min(self.space_freq) + self.afc_offset - DISPLAY_MARGIN_HZ;
        let high = self.mark_freq.max(self.space_freq) + self.afc_offset + DISPLAY_MARGIN_HZ;
        Some((low.max(0.0) as u16, high.min(self.sample_rate / 2.0) as u16))
    }
}
