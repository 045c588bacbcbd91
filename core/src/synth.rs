//! Test-signal synthesis: keyed CW and continuous-phase RTTY.
//!
//! Used by the CLI `synth-*` commands and by the decoder tests.

use std::f32::consts::PI;

use crate::baudot;
use crate::morse::{self, Element};

/// Peak amplitude of generated tones
pub const DEFAULT_AMPLITUDE: f32 = 8000.0;
/// Edge ramp length for CW elements (ms)
const CW_RAMP_MS: f32 = 2.0;
/// ITA2 stop bit length, in bits
pub const RTTY_STOP_BITS: f32 = 1.5;

/// Sine-squared rise over `taper` samples, mirrored at the end
fn raised_cosine_window(len: usize, taper: usize) -> Vec<f32> {
    let taper = taper.min(len / 2);
    let mut window = vec![1.0; len];
    for i in 0..taper {
        let progress = i as f32 / taper as f32;
        let value = (PI * progress / 2.0).sin().powi(2);
        window[i] = value;
        window[len - 1 - i] = value;
    }
    window
}

fn to_i16(sample: f32) -> i16 {
    sample.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Keys a carrier with PARIS-standard timing
#[derive(Debug, Clone)]
pub struct CwKeyer {
    sample_rate: u32,
    freq: f32,
    unit_samples: usize,
    amplitude: f32,
}

impl CwKeyer {
    pub fn new(sample_rate: u32, freq: f32, wpm: f32) -> Self {
        let unit_samples = (sample_rate as f32 * 1.2 / wpm.max(1.0)).round() as usize;
        Self { sample_rate, freq, unit_samples: unit_samples.max(1), amplitude: DEFAULT_AMPLITUDE }
    }

    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude;
        self
    }

    /// Samples per dit
    pub fn unit_samples(&self) -> usize {
        self.unit_samples
    }

    pub fn silence(&self, samples: usize) -> Vec<i16> {
        vec![0; samples]
    }

    /// A keyed tone of exactly `samples` length, ramped inside its edges
    pub fn tone(&self, samples: usize) -> Vec<i16> {
        let ramp = (self.sample_rate as f32 * CW_RAMP_MS / 1000.0).round() as usize;
        let window = raised_cosine_window(samples, ramp);
        let w = 2.0 * PI * self.freq / self.sample_rate as f32;
        window
            .iter()
            .enumerate()
            .map(|(n, &gain)| to_i16(self.amplitude * gain * (w * n as f32).sin()))
            .collect()
    }

    /// Render `text`: 1-unit element gaps, 3-unit letter gaps, 7-unit word
    /// gaps. Nothing trails the final element. Unknown characters are skipped.
    pub fn render(&self, text: &str) -> Vec<i16> {
        let mut out = Vec::new();
        let mut pending_gap = 0usize;

        for word in text.split_whitespace() {
            if !out.is_empty() {
                pending_gap = 7;
            }
            for ch in word.chars() {
                let Some(elements) = morse::encode_char(ch) else {
                    continue;
                };
                if elements.is_empty() {
                    continue;
                }
                if !out.is_empty() {
                    out.extend(self.silence(pending_gap.max(3) * self.unit_samples));
                }
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        out.extend(self.silence(self.unit_samples));
                    }
                    let units = match element {
                        Element::Dit => 1,
                        Element::Dah => 3,
                    };
                    out.extend(self.tone(units * self.unit_samples));
                }
                pending_gap = 3;
            }
        }
        out
    }
}

/// Continuous-phase FSK keyer producing ITA2 characters
#[derive(Debug, Clone)]
pub struct RttyKeyer {
    sample_rate: f32,
    mark: f32,
    space: f32,
    baud: f32,
    amplitude: f32,
    phase: f32,
    /// Bit time elapsed so far, so bit edges land on the ideal clock
    bit_clock: f64,
    samples_emitted: u64,
}

impl RttyKeyer {
    /// Space sits `shift` below mark unless mark is lower than the shift
    pub fn new(sample_rate: u32, mark: f32, shift: f32, baud: f32) -> Self {
        let space = if mark >= shift { mark - shift } else { mark + shift };
        Self {
            sample_rate: sample_rate as f32,
            mark,
            space,
            baud,
            amplitude: DEFAULT_AMPLITUDE,
            phase: 0.0,
            bit_clock: 0.0,
            samples_emitted: 0,
        }
    }

    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude;
        self
    }

    fn key(&mut self, is_mark: bool, bits: f32, out: &mut Vec<i16>) {
        self.bit_clock += bits as f64;
        let end = (self.bit_clock * self.sample_rate as f64 / self.baud as f64).round() as u64;
        let freq = if is_mark { self.mark } else { self.space };
        let step = 2.0 * PI * freq / self.sample_rate;
        while self.samples_emitted < end {
            out.push(to_i16(self.amplitude * self.phase.sin()));
            self.phase = (self.phase + step) % (2.0 * PI);
            self.samples_emitted += 1;
        }
    }

    /// Steady mark for `bits` bit times
    pub fn idle(&mut self, bits: f32) -> Vec<i16> {
        let mut out = Vec::new();
        self.key(true, bits, &mut out);
        out
    }

    /// Raw bit stream, `true` = mark, one bit time each
    pub fn bits(&mut self, bits: &[bool]) -> Vec<i16> {
        let mut out = Vec::new();
        for &bit in bits {
            self.key(bit, 1.0, &mut out);
        }
        out
    }

    /// Start bit, five data bits LSB first, 1.5 stop bits
    pub fn code(&mut self, code: u8, out: &mut Vec<i16>) {
        self.key(false, 1.0, out);
        for i in 0..5 {
            self.key(code & (1 << i) != 0, 1.0, out);
        }
        self.key(true, RTTY_STOP_BITS, out);
    }

    /// Render `text` as ITA2, starting with a LTRS shift
    pub fn render(&mut self, text: &str) -> Vec<i16> {
        let mut out = Vec::new();
        for code in baudot::encode(text) {
            self.code(code, &mut out);
        }
        out
    }
}
