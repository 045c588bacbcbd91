use std::fmt;
use std::str::FromStr;

use crate::error::{DecoderError, Result};
use crate::MAX_RAW_SAMPLES;

/// Default CW audio bandwidth (Hz); the CW sampling rate is derived from it
pub const CW_DEFAULT_BANDWIDTH: u32 = 1500;

/// Default CW block size handed to the decoder per acquisition cycle
pub const CW_DEFAULT_BLOCK_SIZE: usize = 128;

/// Default CW tone (Hz)
pub const CW_DEFAULT_CENTER: f32 = 800.0;

/// Default RTTY sampling rate (Hz)
pub const RTTY_DEFAULT_SAMPLE_RATE: u32 = 7500;

/// Default RTTY block size handed to the decoder per acquisition cycle
pub const RTTY_DEFAULT_BLOCK_SIZE: usize = 1024;

/// Default RTTY mark tone (Hz)
pub const RTTY_DEFAULT_MARK: f32 = 2125.0;

/// Default RTTY shift (Hz)
pub const RTTY_DEFAULT_SHIFT: f32 = 170.0;

/// Default RTTY baud rate
pub const RTTY_DEFAULT_BAUD: f32 = 45.45;

const MIN_SAMPLE_RATE: u32 = 1000;
const MAX_SAMPLE_RATE: u32 = 48_000;
// Oversampling applied to the audio bandwidth: Nyquist (x2) plus 25% margin
const BANDWIDTH_OVERSAMPLE: f32 = 2.5;

/// Decoder selector; discriminants are the control-channel identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DecoderMode {
    None = 0,
    Sstv = 2,
    Cw = 3,
    Rtty = 4,
    Wefax = 5,
}

impl DecoderMode {
    pub fn id(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            DecoderMode::None => "none",
            DecoderMode::Sstv => "sstv",
            DecoderMode::Cw => "cw",
            DecoderMode::Rtty => "rtty",
            DecoderMode::Wefax => "wefax",
        }
    }
}

impl TryFrom<u32> for DecoderMode {
    type Error = DecoderError;

    fn try_from(id: u32) -> Result<Self> {
        match id {
            0 => Ok(DecoderMode::None),
            2 => Ok(DecoderMode::Sstv),
            3 => Ok(DecoderMode::Cw),
            4 => Ok(DecoderMode::Rtty),
            5 => Ok(DecoderMode::Wefax),
            other => Err(DecoderError::UnknownMode(other)),
        }
    }
}

impl FromStr for DecoderMode {
    type Err = DecoderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(DecoderMode::None),
            "sstv" => Ok(DecoderMode::Sstv),
            "cw" | "morse" => Ok(DecoderMode::Cw),
            "rtty" => Ok(DecoderMode::Rtty),
            "wefax" => Ok(DecoderMode::Wefax),
            other => Err(DecoderError::InvalidConfig(format!("unknown mode '{}'", other))),
        }
    }
}

impl fmt::Display for DecoderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Decoder configuration handed across the control channel.
///
/// Zero / `None` fields mean "use the mode default"; call [`DecoderConfig::sanitized`]
/// to obtain a configuration with every field resolved and clamped to a usable range.
/// A decoder never mutates its config: a new config always means a new decoder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecoderConfig {
    pub mode: DecoderMode,
    pub sample_rate: u32,
    pub block_size: usize,
    pub bandwidth: u32,
    pub cw_center: Option<f32>,
    pub rtty_mark: Option<f32>,
    pub rtty_shift: Option<f32>,
    pub rtty_baud: Option<f32>,
}

impl DecoderConfig {
    pub fn new(mode: DecoderMode) -> Self {
        Self {
            mode,
            sample_rate: 0,
            block_size: 0,
            bandwidth: 0,
            cw_center: None,
            rtty_mark: None,
            rtty_shift: None,
            rtty_baud: None,
        }
    }

    /// CW configuration at the given sampling rate and tone
    pub fn cw(sample_rate: u32, center: f32) -> Self {
        Self {
            sample_rate,
            cw_center: Some(center),
            ..Self::new(DecoderMode::Cw)
        }
    }

    /// RTTY configuration at the given sampling rate, mark, shift and baud rate
    pub fn rtty(sample_rate: u32, mark: f32, shift: f32, baud: f32) -> Self {
        Self {
            sample_rate,
            rtty_mark: Some(mark),
            rtty_shift: Some(shift),
            rtty_baud: Some(baud),
            ..Self::new(DecoderMode::Rtty)
        }
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_bandwidth(mut self, bandwidth: u32) -> Self {
        self.bandwidth = bandwidth;
        self
    }

    /// Resolve defaults and clamp every field into the range the decoders accept
    pub fn sanitized(&self) -> Self {
        let (default_rate, default_block) = match self.mode {
            DecoderMode::Cw => (
                (CW_DEFAULT_BANDWIDTH as f32 * BANDWIDTH_OVERSAMPLE) as u32,
                CW_DEFAULT_BLOCK_SIZE,
            ),
            DecoderMode::Rtty => (RTTY_DEFAULT_SAMPLE_RATE, RTTY_DEFAULT_BLOCK_SIZE),
            _ => (RTTY_DEFAULT_SAMPLE_RATE, MAX_RAW_SAMPLES),
        };

        let sample_rate = if self.sample_rate > 0 {
            self.sample_rate
        } else if self.bandwidth > 0 {
            (self.bandwidth as f32 * BANDWIDTH_OVERSAMPLE) as u32
        } else {
            default_rate
        }
        .clamp(MIN_SAMPLE_RATE, MAX_SAMPLE_RATE);
        let nyquist = sample_rate as f32 / 2.0;

        let block_size = if self.block_size == 0 { default_block } else { self.block_size }
            .clamp(1, MAX_RAW_SAMPLES);

        let positive = |value: Option<f32>| value.filter(|v| v.is_finite() && *v > 0.0);

        Self {
            mode: self.mode,
            sample_rate,
            block_size,
            bandwidth: if self.bandwidth > 0 { self.bandwidth } else { (nyquist / 1.25) as u32 },
            cw_center: Some(
                positive(self.cw_center)
                    .unwrap_or(CW_DEFAULT_CENTER)
                    .clamp(300.0, (nyquist - 200.0).max(300.0)),
            ),
            rtty_mark: Some(
                positive(self.rtty_mark)
                    .unwrap_or(RTTY_DEFAULT_MARK)
                    .clamp(100.0, (nyquist - 100.0).max(100.0)),
            ),
            rtty_shift: Some(positive(self.rtty_shift).unwrap_or(RTTY_DEFAULT_SHIFT).clamp(20.0, 1000.0)),
            rtty_baud: Some(positive(self.rtty_baud).unwrap_or(RTTY_DEFAULT_BAUD).clamp(20.0, 300.0)),
        }
    }

    pub fn cw_center_hz(&self) -> f32 {
        self.cw_center.unwrap_or(CW_DEFAULT_CENTER)
    }

    pub fn mark_hz(&self) -> f32 {
        self.rtty_mark.unwrap_or(RTTY_DEFAULT_MARK)
    }

    pub fn shift_hz(&self) -> f32 {
        self.rtty_shift.unwrap_or(RTTY_DEFAULT_SHIFT)
    }

    pub fn baud(&self) -> f32 {
        self.rtty_baud.unwrap_or(RTTY_DEFAULT_BAUD)
    }

    /// Space tone: below mark when the shift fits, above it otherwise
    pub fn space_hz(&self) -> f32 {
        let mark = self.mark_hz();
        let shift = self.shift_hz();
        if mark >= shift {
            mark - shift
        } else {
            mark + shift
        }
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self::new(DecoderMode::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_ids_round_trip() {
        for mode in [DecoderMode::None, DecoderMode::Sstv, DecoderMode::Cw, DecoderMode::Rtty, DecoderMode::Wefax] {
            assert_eq!(DecoderMode::try_from(mode.id()).unwrap(), mode);
        }
    }

    #[test]
    fn test_unknown_mode_id() {
        assert!(matches!(DecoderMode::try_from(1), Err(DecoderError::UnknownMode(1))));
        assert!(matches!(DecoderMode::try_from(99), Err(DecoderError::UnknownMode(99))));
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("CW".parse::<DecoderMode>().unwrap(), DecoderMode::Cw);
        assert_eq!("rtty".parse::<DecoderMode>().unwrap(), DecoderMode::Rtty);
        assert!("psk31".parse::<DecoderMode>().is_err());
    }

    #[test]
    fn test_cw_defaults_from_bandwidth() {
        let config = DecoderConfig::new(DecoderMode::Cw).sanitized();
        assert_eq!(config.sample_rate, 3750);
        assert_eq!(config.block_size, CW_DEFAULT_BLOCK_SIZE);
        assert_eq!(config.cw_center, Some(CW_DEFAULT_CENTER));
    }

    #[test]
    fn test_sample_rate_derived_from_bandwidth() {
        let config = DecoderConfig::new(DecoderMode::Cw).with_bandwidth(2000).sanitized();
        assert_eq!(config.sample_rate, 5000);
    }

    #[test]
    fn test_rtty_defaults() {
        let config = DecoderConfig::new(DecoderMode::Rtty).sanitized();
        assert_eq!(config.sample_rate, RTTY_DEFAULT_SAMPLE_RATE);
        assert_eq!(config.block_size, RTTY_DEFAULT_BLOCK_SIZE);
        assert_eq!(config.mark_hz(), RTTY_DEFAULT_MARK);
        assert_eq!(config.shift_hz(), RTTY_DEFAULT_SHIFT);
        assert!((config.baud() - 45.45).abs() < 1e-4);
        assert_eq!(config.space_hz(), 1955.0);
    }

    #[test]
    fn test_out_of_range_values_are_clamped() {
        let config = DecoderConfig::cw(100_000, 5000.0).with_block_size(10_000).sanitized();
        assert_eq!(config.sample_rate, 48_000);
        assert_eq!(config.block_size, MAX_RAW_SAMPLES);
        assert_eq!(config.cw_center, Some(5000.0));

        let config = DecoderConfig::cw(4000, 1950.0).sanitized();
        assert_eq!(config.cw_center, Some(1800.0));

        let config = DecoderConfig::rtty(8000, f32::NAN, 5000.0, 1.0).sanitized();
        assert_eq!(config.mark_hz(), RTTY_DEFAULT_MARK);
        assert_eq!(config.shift_hz(), 1000.0);
        assert_eq!(config.baud(), 20.0);
    }

    #[test]
    fn test_space_above_mark_when_shift_exceeds_mark() {
        let config = DecoderConfig::rtty(8000, 150.0, 170.0, 45.45).sanitized();
        assert_eq!(config.space_hz(), 320.0);
    }

    #[test]
    fn test_sanitized_is_idempotent() {
        let config = DecoderConfig::rtty(8000, 2125.0, 170.0, 45.45).sanitized();
        assert_eq!(config.sanitized(), config);
    }
}
