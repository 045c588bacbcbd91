//! Decoder capability contract and the state shared with the consumer.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::config::DecoderConfig;
use crate::error::Result;
use crate::ring_buffer::RingBuffer;
use crate::TEXT_BUFFER_SIZE;

/// What every decoder the supervisor can host must provide.
///
/// `process_samples` runs on the acquisition context once per block: it must
/// be bounded, must not allocate and must not block.
pub trait AudioDecoder {
    fn name(&self) -> &'static str;

    /// Build all runtime state from `config`
    fn start(&mut self, config: &DecoderConfig) -> Result<()>;

    /// Release runtime state and clear anything published
    fn stop(&mut self);

    fn process_samples(&mut self, samples: &[i16]);

    /// Return runtime state to its initial values, keeping the config
    fn reset(&mut self);

    /// Switch between adaptive and fixed-threshold tone detection
    fn set_adaptive_threshold(&mut self, _enabled: bool) {}

    /// Suggested display range (Hz) for the consumer's spectrum view
    fn display_range(&self) -> Option<(u16, u16)> {
        None
    }
}

/// `f32` stored as bits in an `AtomicU32`
#[derive(Debug, Default)]
struct AtomicF32(AtomicU32);

impl AtomicF32 {
    fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// Output of the active decoder: decoded text plus status values.
///
/// Shared by `Arc` between the acquisition context (writer) and the
/// consumer context (reader). Zero means "no signal" for every status field.
#[derive(Default)]
pub struct DecodedData {
    pub text: RingBuffer<char, TEXT_BUFFER_SIZE>,
    cw_wpm: AtomicU32,
    cw_freq: AtomicF32,
    rtty_mark: AtomicF32,
    rtty_space: AtomicF32,
    rtty_baud: AtomicF32,
    rtty_locked: AtomicBool,
}

/// Point-in-time copy of the status fields
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DecoderStatus {
    pub cw_wpm: u32,
    pub cw_freq: f32,
    pub rtty_mark: f32,
    pub rtty_space: f32,
    pub rtty_baud: f32,
    pub rtty_locked: bool,
}

impl DecodedData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a decoded character; dropped (and counted) when the buffer is full
    pub fn emit(&self, ch: char) -> bool {
        match self.text.push(ch) {
            Ok(()) => true,
            Err(_) => {
                log::trace!("text buffer full, dropped {:?}", ch);
                false
            }
        }
    }

    pub fn set_cw_wpm(&self, wpm: u32) {
        self.cw_wpm.store(wpm, Ordering::Relaxed);
    }

    pub fn set_cw_freq(&self, freq: f32) {
        self.cw_freq.store(freq);
    }

    pub fn set_rtty_tones(&self, mark: f32, space: f32, baud: f32) {
        self.rtty_mark.store(mark);
        self.rtty_space.store(space);
        self.rtty_baud.store(baud);
    }

    pub fn set_rtty_locked(&self, locked: bool) {
        self.rtty_locked.store(locked, Ordering::Relaxed);
    }

    /// Zero every status field
    pub fn clear_status(&self) {
        self.set_cw_wpm(0);
        self.set_cw_freq(0.0);
        self.set_rtty_tones(0.0, 0.0, 0.0);
        self.set_rtty_locked(false);
    }

    pub fn status(&self) -> DecoderStatus {
        DecoderStatus {
            cw_wpm: self.cw_wpm.load(Ordering::Relaxed),
            cw_freq: self.cw_freq.load(),
            rtty_mark: self.rtty_mark.load(),
            rtty_space: self.rtty_space.load(),
            rtty_baud: self.rtty_baud.load(),
            rtty_locked: self.rtty_locked.load(Ordering::Relaxed),
        }
    }

    /// Consumer side: take everything decoded so far
    pub fn drain_text(&self) -> String {
        self.text.drain().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_and_drain() {
        let data = DecodedData::new();
        for c in "CQ DE".chars() {
            assert!(data.emit(c));
        }
        assert_eq!(data.drain_text(), "CQ DE");
        assert_eq!(data.drain_text(), "");
    }

    #[test]
    fn test_emit_drops_when_full() {
        let data = DecodedData::new();
        for _ in 0..TEXT_BUFFER_SIZE - 1 {
            assert!(data.emit('E'));
        }
        assert!(!data.emit('T'));
        assert_eq!(data.text.dropped(), 1);
        assert_eq!(data.drain_text().len(), TEXT_BUFFER_SIZE - 1);
    }

    #[test]
    fn test_status_round_trip_and_clear() {
        let data = DecodedData::new();
        data.set_cw_wpm(18);
        data.set_cw_freq(750.0);
        data.set_rtty_tones(2125.0, 1955.0, 45.45);
        data.set_rtty_locked(true);

        let status = data.status();
        assert_eq!(status.cw_wpm, 18);
        assert_eq!(status.cw_freq, 750.0);
        assert_eq!(status.rtty_space, 1955.0);
        assert!(status.rtty_locked);

        data.clear_status();
        assert_eq!(data.status(), DecoderStatus::default());
    }
}
