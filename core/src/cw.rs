//! CW (Morse) decoder.
//!
//! Audio is cut into 48-sample windows. Each window is scanned at seven
//! frequencies around the configured tone; the currently tracked frequency
//! drives the on/off gate and the strongest bin is a re-tuning candidate.
//! Element timing is measured in milliseconds derived from the sample count,
//! so a given input always decodes the same way.

use std::sync::Arc;

use log::{debug, info};

use crate::agc::{AdaptiveGainTracker, TrackerParams};
use crate::config::{DecoderConfig, DecoderMode};
use crate::decoder::{AudioDecoder, DecodedData};
use crate::error::{DecoderError, Result};
use crate::goertzel::{GoertzelBank, MagnitudeMode};
use crate::morse::{Element, MorseCursor, MAX_ELEMENTS};

/// Samples per Goertzel window
pub const CW_WINDOW: usize = 48;

/// Scan offsets around the configured tone (Hz)
const SCAN_OFFSETS: [f32; SCAN_STEPS] = [-150.0, -100.0, -50.0, 0.0, 50.0, 100.0, 150.0];
const SCAN_STEPS: usize = 7;
const CENTER_INDEX: usize = 3;

/// Candidate must be this far from the tracked frequency (Hz)
const RETUNE_MIN_DELTA_HZ: f32 = 70.0;
/// Candidate must be this much stronger than the tracked frequency
const RETUNE_MAG_RATIO: f32 = 1.5;
const RETUNE_CONSECUTIVE_BLOCKS: u32 = 10;
const RETUNE_OBSERVE_MS: u64 = 5_000;
/// No further re-tuning for this long after a switch
const STABLE_HOLD_MS: u64 = 180_000;
/// A block counts towards frequency tracking only above this multiple of the noise floor
const CANDIDATE_SNR: f32 = 3.0;

const START_REFERENCE_MS: u32 = 200;
const LONG_PAUSE_MS: u64 = 2_000;
const NO_TONE_TIMEOUT_MS: u64 = 60_000;
const MAX_DASH_FACTOR: u32 = 5;
const WORD_SPACE_FACTOR: f32 = 3.1;
const MIN_WORD_SPACE_MS: u32 = 80;
const MAX_WORD_SPACE_MS: u32 = 600;
const WPM_HISTORY: usize = 5;
const DISPLAY_SPAN_HZ: f32 = 500.0;

pub const DEFAULT_MIN_WPM: u32 = 5;
pub const DEFAULT_MAX_WPM: u32 = 40;

/// Gate constants for CW: the shared defaults with a stricter noise ratio
const CW_TRACKER: TrackerParams = TrackerParams {
    min_on_ratio: 4.0,
    ..TrackerParams::CW
};

/// Anti-flicker frequency tracking over the scan table
#[derive(Debug, Clone)]
struct FrequencyTracker {
    current: usize,
    candidate: Option<usize>,
    consecutive: u32,
    since_ms: u64,
    last_switch_ms: Option<u64>,
}

impl FrequencyTracker {
    fn new() -> Self {
        Self {
            current: CENTER_INDEX,
            candidate: None,
            consecutive: 0,
            since_ms: 0,
            last_switch_ms: None,
        }
    }

    /// A block without signal ends the candidate's continuous observation
    fn forget_candidate(&mut self) {
        self.candidate = None;
        self.consecutive = 0;
    }

    /// Returns the new index when the tracked frequency switches
    fn observe(&mut self, freqs: &[f32], mags: &[f32], best: usize, now_ms: u64) -> Option<usize> {
        if best == self.current {
            self.candidate = None;
            self.consecutive = 0;
            return None;
        }
        if self.candidate == Some(best) {
            self.consecutive += 1;
        } else {
            self.candidate = Some(best);
            self.consecutive = 1;
            self.since_ms = now_ms;
        }

        let patient = self.consecutive >= RETUNE_CONSECUTIVE_BLOCKS
            || now_ms.saturating_sub(self.since_ms) >= RETUNE_OBSERVE_MS;
        let stronger = mags[best] >= RETUNE_MAG_RATIO * mags[self.current];
        let far = (freqs[best] - freqs[self.current]).abs() > RETUNE_MIN_DELTA_HZ;
        let held = self
            .last_switch_ms
            .is_some_and(|t| now_ms.saturating_sub(t) < STABLE_HOLD_MS);

        if patient && stronger && far && !held {
            self.current = best;
            self.candidate = None;
            self.consecutive = 0;
            self.last_switch_ms = Some(now_ms);
            Some(best)
        } else {
            None
        }
    }
}

pub struct CwDecoder {
    data: Arc<DecodedData>,
    running: bool,
    sample_rate: u32,
    center: f32,
    freqs: [f32; SCAN_STEPS],
    bank: GoertzelBank,
    magnitude_mode: MagnitudeMode,
    min_wpm: u32,
    max_wpm: u32,

    window: [i16; CW_WINDOW],
    window_pos: usize,
    samples_seen: u64,
    mags: [f32; SCAN_STEPS],
    gate: AdaptiveGainTracker,
    tracking: FrequencyTracker,
    freq_counts: [u16; SCAN_STEPS],

    // Element timing
    started: bool,
    measuring: bool,
    leading_ms: u64,
    trailing_ms: Option<u64>,
    letter_start_ms: u64,
    letter_end_ms: u64,
    durations: [u32; MAX_ELEMENTS],
    element_count: usize,
    last_element: u32,
    two_dots: Option<f32>,
    tone_min: u32,
    tone_max: u32,
    reference: u32,
    last_decode_ok: bool,

    wpm_history: [u32; WPM_HISTORY],
    wpm_index: usize,
    wpm: u32,
    published_freq: f32,
    last_tone_ms: u64,
    signal_lost: bool,
}

impl CwDecoder {
    pub fn new(data: Arc<DecodedData>) -> Self {
        Self {
            data,
            running: false,
            sample_rate: 0,
            center: 0.0,
            freqs: [0.0; SCAN_STEPS],
            bank: GoertzelBank::new(&[], 1.0),
            magnitude_mode: MagnitudeMode::Exact,
            min_wpm: DEFAULT_MIN_WPM,
            max_wpm: DEFAULT_MAX_WPM,
            window: [0; CW_WINDOW],
            window_pos: 0,
            samples_seen: 0,
            mags: [0.0; SCAN_STEPS],
            gate: AdaptiveGainTracker::new(CW_TRACKER),
            tracking: FrequencyTracker::new(),
            freq_counts: [0; SCAN_STEPS],
            started: false,
            measuring: false,
            leading_ms: 0,
            trailing_ms: None,
            letter_start_ms: 0,
            letter_end_ms: 0,
            durations: [0; MAX_ELEMENTS],
            element_count: 0,
            last_element: 0,
            two_dots: None,
            tone_min: u32::MAX,
            tone_max: 0,
            reference: START_REFERENCE_MS,
            last_decode_ok: false,
            wpm_history: [0; WPM_HISTORY],
            wpm_index: 0,
            wpm: 0,
            published_freq: 0.0,
            last_tone_ms: 0,
            signal_lost: false,
        }
    }

    /// Use the sqrt-free magnitude estimate
    pub fn with_magnitude_mode(mut self, mode: MagnitudeMode) -> Self {
        self.magnitude_mode = mode;
        self
    }

    pub fn with_wpm_bounds(mut self, min_wpm: u32, max_wpm: u32) -> Self {
        self.min_wpm = min_wpm.max(1);
        self.max_wpm = max_wpm.max(self.min_wpm);
        self
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Frequency the gate currently listens on (Hz)
    pub fn tracked_freq(&self) -> f32 {
        self.freqs[self.tracking.current]
    }

    /// Median WPM of the recent characters, 0 when unknown
    pub fn wpm(&self) -> u32 {
        self.wpm
    }

    /// Dit/dah discriminator (ms)
    pub fn reference_ms(&self) -> u32 {
        self.reference
    }

    fn now_ms(&self) -> u64 {
        self.samples_seen * 1000 / self.sample_rate.max(1) as u64
    }

    fn noise_spike_ms(&self) -> u32 {
        (self.reference / 4).min(1200 / self.max_wpm)
    }

    fn word_space_ms(&self) -> u32 {
        ((self.reference as f32 * WORD_SPACE_FACTOR) as u32).clamp(MIN_WORD_SPACE_MS, MAX_WORD_SPACE_MS)
    }

    fn process_window(&mut self) {
        self.bank.magnitudes(&self.window, self.magnitude_mode, &mut self.mags);
        let now = self.now_ms();

        let current_mag = self.mags[self.tracking.current];
        let tone = self.gate.update(current_mag);

        let (best, best_mag) = self
            .mags
            .iter()
            .copied()
            .enumerate()
            .fold((self.tracking.current, f32::MIN), |acc, (i, m)| if m > acc.1 { (i, m) } else { acc });

        if tone {
            self.last_tone_ms = now;
            self.signal_lost = false;
            self.freq_counts[best] = self.freq_counts[best].saturating_add(1);
        }

        let signal = best_mag > CANDIDATE_SNR * self.gate.noise_floor() && best_mag > 0.0;
        if signal {
            if let Some(index) = self.tracking.observe(&self.freqs, &self.mags, best, now) {
                debug!("CW: tracking {:.0} Hz", self.freqs[index]);
            }
        } else {
            self.tracking.forget_candidate();
        }

        match (tone, self.measuring) {
            (true, false) => self.on_rising_edge(now),
            (false, true) => self.on_falling_edge(now),
            (false, false) => self.on_silence(now),
            (true, true) => {}
        }

        if !tone && !self.signal_lost && now.saturating_sub(self.last_tone_ms) > NO_TONE_TIMEOUT_MS {
            self.on_signal_lost();
        }
    }

    fn on_rising_edge(&mut self, now: u64) {
        if self.started {
            let gap = self.trailing_ms.map_or(0, |t| now.saturating_sub(t));
            if self.element_count > 0 && gap > self.reference as u64 {
                self.decode_character();
            }
        }

        if !self.started {
            if let Some(trailing) = self.trailing_ms {
                if now.saturating_sub(trailing) > self.word_space_ms() as u64 && self.last_decode_ok {
                    self.data.emit(' ');
                    self.last_decode_ok = false;
                }
            }
            self.started = true;
            self.letter_start_ms = now;
        }

        self.leading_ms = now;
        self.measuring = true;
    }

    fn on_falling_edge(&mut self, now: u64) {
        self.measuring = false;
        let duration = now.saturating_sub(self.leading_ms) as u32;

        if duration < self.noise_spike_ms() {
            if self.element_count == 0 {
                self.started = false;
            }
            return;
        }

        self.trailing_ms = Some(now);

        if duration > MAX_DASH_FACTOR * self.reference {
            debug!("CW: {} ms element exceeds dash limit, character dropped", duration);
            self.discard_character();
            self.last_element = 0;
            return;
        }

        if self.last_element > 0 {
            let last = self.last_element;
            if duration >= 2 * last && duration <= 4 * last {
                self.update_timing(last, duration);
            } else if last >= 2 * duration && last <= 4 * duration {
                self.update_timing(duration, last);
            }
        }

        if self.element_count == MAX_ELEMENTS {
            self.discard_character();
            self.last_element = duration;
            return;
        }
        self.durations[self.element_count] = duration;
        self.element_count += 1;
        self.letter_end_ms = now;

        if self.two_dots.is_none() {
            self.tone_min = self.tone_min.min(duration);
            self.tone_max = self.tone_max.max(duration);
            if self.tone_min != self.tone_max {
                self.reference = (self.tone_min + self.tone_max) / 2;
            }
        }
        self.last_element = duration;
    }

    fn on_silence(&mut self, now: u64) {
        let Some(trailing) = self.trailing_ms else {
            return;
        };
        let pause = now.saturating_sub(trailing);

        if pause > LONG_PAUSE_MS {
            if self.element_count > 0 {
                self.decode_character();
            }
            if self.last_decode_ok {
                self.data.emit(' ');
            }
            self.last_decode_ok = false;
            self.wpm_history = [0; WPM_HISTORY];
            self.wpm_index = 0;
            self.freq_counts = [0; SCAN_STEPS];
            self.last_element = 0;
            self.started = false;
            self.trailing_ms = None;
        } else if self.started && self.element_count > 0 && pause > self.reference as u64 {
            self.decode_character();
        }
    }

    /// Accept a dit/dah pair as timing evidence
    fn update_timing(&mut self, dit: u32, dah: u32) {
        let sample = (dit + dah) as f32 / 2.0;
        // two_dots is two dit lengths: wpm = 1200 / dit
        let implied_wpm = 2400.0 / sample;
        if implied_wpm < self.min_wpm as f32 || implied_wpm > self.max_wpm as f32 {
            return;
        }
        let two_dots = match self.two_dots {
            Some(prev) => 0.75 * prev + 0.25 * sample,
            None => sample,
        };
        self.two_dots = Some(two_dots);
        self.reference = two_dots.round() as u32;
    }

    fn decode_character(&mut self) {
        let mut cursor = MorseCursor::new();
        for &duration in &self.durations[..self.element_count] {
            let element = if duration < self.reference { Element::Dit } else { Element::Dah };
            cursor.push(element);
        }

        let decoded = cursor.symbol();
        if let Some(ch) = decoded {
            self.data.emit(ch);
            self.publish_freq();
            let letter_ms = self.letter_end_ms.saturating_sub(self.letter_start_ms);
            if cursor.units() > 1 && letter_ms > 0 {
                self.update_wpm(cursor.units(), letter_ms);
            }
        }

        self.last_decode_ok = decoded.is_some();
        self.freq_counts = [0; SCAN_STEPS];
        self.element_count = 0;
        self.started = false;
    }

    fn discard_character(&mut self) {
        self.element_count = 0;
        self.started = false;
        self.last_decode_ok = false;
        self.freq_counts = [0; SCAN_STEPS];
    }

    fn publish_freq(&mut self) {
        let freq = match self.freq_counts.iter().enumerate().max_by_key(|&(_, &n)| n) {
            Some((index, &n)) if n > 0 => self.freqs[index],
            _ => self.tracked_freq(),
        };
        if freq != self.published_freq {
            self.published_freq = freq;
            self.data.set_cw_freq(freq);
        }
    }

    fn update_wpm(&mut self, units: u32, letter_ms: u64) {
        let wpm = ((units - 1) as f32 * 1200.0 / letter_ms as f32).round() as u32;
        if wpm < self.min_wpm || wpm > self.max_wpm {
            return;
        }
        self.wpm_history[self.wpm_index] = wpm;
        self.wpm_index = (self.wpm_index + 1) % WPM_HISTORY;

        let mut sorted = self.wpm_history;
        sorted.sort_unstable();
        let empty = sorted.iter().take_while(|&&w| w == 0).count();
        let valid = &sorted[empty..];
        let median = match valid.len() {
            0 => wpm,
            n if n % 2 == 1 => valid[n / 2],
            n => (valid[n / 2 - 1] + valid[n / 2]) / 2,
        };
        if median != self.wpm {
            self.wpm = median;
            self.data.set_cw_wpm(median);
        }
    }

    fn on_signal_lost(&mut self) {
        debug!("CW: no tone for {} s, clearing published state", NO_TONE_TIMEOUT_MS / 1000);
        self.signal_lost = true;
        self.reset_timing();
        self.wpm = 0;
        self.published_freq = 0.0;
        self.data.set_cw_wpm(0);
        self.data.set_cw_freq(0.0);
    }

    fn reset_timing(&mut self) {
        self.started = false;
        self.measuring = false;
        self.trailing_ms = None;
        self.element_count = 0;
        self.last_element = 0;
        self.two_dots = None;
        self.tone_min = u32::MAX;
        self.tone_max = 0;
        self.reference = START_REFERENCE_MS;
        self.last_decode_ok = false;
        self.wpm_history = [0; WPM_HISTORY];
        self.wpm_index = 0;
        self.freq_counts = [0; SCAN_STEPS];
    }
}

impl AudioDecoder for CwDecoder {
    fn name(&self) -> &'static str {
        "CW"
    }

    fn start(&mut self, config: &DecoderConfig) -> Result<()> {
        if config.mode != DecoderMode::Cw {
            return Err(DecoderError::InvalidConfig(format!("CW decoder cannot run {} config", config.mode)));
        }
        let config = config.sanitized();
        self.sample_rate = config.sample_rate;
        self.center = config.cw_center_hz();
        for (freq, offset) in self.freqs.iter_mut().zip(SCAN_OFFSETS) {
            *freq = self.center + offset;
        }
        self.bank = GoertzelBank::new(&self.freqs, self.sample_rate as f32);
        self.reset();
        self.running = true;
        info!(
            "CW decoder started: {} Hz sampling, {:.0} Hz tone, {}-{} WPM",
            self.sample_rate, self.center, self.min_wpm, self.max_wpm
        );
        Ok(())
    }

    fn stop(&mut self) {
        if self.running {
            info!("CW decoder stopped");
        }
        self.running = false;
        self.reset();
    }

    fn process_samples(&mut self, samples: &[i16]) {
        if !self.running {
            return;
        }
        for &sample in samples {
            self.window[self.window_pos] = sample;
            self.window_pos += 1;
            self.samples_seen += 1;
            if self.window_pos == CW_WINDOW {
                self.window_pos = 0;
                self.process_window();
            }
        }
    }

    fn reset(&mut self) {
        self.window = [0; CW_WINDOW];
        self.window_pos = 0;
        self.samples_seen = 0;
        self.mags = [0.0; SCAN_STEPS];
        self.gate.reset();
        self.tracking = FrequencyTracker::new();
        self.reset_timing();
        self.leading_ms = 0;
        self.letter_start_ms = 0;
        self.letter_end_ms = 0;
        self.wpm = 0;
        self.published_freq = 0.0;
        self.last_tone_ms = 0;
        self.signal_lost = false;
        self.data.set_cw_wpm(0);
        self.data.set_cw_freq(0.0);
    }

    fn set_adaptive_threshold(&mut self, enabled: bool) {
        self.gate.set_adaptive(enabled);
    }

    fn display_range(&self) -> Option<(u16, u16)> {
        if !self.running {
            return None;
        }
        let nyquist = self.sample_rate as f32 / 2.0;
        let low = (self.center - DISPLAY_SPAN_HZ).max(0.0);
        let high = (self.center + DISPLAY_SPAN_HZ).min(nyquist);
        Some((low as u16, high as u16))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::CwKeyer;

    const FS: u32 = 4000;

    fn started_decoder(center: f32) -> (CwDecoder, Arc<DecodedData>) {
        let data = Arc::new(DecodedData::new());
        let mut decoder = CwDecoder::new(Arc::clone(&data));
        decoder.start(&DecoderConfig::cw(FS, center)).unwrap();
        (decoder, data)
    }

    fn feed(decoder: &mut CwDecoder, samples: &[i16]) {
        for chunk in samples.chunks(128) {
            decoder.process_samples(chunk);
        }
    }

    #[test]
    fn test_rejects_foreign_config() {
        let mut decoder = CwDecoder::new(Arc::new(DecodedData::new()));
        assert!(decoder.start(&DecoderConfig::rtty(8000, 2125.0, 170.0, 45.45)).is_err());
        assert!(!decoder.is_running());
    }

    #[test]
    fn test_ignores_samples_before_start() {
        let data = Arc::new(DecodedData::new());
        let mut decoder = CwDecoder::new(Arc::clone(&data));
        let keyer = CwKeyer::new(FS, 800.0, 20.0);
        decoder.process_samples(&keyer.render("EEEE"));
        assert!(data.text.is_empty());
    }

    #[test]
    fn test_s_then_o_from_reset() {
        let (mut decoder, data) = started_decoder(800.0);
        let keyer = CwKeyer::new(FS, 800.0, 20.0);

        let mut audio = keyer.silence(480);
        audio.extend(keyer.render("S"));
        audio.extend(keyer.silence(2160));
        audio.extend(keyer.render("O"));
        audio.extend(keyer.silence(12_000));
        feed(&mut decoder, &audio);

        assert_eq!(data.drain_text().trim_end(), "SO");
    }

    #[test]
    fn test_wpm_converges_on_paris() {
        let (mut decoder, data) = started_decoder(800.0);
        let keyer = CwKeyer::new(FS, 800.0, 20.0);

        let mut audio = keyer.silence(480);
        audio.extend(keyer.render("PARIS PARIS"));
        audio.extend(keyer.silence(12_000));
        feed(&mut decoder, &audio);

        assert_eq!(data.drain_text().trim_end(), "PARIS PARIS");
        let wpm = data.status().cw_wpm;
        assert!((19..=21).contains(&wpm), "wpm {}", wpm);
        assert_eq!(data.status().cw_freq, 800.0);
        // Two dot lengths at 20 WPM
        assert!((decoder.reference_ms() as i32 - 120).abs() <= 12);
    }

    #[test]
    fn test_word_spaces_between_words() {
        let (mut decoder, data) = started_decoder(700.0);
        let keyer = CwKeyer::new(FS, 700.0, 20.0);

        let mut audio = keyer.silence(480);
        audio.extend(keyer.render("CQ DE TEST"));
        audio.extend(keyer.silence(12_000));
        feed(&mut decoder, &audio);

        assert_eq!(data.drain_text().trim_end(), "CQ DE TEST");
    }

    #[test]
    fn test_tracks_off_center_tone() {
        let (mut decoder, data) = started_decoder(800.0);
        let keyer = CwKeyer::new(FS, 900.0, 20.0);

        let mut audio = keyer.silence(480);
        audio.extend(keyer.render("PARIS PARIS PARIS"));
        audio.extend(keyer.silence(12_000));
        feed(&mut decoder, &audio);

        assert_eq!(decoder.tracked_freq(), 900.0);
        assert_eq!(data.status().cw_freq, 900.0);
        assert!(data.drain_text().contains("PARIS PARIS"));
    }

    #[test]
    fn test_frequency_hold_blocks_quick_retune() {
        let freqs: Vec<f32> = SCAN_OFFSETS.iter().map(|o| 800.0 + o).collect();
        let mut mags = [1.0f32; SCAN_STEPS];
        let mut tracker = FrequencyTracker::new();

        mags[5] = 10.0;
        let mut switched = None;
        for block in 0..RETUNE_CONSECUTIVE_BLOCKS {
            switched = switched.or(tracker.observe(&freqs, &mags, 5, block as u64 * 12));
        }
        assert_eq!(switched, Some(5));

        // Another strong candidate shortly after the switch is ignored
        mags = [1.0; SCAN_STEPS];
        mags[1] = 10.0;
        for block in 0..100u64 {
            assert_eq!(tracker.observe(&freqs, &mags, 1, 1_000 + block * 12), None);
        }
        assert_eq!(tracker.current, 5);
    }

    #[test]
    fn test_observation_must_be_continuous() {
        let freqs: Vec<f32> = SCAN_OFFSETS.iter().map(|o| 800.0 + o).collect();
        let mut mags = [1.0f32; SCAN_STEPS];
        mags[6] = 10.0;

        // Seen for 6 s, but with quiet blocks in between
        let mut tracker = FrequencyTracker::new();
        for block in 0..=6u64 {
            assert_eq!(tracker.observe(&freqs, &mags, 6, block * 1_000), None);
            tracker.forget_candidate();
        }
        assert_eq!(tracker.current, CENTER_INDEX);

        // Seen without interruption, a few blocks over 5 s are enough
        let mut tracker = FrequencyTracker::new();
        assert_eq!(tracker.observe(&freqs, &mags, 6, 0), None);
        assert_eq!(tracker.observe(&freqs, &mags, 6, 2_500), None);
        assert_eq!(tracker.observe(&freqs, &mags, 6, 5_000), Some(6));
    }

    #[test]
    fn test_small_delta_never_retunes() {
        let freqs: Vec<f32> = SCAN_OFFSETS.iter().map(|o| 800.0 + o).collect();
        let mut mags = [1.0f32; SCAN_STEPS];
        mags[4] = 10.0;
        let mut tracker = FrequencyTracker::new();
        for block in 0..1000u64 {
            assert_eq!(tracker.observe(&freqs, &mags, 4, block * 12), None);
        }
    }

    #[test]
    fn test_stop_clears_published_state() {
        let (mut decoder, data) = started_decoder(800.0);
        let keyer = CwKeyer::new(FS, 800.0, 20.0);
        let mut audio = keyer.silence(480);
        audio.extend(keyer.render("PARIS"));
        audio.extend(keyer.silence(4_000));
        feed(&mut decoder, &audio);
        assert!(data.status().cw_wpm > 0);

        decoder.stop();
        assert!(!decoder.is_running());
        assert_eq!(data.status().cw_wpm, 0);
        assert_eq!(data.status().cw_freq, 0.0);
    }

    #[test]
    fn test_long_silence_clears_published_state() {
        let (mut decoder, data) = started_decoder(800.0);
        let keyer = CwKeyer::new(FS, 800.0, 20.0);
        let mut audio = keyer.silence(480);
        audio.extend(keyer.render("PARIS"));
        feed(&mut decoder, &audio);
        assert!(data.status().cw_wpm > 0);
        feed(&mut decoder, &keyer.silence(FS as usize * 62));

        assert_eq!(data.status().cw_wpm, 0);
        assert_eq!(data.status().cw_freq, 0.0);
        assert_eq!(decoder.reference_ms(), START_REFERENCE_MS);
        assert_eq!(data.drain_text().trim_end(), "PARIS");
    }

    #[test]
    fn test_noise_spike_is_ignored() {
        let (mut decoder, data) = started_decoder(800.0);
        let keyer = CwKeyer::new(FS, 800.0, 20.0);
        // One 12 ms burst, far shorter than any element
        let mut audio = keyer.silence(480);
        audio.extend(keyer.tone(48));
        audio.extend(keyer.silence(FS as usize * 3));
        feed(&mut decoder, &audio);
        assert!(data.text.is_empty());
    }

    #[test]
    fn test_approximate_magnitudes_decode() {
        let data = Arc::new(DecodedData::new());
        let mut decoder = CwDecoder::new(Arc::clone(&data)).with_magnitude_mode(MagnitudeMode::Approximate);
        decoder.start(&DecoderConfig::cw(FS, 800.0)).unwrap();
        let keyer = CwKeyer::new(FS, 800.0, 20.0);

        let mut audio = keyer.silence(480);
        audio.extend(keyer.render("PARIS"));
        audio.extend(keyer.silence(12_000));
        feed(&mut decoder, &audio);

        assert_eq!(data.drain_text().trim_end(), "PARIS");
    }

    #[test]
    fn test_speed_outside_bounds_is_not_published() {
        let data = Arc::new(DecodedData::new());
        let mut decoder = CwDecoder::new(Arc::clone(&data)).with_wpm_bounds(5, 15);
        decoder.start(&DecoderConfig::cw(FS, 800.0)).unwrap();
        let keyer = CwKeyer::new(FS, 800.0, 20.0);

        let mut audio = keyer.silence(480);
        audio.extend(keyer.render("PARIS"));
        audio.extend(keyer.silence(12_000));
        feed(&mut decoder, &audio);

        assert_eq!(data.drain_text().trim_end(), "PARIS");
        assert_eq!(data.status().cw_wpm, 0);
    }

    #[test]
    fn test_quiet_signal_decodes() {
        let (mut decoder, data) = started_decoder(800.0);
        let keyer = CwKeyer::new(FS, 800.0, 20.0).with_amplitude(400.0);

        let mut audio = keyer.silence(480);
        audio.extend(keyer.render("PARIS"));
        audio.extend(keyer.silence(12_000));
        feed(&mut decoder, &audio);

        assert_eq!(data.drain_text().trim_end(), "PARIS");
    }

    #[test]
    fn test_fixed_threshold_gate_decodes() {
        let (mut decoder, data) = started_decoder(800.0);
        decoder.set_adaptive_threshold(false);
        let keyer = CwKeyer::new(FS, 800.0, 20.0);

        let mut audio = keyer.silence(480);
        audio.extend(keyer.render("PARIS"));
        audio.extend(keyer.silence(12_000));
        feed(&mut decoder, &audio);

        assert_eq!(data.drain_text().trim_end(), "PARIS");
    }

    #[test]
    fn test_display_range_around_center() {
        let (decoder, _) = started_decoder(800.0);
        assert_eq!(decoder.display_range(), Some((300, 1300)));
    }
}
