//! Signal-level trackers that turn Goertzel magnitudes into decisions.
//!
//! [`AdaptiveGainTracker`] is the on/off gate used by the CW decoder:
//! decay averages for the signal, noise floor and peak, normalized by the
//! peak, with separate on/off thresholds (hysteresis). A fixed-threshold
//! gate with a debounce counter is available as a fallback.
//!
//! [`ToneLevelTracker`] follows one RTTY tone: noise floor from the side
//! bins, an attack/decay envelope and an optional gain toward a target level.

/// Tuning constants for [`AdaptiveGainTracker`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerParams {
    /// Blend rate of the slow signal average
    pub signal_alpha: f32,
    /// Noise floor blend rate when the magnitude is above the floor
    pub noise_rise_alpha: f32,
    /// Noise floor blend rate when the magnitude is below the floor
    pub noise_fall_alpha: f32,
    /// Peak blend rate when the magnitude is above the peak
    pub peak_attack_alpha: f32,
    /// Peak blend rate when the magnitude is below the peak
    pub peak_decay_alpha: f32,
    /// `upper = sig - upper_k·(sig - noise)`
    pub upper_k: f32,
    /// `lower = noise + lower_k·(sig - noise)`
    pub lower_k: f32,
    /// Peak below this is treated as silence
    pub min_peak: f32,
    /// Tone-on also needs `magnitude > min_on_ratio · noise_floor`
    pub min_on_ratio: f32,
    /// Fixed-threshold fallback level
    pub fixed_threshold: f32,
    /// Blocks a new state must persist before the fixed gate switches
    pub debounce_blocks: u8,
}

impl TrackerParams {
    /// Constants for the CW gate: 48-sample blocks of `i16` audio
    pub const CW: Self = Self {
        signal_alpha: 0.05,
        noise_rise_alpha: 0.1,
        noise_fall_alpha: 0.02,
        peak_attack_alpha: 0.3,
        peak_decay_alpha: 0.01,
        upper_k: 0.2,
        lower_k: 0.7,
        min_peak: 1.0,
        min_on_ratio: 2.5,
        fixed_threshold: 2000.0,
        debounce_blocks: 2,
    };
}

impl Default for TrackerParams {
    fn default() -> Self {
        Self::CW
    }
}

/// Adaptive on/off gate with hysteresis
#[derive(Debug, Clone)]
pub struct AdaptiveGainTracker {
    params: TrackerParams,
    adaptive: bool,
    initialized: bool,
    signal_avg: f32,
    noise_floor: f32,
    agc_peak: f32,
    upper: f32,
    lower: f32,
    tone_on: bool,
    debounce: u8,
}

impl AdaptiveGainTracker {
    pub fn new(params: TrackerParams) -> Self {
        Self {
            params,
            adaptive: true,
            initialized: false,
            signal_avg: 0.0,
            noise_floor: 0.0,
            agc_peak: 0.0,
            upper: 0.0,
            lower: 0.0,
            tone_on: false,
            debounce: 0,
        }
    }

    /// Switch between the adaptive gate and the fixed-threshold fallback
    pub fn set_adaptive(&mut self, adaptive: bool) {
        if self.adaptive != adaptive {
            self.adaptive = adaptive;
            self.debounce = 0;
        }
    }

    pub fn is_adaptive(&self) -> bool {
        self.adaptive
    }

    pub fn reset(&mut self) {
        let adaptive = self.adaptive;
        *self = Self::new(self.params);
        self.adaptive = adaptive;
    }

    /// Feed one block magnitude; returns the tone state after it
    pub fn update(&mut self, magnitude: f32) -> bool {
        let magnitude = if magnitude.is_finite() { magnitude.max(0.0) } else { 0.0 };
        self.track(magnitude);
        self.tone_on = if self.adaptive {
            self.adaptive_decision(magnitude)
        } else {
            self.fixed_decision(magnitude)
        };
        self.tone_on
    }

    fn track(&mut self, magnitude: f32) {
        let p = &self.params;
        if !self.initialized {
            self.signal_avg = magnitude;
            self.noise_floor = magnitude;
            self.agc_peak = magnitude;
            self.initialized = true;
            return;
        }

        self.signal_avg += p.signal_alpha * (magnitude - self.signal_avg);

        if magnitude < self.signal_avg {
            let alpha = if magnitude > self.noise_floor { p.noise_rise_alpha } else { p.noise_fall_alpha };
            self.noise_floor += alpha * (magnitude - self.noise_floor);
        }

        if magnitude > self.signal_avg {
            let alpha = if magnitude > self.agc_peak { p.peak_attack_alpha } else { p.peak_decay_alpha };
            self.agc_peak += alpha * (magnitude - self.agc_peak);
        } else {
            self.agc_peak += p.peak_decay_alpha * (magnitude - self.agc_peak);
        }
    }

    fn adaptive_decision(&mut self, magnitude: f32) -> bool {
        let p = self.params;
        if self.agc_peak < p.min_peak {
            self.upper = 0.0;
            self.lower = 0.0;
            return false;
        }

        let norm_mag = magnitude / self.agc_peak;
        let norm_sig = self.signal_avg / self.agc_peak;
        let norm_noise = self.noise_floor / self.agc_peak;
        self.upper = norm_sig - p.upper_k * (norm_sig - norm_noise);
        self.lower = norm_noise + p.lower_k * (norm_sig - norm_noise);

        if self.tone_on {
            norm_mag >= self.lower
        } else {
            norm_mag > self.upper && magnitude > p.min_on_ratio * self.noise_floor
        }
    }

    fn fixed_decision(&mut self, magnitude: f32) -> bool {
        let raw = magnitude > self.params.fixed_threshold;
        if raw == self.tone_on {
            self.debounce = 0;
            return self.tone_on;
        }
        self.debounce += 1;
        if self.debounce >= self.params.debounce_blocks {
            self.debounce = 0;
            raw
        } else {
            self.tone_on
        }
    }

    pub fn tone_on(&self) -> bool {
        self.tone_on
    }

    pub fn signal_avg(&self) -> f32 {
        self.signal_avg
    }

    pub fn noise_floor(&self) -> f32 {
        self.noise_floor
    }

    pub fn agc_peak(&self) -> f32 {
        self.agc_peak
    }

    /// Normalized (upper, lower) thresholds from the last adaptive update
    pub fn thresholds(&self) -> (f32, f32) {
        (self.upper, self.lower)
    }
}

/// Noise floor blend rate when the side-bin level rises
const NOISE_ALPHA: f32 = 0.15;
/// Noise floor blend rate when the side-bin level falls
const NOISE_DECAY_ALPHA: f32 = 0.5;
/// Side-bin samples are capped at this multiple of the floor during strong signals
const NOISE_PEAK_RATIO: f32 = 3.5;
/// Lowest noise floor the tracker reports
pub const MIN_NOISE_FLOOR: f32 = 25.0;
const ENVELOPE_ATTACK: f32 = 0.05;
const ENVELOPE_DECAY: f32 = 0.001;
const AGC_TARGET: f32 = 1500.0;
const AGC_MIN_GAIN: f32 = 0.5;
const AGC_MAX_GAIN: f32 = 10.0;

/// Per-tone level tracking for the RTTY discriminator
#[derive(Debug, Clone, Default)]
pub struct ToneLevelTracker {
    noise_floor: f32,
    envelope: f32,
}

impl ToneLevelTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Update from the tone's peak bin and the mean of its other bins
    pub fn update(&mut self, peak: f32, noise_sample: f32) {
        let mut sample = noise_sample.max(0.0);
        if self.noise_floor == 0.0 {
            self.noise_floor = sample.max(MIN_NOISE_FLOOR);
        } else {
            let strong = peak > self.noise_floor * NOISE_PEAK_RATIO;
            if strong {
                sample = sample.min(self.noise_floor * NOISE_PEAK_RATIO);
            }
            let alpha = if sample < self.noise_floor { NOISE_DECAY_ALPHA } else { NOISE_ALPHA };
            let blended = self.noise_floor + alpha * (sample - self.noise_floor);
            self.noise_floor = blended.max(MIN_NOISE_FLOOR);
        }

        if self.envelope == 0.0 {
            self.envelope = peak;
        } else {
            let alpha = if peak > self.envelope { ENVELOPE_ATTACK } else { ENVELOPE_DECAY };
            self.envelope += alpha * (peak - self.envelope);
        }
    }

    /// Clip `peak` into `[floor, envelope]`
    pub fn clip(&self, peak: f32, floor: f32) -> f32 {
        peak.min(self.envelope).max(floor)
    }

    /// Gain that would bring the envelope to the AGC target
    pub fn gain(&self) -> f32 {
        if self.envelope > 0.01 {
            (AGC_TARGET / self.envelope).clamp(AGC_MIN_GAIN, AGC_MAX_GAIN)
        } else {
            1.0
        }
    }

    pub fn noise_floor(&self) -> f32 {
        self.noise_floor
    }

    pub fn envelope(&self) -> f32 {
        self.envelope
    }
}
