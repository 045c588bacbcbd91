use std::f32::consts::PI;

/// How the final Goertzel state is turned into a magnitude
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MagnitudeMode {
    /// `sqrt(q1² + q2² - q1·q2·coeff)`
    Exact,
    /// `max + 0.5·min` of the absolute real and imaginary parts (no sqrt)
    Approximate,
}

/// Single-frequency Goertzel detector.
///
/// The target bin may be fractional: the coefficient is `2·cos(2π·f/fs)`
/// rather than being snapped to the nearest DFT bin, so closely spaced scan
/// frequencies stay distinct even with short blocks.
#[derive(Debug, Clone, Copy)]
pub struct GoertzelDetector {
    target_freq: f32,
    sample_rate: f32,
    coeff: f32,
    cos: f32,
    sin: f32,
}

impl GoertzelDetector {
    pub fn new(target_freq: f32, sample_rate: f32) -> Self {
        let omega = 2.0 * PI * target_freq / sample_rate;
        Self {
            target_freq,
            sample_rate,
            coeff: 2.0 * omega.cos(),
            cos: omega.cos(),
            sin: omega.sin(),
        }
    }

    pub fn target_freq(&self) -> f32 {
        self.target_freq
    }

    pub fn coeff(&self) -> f32 {
        self.coeff
    }

    /// Move the detector to a new frequency
    pub fn retune(&mut self, target_freq: f32) {
        *self = Self::new(target_freq, self.sample_rate);
    }

    fn run<S: Copy + Into<f32>>(&self, samples: &[S]) -> (f32, f32) {
        let mut q1 = 0.0f32;
        let mut q2 = 0.0f32;
        for &sample in samples {
            let q0 = self.coeff * q1 - q2 + sample.into();
            q2 = q1;
            q1 = q0;
        }
        (q1, q2)
    }

    /// Squared magnitude over the block
    pub fn power<S: Copy + Into<f32>>(&self, samples: &[S]) -> f32 {
        let (q1, q2) = self.run(samples);
        (q1 * q1 + q2 * q2 - q1 * q2 * self.coeff).max(0.0)
    }

    pub fn magnitude<S: Copy + Into<f32>>(&self, samples: &[S], mode: MagnitudeMode) -> f32 {
        match mode {
            MagnitudeMode::Exact => self.power(samples).sqrt(),
            MagnitudeMode::Approximate => {
                let (q1, q2) = self.run(samples);
                let real = (q1 - q2 * self.cos).abs();
                let imag = (q2 * self.sin).abs();
                real.max(imag) + 0.5 * real.min(imag)
            }
        }
    }
}

/// A bank of detectors evaluated over the same block (frequency scanning)
#[derive(Debug, Clone)]
pub struct GoertzelBank {
    detectors: Vec<GoertzelDetector>,
}

impl GoertzelBank {
    pub fn new(freqs: &[f32], sample_rate: f32) -> Self {
        Self {
            detectors: freqs.iter().map(|&f| GoertzelDetector::new(f, sample_rate)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    pub fn freq(&self, index: usize) -> f32 {
        self.detectors[index].target_freq()
    }

    /// Fill `out` with one magnitude per detector
    pub fn magnitudes<S: Copy + Into<f32>>(&self, samples: &[S], mode: MagnitudeMode, out: &mut [f32]) {
        for (detector, slot) in self.detectors.iter().zip(out.iter_mut()) {
            *slot = detector.magnitude(samples, mode);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: f32, len: usize, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (2.0 * PI * freq * i as f32 / sample_rate + 0.3).sin())
            .collect()
    }

    #[test]
    fn test_coeff_matches_definition() {
        let detector = GoertzelDetector::new(800.0, 4000.0);
        let expected = 2.0 * (2.0 * PI * 800.0 / 4000.0).cos();
        assert!((detector.coeff() - expected).abs() < 1e-6);
    }

    #[test]
    fn test_on_target_beats_adjacent_bin() {
        // 48-sample block at 4 kHz: one bin is 83.3 Hz
        let detector = GoertzelDetector::new(800.0, 4000.0);
        let on = sine(800.0, 4000.0, 48, 1000.0);
        let off = sine(800.0 + 4000.0 / 48.0, 4000.0, 48, 1000.0);

        let on_mag = detector.magnitude(&on, MagnitudeMode::Exact);
        let off_mag = detector.magnitude(&off, MagnitudeMode::Exact);
        assert!(
            on_mag > 5.0 * off_mag,
            "on-target {} should exceed 5x off-target {}",
            on_mag,
            off_mag
        );
    }

    #[test]
    fn test_exact_magnitude_scales_with_block() {
        // A sine of amplitude A over N samples gives roughly A·N/2
        let detector = GoertzelDetector::new(1000.0, 8000.0);
        let samples = sine(1000.0, 8000.0, 64, 100.0);
        let mag = detector.magnitude(&samples, MagnitudeMode::Exact);
        assert!((mag - 3200.0).abs() < 200.0, "magnitude {}", mag);
    }

    #[test]
    fn test_approximate_tracks_exact() {
        let detector = GoertzelDetector::new(800.0, 4000.0);
        let samples = sine(800.0, 4000.0, 48, 1000.0);
        let exact = detector.magnitude(&samples, MagnitudeMode::Exact);
        let approx = detector.magnitude(&samples, MagnitudeMode::Approximate);
        let ratio = approx / exact;
        assert!(ratio > 0.85 && ratio < 1.15, "ratio {}", ratio);
    }

    #[test]
    fn test_i16_and_f32_inputs_agree() {
        let detector = GoertzelDetector::new(800.0, 4000.0);
        let float = sine(800.0, 4000.0, 48, 1000.0);
        let ints: Vec<i16> = float.iter().map(|&s| s.round() as i16).collect();
        let a = detector.power(&float);
        let b = detector.power(&ints);
        assert!((a - b).abs() / a < 0.01);
    }

    #[test]
    fn test_silence_is_zero() {
        let detector = GoertzelDetector::new(800.0, 4000.0);
        assert_eq!(detector.magnitude(&[0i16; 48], MagnitudeMode::Exact), 0.0);
        assert_eq!(detector.magnitude(&[0i16; 48], MagnitudeMode::Approximate), 0.0);
    }

    #[test]
    fn test_bank_picks_strongest() {
        let bank = GoertzelBank::new(&[650.0, 700.0, 750.0, 800.0, 850.0, 900.0, 950.0], 4000.0);
        let samples = sine(900.0, 4000.0, 48, 1000.0);
        let mut mags = [0.0f32; 7];
        bank.magnitudes(&samples, MagnitudeMode::Exact, &mut mags);
        let best = mags
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(bank.freq(best), 900.0);
    }
}
