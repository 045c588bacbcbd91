//! Optional conditioning for tone blocks: a Hann window and a band-pass
//! biquad, both applied before the Goertzel bins.

use std::f32::consts::PI;

/// Hann window scaled to unit mean, so a windowed tone keeps the Goertzel
/// magnitude of the unwindowed one and the level thresholds still apply
pub fn hann_window<const N: usize>() -> [f32; N] {
    if N < 2 {
        return [1.0; N];
    }
    let mut window: [f32; N] =
        std::array::from_fn(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / (N - 1) as f32).cos()));
    let mean = window.iter().sum::<f32>() / N as f32;
    for w in &mut window {
        *w /= mean;
    }
    window
}

/// Second-order section, `H(z) = (b0 + b1·z⁻¹ + b2·z⁻²) / (1 + a1·z⁻¹ + a2·z⁻²)`,
/// run in transposed direct form II
#[derive(Debug, Clone, Copy)]
pub struct Biquad {
    b: [f32; 3],
    a: [f32; 2],
    state: [f32; 2],
}

impl Biquad {
    /// RBJ band-pass with 0 dB gain at `center`. `None` for a center outside
    /// (0, Nyquist) or a non-positive bandwidth.
    pub fn bandpass(sample_rate: f32, center: f32, bandwidth: f32) -> Option<Self> {
        if sample_rate <= 0.0 || bandwidth <= 0.0 || center <= 0.0 || center >= sample_rate / 2.0 {
            return None;
        }
        let omega = 2.0 * PI * center / sample_rate;
        let q = center / bandwidth;
        let alpha = omega.sin() / (2.0 * q);
        let a0 = 1.0 + alpha;
        Some(Self {
            b: [alpha / a0, 0.0, -alpha / a0],
            a: [-2.0 * omega.cos() / a0, (1.0 - alpha) / a0],
            state: [0.0; 2],
        })
    }

    pub fn process(&mut self, input: f32) -> f32 {
        let output = self.b[0] * input + self.state[0];
        self.state[0] = self.b[1] * input - self.a[0] * output + self.state[1];
        self.state[1] = self.b[2] * input - self.a[1] * output;
        output
    }

    pub fn reset(&mut self) {
        self.state = [0.0; 2];
    }
}
