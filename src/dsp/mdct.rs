//! Modified Discrete Cosine Transform over circular sample buffers.
//!
//! Converts N time samples into N/2 frequency lines and back, built from a
//! size-N/4 complex FFT plus a sine window and phase rotation. The transform
//! is critically sampled: two windows overlapped by N/2 reconstruct the
//! original signal exactly (time-domain alias cancellation), which is why
//! [`Mdct::inverse`] *adds* into its output buffer instead of overwriting.
//!
//! Both directions run the forward-direction FFT; the differing pre/post
//! rotations and the repacking make the round trip come out right.

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

use crate::dsp::ConfigError;

fn is_power_of_two(n: usize) -> bool {
    n > 0 && n & (n - 1) == 0
}

/// Sine analysis/synthesis window, `sin(pi * (i + 0.5) / len)`.
pub fn sine_window(len: usize) -> Vec<f32> {
    let scale = PI / len as f32;
    (0..len).map(|i| (scale * (i as f32 + 0.5)).sin()).collect()
}

pub struct Mdct {
    window_len: usize,
    window: Vec<f32>,
    /// Unit-magnitude phase rotators, `exp(-i * 2pi * (k + 1/8) / N)`.
    rotation: Vec<Complex<f32>>,
    fft: Arc<dyn Fft<f32>>,
    // Work buffers, reused across calls so the audio path never allocates.
    rot: Vec<f32>,
    packed: Vec<Complex<f32>>,
    fft_scratch: Vec<Complex<f32>>,
}

impl Mdct {
    /// `num_samples` is the time-domain window length N. It must be a power
    /// of two and a multiple of 4 so the half-size FFT and the quarter-window
    /// rotation both come out even.
    pub fn new(num_samples: usize) -> Result<Self, ConfigError> {
        if num_samples % 4 != 0 || !is_power_of_two(num_samples) {
            return Err(ConfigError::WindowSize { n: num_samples });
        }

        let n4 = num_samples / 4;
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(n4);
        let fft_scratch = vec![Complex::default(); fft.get_inplace_scratch_len()];

        let tau = 2.0 * PI;
        let rotation = (0..n4)
            .map(|k| {
                let step = (k as f32 + 1.0 / 8.0) / num_samples as f32;
                Complex::new(0.0, -step * tau).exp()
            })
            .collect();

        Ok(Self {
            window_len: num_samples,
            window: sine_window(num_samples),
            rotation,
            fft,
            rot: vec![0.0; num_samples],
            packed: vec![Complex::default(); n4],
            fft_scratch,
        })
    }

    pub fn window_len(&self) -> usize {
        self.window_len
    }

    /// Forward transform. Reads `time` as a circular buffer of length N
    /// starting at `start`, replaces the N/2 entries of `freq`.
    pub fn forward(&mut self, time: &[f32], freq: &mut [f32], start: usize) {
        let n = self.window_len;
        let n4 = n / 4;

        // Window the circular input with a quarter-window rotation, negating
        // the first quarter.
        for i in 0..n {
            let rot_index = (i + n4) % n;
            let input_index = (i + start) % n;
            self.rot[rot_index] = time[input_index] * self.window[i];
        }
        for v in self.rot.iter_mut().take(n4) {
            *v = -*v;
        }

        // Fold N windowed samples into N/4 complex points.
        for t in 0..n4 {
            let re = self.rot[2 * t] - self.rot[n - 2 * t - 1];
            let im = -(self.rot[n / 2 + 2 * t] - self.rot[n / 2 - 2 * t - 1]);
            self.packed[t] = Complex::new(re, im) * 0.5 * self.rotation[t];
        }

        self.fft
            .process_with_scratch(&mut self.packed, &mut self.fft_scratch);

        // Unpack to N/2 real lines, interleaving real and negated imaginary
        // parts from the two ends.
        let scale = 2.0 / (n as f32).sqrt();
        for t in 0..n4 {
            let c = self.packed[t] * self.rotation[t] * scale;
            freq[2 * t] = c.re;
            freq[n / 2 - 2 * t - 1] = -c.im;
        }
    }

    /// Inverse transform. **Adds** the windowed result into the circular
    /// `time` buffer at `start`; overlapping windows must sum for the
    /// reconstruction to cancel the time-domain aliasing.
    pub fn inverse(&mut self, time: &mut [f32], freq: &[f32], start: usize) {
        let n = self.window_len;
        let n4 = n / 4;
        let n2 = n / 2;

        for t in 0..n4 {
            let c = Complex::new(freq[2 * t], freq[n2 - 2 * t - 1]);
            self.packed[t] = c * 0.5 * self.rotation[t];
        }

        self.fft
            .process_with_scratch(&mut self.packed, &mut self.fft_scratch);

        let scale = 8.0 / (n as f32).sqrt();
        for t in 0..n4 {
            let c = self.packed[t] * self.rotation[t] * scale;
            self.rot[2 * t] = c.re;
            self.rot[n2 + 2 * t] = c.im;
        }

        // Odd samples follow from the even ones by symmetry.
        let mut t = 1;
        while t < n {
            self.rot[t] = -self.rot[n - t - 1];
            t += 2;
        }

        for t in 0..(3 * n4) {
            let output_index = (t + start) % n;
            time[output_index] += self.rot[t + n4] * self.window[t];
        }
        for t in (3 * n4)..n {
            let output_index = (t + start) % n;
            time[output_index] += -self.rot[t - 3 * n4] * self.window[t];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_sizes() {
        assert!(Mdct::new(0).is_err());
        assert!(Mdct::new(2).is_err()); // power of two, not a multiple of 4
        assert!(Mdct::new(96).is_err()); // multiple of 4, not a power of two
        assert!(Mdct::new(17).is_err());
        assert!(Mdct::new(64).is_ok());
        assert!(Mdct::new(4096).is_ok());
    }

    #[test]
    fn zero_in_zero_out() {
        for &n in &[16usize, 64, 256] {
            let mut mdct = Mdct::new(n).unwrap();
            let time = vec![0.0f32; n];
            let mut freq = vec![1.0f32; n / 2];
            mdct.forward(&time, &mut freq, 3);
            assert!(freq.iter().all(|&v| v == 0.0), "forward, n={n}");

            let mut out = vec![0.0f32; n];
            mdct.inverse(&mut out, &freq, 5);
            assert!(out.iter().all(|&v| v == 0.0), "inverse, n={n}");
        }
    }

    /// Two 50%-overlapped forward+inverse passes reconstruct the input at
    /// unit gain, one window late. This mirrors how the orchestrator drives
    /// the transform: half of the processed ring is zeroed before each
    /// inverse pass lands in it.
    #[test]
    fn overlapped_round_trip_reconstructs() {
        for &n in &[64usize, 256] {
            let mut mdct = Mdct::new(n).unwrap();
            let total = 4 * n;
            let signal: Vec<f32> = (0..total)
                .map(|i| (2.0 * PI * 5.3 * i as f32 / n as f32).sin())
                .collect();

            let mut raw = vec![0.0f32; n];
            let mut processed = vec![0.0f32; n];
            let mut freq = vec![0.0f32; n / 2];
            let mut out = Vec::with_capacity(total);
            let mut pos = 0usize;

            for &s in &signal {
                if pos == 0 {
                    for v in &mut processed[n / 2..] {
                        *v = 0.0;
                    }
                    mdct.forward(&raw, &mut freq, pos);
                    mdct.inverse(&mut processed, &freq, pos);
                }
                if pos == n / 2 {
                    for v in &mut processed[..n / 2] {
                        *v = 0.0;
                    }
                    mdct.forward(&raw, &mut freq, pos);
                    mdct.inverse(&mut processed, &freq, pos);
                }
                out.push(processed[pos]);
                raw[pos] = s;
                pos = (pos + 1) % n;
            }

            // After the pipeline fills, output lags the input by N samples.
            for i in 0..n {
                let got = out[2 * n + i];
                let want = signal[n + i];
                assert!(
                    (got - want).abs() < 1e-3,
                    "n={n} i={i}: got {got}, want {want}"
                );
            }
        }
    }
}
