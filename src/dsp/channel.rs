//! Per-channel masking threshold engine.
//!
//! Works on one channel's frequency lines once per half-window block:
//! maps lines onto critical bands, spreads smoothed band energy through a
//! normalized kernel into a dynamic masking threshold, blends it with a
//! static threshold shaped from the hearing contour, then gates/quantizes
//! each line in the dB domain relative to the combined threshold. Also holds
//! the channel's circular raw/processed sample buffers, which the
//! orchestrator and the MDCT share.

use crate::dsp::energy::EnergySmoother;
use crate::dsp::hearing;
use crate::dsp::utils::{amplitude_to_db, db_to_amplitude, power_to_db};

/// Critical band upper cutoffs in Hz. Fixed domain knowledge, not derived.
/// The first entry (0) and the last (beyond any audio rate) bound the walk
/// in `assign_bands`.
pub const CRITICAL_BAND_CUTOFFS: [f32; 26] = [
    0.0, 100.0, 200.0, 300.0, 400.0, 510.0, 630.0, 770.0, 920.0, 1080.0, 1270.0, 1480.0, 1720.0,
    2000.0, 2320.0, 2700.0, 3150.0, 3700.0, 4400.0, 5300.0, 6400.0, 7700.0, 9500.0, 12000.0,
    15000.0, 25000.0,
];

pub const NUM_BANDS: usize = CRITICAL_BAND_CUTOFFS.len();

/// Keeps floor-quantization idempotent: a quantized value that round-trips
/// through dB conversion with a hair of negative error must not floor down
/// another full step.
const QUANT_EPS: f32 = 1e-3;

/// Floor-quantize an amplitude to `step`-dB increments, preserving sign.
fn quantize_amplitude(value: f32, step: f32) -> f32 {
    let quantized = db_to_amplitude((amplitude_to_db(value) / step + QUANT_EPS).floor() * step);
    if value < 0.0 {
        -quantized
    } else {
        quantized
    }
}

pub struct ChannelMasker {
    num_lines: usize,
    sample_rate: f32,

    pub raw_freq_lines: Vec<f32>,
    pub processed_freq_lines: Vec<f32>,
    /// Last non-stuck block's processed lines, kept for stuck-state recovery.
    pub prev_processed_lines: Vec<f32>,

    /// Circular time-domain buffers shared with the orchestrator; length is
    /// `2 * num_lines`.
    pub raw_samples: Vec<f32>,
    pub processed_samples: Vec<f32>,

    pub threshold: Vec<f32>,
    pub static_thresh: Vec<f32>,
    pub dynamic_thresh: Vec<f32>,
    /// Kernel response around the center band, scaled like the dynamic
    /// threshold; display-only.
    pub spread_demo: Vec<f32>,

    pub bias_curve: Vec<f32>,

    /// Unbiased static threshold, memoized on (level, curve) so the powf
    /// sweep over all lines only reruns when those parameters move.
    static_base: Vec<f32>,

    absolute_threshold: Vec<f32>,
    energies: [f32; NUM_BANDS],
    spread_energies: [f32; NUM_BANDS],
    demo_spread_energies: [f32; NUM_BANDS],
    band_assignments: Vec<usize>,
    lines_per_band: [u32; NUM_BANDS],

    // Dirty flags for the static threshold memoization.
    prev_abs_threshold_level: f32,
    prev_abs_threshold_curve: f32,

    rms: EnergySmoother,
}

impl ChannelMasker {
    pub fn new(num_lines: usize, sample_rate: f32) -> Self {
        let mut masker = Self {
            num_lines,
            sample_rate,
            raw_freq_lines: vec![0.0; num_lines],
            processed_freq_lines: vec![0.0; num_lines],
            prev_processed_lines: vec![0.0; num_lines],
            raw_samples: vec![0.0; num_lines * 2],
            processed_samples: vec![0.0; num_lines * 2],
            threshold: vec![0.0; num_lines],
            static_thresh: vec![0.0; num_lines],
            dynamic_thresh: vec![0.0; num_lines],
            spread_demo: vec![0.0; num_lines],
            bias_curve: vec![1.0; num_lines],
            static_base: vec![0.0; num_lines],
            absolute_threshold: vec![0.0; num_lines],
            energies: [0.0; NUM_BANDS],
            spread_energies: [0.0; NUM_BANDS],
            demo_spread_energies: [0.0; NUM_BANDS],
            band_assignments: vec![0; num_lines],
            lines_per_band: [0; NUM_BANDS],
            prev_abs_threshold_level: -1.0,
            prev_abs_threshold_curve: -1.0,
            rms: EnergySmoother::new(),
        };
        masker.assign_bands();
        hearing::fill_threshold(&mut masker.absolute_threshold, sample_rate);
        masker
    }

    pub fn resize(&mut self, new_num_lines: usize) {
        self.num_lines = new_num_lines;

        self.raw_freq_lines.resize(new_num_lines, 0.0);
        self.processed_freq_lines.resize(new_num_lines, 0.0);
        self.prev_processed_lines = vec![0.0; new_num_lines];

        self.band_assignments.resize(new_num_lines, 0);
        self.threshold.resize(new_num_lines, 0.0);
        self.static_thresh.resize(new_num_lines, 0.0);
        self.static_base.resize(new_num_lines, 0.0);
        self.dynamic_thresh.resize(new_num_lines, 0.0);
        self.spread_demo.resize(new_num_lines, 0.0);
        self.bias_curve.resize(new_num_lines, 1.0);
        self.absolute_threshold.resize(new_num_lines, 0.0);

        self.raw_samples = vec![0.0; new_num_lines * 2];
        self.processed_samples = vec![0.0; new_num_lines * 2];

        self.assign_bands();
        hearing::fill_threshold(&mut self.absolute_threshold, self.sample_rate);
        // Force the static threshold to rebuild at the new resolution.
        self.prev_abs_threshold_level = -1.0;
        self.prev_abs_threshold_curve = -1.0;
    }

    pub fn num_lines(&self) -> usize {
        self.num_lines
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    fn freq_to_line(&self, freq: f32) -> f32 {
        self.num_lines as f32 * freq / (self.sample_rate / 2.0)
    }

    fn line_to_freq(&self, line: f32) -> f32 {
        line * (self.sample_rate / 2.0) / self.num_lines as f32
    }

    /// Walks the lines in increasing order, advancing the band whenever the
    /// line's frequency exceeds the current cutoff. Band 0 structurally
    /// receives almost no lines and the top band absorbs everything above
    /// the second-to-last cutoff; downstream tuning depends on exactly this
    /// mapping, so keep the comparison strict.
    fn assign_bands(&mut self) {
        let mut band = 0usize;
        self.lines_per_band = [0; NUM_BANDS];
        for f in 0..self.num_lines {
            let freq = self.line_to_freq(f as f32);
            if freq > CRITICAL_BAND_CUTOFFS[band] && band < NUM_BANDS - 1 {
                band += 1;
            }
            self.band_assignments[f] = band;
            self.lines_per_band[band] += 1;
        }
    }

    /// Convolves per-band energies with the spreading kernel. Taps landing
    /// outside the band range are dropped, so edge bands lose a little of
    /// their spread rather than wrapping.
    fn spread(&mut self, kernel: &[f32], kernel_center: usize) {
        for b in 0..NUM_BANDS {
            let src_energy = self.energies[b];
            for (k, &weight) in kernel.iter().enumerate() {
                let out_index = b as isize + k as isize - kernel_center as isize;
                if (0..NUM_BANDS as isize).contains(&out_index) {
                    self.spread_energies[out_index as usize] += src_energy * weight;
                }
            }
        }
    }

    /// Display trace: the kernel applied to the center band alone.
    fn make_spread_demo(&mut self, kernel: &[f32], kernel_center: usize) {
        self.demo_spread_energies = [0.0; NUM_BANDS];

        let demo_center = NUM_BANDS / 2;
        let src_energy = self.energies[demo_center];

        for (k, &weight) in kernel.iter().enumerate() {
            let out_index = k as isize - kernel_center as isize + demo_center as isize;
            if (0..NUM_BANDS as isize).contains(&out_index) {
                self.demo_spread_energies[out_index as usize] = weight * src_energy;
            }
        }
    }

    fn calc_static_thresh(&mut self, abs_threshold_level: f32, perceptual_curve: f32) {
        for f in 0..self.num_lines {
            // 60 sits near the geometric mean of the hearing contour, so
            // sweeping the curve exponent pivots the threshold around its
            // middle instead of shifting the whole thing.
            let a = self.absolute_threshold[f].powf(perceptual_curve)
                * 60.0f32.powf(1.0 - perceptual_curve);
            self.static_base[f] = a * abs_threshold_level;
        }
    }

    fn calc_dynamic_thresh(&mut self, masking_threshold_scalar: f32) {
        for f in 0..self.num_lines {
            let band = self.band_assignments[f];
            self.dynamic_thresh[f] = self.spread_energies[band] * masking_threshold_scalar;
            self.spread_demo[f] = self.demo_spread_energies[band] * masking_threshold_scalar;
        }
    }

    fn apply_bias_curve(&mut self) {
        for f in 0..self.num_lines {
            self.static_thresh[f] = self.static_base[f] * self.bias_curve[f];
            self.dynamic_thresh[f] *= self.bias_curve[f];
            self.spread_demo[f] *= self.bias_curve[f];
        }
    }

    /// Builds the combined per-line threshold for the current block.
    ///
    /// `speed` is the smoothing decay in seconds of audio; it is converted
    /// to block ticks here because the smoother ticks once per half-window.
    pub fn build_threshold(
        &mut self,
        kernel: &[f32],
        kernel_center: usize,
        masking_amount: f32,
        abs_threshold_level: f32,
        speed: f32,
        perceptual_curve: f32,
    ) {
        // The orchestrator clamps speed to >= 0, so this cannot fail.
        self.rms
            .set_decay_time(speed * self.sample_rate / (self.num_lines as f32 * 2.0))
            .ok();
        self.rms.tick(&self.raw_freq_lines);

        self.spread_energies = [0.0; NUM_BANDS];

        // Several lines can share a band; the last one wins. Summing would
        // change the masking behavior materially, so the overwrite is
        // deliberate.
        let mean = self.rms.mean();
        for f in 0..self.num_lines {
            self.energies[self.band_assignments[f]] = mean[f];
        }

        self.spread(kernel, kernel_center);
        self.make_spread_demo(kernel, kernel_center);

        if abs_threshold_level != self.prev_abs_threshold_level
            || perceptual_curve != self.prev_abs_threshold_curve
        {
            self.calc_static_thresh(abs_threshold_level, perceptual_curve);
            self.prev_abs_threshold_level = abs_threshold_level;
            self.prev_abs_threshold_curve = perceptual_curve;
        }

        self.calc_dynamic_thresh(masking_amount);
        self.apply_bias_curve();

        for f in 0..self.num_lines {
            self.threshold[f] = self.static_thresh[f].max(self.dynamic_thresh[f]);
        }
    }

    /// Gates each raw line against the threshold and optionally quantizes
    /// the result. A zero threshold or zero smoothed mean skips the gate
    /// entirely so the raw value passes through untouched.
    pub fn apply_threshold(&mut self, bit_reduction: f32, gate_ratio: f32) {
        let mean = self.rms.mean();
        for f in 0..self.num_lines {
            let raw = self.raw_freq_lines[f];
            let thresh = self.threshold[f];

            let mut processed = raw;
            if thresh > mean[f] && mean[f] != 0.0 && thresh != 0.0 {
                let db_thresh = power_to_db(thresh);
                let mut db_from_thresh = power_to_db(raw * raw) - db_thresh;
                if db_from_thresh < 0.0 {
                    db_from_thresh *= gate_ratio;
                }
                processed = db_to_amplitude(db_from_thresh + db_thresh);
                if raw < 0.0 {
                    processed = -processed;
                }
            }
            if bit_reduction != 0.0 && processed != 0.0 {
                processed = quantize_amplitude(processed, bit_reduction);
            }
            self.processed_freq_lines[f] = processed;
        }
    }

    /// Stuck-state recovery: reuse the previous block's magnitudes, but take
    /// each line's sign from the current block (flipping the stored value
    /// when the signs disagree).
    pub fn recover_packet(&mut self) {
        for t in 0..self.num_lines {
            let current = self.processed_freq_lines[t];
            let prev = self.prev_processed_lines[t];
            if (current > 0.0 && prev < 0.0) || (current < 0.0 && prev > 0.0) {
                self.processed_freq_lines[t] = -prev;
            } else {
                self.processed_freq_lines[t] = prev;
            }
        }
    }

    /// Remembers this block's lines as the recovery source.
    pub fn carry_forward(&mut self) {
        self.prev_processed_lines
            .copy_from_slice(&self.processed_freq_lines);
    }

    /// Rebuilds the per-line bias curve: a log-frequency atan ramp between
    /// 60 Hz and 20 kHz, tilted by `-bias`. The cosine duck keeps the
    /// curve's low point steady as the bias moves so the overall threshold
    /// level does not lurch; it is normalized against its value at bias 0,
    /// which makes a zero bias produce an all-ones curve exactly.
    pub fn build_bias(&mut self, new_bias: f32) {
        use std::f32::consts::PI;

        let left = self.freq_to_line(60.0);
        let right = self.freq_to_line(20000.0);
        const DUCK_AMOUNT: f32 = -2.0;
        const SHARPNESS: f32 = 5.0;
        let duck = (new_bias * PI / 4.0).cos();

        for f in 0..self.num_lines {
            // Rescale left..right onto a 0..1 log axis. Line 0 maps to
            // -inf, which atan saturates rather than blowing up.
            let input = (f as f32 / left).ln() / (right / left).ln();
            let rawcurve = ((input - 0.5) * SHARPNESS).atan() / PI * 6.0 * -new_bias;
            self.bias_curve[f] = 10.0f32.powf(rawcurve + (duck - 1.0) * DUCK_AMOUNT);
        }
    }

    pub fn smoothed_mean(&self) -> &[f32] {
        self.rms.mean()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_lines(masker: &mut ChannelMasker) {
        for (i, line) in masker.raw_freq_lines.iter_mut().enumerate() {
            *line = if i % 3 == 0 { 0.5 } else { -0.25 };
        }
    }

    #[test]
    fn band_map_is_monotone_and_capped() {
        let masker = ChannelMasker::new(512, 44100.0);
        let mut prev = 0;
        for &b in &masker.band_assignments {
            assert!(b >= prev);
            assert!(b < NUM_BANDS);
            prev = b;
        }
        // Top band absorbs the wide end of the spectrum.
        assert_eq!(*masker.band_assignments.last().unwrap(), NUM_BANDS - 1);
    }

    #[test]
    fn zero_thresholds_pass_raw_lines_through() {
        let mut masker = ChannelMasker::new(128, 44100.0);
        sample_lines(&mut masker);
        masker.build_threshold(&[1.0], 0, 0.0, 0.0, 0.0, 1.0);
        assert!(masker.threshold.iter().all(|&t| t == 0.0));
        masker.apply_threshold(0.0, 100.0);
        assert_eq!(masker.processed_freq_lines, masker.raw_freq_lines);
    }

    #[test]
    fn gate_attenuates_below_threshold() {
        let mut masker = ChannelMasker::new(128, 44100.0);
        sample_lines(&mut masker);
        // Large static level so every line sits below the threshold.
        masker.build_threshold(&[1.0], 0, 0.0, 1.0e3, 0.0, 1.0);
        masker.apply_threshold(0.0, 10.0);
        for f in 0..128 {
            let raw = masker.raw_freq_lines[f];
            let processed = masker.processed_freq_lines[f];
            assert!(processed.abs() < raw.abs());
            assert_eq!(processed.signum(), raw.signum());
        }
    }

    #[test]
    fn unity_gate_ratio_changes_nothing() {
        let mut masker = ChannelMasker::new(128, 44100.0);
        sample_lines(&mut masker);
        masker.build_threshold(&[1.0], 0, 0.0, 1.0e3, 0.0, 1.0);
        masker.apply_threshold(0.0, 1.0);
        for f in 0..128 {
            let raw = masker.raw_freq_lines[f];
            let processed = masker.processed_freq_lines[f];
            assert!((processed - raw).abs() < raw.abs() * 1e-3 + 1e-6);
        }
    }

    #[test]
    fn quantization_is_idempotent() {
        for &step in &[0.5f32, 1.0, 3.0, 12.0] {
            for &v in &[0.9f32, 0.5, 0.123, 0.01, -0.7, -0.003] {
                let once = quantize_amplitude(v, step);
                let twice = quantize_amplitude(once, step);
                assert_eq!(once, twice, "step {step}, value {v}");
            }
        }
    }

    #[test]
    fn quantization_preserves_sign_and_never_amplifies() {
        for &v in &[0.9f32, 0.25, -0.6] {
            let q = quantize_amplitude(v, 6.0);
            assert_eq!(q.signum(), v.signum());
            assert!(q.abs() <= v.abs() * (1.0 + 1e-3));
        }
    }

    #[test]
    fn bias_zero_gives_all_ones() {
        let mut masker = ChannelMasker::new(256, 44100.0);
        masker.build_bias(0.0);
        for &v in &masker.bias_curve {
            assert!((v - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn bias_tilts_the_curve() {
        let mut masker = ChannelMasker::new(256, 44100.0);
        masker.build_bias(1.0);
        // Positive bias lowers the threshold at high frequencies relative to
        // low frequencies (lets highs through, crushes lows).
        assert!(masker.bias_curve[250] < masker.bias_curve[5]);
        masker.build_bias(-1.0);
        assert!(masker.bias_curve[250] > masker.bias_curve[5]);
    }

    #[test]
    fn recovery_reuses_prev_magnitudes_with_current_signs() {
        let mut masker = ChannelMasker::new(4, 44100.0);
        masker.processed_freq_lines = vec![0.5, -0.5, 0.25, 0.0];
        masker.prev_processed_lines = vec![-0.3, -0.4, 0.2, 0.1];
        masker.recover_packet();
        // Signs disagreed on lines 0; magnitude kept, sign flipped.
        assert_eq!(masker.processed_freq_lines[0], 0.3);
        // Signs agreed: previous value reused directly.
        assert_eq!(masker.processed_freq_lines[1], -0.4);
        assert_eq!(masker.processed_freq_lines[2], 0.2);
        // Zero current value is not a disagreement.
        assert_eq!(masker.processed_freq_lines[3], 0.1);
    }

    #[test]
    fn spreading_redistributes_without_amplifying() {
        let mut masker = ChannelMasker::new(128, 44100.0);
        masker.energies = [0.0; NUM_BANDS];
        masker.energies[NUM_BANDS / 2] = 2.0;
        masker.spread_energies = [0.0; NUM_BANDS];
        // Triangular kernel summing to 1, well inside the band range.
        let kernel = [0.25, 0.5, 0.25];
        masker.spread(&kernel, 1);
        let total: f32 = masker.spread_energies.iter().sum();
        assert!((total - 2.0).abs() < 1e-5);
        assert!((masker.spread_energies[NUM_BANDS / 2] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn static_threshold_memoizes_on_parameters() {
        let mut masker = ChannelMasker::new(64, 44100.0);
        sample_lines(&mut masker);
        masker.build_threshold(&[1.0], 0, 0.0, 0.5, 0.0, 1.0);
        let first = masker.static_thresh.clone();
        // Same level and curve: cached values reused.
        masker.build_threshold(&[1.0], 0, 0.0, 0.5, 0.0, 1.0);
        assert_eq!(first, masker.static_thresh);
        // New level: rebuilt.
        masker.build_threshold(&[1.0], 0, 0.0, 1.0, 0.0, 1.0);
        assert!(first
            .iter()
            .zip(&masker.static_thresh)
            .any(|(a, b)| (a - b).abs() > 1e-12));
    }
}
