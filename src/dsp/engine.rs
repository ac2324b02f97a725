//! Block scheduling, overlap buffering and parameter plumbing.
//!
//! The engine owns one [`ChannelMasker`] per audio channel plus a single
//! MDCT sized to the current window. Incoming samples of arbitrary block
//! length land in each channel's circular raw buffer; every time the write
//! position crosses 0 or N/2, one 50%-overlapped window is transformed,
//! shaped and inverse-transformed back into the processed ring. Each output
//! sample is read from the processed ring one full window after its input
//! arrived, so the engine's latency is exactly the window size.
//!
//! Parameter setters translate user-facing control values into internal
//! coefficients. They must be called between blocks, never concurrently
//! with [`MaskingEngine::process_block`]; the engine has no internal
//! synchronization.

use log::debug;

use crate::dsp::channel::ChannelMasker;
use crate::dsp::mdct::Mdct;
use crate::dsp::stuck::GilbertElliott;
use crate::dsp::utils::safe_pow_to_db;
use crate::dsp::ConfigError;

/// dB-scaled, channel-averaged per-line arrays for external visualization.
/// Refreshed once per processed window (the bias line only when the bias
/// parameter moves, since it changes far less often).
#[derive(Debug, Clone, Default)]
pub struct DisplayLines {
    pub input: Vec<f32>,
    pub output: Vec<f32>,
    pub threshold: Vec<f32>,
    pub bias: Vec<f32>,
    pub static_threshold: Vec<f32>,
    pub dynamic_threshold: Vec<f32>,
    pub spread: Vec<f32>,
}

impl DisplayLines {
    fn resize(&mut self, new_size: usize) {
        self.input.resize(new_size, 0.0);
        self.output.resize(new_size, 0.0);
        self.threshold.resize(new_size, 0.0);
        self.bias.resize(new_size, 0.0);
        self.static_threshold.resize(new_size, 0.0);
        self.dynamic_threshold.resize(new_size, 0.0);
        self.spread.resize(new_size, 0.0);
    }
}

pub struct MaskingEngine {
    channels: Vec<ChannelMasker>,
    mdct: Mdct,
    loss_model: GilbertElliott,
    display: DisplayLines,

    /// Time-domain window size N; the circular buffers are this long.
    window_width: usize,
    /// N/2 frequency lines per window.
    num_lines: usize,
    sample_rate: f32,
    num_channels: usize,

    /// Position of the next incoming sample within the circular buffers.
    block_index: usize,
    in_loss_state: bool,

    kernel: Vec<f32>,
    kernel_center: usize,

    masking_amount: f32,
    bit_reduction: f32,
    speed: f32,
    absolute_threshold_level: f32,
    /// Bias value the current curves were built from; `None` until first
    /// build, so the curve is always rebuilt after a prepare.
    bias_built: Option<f32>,
    perceptual_curve: f32,
    mix: f32,
    gate_ratio: f32,
}

impl MaskingEngine {
    /// `num_lines` is the frequency resolution (window size / 2). Fails if
    /// the resulting window is not a power of two and a multiple of 4.
    pub fn new(
        num_lines: usize,
        sample_rate: f32,
        num_channels: usize,
    ) -> Result<Self, ConfigError> {
        let mut engine = Self {
            channels: Vec::new(),
            mdct: Mdct::new(num_lines * 2)?,
            loss_model: GilbertElliott::new(),
            display: DisplayLines::default(),
            window_width: num_lines * 2,
            num_lines,
            sample_rate,
            num_channels,
            block_index: 0,
            in_loss_state: false,
            kernel: vec![1.0],
            kernel_center: 0,
            masking_amount: 0.0,
            bit_reduction: 0.0,
            speed: 0.0,
            absolute_threshold_level: 0.0,
            bias_built: None,
            perceptual_curve: 1.0,
            mix: 1.0,
            gate_ratio: 1.0,
        };
        engine.rebuild_state(num_lines, sample_rate, num_channels);
        Ok(engine)
    }

    /// Reinitializes all per-channel state, the transform, and the display
    /// arrays. On error the previous configuration is left untouched.
    pub fn prepare(
        &mut self,
        num_lines: usize,
        sample_rate: f32,
        num_channels: usize,
    ) -> Result<(), ConfigError> {
        // Validate before touching any state.
        self.mdct = Mdct::new(num_lines * 2)?;
        self.rebuild_state(num_lines, sample_rate, num_channels);
        Ok(())
    }

    /// Everything `prepare` does after the transform has been planned for
    /// the new window size.
    fn rebuild_state(&mut self, num_lines: usize, sample_rate: f32, num_channels: usize) {
        debug!(
            "engine prepare: {} lines, {} Hz, {} channels",
            num_lines, sample_rate, num_channels
        );

        self.window_width = num_lines * 2;
        self.num_lines = num_lines;
        self.sample_rate = sample_rate;
        self.num_channels = num_channels;

        if self.channels.len() == num_channels
            && self.channels.iter().all(|ch| ch.sample_rate() == sample_rate)
        {
            for ch in &mut self.channels {
                ch.resize(num_lines);
            }
        } else {
            self.channels.clear();
            for _ in 0..num_channels {
                self.channels.push(ChannelMasker::new(num_lines, sample_rate));
            }
        }

        self.display.resize(num_lines);
        self.block_index = 0;
        self.in_loss_state = false;

        // The bias curve must exist before the first window is shaped.
        let bias = self.bias_built.unwrap_or(0.0);
        self.bias_built = None;
        self.set_bias(bias);
    }

    /// Processes one audio block in place. Every channel slice is both
    /// input and output; slices beyond the prepared channel count are left
    /// untouched.
    pub fn process_block(&mut self, buffers: &mut [&mut [f32]]) {
        let num_samples = buffers
            .iter()
            .take(self.channels.len())
            .map(|b| b.len())
            .min()
            .unwrap_or(0);
        let half = self.window_width / 2;

        let mut input_index = 0;
        while input_index < num_samples {
            // Crossing a half-window boundary: zero the half of the
            // processed ring that the next inverse transform will land in,
            // then run the whole spectral pipeline for this window.
            if self.block_index == 0 {
                for ch in &mut self.channels {
                    for v in &mut ch.processed_samples[half..] {
                        *v = 0.0;
                    }
                }
                self.process_window(0);
            }
            if self.block_index == half {
                for ch in &mut self.channels {
                    for v in &mut ch.processed_samples[..half] {
                        *v = 0.0;
                    }
                }
                self.process_window(half);
            }

            let steps_til_process = if self.block_index < half {
                half - self.block_index
            } else {
                self.window_width - self.block_index
            };
            let steps = steps_til_process.min(num_samples - input_index);

            for (ch, buf) in self.channels.iter_mut().zip(buffers.iter_mut()) {
                for i in 0..steps {
                    let slot = self.block_index + i;
                    // The slot still holds this position's samples from one
                    // window ago: read them for output before overwriting.
                    let dry = ch.raw_samples[slot];
                    let wet = ch.processed_samples[slot];
                    ch.raw_samples[slot] = buf[input_index + i];
                    buf[input_index + i] = wet * self.mix + dry * (1.0 - self.mix);
                }
            }

            self.block_index = (self.block_index + steps) % self.window_width;
            input_index += steps;
        }
    }

    /// Runs the spectral pipeline for the window starting at `start_pos` in
    /// the circular buffers: forward transform, threshold build/apply, one
    /// stuck-state tick with recovery or carry-forward, inverse transform,
    /// display refresh.
    fn process_window(&mut self, start_pos: usize) {
        for ch in &mut self.channels {
            self.mdct
                .forward(&ch.raw_samples, &mut ch.raw_freq_lines, start_pos);
        }

        for ch in &mut self.channels {
            ch.build_threshold(
                &self.kernel,
                self.kernel_center,
                self.masking_amount,
                self.absolute_threshold_level,
                self.speed,
                self.perceptual_curve,
            );
            ch.apply_threshold(self.bit_reduction, self.gate_ratio);
        }

        self.in_loss_state = self.loss_model.tick();
        for ch in &mut self.channels {
            if self.in_loss_state {
                ch.recover_packet();
            } else {
                ch.carry_forward();
            }
        }

        for ch in &mut self.channels {
            self.mdct
                .inverse(&mut ch.processed_samples, &ch.processed_freq_lines, start_pos);
        }

        self.refresh_display();
    }

    /// Channel-averaged dB view of the per-line arrays. Channels are
    /// averaged before squaring, so in-phase content keeps its level while
    /// out-of-phase content cancels.
    fn refresh_display(&mut self) {
        let num_channels = self.channels.len().max(1) as f32;
        for f in 0..self.num_lines {
            let mut raw = 0.0f32;
            let mut proc = 0.0f32;
            let mut thresh = 0.0f32;
            let mut static_thresh = 0.0f32;
            let mut dynamic_thresh = 0.0f32;
            let mut spread = 0.0f32;

            for ch in &self.channels {
                raw += ch.raw_freq_lines[f];
                proc += ch.processed_freq_lines[f];
                thresh += ch.threshold[f];
                static_thresh += ch.static_thresh[f];
                dynamic_thresh += ch.dynamic_thresh[f];
                spread += ch.spread_demo[f];
            }
            raw /= num_channels;
            proc /= num_channels;
            thresh /= num_channels;
            static_thresh /= num_channels;
            dynamic_thresh /= num_channels;
            spread /= num_channels;

            self.display.input[f] = safe_pow_to_db(raw * raw);
            self.display.output[f] = safe_pow_to_db(proc * proc);
            self.display.threshold[f] = safe_pow_to_db(thresh);
            self.display.static_threshold[f] = safe_pow_to_db(static_thresh);
            self.display.dynamic_threshold[f] = safe_pow_to_db(dynamic_thresh);
            self.display.spread[f] = safe_pow_to_db(spread);
        }
    }

    // ------------------------------------------------------------------
    // Parameter setters. Each translates a user-facing control value into
    // the internal coefficient the pipeline consumes.
    // ------------------------------------------------------------------

    /// Masking amount, control range 0..1. Reshaped through the
    /// origin-touching power scale so 0 means "no dynamic threshold at all".
    pub fn set_mask_threshold(&mut self, new_threshold: f32) {
        self.masking_amount = crate::dsp::utils::linpower(new_threshold * 1.4, 1.0);
    }

    /// Spread distance in bands on either side. Rebuilds the triangular
    /// kernel only when its size actually changes.
    pub fn set_spread_distance(&mut self, new_distance: f32) {
        let new_kernel_size = if new_distance < 1.0 {
            1
        } else {
            new_distance.floor() as usize * 2 + 1
        };
        if new_kernel_size == self.kernel.len() {
            return;
        }

        debug!("rebuilding spread kernel, size {}", new_kernel_size);
        if new_kernel_size == 1 {
            self.kernel = vec![1.0];
            self.kernel_center = 0;
            return;
        }

        let center = (new_kernel_size - 1) / 2;
        let mut kernel = vec![0.0f32; new_kernel_size];
        let mut kernel_sum = 0.0f32;
        for (i, k) in kernel.iter_mut().enumerate() {
            let v = 1.0 - ((i as f32 - center as f32) / new_distance).abs();
            *k = v;
            kernel_sum += v;
        }
        // The kernel spreads masking energy around but must never add any,
        // so it is normalized to sum to one.
        for k in kernel.iter_mut() {
            *k /= kernel_sum;
        }

        self.kernel = kernel;
        self.kernel_center = center;
    }

    /// Quantization step in dB; 0 disables quantization.
    pub fn set_bit_reduction(&mut self, new_redux: f32) {
        self.bit_reduction = new_redux;
    }

    /// `probability` is the desired long-run fraction of stuck time,
    /// `length` the average stuck duration in seconds, capped by
    /// `max_length` (at the cap, a stuck state never recovers).
    pub fn set_packet_loss(&mut self, probability: f32, length: f32, max_length: f32) {
        self.loss_model.configure(
            probability,
            length,
            max_length,
            self.sample_rate,
            self.window_width,
        );
    }

    /// Reseed the stuck-state PRNG for reproducible renders. Transition
    /// probabilities are kept.
    pub fn reseed(&mut self, seed: u64) {
        self.loss_model.reseed(seed);
    }

    /// Threshold response time in seconds of audio; clamped at zero
    /// (instant tracking).
    pub fn set_speed(&mut self, new_speed: f32) {
        self.speed = new_speed.max(0.0);
    }

    /// Frequency resolution in lines; a change reinitializes everything.
    pub fn set_window_size(&mut self, new_lines: usize) -> Result<(), ConfigError> {
        if new_lines != self.num_lines {
            self.prepare(new_lines, self.sample_rate, self.num_channels)?;
        }
        Ok(())
    }

    /// Static threshold level, control range 0..1, mapped to a log-domain
    /// scalar spanning 25 orders of magnitude.
    pub fn set_absolute_threshold(&mut self, new_abs_threshold: f32) {
        self.absolute_threshold_level = 10.0f32.powf(new_abs_threshold * 25.0 - 22.0);
    }

    /// Bias tilt, control range -2..2. Rebuilds every channel's bias curve
    /// and the display line, but only when the value actually moves.
    pub fn set_bias(&mut self, new_bias: f32) {
        if self.bias_built == Some(new_bias) {
            return;
        }
        for ch in &mut self.channels {
            ch.build_bias(new_bias);
        }
        self.bias_built = Some(new_bias);
        if let Some(first) = self.channels.first() {
            for (display, &curve) in self.display.bias.iter_mut().zip(&first.bias_curve) {
                *display = curve.log10() * 10.0;
            }
        }
    }

    /// Perceptual curve exponent, 0..1: 0 flattens the static threshold, 1
    /// follows the hearing contour exactly.
    pub fn set_perceptual_curve(&mut self, new_perceptual_curve: f32) {
        self.perceptual_curve = new_perceptual_curve;
    }

    /// Dry/wet mix in percent.
    pub fn set_mix(&mut self, new_mix: f32) {
        self.mix = new_mix / 100.0;
    }

    /// Gate compression ratio, >= 1. At 1 the gate is transparent.
    pub fn set_gate_ratio(&mut self, new_ratio: f32) {
        self.gate_ratio = new_ratio;
    }

    // ------------------------------------------------------------------
    // Readback.
    // ------------------------------------------------------------------

    /// Whether the stuck-state simulator currently reports a loss.
    pub fn is_stuck(&self) -> bool {
        self.in_loss_state
    }

    /// Display arrays, refreshed once per processed window.
    pub fn display(&self) -> &DisplayLines {
        &self.display
    }

    /// Engine latency in samples (one full window).
    pub fn latency_samples(&self) -> usize {
        self.window_width
    }

    pub fn num_lines(&self) -> usize {
        self.num_lines
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    /// Current spreading kernel (normalized to sum to one).
    pub fn spread_kernel(&self) -> &[f32] {
        &self.kernel
    }
}
