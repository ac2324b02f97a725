//! Serializable parameter set.
//!
//! A plain-data snapshot of every user-facing control, with the same ranges
//! and defaults the engine setters expect. Deserializing a partial JSON
//! document fills the missing fields from the defaults, so preset files only
//! need to name what they change.

use serde::{Deserialize, Serialize};

use crate::dsp::engine::MaskingEngine;
use crate::dsp::ConfigError;

/// Ceiling of the loss-length control. At the ceiling a stuck state never
/// recovers.
pub const MAX_LOSS_LENGTH: f32 = 3.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    /// Masking amount, 0..1.
    pub mask: f32,
    /// Static threshold level, 0..1.
    pub absolute: f32,
    /// Spread distance in bands, 0..10.
    pub spread: f32,
    /// Quantization step in dB, 0..100. 0 disables quantization.
    pub quantization: f32,
    /// Threshold response time in seconds, 0..1.
    pub speed: f32,
    /// Long-run fraction of stuck time, 0..1.
    pub loss_probability: f32,
    /// Average stuck duration in seconds, 0..[`MAX_LOSS_LENGTH`].
    pub loss_length: f32,
    /// Spectral tilt, -2..2. 0 is flat.
    pub bias: f32,
    /// Perceptual curve exponent, 0..1.
    pub curve: f32,
    /// Dry/wet mix in percent, 0..100.
    pub mix: f32,
    /// Gate compression ratio, 1..100.
    pub gate_ratio: f32,
    /// Frequency lines per window; the window is twice this and must be a
    /// power of two.
    pub lines: usize,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            mask: 0.5,
            absolute: 0.0,
            spread: 2.0,
            quantization: 0.0,
            speed: 0.0,
            loss_probability: 0.0,
            loss_length: 0.5,
            bias: 0.0,
            curve: 1.0,
            mix: 100.0,
            gate_ratio: 100.0,
            lines: 1024,
        }
    }
}

impl Params {
    /// Pushes every field into the engine. The window size runs after the
    /// cheap scalar setters and before the loss and bias settings, because
    /// a resize reinitializes the per-channel state those two configure.
    pub fn apply(&self, engine: &mut MaskingEngine) -> Result<(), ConfigError> {
        engine.set_mask_threshold(self.mask);
        engine.set_absolute_threshold(self.absolute);
        engine.set_spread_distance(self.spread);
        engine.set_bit_reduction(self.quantization);
        engine.set_speed(self.speed);
        engine.set_perceptual_curve(self.curve);
        engine.set_mix(self.mix);
        engine.set_gate_ratio(self.gate_ratio);
        engine.set_window_size(self.lines)?;
        engine.set_packet_loss(
            self.loss_probability,
            self.loss_length.min(MAX_LOSS_LENGTH),
            MAX_LOSS_LENGTH,
        );
        engine.set_bias(self.bias);
        Ok(())
    }
}
