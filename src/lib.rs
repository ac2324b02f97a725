//! Real-time psychoacoustic audio shaping engine.
//!
//! Converts a stream of time-domain samples into a masked/quantized version
//! of the same signal. The signal path: raw samples feed an overlap buffer,
//! a critically-sampled cosine transform (MDCT) produces frequency lines, a
//! per-channel perceptual model builds a masking threshold from smoothed
//! line energy, a gate/quantizer attenuates lines below that threshold, a
//! Gilbert-Elliott "stuck packet" simulator can freeze spectral frames, and
//! the inverse transform overlap-adds the result back into a continuous
//! waveform that is mixed with the dry signal.
//!
//! The integrating layer (a plugin shell, a CLI, a test harness) is expected
//! to push parameter values through the [`MaskingEngine`] setters before each
//! call to [`MaskingEngine::process_block`], and may read back the dB-scaled
//! display arrays afterwards. The engine itself is single-threaded and does
//! not allocate in the steady-state processing path; only reconfiguration
//! (window size, channel count, kernel size) allocates.

pub mod dsp;
pub mod params;

pub use dsp::engine::{DisplayLines, MaskingEngine};
pub use dsp::ConfigError;
pub use params::Params;
