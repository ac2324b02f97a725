//! Shared scalar helpers for the dB-domain gate and the display scaling.

/// dB value reported for non-positive power, instead of -inf/NaN.
pub const DB_FLOOR: f32 = -10000.0;

pub fn amplitude_to_db(amplitude: f32) -> f32 {
    20.0 * amplitude.abs().log10()
}

pub fn power_to_db(power: f32) -> f32 {
    10.0 * power.log10()
}

pub fn db_to_amplitude(db: f32) -> f32 {
    10.0f32.powf(db / 20.0)
}

pub fn db_to_power(db: f32) -> f32 {
    10.0f32.powf(db / 10.0)
}

/// Like [`power_to_db`] but clamps non-positive input to [`DB_FLOOR`] rather
/// than producing -inf or NaN. Used everywhere a display line is built.
pub fn safe_pow_to_db(power: f32) -> f32 {
    if power <= 0.0 {
        DB_FLOOR
    } else {
        power.log10() * 10.0
    }
}

/// A mostly-power control scale that still passes through the origin.
///
/// Above `transition_point` the response is purely exponential
/// (`10^(4x - 1)`); below it, the exponential is scaled linearly down to
/// exactly zero so that a control value of 0 means "off" instead of a small
/// residual amount.
pub fn linpower(input: f32, transition_point: f32) -> f32 {
    let log = 10.0f32.powf(input * 4.0 - 1.0);
    if input > transition_point {
        return log;
    }
    if input <= 0.0 {
        return 0.0;
    }
    log * (input / transition_point)
}
