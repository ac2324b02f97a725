//! Per-line exponential moving average of instantaneous power.

use crate::dsp::ConfigError;

/// Smooths the squared value of each frequency line over time. The decay
/// time sets how quickly the mean chases new energy; zero means instant
/// tracking (no smoothing at all).
pub struct EnergySmoother {
    mean: Vec<f32>,
    coeff: f32,
    decay_time: f32,
}

impl EnergySmoother {
    pub fn new() -> Self {
        Self {
            mean: Vec::new(),
            coeff: 1.0,
            decay_time: 0.0,
        }
    }

    /// `num_samples` is the decay time constant in ticks. Unchanged values
    /// are a no-op so callers can set this every block without recomputing
    /// the exponential.
    pub fn set_decay_time(&mut self, num_samples: f32) -> Result<(), ConfigError> {
        if num_samples == self.decay_time {
            return Ok(());
        }
        if num_samples > 0.0 {
            self.decay_time = num_samples;
            self.coeff = 1.0 - (-2.2 / num_samples).exp();
            return Ok(());
        }
        if num_samples == 0.0 {
            self.decay_time = num_samples;
            self.coeff = 1.0;
            return Ok(());
        }
        Err(ConfigError::DecayTime {
            samples: num_samples,
        })
    }

    /// Folds one frame of line values into the running mean. A length change
    /// resizes the state and resets it to zero; that is the intended
    /// response to a window-size change upstream, not an error.
    pub fn tick(&mut self, values: &[f32]) {
        if values.len() != self.mean.len() {
            self.mean = vec![0.0; values.len()];
        }
        for (mean, &v) in self.mean.iter_mut().zip(values) {
            let energy = v * v;
            *mean += self.coeff * (energy - *mean);
        }
    }

    pub fn mean(&self) -> &[f32] {
        &self.mean
    }
}

impl Default for EnergySmoother {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_decay_tracks_instantaneously() {
        let mut s = EnergySmoother::new();
        s.set_decay_time(0.0).unwrap();
        s.tick(&[1.0]);
        assert_eq!(s.mean(), &[1.0]);
        s.tick(&[0.0]);
        assert_eq!(s.mean(), &[0.0]);
        s.tick(&[-2.0]);
        assert_eq!(s.mean(), &[4.0]); // squared, sign discarded
    }

    #[test]
    fn negative_decay_is_rejected() {
        let mut s = EnergySmoother::new();
        assert!(s.set_decay_time(-1.0).is_err());
        // Prior coefficient untouched: still instant.
        s.tick(&[3.0]);
        assert_eq!(s.mean(), &[9.0]);
    }

    #[test]
    fn positive_decay_approaches_steady_state() {
        let mut s = EnergySmoother::new();
        s.set_decay_time(10.0).unwrap();
        for _ in 0..200 {
            s.tick(&[1.0]);
        }
        assert!((s.mean()[0] - 1.0).abs() < 1e-4);
        // One tick of silence only partially decays the mean.
        s.tick(&[0.0]);
        assert!(s.mean()[0] > 0.5 && s.mean()[0] < 1.0);
    }

    #[test]
    fn length_change_resets_state() {
        let mut s = EnergySmoother::new();
        s.tick(&[1.0, 1.0]);
        assert_eq!(s.mean().len(), 2);
        s.tick(&[0.5, 0.5, 0.5]);
        assert_eq!(s.mean().len(), 3);
        // Old means were discarded, so one instant tick is all that remains.
        assert!(s.mean().iter().all(|&m| (m - 0.25).abs() < 1e-6));
    }
}
