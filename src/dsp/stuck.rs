//! Gilbert-Elliott stuck-state simulator.
//!
//! Two-state Markov chain emulating bursty packet loss: a normal state and a
//! "stuck" state that the engine responds to by freezing the previous
//! spectral frame. Bursts arise naturally from the chain staying in the
//! stuck state for a geometrically distributed number of ticks.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

pub struct GilbertElliott {
    /// Probability of entering the stuck state on a normal tick.
    enter: f32,
    /// Probability of leaving the stuck state on a stuck tick.
    exit: f32,
    stuck: bool,
    rng: SmallRng,
}

impl GilbertElliott {
    pub fn new() -> Self {
        Self::from_rng(SmallRng::from_entropy())
    }

    /// Deterministic construction for tests and reproducible renders.
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(SmallRng::seed_from_u64(seed))
    }

    fn from_rng(rng: SmallRng) -> Self {
        Self {
            enter: 0.0,
            exit: 0.0,
            stuck: false,
            rng,
        }
    }

    /// Derives the transition probabilities from user-facing terms.
    ///
    /// `prob` is the desired long-run fraction of time spent stuck, `length`
    /// the average stuck duration in seconds, `block_width` the number of
    /// samples between ticks. A `length` at or beyond `max_length` is the
    /// ceiling case: the exit probability drops to zero, so once the chain
    /// sticks it never recovers.
    ///
    /// With exit probability q, the expected stuck run is (1 - q)/q ticks,
    /// so q = 1/(ticks + 1). The chain's stationary distribution is [q, p],
    /// giving p/(q + p) stuck fraction; solving for p: p = q * r/(1 - r).
    pub fn configure(
        &mut self,
        prob: f32,
        length: f32,
        max_length: f32,
        sample_rate: f32,
        block_width: usize,
    ) {
        if length >= max_length {
            self.exit = 0.0;
        } else {
            let ticks = length * sample_rate / block_width as f32;
            self.exit = 1.0 / (ticks + 1.0);
        }

        if prob >= 1.0 {
            self.enter = 1.0;
        } else {
            self.enter = (self.exit * prob / (1.0 - prob)).min(1.0);
        }
    }

    /// Replaces the generator without disturbing the transition
    /// probabilities, for reproducible renders.
    pub fn reseed(&mut self, seed: u64) {
        self.rng = SmallRng::seed_from_u64(seed);
    }

    /// Advances the chain one tick and returns the post-transition state.
    pub fn tick(&mut self) -> bool {
        let random: f32 = self.rng.gen();
        if self.stuck && random < self.exit {
            self.stuck = false;
        } else if !self.stuck && random < self.enter {
            self.stuck = true;
        }
        self.stuck
    }

    pub fn is_stuck(&self) -> bool {
        self.stuck
    }
}

impl Default for GilbertElliott {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_probability_never_sticks() {
        let mut model = GilbertElliott::with_seed(7);
        model.configure(0.0, 0.5, 3.0, 44100.0, 2048);
        for _ in 0..10_000 {
            assert!(!model.tick());
        }
    }

    #[test]
    fn ceiling_length_sticks_permanently() {
        let mut model = GilbertElliott::with_seed(11);
        model.configure(0.5, 3.0, 3.0, 44100.0, 2048);
        let mut entered = false;
        for _ in 0..10_000 {
            if model.tick() {
                entered = true;
            }
            if entered {
                assert!(model.is_stuck());
            }
        }
        assert!(entered);
    }

    #[test]
    fn certain_probability_sticks_on_first_tick() {
        let mut model = GilbertElliott::with_seed(3);
        model.configure(1.0, 0.5, 3.0, 44100.0, 2048);
        assert!(model.tick());
    }

    #[test]
    fn stationary_fraction_matches_target() {
        // Short bursts so the chain mixes quickly relative to the run length.
        let targets = [0.1f32, 0.3, 0.5];
        for &target in &targets {
            let mut model = GilbertElliott::with_seed(42);
            // length * sample_rate / block_width = 1 tick, so exit = 0.5.
            model.configure(target, 1.0, 3.0, 2048.0, 2048);
            let runs = 200_000;
            let mut stuck_ticks = 0u32;
            for _ in 0..runs {
                if model.tick() {
                    stuck_ticks += 1;
                }
            }
            let observed = stuck_ticks as f32 / runs as f32;
            assert!(
                (observed - target).abs() < 0.02,
                "target {target}, observed {observed}"
            );
        }
    }
}
