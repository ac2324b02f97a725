//! Threshold-of-hearing table.
//!
//! Fixed (frequency, level) pairs along the threshold-in-quiet contour,
//! with levels stored as linear power so they can be blended directly into
//! the static masking threshold. Lookups interpolate linearly between the
//! bracketing entries and clamp flat outside the table.

/// Threshold-in-quiet contour. Frequencies in Hz, strictly increasing;
/// levels are `10^(dB/10)` of the contour value at that frequency.
const THRESHOLD_TABLE: [[f32; 2]; 26] = [
    [20.0, 2.0986e8],
    [30.0, 1.0382e6],
    [40.0, 6.0142e4],
    [50.0, 9.9451e3],
    [70.0, 1.1320e3],
    [100.0, 1.9737e2],
    [150.0, 4.5580e1],
    [200.0, 2.0752e1],
    [300.0, 8.9279],
    [400.0, 5.6682],
    [500.0, 4.2450],
    [700.0, 2.9714],
    [1000.0, 2.1722],
    [1500.0, 1.4813],
    [2000.0, 0.94377],
    [3000.0, 0.34948],
    [3400.0, 0.31915],
    [4000.0, 0.45840],
    [5000.0, 1.1173],
    [6000.0, 1.6152],
    [8000.0, 3.0100],
    [10000.0, 1.1421e1],
    [12500.0, 3.0879e2],
    [15000.0, 1.2712e5],
    [18000.0, 3.4170e10],
    [20000.0, 1.0793e16],
];

fn interpolate(x1: f32, y1: f32, x2: f32, y2: f32, x_mid: f32) -> f32 {
    if x1 == x2 {
        return y1;
    }
    ((y2 - y1) / (x2 - x1)) * (x_mid - x1) + y1
}

/// Threshold level at `frequency`, linearly interpolated between the two
/// bracketing table entries. Below the first entry or above the last the
/// nearest boundary value is returned unextrapolated.
pub fn level_at(frequency: f32) -> f32 {
    let mut prev = &THRESHOLD_TABLE[0];
    for entry in &THRESHOLD_TABLE {
        if entry[0] > frequency {
            return interpolate(prev[0], prev[1], entry[0], entry[1], frequency);
        }
        prev = entry;
    }
    prev[1]
}

/// Recomputes the per-line threshold array from scratch. O(lines x table),
/// which is fine because this only runs when the sample rate or line count
/// changes, never per audio block.
pub fn fill_threshold(thresh: &mut [f32], sample_rate: f32) {
    let num_lines = thresh.len();
    for (l, t) in thresh.iter_mut().enumerate() {
        let freq = sample_rate * l as f32 / num_lines as f32;
        *t = level_at(freq);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_table_points() {
        assert!((level_at(1000.0) - 2.1722).abs() < 1e-4);
        assert!((level_at(100.0) - 197.37).abs() < 1e-1);
    }

    #[test]
    fn interpolates_between_entries() {
        // Halfway between 500 Hz (4.2450) and 700 Hz (2.9714).
        let mid = level_at(600.0);
        assert!((mid - (4.2450 + 2.9714) / 2.0).abs() < 1e-3);
        // Between entries, the value is bounded by its neighbors.
        let v = level_at(1200.0);
        assert!(v < level_at(1000.0) && v > level_at(1500.0));
    }

    #[test]
    fn clamps_flat_outside_the_table() {
        assert_eq!(level_at(5.0), level_at(20.0));
        assert_eq!(level_at(0.0), level_at(20.0));
        assert_eq!(level_at(30000.0), level_at(20000.0));
    }

    #[test]
    fn fill_covers_every_line() {
        let mut thresh = vec![0.0f32; 64];
        fill_threshold(&mut thresh, 44100.0);
        assert!(thresh.iter().all(|&v| v > 0.0));
        // Line 0 sits at 0 Hz, clamped to the table's low boundary.
        assert_eq!(thresh[0], level_at(20.0));
    }
}
