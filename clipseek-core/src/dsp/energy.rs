//! Sliding-window signal energy in linear time.
//!
//! ## Algorithm
//!
//! 1. Build `prefix[0] = 0`, `prefix[i + 1] = prefix[i] + x[i]²` (f64).
//! 2. `energy[i] = sqrt(prefix[i + w] − prefix[i])` for `i in 0..=n − w`.
//!
//! Cancellation in the subtraction can leave a tiny negative residue over
//! silent stretches; it is clamped to zero before the square root.

/// Root of the summed squares of every length-`window` run of `x`.
///
/// Returns `x.len() − window + 1` values, or nothing when `window` is zero or
/// longer than `x`.
pub fn sliding_energy(x: &[f32], window: usize) -> Vec<f64> {
    if window == 0 || window > x.len() {
        return Vec::new();
    }

    let mut prefix = Vec::with_capacity(x.len() + 1);
    prefix.push(0.0f64);
    let mut acc = 0.0f64;
    for &s in x {
        let s = f64::from(s);
        acc += s * s;
        prefix.push(acc);
    }

    prefix
        .windows(window + 1)
        .map(|w| (w[window] - w[0]).max(0.0).sqrt())
        .collect()
}
