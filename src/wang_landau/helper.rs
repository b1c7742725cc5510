use average::Mean;

/// # Occupation probabilities of a free-energy profile
///
/// Converts a free-energy vector into the normalized Boltzmann
/// state-occupation probabilities (kT = 1). The maximum is subtracted
/// before exponentiating to keep the exponential well-behaved.
///
/// * pure: the input is never mutated, the result is a new owned vector
/// * the result sums to 1 and is invariant under adding a constant to `f`
pub fn free_energy_to_prob(f: &[f64]) -> Vec<f64> {
    let max = f.iter()
        .copied()
        .fold(f64::NAN, f64::max);

    let mut prob: Vec<f64> = f.iter()
        .map(|&val| (-(val - max)).exp())
        .collect();

    let sum: f64 = prob.iter().sum();
    prob.iter_mut()
        .for_each(|p| *p /= sum);
    prob
}

/// # Root-mean-square error between `data` and `reference`
///
/// Diagnostic only - the simulation never reads it back.
///
/// **panics** in debug mode if the lengths differ
pub fn calc_rmse(data: &[f64], reference: &[f64]) -> f64 {
    debug_assert_eq!(data.len(), reference.len());
    let mse: Mean = data.iter()
        .zip(reference.iter())
        .map(|(&a, &b)| (a - b) * (a - b))
        .collect();
    mse.mean().sqrt()
}

/// # Flatness criterion
///
/// A histogram is flat if every count lies within the ratio band
/// `(threshold, 1/threshold)` around the mean count, i.e., for all `i`:
/// `hist[i] / mean > threshold` and `mean / hist[i] > threshold`.
///
/// A histogram with zero mean (nothing sampled since the last reset) is
/// never flat - the division by zero of a naive implementation must not
/// leak out as NaN.
pub fn histogram_is_flat(hist: &[f64], threshold: f64) -> bool {
    let mean: Mean = hist.iter().copied().collect();
    let mean = mean.mean();
    if mean <= 0.0 {
        return false;
    }
    hist.iter()
        .all(|&count| {
            let ratio = count / mean;
            ratio > threshold && ratio.recip() > threshold
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prob_is_normalized() {
        let f = [0.0, 1.0, -2.5, 3.0, 0.7];
        let p = free_energy_to_prob(&f);
        assert_eq!(p.len(), f.len());
        assert!(p.iter().all(|&val| val >= 0.0));
        let sum: f64 = p.iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn prob_is_shift_invariant() {
        let f = [0.3, -1.0, 2.0, 0.0];
        let shifted: Vec<f64> = f.iter().map(|v| v + 123.456).collect();
        let p = free_energy_to_prob(&f);
        let p_shifted = free_energy_to_prob(&shifted);
        for (a, b) in p.iter().zip(p_shifted.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn prob_prefers_low_free_energy() {
        let p = free_energy_to_prob(&[0.0, 1.0]);
        assert!(p[0] > p[1]);
        // p0 / p1 = exp(1)
        assert!((p[0] / p[1] - 1.0_f64.exp()).abs() < 1e-12);
    }

    #[test]
    fn rmse_known_value() {
        let rmse = calc_rmse(&[1.0, 2.0, 3.0], &[0.0, 2.0, 5.0]);
        // mean of [1, 0, 4] is 5/3
        assert!((rmse - (5.0_f64 / 3.0).sqrt()).abs() < 1e-12);
        assert_eq!(calc_rmse(&[0.5, 0.5], &[0.5, 0.5]), 0.0);
    }

    #[test]
    fn uniform_histogram_is_flat() {
        let hist = [12.0, 12.0, 12.0, 12.0];
        assert!(histogram_is_flat(&hist, 0.8));
        // every count equals the mean, so any threshold below 1 passes
        assert!(histogram_is_flat(&hist, 0.999));
    }

    #[test]
    fn empty_bin_is_not_flat() {
        let hist = [0.0, 100.0, 100.0, 100.0];
        assert!(!histogram_is_flat(&hist, 0.95));
    }

    #[test]
    fn zero_mean_histogram_is_not_flat() {
        let hist = [0.0, 0.0, 0.0];
        assert!(!histogram_is_flat(&hist, 0.8));
    }
}
