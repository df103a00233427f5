//! Fractional Kelly position sizing generalized from a win-probability
//! formula to one driven by edge, expectancy, variance, and sample count:
//! thin samples shrink the fraction toward zero rather than trusting a
//! single noisy estimate.

const MAX_KELLY_CAP: f64 = 0.20;
const MIN_SAMPLE_COUNT_FOR_FULL_TRUST: f64 = 30.0;

/// `expected_edge` is the raw signal edge in [-1, 1]; `signal_expectancy`
/// and `signal_variance` describe the historical per-trade return
/// distribution for this signal family; `sample_count` is how many prior
/// trades back that distribution. `max_fraction` is a caller-supplied
/// ceiling (e.g. a policy override) applied after the hard cap.
pub fn compute_fractional_kelly_fraction(
    expected_edge: f64,
    signal_expectancy: f64,
    signal_variance: f64,
    sample_count: u32,
    max_fraction: f64,
) -> f64 {
    if expected_edge <= 0.0 || signal_variance <= 0.0 {
        return 0.0;
    }

    // f* = expectancy / variance is the continuous-outcome Kelly fraction
    // (the binary p/q formula's generalization to an arbitrary return
    // distribution).
    let raw_fraction = (signal_expectancy / signal_variance).max(0.0);

    // blend the signal's own edge in as a sanity multiplier: an edge near
    // zero should never produce a large fraction even if the historical
    // expectancy/variance ratio is favorable.
    let edge_scaled = raw_fraction * expected_edge.clamp(0.0, 1.0);

    let trust = (sample_count as f64 / MIN_SAMPLE_COUNT_FOR_FULL_TRUST).clamp(0.0, 1.0);
    let trusted_fraction = edge_scaled * trust;

    trusted_fraction.min(MAX_KELLY_CAP).min(max_fraction.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_edge_yields_zero_fraction() {
        assert_eq!(compute_fractional_kelly_fraction(0.0, 1.0, 1.0, 100, 0.2), 0.0);
    }

    #[test]
    fn thin_sample_shrinks_toward_zero() {
        let thin = compute_fractional_kelly_fraction(0.1, 0.5, 1.0, 1, 0.2);
        let thick = compute_fractional_kelly_fraction(0.1, 0.5, 1.0, 60, 0.2);
        assert!(thin < thick);
    }

    #[test]
    fn respects_hard_cap_and_caller_max() {
        let fraction = compute_fractional_kelly_fraction(1.0, 10.0, 0.01, 1000, 0.2);
        assert!(fraction <= MAX_KELLY_CAP + 1e-9);

        let fraction2 = compute_fractional_kelly_fraction(1.0, 10.0, 0.01, 1000, 0.05);
        assert!(fraction2 <= 0.05 + 1e-9);
    }

    #[test]
    fn negative_variance_or_edge_is_rejected() {
        assert_eq!(compute_fractional_kelly_fraction(-0.1, 0.5, 1.0, 50, 0.2), 0.0);
        assert_eq!(compute_fractional_kelly_fraction(0.1, 0.5, 0.0, 50, 0.2), 0.0);
    }
}
