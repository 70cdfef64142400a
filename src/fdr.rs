//! False discovery rate control
//!
//! Given the artifact probabilities of a whole call set, passing every call with
//! probability at most `t` has an expected FDR equal to the mean probability of the
//! passing calls. Sorted ascending, that mean is non-decreasing in the number of calls
//! admitted, so the largest admissible prefix is found in one walk.

use log::warn;
use serde::{Deserialize, Serialize};

/// Threshold that lets every call through
pub const FILTER_NOTHING_THRESHOLD: f64 = 1.0;
/// Threshold that filters every call with non-zero artifact probability
pub const FILTER_EVERYTHING_THRESHOLD: f64 = 0.0;

/// Calibration summary of one filter, or of the combined decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterStats {
    pub filter_name: String,
    pub threshold: f64,
    #[serde(rename = "expected_fps")]
    pub expected_false_positives: f64,
    pub expected_fdr: f64,
    pub requested_fdr: f64,
    #[serde(rename = "num_passing_variants")]
    pub num_passing: usize,
}

impl FilterStats {
    /// Stats of a pass set with the given expected false positive count
    pub fn new(
        filter_name: &str,
        threshold: f64,
        expected_false_positives: f64,
        num_passing: usize,
        requested_fdr: f64,
    ) -> Self {
        let expected_fdr = if num_passing == 0 {
            0.0
        } else {
            expected_false_positives / num_passing as f64
        };
        Self {
            filter_name: filter_name.to_string(),
            threshold,
            expected_false_positives,
            expected_fdr,
            requested_fdr,
            num_passing,
        }
    }
}

fn sorted_finite(probabilities: &[f64], filter_name: &str) -> Vec<f64> {
    let mut sorted: Vec<f64> = probabilities.iter().copied().filter(|p| !p.is_nan()).collect();
    let dropped = probabilities.len() - sorted.len();
    if dropped > 0 {
        warn!(
            "Dropped {} NaN artifact probabilities before calibrating {}",
            dropped, filter_name
        );
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted
}

/// Calibrate a decision threshold keeping the expected FDR of passing calls at or below
/// `requested_fdr`.
///
/// A call passes when its probability is at most the threshold. The cut never falls
/// inside a group of equal probabilities: such a group is filtered as a whole.
pub fn calibrate(filter_name: &str, probabilities: &[f64], requested_fdr: f64) -> FilterStats {
    let sorted = sorted_finite(probabilities, filter_name);

    let mut cumulative_expected_fps = 0.0;
    for (i, &probability) in sorted.iter().enumerate() {
        let expected_fdr = (cumulative_expected_fps + probability) / (i + 1) as f64;
        if expected_fdr > requested_fdr {
            // back up to the start of the tie group
            let cut = sorted[..i].partition_point(|&p| p < probability);
            let threshold = if cut == 0 {
                FILTER_EVERYTHING_THRESHOLD
            } else {
                sorted[cut - 1]
            };
            let expected_fps: f64 = sorted[..cut].iter().sum();
            return FilterStats::new(filter_name, threshold, expected_fps, cut, requested_fdr);
        }
        cumulative_expected_fps += probability;
    }

    FilterStats::new(
        filter_name,
        FILTER_NOTHING_THRESHOLD,
        cumulative_expected_fps,
        sorted.len(),
        requested_fdr,
    )
}

/// Threshold only, see [`calibrate`]
pub fn calculate_threshold(probabilities: &[f64], requested_fdr: f64) -> f64 {
    calibrate("", probabilities, requested_fdr).threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_degenerate_collections() {
        assert_eq!(calculate_threshold(&[0.0; 50], 0.05), FILTER_NOTHING_THRESHOLD);
        assert_eq!(calculate_threshold(&[1.0; 50], 0.0), FILTER_EVERYTHING_THRESHOLD);
        assert_eq!(calculate_threshold(&[], 0.05), FILTER_NOTHING_THRESHOLD);

        let empty = calibrate("empty", &[], 0.05);
        assert_eq!(empty.num_passing, 0);
        assert_eq!(empty.expected_fdr, 0.0);
    }

    #[test]
    fn test_threshold_is_last_admissible_probability() {
        // running means: 0.0, 0.05, 0.1, 0.15
        let stats = calibrate("t", &[0.3, 0.0, 0.1, 0.2], 0.12);
        assert_eq!(stats.threshold, 0.2);
        assert_eq!(stats.num_passing, 3);
        assert_relative_eq!(stats.expected_false_positives, 0.3, epsilon = 1e-12);
        assert_relative_eq!(stats.expected_fdr, 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_first_probability_violates() {
        let stats = calibrate("t", &[0.5, 0.6], 0.1);
        assert_eq!(stats.threshold, FILTER_EVERYTHING_THRESHOLD);
        assert_eq!(stats.num_passing, 0);
    }

    #[test]
    fn test_equality_does_not_violate() {
        assert_eq!(calculate_threshold(&[0.25, 0.25, 0.25], 0.25), FILTER_NOTHING_THRESHOLD);
    }

    #[test]
    fn test_tie_group_is_not_split() {
        // the fourth value violates but equals the third, so both are filtered
        let stats = calibrate("t", &[0.0, 0.0, 0.2, 0.2], 0.08);
        assert_eq!(stats.threshold, 0.0);
        assert_eq!(stats.num_passing, 2);
    }

    #[test]
    fn test_nan_probabilities_are_dropped() {
        let stats = calibrate("t", &[f64::NAN, 0.0, 0.0], 0.05);
        assert_eq!(stats.threshold, FILTER_NOTHING_THRESHOLD);
        assert_eq!(stats.num_passing, 2);
    }

    #[test]
    fn test_realized_fdr_never_exceeds_request() {
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..120 {
            let n = rng.gen_range(10..=10_000);
            let skew = rng.gen_range(1..=8);
            let coarse = rng.gen_bool(0.3);
            let probabilities: Vec<f64> = (0..n)
                .map(|_| {
                    let p = rng.gen::<f64>().powi(skew);
                    if coarse {
                        (p * 20.0).round() / 20.0
                    } else {
                        p
                    }
                })
                .collect();
            let requested = rng.gen_range(0.0..0.3);

            let threshold = calculate_threshold(&probabilities, requested);
            let passing: Vec<f64> = probabilities.iter().copied().filter(|&p| p <= threshold).collect();
            if !passing.is_empty() {
                let realized = passing.iter().sum::<f64>() / passing.len() as f64;
                assert!(
                    realized <= requested + 1e-9,
                    "realized {} exceeds requested {}",
                    realized,
                    requested
                );
            }
        }
    }
}
