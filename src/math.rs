//! Log-space arithmetic and small numerical routines shared by the models and filters

use crate::{SomaFilterError, SomaFilterResult};
use statrs::distribution::{Binomial, Discrete, DiscreteCDF};

pub const LOG10_OF_E: f64 = std::f64::consts::LOG10_E;
pub const LOG10_ONE_HALF: f64 = -std::f64::consts::LOG10_2;

/// log10(sum_i 10^x_i), stable for large magnitudes
pub fn log10_sum_log10(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    if max == f64::INFINITY {
        return f64::INFINITY;
    }
    let sum: f64 = values.iter().map(|x| 10f64.powf(x - max)).sum();
    max + sum.log10()
}

/// ln(sum_i e^x_i)
pub fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    let sum: f64 = values.iter().map(|x| (x - max).exp()).sum();
    max + sum.ln()
}

/// Turn unnormalized log10 weights into probabilities that sum to one
pub fn normalize_from_log10(log10_values: &[f64]) -> Vec<f64> {
    let total = log10_sum_log10(log10_values);
    if !total.is_finite() {
        // every entry is -inf: fall back to uniform
        let n = log10_values.len().max(1) as f64;
        return vec![1.0 / n; log10_values.len()];
    }
    log10_values
        .iter()
        .map(|x| 10f64.powf(x - total))
        .collect()
}

/// Natural-log counterpart of [`normalize_from_log10`]
pub fn normalize_from_log(log_values: &[f64]) -> Vec<f64> {
    let log10_values: Vec<f64> = log_values.iter().map(|x| x * LOG10_OF_E).collect();
    normalize_from_log10(&log10_values)
}

/// x * log10(x) with the 0 * log(0) = 0 convention
pub fn x_log10_x(x: f64) -> f64 {
    if x == 0.0 {
        0.0
    } else {
        x * x.log10()
    }
}

/// x * log10(y) with the 0 * log(0) = 0 convention
pub fn x_log10_y(x: f64, y: f64) -> f64 {
    if x == 0.0 {
        0.0
    } else {
        x * y.log10()
    }
}

pub fn index_of_max(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

pub fn max_value(values: &[f64]) -> Option<f64> {
    index_of_max(values).map(|i| values[i])
}

fn binomial(trials: u64, p: f64) -> SomaFilterResult<Binomial> {
    Binomial::new(p, trials).map_err(|e| {
        SomaFilterError::InvalidParameters(format!("binomial(n={}, p={}): {}", trials, p, e))
    })
}

/// P(X = successes) for X ~ Binomial(trials, p)
pub fn binomial_probability(trials: u64, successes: u64, p: f64) -> SomaFilterResult<f64> {
    if successes > trials {
        return Ok(0.0);
    }
    Ok(binomial(trials, p)?.pmf(successes))
}

/// P(X >= successes) for X ~ Binomial(trials, p)
pub fn binomial_upper_tail(trials: u64, successes: u64, p: f64) -> SomaFilterResult<f64> {
    if successes == 0 {
        return Ok(1.0);
    }
    if successes > trials {
        return Ok(0.0);
    }
    Ok(binomial(trials, p)?.sf(successes - 1))
}

/// Phred-scaled error probability to a linear probability
pub fn qual_to_error_prob(qual: f64) -> f64 {
    10f64.powf(-qual / 10.0)
}

/// Bisection root finder on [lower, upper].
///
/// Returns `None` when the root is not bracketed by the interval.
pub fn bisect<F>(f: F, lower: f64, upper: f64, max_iterations: usize, tolerance: f64) -> Option<f64>
where
    F: Fn(f64) -> f64,
{
    let (mut lo, mut hi) = (lower, upper);
    let mut f_lo = f(lo);
    let f_hi = f(hi);

    if f_lo == 0.0 {
        return Some(lo);
    }
    if f_hi == 0.0 {
        return Some(hi);
    }
    if !f_lo.is_finite() || !f_hi.is_finite() || f_lo.signum() == f_hi.signum() {
        return None;
    }

    for _ in 0..max_iterations {
        let mid = 0.5 * (lo + hi);
        let f_mid = f(mid);
        if f_mid == 0.0 || (hi - lo) < tolerance {
            return Some(mid);
        }
        if f_mid.signum() == f_lo.signum() {
            lo = mid;
            f_lo = f_mid;
        } else {
            hi = mid;
        }
    }

    Some(0.5 * (lo + hi))
}
