//! Dirichlet distribution over multinomial weights and its two-dimensional Beta specialisation
//!
//! The Dirichlet is conjugate to the multinomial: observing category `i` `n_i` times
//! turns concentration `alpha_i` into `alpha_i + n_i`.

use crate::math::LOG10_OF_E;
use crate::{SomaFilterError, SomaFilterResult};
use serde::{Deserialize, Serialize};
use statrs::function::gamma::{digamma, ln_gamma};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dirichlet {
    alpha: Vec<f64>,
}

impl Dirichlet {
    pub fn new(alpha: Vec<f64>) -> SomaFilterResult<Self> {
        if alpha.is_empty() {
            return Err(SomaFilterError::InvalidParameters(
                "Dirichlet parameters must have at least one element".to_string(),
            ));
        }
        if alpha.iter().any(|a| !a.is_finite()) {
            return Err(SomaFilterError::InvalidParameters(format!(
                "Dirichlet parameters must be finite: {:?}",
                alpha
            )));
        }
        if alpha.iter().any(|&a| a < 0.0) {
            return Err(SomaFilterError::InvalidParameters(format!(
                "Dirichlet parameters may not be negative: {:?}",
                alpha
            )));
        }
        if alpha.iter().all(|&a| a == 0.0) {
            return Err(SomaFilterError::InvalidParameters(
                "Dirichlet parameters may not all be zero".to_string(),
            ));
        }
        Ok(Self { alpha })
    }

    /// Dir(1, 1, ..., 1)
    pub fn flat(dimension: usize) -> SomaFilterResult<Self> {
        Self::new(vec![1.0; dimension])
    }

    /// Dir(a/K, ..., a/K) for K states and concentration a
    pub fn symmetric(num_states: usize, concentration: f64) -> SomaFilterResult<Self> {
        if num_states == 0 {
            return Err(SomaFilterError::InvalidParameters(
                "symmetric Dirichlet needs at least one state".to_string(),
            ));
        }
        if !(concentration > 0.0) {
            return Err(SomaFilterError::InvalidParameters(format!(
                "concentration must be positive, got {}",
                concentration
            )));
        }
        Self::new(vec![concentration / num_states as f64; num_states])
    }

    pub fn alpha(&self) -> &[f64] {
        &self.alpha
    }

    pub fn dimension(&self) -> usize {
        self.alpha.len()
    }

    fn total(&self) -> f64 {
        self.alpha.iter().sum()
    }

    /// Posterior after observing `counts`; the receiver is left untouched
    pub fn add_counts(&self, counts: &[f64]) -> SomaFilterResult<Self> {
        if counts.len() != self.dimension() {
            return Err(SomaFilterError::DimensionMismatch {
                expected: self.dimension(),
                found: counts.len(),
            });
        }
        Self::new(self.alpha.iter().zip(counts).map(|(a, c)| a + c).collect())
    }

    /// ln Gamma(sum alpha) - sum ln Gamma(alpha_i)
    pub fn log_normalization(&self) -> f64 {
        ln_gamma(self.total()) - self.alpha.iter().map(|&a| ln_gamma(a)).sum::<f64>()
    }

    pub fn log10_normalization(&self) -> f64 {
        self.log_normalization() * LOG10_OF_E
    }

    /// E[ln pi_i] = psi(alpha_i) - psi(sum alpha).
    ///
    /// These are the variational point estimates of the log weights; exponentiated they do
    /// not sum to one and callers that need a distribution must renormalize.
    pub fn effective_log_weights(&self) -> Vec<f64> {
        let digamma_of_sum = digamma(self.total());
        self.alpha.iter().map(|&a| digamma(a) - digamma_of_sum).collect()
    }

    pub fn effective_log10_weights(&self) -> Vec<f64> {
        self.effective_log_weights()
            .into_iter()
            .map(|w| w * LOG10_OF_E)
            .collect()
    }

    pub fn mean_weights(&self) -> Vec<f64> {
        let total = self.total();
        self.alpha.iter().map(|a| a / total).collect()
    }

    /// L1 distance between concentration vectors
    pub fn distance_l1(&self, other: &Dirichlet) -> SomaFilterResult<f64> {
        if other.dimension() != self.dimension() {
            return Err(SomaFilterError::DimensionMismatch {
                expected: self.dimension(),
                found: other.dimension(),
            });
        }
        Ok(self
            .alpha
            .iter()
            .zip(&other.alpha)
            .map(|(a, b)| (a - b).abs())
            .sum())
    }
}

/// Beta(alpha, beta) shape, i.e. a two-dimensional Dirichlet
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BetaShape {
    pub alpha: f64,
    pub beta: f64,
}

impl BetaShape {
    pub fn new(alpha: f64, beta: f64) -> SomaFilterResult<Self> {
        let shape = Self { alpha, beta };
        // reuse the Dirichlet invariants
        shape.as_dirichlet()?;
        Ok(shape)
    }

    pub fn flat() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
        }
    }

    pub fn mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    pub fn as_dirichlet(&self) -> SomaFilterResult<Dirichlet> {
        Dirichlet::new(vec![self.alpha, self.beta])
    }
}
