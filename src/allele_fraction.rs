//! Allele-fraction mixture model learned from the first pass
//!
//! Tumor (alt, ref) counts of records that no artifact filter flagged are clustered into
//! sharply peaked "signal" Beta clusters plus one broad background Beta cluster. The
//! fitted mixture re-expresses tumor log odds computed under a flat allele-fraction
//! prior in terms of the empirical distribution of real somatic allele fractions.

use crate::clusterer::{fit_mixture, FittedMixture, MixtureModel};
use crate::config::ClusteringConfig;
use crate::dirichlet::{BetaShape, Dirichlet};
use crate::likelihoods;
use crate::math::{bisect, log10_sum_log10};
use crate::SomaFilterResult;
use serde::{Deserialize, Serialize};
use statrs::function::factorial::ln_binomial;
use statrs::function::gamma::ln_gamma;

/// Concentration of a signal cluster's Beta
const SIGNAL_CLUSTER_CONCENTRATION: f64 = 1000.0;

/// Keeps signal Betas proper when every read supports one allele
const MIN_SIGNAL_ALLELE_FRACTION: f64 = 1e-3;
const MAX_SIGNAL_ALLELE_FRACTION: f64 = 0.999;

const MIN_BACKGROUND_ALPHA: f64 = 1.0;
const MAX_BACKGROUND_ALPHA: f64 = 100.0;
const BACKGROUND_FIT_MAX_ITERATIONS: usize = 2000;
const BACKGROUND_FIT_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlleleCount {
    pub alt: u32,
    pub ref_count: u32,
}

impl AlleleCount {
    pub fn new(alt: u32, ref_count: u32) -> Self {
        Self { alt, ref_count }
    }

    pub fn total(&self) -> u32 {
        self.alt.saturating_add(self.ref_count)
    }

    pub fn allele_fraction(&self) -> f64 {
        self.alt as f64 / self.total() as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AfCluster {
    pub is_background: bool,
    pub shape: BetaShape,
}

impl AfCluster {
    pub fn background(shape: BetaShape) -> Self {
        Self {
            is_background: true,
            shape,
        }
    }

    /// A Beta sharply peaked at `allele_fraction`
    pub fn signal(allele_fraction: f64) -> Self {
        let fraction = allele_fraction.clamp(MIN_SIGNAL_ALLELE_FRACTION, MAX_SIGNAL_ALLELE_FRACTION);
        let alpha = SIGNAL_CLUSTER_CONCENTRATION;
        Self {
            is_background: false,
            shape: BetaShape {
                alpha,
                beta: alpha * (1.0 - fraction) / fraction,
            },
        }
    }

    /// Beta-binomial log probability of the alt count given the total depth
    pub fn log_likelihood(&self, count: &AlleleCount) -> f64 {
        let (a, b) = (self.shape.alpha, self.shape.beta);
        let n = count.total() as f64;
        let k = count.alt as f64;
        ln_binomial(count.total() as u64, count.alt as u64) + ln_beta(k + a, n - k + b) - ln_beta(a, b)
    }
}

fn ln_beta(a: f64, b: f64) -> f64 {
    ln_gamma(a) + ln_gamma(b) - ln_gamma(a + b)
}

fn beta_for_mean(alpha: f64, mean: f64) -> f64 {
    (1.0 - mean) * alpha / mean
}

/// Method-of-moments mean plus a bisection solve for the concentration.
///
/// The Beta-binomial variance of the alt count at depth n is
/// n m (1 - m) (a + b + n) / (a + b + 1); `alpha` is chosen so that the
/// responsibility-weighted observed variance matches it.
fn fit_background_shape(data: &[AlleleCount], responsibilities: &[f64]) -> BetaShape {
    let weighted_alt: f64 = data.iter().zip(responsibilities).map(|(c, r)| r * c.alt as f64).sum();
    let weighted_ref: f64 = data
        .iter()
        .zip(responsibilities)
        .map(|(c, r)| r * c.ref_count as f64)
        .sum();
    let mean = (weighted_alt + 0.5) / (weighted_alt + weighted_ref + 1.0);

    let lhs = data
        .iter()
        .zip(responsibilities)
        .map(|(c, r)| r * (c.alt as f64 - mean * c.total() as f64).powi(2))
        .sum::<f64>()
        / (mean * (1.0 - mean));

    let lhs_minus_rhs = |alpha: f64| {
        let beta = beta_for_mean(alpha, mean);
        let rhs = data
            .iter()
            .zip(responsibilities)
            .map(|(c, r)| {
                let n = c.total() as f64;
                r * n * (alpha + beta + n)
            })
            .sum::<f64>()
            / (alpha + beta + 1.0);
        lhs - rhs
    };

    let alpha = match bisect(
        lhs_minus_rhs,
        MIN_BACKGROUND_ALPHA,
        MAX_BACKGROUND_ALPHA,
        BACKGROUND_FIT_MAX_ITERATIONS,
        BACKGROUND_FIT_TOLERANCE,
    ) {
        Some(alpha) => alpha,
        None => {
            // the moment equation is increasing in alpha
            let clamped = if lhs_minus_rhs(MAX_BACKGROUND_ALPHA) < 0.0 {
                MAX_BACKGROUND_ALPHA
            } else {
                MIN_BACKGROUND_ALPHA
            };
            log::warn!(
                "Background allele-fraction shape not bracketed in [{}, {}]; using alpha = {}",
                MIN_BACKGROUND_ALPHA,
                MAX_BACKGROUND_ALPHA,
                clamped
            );
            clamped
        }
    };

    BetaShape {
        alpha,
        beta: beta_for_mean(alpha, mean),
    }
}

/// Mixture specification handed to the generic EM driver
pub struct AlleleFractionMixture {
    num_signal_clusters: usize,
}

impl AlleleFractionMixture {
    pub fn new(num_signal_clusters: usize) -> Self {
        Self { num_signal_clusters }
    }
}

impl MixtureModel for AlleleFractionMixture {
    type Cluster = AfCluster;
    type Datum = AlleleCount;

    fn initialize_clusters(&self, data: &[AlleleCount]) -> Vec<AfCluster> {
        let mut clusters = Vec::new();

        if self.num_signal_clusters > 0 && !data.is_empty() {
            let mut sorted_fractions: Vec<f64> = data.iter().map(AlleleCount::allele_fraction).collect();
            sorted_fractions.sort_by(f64::total_cmp);

            let chunk_size = (sorted_fractions.len() / self.num_signal_clusters).max(1);
            let mut chunk_means: Vec<f64> = sorted_fractions
                .chunks(chunk_size)
                .map(|chunk| chunk.iter().sum::<f64>() / chunk.len() as f64)
                .collect();
            chunk_means.dedup();

            clusters.extend(chunk_means.into_iter().map(AfCluster::signal));
        }

        // the initially flat background cluster always comes last
        clusters.push(AfCluster::background(BetaShape::flat()));
        clusters
    }

    fn log_likelihood(&self, cluster: &AfCluster, datum: &AlleleCount) -> f64 {
        cluster.log_likelihood(datum)
    }

    fn relearn_cluster(&self, current: &AfCluster, data: &[AlleleCount], responsibilities: &[f64]) -> AfCluster {
        if current.is_background {
            return AfCluster::background(fit_background_shape(data, responsibilities));
        }

        let weighted_alt: f64 = data.iter().zip(responsibilities).map(|(c, r)| r * c.alt as f64).sum();
        let weighted_total: f64 = data
            .iter()
            .zip(responsibilities)
            .map(|(c, r)| r * c.total() as f64)
            .sum();

        if weighted_total > 0.0 {
            AfCluster::signal(weighted_alt / weighted_total)
        } else {
            *current
        }
    }

    fn cluster_distance(&self, a: &AfCluster, b: &AfCluster) -> f64 {
        (a.shape.alpha - b.shape.alpha).abs() + (a.shape.beta - b.shape.beta).abs()
    }
}

/// The fitted background model installed in the calibrated filtering context
#[derive(Debug, Clone)]
pub struct AlleleFractionModel {
    fit: FittedMixture<AfCluster>,
}

impl AlleleFractionModel {
    pub fn fit(counts: &[AlleleCount], config: &ClusteringConfig) -> SomaFilterResult<Self> {
        let data: Vec<AlleleCount> = counts.iter().copied().filter(|c| c.total() > 0).collect();
        if data.len() < counts.len() {
            log::debug!(
                "Ignoring {} zero-depth counts for allele-fraction clustering",
                counts.len() - data.len()
            );
        }

        let mixture = AlleleFractionMixture::new(config.num_signal_clusters);
        let fit = fit_mixture(&mixture, &data, config)?;

        log::debug!(
            "Allele-fraction clustering: {} data, {} clusters, {} iterations",
            data.len(),
            fit.clusters.len(),
            fit.iterations
        );

        Ok(Self { fit })
    }

    /// Wrap an already fitted mixture
    pub fn from_fit(fit: FittedMixture<AfCluster>) -> Self {
        Self { fit }
    }

    pub fn clusters(&self) -> &[AfCluster] {
        &self.fit.clusters
    }

    pub fn background_shape(&self) -> Option<BetaShape> {
        self.fit
            .clusters
            .iter()
            .find(|c| c.is_background)
            .map(|c| c.shape)
    }

    pub fn weights_posterior(&self) -> &Dirichlet {
        &self.fit.weights_posterior
    }

    /// Marginal log10-odds correction over the signal clusters, weighted by their
    /// effective occupancy.
    ///
    /// Converts tumor log odds computed under a flat allele-fraction prior into log
    /// odds under the learned somatic allele-fraction distribution.
    pub fn log10_odds_correction(&self, alt_count: f64, ref_count: f64) -> SomaFilterResult<f64> {
        let log10_weights = self.fit.weights_posterior.effective_log10_weights();
        let has_signal = self.fit.clusters.iter().any(|c| !c.is_background);

        let selected: Vec<(f64, &AfCluster)> = log10_weights
            .iter()
            .copied()
            .zip(&self.fit.clusters)
            .filter(|(_, c)| !has_signal || !c.is_background)
            .collect();

        let log10_total_weight = log10_sum_log10(&selected.iter().map(|(w, _)| *w).collect::<Vec<_>>());
        let flat = Dirichlet::flat(2)?;
        let counts = [alt_count, ref_count];

        let terms = selected
            .iter()
            .map(|(w, cluster)| {
                let correction = likelihoods::log10_odds_correction(&cluster.shape.as_dirichlet()?, &flat, &counts)?;
                Ok(correction + w - log10_total_weight)
            })
            .collect::<SomaFilterResult<Vec<f64>>>()?;

        Ok(log10_sum_log10(&terms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use statrs::distribution::{Beta, ContinuousCDF};

    fn config(num_signal_clusters: usize) -> ClusteringConfig {
        ClusteringConfig {
            num_signal_clusters,
            ..ClusteringConfig::default()
        }
    }

    #[test]
    fn test_background_recovers_known_beta() {
        let beta = Beta::new(50.0, 50.0).unwrap();
        let depth = 10_000u32;
        let n = 200;
        let counts: Vec<AlleleCount> = (0..n)
            .map(|i| {
                let p = beta.inverse_cdf((i as f64 + 0.5) / n as f64);
                let alt = (p * depth as f64).round() as u32;
                AlleleCount::new(alt, depth - alt)
            })
            .collect();

        let model = AlleleFractionModel::fit(&counts, &config(0)).unwrap();
        let shape = model.background_shape().unwrap();

        assert_eq!(model.clusters().len(), 1);
        assert!((shape.alpha - 50.0).abs() < 5.0, "alpha = {}", shape.alpha);
        assert!((shape.beta - 50.0).abs() < 5.0, "beta = {}", shape.beta);
    }

    #[test]
    fn test_beta_binomial_likelihood_normalizes() {
        let cluster = AfCluster::background(BetaShape::new(2.0, 3.0).unwrap());
        let total: f64 = (0..=20u32)
            .map(|k| cluster.log_likelihood(&AlleleCount::new(k, 20 - k)).exp())
            .sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_signal_cluster_shape() {
        let cluster = AfCluster::signal(0.2);
        assert!(!cluster.is_background);
        assert!((cluster.shape.mean() - 0.2).abs() < 1e-12);

        // degenerate fractions are clamped rather than producing an improper Beta
        let cluster = AfCluster::signal(0.0);
        assert!(cluster.shape.beta.is_finite());
        assert!(cluster.shape.as_dirichlet().is_ok());
    }

    #[test]
    fn test_initialize_clusters() {
        let mixture = AlleleFractionMixture::new(20);
        let counts: Vec<AlleleCount> = (0..40)
            .map(|i| if i % 2 == 0 { AlleleCount::new(10, 90) } else { AlleleCount::new(40, 60) })
            .collect();
        let clusters = mixture.initialize_clusters(&counts);

        // identical chunk means collapse
        assert_eq!(clusters.len(), 3);
        assert!(clusters[..2].iter().all(|c| !c.is_background));
        assert!(clusters[2].is_background);
        assert_eq!(clusters[2].shape, BetaShape::flat());

        let empty = mixture.initialize_clusters(&[]);
        assert_eq!(empty.len(), 1);
        assert!(empty[0].is_background);
    }

    #[test]
    fn test_log10_odds_correction_favors_learned_fractions() {
        let counts: Vec<AlleleCount> = (0..40)
            .map(|i| if i % 2 == 0 { AlleleCount::new(10, 90) } else { AlleleCount::new(40, 60) })
            .collect();
        let model = AlleleFractionModel::fit(&counts, &config(20)).unwrap();

        let typical = model.log10_odds_correction(40.0, 60.0).unwrap();
        let atypical = model.log10_odds_correction(1.0, 99.0).unwrap();

        assert!(typical > atypical);
        assert!(atypical < 0.0);
    }

    #[test]
    fn test_empty_fit_falls_back_to_background() {
        let model = AlleleFractionModel::fit(&[AlleleCount::new(0, 0)], &config(20)).unwrap();
        assert_eq!(model.clusters().len(), 1);

        // a flat background reproduces the flat prior, so nothing needs correcting
        let correction = model.log10_odds_correction(5.0, 5.0).unwrap();
        assert!(correction.abs() < 1e-9);
    }
}
