//! Generic EM driver for Dirichlet-weighted mixture models
//!
//! A [`MixtureModel`] supplies cluster initialisation, per-cluster log likelihoods and the
//! M-step refit; [`fit_mixture`] runs the E/M alternation with a symmetric Dirichlet
//! prior on cluster occupancy.

use crate::config::ClusteringConfig;
use crate::dirichlet::Dirichlet;
use crate::math::{log_sum_exp, normalize_from_log};
use crate::{SomaFilterError, SomaFilterResult};

pub trait MixtureModel {
    type Cluster: Clone + std::fmt::Debug;
    type Datum;

    fn initialize_clusters(&self, data: &[Self::Datum]) -> Vec<Self::Cluster>;

    /// Natural log likelihood of `datum` under `cluster`
    fn log_likelihood(&self, cluster: &Self::Cluster, datum: &Self::Datum) -> f64;

    fn relearn_cluster(
        &self,
        current: &Self::Cluster,
        data: &[Self::Datum],
        responsibilities: &[f64],
    ) -> Self::Cluster;

    /// Parameter distance used for the optional early exit
    fn cluster_distance(&self, a: &Self::Cluster, b: &Self::Cluster) -> f64;
}

/// The result of an EM run. Responsibilities are not kept past the fit.
#[derive(Debug, Clone)]
pub struct FittedMixture<C> {
    pub clusters: Vec<C>,
    pub weights_posterior: Dirichlet,
    pub iterations: usize,
}

impl<C> FittedMixture<C> {
    /// Effective cluster weights, renormalized to sum to one
    pub fn normalized_weights(&self) -> Vec<f64> {
        normalize_from_log(&self.weights_posterior.effective_log_weights())
    }

    /// ln sum_k w_k p(datum | k) under the fitted mixture
    pub fn log_likelihood<M>(&self, model: &M, datum: &M::Datum) -> f64
    where
        M: MixtureModel<Cluster = C>,
    {
        let terms: Vec<f64> = self
            .normalized_weights()
            .iter()
            .zip(&self.clusters)
            .map(|(w, cluster)| w.ln() + model.log_likelihood(cluster, datum))
            .collect();
        log_sum_exp(&terms)
    }
}

/// Responsibilities are stored row-major: one row per datum, one column per cluster
struct Responsibilities {
    num_clusters: usize,
    values: Vec<f64>,
}

impl Responsibilities {
    fn new(num_data: usize, num_clusters: usize) -> Self {
        Self {
            num_clusters,
            values: vec![0.0; num_data * num_clusters],
        }
    }

    fn set_row(&mut self, datum: usize, row: &[f64]) {
        let start = datum * self.num_clusters;
        self.values[start..start + self.num_clusters].copy_from_slice(row);
    }

    fn column(&self, cluster: usize) -> Vec<f64> {
        self.values
            .iter()
            .skip(cluster)
            .step_by(self.num_clusters)
            .copied()
            .collect()
    }

    fn column_sums(&self) -> Vec<f64> {
        let mut sums = vec![0.0; self.num_clusters];
        for row in self.values.chunks(self.num_clusters) {
            for (sum, r) in sums.iter_mut().zip(row) {
                *sum += r;
            }
        }
        sums
    }
}

pub fn fit_mixture<M: MixtureModel>(
    model: &M,
    data: &[M::Datum],
    config: &ClusteringConfig,
) -> SomaFilterResult<FittedMixture<M::Cluster>> {
    let mut clusters = model.initialize_clusters(data);
    if clusters.is_empty() {
        return Err(SomaFilterError::InvalidParameters(
            "mixture model produced no clusters".to_string(),
        ));
    }
    let weights_prior = Dirichlet::symmetric(clusters.len(), config.concentration)?;
    let mut responsibilities = Responsibilities::new(data.len(), clusters.len());
    let mut weights_posterior = weights_prior.clone();
    let mut iterations = 0;

    while iterations < config.iterations {
        iterations += 1;

        // E step
        let log_weights = weights_posterior.effective_log_weights();
        for (n, datum) in data.iter().enumerate() {
            let log_posteriors: Vec<f64> = clusters
                .iter()
                .zip(&log_weights)
                .map(|(cluster, w)| w + model.log_likelihood(cluster, datum))
                .collect();
            responsibilities.set_row(n, &normalize_from_log(&log_posteriors));
        }

        // M step
        weights_posterior = weights_prior.add_counts(&responsibilities.column_sums())?;
        let relearned: Vec<M::Cluster> = clusters
            .iter()
            .enumerate()
            .map(|(k, cluster)| model.relearn_cluster(cluster, data, &responsibilities.column(k)))
            .collect();

        let change: f64 = clusters
            .iter()
            .zip(&relearned)
            .map(|(old, new)| model.cluster_distance(old, new))
            .fold(0.0, f64::max);
        clusters = relearned;

        if change < config.tolerance {
            log::debug!("Mixture model stabilized after {} iterations", iterations);
            break;
        }
    }

    Ok(FittedMixture {
        clusters,
        weights_posterior,
        iterations,
    })
}
