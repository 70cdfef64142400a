//! Bayesian allele-fraction model: Dirichlet posterior over allele fractions given
//! per-read allele likelihoods, its marginal evidence, and prior-swap log-odds corrections.

use crate::dirichlet::Dirichlet;
use crate::math::{normalize_from_log10, x_log10_x};
use crate::{SomaFilterError, SomaFilterResult};

pub const CONVERGENCE_THRESHOLD: f64 = 1e-3;

/// Safety bound on the fixed-point iteration
pub const MAX_ITERATIONS: usize = 1000;

/// Matrix of log10 likelihoods, one row per allele and one column per read
#[derive(Debug, Clone, PartialEq)]
pub struct LikelihoodMatrix {
    num_alleles: usize,
    num_reads: usize,
    values: Vec<f64>,
}

impl LikelihoodMatrix {
    pub fn from_rows(rows: Vec<Vec<f64>>) -> SomaFilterResult<Self> {
        let num_alleles = rows.len();
        if num_alleles == 0 {
            return Err(SomaFilterError::InvalidParameters(
                "likelihood matrix needs at least one allele".to_string(),
            ));
        }
        let num_reads = rows[0].len();
        let mut values = Vec::with_capacity(num_alleles * num_reads);
        for row in rows {
            if row.len() != num_reads {
                return Err(SomaFilterError::DimensionMismatch {
                    expected: num_reads,
                    found: row.len(),
                });
            }
            values.extend(row);
        }
        Ok(Self {
            num_alleles,
            num_reads,
            values,
        })
    }

    pub fn num_alleles(&self) -> usize {
        self.num_alleles
    }

    pub fn num_reads(&self) -> usize {
        self.num_reads
    }

    pub fn get(&self, allele: usize, read: usize) -> f64 {
        self.values[allele * self.num_reads + read]
    }

    pub fn column(&self, read: usize) -> Vec<f64> {
        (0..self.num_alleles).map(|a| self.get(a, read)).collect()
    }
}

fn check_dimension(likelihoods: &LikelihoodMatrix, prior: &Dirichlet) -> SomaFilterResult<()> {
    if likelihoods.num_alleles() != prior.dimension() {
        return Err(SomaFilterError::DimensionMismatch {
            expected: prior.dimension(),
            found: likelihoods.num_alleles(),
        });
    }
    Ok(())
}

/// Per-read allele posteriors under the effective weights of `weights`
fn read_responsibilities(likelihoods: &LikelihoodMatrix, log10_weights: &[f64], read: usize) -> Vec<f64> {
    let scores: Vec<f64> = log10_weights
        .iter()
        .enumerate()
        .map(|(a, w)| w + likelihoods.get(a, read))
        .collect();
    normalize_from_log10(&scores)
}

/// Total soft assignment of reads to each allele given a Dirichlet on allele fractions
pub fn effective_counts(likelihoods: &LikelihoodMatrix, weights: &Dirichlet) -> SomaFilterResult<Vec<f64>> {
    check_dimension(likelihoods, weights)?;
    let log10_weights = weights.effective_log10_weights();
    let mut counts = vec![0.0; likelihoods.num_alleles()];
    for read in 0..likelihoods.num_reads() {
        for (count, r) in counts
            .iter_mut()
            .zip(read_responsibilities(likelihoods, &log10_weights, read))
        {
            *count += r;
        }
    }
    Ok(counts)
}

/// Dirichlet posterior on allele fractions.
///
/// Iterates posterior = prior + effective counts until successive posteriors are within
/// [`CONVERGENCE_THRESHOLD`] in L1 distance. Exceeding [`MAX_ITERATIONS`] yields
/// `ConvergenceFailure` carrying the last estimate.
pub fn allele_fractions_posterior(likelihoods: &LikelihoodMatrix, prior: &Dirichlet) -> SomaFilterResult<Dirichlet> {
    bounded_posterior(likelihoods, prior, MAX_ITERATIONS)
}

pub(crate) fn bounded_posterior(
    likelihoods: &LikelihoodMatrix,
    prior: &Dirichlet,
    max_iterations: usize,
) -> SomaFilterResult<Dirichlet> {
    check_dimension(likelihoods, prior)?;
    let mut posterior = Dirichlet::flat(likelihoods.num_alleles())?;

    for _ in 0..max_iterations {
        let counts = effective_counts(likelihoods, &posterior)?;
        let next = prior.add_counts(&counts)?;
        let converged = next.distance_l1(&posterior)? < CONVERGENCE_THRESHOLD;
        posterior = next;
        if converged {
            return Ok(posterior);
        }
    }

    Err(SomaFilterError::ConvergenceFailure {
        iterations: max_iterations,
        estimate: posterior.alpha().to_vec(),
    })
}

/// Marginal log10 evidence of the reads under `prior`
pub fn log10_evidence(likelihoods: &LikelihoodMatrix, prior: &Dirichlet) -> SomaFilterResult<f64> {
    bounded_log10_evidence(likelihoods, prior, MAX_ITERATIONS)
}

/// Falls back to the last posterior estimate when the iteration bound is hit
pub(crate) fn bounded_log10_evidence(
    likelihoods: &LikelihoodMatrix,
    prior: &Dirichlet,
    max_iterations: usize,
) -> SomaFilterResult<f64> {
    let posterior = match bounded_posterior(likelihoods, prior, max_iterations) {
        Ok(posterior) => posterior,
        Err(SomaFilterError::ConvergenceFailure { iterations, estimate }) => {
            log::warn!(
                "Allele fraction posterior did not converge after {} iterations, using last estimate",
                iterations
            );
            Dirichlet::new(estimate)?
        }
        Err(e) => return Err(e),
    };

    let log10_fractions = posterior.effective_log10_weights();
    let likelihood_and_entropy: f64 = (0..likelihoods.num_reads())
        .map(|read| {
            let responsibilities = read_responsibilities(likelihoods, &log10_fractions, read);
            let likelihood_term: f64 = responsibilities
                .iter()
                .enumerate()
                .map(|(a, r)| r * likelihoods.get(a, read))
                .sum();
            let entropy_term: f64 = responsibilities.iter().map(|&r| x_log10_x(r)).sum();
            likelihood_term - entropy_term
        })
        .sum();

    Ok(prior.log10_normalization() - posterior.log10_normalization() + likelihood_and_entropy)
}

/// Additive correction converting log10 odds computed under `old_prior` into those under
/// `new_prior`, given the observed allele counts
pub fn log10_odds_correction(new_prior: &Dirichlet, old_prior: &Dirichlet, counts: &[f64]) -> SomaFilterResult<f64> {
    if new_prior.dimension() != old_prior.dimension() {
        return Err(SomaFilterError::DimensionMismatch {
            expected: old_prior.dimension(),
            found: new_prior.dimension(),
        });
    }
    let old_value = old_prior.log10_normalization() - old_prior.add_counts(counts)?.log10_normalization();
    let new_value = new_prior.log10_normalization() - new_prior.add_counts(counts)?.log10_normalization();
    Ok(new_value - old_value)
}
