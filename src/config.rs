//! Tunable parameters for the filters, the calibrator and the allele-fraction mixture model

use crate::{SomaFilterError, SomaFilterResult};
use serde::{Deserialize, Serialize};

/// Settings for the allele-fraction mixture model fitted between the two passes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringConfig {
    /// Concentration of the symmetric Dirichlet prior on cluster occupancy
    pub concentration: f64,
    /// Upper bound on the number of sharply peaked signal clusters seeded from the data
    pub num_signal_clusters: usize,
    pub iterations: usize,
    /// Early exit once no cluster moves by more than this
    pub tolerance: f64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            concentration: 1.0,
            num_signal_clusters: 20,
            iterations: 10,
            tolerance: 1e-4,
        }
    }
}

/// Configuration for the two-pass filtering engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilteringConfig {
    pub max_false_discovery_rate: f64,
    pub tumor_lod_threshold: f64,
    pub log10_prior_prob_of_somatic_event: f64,
    pub normal_artifact_lod_threshold: f64,
    pub normal_pileup_p_value_threshold: f64,
    pub min_median_base_quality: i64,
    pub min_median_mapping_quality: i64,
    /// Indels at least this long are judged by the reference reads' mapping quality
    pub long_indel_length: usize,
    pub min_median_read_position: i64,
    pub max_events_in_region: i64,
    pub num_alt_alleles_threshold: usize,
    pub unique_alt_read_count: i64,
    pub max_median_fragment_length_difference: i64,
    pub n_ratio: f64,
    pub strict_strand_bias: bool,
    pub strand_artifact_posterior_prob_threshold: f64,
    pub strand_artifact_allele_fraction_threshold: f64,
    pub min_pcr_slippage_bases: usize,
    pub pcr_slippage_rate: f64,
    pub pcr_slippage_p_value_threshold: f64,
    pub max_distance_to_filtered_call_on_same_haplotype: u64,
    /// Used for samples missing from the contamination table
    pub contamination_estimate: f64,
    pub mitochondria: bool,
    pub lod_by_depth: f64,
    pub non_mt_alt_by_alt: f64,
    pub clustering: ClusteringConfig,
    /// Score the filters of a single record on the rayon pool
    pub parallel_filters: bool,
}

impl Default for FilteringConfig {
    fn default() -> Self {
        Self {
            max_false_discovery_rate: 0.05,
            tumor_lod_threshold: 5.3,
            log10_prior_prob_of_somatic_event: -6.0,
            normal_artifact_lod_threshold: 0.0,
            normal_pileup_p_value_threshold: 0.1,
            min_median_base_quality: 20,
            min_median_mapping_quality: 30,
            long_indel_length: 5,
            min_median_read_position: 1,
            max_events_in_region: 2,
            num_alt_alleles_threshold: 1,
            unique_alt_read_count: 0,
            max_median_fragment_length_difference: 10000,
            n_ratio: f64::INFINITY,
            strict_strand_bias: false,
            strand_artifact_posterior_prob_threshold: 0.99,
            strand_artifact_allele_fraction_threshold: 0.01,
            min_pcr_slippage_bases: 8,
            pcr_slippage_rate: 0.1,
            pcr_slippage_p_value_threshold: 0.001,
            max_distance_to_filtered_call_on_same_haplotype: 100,
            contamination_estimate: 0.0,
            mitochondria: false,
            lod_by_depth: 0.0035,
            non_mt_alt_by_alt: 1.0,
            clustering: ClusteringConfig::default(),
            parallel_filters: false,
        }
    }
}

fn check_probability(name: &str, value: f64) -> SomaFilterResult<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(SomaFilterError::InvalidConfig(format!(
            "{} must be between 0 and 1, got {}",
            name, value
        )));
    }
    Ok(())
}

impl FilteringConfig {
    /// Reject parameter combinations the engine cannot work with
    pub fn validate(&self) -> SomaFilterResult<()> {
        check_probability("max_false_discovery_rate", self.max_false_discovery_rate)?;
        check_probability("normal_pileup_p_value_threshold", self.normal_pileup_p_value_threshold)?;
        check_probability(
            "strand_artifact_posterior_prob_threshold",
            self.strand_artifact_posterior_prob_threshold,
        )?;
        check_probability(
            "strand_artifact_allele_fraction_threshold",
            self.strand_artifact_allele_fraction_threshold,
        )?;
        check_probability("pcr_slippage_rate", self.pcr_slippage_rate)?;
        check_probability("pcr_slippage_p_value_threshold", self.pcr_slippage_p_value_threshold)?;
        check_probability("contamination_estimate", self.contamination_estimate)?;

        if !(self.log10_prior_prob_of_somatic_event < 0.0) {
            return Err(SomaFilterError::InvalidConfig(
                "log10_prior_prob_of_somatic_event must be negative".to_string(),
            ));
        }

        if self.n_ratio.is_nan() || self.n_ratio <= 0.0 {
            return Err(SomaFilterError::InvalidConfig(
                "n_ratio must be positive".to_string(),
            ));
        }

        if self.clustering.concentration <= 0.0 || !self.clustering.concentration.is_finite() {
            return Err(SomaFilterError::InvalidConfig(
                "clustering concentration must be positive and finite".to_string(),
            ));
        }

        if self.clustering.iterations == 0 {
            return Err(SomaFilterError::InvalidConfig(
                "clustering needs at least one iteration".to_string(),
            ));
        }

        if self.clustering.tolerance < 0.0 {
            return Err(SomaFilterError::InvalidConfig(
                "clustering tolerance must be non-negative".to_string(),
            ));
        }

        Ok(())
    }
}
