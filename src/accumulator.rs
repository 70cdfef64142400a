//! First-pass statistics
//!
//! Collects every filter's artifact probability for every record along with the data
//! learned for the second pass: phase groups of filtered calls and the allele counts of
//! calls that look real. Nothing here makes a filtering decision.

use crate::allele_fraction::{AlleleCount, AlleleFractionModel};
use crate::config::FilteringConfig;
use crate::context::{FilteredPhasedCall, FilteringContext};
use crate::fdr::{calibrate, FilterStats};
use crate::filters::{SomaticEvidence, VariantFilter};
use crate::math::max_value;
use crate::record::VariantRecord;
use crate::{SomaFilterError, SomaFilterResult};
use log::debug;
use std::collections::HashMap;

/// Name of the summary row for the combined decision
pub const COMBINED_FILTER_NAME: &str = "combined";

/// Artifact probability at which a first-pass record counts as filtered for learning
pub const LEARNING_ARTIFACT_THRESHOLD: f64 = 0.5;

/// Thresholds frozen at the pass boundary
#[derive(Debug, Clone)]
pub struct Calibration {
    pub combined: FilterStats,
    pub per_filter: Vec<FilterStats>,
}

#[derive(Debug)]
pub struct FirstPassAccumulator {
    filter_names: Vec<&'static str>,
    /// probabilities[f][r] for filter f and record r
    probabilities: Vec<Vec<f64>>,
    max_probabilities: Vec<f64>,
    somatic_evidence: Vec<Option<SomaticEvidence>>,
    unfiltered_counts: Vec<AlleleCount>,
    filtered_phased_calls: HashMap<String, FilteredPhasedCall>,
}

impl FirstPassAccumulator {
    pub fn new(filters: &[VariantFilter]) -> Self {
        Self {
            filter_names: filters.iter().map(VariantFilter::name).collect(),
            probabilities: vec![Vec::new(); filters.len()],
            max_probabilities: Vec::new(),
            somatic_evidence: Vec::new(),
            unfiltered_counts: Vec::new(),
            filtered_phased_calls: HashMap::new(),
        }
    }

    pub fn num_records(&self) -> usize {
        self.max_probabilities.len()
    }

    pub fn unfiltered_counts(&self) -> &[AlleleCount] {
        &self.unfiltered_counts
    }

    pub fn filtered_phased_calls(&self) -> &HashMap<String, FilteredPhasedCall> {
        &self.filtered_phased_calls
    }

    /// Combined (maximum) probability of every record so far, in input order
    pub fn max_probabilities(&self) -> &[f64] {
        &self.max_probabilities
    }

    /// Add one record scored by `filters`
    pub fn add(
        &mut self,
        filters: &[VariantFilter],
        record: &VariantRecord,
        context: &FilteringContext,
        probabilities: &[f64],
    ) -> SomaFilterResult<()> {
        if probabilities.len() != self.filter_names.len() || filters.len() != self.filter_names.len() {
            return Err(SomaFilterError::DimensionMismatch {
                expected: self.filter_names.len(),
                found: probabilities.len(),
            });
        }

        for (column, &p) in self.probabilities.iter_mut().zip(probabilities) {
            column.push(p);
        }
        let max_probability = max_value(probabilities).unwrap_or(0.0);
        self.max_probabilities.push(max_probability);

        if max_probability >= LEARNING_ARTIFACT_THRESHOLD {
            for (phase_id, phased_genotype) in context.tumor_genotypes(record).filter_map(|g| g.phase_info()) {
                let call = self
                    .filtered_phased_calls
                    .entry(phase_id.to_string())
                    .or_insert_with(|| FilteredPhasedCall {
                        position: record.position,
                        phased_genotypes: Default::default(),
                    });
                call.position = record.position;
                call.phased_genotypes.insert(phased_genotype.to_string());
            }
        }

        let evidence = match SomaticEvidence::from_record(record, context) {
            Ok(evidence) => Some(evidence),
            Err(e) => {
                debug!(
                    "No somatic evidence at {}:{}: {}",
                    record.contig, record.position, e
                );
                None
            }
        };

        let looks_real = filters
            .iter()
            .zip(probabilities)
            .filter(|(filter, _)| !filter.is_tumor_evidence())
            .all(|(_, &p)| p < LEARNING_ARTIFACT_THRESHOLD);
        if looks_real {
            if let Some(evidence) = evidence {
                self.unfiltered_counts.push(evidence.allele_count());
            }
        }
        self.somatic_evidence.push(evidence);

        Ok(())
    }

    /// Fit the allele-fraction model on the counts of calls that look real
    pub fn learn_allele_fractions(&self, config: &FilteringConfig) -> SomaFilterResult<AlleleFractionModel> {
        AlleleFractionModel::fit(&self.unfiltered_counts, &config.clustering)
    }

    /// Re-score the weak-evidence filters with the fitted model so that the first-pass
    /// probabilities match what the second pass will compute
    ///
    /// A record whose evidence cannot be rescored is scored 0, as in the first pass.
    pub fn rescore_weak_evidence(&mut self, filters: &[VariantFilter], model: &AlleleFractionModel) {
        let mut rescored = false;
        for (index, filter) in filters.iter().enumerate() {
            let VariantFilter::WeakEvidence {
                log10_prior_prob_of_somatic_event,
            } = filter
            else {
                continue;
            };

            for (record, evidence) in self.somatic_evidence.iter().enumerate() {
                let Some(evidence) = evidence else {
                    continue;
                };
                self.probabilities[index][record] =
                    match evidence.artifact_probability(*log10_prior_prob_of_somatic_event, Some(model)) {
                        Ok(p) if p.is_finite() => p.clamp(0.0, 1.0),
                        Ok(_) => 0.0,
                        Err(e) => {
                            debug!("Weak evidence rescoring of record {} failed: {}", record, e);
                            0.0
                        }
                    };
            }
            rescored = true;
        }

        if rescored {
            for (record, max) in self.max_probabilities.iter_mut().enumerate() {
                *max = self
                    .probabilities
                    .iter()
                    .map(|column| column[record])
                    .fold(0.0, f64::max);
            }
        }
    }

    /// Calibrate the combined decision and every filter against the requested FDR
    pub fn calibrate(&self, requested_fdr: f64) -> Calibration {
        let combined = calibrate(COMBINED_FILTER_NAME, &self.max_probabilities, requested_fdr);
        let per_filter = self
            .filter_names
            .iter()
            .zip(&self.probabilities)
            .map(|(name, probabilities)| calibrate(name, probabilities, requested_fdr))
            .collect();

        Calibration { combined, per_filter }
    }
}
