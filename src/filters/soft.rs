//! Probabilistic artifact filters
//!
//! Each function returns a posterior probability that the record is an artifact of one
//! kind.

use super::{
    malformed, max_tumor_lod_index, sum_allele_depths, total_depth, weighted_average_tumor_afs,
    weighted_median_posterior,
};
use crate::allele_fraction::{AlleleCount, AlleleFractionModel};
use crate::context::FilteringContext;
use crate::math::{
    binomial_probability, index_of_max, log10_sum_log10, normalize_from_log10, x_log10_y, LOG10_OF_E,
    LOG10_ONE_HALF,
};
use crate::record::{keys, VariantRecord};
use crate::SomaFilterResult;

/// Below this tumor allele fraction a germline hom-alt cannot explain the tumor reads
const MIN_ALLELE_FRACTION_FOR_GERMLINE_HOM_ALT: f64 = 0.9;

/// log10(1 - 10^x) for x < 0
fn log10_one_minus_pow10(x: f64) -> f64 {
    (-(10f64.powf(x))).ln_1p() * LOG10_OF_E
}

fn population_allele_frequencies(record: &VariantRecord) -> SomaFilterResult<Vec<f64>> {
    Ok(record
        .f64_values(keys::POPULATION_AF)?
        .into_iter()
        .map(|neg_log10| 10f64.powf(-neg_log10))
        .collect())
}

/// Posterior that the alt reads come from contaminating DNA rather than a somatic event,
/// aggregated over tumor samples by weighted median
pub fn contamination_posterior(
    record: &VariantRecord,
    context: &FilteringContext,
    log10_prior_prob_of_somatic_event: f64,
) -> SomaFilterResult<f64> {
    let somatic_prior = 10f64.powf(log10_prior_prob_of_somatic_event);
    let population_afs = population_allele_frequencies(record)?;
    let mut depths_and_posteriors = Vec::new();

    for genotype in context.tumor_genotypes(record) {
        let contamination = context.contamination(&genotype.sample);
        let alt_index = if genotype.has_attribute(keys::ALLELE_FRACTION) {
            index_of_max(&genotype.f64_values(keys::ALLELE_FRACTION)?).unwrap_or(0)
        } else {
            0
        };

        // AD covers all alleles while AF covers alts only
        let alt_count = *genotype
            .allele_depths
            .get(alt_index + 1)
            .ok_or_else(|| malformed(record, "AD shorter than AF"))?;
        let depth = genotype.depth();
        let allele_frequency = population_afs.get(alt_index).copied().unwrap_or(0.0);

        let (n, k) = (depth as u64, alt_count as u64);
        let somatic_likelihood = 1.0 / (depth as f64 + 1.0);
        let single_contaminant_likelihood = 2.0
            * allele_frequency
            * (1.0 - allele_frequency)
            * binomial_probability(n, k, contamination / 2.0)?
            + allele_frequency.powi(2) * binomial_probability(n, k, contamination)?;
        let many_contaminant_likelihood = binomial_probability(n, k, contamination * allele_frequency)?;
        let contaminant_likelihood = single_contaminant_likelihood.max(many_contaminant_likelihood);

        let weighted_contaminant = (1.0 - somatic_prior) * contaminant_likelihood;
        let posterior = weighted_contaminant / (weighted_contaminant + somatic_prior * somatic_likelihood);
        depths_and_posteriors.push((alt_count, posterior));
    }

    Ok(weighted_median_posterior(depths_and_posteriors))
}

/// Posterior that the call is a germline variant.
///
/// The tumor reads are compared against a germline het at the segment minor allele
/// fraction and a germline hom-alt, with population allele frequencies as germline priors
/// and the normal log odds, when present, as evidence against germline.
pub fn germline_posterior(
    record: &VariantRecord,
    context: &FilteringContext,
    log10_prior_prob_of_somatic_event: f64,
) -> SomaFilterResult<f64> {
    let alt_index = max_tumor_lod_index(record)?;
    let population_afs = population_allele_frequencies(record)?;
    let normal_lods = if record.has_attribute(keys::NORMAL_LOD) {
        Some(record.f64_values(keys::NORMAL_LOD)?)
    } else {
        None
    };

    let mut weighted_sum_of_mafs = 0.0;
    for genotype in context.tumor_genotypes(record) {
        let maf = context.minor_allele_fraction(&genotype.sample, &record.contig, record.position);
        weighted_sum_of_mafs += maf * genotype.depth() as f64;
    }

    let alt_allele_fractions = weighted_average_tumor_afs(record, context)?;
    let allele_counts = sum_allele_depths(record, context, true, false)?;
    let total_count = total_depth(&allele_counts);
    if total_count == 0 {
        return Err(malformed(record, "no tumor read depth"));
    }
    // expected allele fraction of a germline het in the pooled tumor reads
    let maf = weighted_sum_of_mafs / total_count as f64;
    let ref_count = allele_counts[0] as f64;

    let alt_count = *allele_counts
        .get(alt_index + 1)
        .ok_or_else(|| malformed(record, "TLOD longer than AD"))? as f64;
    let tumor_af = *alt_allele_fractions
        .get(alt_index)
        .ok_or_else(|| malformed(record, "TLOD longer than AF"))?;
    let population_af = *population_afs
        .get(alt_index)
        .ok_or_else(|| malformed(record, "TLOD longer than POPAF"))?;
    let normal_lod = match &normal_lods {
        Some(lods) => *lods
            .get(alt_index)
            .ok_or_else(|| malformed(record, "TLOD longer than NLOD"))?,
        None => 0.0,
    };

    let log10_alt_minor = x_log10_y(ref_count, 1.0 - maf) + x_log10_y(alt_count, maf);
    let log10_alt_major = x_log10_y(ref_count, maf) + x_log10_y(alt_count, 1.0 - maf);
    let log10_germline_het_likelihood = LOG10_ONE_HALF + log10_sum_log10(&[log10_alt_minor, log10_alt_major]);
    let log10_somatic_likelihood = x_log10_y(ref_count, 1.0 - tumor_af) + x_log10_y(alt_count, tumor_af);
    let log10_odds_het_vs_somatic = log10_germline_het_likelihood - log10_somatic_likelihood;

    // a hom-alt explains the tumor reads about as well as a somatic call when the
    // allele fraction is high
    let log10_odds_hom_alt_vs_somatic = if tumor_af < MIN_ALLELE_FRACTION_FOR_GERMLINE_HOM_ALT {
        f64::NEG_INFINITY
    } else {
        0.0
    };

    let log10_germline = log10_sum_log10(&[
        (2.0 * population_af * (1.0 - population_af)).log10() + log10_odds_het_vs_somatic,
        2.0 * population_af.log10() + log10_odds_hom_alt_vs_somatic,
    ]) - normal_lod;
    let log10_somatic = log10_prior_prob_of_somatic_event + 2.0 * (1.0 - population_af).log10();

    let log10_posterior = log10_germline - log10_sum_log10(&[log10_germline, log10_somatic]);
    Ok(10f64.powf(log10_posterior))
}

/// Weighted median of the per-sample read orientation artifact posteriors.
///
/// Only SNVs are eligible, and only samples annotated with both the posterior and the
/// prior contribute.
pub fn read_orientation_posterior(record: &VariantRecord, context: &FilteringContext) -> SomaFilterResult<f64> {
    if !record.is_snp() {
        return Ok(0.0);
    }

    let mut depths_and_posteriors = Vec::new();
    for genotype in context.tumor_genotypes(record) {
        if !genotype.has_attribute(keys::READ_ORIENTATION_POSTERIOR)
            || !genotype.has_attribute(keys::READ_ORIENTATION_PRIOR)
        {
            continue;
        }
        let posterior = genotype.f64_value(keys::READ_ORIENTATION_POSTERIOR)?;
        depths_and_posteriors.push((genotype.alt_depth(), posterior));
    }

    Ok(weighted_median_posterior(depths_and_posteriors))
}

/// Tumor evidence of one record: the best tumor log odds and the pooled tumor counts of
/// its allele
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SomaticEvidence {
    pub tumor_log10_odds: f64,
    pub alt_count: u32,
    pub ref_count: u32,
}

impl SomaticEvidence {
    pub fn from_record(record: &VariantRecord, context: &FilteringContext) -> SomaFilterResult<Self> {
        let tumor_lods = record.f64_values(keys::TUMOR_LOD)?;
        let alt_index = index_of_max(&tumor_lods).ok_or_else(|| malformed(record, "empty TLOD"))?;
        let depths = sum_allele_depths(record, context, true, false)?;
        let alt_count = *depths
            .get(alt_index + 1)
            .ok_or_else(|| malformed(record, "TLOD longer than AD"))?;
        let ref_count = *depths.first().ok_or_else(|| malformed(record, "empty AD"))?;

        Ok(Self {
            tumor_log10_odds: tumor_lods[alt_index],
            alt_count,
            ref_count,
        })
    }

    pub fn allele_count(&self) -> AlleleCount {
        AlleleCount::new(self.alt_count, self.ref_count)
    }

    /// Posterior that the record is not a somatic variant.
    ///
    /// Without a fitted allele-fraction model the log odds are used as they are.
    pub fn artifact_probability(
        &self,
        log10_prior_prob_of_somatic_event: f64,
        model: Option<&AlleleFractionModel>,
    ) -> SomaFilterResult<f64> {
        let correction = match model {
            Some(model) => model.log10_odds_correction(self.alt_count as f64, self.ref_count as f64)?,
            None => 0.0,
        };
        let log10_somatic = log10_prior_prob_of_somatic_event + self.tumor_log10_odds + correction;
        let log10_nothing = log10_one_minus_pow10(log10_prior_prob_of_somatic_event);

        Ok(normalize_from_log10(&[log10_nothing, log10_somatic])[0])
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::snv;
    use super::*;
    use crate::config::ClusteringConfig;
    use crate::context::{MinorAlleleFractionSegment, SegmentTable};
    use crate::record::{AttributeValue, Genotype};
    use std::collections::HashMap;

    fn context() -> FilteringContext {
        FilteringContext::new(["normal"], 0.0)
    }

    #[test]
    fn test_contamination_posterior() {
        let record = snv([90, 10], [100, 0], 20.0).with_attribute(keys::POPULATION_AF, AttributeValue::FloatList(vec![1.0]));

        let clean = context();
        assert_eq!(contamination_posterior(&record, &clean, -6.0).unwrap(), 0.0);

        let contaminated = context().with_contamination("tumor", 0.2);
        assert!(contamination_posterior(&record, &contaminated, -6.0).unwrap() > 0.99);

        // a very rare allele is unlikely to come from a contaminant
        let rare = snv([90, 10], [100, 0], 20.0).with_attribute(keys::POPULATION_AF, AttributeValue::FloatList(vec![9.0]));
        assert!(contamination_posterior(&rare, &contaminated, -2.0).unwrap() < 0.5);
    }

    #[test]
    fn test_germline_posterior() {
        let common = snv([50, 50], [50, 50], 20.0).with_attribute(keys::POPULATION_AF, AttributeValue::FloatList(vec![0.3]));
        assert!(germline_posterior(&common, &context(), -6.0).unwrap() > 0.99);

        let rare = snv([50, 50], [50, 50], 20.0).with_attribute(keys::POPULATION_AF, AttributeValue::FloatList(vec![8.0]));
        assert!(germline_posterior(&rare, &context(), -6.0).unwrap() < 0.1);

        // confident normal log odds argue against germline
        let with_normal = common.clone().with_attribute(keys::NORMAL_LOD, AttributeValue::FloatList(vec![10.0]));
        assert!(germline_posterior(&with_normal, &context(), -6.0).unwrap() < 0.01);
    }

    #[test]
    fn test_germline_posterior_uses_segment_maf() {
        // alt fraction 0.2 fits a het in a segment with minor allele fraction 0.2
        let record = snv([80, 20], [50, 50], 20.0).with_attribute(keys::POPULATION_AF, AttributeValue::FloatList(vec![2.0]));
        let balanced = germline_posterior(&record, &context(), -6.0).unwrap();

        let segments = SegmentTable::new(vec![MinorAlleleFractionSegment {
            contig: "chr1".to_string(),
            start: 1,
            end: 5000,
            minor_allele_fraction: 0.2,
        }]);
        let imbalanced = germline_posterior(&record, &context().with_segments("tumor", segments), -6.0).unwrap();

        assert!(imbalanced > balanced);
    }

    #[test]
    fn test_read_orientation_posterior() {
        let oriented = |ad: Vec<u32>, posterior: f64| {
            Genotype::new("t", ad)
                .with_attribute(keys::READ_ORIENTATION_POSTERIOR, AttributeValue::Float(posterior))
                .with_attribute(keys::READ_ORIENTATION_PRIOR, AttributeValue::Float(0.01))
        };
        let mut record = VariantRecord::new("chr1", 1, &["A", "T"]);
        record.genotypes = vec![
            oriented(vec![10, 30], 0.9),
            Genotype { sample: "t2".to_string(), ..oriented(vec![10, 5], 0.1) },
            Genotype::new("t3", vec![10, 50]),
        ];
        assert_eq!(read_orientation_posterior(&record, &context()).unwrap(), 0.9);

        let mut indel = record.clone();
        indel.alleles = vec!["AT".to_string(), "A".to_string()];
        assert_eq!(read_orientation_posterior(&indel, &context()).unwrap(), 0.0);
    }

    #[test]
    fn test_somatic_evidence() {
        let record = snv([80, 20], [50, 0], 12.0);
        let evidence = SomaticEvidence::from_record(&record, &context()).unwrap();
        assert_eq!(evidence.tumor_log10_odds, 12.0);
        assert_eq!(evidence.allele_count(), AlleleCount::new(20, 80));

        let strong = evidence.artifact_probability(-6.0, None).unwrap();
        assert!((strong - 1e-6 / (1e-6 + 1e6 * 1e-6)).abs() < 1e-6);

        let weak = SomaticEvidence { tumor_log10_odds: 2.0, ..evidence };
        assert!(weak.artifact_probability(-6.0, None).unwrap() > 0.99);
    }

    #[test]
    fn test_flat_background_leaves_evidence_unchanged() {
        let model = AlleleFractionModel::fit(&[], &ClusteringConfig::default()).unwrap();
        let calibrated = context().finalize(HashMap::new(), model).unwrap();
        let evidence = SomaticEvidence::from_record(&snv([80, 20], [50, 0], 7.0), &calibrated).unwrap();

        let without = evidence.artifact_probability(-6.0, None).unwrap();
        let with = evidence
            .artifact_probability(-6.0, calibrated.background_model())
            .unwrap();
        assert!((without - with).abs() < 1e-9);
    }
}
