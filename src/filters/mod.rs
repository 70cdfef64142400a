//! Artifact filters
//!
//! Every filter maps a record and the current [`FilteringContext`] to an artifact
//! probability in [0, 1]. Hard filters (see [`hard`]) answer 0 or 1, soft filters (see
//! [`soft`]) compute a genuine posterior. A filter whose required annotations are absent
//! from a record abstains with probability 0, and so does a filter that hits malformed
//! data for a record.

pub mod hard;
pub mod soft;

use crate::config::FilteringConfig;
use crate::context::FilteringContext;
use crate::math::index_of_max;
use crate::record::{keys, VariantRecord};
use crate::{SomaFilterError, SomaFilterResult};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub use soft::SomaticEvidence;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VariantFilter {
    TumorEvidence {
        tumor_lod_threshold: f64,
    },
    BaseQuality {
        min_median_base_quality: i64,
    },
    MappingQuality {
        min_median_mapping_quality: i64,
        long_indel_length: usize,
    },
    ReadPosition {
        min_median_read_position: i64,
    },
    ClusteredEvents {
        max_events_in_region: i64,
    },
    DuplicatedAltRead {
        unique_alt_read_count: i64,
    },
    FragmentLength {
        max_median_fragment_length_difference: i64,
    },
    NRatio {
        n_ratio: f64,
    },
    StrandArtifact {
        posterior_prob_threshold: f64,
        allele_fraction_threshold: f64,
    },
    StrictStrandBias {
        enabled: bool,
    },
    ShortTandemRepeat {
        min_pcr_slippage_bases: usize,
        pcr_slippage_rate: f64,
        pcr_slippage_p_value_threshold: f64,
    },
    Multiallelic {
        tumor_lod_threshold: f64,
        num_alt_alleles_threshold: usize,
    },
    PanelOfNormals,
    NormalArtifact {
        normal_artifact_lod_threshold: f64,
        normal_pileup_p_value_threshold: f64,
    },
    FilteredHaplotype {
        max_distance: u64,
    },
    LogOddsOverDepth {
        lod_by_depth: f64,
    },
    ChimericOriginalAlignment {
        non_mt_alt_by_alt: f64,
    },
    Contamination {
        log10_prior_prob_of_somatic_event: f64,
    },
    Germline {
        log10_prior_prob_of_somatic_event: f64,
    },
    ReadOrientation,
    WeakEvidence {
        log10_prior_prob_of_somatic_event: f64,
    },
}

impl VariantFilter {
    pub fn name(&self) -> &'static str {
        match self {
            VariantFilter::TumorEvidence { .. } => "t_lod",
            VariantFilter::BaseQuality { .. } => "base_qual",
            VariantFilter::MappingQuality { .. } => "map_qual",
            VariantFilter::ReadPosition { .. } => "position",
            VariantFilter::ClusteredEvents { .. } => "clustered_events",
            VariantFilter::DuplicatedAltRead { .. } => "duplicate",
            VariantFilter::FragmentLength { .. } => "fragment",
            VariantFilter::NRatio { .. } => "n_ratio",
            VariantFilter::StrandArtifact { .. } => "strand_bias",
            VariantFilter::StrictStrandBias { .. } => "strict_strand",
            VariantFilter::ShortTandemRepeat { .. } => "slippage",
            VariantFilter::Multiallelic { .. } => "multiallelic",
            VariantFilter::PanelOfNormals => "panel_of_normals",
            VariantFilter::NormalArtifact { .. } => "normal_artifact",
            VariantFilter::FilteredHaplotype { .. } => "haplotype",
            VariantFilter::LogOddsOverDepth { .. } => "low_avg_alt_quality",
            VariantFilter::ChimericOriginalAlignment { .. } => "chimeric_original_alignment",
            VariantFilter::Contamination { .. } => "contamination",
            VariantFilter::Germline { .. } => "germline",
            VariantFilter::ReadOrientation => "orientation",
            VariantFilter::WeakEvidence { .. } => "weak_evidence",
        }
    }

    /// Record-level annotations without which the filter abstains
    pub fn required_annotations(&self) -> &'static [&'static str] {
        match self {
            VariantFilter::TumorEvidence { .. }
            | VariantFilter::Multiallelic { .. }
            | VariantFilter::LogOddsOverDepth { .. }
            | VariantFilter::WeakEvidence { .. } => &[keys::TUMOR_LOD],
            VariantFilter::BaseQuality { .. } => &[keys::MEDIAN_BASE_QUALITY],
            VariantFilter::MappingQuality { .. } => &[keys::MEDIAN_MAPPING_QUALITY],
            VariantFilter::ReadPosition { .. } => &[keys::MEDIAN_READ_POSITION],
            VariantFilter::ClusteredEvents { .. } => &[keys::EVENT_COUNT_IN_HAPLOTYPE],
            VariantFilter::DuplicatedAltRead { .. } => &[keys::UNIQUE_ALT_READ_COUNT],
            VariantFilter::FragmentLength { .. } => &[keys::MEDIAN_FRAGMENT_LENGTH],
            VariantFilter::NRatio { .. } => &[keys::N_COUNT],
            VariantFilter::StrandArtifact { .. } => &[keys::STRAND_ARTIFACT_POSTERIOR, keys::STRAND_ARTIFACT_AF],
            VariantFilter::ShortTandemRepeat { .. } => &[keys::REPEATS_PER_ALLELE, keys::REPEAT_UNIT],
            VariantFilter::NormalArtifact { .. } => &[keys::NORMAL_ARTIFACT_LOD, keys::TUMOR_LOD],
            VariantFilter::ChimericOriginalAlignment { .. } => &[keys::ORIGINAL_CONTIG_MISMATCH],
            VariantFilter::Contamination { .. } => &[keys::POPULATION_AF],
            VariantFilter::Germline { .. } => &[keys::TUMOR_LOD, keys::POPULATION_AF],
            VariantFilter::StrictStrandBias { .. }
            | VariantFilter::PanelOfNormals
            | VariantFilter::FilteredHaplotype { .. }
            | VariantFilter::ReadOrientation => &[],
        }
    }

    /// INFO key of the phred-scaled posterior a soft filter attaches to its output record
    pub fn phred_annotation(&self) -> Option<&'static str> {
        match self {
            VariantFilter::Contamination { .. } => Some("CONTQ"),
            VariantFilter::Germline { .. } => Some("GERMQ"),
            VariantFilter::WeakEvidence { .. } => Some("SEQQ"),
            _ => None,
        }
    }

    /// Filters that judge the strength of tumor evidence rather than an artifact mode
    pub fn is_tumor_evidence(&self) -> bool {
        matches!(
            self,
            VariantFilter::TumorEvidence { .. } | VariantFilter::WeakEvidence { .. }
        )
    }

    pub fn artifact_probability(&self, record: &VariantRecord, context: &FilteringContext) -> f64 {
        if !self
            .required_annotations()
            .iter()
            .all(|key| record.has_attribute(key))
        {
            return 0.0;
        }

        match self.calculate_artifact_probability(record, context) {
            Ok(p) if p.is_finite() => p.clamp(0.0, 1.0),
            Ok(p) => {
                log::debug!(
                    "Filter {} produced {} at {}:{}; treating as 0",
                    self.name(),
                    p,
                    record.contig,
                    record.position
                );
                0.0
            }
            Err(e) => {
                log::debug!(
                    "Filter {} abstains at {}:{}: {}",
                    self.name(),
                    record.contig,
                    record.position,
                    e
                );
                0.0
            }
        }
    }

    fn calculate_artifact_probability(&self, record: &VariantRecord, context: &FilteringContext) -> SomaFilterResult<f64> {
        let is_artifact = match self {
            VariantFilter::TumorEvidence { tumor_lod_threshold } => {
                hard::weak_tumor_evidence(record, *tumor_lod_threshold)?
            }
            VariantFilter::BaseQuality { min_median_base_quality } => {
                hard::low_base_quality(record, *min_median_base_quality)?
            }
            VariantFilter::MappingQuality {
                min_median_mapping_quality,
                long_indel_length,
            } => hard::low_mapping_quality(record, *min_median_mapping_quality, *long_indel_length)?,
            VariantFilter::ReadPosition { min_median_read_position } => {
                hard::near_read_end(record, *min_median_read_position)?
            }
            VariantFilter::ClusteredEvents { max_events_in_region } => {
                hard::clustered_events(record, *max_events_in_region)?
            }
            VariantFilter::DuplicatedAltRead { unique_alt_read_count } => {
                hard::duplicated_alt_reads(record, *unique_alt_read_count)?
            }
            VariantFilter::FragmentLength {
                max_median_fragment_length_difference,
            } => hard::fragment_length_difference(record, *max_median_fragment_length_difference)?,
            VariantFilter::NRatio { n_ratio } => hard::excess_n_bases(record, context, *n_ratio)?,
            VariantFilter::StrandArtifact {
                posterior_prob_threshold,
                allele_fraction_threshold,
            } => hard::strand_artifact(record, *posterior_prob_threshold, *allele_fraction_threshold)?,
            VariantFilter::StrictStrandBias { enabled } => *enabled && hard::strict_strand_bias(record, context)?,
            VariantFilter::ShortTandemRepeat {
                min_pcr_slippage_bases,
                pcr_slippage_rate,
                pcr_slippage_p_value_threshold,
            } => hard::pcr_slippage(
                record,
                context,
                *min_pcr_slippage_bases,
                *pcr_slippage_rate,
                *pcr_slippage_p_value_threshold,
            )?,
            VariantFilter::Multiallelic {
                tumor_lod_threshold,
                num_alt_alleles_threshold,
            } => hard::too_many_alt_alleles(record, *tumor_lod_threshold, *num_alt_alleles_threshold)?,
            VariantFilter::PanelOfNormals => record.has_attribute(keys::IN_PANEL_OF_NORMALS),
            VariantFilter::NormalArtifact {
                normal_artifact_lod_threshold,
                normal_pileup_p_value_threshold,
            } => hard::artifact_in_normal(
                record,
                context,
                *normal_artifact_lod_threshold,
                *normal_pileup_p_value_threshold,
            )?,
            VariantFilter::FilteredHaplotype { max_distance } => {
                hard::on_filtered_haplotype(record, context, *max_distance)?
            }
            VariantFilter::LogOddsOverDepth { lod_by_depth } => hard::low_lod_by_depth(record, *lod_by_depth)?,
            VariantFilter::ChimericOriginalAlignment { non_mt_alt_by_alt } => {
                hard::chimeric_original_alignment(record, *non_mt_alt_by_alt)?
            }
            VariantFilter::Contamination {
                log10_prior_prob_of_somatic_event,
            } => return soft::contamination_posterior(record, context, *log10_prior_prob_of_somatic_event),
            VariantFilter::Germline {
                log10_prior_prob_of_somatic_event,
            } => return soft::germline_posterior(record, context, *log10_prior_prob_of_somatic_event),
            VariantFilter::ReadOrientation => return soft::read_orientation_posterior(record, context),
            VariantFilter::WeakEvidence {
                log10_prior_prob_of_somatic_event,
            } => {
                return SomaticEvidence::from_record(record, context)?
                    .artifact_probability(*log10_prior_prob_of_somatic_event, context.background_model())
            }
        };

        Ok(if is_artifact { 1.0 } else { 0.0 })
    }
}

/// The filters run by default, in output order
pub fn standard_filters(config: &FilteringConfig) -> Vec<VariantFilter> {
    let mut filters = vec![
        VariantFilter::TumorEvidence {
            tumor_lod_threshold: config.tumor_lod_threshold,
        },
        VariantFilter::WeakEvidence {
            log10_prior_prob_of_somatic_event: config.log10_prior_prob_of_somatic_event,
        },
        VariantFilter::BaseQuality {
            min_median_base_quality: config.min_median_base_quality,
        },
        VariantFilter::MappingQuality {
            min_median_mapping_quality: config.min_median_mapping_quality,
            long_indel_length: config.long_indel_length,
        },
        VariantFilter::DuplicatedAltRead {
            unique_alt_read_count: config.unique_alt_read_count,
        },
        VariantFilter::StrandArtifact {
            posterior_prob_threshold: config.strand_artifact_posterior_prob_threshold,
            allele_fraction_threshold: config.strand_artifact_allele_fraction_threshold,
        },
        VariantFilter::Contamination {
            log10_prior_prob_of_somatic_event: config.log10_prior_prob_of_somatic_event,
        },
        VariantFilter::PanelOfNormals,
        VariantFilter::NormalArtifact {
            normal_artifact_lod_threshold: config.normal_artifact_lod_threshold,
            normal_pileup_p_value_threshold: config.normal_pileup_p_value_threshold,
        },
        VariantFilter::ReadOrientation,
    ];

    if config.mitochondria {
        filters.extend([
            VariantFilter::LogOddsOverDepth {
                lod_by_depth: config.lod_by_depth,
            },
            VariantFilter::ChimericOriginalAlignment {
                non_mt_alt_by_alt: config.non_mt_alt_by_alt,
            },
        ]);
    } else {
        filters.extend([
            VariantFilter::ClusteredEvents {
                max_events_in_region: config.max_events_in_region,
            },
            VariantFilter::Multiallelic {
                tumor_lod_threshold: config.tumor_lod_threshold,
                num_alt_alleles_threshold: config.num_alt_alleles_threshold,
            },
            VariantFilter::ReadPosition {
                min_median_read_position: config.min_median_read_position,
            },
            VariantFilter::FragmentLength {
                max_median_fragment_length_difference: config.max_median_fragment_length_difference,
            },
            VariantFilter::NRatio {
                n_ratio: config.n_ratio,
            },
            VariantFilter::StrictStrandBias {
                enabled: config.strict_strand_bias,
            },
            VariantFilter::ShortTandemRepeat {
                min_pcr_slippage_bases: config.min_pcr_slippage_bases,
                pcr_slippage_rate: config.pcr_slippage_rate,
                pcr_slippage_p_value_threshold: config.pcr_slippage_p_value_threshold,
            },
            VariantFilter::FilteredHaplotype {
                max_distance: config.max_distance_to_filtered_call_on_same_haplotype,
            },
            VariantFilter::Germline {
                log10_prior_prob_of_somatic_event: config.log10_prior_prob_of_somatic_event,
            },
        ]);
    }

    filters
}

/// Artifact probability of every filter for one record, in filter order.
///
/// Filters only read the record and the context, so they may be scored on the rayon
/// pool; records themselves are never scored concurrently.
pub fn score_record(
    filters: &[VariantFilter],
    record: &VariantRecord,
    context: &FilteringContext,
    parallel: bool,
) -> Vec<f64> {
    if parallel {
        filters
            .par_iter()
            .map(|filter| filter.artifact_probability(record, context))
            .collect()
    } else {
        filters
            .iter()
            .map(|filter| filter.artifact_probability(record, context))
            .collect()
    }
}

/// Lowest posterior backed by samples holding at least half of the total alt depth.
///
/// Pairs are (alt depth, posterior); an empty list gives 0.
pub fn weighted_median_posterior(mut depths_and_posteriors: Vec<(u32, f64)>) -> f64 {
    let total_alt_depth: u64 = depths_and_posteriors.iter().map(|(d, _)| *d as u64).sum();
    depths_and_posteriors.sort_by(|a, b| a.1.total_cmp(&b.1));

    let mut cumulative_alt_depth = 0u64;
    for (depth, posterior) in depths_and_posteriors {
        cumulative_alt_depth += depth as u64;
        if cumulative_alt_depth * 2 >= total_alt_depth {
            return posterior;
        }
    }
    0.0
}

/// Sum of read counts, saturating instead of overflowing on corrupt depths
pub(crate) fn total_depth<'a, I: IntoIterator<Item = &'a u32>>(depths: I) -> u32 {
    depths.into_iter().fold(0, |sum, &d| sum.saturating_add(d))
}

pub(crate) fn malformed(record: &VariantRecord, what: &str) -> SomaFilterError {
    SomaFilterError::MalformedRecord(format!("{}:{} {}", record.contig, record.position, what))
}

/// Allele depths summed over the selected samples, one entry per allele
pub fn sum_allele_depths(
    record: &VariantRecord,
    context: &FilteringContext,
    include_tumor: bool,
    include_normal: bool,
) -> SomaFilterResult<Vec<u32>> {
    let num_alleles = record.num_alleles();
    let mut depths = vec![0u32; num_alleles];

    for genotype in &record.genotypes {
        let is_normal = context.is_normal(&genotype.sample);
        if (is_normal && !include_normal) || (!is_normal && !include_tumor) {
            continue;
        }
        if genotype.allele_depths.len() != num_alleles {
            return Err(malformed(
                record,
                &format!(
                    "sample {} has {} allele depths for {} alleles",
                    genotype.sample,
                    genotype.allele_depths.len(),
                    num_alleles
                ),
            ));
        }
        for (total, depth) in depths.iter_mut().zip(&genotype.allele_depths) {
            *total = total.saturating_add(*depth);
        }
    }

    Ok(depths)
}

/// Tumor alt allele fractions averaged over tumor samples, weighted by sample depth
pub fn weighted_average_tumor_afs(record: &VariantRecord, context: &FilteringContext) -> SomaFilterResult<Vec<f64>> {
    let num_alt = record.num_alleles().saturating_sub(1);
    let mut fractions = vec![0.0; num_alt];
    let mut total_weight = 0.0;

    for genotype in context.tumor_genotypes(record) {
        let weight = genotype.depth() as f64;
        total_weight += weight;
        let sample_fractions = if genotype.has_attribute(keys::ALLELE_FRACTION) {
            genotype.f64_values(keys::ALLELE_FRACTION)?
        } else {
            vec![0.0; num_alt]
        };
        if sample_fractions.len() != num_alt {
            return Err(malformed(record, &format!("sample {} has malformed AF", genotype.sample)));
        }
        for (total, af) in fractions.iter_mut().zip(sample_fractions) {
            *total += weight * af;
        }
    }

    if total_weight == 0.0 {
        return Err(malformed(record, "no tumor read depth"));
    }
    Ok(fractions.into_iter().map(|f| f / total_weight).collect())
}

/// Index into the alt alleles of the largest tumor log odds
pub fn max_tumor_lod_index(record: &VariantRecord) -> SomaFilterResult<usize> {
    let tumor_lods = record.f64_values(keys::TUMOR_LOD)?;
    index_of_max(&tumor_lods).ok_or_else(|| malformed(record, "empty TLOD"))
}


#[cfg(test)]
mod tests {
    use super::test_support::snv;
    use super::*;
    use crate::allele_fraction::AlleleCount;
    use crate::record::{AttributeValue, Genotype};

    fn context() -> FilteringContext {
        FilteringContext::new(["normal"], 0.0)
    }

    #[test]
    fn test_weighted_median() {
        let pairs = vec![(1, 0.4), (1, 0.1), (1, 0.3), (1, 0.2)];
        assert_eq!(weighted_median_posterior(pairs), 0.2);

        // one deep sample dominates
        assert_eq!(weighted_median_posterior(vec![(10, 0.9), (1, 0.1), (1, 0.2)]), 0.9);
        assert_eq!(weighted_median_posterior(vec![]), 0.0);
        assert_eq!(weighted_median_posterior(vec![(0, 0.7)]), 0.7);
    }

    #[test]
    fn test_huge_depths_saturate() {
        let record = snv([u32::MAX - 5, 10], [50, 0], 20.0).with_genotype(Genotype::new("tumor2", vec![10, 10]));

        let depths = sum_allele_depths(&record, &context(), true, false).unwrap();
        assert_eq!(depths, vec![u32::MAX, 20]);
        assert_eq!(record.genotypes[0].depth(), u32::MAX);
        assert_eq!(total_depth(&depths), u32::MAX);
        assert_eq!(AlleleCount::new(u32::MAX, 1).total(), u32::MAX);

        // scoring such a record must not panic
        let probabilities = score_record(&standard_filters(&FilteringConfig::default()), &record, &context(), false);
        assert!(probabilities.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_missing_required_annotation_abstains() {
        let record = VariantRecord::new("chr1", 10, &["A", "C"]);
        let ctx = context();
        for filter in standard_filters(&FilteringConfig::default()) {
            if !filter.required_annotations().is_empty() {
                assert_eq!(filter.artifact_probability(&record, &ctx), 0.0, "{}", filter.name());
            }
        }
    }

    #[test]
    fn test_malformed_record_abstains() {
        // allele depths that do not match the allele count
        let record = VariantRecord::new("chr1", 10, &["A", "C"])
            .with_attribute(keys::TUMOR_LOD, AttributeValue::FloatList(vec![]))
            .with_attribute(keys::N_COUNT, AttributeValue::Int(5))
            .with_attribute(keys::POPULATION_AF, AttributeValue::FloatList(vec![3.0]))
            .with_genotype(Genotype::new("tumor", vec![1, 2, 3]));
        let ctx = context();
        let mut config = FilteringConfig::default();
        config.n_ratio = 0.1;

        for filter in standard_filters(&config) {
            assert_eq!(filter.artifact_probability(&record, &ctx), 0.0, "{}", filter.name());
        }
    }

    #[test]
    fn test_standard_filter_sets() {
        let nuclear = standard_filters(&FilteringConfig::default());
        let names: Vec<&str> = nuclear.iter().map(VariantFilter::name).collect();
        assert_eq!(names[0], "t_lod");
        assert!(names.contains(&"germline"));
        assert!(names.contains(&"haplotype"));
        assert!(names.contains(&"map_qual"));
        assert!(!names.contains(&"low_avg_alt_quality"));

        let mut config = FilteringConfig::default();
        config.mitochondria = true;
        let mito: Vec<&str> = standard_filters(&config).iter().map(VariantFilter::name).collect();
        assert!(mito.contains(&"low_avg_alt_quality"));
        assert!(mito.contains(&"chimeric_original_alignment"));
        assert!(!mito.contains(&"germline"));

        let mut unique = names.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), names.len());
    }

    #[test]
    fn test_parallel_scoring_matches_sequential() {
        let record = snv([20, 10], [30, 0], 20.0).with_attribute(keys::IN_PANEL_OF_NORMALS, AttributeValue::Flag);
        let ctx = context();
        let filters = standard_filters(&FilteringConfig::default());
        assert_eq!(
            score_record(&filters, &record, &ctx, true),
            score_record(&filters, &record, &ctx, false)
        );
    }

    #[test]
    fn test_sum_allele_depths() {
        let record = snv([20, 10], [30, 1], 20.0);
        let ctx = context();
        assert_eq!(sum_allele_depths(&record, &ctx, true, true).unwrap(), vec![50, 11]);
        assert_eq!(sum_allele_depths(&record, &ctx, true, false).unwrap(), vec![20, 10]);
        assert_eq!(sum_allele_depths(&record, &ctx, false, true).unwrap(), vec![30, 1]);
    }

    #[test]
    fn test_weighted_average_tumor_afs() {
        let record = VariantRecord::new("chr1", 1, &["A", "T"])
            .with_genotype(
                Genotype::new("t1", vec![10, 10]).with_attribute(keys::ALLELE_FRACTION, AttributeValue::Float(0.5)),
            )
            .with_genotype(
                Genotype::new("t2", vec![50, 10]).with_attribute(keys::ALLELE_FRACTION, AttributeValue::Float(0.1)),
            );
        let afs = weighted_average_tumor_afs(&record, &context()).unwrap();
        assert!((afs[0] - (20.0 * 0.5 + 60.0 * 0.1) / 80.0).abs() < 1e-12);

        let empty = VariantRecord::new("chr1", 1, &["A", "T"]);
        assert!(weighted_average_tumor_afs(&empty, &context()).is_err());
    }
}
