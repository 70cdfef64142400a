//! Deterministic artifact tests
//!
//! Each function answers whether the record is an artifact of one kind. Required
//! annotations have already been checked by the caller.

use super::{malformed, max_tumor_lod_index, sum_allele_depths, total_depth};
use crate::context::FilteringContext;
use crate::math::{binomial_upper_tail, index_of_max, max_value, qual_to_error_prob};
use crate::record::{keys, VariantRecord};
use crate::SomaFilterResult;

/// Index of the "no artifact" state in the strand artifact posteriors
const STRAND_NO_ARTIFACT_STATE: usize = 2;

/// Normal artifacts are only called when the normal allele fraction is not much smaller
/// than the tumor's
const MIN_NORMAL_ARTIFACT_RATIO: f64 = 0.1;

/// Used when the median base quality annotation is missing
const IMPUTED_NORMAL_BASE_QUALITY: i64 = 30;

fn value_at<T: Copy>(record: &VariantRecord, values: &[T], index: usize, key: &str) -> SomaFilterResult<T> {
    values
        .get(index)
        .copied()
        .ok_or_else(|| malformed(record, &format!("{} has no entry {}", key, index)))
}

pub fn weak_tumor_evidence(record: &VariantRecord, tumor_lod_threshold: f64) -> SomaFilterResult<bool> {
    let tumor_lods = record.f64_values(keys::TUMOR_LOD)?;
    let max_lod = max_value(&tumor_lods).ok_or_else(|| malformed(record, "empty TLOD"))?;
    Ok(max_lod < tumor_lod_threshold)
}

/// Median base quality of the most likely alt allele is too low
pub fn low_base_quality(record: &VariantRecord, min_median_base_quality: i64) -> SomaFilterResult<bool> {
    let base_qualities = record.i64_values(keys::MEDIAN_BASE_QUALITY)?;
    let alt_index = max_tumor_lod_index(record)?;
    let quality = value_at(record, &base_qualities, alt_index + 1, keys::MEDIAN_BASE_QUALITY)?;
    Ok(quality < min_median_base_quality)
}

/// Median mapping quality of the alt reads is too low.
///
/// A long indel maps poorly however unique its locus, so the reference reads' quality
/// stands in for the mappability of the region.
pub fn low_mapping_quality(
    record: &VariantRecord,
    min_median_mapping_quality: i64,
    long_indel_length: usize,
) -> SomaFilterResult<bool> {
    let qualities = record.i64_values(keys::MEDIAN_MAPPING_QUALITY)?;
    let ref_length = record.alleles.first().map_or(0, String::len);
    let indel_length = record
        .alleles
        .iter()
        .skip(1)
        .map(|allele| allele.len().abs_diff(ref_length))
        .max()
        .unwrap_or(0);

    let index = if indel_length < long_indel_length { 1 } else { 0 };
    let quality = value_at(record, &qualities, index, keys::MEDIAN_MAPPING_QUALITY)?;
    Ok(quality < min_median_mapping_quality)
}

pub fn near_read_end(record: &VariantRecord, min_median_read_position: i64) -> SomaFilterResult<bool> {
    let positions = record.i64_values(keys::MEDIAN_READ_POSITION)?;
    let position = value_at(record, &positions, 0, keys::MEDIAN_READ_POSITION)?;
    // negative values mean the annotation could not be computed
    Ok(position > -1 && position < min_median_read_position)
}

pub fn clustered_events(record: &VariantRecord, max_events_in_region: i64) -> SomaFilterResult<bool> {
    Ok(record.i64_value(keys::EVENT_COUNT_IN_HAPLOTYPE)? > max_events_in_region)
}

/// PCR duplicates with unique UMIs amplifying an erroneous alt allele
pub fn duplicated_alt_reads(record: &VariantRecord, unique_alt_read_count: i64) -> SomaFilterResult<bool> {
    Ok(record.i64_value(keys::UNIQUE_ALT_READ_COUNT)? <= unique_alt_read_count)
}

pub fn fragment_length_difference(
    record: &VariantRecord,
    max_median_fragment_length_difference: i64,
) -> SomaFilterResult<bool> {
    let lengths = record.i64_values(keys::MEDIAN_FRAGMENT_LENGTH)?;
    let ref_length = value_at(record, &lengths, 0, keys::MEDIAN_FRAGMENT_LENGTH)?;
    let alt_length = value_at(record, &lengths, 1, keys::MEDIAN_FRAGMENT_LENGTH)?;
    Ok((alt_length - ref_length).abs() > max_median_fragment_length_difference)
}

/// Too many N bases at the locus relative to alt reads
pub fn excess_n_bases(record: &VariantRecord, context: &FilteringContext, n_ratio: f64) -> SomaFilterResult<bool> {
    let depths = sum_allele_depths(record, context, true, true)?;
    let alt_count = total_depth(depths.iter().skip(1));
    if alt_count == 0 {
        return Ok(false);
    }
    let n_count = record.i64_value(keys::N_COUNT)?;
    Ok(n_count as f64 / alt_count as f64 >= n_ratio)
}

pub fn strand_artifact(
    record: &VariantRecord,
    posterior_prob_threshold: f64,
    allele_fraction_threshold: f64,
) -> SomaFilterResult<bool> {
    let posteriors = record.f64_values(keys::STRAND_ARTIFACT_POSTERIOR)?;
    let allele_fractions = record.f64_values(keys::STRAND_ARTIFACT_AF)?;

    let state = index_of_max(&posteriors)
        .ok_or_else(|| malformed(record, "empty strand artifact posteriors"))?;
    if state == STRAND_NO_ARTIFACT_STATE {
        return Ok(false);
    }

    let allele_fraction = value_at(record, &allele_fractions, state, keys::STRAND_ARTIFACT_AF)?;
    Ok(posteriors[state] > posterior_prob_threshold && allele_fraction < allele_fraction_threshold)
}

/// No alt reads on one of the two strands across the tumor samples.
///
/// Abstains unless every tumor sample carries strand counts.
pub fn strict_strand_bias(record: &VariantRecord, context: &FilteringContext) -> SomaFilterResult<bool> {
    let mut alt_forward = 0i64;
    let mut alt_reverse = 0i64;
    let mut num_tumor = 0;

    for genotype in context.tumor_genotypes(record) {
        if !genotype.has_attribute(keys::STRAND_BIAS_BY_SAMPLE) {
            return Ok(false);
        }
        // ref forward, ref reverse, alt forward, alt reverse
        let counts = genotype.i64_values(keys::STRAND_BIAS_BY_SAMPLE)?;
        if counts.len() != 4 {
            return Err(malformed(record, "strand bias table must have four entries"));
        }
        alt_forward += counts[2];
        alt_reverse += counts[3];
        num_tumor += 1;
    }

    Ok(num_tumor > 0 && (alt_forward == 0 || alt_reverse == 0))
}

/// A one-unit contraction or expansion of a long tandem repeat that PCR slippage
/// explains.
///
/// The p-value is the chance of seeing at least the observed number of alt reads from
/// slippage alone; the call is kept only when that chance is small.
pub fn pcr_slippage(
    record: &VariantRecord,
    context: &FilteringContext,
    min_pcr_slippage_bases: usize,
    pcr_slippage_rate: f64,
    pcr_slippage_p_value_threshold: f64,
) -> SomaFilterResult<bool> {
    let repeats_per_allele = record.i64_values(keys::REPEATS_PER_ALLELE)?;
    if repeats_per_allele.len() < 2 {
        return Ok(false);
    }
    let repeat_unit = record.str_value(keys::REPEAT_UNIT)?;

    let reference_repeat_bases = repeat_unit.len() as i64 * repeats_per_allele[0];
    let num_slips = repeats_per_allele[0] - repeats_per_allele[1];
    if reference_repeat_bases < min_pcr_slippage_bases as i64 || num_slips.abs() != 1 {
        return Ok(false);
    }

    let depths = sum_allele_depths(record, context, true, false)?;
    let p_value = if depths.len() < 2 {
        1.0
    } else {
        let total = total_depth(&depths);
        binomial_upper_tail(total as u64, depths[1] as u64, pcr_slippage_rate)?
    };
    Ok(p_value > pcr_slippage_p_value_threshold)
}

pub fn too_many_alt_alleles(
    record: &VariantRecord,
    tumor_lod_threshold: f64,
    num_alt_alleles_threshold: usize,
) -> SomaFilterResult<bool> {
    let tumor_lods = record.f64_values(keys::TUMOR_LOD)?;
    let passing = tumor_lods.iter().filter(|&&lod| lod > tumor_lod_threshold).count();
    Ok(passing > num_alt_alleles_threshold)
}

/// Evidence for the alt allele in the normal samples.
///
/// Either the normal artifact log odds are decisive, or the normal pileup holds more
/// alt reads than base errors at the median reference quality would explain.
pub fn artifact_in_normal(
    record: &VariantRecord,
    context: &FilteringContext,
    normal_artifact_lod_threshold: f64,
    normal_pileup_p_value_threshold: f64,
) -> SomaFilterResult<bool> {
    let alt_index = max_tumor_lod_index(record)?;

    let tumor_depths = sum_allele_depths(record, context, true, false)?;
    let tumor_depth = total_depth(&tumor_depths);
    let tumor_alt_depth = value_at(record, &tumor_depths, alt_index + 1, "AD")?;

    let normal_depths = sum_allele_depths(record, context, false, true)?;
    let normal_depth = total_depth(&normal_depths);
    let normal_alt_depth = value_at(record, &normal_depths, alt_index + 1, "AD")?;

    let tumor_allele_fraction = if tumor_depth == 0 {
        0.0
    } else {
        tumor_alt_depth as f64 / tumor_depth as f64
    };
    let normal_allele_fraction = if normal_depth == 0 {
        0.0
    } else {
        normal_alt_depth as f64 / normal_depth as f64
    };
    if normal_allele_fraction < MIN_NORMAL_ARTIFACT_RATIO * tumor_allele_fraction {
        return Ok(false);
    }

    // the annotation is log odds of "not artifact", hence the sign
    let normal_artifact_lods = record.f64_values(keys::NORMAL_ARTIFACT_LOD)?;
    let normal_artifact_lod = value_at(record, &normal_artifact_lods, alt_index, keys::NORMAL_ARTIFACT_LOD)?;
    if -normal_artifact_lod > normal_artifact_lod_threshold {
        return Ok(true);
    }

    let median_ref_quality = if record.has_attribute(keys::MEDIAN_BASE_QUALITY) {
        let qualities = record.i64_values(keys::MEDIAN_BASE_QUALITY)?;
        value_at(record, &qualities, 0, keys::MEDIAN_BASE_QUALITY)?
    } else {
        IMPUTED_NORMAL_BASE_QUALITY
    };
    let p_value = binomial_upper_tail(
        normal_depth as u64,
        normal_alt_depth as u64,
        qual_to_error_prob(median_ref_quality as f64),
    )?;
    Ok(p_value < normal_pileup_p_value_threshold)
}

/// Phased with a call that was filtered in the first pass.
///
/// Phasing comes from the tumor sample with the greatest allele fraction.
pub fn on_filtered_haplotype(
    record: &VariantRecord,
    context: &FilteringContext,
    max_distance: u64,
) -> SomaFilterResult<bool> {
    let mut best = None;
    for genotype in context.tumor_genotypes(record) {
        let max_af = if genotype.has_attribute(keys::ALLELE_FRACTION) {
            max_value(&genotype.f64_values(keys::ALLELE_FRACTION)?).unwrap_or(0.0)
        } else {
            0.0
        };
        match best {
            Some((_, af)) if af >= max_af => {}
            _ => best = Some((genotype, max_af)),
        }
    }

    let Some((tumor_genotype, _)) = best else {
        return Ok(false);
    };
    let Some((phase_id, phased_genotype)) = tumor_genotype.phase_info() else {
        return Ok(false);
    };
    let Some(filtered_call) = context.filtered_phased_call(phase_id) else {
        return Ok(false);
    };

    Ok(filtered_call.phased_genotypes.contains(phased_genotype)
        && filtered_call.position.abs_diff(record.position) <= max_distance)
}

/// Mitochondrial calls whose log odds per read of depth is too low
pub fn low_lod_by_depth(record: &VariantRecord, lod_by_depth: f64) -> SomaFilterResult<bool> {
    if !record.is_biallelic() {
        return Ok(false);
    }
    let lod = record.f64_value(keys::TUMOR_LOD)?;
    let depth = if record.has_attribute(keys::DEPTH) {
        record.f64_value(keys::DEPTH)?
    } else {
        1.0
    };
    Ok(lod / depth < lod_by_depth)
}

/// Mitochondrial calls whose alt reads mostly map elsewhere in the original alignment
pub fn chimeric_original_alignment(record: &VariantRecord, non_mt_alt_by_alt: f64) -> SomaFilterResult<bool> {
    if !record.is_biallelic() {
        return Ok(false);
    }
    let mut alt_count = 0u32;
    for genotype in &record.genotypes {
        alt_count = alt_count.saturating_add(value_at(record, &genotype.allele_depths, 1, "AD")?);
    }
    if alt_count == 0 {
        return Ok(false);
    }
    let non_mt_original_alignments = record.i64_value(keys::ORIGINAL_CONTIG_MISMATCH)?;
    Ok(non_mt_original_alignments as f64 / alt_count as f64 > non_mt_alt_by_alt)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::snv;
    use super::*;
    use crate::allele_fraction::AlleleFractionModel;
    use crate::config::ClusteringConfig;
    use crate::context::FilteredPhasedCall;
    use crate::record::{AttributeValue, Genotype};
    use std::collections::HashMap;

    fn context() -> FilteringContext {
        FilteringContext::new(["normal"], 0.0)
    }

    #[test]
    fn test_weak_tumor_evidence() {
        assert!(weak_tumor_evidence(&snv([20, 2], [30, 0], 3.0), 5.3).unwrap());
        assert!(!weak_tumor_evidence(&snv([20, 10], [30, 0], 30.0), 5.3).unwrap());
    }

    #[test]
    fn test_base_quality_uses_max_lod_allele() {
        let record = VariantRecord::new("chr1", 1, &["A", "C", "G"])
            .with_attribute(keys::TUMOR_LOD, AttributeValue::FloatList(vec![2.0, 40.0]))
            .with_attribute(keys::MEDIAN_BASE_QUALITY, AttributeValue::IntList(vec![30, 35, 12]));
        assert!(low_base_quality(&record, 20).unwrap());

        let record = record.with_attribute(keys::MEDIAN_BASE_QUALITY, AttributeValue::IntList(vec![30, 12, 35]));
        assert!(!low_base_quality(&record, 20).unwrap());

        let short = record.with_attribute(keys::MEDIAN_BASE_QUALITY, AttributeValue::IntList(vec![30]));
        assert!(low_base_quality(&short, 20).is_err());
    }

    #[test]
    fn test_mapping_quality() {
        let record = |alleles: &[&str], mmq: Vec<i64>| {
            VariantRecord::new("chr1", 1, alleles)
                .with_attribute(keys::MEDIAN_MAPPING_QUALITY, AttributeValue::IntList(mmq))
        };
        assert!(low_mapping_quality(&record(&["A", "C"], vec![60, 20]), 30, 5).unwrap());
        assert!(!low_mapping_quality(&record(&["A", "C"], vec![20, 60]), 30, 5).unwrap());

        // a long deletion is judged by the reference reads
        let deletion = &["ACGTACG", "A"];
        assert!(!low_mapping_quality(&record(deletion, vec![60, 20]), 30, 5).unwrap());
        assert!(low_mapping_quality(&record(deletion, vec![20, 60]), 30, 5).unwrap());
        // a short one is not
        assert!(low_mapping_quality(&record(&["ACG", "A"], vec![60, 20]), 30, 5).unwrap());

        assert!(low_mapping_quality(&record(&["A", "C"], vec![60]), 30, 5).is_err());
    }

    #[test]
    fn test_read_position() {
        let record = |mpos: i64| {
            VariantRecord::new("chr1", 1, &["A", "C"])
                .with_attribute(keys::MEDIAN_READ_POSITION, AttributeValue::IntList(vec![mpos]))
        };
        assert!(near_read_end(&record(0), 1).unwrap());
        assert!(!near_read_end(&record(5), 1).unwrap());
        assert!(!near_read_end(&record(-1), 1).unwrap());
    }

    #[test]
    fn test_simple_count_filters() {
        let record = VariantRecord::new("chr1", 1, &["A", "C"])
            .with_attribute(keys::EVENT_COUNT_IN_HAPLOTYPE, AttributeValue::Int(3))
            .with_attribute(keys::UNIQUE_ALT_READ_COUNT, AttributeValue::Int(0))
            .with_attribute(keys::MEDIAN_FRAGMENT_LENGTH, AttributeValue::IntList(vec![200, 150]));

        assert!(clustered_events(&record, 2).unwrap());
        assert!(!clustered_events(&record, 3).unwrap());
        assert!(duplicated_alt_reads(&record, 0).unwrap());
        assert!(fragment_length_difference(&record, 40).unwrap());
        assert!(!fragment_length_difference(&record, 50).unwrap());
    }

    #[test]
    fn test_n_ratio() {
        let record = snv([20, 4], [30, 0], 10.0).with_attribute(keys::N_COUNT, AttributeValue::Int(2));
        assert!(excess_n_bases(&record, &context(), 0.5).unwrap());
        assert!(!excess_n_bases(&record, &context(), 0.6).unwrap());

        let no_alt = snv([20, 0], [30, 0], 10.0).with_attribute(keys::N_COUNT, AttributeValue::Int(2));
        assert!(!excess_n_bases(&no_alt, &context(), 0.1).unwrap());
    }

    #[test]
    fn test_strand_artifact() {
        let record = |posteriors: Vec<f64>, afs: Vec<f64>| {
            VariantRecord::new("chr1", 1, &["A", "C"])
                .with_attribute(keys::STRAND_ARTIFACT_POSTERIOR, AttributeValue::FloatList(posteriors))
                .with_attribute(keys::STRAND_ARTIFACT_AF, AttributeValue::FloatList(afs))
        };
        assert!(strand_artifact(&record(vec![0.995, 0.004, 0.001], vec![0.001, 0.2, 0.2]), 0.99, 0.01).unwrap());
        assert!(!strand_artifact(&record(vec![0.995, 0.004, 0.001], vec![0.1, 0.2, 0.2]), 0.99, 0.01).unwrap());
        assert!(!strand_artifact(&record(vec![0.0, 0.0, 1.0], vec![0.0, 0.0, 0.0]), 0.99, 0.01).unwrap());
    }

    #[test]
    fn test_strict_strand_bias() {
        let with_sb = |sb: Vec<i64>| {
            snv([20, 10], [30, 0], 20.0).with_genotype(
                Genotype::new("tumor2", vec![10, 5])
                    .with_attribute(keys::STRAND_BIAS_BY_SAMPLE, AttributeValue::IntList(sb)),
            )
        };
        // the first tumor sample has no strand counts
        assert!(!strict_strand_bias(&with_sb(vec![5, 5, 0, 5]), &context()).unwrap());

        let mut record = with_sb(vec![5, 5, 0, 5]);
        record.genotypes.retain(|g| g.sample != "tumor");
        assert!(strict_strand_bias(&record, &context()).unwrap());

        let mut record = with_sb(vec![5, 5, 3, 2]);
        record.genotypes.retain(|g| g.sample != "tumor");
        assert!(!strict_strand_bias(&record, &context()).unwrap());
    }

    #[test]
    fn test_pcr_slippage() {
        let str_record = |ad: [u32; 2]| {
            snv(ad, [30, 0], 10.0)
                .with_attribute(keys::REPEATS_PER_ALLELE, AttributeValue::IntList(vec![10, 9]))
                .with_attribute(keys::REPEAT_UNIT, AttributeValue::Text("A".to_string()))
        };
        // 2 alt reads of 40 is well explained by a 10% slippage rate
        assert!(pcr_slippage(&str_record([38, 2]), &context(), 8, 0.1, 0.001).unwrap());
        // 30 of 40 is not
        assert!(!pcr_slippage(&str_record([10, 30]), &context(), 8, 0.1, 0.001).unwrap());

        // short repeats are never slippage
        assert!(!pcr_slippage(&str_record([38, 2]), &context(), 20, 0.1, 0.001).unwrap());

        let two_slips = str_record([38, 2]).with_attribute(keys::REPEATS_PER_ALLELE, AttributeValue::IntList(vec![10, 8]));
        assert!(!pcr_slippage(&two_slips, &context(), 8, 0.1, 0.001).unwrap());
    }

    #[test]
    fn test_multiallelic() {
        let record = VariantRecord::new("chr1", 1, &["A", "C", "G"])
            .with_attribute(keys::TUMOR_LOD, AttributeValue::FloatList(vec![10.0, 12.0]));
        assert!(too_many_alt_alleles(&record, 5.3, 1).unwrap());
        assert!(!too_many_alt_alleles(&record, 11.0, 1).unwrap());
    }

    #[test]
    fn test_artifact_in_normal() {
        let record = snv([20, 10], [25, 5], 20.0)
            .with_attribute(keys::NORMAL_ARTIFACT_LOD, AttributeValue::FloatList(vec![-3.0]));
        assert!(artifact_in_normal(&record, &context(), 0.0, 0.1).unwrap());

        // normal allele fraction far below the tumor's
        let record = snv([20, 20], [200, 1], 20.0)
            .with_attribute(keys::NORMAL_ARTIFACT_LOD, AttributeValue::FloatList(vec![-3.0]));
        assert!(!artifact_in_normal(&record, &context(), 0.0, 0.1).unwrap());

        // confident log odds, but the normal pileup is full of low quality alt reads
        let record = snv([20, 10], [25, 5], 20.0)
            .with_attribute(keys::NORMAL_ARTIFACT_LOD, AttributeValue::FloatList(vec![3.0]))
            .with_attribute(keys::MEDIAN_BASE_QUALITY, AttributeValue::IntList(vec![30, 30]));
        assert!(artifact_in_normal(&record, &context(), 0.0, 0.1).unwrap());

        let record = snv([20, 10], [25, 0], 20.0)
            .with_attribute(keys::NORMAL_ARTIFACT_LOD, AttributeValue::FloatList(vec![3.0]));
        assert!(!artifact_in_normal(&record, &context(), 0.0, 0.1).unwrap());
    }

    #[test]
    fn test_on_filtered_haplotype() {
        let phased = |position: u64, pgt: &str| {
            let mut record = snv([20, 10], [30, 0], 20.0);
            record.position = position;
            record.genotypes[0] = record.genotypes[0]
                .clone()
                .with_attribute(keys::PHASING_ID, AttributeValue::Text("900_A_T".to_string()))
                .with_attribute(keys::PHASING_GT, AttributeValue::Text(pgt.to_string()));
            record
        };

        let mut calls = HashMap::new();
        calls.insert(
            "900_A_T".to_string(),
            FilteredPhasedCall {
                position: 900,
                phased_genotypes: ["0|1".to_string()].into_iter().collect(),
            },
        );
        let model = AlleleFractionModel::fit(&[], &ClusteringConfig::default()).unwrap();
        let calibrated = context().finalize(calls, model).unwrap();

        assert!(on_filtered_haplotype(&phased(950, "0|1"), &calibrated, 100).unwrap());
        assert!(!on_filtered_haplotype(&phased(950, "1|0"), &calibrated, 100).unwrap());
        assert!(!on_filtered_haplotype(&phased(1100, "0|1"), &calibrated, 100).unwrap());
        assert!(!on_filtered_haplotype(&phased(950, "0|1"), &context(), 100).unwrap());
        assert!(!on_filtered_haplotype(&snv([20, 10], [30, 0], 20.0), &calibrated, 100).unwrap());
    }

    #[test]
    fn test_mitochondrial_filters() {
        let record = snv([2000, 10], [0, 0], 5.0).with_attribute(keys::DEPTH, AttributeValue::Int(2010));
        assert!(low_lod_by_depth(&record, 0.0035).unwrap());

        let record = snv([20, 10], [0, 0], 5.0).with_attribute(keys::DEPTH, AttributeValue::Int(30));
        assert!(!low_lod_by_depth(&record, 0.0035).unwrap());

        let record = snv([20, 10], [0, 0], 5.0).with_attribute(keys::ORIGINAL_CONTIG_MISMATCH, AttributeValue::Int(11));
        assert!(chimeric_original_alignment(&record, 1.0).unwrap());

        let record = snv([20, 0], [0, 0], 5.0).with_attribute(keys::ORIGINAL_CONTIG_MISMATCH, AttributeValue::Int(11));
        assert!(!chimeric_original_alignment(&record, 1.0).unwrap());
    }
}
