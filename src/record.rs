//! Variant records as seen by the filters
//!
//! Records arrive with their annotations already extracted from the call file; the
//! filtering core only reads them.

use crate::{SomaFilterError, SomaFilterResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Record-level annotation keys
pub mod keys {
    /// Tumor log10 odds per alt allele
    pub const TUMOR_LOD: &str = "TLOD";
    pub const NORMAL_LOD: &str = "NLOD";
    /// Log10 odds of "not artifact" vs "artifact in normal", per alt allele
    pub const NORMAL_ARTIFACT_LOD: &str = "NALOD";
    /// Negative log10 population allele frequency per alt allele
    pub const POPULATION_AF: &str = "POPAF";
    pub const MEDIAN_BASE_QUALITY: &str = "MBQ";
    pub const MEDIAN_MAPPING_QUALITY: &str = "MMQ";
    pub const MEDIAN_READ_POSITION: &str = "MPOS";
    pub const MEDIAN_FRAGMENT_LENGTH: &str = "MFRL";
    pub const REPEATS_PER_ALLELE: &str = "RPA";
    pub const REPEAT_UNIT: &str = "RU";
    pub const IN_PANEL_OF_NORMALS: &str = "PON";
    pub const EVENT_COUNT_IN_HAPLOTYPE: &str = "ECNT";
    pub const UNIQUE_ALT_READ_COUNT: &str = "UNIQ_ALT_READ_COUNT";
    pub const N_COUNT: &str = "NCount";
    pub const STRAND_ARTIFACT_POSTERIOR: &str = "SA_POST_PROB";
    pub const STRAND_ARTIFACT_AF: &str = "SA_MAP_AF";
    pub const DEPTH: &str = "DP";
    pub const ORIGINAL_CONTIG_MISMATCH: &str = "OCM";

    // genotype-level
    pub const ALLELE_FRACTION: &str = "AF";
    pub const STRAND_BIAS_BY_SAMPLE: &str = "SB";
    pub const PHASING_GT: &str = "PGT";
    pub const PHASING_ID: &str = "PID";
    pub const READ_ORIENTATION_POSTERIOR: &str = "ROF_POST_PROB";
    pub const READ_ORIENTATION_PRIOR: &str = "ROF_PRIOR";
}

/// A typed annotation value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    Flag,
    Int(i64),
    Float(f64),
    Text(String),
    IntList(Vec<i64>),
    FloatList(Vec<f64>),
    TextList(Vec<String>),
}

fn parse_number<T: std::str::FromStr>(text: &str, key: &str) -> SomaFilterResult<T> {
    text.trim()
        .parse::<T>()
        .map_err(|_| SomaFilterError::MalformedRecord(format!("{}: cannot parse '{}'", key, text)))
}

impl AttributeValue {
    /// Numeric view of the value; text entries are parsed
    pub fn as_f64_vec(&self, key: &str) -> SomaFilterResult<Vec<f64>> {
        match self {
            AttributeValue::Int(v) => Ok(vec![*v as f64]),
            AttributeValue::Float(v) => Ok(vec![*v]),
            AttributeValue::IntList(v) => Ok(v.iter().map(|x| *x as f64).collect()),
            AttributeValue::FloatList(v) => Ok(v.clone()),
            AttributeValue::Text(s) => s.split(',').map(|t| parse_number(t, key)).collect(),
            AttributeValue::TextList(v) => v.iter().map(|t| parse_number(t, key)).collect(),
            AttributeValue::Flag => Err(SomaFilterError::MalformedRecord(format!(
                "{} is a flag, not a number",
                key
            ))),
        }
    }

    pub fn as_i64_vec(&self, key: &str) -> SomaFilterResult<Vec<i64>> {
        match self {
            AttributeValue::Int(v) => Ok(vec![*v]),
            AttributeValue::IntList(v) => Ok(v.clone()),
            AttributeValue::Float(v) => Ok(vec![v.round() as i64]),
            AttributeValue::FloatList(v) => Ok(v.iter().map(|x| x.round() as i64).collect()),
            AttributeValue::Text(s) => s.split(',').map(|t| parse_number(t, key)).collect(),
            AttributeValue::TextList(v) => v.iter().map(|t| parse_number(t, key)).collect(),
            AttributeValue::Flag => Err(SomaFilterError::MalformedRecord(format!(
                "{} is a flag, not a number",
                key
            ))),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

fn lookup<'a>(attributes: &'a HashMap<String, AttributeValue>, key: &str) -> SomaFilterResult<&'a AttributeValue> {
    attributes
        .get(key)
        .ok_or_else(|| SomaFilterError::MissingAnnotation(key.to_string()))
}

fn first<T: Copy>(values: Vec<T>, key: &str) -> SomaFilterResult<T> {
    values
        .first()
        .copied()
        .ok_or_else(|| SomaFilterError::MalformedRecord(format!("{} has no values", key)))
}

/// Per-sample data of a record
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Genotype {
    pub sample: String,
    /// Read depth per allele, reference first
    pub allele_depths: Vec<u32>,
    pub attributes: HashMap<String, AttributeValue>,
}

impl Genotype {
    pub fn new(sample: &str, allele_depths: Vec<u32>) -> Self {
        Self {
            sample: sample.to_string(),
            allele_depths,
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: &str, value: AttributeValue) -> Self {
        self.attributes.insert(key.to_string(), value);
        self
    }

    pub fn has_attribute(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    pub fn depth(&self) -> u32 {
        self.allele_depths.iter().fold(0, |sum, &d| sum.saturating_add(d))
    }

    /// Depth of all non-reference alleles
    pub fn alt_depth(&self) -> u32 {
        self.allele_depths.iter().skip(1).fold(0, |sum, &d| sum.saturating_add(d))
    }

    pub fn f64_values(&self, key: &str) -> SomaFilterResult<Vec<f64>> {
        lookup(&self.attributes, key)?.as_f64_vec(key)
    }

    pub fn f64_value(&self, key: &str) -> SomaFilterResult<f64> {
        first(self.f64_values(key)?, key)
    }

    pub fn i64_values(&self, key: &str) -> SomaFilterResult<Vec<i64>> {
        lookup(&self.attributes, key)?.as_i64_vec(key)
    }

    pub fn str_value(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(AttributeValue::as_str)
    }

    /// Phase set id and phased genotype, when both are present
    pub fn phase_info(&self) -> Option<(&str, &str)> {
        match (
            self.str_value(keys::PHASING_ID),
            self.str_value(keys::PHASING_GT),
        ) {
            (Some(pid), Some(pgt)) => Some((pid, pgt)),
            _ => None,
        }
    }
}

/// One candidate call at a locus
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VariantRecord {
    pub contig: String,
    /// 1-based start position
    pub position: u64,
    /// Reference allele first
    pub alleles: Vec<String>,
    pub attributes: HashMap<String, AttributeValue>,
    pub genotypes: Vec<Genotype>,
}

impl VariantRecord {
    pub fn new(contig: &str, position: u64, alleles: &[&str]) -> Self {
        Self {
            contig: contig.to_string(),
            position,
            alleles: alleles.iter().map(|a| a.to_string()).collect(),
            attributes: HashMap::new(),
            genotypes: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, key: &str, value: AttributeValue) -> Self {
        self.attributes.insert(key.to_string(), value);
        self
    }

    pub fn with_genotype(mut self, genotype: Genotype) -> Self {
        self.genotypes.push(genotype);
        self
    }

    pub fn has_attribute(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    pub fn num_alleles(&self) -> usize {
        self.alleles.len()
    }

    pub fn is_biallelic(&self) -> bool {
        self.alleles.len() == 2
    }

    /// All alleles are single bases
    pub fn is_snp(&self) -> bool {
        self.alleles.len() >= 2 && self.alleles.iter().all(|a| a.len() == 1)
    }

    pub fn f64_values(&self, key: &str) -> SomaFilterResult<Vec<f64>> {
        lookup(&self.attributes, key)?.as_f64_vec(key)
    }

    pub fn f64_value(&self, key: &str) -> SomaFilterResult<f64> {
        first(self.f64_values(key)?, key)
    }

    pub fn i64_values(&self, key: &str) -> SomaFilterResult<Vec<i64>> {
        lookup(&self.attributes, key)?.as_i64_vec(key)
    }

    pub fn i64_value(&self, key: &str) -> SomaFilterResult<i64> {
        first(self.i64_values(key)?, key)
    }

    pub fn str_value(&self, key: &str) -> SomaFilterResult<&str> {
        lookup(&self.attributes, key)?
            .as_str()
            .ok_or_else(|| SomaFilterError::MalformedRecord(format!("{} is not text", key)))
    }

    pub fn genotype(&self, sample: &str) -> Option<&Genotype> {
        self.genotypes.iter().find(|g| g.sample == sample)
    }
}
