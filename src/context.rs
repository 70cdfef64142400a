//! Read-only state shared by all filters during a pass
//!
//! The first-pass snapshot carries the sample metadata only. At the pass boundary
//! [`FilteringContext::finalize`] produces a new calibrated snapshot that also holds the
//! phased calls filtered in the first pass and the fitted allele-fraction model. Neither
//! snapshot is mutated while a pass runs.

use crate::allele_fraction::AlleleFractionModel;
use crate::record::{Genotype, VariantRecord};
use crate::{SomaFilterError, SomaFilterResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Minor allele fraction assumed for a germline het outside any segment
pub const DEFAULT_MINOR_ALLELE_FRACTION: f64 = 0.5;

/// A copy-number segment with its minor allele fraction, closed interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinorAlleleFractionSegment {
    pub contig: String,
    pub start: u64,
    pub end: u64,
    pub minor_allele_fraction: f64,
}

/// Segments of one sample, indexed by contig and sorted by start
#[derive(Debug, Clone, Default)]
pub struct SegmentTable {
    by_contig: BTreeMap<String, Vec<MinorAlleleFractionSegment>>,
}

impl SegmentTable {
    pub fn new(segments: Vec<MinorAlleleFractionSegment>) -> Self {
        let mut by_contig: BTreeMap<String, Vec<MinorAlleleFractionSegment>> = BTreeMap::new();
        for segment in segments {
            by_contig.entry(segment.contig.clone()).or_default().push(segment);
        }
        for segments in by_contig.values_mut() {
            segments.sort_by_key(|s| (s.start, s.end));
        }
        Self { by_contig }
    }

    /// The first segment, by start, that contains `position`
    pub fn overlapping(&self, contig: &str, position: u64) -> Option<&MinorAlleleFractionSegment> {
        let segments = self.by_contig.get(contig)?;
        let candidates = segments.partition_point(|s| s.start <= position);
        segments[..candidates].iter().find(|s| s.end >= position)
    }

    pub fn len(&self) -> usize {
        self.by_contig.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Position and phased genotypes of a first-pass filtered call in one phase set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilteredPhasedCall {
    pub position: u64,
    pub phased_genotypes: HashSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextGeneration {
    FirstPass,
    Calibrated,
}

#[derive(Debug, Clone)]
pub struct FilteringContext {
    normal_samples: HashSet<String>,
    contamination_by_sample: HashMap<String, f64>,
    default_contamination: f64,
    tumor_segments: HashMap<String, SegmentTable>,
    filtered_phased_calls: HashMap<String, FilteredPhasedCall>,
    background: Option<Arc<AlleleFractionModel>>,
    generation: ContextGeneration,
}

impl FilteringContext {
    pub fn new<I, S>(normal_samples: I, default_contamination: f64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            normal_samples: normal_samples.into_iter().map(Into::into).collect(),
            contamination_by_sample: HashMap::new(),
            default_contamination,
            tumor_segments: HashMap::new(),
            filtered_phased_calls: HashMap::new(),
            background: None,
            generation: ContextGeneration::FirstPass,
        }
    }

    pub fn with_contamination(mut self, sample: &str, contamination: f64) -> Self {
        self.contamination_by_sample.insert(sample.to_string(), contamination);
        self
    }

    pub fn with_segments(mut self, sample: &str, segments: SegmentTable) -> Self {
        self.tumor_segments.insert(sample.to_string(), segments);
        self
    }

    /// The calibrated snapshot used by the second pass
    pub fn finalize(
        &self,
        filtered_phased_calls: HashMap<String, FilteredPhasedCall>,
        background: AlleleFractionModel,
    ) -> SomaFilterResult<Self> {
        if self.generation != ContextGeneration::FirstPass {
            return Err(SomaFilterError::InvalidState(
                "filtering context has already been finalized".to_string(),
            ));
        }
        Ok(Self {
            filtered_phased_calls,
            background: Some(Arc::new(background)),
            generation: ContextGeneration::Calibrated,
            ..self.clone()
        })
    }

    pub fn generation(&self) -> ContextGeneration {
        self.generation
    }

    pub fn is_normal(&self, sample: &str) -> bool {
        self.normal_samples.contains(sample)
    }

    pub fn normal_samples(&self) -> &HashSet<String> {
        &self.normal_samples
    }

    pub fn tumor_genotypes<'a>(&'a self, record: &'a VariantRecord) -> impl Iterator<Item = &'a Genotype> + 'a {
        record.genotypes.iter().filter(move |g| !self.is_normal(&g.sample))
    }

    pub fn contamination(&self, sample: &str) -> f64 {
        self.contamination_by_sample
            .get(sample)
            .copied()
            .unwrap_or(self.default_contamination)
    }

    pub fn minor_allele_fraction(&self, sample: &str, contig: &str, position: u64) -> f64 {
        self.tumor_segments
            .get(sample)
            .and_then(|table| table.overlapping(contig, position))
            .map(|segment| segment.minor_allele_fraction)
            .unwrap_or(DEFAULT_MINOR_ALLELE_FRACTION)
    }

    pub fn filtered_phased_call(&self, phase_id: &str) -> Option<&FilteredPhasedCall> {
        self.filtered_phased_calls.get(phase_id)
    }

    /// The allele-fraction model, available once calibrated
    pub fn background_model(&self) -> Option<&AlleleFractionModel> {
        self.background.as_deref()
    }
}
