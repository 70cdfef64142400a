//! # somafilter - Calibrated two-pass filtering of somatic variant calls
//!
//! A library that assigns artifact classifications to candidate somatic variant
//! records and calibrates the pass/fail decision so that the expected false
//! discovery rate of the emitted calls stays below a requested bound.

pub mod accumulator;
pub mod allele_fraction;
pub mod clusterer;
pub mod config;
pub mod context;
pub mod dirichlet;
pub mod engine;
pub mod fdr;
pub mod filters;
pub mod likelihoods;
pub mod math;
pub mod output;
pub mod record;
pub mod utils;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use config::FilteringConfig;
pub use context::FilteringContext;
pub use engine::TwoPassEngine;
pub use fdr::FilterStats;
pub use filters::VariantFilter;
pub use record::{AttributeValue, Genotype, VariantRecord};

/// The outcome of filtering a single record in the second pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Names of the filters judged to be artifacts, in filter order. Empty means PASS.
    pub filters: Vec<String>,
    /// Phred-scaled artifact posteriors keyed by the annotation name of the soft filter
    pub phred_posteriors: BTreeMap<String, f64>,
}

impl Decision {
    pub fn is_pass(&self) -> bool {
        self.filters.is_empty()
    }

    /// FILTER column representation
    pub fn filter_field(&self) -> String {
        if self.is_pass() {
            "PASS".to_string()
        } else {
            self.filters.join(";")
        }
    }
}

/// Error types for the somafilter library
#[derive(Debug, thiserror::Error)]
pub enum SomaFilterError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid distribution parameters: {0}")]
    InvalidParameters(String),

    #[error("Dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("Failed to converge after {iterations} iterations")]
    ConvergenceFailure { iterations: usize, estimate: Vec<f64> },

    #[error("Missing annotation: {0}")]
    MissingAnnotation(String),

    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type SomaFilterResult<T> = Result<T, SomaFilterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_filter_field() {
        let pass = Decision::default();
        assert!(pass.is_pass());
        assert_eq!(pass.filter_field(), "PASS");

        let failed = Decision {
            filters: vec!["germline".to_string(), "panel_of_normals".to_string()],
            phred_posteriors: BTreeMap::new(),
        };
        assert!(!failed.is_pass());
        assert_eq!(failed.filter_field(), "germline;panel_of_normals");
    }
}
