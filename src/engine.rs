//! Two-pass filtering engine
//!
//! The first pass scores every record and accumulates statistics. [`TwoPassEngine::calibrate`]
//! fits the allele-fraction model, freezes the thresholds and swaps in the calibrated
//! context. The second pass scores every record again and emits a [`Decision`] per record.

use crate::accumulator::{Calibration, FirstPassAccumulator, COMBINED_FILTER_NAME};
use crate::config::FilteringConfig;
use crate::context::FilteringContext;
use crate::fdr::FilterStats;
use crate::filters::{score_record, standard_filters, VariantFilter};
use crate::math::max_value;
use crate::record::VariantRecord;
use crate::utils::{phred_from_error_probability, ProgressLogger, StageTimer};
use crate::{Decision, SomaFilterError, SomaFilterResult};
use log::{debug, info};
use std::mem;

const PROGRESS_INTERVAL: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStage {
    Uninitialized,
    Accumulating,
    Calibrated,
    Emitting,
    Done,
}

/// Expected false positives among the records passing the second pass
#[derive(Debug)]
struct SecondPassTally {
    expected_false_positives: Vec<f64>,
    combined_expected_false_positives: f64,
    num_passing: usize,
}

enum EngineState {
    Uninitialized,
    Accumulating {
        accumulator: FirstPassAccumulator,
        progress: ProgressLogger,
    },
    Calibrated {
        calibration: Calibration,
        context: FilteringContext,
    },
    Emitting {
        calibration: Calibration,
        context: FilteringContext,
        tally: SecondPassTally,
        progress: ProgressLogger,
    },
    Done,
}

impl EngineState {
    fn stage(&self) -> EngineStage {
        match self {
            EngineState::Uninitialized => EngineStage::Uninitialized,
            EngineState::Accumulating { .. } => EngineStage::Accumulating,
            EngineState::Calibrated { .. } => EngineStage::Calibrated,
            EngineState::Emitting { .. } => EngineStage::Emitting,
            EngineState::Done => EngineStage::Done,
        }
    }
}

fn invalid_state(operation: &str, stage: EngineStage) -> SomaFilterError {
    SomaFilterError::InvalidState(format!("cannot {} while {:?}", operation, stage))
}

pub struct TwoPassEngine {
    config: FilteringConfig,
    filters: Vec<VariantFilter>,
    first_pass_context: FilteringContext,
    state: EngineState,
}

impl TwoPassEngine {
    pub fn new(
        config: FilteringConfig,
        filters: Vec<VariantFilter>,
        context: FilteringContext,
    ) -> SomaFilterResult<Self> {
        config.validate()?;
        if filters.is_empty() {
            return Err(SomaFilterError::InvalidConfig("no filters to run".to_string()));
        }
        Ok(Self {
            config,
            filters,
            first_pass_context: context,
            state: EngineState::Uninitialized,
        })
    }

    /// Engine running the standard filter set for `config`
    pub fn standard(config: FilteringConfig, context: FilteringContext) -> SomaFilterResult<Self> {
        let filters = standard_filters(&config);
        Self::new(config, filters, context)
    }

    pub fn filters(&self) -> &[VariantFilter] {
        &self.filters
    }

    pub fn stage(&self) -> EngineStage {
        self.state.stage()
    }

    /// Frozen thresholds, once calibrated
    pub fn calibration(&self) -> Option<&Calibration> {
        match &self.state {
            EngineState::Calibrated { calibration, .. } | EngineState::Emitting { calibration, .. } => {
                Some(calibration)
            }
            _ => None,
        }
    }

    pub fn start_first_pass(&mut self) -> SomaFilterResult<()> {
        match self.state {
            EngineState::Uninitialized => {
                info!("First pass with {} filters", self.filters.len());
                self.state = EngineState::Accumulating {
                    accumulator: FirstPassAccumulator::new(&self.filters),
                    progress: ProgressLogger::new("First pass", PROGRESS_INTERVAL),
                };
                Ok(())
            }
            _ => Err(invalid_state("start the first pass", self.stage())),
        }
    }

    /// Feed the next record of the current pass.
    ///
    /// Returns `None` in the first pass and the record's decision in the second. The first
    /// record after calibration starts the second pass.
    pub fn submit(&mut self, record: &VariantRecord) -> SomaFilterResult<Option<Decision>> {
        if let EngineState::Calibrated { .. } = self.state {
            self.start_second_pass()?;
        }

        match &mut self.state {
            EngineState::Accumulating { accumulator, progress } => {
                let probabilities = score_record(
                    &self.filters,
                    record,
                    &self.first_pass_context,
                    self.config.parallel_filters,
                );
                accumulator.add(&self.filters, record, &self.first_pass_context, &probabilities)?;
                progress.record();
                Ok(None)
            }
            EngineState::Emitting {
                calibration,
                context,
                tally,
                progress,
            } => {
                let decision = decide(
                    &self.filters,
                    record,
                    context,
                    calibration,
                    tally,
                    self.config.parallel_filters,
                );
                progress.record();
                Ok(Some(decision))
            }
            state => Err(invalid_state("submit a record", state.stage())),
        }
    }

    /// Close the first pass: fit the allele-fraction model, calibrate every threshold
    /// and build the calibrated context. Runs exactly once.
    pub fn calibrate(&mut self) -> SomaFilterResult<&Calibration> {
        // the first-pass state is only replaced once every fallible step has succeeded
        let stage = self.stage();
        let EngineState::Accumulating { accumulator, progress } = &mut self.state else {
            return Err(invalid_state("calibrate", stage));
        };
        progress.finish();

        let _timer = StageTimer::start("Calibration");

        let model = accumulator.learn_allele_fractions(&self.config)?;
        debug!(
            "Allele fraction model: {} clusters, weights {:?}",
            model.clusters().len(),
            model.weights_posterior().mean_weights()
        );
        accumulator.rescore_weak_evidence(&self.filters, &model);

        let calibration = accumulator.calibrate(self.config.max_false_discovery_rate);
        info!(
            "Calibrated threshold {:.4} over {} records ({} expected to pass)",
            calibration.combined.threshold,
            accumulator.num_records(),
            calibration.combined.num_passing
        );
        for stats in &calibration.per_filter {
            debug!("Filter {} threshold {:.4}", stats.filter_name, stats.threshold);
        }

        let context = self
            .first_pass_context
            .finalize(accumulator.filtered_phased_calls().clone(), model)?;

        self.state = EngineState::Calibrated { calibration, context };
        self.calibration()
            .ok_or_else(|| invalid_state("read the calibration", self.stage()))
    }

    fn start_second_pass(&mut self) -> SomaFilterResult<()> {
        let EngineState::Calibrated { calibration, context } = mem::replace(&mut self.state, EngineState::Done)
        else {
            return Err(invalid_state("start the second pass", self.stage()));
        };

        info!("Second pass");
        let tally = SecondPassTally {
            expected_false_positives: vec![0.0; self.filters.len()],
            combined_expected_false_positives: 0.0,
            num_passing: 0,
        };
        self.state = EngineState::Emitting {
            calibration,
            context,
            tally,
            progress: ProgressLogger::new("Second pass", PROGRESS_INTERVAL),
        };
        Ok(())
    }

    /// End the second pass and return one summary row per filter followed by the
    /// combined row
    pub fn finish(&mut self) -> SomaFilterResult<Vec<FilterStats>> {
        match self.state {
            EngineState::Calibrated { .. } => self.start_second_pass()?,
            EngineState::Emitting { .. } => {}
            _ => return Err(invalid_state("finish", self.stage())),
        }
        let EngineState::Emitting {
            calibration,
            tally,
            progress,
            ..
        } = mem::replace(&mut self.state, EngineState::Done)
        else {
            return Err(invalid_state("finish", EngineStage::Done));
        };
        progress.finish();

        let requested = self.config.max_false_discovery_rate;
        let mut summary: Vec<FilterStats> = calibration
            .per_filter
            .iter()
            .zip(&tally.expected_false_positives)
            .map(|(stats, &fps)| FilterStats::new(&stats.filter_name, stats.threshold, fps, tally.num_passing, requested))
            .collect();
        summary.push(FilterStats::new(
            COMBINED_FILTER_NAME,
            calibration.combined.threshold,
            tally.combined_expected_false_positives,
            tally.num_passing,
            requested,
        ));

        info!(
            "{} records pass with expected FDR {:.4} (requested {})",
            tally.num_passing,
            summary.last().map(|s| s.expected_fdr).unwrap_or(0.0),
            requested
        );
        Ok(summary)
    }
}

fn decide(
    filters: &[VariantFilter],
    record: &VariantRecord,
    context: &FilteringContext,
    calibration: &Calibration,
    tally: &mut SecondPassTally,
    parallel: bool,
) -> Decision {
    let probabilities = score_record(filters, record, context, parallel);
    let max_probability = max_value(&probabilities).unwrap_or(0.0);
    let threshold = calibration.combined.threshold;
    let filtered = max_probability > threshold;

    let mut decision = Decision::default();
    for (index, (filter, &probability)) in filters.iter().zip(&probabilities).enumerate() {
        if let Some(annotation) = filter.phred_annotation() {
            decision
                .phred_posteriors
                .insert(annotation.to_string(), phred_from_error_probability(probability));
        }
        if probability > threshold {
            decision.filters.push(filter.name().to_string());
        } else if !filtered {
            tally.expected_false_positives[index] += probability;
        }
    }

    if !filtered {
        tally.num_passing += 1;
        tally.combined_expected_false_positives += max_probability;
    }
    decision
}
