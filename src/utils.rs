//! Phred scaling, output paths and pass progress logging

use crate::SomaFilterResult;
use std::path::Path;
use std::time::{Duration, Instant};

/// Phred values are capped here for certain artifacts
pub const MAX_PHRED: f64 = 99.0;

/// Phred-scaled error probability, capped at [`MAX_PHRED`]
pub fn phred_from_error_probability(probability: f64) -> f64 {
    if probability <= 0.0 || probability.is_nan() {
        return MAX_PHRED;
    }
    (-10.0 * probability.log10()).clamp(0.0, MAX_PHRED)
}

/// Check if a path names a gzip-compressed output
pub fn is_gzip_path<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref()
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.eq_ignore_ascii_case("gz"))
        .unwrap_or(false)
}

/// Create the directory an output table is written into
pub fn ensure_parent_dirs<P: AsRef<Path>>(path: P) -> SomaFilterResult<()> {
    match path.as_ref().parent() {
        Some(dir) if !dir.as_os_str().is_empty() && !dir.is_dir() => {
            log::debug!("Creating output directory {}", dir.display());
            std::fs::create_dir_all(dir)?;
        }
        _ => {}
    }
    Ok(())
}

/// Logs a record count every `interval` records of a pass
#[derive(Debug)]
pub struct ProgressLogger {
    label: String,
    interval: usize,
    processed: usize,
}

impl ProgressLogger {
    pub fn new(label: &str, interval: usize) -> Self {
        ProgressLogger {
            label: label.to_string(),
            interval: interval.max(1),
            processed: 0,
        }
    }

    pub fn record(&mut self) {
        self.processed += 1;
        if self.processed % self.interval == 0 {
            log::info!("{}: {} records processed", self.label, self.processed);
        }
    }

    pub fn processed(&self) -> usize {
        self.processed
    }

    pub fn finish(&self) {
        log::info!("{}: done, {} records processed", self.label, self.processed);
    }
}

/// Logs how long an engine stage took once it goes out of scope
pub struct StageTimer {
    stage: &'static str,
    start: Instant,
}

impl StageTimer {
    pub fn start(stage: &'static str) -> Self {
        log::debug!("Entering {}", stage);
        StageTimer {
            stage,
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for StageTimer {
    fn drop(&mut self) {
        log::info!("{} finished in {:.2?}", self.stage, self.elapsed());
    }
}
