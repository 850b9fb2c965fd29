//! The query engine: minimiser extraction, thresholding, and the
//! chunked, pipelined search over one or more index parts.

pub mod engine;
pub mod minimiser;
pub mod parallel;
pub mod threshold;

use std::path::PathBuf;

use anyhow::Result;

use crate::error::SiftError;

/// Validated search parameters.
///
/// `threshold` is the user override: when present it replaces the
/// error-model table entirely.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Index path, or path prefix when `parts > 1`.
    pub ibf_file: PathBuf,
    pub query_file: PathBuf,
    pub out_file: PathBuf,
    pub kmer_size: usize,
    pub window_size: usize,
    pub pattern_size: usize,
    pub errors: usize,
    pub tau: f64,
    pub threshold: Option<f64>,
    pub threads: usize,
    pub parts: usize,
    pub compressed: bool,
    pub write_time: bool,
}

impl SearchConfig {
    /// Check the parameter invariants. Runs before any I/O, so a rejected
    /// configuration leaves no partial output behind.
    pub fn validate(&self) -> Result<(), SiftError> {
        if self.kmer_size == 0 || self.kmer_size > 32 {
            return Err(SiftError::Parameter(format!(
                "k-mer size {} is out of range 1..=32",
                self.kmer_size
            )));
        }
        if self.window_size < self.kmer_size {
            return Err(SiftError::Parameter(format!(
                "window size {} is smaller than k-mer size {}",
                self.window_size, self.kmer_size
            )));
        }
        if self.pattern_size < self.window_size {
            return Err(SiftError::Parameter(format!(
                "pattern size {} is smaller than window size {}",
                self.pattern_size, self.window_size
            )));
        }
        if !(self.tau > 0.0 && self.tau < 1.0) {
            return Err(SiftError::Parameter(format!(
                "tau {} is out of range (0, 1)",
                self.tau
            )));
        }
        if let Some(t) = self.threshold {
            if !(0.0..=1.0).contains(&t) {
                return Err(SiftError::Parameter(format!(
                    "threshold {} is out of range [0, 1]",
                    t
                )));
            }
        }
        if self.threads == 0 {
            return Err(SiftError::Parameter("thread count must be at least 1".into()));
        }
        if self.parts == 0 {
            return Err(SiftError::Parameter("part count must be at least 1".into()));
        }
        Ok(())
    }
}

/// Validate and run a search, then write the timing report if requested.
pub fn run(cfg: &SearchConfig) -> Result<()> {
    cfg.validate()?;
    let times = engine::run(cfg)?;
    if cfg.write_time {
        times.write_report(&cfg.out_file)?;
    }
    Ok(())
}
