//! Minimiser-count thresholds and the on-disk threshold cache.
//!
//! For a query with `m` observed minimisers, the policy answers how many of
//! them must be counted in a bin before the bin is reported. Three paths:
//!
//! 1. User-supplied fraction: `⌊m · threshold⌋`.
//! 2. `w == k` (every k-mer is its own window): the k-mer lemma bound.
//! 3. Otherwise a precomputed table entry plus 2, indexed by
//!    `m − min_minimisers` and clamped to the table range.
//!
//! The table models minimiser survival under `e` sequencing errors: one
//! error placed uniformly in the pattern destroys a given minimiser's k-mer
//! with probability `k / p`, so a minimiser survives `e` independent errors
//! with probability `(1 − k/p)^e` and the surviving count is binomial. The
//! table entry for `m` is the largest `t` with `P(X ≥ t) ≥ τ`: a true match
//! keeps at least `t` of its minimisers with probability `τ`.
//!
//! Tables are cached next to the index, keyed by every model parameter, so
//! repeated searches skip the precomputation.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{debug, warn};

use crate::error::SiftError;
use crate::index::ibf::read_u64_le;
use crate::search::SearchConfig;

/// Magic bytes for the threshold cache file format.
const CACHE_MAGIC: &[u8; 8] = b"BSIFTTH1";

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// Largest `t` such that `P(Binomial(m, survival) ≥ t) ≥ tau`.
fn survival_threshold(m: usize, survival: f64, tau: f64) -> u64 {
    if m == 0 || survival <= 0.0 {
        return 0;
    }
    if survival >= 1.0 {
        return m as u64;
    }

    let ln_s = survival.ln();
    let ln_q = (1.0 - survival).ln();

    // log C(m, t), built incrementally while walking t upward.
    let mut ln_choose = vec![0.0f64; m + 1];
    for t in 0..m {
        ln_choose[t + 1] = ln_choose[t] + ((m - t) as f64).ln() - ((t + 1) as f64).ln();
    }

    // Walk the tail from t = m downward; the first t whose tail reaches tau
    // is the largest t satisfying the bound.
    let mut tail = 0.0f64;
    for t in (0..=m).rev() {
        let ln_pmf = ln_choose[t] + t as f64 * ln_s + (m - t) as f64 * ln_q;
        tail += ln_pmf.exp();
        if tail >= tau {
            return t as u64;
        }
    }
    0
}

/// Threshold table over observed minimiser counts
/// `min_minimisers ..= max_minimisers` for the given query parameters.
///
/// Deterministic in its inputs; the cache round-trips it bit-exactly.
pub fn precompute_threshold(
    pattern_size: usize,
    window_size: usize,
    kmer_size: usize,
    errors: usize,
    tau: f64,
) -> Vec<u64> {
    let derived = DerivedCounts::new(pattern_size, window_size, kmer_size, errors);
    let survival = (1.0 - kmer_size as f64 / pattern_size as f64).powi(errors as i32);

    (derived.min_minimisers..=derived.max_minimisers)
        .map(|m| survival_threshold(m, survival, tau))
        .collect()
}

// ---------------------------------------------------------------------------
// Derived constants
// ---------------------------------------------------------------------------

/// Counting constants derived from `(p, w, k, e)`.
#[derive(Debug, Clone, Copy)]
pub struct DerivedCounts {
    pub kmers_per_window: usize,
    pub kmers_per_pattern: usize,
    pub min_minimisers: usize,
    pub max_minimisers: usize,
    pub kmer_lemma: usize,
}

impl DerivedCounts {
    pub fn new(pattern_size: usize, window_size: usize, kmer_size: usize, errors: usize) -> Self {
        let kmers_per_window = window_size - kmer_size + 1;
        let kmers_per_pattern = pattern_size - kmer_size + 1;
        let min_minimisers = if kmers_per_window == 1 {
            kmers_per_pattern
        } else {
            kmers_per_pattern.div_ceil(kmers_per_window)
        };
        let max_minimisers = pattern_size - window_size + 1;
        let kmer_lemma = (pattern_size + 1).saturating_sub((errors + 1) * kmer_size);
        DerivedCounts {
            kmers_per_window,
            kmers_per_pattern,
            min_minimisers,
            max_minimisers,
            kmer_lemma,
        }
    }
}

// ---------------------------------------------------------------------------
// ThresholdPolicy
// ---------------------------------------------------------------------------

/// Query-time threshold selection.
pub struct ThresholdPolicy {
    counts: DerivedCounts,
    user_threshold: Option<f64>,
    table: Vec<u64>,
}

impl ThresholdPolicy {
    /// Build the policy for a validated search configuration, loading or
    /// computing (and best-effort caching) the threshold table when needed.
    pub fn for_search(cfg: &SearchConfig) -> Result<Self> {
        let counts = DerivedCounts::new(
            cfg.pattern_size,
            cfg.window_size,
            cfg.kmer_size,
            cfg.errors,
        );
        let mut policy = ThresholdPolicy {
            counts,
            user_threshold: cfg.threshold,
            table: Vec::new(),
        };

        // The table only backs the third selection path.
        if cfg.threshold.is_none() && counts.kmers_per_window > 1 {
            let path = cache_path(cfg);
            let span = counts.max_minimisers - counts.min_minimisers;
            if path.exists() {
                let table = load_table(&path).map_err(|source| SiftError::ThresholdCache {
                    path: path.clone(),
                    source,
                })?;
                if table.len() != span + 1 {
                    return Err(SiftError::ThresholdCache {
                        path,
                        source: anyhow::anyhow!(
                            "cached table has {} entries, expected {}",
                            table.len(),
                            span + 1
                        ),
                    }
                    .into());
                }
                debug!("loaded threshold table from {}", path.display());
                policy.table = table;
            } else {
                policy.table = precompute_threshold(
                    cfg.pattern_size,
                    cfg.window_size,
                    cfg.kmer_size,
                    cfg.errors,
                    cfg.tau,
                );
                if let Err(e) = store_table(&path, &policy.table) {
                    warn!("could not cache threshold table at {}: {e:#}", path.display());
                }
            }
        }

        Ok(policy)
    }

    /// Required counted minimisers for a query with `minimiser_count`
    /// observed minimisers.
    pub fn threshold(&self, minimiser_count: usize) -> usize {
        if let Some(fraction) = self.user_threshold {
            (minimiser_count as f64 * fraction) as usize
        } else if self.counts.kmers_per_window == 1 {
            self.counts.kmer_lemma
        } else {
            let span = self.counts.max_minimisers - self.counts.min_minimisers;
            let offset = minimiser_count
                .saturating_sub(self.counts.min_minimisers)
                .min(span);
            self.table[offset] as usize + 2
        }
    }
}

// ---------------------------------------------------------------------------
// Cache I/O
// ---------------------------------------------------------------------------

/// Deterministic cache location, co-located with the index.
fn cache_path(cfg: &SearchConfig) -> PathBuf {
    PathBuf::from(format!(
        "{}_threshold_p{}_w{}_k{}_e{}_tau{}.bin",
        cfg.ibf_file.display(),
        cfg.pattern_size,
        cfg.window_size,
        cfg.kmer_size,
        cfg.errors,
        cfg.tau
    ))
}

/// Read a cached table.
///
/// Format: `[magic "BSIFTTH1"] [len: u64 LE] [entries: len × u64 LE]`.
pub fn load_table(path: &Path) -> Result<Vec<u64>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; 8];
    reader
        .read_exact(&mut magic)
        .context("failed to read cache magic")?;
    if &magic != CACHE_MAGIC {
        bail!("not a threshold cache file (bad magic)");
    }
    let len = read_u64_le(&mut reader).context("failed to read table length")? as usize;
    let mut table = vec![0u64; len];
    for entry in table.iter_mut() {
        *entry = read_u64_le(&mut reader).context("failed to read table entries")?;
    }
    Ok(table)
}

/// Write a table to the cache. Failures here are the caller's to log.
pub fn store_table(path: &Path, table: &[u64]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut w = BufWriter::new(file);
    w.write_all(CACHE_MAGIC)?;
    w.write_all(&(table.len() as u64).to_le_bytes())?;
    for &entry in table {
        w.write_all(&entry.to_le_bytes())?;
    }
    w.flush()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
