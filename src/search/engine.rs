//! Search orchestration — single-part and multi-part pipelines.
//!
//! Both modes pull bounded chunks of query records, overlap index
//! deserialization with other I/O where the mode allows, fan the chunk out
//! across worker threads, and emit one result line per query through the
//! synchronized writer:
//!
//! ```text
//! <id>\t<bin>,<bin>,…,\n
//! ```
//!
//! Bin ids are ascending; every id is followed by a comma, including the
//! last. A query with no hits keeps the tab and the newline.
//!
//! Multi-part indexes are traversed part by part: every part holds the same
//! number of bins and owns a contiguous slice of the global bin space, in
//! part order. Per-record accumulators span all parts; part `p` adds its
//! counts at offset `p · bin_count`, so emitted ids are global.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use tracing::info;

use crate::error::SiftError;
use crate::index::compressed::CompressedIbf;
use crate::index::ibf::{BinFilter, CountVector, Ibf};
use crate::index::part_path;
use crate::io::fastx::{FastaSource, MAX_CHUNK_RECORDS, QueryChunk, QueryRecord};
use crate::io::sync_out::SyncWriter;
use crate::search::SearchConfig;
use crate::search::minimiser::{Minimisers, adjust_seed};
use crate::search::parallel;
use crate::search::threshold::ThresholdPolicy;

// ---------------------------------------------------------------------------
// SearchTimes
// ---------------------------------------------------------------------------

/// Wall-clock accounting for the three pipeline phases.
#[derive(Debug, Default, Clone, Copy)]
pub struct SearchTimes {
    pub ibf_io: f64,
    pub reads_io: f64,
    pub compute: f64,
}

impl SearchTimes {
    /// Write the timing report to `<out_file>.time`.
    pub fn write_report(&self, out_file: &Path) -> Result<()> {
        let path = PathBuf::from(format!("{}.time", out_file.display()));
        let report = format!(
            "IBF I/O\tReads I/O\tCompute\n{:.2}\t{:.2}\t{:.2}",
            self.ibf_io, self.reads_io, self.compute
        );
        std::fs::write(&path, report)
            .with_context(|| format!("failed to write {}", path.display()))
    }
}

// ---------------------------------------------------------------------------
// Index loading
// ---------------------------------------------------------------------------

/// Deserialize one index file, accounting the elapsed time to `ibf_io`.
fn load_filter<B: BinFilter>(path: &Path, ibf_io: &mut f64) -> Result<B> {
    let start = Instant::now();
    let filter = B::load(path).map_err(|source| SiftError::IndexRead {
        path: path.to_path_buf(),
        source,
    })?;
    *ibf_io += start.elapsed().as_secs_f64();
    Ok(filter)
}

/// Start deserializing on a background thread. The returned handle yields
/// the filter and the seconds the load took.
fn spawn_load<B: BinFilter + 'static>(path: PathBuf) -> JoinHandle<Result<(B, f64)>> {
    std::thread::spawn(move || {
        let start = Instant::now();
        let filter = B::load(&path).map_err(|source| SiftError::IndexRead {
            path: path.clone(),
            source,
        })?;
        Ok((filter, start.elapsed().as_secs_f64()))
    })
}

fn join_load<B>(handle: JoinHandle<Result<(B, f64)>>) -> Result<(B, f64)> {
    handle
        .join()
        .map_err(|_| anyhow!("index loader thread panicked"))?
}

fn ensure_part_width<B: BinFilter>(filter: &B, expected: usize, path: &Path) -> Result<()> {
    if filter.bin_count() != expected {
        return Err(SiftError::IndexRead {
            path: path.to_path_buf(),
            source: anyhow!(
                "part has {} bins but the first part has {}",
                filter.bin_count(),
                expected
            ),
        }
        .into());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Result lines
// ---------------------------------------------------------------------------

/// Append the record's result line to `line` and hand it to the writer.
/// Returns the writer error, if any, for the caller to surface after the
/// barrier.
fn emit_hits(
    writer: &SyncWriter,
    line: &mut String,
    record: &QueryRecord,
    counts: &[u8],
    threshold: usize,
) -> Result<(), SiftError> {
    line.clear();
    line.push_str(&record.id);
    line.push('\t');
    for (bin, &count) in counts.iter().enumerate() {
        if count as usize >= threshold {
            let _ = write!(line, "{},", bin);
        }
    }
    line.push('\n');
    writer.write(line)
}

/// Stash the first failure from any worker; checked after each barrier.
struct FailureSlot(Mutex<Option<SiftError>>);

impl FailureSlot {
    fn new() -> Self {
        FailureSlot(Mutex::new(None))
    }

    fn record(&self, err: SiftError) {
        let mut slot = self.0.lock().unwrap();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    fn check(&self) -> Result<()> {
        match self.0.lock().unwrap().take() {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Single-part mode
// ---------------------------------------------------------------------------

/// Search against a one-file index.
///
/// The sole IBF load runs in the background and is awaited once, after the
/// first chunk of queries has been read.
pub fn search_single<B: BinFilter + 'static>(cfg: &SearchConfig) -> Result<SearchTimes> {
    let mut times = SearchTimes::default();
    let loader = spawn_load::<B>(cfg.ibf_file.clone());

    let policy = ThresholdPolicy::for_search(cfg)?;
    let mut source = open_queries(cfg)?;
    let writer = SyncWriter::create(&cfg.out_file)?;
    let seed = adjust_seed(cfg.kmer_size);
    let failure = FailureSlot::new();

    let mut records = QueryChunk::new();
    let mut more = next_chunk_timed(cfg, &mut source, &mut records, &mut times)?;

    let (ibf, load_secs) = join_load(loader)?;
    times.ibf_io += load_secs;
    info!("index loaded: {} bins", ibf.bin_count());

    while more {
        let worker = |range: std::ops::Range<usize>| {
            let mut agent = ibf.counting_agent();
            let mut minimiser: Vec<u64> = Vec::new();
            let mut line = String::new();
            for record in &records[range] {
                minimiser.clear();
                minimiser.extend(Minimisers::new(
                    &record.seq,
                    cfg.kmer_size,
                    cfg.window_size,
                    seed,
                ));
                let counts = agent.bulk_count(&minimiser);
                let threshold = policy.threshold(minimiser.len());
                if let Err(e) = emit_hits(&writer, &mut line, record, counts.counts(), threshold) {
                    failure.record(e);
                    return;
                }
            }
        };
        parallel::run_ranges(records.len(), cfg.threads, &mut times.compute, worker)?;
        failure.check()?;

        more = next_chunk_timed(cfg, &mut source, &mut records, &mut times)?;
    }

    writer.flush()?;
    Ok(times)
}

// ---------------------------------------------------------------------------
// Multi-part mode
// ---------------------------------------------------------------------------

/// Search against an index split into `cfg.parts` files.
///
/// Per chunk: part 0 deserializes in the background while the chunk is read;
/// middle parts are counted into the per-record accumulators; the final part
/// is counted inside the output pass, which then thresholds and emits.
pub fn search_multiple<B: BinFilter + 'static>(cfg: &SearchConfig) -> Result<SearchTimes> {
    let mut times = SearchTimes::default();
    let policy = ThresholdPolicy::for_search(cfg)?;
    let mut source = open_queries(cfg)?;
    let writer = SyncWriter::create(&cfg.out_file)?;
    let seed = adjust_seed(cfg.kmer_size);
    let failure = FailureSlot::new();

    let mut records = QueryChunk::new();

    loop {
        // Overlap the part-0 load with this chunk's reads I/O.
        let loader = spawn_load::<B>(part_path(&cfg.ibf_file, 0));
        let more = next_chunk_timed(cfg, &mut source, &mut records, &mut times)?;
        let (ibf, load_secs) = join_load(loader)?;
        times.ibf_io += load_secs;
        if !more {
            break;
        }

        let bins_per_part = ibf.bin_count();
        let mut accumulators: Vec<CountVector> =
            vec![CountVector::new(bins_per_part * cfg.parts); records.len()];

        count_part(cfg, &ibf, 0, bins_per_part, seed, &records, &mut accumulators, &mut times)?;

        let mut ibf = ibf;
        for part in 1..cfg.parts - 1 {
            let path = part_path(&cfg.ibf_file, part);
            ibf = load_filter(&path, &mut times.ibf_io)?;
            ensure_part_width(&ibf, bins_per_part, &path)?;
            count_part(
                cfg,
                &ibf,
                part,
                bins_per_part,
                seed,
                &records,
                &mut accumulators,
                &mut times,
            )?;
        }

        let last = cfg.parts - 1;
        let path = part_path(&cfg.ibf_file, last);
        let ibf: B = load_filter(&path, &mut times.ibf_io)?;
        ensure_part_width(&ibf, bins_per_part, &path)?;

        let output_task = |start: usize, slice: &mut [CountVector]| {
            let mut agent = ibf.counting_agent();
            let mut minimiser: Vec<u64> = Vec::new();
            let mut line = String::new();
            for (j, acc) in slice.iter_mut().enumerate() {
                let record = &records[start + j];
                minimiser.clear();
                minimiser.extend(Minimisers::new(
                    &record.seq,
                    cfg.kmer_size,
                    cfg.window_size,
                    seed,
                ));
                let counts = agent.bulk_count(&minimiser);
                acc.accumulate(last * bins_per_part, counts);

                let threshold = policy.threshold(minimiser.len());
                if let Err(e) = emit_hits(&writer, &mut line, record, acc.counts(), threshold) {
                    failure.record(e);
                    return;
                }
            }
        };
        parallel::run_slices(&mut accumulators, cfg.threads, &mut times.compute, output_task)?;
        failure.check()?;
    }

    writer.flush()?;
    Ok(times)
}

/// One counting pass of `part` over the whole chunk.
#[allow(clippy::too_many_arguments)]
fn count_part<B: BinFilter>(
    cfg: &SearchConfig,
    ibf: &B,
    part: usize,
    bins_per_part: usize,
    seed: u64,
    records: &[QueryRecord],
    accumulators: &mut [CountVector],
    times: &mut SearchTimes,
) -> Result<()> {
    let offset = part * bins_per_part;
    let count_task = |start: usize, slice: &mut [CountVector]| {
        let mut agent = ibf.counting_agent();
        let mut minimiser: Vec<u64> = Vec::new();
        for (j, acc) in slice.iter_mut().enumerate() {
            let record = &records[start + j];
            minimiser.clear();
            minimiser.extend(Minimisers::new(
                &record.seq,
                cfg.kmer_size,
                cfg.window_size,
                seed,
            ));
            acc.accumulate(offset, agent.bulk_count(&minimiser));
        }
    };
    parallel::run_slices(accumulators, cfg.threads, &mut times.compute, count_task)
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

fn open_queries(cfg: &SearchConfig) -> Result<FastaSource> {
    FastaSource::open(&cfg.query_file, MAX_CHUNK_RECORDS).map_err(|source| {
        SiftError::QueryRead {
            path: cfg.query_file.clone(),
            source,
        }
        .into()
    })
}

fn next_chunk_timed(
    cfg: &SearchConfig,
    source: &mut FastaSource,
    records: &mut QueryChunk,
    times: &mut SearchTimes,
) -> Result<bool> {
    let start = Instant::now();
    let more = source
        .next_chunk(records)
        .map_err(|source| SiftError::QueryRead {
            path: cfg.query_file.clone(),
            source,
        })?;
    times.reads_io += start.elapsed().as_secs_f64();
    Ok(more)
}

// ---------------------------------------------------------------------------
// Layout dispatch
// ---------------------------------------------------------------------------

/// Run a validated search, dispatching on index layout and part count.
pub fn run(cfg: &SearchConfig) -> Result<SearchTimes> {
    if cfg.compressed {
        run_with_layout::<CompressedIbf>(cfg)
    } else {
        run_with_layout::<Ibf>(cfg)
    }
}

fn run_with_layout<B: BinFilter + 'static>(cfg: &SearchConfig) -> Result<SearchTimes> {
    if cfg.parts == 1 {
        search_single::<B>(cfg)
    } else {
        search_multiple::<B>(cfg)
    }
}
