//! Index construction from reference FASTA files.
//!
//! Each input file becomes one bin; every minimiser of every record in the
//! file is inserted into that bin, using the same extractor and seed the
//! search path uses. With `parts > 1` the bins are split into contiguous
//! blocks of equal size, one filter file per block, numbered locally within
//! each part: global bin `g` lives in part `g / bins_per_part` as local bin
//! `g % bins_per_part`. The search orchestrator reassembles the global
//! numbering by concatenating parts in order.

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::info;

use crate::index::compressed::CompressedIbf;
use crate::index::ibf::Ibf;
use crate::index::part_path;
use crate::io::fastx::{FastaSource, QueryChunk};
use crate::search::minimiser::{Minimisers, adjust_seed};

/// Reference batch size while inserting. Bounds resident sequence data;
/// insertion itself is streaming.
const BUILD_CHUNK_RECORDS: usize = 1 << 16;

/// Build parameters.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// One reference FASTA per bin, in global bin order.
    pub bin_files: Vec<PathBuf>,
    /// Output path (single part) or path prefix (multiple parts).
    pub output: PathBuf,
    pub kmer_size: usize,
    pub window_size: usize,
    /// Bits per bin.
    pub bin_size: u64,
    /// Number of hash functions.
    pub hash_funs: usize,
    pub parts: usize,
    pub compressed: bool,
}

/// Build the index file(s) described by `config`.
pub fn build_index(config: &BuildConfig) -> Result<()> {
    if config.kmer_size == 0 || config.kmer_size > 32 {
        bail!("k-mer size {} is out of range 1..=32", config.kmer_size);
    }
    if config.window_size < config.kmer_size {
        bail!(
            "window size {} is smaller than k-mer size {}",
            config.window_size,
            config.kmer_size
        );
    }
    if config.bin_files.is_empty() {
        bail!("no reference files given");
    }
    if config.parts == 0 {
        bail!("part count must be at least 1");
    }
    if config.bin_files.len() % config.parts != 0 {
        bail!(
            "{} bins cannot be split into {} equal parts",
            config.bin_files.len(),
            config.parts
        );
    }

    let bins_per_part = config.bin_files.len() / config.parts;
    let seed = adjust_seed(config.kmer_size);

    for part in 0..config.parts {
        let mut ibf = Ibf::new(bins_per_part, config.bin_size, config.hash_funs)?;
        for local_bin in 0..bins_per_part {
            let path = &config.bin_files[part * bins_per_part + local_bin];
            insert_bin(&mut ibf, local_bin, path, config, seed)
                .with_context(|| format!("failed to index {}", path.display()))?;
        }

        let out = if config.parts == 1 {
            config.output.clone()
        } else {
            part_path(&config.output, part)
        };
        let mut file = File::create(&out)
            .with_context(|| format!("failed to create {}", out.display()))?;
        if config.compressed {
            CompressedIbf::from_ibf(&ibf).save(&mut file)?;
        } else {
            ibf.save(&mut file)?;
        }
        info!(
            "wrote part {}/{} ({} bins) to {}",
            part + 1,
            config.parts,
            bins_per_part,
            out.display()
        );
    }

    Ok(())
}

/// Insert every minimiser of every record in `path` into `bin`.
fn insert_bin(
    ibf: &mut Ibf,
    bin: usize,
    path: &Path,
    config: &BuildConfig,
    seed: u64,
) -> Result<()> {
    let mut source = FastaSource::open(path, BUILD_CHUNK_RECORDS)?;
    let mut chunk = QueryChunk::new();
    while source.next_chunk(&mut chunk)? {
        for record in &chunk {
            for hash in Minimisers::new(&record.seq, config.kmer_size, config.window_size, seed) {
                ibf.insert(hash, bin);
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
