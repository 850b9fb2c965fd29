//! CLI command for building an index.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use clap::Args;
use tracing::info;

use crate::index::build::{BuildConfig, build_index};

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Reference FASTA files, one per bin, in bin order (comma-separated)
    #[arg(short = 'r', long, value_delimiter = ',', required = true)]
    pub refs: Vec<PathBuf>,
    /// Output index path (path prefix when --parts > 1)
    #[arg(short = 'o', long)]
    pub output: PathBuf,
    /// K-mer size
    #[arg(short = 'k', long, default_value = "20")]
    pub kmer: usize,
    /// Window size in bases
    #[arg(short = 'w', long, default_value = "24")]
    pub window: usize,
    /// Filter bits per bin
    #[arg(long, default_value = "8388608")]
    pub bin_size: u64,
    /// Number of hash functions
    #[arg(long, default_value = "2")]
    pub hash: usize,
    /// Split bins into this many equally sized index parts
    #[arg(long, default_value = "1")]
    pub parts: usize,
    /// Store the compressed (rank-based) layout
    #[arg(long)]
    pub compressed: bool,
}

pub fn run(args: BuildArgs) -> Result<()> {
    let start = Instant::now();
    let bins = args.refs.len();

    let config = BuildConfig {
        bin_files: args.refs,
        output: args.output,
        kmer_size: args.kmer,
        window_size: args.window,
        bin_size: args.bin_size,
        hash_funs: args.hash,
        parts: args.parts,
        compressed: args.compressed,
    };
    build_index(&config)?;

    info!(
        "indexed {} bins into {} part(s) in {:.1}s",
        bins,
        config.parts,
        start.elapsed().as_secs_f64()
    );
    Ok(())
}
