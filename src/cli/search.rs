//! CLI command for searching queries against an index.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use clap::Args;
use tracing::info;

use crate::search::{self, SearchConfig};

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Index file (path prefix when --parts > 1)
    #[arg(short = 'i', long)]
    pub index: PathBuf,
    /// Query FASTA file
    #[arg(short = 'q', long)]
    pub query: PathBuf,
    /// Results file
    #[arg(short = 'o', long)]
    pub output: PathBuf,
    /// K-mer size; must match the index build
    #[arg(short = 'k', long, default_value = "20")]
    pub kmer: usize,
    /// Window size in bases; must match the index build
    #[arg(short = 'w', long, default_value = "24")]
    pub window: usize,
    /// Pattern size the error model assumes per query
    #[arg(short = 'p', long)]
    pub pattern: usize,
    /// Number of tolerated errors
    #[arg(short = 'e', long, default_value = "0")]
    pub errors: usize,
    /// Retention probability of the error model
    #[arg(long, default_value = "0.99")]
    pub tau: f64,
    /// Fixed fraction of a query's minimisers required per hit;
    /// overrides the error model
    #[arg(long)]
    pub threshold: Option<f64>,
    /// Number of worker threads
    #[arg(short = 't', long, default_value = "1")]
    pub threads: usize,
    /// Number of index parts
    #[arg(long, default_value = "1")]
    pub parts: usize,
    /// Index uses the compressed layout
    #[arg(long)]
    pub compressed: bool,
    /// Write phase timings to <output>.time
    #[arg(long)]
    pub time: bool,
}

pub fn run(args: SearchArgs) -> Result<()> {
    let start = Instant::now();

    let config = SearchConfig {
        ibf_file: args.index,
        query_file: args.query,
        out_file: args.output,
        kmer_size: args.kmer,
        window_size: args.window,
        pattern_size: args.pattern,
        errors: args.errors,
        tau: args.tau,
        threshold: args.threshold,
        threads: args.threads,
        parts: args.parts,
        compressed: args.compressed,
        write_time: args.time,
    };
    search::run(&config)?;

    info!(
        "results written to {} in {:.1}s",
        config.out_file.display(),
        start.elapsed().as_secs_f64()
    );
    Ok(())
}
