//! End-to-end build + search tests.
//!
//! Each test builds a small index in a tempdir, runs a search over a query
//! file, and checks the results file against the output contract:
//! one `<id>\t<bin>,<bin>,…,\n` line per query, ascending bin ids, each id
//! followed by a comma, no-hit queries keeping just the id and the tab.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use binsift::index::build::{BuildConfig, build_index};
use binsift::search::{self, SearchConfig};
use binsift::search::threshold::store_table;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Deterministic pseudo-random DNA.
fn random_seq(len: usize, seed: u64) -> String {
    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            b"ACGT"[(state >> 33) as usize % 4] as char
        })
        .collect()
}

fn write_fasta(path: &Path, records: &[(&str, &str)]) {
    let mut file = File::create(path).unwrap();
    for (id, seq) in records {
        writeln!(file, ">{}", id).unwrap();
        writeln!(file, "{}", seq).unwrap();
    }
}

fn build(dir: &Path, refs: &[String], out: &Path, parts: usize, compressed: bool) {
    let bin_files: Vec<PathBuf> = refs
        .iter()
        .enumerate()
        .map(|(i, seq)| {
            let path = dir.join(format!("ref{}.fa", i));
            write_fasta(&path, &[(&format!("ref{}", i), seq)]);
            path
        })
        .collect();
    build_index(&BuildConfig {
        bin_files,
        output: out.to_path_buf(),
        kmer_size: 19,
        window_size: 23,
        bin_size: 65536,
        hash_funs: 2,
        parts,
        compressed,
    })
    .unwrap();
}

fn config(index: &Path, query: &Path, out: &Path) -> SearchConfig {
    SearchConfig {
        ibf_file: index.to_path_buf(),
        query_file: query.to_path_buf(),
        out_file: out.to_path_buf(),
        kmer_size: 19,
        window_size: 23,
        pattern_size: 100,
        errors: 2,
        tau: 0.9999,
        threshold: None,
        threads: 2,
        parts: 1,
        compressed: false,
        write_time: false,
    }
}

fn result_lines(path: &Path) -> Vec<String> {
    let contents = std::fs::read_to_string(path).unwrap();
    assert!(contents.is_empty() || contents.ends_with('\n'));
    contents.lines().map(str::to_owned).collect()
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn exact_query_hits_its_own_bin() {
    let dir = tempfile::tempdir().unwrap();
    let reference = "A".repeat(200);
    let index = dir.path().join("index.ibf");
    build(dir.path(), &[reference.clone()], &index, 1, false);

    let query = dir.path().join("queries.fa");
    write_fasta(&query, &[("query0", &reference[..100])]);
    let out = dir.path().join("out.tsv");
    search::run(&config(&index, &query, &out)).unwrap();

    assert_eq!(result_lines(&out), vec!["query0\t0,".to_string()]);
}

#[test]
fn unrelated_query_hits_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let refs = [random_seq(200, 1), random_seq(200, 2)];
    let index = dir.path().join("index.ibf");
    build(dir.path(), &refs.to_vec(), &index, 1, false);

    let query = dir.path().join("queries.fa");
    write_fasta(&query, &[("query0", &random_seq(100, 99))]);
    let out = dir.path().join("out.tsv");
    search::run(&config(&index, &query, &out)).unwrap();

    // No hits keeps the id and the tab, nothing else.
    assert_eq!(result_lines(&out), vec!["query0\t".to_string()]);
}

#[test]
fn zero_threshold_lists_every_bin() {
    let dir = tempfile::tempdir().unwrap();
    let refs = [random_seq(200, 1), random_seq(200, 2)];
    let index = dir.path().join("index.ibf");
    build(dir.path(), &refs.to_vec(), &index, 1, false);

    let query = dir.path().join("queries.fa");
    write_fasta(&query, &[("query0", &random_seq(100, 99))]);
    let out = dir.path().join("out.tsv");
    let mut cfg = config(&index, &query, &out);
    cfg.threshold = Some(0.0);
    search::run(&cfg).unwrap();

    assert_eq!(result_lines(&out), vec!["query0\t0,1,".to_string()]);
}

#[test]
fn query_shorter_than_window_emits_empty_line() {
    let dir = tempfile::tempdir().unwrap();
    let refs = [random_seq(200, 1)];
    let index = dir.path().join("index.ibf");
    build(dir.path(), &refs.to_vec(), &index, 1, false);

    let query = dir.path().join("queries.fa");
    write_fasta(&query, &[("tiny", "ACGTACGTAC")]);
    let out = dir.path().join("out.tsv");
    search::run(&config(&index, &query, &out)).unwrap();

    assert_eq!(result_lines(&out), vec!["tiny\t".to_string()]);
}

#[test]
fn every_query_lists_its_own_bin() {
    let dir = tempfile::tempdir().unwrap();
    let refs: Vec<String> = (0..4).map(|i| random_seq(200, 10 + i)).collect();
    let index = dir.path().join("index.ibf");
    build(dir.path(), &refs, &index, 1, false);

    let query = dir.path().join("queries.fa");
    let records: Vec<(String, String)> = refs
        .iter()
        .enumerate()
        .map(|(i, r)| (format!("query{}", i), r[50..150].to_string()))
        .collect();
    let borrowed: Vec<(&str, &str)> =
        records.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect();
    write_fasta(&query, &borrowed);

    let out = dir.path().join("out.tsv");
    search::run(&config(&index, &query, &out)).unwrap();

    let mut lines = result_lines(&out);
    lines.sort();
    assert_eq!(lines.len(), 4);
    for (i, line) in lines.iter().enumerate() {
        let (id, hits) = line.split_once('\t').unwrap();
        assert_eq!(id, format!("query{}", i));
        let bins: Vec<&str> = hits.split_terminator(',').collect();
        assert!(bins.contains(&i.to_string().as_str()), "line: {line}");
    }
}

#[test]
fn multi_part_output_matches_single_part() {
    let dir = tempfile::tempdir().unwrap();
    let refs: Vec<String> = (0..4).map(|i| random_seq(200, 20 + i)).collect();

    let single = dir.path().join("single.ibf");
    build(dir.path(), &refs, &single, 1, false);
    let split = dir.path().join("split.ibf");
    build(dir.path(), &refs, &split, 4, false);

    let query = dir.path().join("queries.fa");
    let records: Vec<(String, String)> = refs
        .iter()
        .enumerate()
        .map(|(i, r)| (format!("query{}", i), r[30..130].to_string()))
        .collect();
    let borrowed: Vec<(&str, &str)> =
        records.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect();
    write_fasta(&query, &borrowed);

    let out_single = dir.path().join("single.tsv");
    search::run(&config(&single, &query, &out_single)).unwrap();

    let out_split = dir.path().join("split.tsv");
    let mut cfg = config(&split, &query, &out_split);
    cfg.parts = 4;
    search::run(&cfg).unwrap();

    let mut a = result_lines(&out_single);
    let mut b = result_lines(&out_split);
    a.sort();
    b.sort();
    assert_eq!(a, b);
}

#[test]
fn compressed_layout_matches_uncompressed() {
    let dir = tempfile::tempdir().unwrap();
    let refs: Vec<String> = (0..2).map(|i| random_seq(200, 30 + i)).collect();

    let plain = dir.path().join("plain.ibf");
    build(dir.path(), &refs, &plain, 1, false);
    let packed = dir.path().join("packed.ibf");
    build(dir.path(), &refs, &packed, 1, true);

    let query = dir.path().join("queries.fa");
    write_fasta(
        &query,
        &[("query0", &refs[0][10..110]), ("query1", &random_seq(100, 77))],
    );

    let out_plain = dir.path().join("plain.tsv");
    search::run(&config(&plain, &query, &out_plain)).unwrap();

    let out_packed = dir.path().join("packed.tsv");
    let mut cfg = config(&packed, &query, &out_packed);
    cfg.compressed = true;
    search::run(&cfg).unwrap();

    let mut a = result_lines(&out_plain);
    let mut b = result_lines(&out_packed);
    a.sort();
    b.sort();
    assert_eq!(a, b);
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[test]
fn output_is_deterministic_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    let refs: Vec<String> = (0..3).map(|i| random_seq(300, 40 + i)).collect();
    let index = dir.path().join("index.ibf");
    build(dir.path(), &refs, &index, 1, false);

    let query = dir.path().join("queries.fa");
    let records: Vec<(String, String)> = (0..20)
        .map(|i| {
            let r = &refs[i % 3];
            (format!("q{}", i), r[i..i + 100].to_string())
        })
        .collect();
    let borrowed: Vec<(&str, &str)> =
        records.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect();
    write_fasta(&query, &borrowed);

    let out1 = dir.path().join("run1.tsv");
    let mut cfg = config(&index, &query, &out1);
    cfg.threads = 4;
    search::run(&cfg).unwrap();

    let out2 = dir.path().join("run2.tsv");
    cfg.out_file = out2.clone();
    search::run(&cfg).unwrap();

    let mut a = result_lines(&out1);
    let mut b = result_lines(&out2);
    a.sort();
    b.sort();
    assert_eq!(a, b);
    assert_eq!(a.len(), 20);
}

#[test]
fn raising_user_threshold_never_adds_hits() {
    let dir = tempfile::tempdir().unwrap();
    let refs: Vec<String> = (0..2).map(|i| random_seq(200, 50 + i)).collect();
    let index = dir.path().join("index.ibf");
    build(dir.path(), &refs, &index, 1, false);

    let query = dir.path().join("queries.fa");
    write_fasta(&query, &[("query0", &refs[0][0..100])]);

    let hits_at = |threshold: f64, name: &str| -> Vec<String> {
        let out = dir.path().join(name);
        let mut cfg = config(&index, &query, &out);
        cfg.threshold = Some(threshold);
        search::run(&cfg).unwrap();
        let line = result_lines(&out).pop().unwrap();
        let (_, hits) = line.split_once('\t').unwrap();
        hits.split_terminator(',').map(str::to_owned).collect()
    };

    let low = hits_at(0.1, "low.tsv");
    let high = hits_at(0.9, "high.tsv");
    for bin in &high {
        assert!(low.contains(bin));
    }
}

#[test]
fn threshold_cache_is_used_when_present() {
    let dir = tempfile::tempdir().unwrap();
    let reference = "A".repeat(200);
    let index = dir.path().join("index.ibf");
    build(dir.path(), &[reference.clone()], &index, 1, false);

    let query = dir.path().join("queries.fa");
    write_fasta(&query, &[("query0", &reference[..100])]);

    // Poison the cache with an unreachable table: if the search loads the
    // cache instead of recomputing, the exact-match query cannot hit.
    let cache = PathBuf::from(format!(
        "{}_threshold_p100_w23_k19_e2_tau0.9999.bin",
        index.display()
    ));
    let span = (100 - 23 + 1) - (82usize).div_ceil(5);
    store_table(&cache, &vec![1000u64; span + 1]).unwrap();

    let out = dir.path().join("poisoned.tsv");
    search::run(&config(&index, &query, &out)).unwrap();
    assert_eq!(result_lines(&out), vec!["query0\t".to_string()]);

    // With the cache gone the model is recomputed and the hit returns.
    std::fs::remove_file(&cache).unwrap();
    let out = dir.path().join("fresh.tsv");
    search::run(&config(&index, &query, &out)).unwrap();
    assert_eq!(result_lines(&out), vec!["query0\t0,".to_string()]);
    // The recomputation refilled the cache.
    assert!(cache.exists());
}

#[test]
fn timing_report_has_three_columns() {
    let dir = tempfile::tempdir().unwrap();
    let refs = [random_seq(200, 60)];
    let index = dir.path().join("index.ibf");
    build(dir.path(), &refs.to_vec(), &index, 1, false);

    let query = dir.path().join("queries.fa");
    write_fasta(&query, &[("query0", &refs[0][0..100])]);
    let out = dir.path().join("out.tsv");
    let mut cfg = config(&index, &query, &out);
    cfg.write_time = true;
    search::run(&cfg).unwrap();

    let report = std::fs::read_to_string(dir.path().join("out.tsv.time")).unwrap();
    let mut lines = report.lines();
    assert_eq!(lines.next(), Some("IBF I/O\tReads I/O\tCompute"));
    let values: Vec<f64> = lines
        .next()
        .unwrap()
        .split('\t')
        .map(|v| v.parse().unwrap())
        .collect();
    assert_eq!(values.len(), 3);
    assert!(values.iter().all(|v| *v >= 0.0));
}

#[test]
fn missing_index_is_a_fatal_error() {
    let dir = tempfile::tempdir().unwrap();
    let query = dir.path().join("queries.fa");
    write_fasta(&query, &[("query0", "ACGTACGTACGTACGTACGTACGT")]);
    let out = dir.path().join("out.tsv");
    let cfg = config(&dir.path().join("nope.ibf"), &query, &out);
    let err = search::run(&cfg).unwrap_err();
    assert!(err.to_string().contains("nope.ibf"));
}
