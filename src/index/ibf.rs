//! Interleaved Bloom filter — uncompressed layout.
//!
//! The filter is a `bin_size × bins` bitmatrix stored row-major so that all
//! bin bits for one hash row sit in `bin_words` contiguous u64 words. A
//! membership query ANDs the rows selected by the hash functions; counting a
//! batch of hashes accumulates the surviving bits per bin. The word-parallel
//! AND plus bit iteration is what makes bulk counting cheap: 64 bins per
//! word operation.
//!
//! The hash family and on-disk codec here are load-bearing contracts between
//! `build` and `search`.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::ops::{AddAssign, Index};
use std::path::Path;

use anyhow::{Context, Result, bail};

/// Magic bytes for the uncompressed filter file format.
const IBF_MAGIC: &[u8; 8] = b"BSIFTIB1";

/// Maximum number of hash functions; one seed per function.
pub const MAX_HASH_FUNS: usize = 5;

/// Per-function multipliers for the row hash. Part of the file format.
const HASH_SEEDS: [u64; MAX_HASH_FUNS] = [
    0x9E37_79B9_7F4A_7C15,
    0xC2B2_AE3D_27D4_EB4F,
    0x1656_67B1_9E37_79F9,
    0x2545_F491_4F6C_DD1D,
    0x27D4_EB2F_1656_67C5,
];

/// Map a 64-bit minimiser to a row index for hash function `fun`.
#[inline]
pub(crate) fn hash_to_row(hash: u64, fun: usize, bin_size: u64) -> u64 {
    let mut h = hash.wrapping_mul(HASH_SEEDS[fun]);
    h ^= h >> 33;
    h = h.wrapping_mul(0xFF51_AFD7_ED55_8CCD);
    h ^= h >> 33;
    h % bin_size
}

// ---------------------------------------------------------------------------
// CountVector
// ---------------------------------------------------------------------------

/// Per-bin hit counters, 8 bits each, saturating.
///
/// Thresholding only compares `count >= threshold`, so a saturated counter
/// that already met the threshold stays a correct positive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountVector {
    counts: Vec<u8>,
}

impl CountVector {
    /// A zeroed vector of `bins` counters.
    pub fn new(bins: usize) -> Self {
        CountVector {
            counts: vec![0; bins],
        }
    }

    /// Number of counters.
    #[inline]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Whether the vector has zero counters.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Zero every counter.
    #[inline]
    pub fn reset(&mut self) {
        self.counts.fill(0);
    }

    /// The counters in bin order.
    #[inline]
    pub fn counts(&self) -> &[u8] {
        &self.counts
    }

    #[inline]
    pub(crate) fn bump(&mut self, bin: usize) {
        let c = &mut self.counts[bin];
        *c = c.saturating_add(1);
    }

    /// Element-wise saturating add of `other` into `self[offset..]`.
    ///
    /// Used by the multi-part orchestrator to concatenate per-part counts
    /// into one global-width accumulator.
    pub fn accumulate(&mut self, offset: usize, other: &CountVector) {
        let dst = &mut self.counts[offset..offset + other.counts.len()];
        for (d, &s) in dst.iter_mut().zip(other.counts.iter()) {
            *d = d.saturating_add(s);
        }
    }
}

impl AddAssign<&CountVector> for CountVector {
    fn add_assign(&mut self, other: &CountVector) {
        assert_eq!(self.counts.len(), other.counts.len());
        self.accumulate(0, other);
    }
}

impl Index<usize> for CountVector {
    type Output = u8;

    #[inline]
    fn index(&self, bin: usize) -> &u8 {
        &self.counts[bin]
    }
}

// ---------------------------------------------------------------------------
// BinFilter
// ---------------------------------------------------------------------------

/// The counting contract shared by the uncompressed and compressed layouts.
///
/// Both layouts expose the same logical bitmatrix through `row_word`; the
/// counting agent is written once against this trait and the layout choice
/// is resolved by the orchestrator's generic dispatch.
pub trait BinFilter: Send + Sync + Sized {
    /// Deserialize a filter from `path`.
    fn load(path: &Path) -> Result<Self>;

    /// Number of logical bins.
    fn bin_count(&self) -> usize;

    /// Words per row, `ceil(bin_count / 64)`.
    fn bin_words(&self) -> usize;

    /// Rows per bin (bits each bin contributes to the matrix).
    fn bin_size(&self) -> u64;

    /// Number of hash functions.
    fn hash_count(&self) -> usize;

    /// Word `word` of row `row`.
    fn row_word(&self, row: u64, word: usize) -> u64;

    /// A fresh per-thread counting agent over this filter.
    fn counting_agent(&self) -> CountingAgent<'_, Self> {
        CountingAgent {
            filter: self,
            counts: CountVector::new(self.bin_count()),
            rows: [0; MAX_HASH_FUNS],
        }
    }
}

// ---------------------------------------------------------------------------
// CountingAgent
// ---------------------------------------------------------------------------

/// Reusable per-thread counting scratch bound to one filter.
///
/// `bulk_count` returns a borrow of the agent's internal `CountVector`,
/// which the next call overwrites; callers copy or accumulate the result
/// before reissuing.
pub struct CountingAgent<'a, F> {
    filter: &'a F,
    counts: CountVector,
    rows: [u64; MAX_HASH_FUNS],
}

impl<F: BinFilter> CountingAgent<'_, F> {
    /// Count, for every bin, how many of `hashes` are members.
    pub fn bulk_count(&mut self, hashes: &[u64]) -> &CountVector {
        self.counts.reset();
        for &hash in hashes {
            self.count_one(hash);
        }
        &self.counts
    }

    fn count_one(&mut self, hash: u64) {
        let funs = self.filter.hash_count();
        let bin_size = self.filter.bin_size();
        for (fun, row) in self.rows[..funs].iter_mut().enumerate() {
            *row = hash_to_row(hash, fun, bin_size);
        }
        for word in 0..self.filter.bin_words() {
            let mut acc = self.filter.row_word(self.rows[0], word);
            for &row in &self.rows[1..funs] {
                if acc == 0 {
                    break;
                }
                acc &= self.filter.row_word(row, word);
            }
            let base = word * 64;
            while acc != 0 {
                let bit = acc.trailing_zeros() as usize;
                self.counts.bump(base + bit);
                acc &= acc - 1;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Ibf
// ---------------------------------------------------------------------------

/// Uncompressed interleaved Bloom filter with random-access bit I/O.
#[derive(Debug, Clone)]
pub struct Ibf {
    bin_count: usize,
    bin_words: usize,
    bin_size: u64,
    hash_funs: usize,
    /// `bin_size` rows of `bin_words` words each.
    data: Vec<u64>,
}

impl Ibf {
    /// An empty filter with `bin_count` bins of `bin_size` bits each and
    /// `hash_funs` hash functions.
    pub fn new(bin_count: usize, bin_size: u64, hash_funs: usize) -> Result<Self> {
        if bin_count == 0 {
            bail!("bin count must be at least 1");
        }
        if bin_size == 0 {
            bail!("bin size must be at least 1 bit");
        }
        if hash_funs == 0 || hash_funs > MAX_HASH_FUNS {
            bail!("hash function count must be in 1..={}", MAX_HASH_FUNS);
        }
        let bin_words = bin_count.div_ceil(64);
        let words = bin_size as usize * bin_words;
        Ok(Ibf {
            bin_count,
            bin_words,
            bin_size,
            hash_funs,
            data: vec![0; words],
        })
    }

    /// Set the membership bits of `hash` for `bin`.
    pub fn insert(&mut self, hash: u64, bin: usize) {
        debug_assert!(bin < self.bin_count);
        for fun in 0..self.hash_funs {
            let row = hash_to_row(hash, fun, self.bin_size) as usize;
            let word = row * self.bin_words + bin / 64;
            self.data[word] |= 1u64 << (bin % 64);
        }
    }

    /// Raw words in row-major order. Consumed by the compressed layout.
    pub(crate) fn words(&self) -> &[u64] {
        &self.data
    }

    /// Serialize to `writer`.
    ///
    /// Format:
    /// ```text
    /// [magic: 8 bytes "BSIFTIB1"]
    /// [bin_count: u64 LE] [bin_size: u64 LE] [hash_funs: u64 LE]
    /// [data: bin_size × ceil(bin_count/64) × u64 LE]
    /// ```
    pub fn save<W: Write>(&self, writer: &mut W) -> Result<()> {
        let mut w = BufWriter::new(writer);
        w.write_all(IBF_MAGIC)?;
        w.write_all(&(self.bin_count as u64).to_le_bytes())?;
        w.write_all(&self.bin_size.to_le_bytes())?;
        w.write_all(&(self.hash_funs as u64).to_le_bytes())?;
        for &word in &self.data {
            w.write_all(&word.to_le_bytes())?;
        }
        w.flush()?;
        Ok(())
    }

    /// Deserialize from `reader`.
    pub fn load_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut magic = [0u8; 8];
        reader
            .read_exact(&mut magic)
            .context("failed to read filter magic")?;
        if &magic != IBF_MAGIC {
            bail!("not an uncompressed interleaved Bloom filter (bad magic)");
        }
        let bin_count = read_u64_le(reader).context("failed to read bin count")? as usize;
        let bin_size = read_u64_le(reader).context("failed to read bin size")?;
        let hash_funs = read_u64_le(reader).context("failed to read hash count")? as usize;
        if hash_funs == 0 || hash_funs > MAX_HASH_FUNS {
            bail!("corrupt filter header: {} hash functions", hash_funs);
        }
        let bin_words = bin_count.div_ceil(64);
        let words = bin_size as usize * bin_words;
        let mut data = vec![0u64; words];
        for word in data.iter_mut() {
            *word = read_u64_le(reader).context("failed to read filter words")?;
        }
        Ok(Ibf {
            bin_count,
            bin_words,
            bin_size,
            hash_funs,
            data,
        })
    }
}

impl BinFilter for Ibf {
    fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let mut reader = BufReader::new(file);
        Ibf::load_from(&mut reader).with_context(|| format!("failed to load {}", path.display()))
    }

    #[inline]
    fn bin_count(&self) -> usize {
        self.bin_count
    }

    #[inline]
    fn bin_words(&self) -> usize {
        self.bin_words
    }

    #[inline]
    fn bin_size(&self) -> u64 {
        self.bin_size
    }

    #[inline]
    fn hash_count(&self) -> usize {
        self.hash_funs
    }

    #[inline]
    fn row_word(&self, row: u64, word: usize) -> u64 {
        self.data[row as usize * self.bin_words + word]
    }
}

pub(crate) fn read_u64_le<R: Read>(reader: &mut R) -> std::io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
