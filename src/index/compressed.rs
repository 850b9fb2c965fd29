//! Interleaved Bloom filter — compressed layout.
//!
//! Stores the same logical bitmatrix as [`Ibf`](super::ibf::Ibf) but keeps
//! only its non-zero words: an occupancy bitmap marks which word slots carry
//! payload, a rank directory gives the number of payload words before each
//! occupancy word, and lookups resolve a slot to its payload position with
//! one popcount. Sparse filters (large bins, few minimisers) shrink to a
//! fraction of the random-access layout.
//!
//! The counting contract is identical to the uncompressed layout; only
//! `row_word` differs. Compressed filters are built by converting a finished
//! uncompressed filter and are immutable afterwards.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};

use super::ibf::{BinFilter, Ibf, MAX_HASH_FUNS, read_u64_le};

/// Magic bytes for the compressed filter file format.
const CIBF_MAGIC: &[u8; 8] = b"BSIFTCB1";

/// Rank-based sparse encoding of an interleaved Bloom filter.
#[derive(Debug, Clone)]
pub struct CompressedIbf {
    bin_count: usize,
    bin_words: usize,
    bin_size: u64,
    hash_funs: usize,
    /// One bit per logical word slot; set iff the slot holds a non-zero word.
    occupancy: Vec<u64>,
    /// Payload words preceding each occupancy word (exclusive prefix counts).
    rank: Vec<u64>,
    /// The non-zero words, in slot order.
    payload: Vec<u64>,
}

impl CompressedIbf {
    /// Compress a finished uncompressed filter.
    pub fn from_ibf(ibf: &Ibf) -> Self {
        let words = ibf.words();
        let occ_words = words.len().div_ceil(64).max(1);
        let mut occupancy = vec![0u64; occ_words];
        let mut rank = vec![0u64; occ_words];
        let mut payload = Vec::new();

        let mut preceding = 0u64;
        for (slot, &word) in words.iter().enumerate() {
            if slot % 64 == 0 {
                rank[slot / 64] = preceding;
            }
            if word != 0 {
                occupancy[slot / 64] |= 1u64 << (slot % 64);
                payload.push(word);
                preceding += 1;
            }
        }

        CompressedIbf {
            bin_count: ibf.bin_count(),
            bin_words: ibf.bin_words(),
            bin_size: ibf.bin_size(),
            hash_funs: ibf.hash_count(),
            occupancy,
            rank,
            payload,
        }
    }

    /// The word at logical slot `slot`, zero when the slot is empty.
    #[inline]
    fn word_at(&self, slot: usize) -> u64 {
        let occ_word = self.occupancy[slot / 64];
        let bit = slot % 64;
        if occ_word & (1u64 << bit) == 0 {
            return 0;
        }
        let below = (occ_word & ((1u64 << bit) - 1)).count_ones() as u64;
        self.payload[(self.rank[slot / 64] + below) as usize]
    }

    /// Serialize to `writer`.
    ///
    /// Format:
    /// ```text
    /// [magic: 8 bytes "BSIFTCB1"]
    /// [bin_count: u64 LE] [bin_size: u64 LE] [hash_funs: u64 LE]
    /// [payload_len: u64 LE]
    /// [occupancy: ceil(bin_size × ceil(bin_count/64) / 64) × u64 LE]
    /// [payload: payload_len × u64 LE]
    /// ```
    /// The rank directory is rebuilt on load.
    pub fn save<W: Write>(&self, writer: &mut W) -> Result<()> {
        let mut w = BufWriter::new(writer);
        w.write_all(CIBF_MAGIC)?;
        w.write_all(&(self.bin_count as u64).to_le_bytes())?;
        w.write_all(&self.bin_size.to_le_bytes())?;
        w.write_all(&(self.hash_funs as u64).to_le_bytes())?;
        w.write_all(&(self.payload.len() as u64).to_le_bytes())?;
        for &word in &self.occupancy {
            w.write_all(&word.to_le_bytes())?;
        }
        for &word in &self.payload {
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
        if &magic != CIBF_MAGIC {
            bail!("not a compressed interleaved Bloom filter (bad magic)");
        }
        let bin_count = read_u64_le(reader).context("failed to read bin count")? as usize;
        let bin_size = read_u64_le(reader).context("failed to read bin size")?;
        let hash_funs = read_u64_le(reader).context("failed to read hash count")? as usize;
        if hash_funs == 0 || hash_funs > MAX_HASH_FUNS {
            bail!("corrupt filter header: {} hash functions", hash_funs);
        }
        let payload_len = read_u64_le(reader).context("failed to read payload length")? as usize;

        let bin_words = bin_count.div_ceil(64);
        let slots = bin_size as usize * bin_words;
        let occ_words = slots.div_ceil(64).max(1);

        let mut occupancy = vec![0u64; occ_words];
        for word in occupancy.iter_mut() {
            *word = read_u64_le(reader).context("failed to read occupancy bitmap")?;
        }
        let set_bits: u64 = occupancy.iter().map(|w| w.count_ones() as u64).sum();
        if set_bits != payload_len as u64 {
            bail!(
                "corrupt filter: occupancy marks {} words but payload holds {}",
                set_bits,
                payload_len
            );
        }

        let mut payload = vec![0u64; payload_len];
        for word in payload.iter_mut() {
            *word = read_u64_le(reader).context("failed to read payload words")?;
        }

        let mut rank = vec![0u64; occ_words];
        let mut preceding = 0u64;
        for (i, &occ) in occupancy.iter().enumerate() {
            rank[i] = preceding;
            preceding += occ.count_ones() as u64;
        }

        Ok(CompressedIbf {
            bin_count,
            bin_words,
            bin_size,
            hash_funs,
            occupancy,
            rank,
            payload,
        })
    }
}

impl BinFilter for CompressedIbf {
    fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let mut reader = BufReader::new(file);
        CompressedIbf::load_from(&mut reader)
            .with_context(|| format!("failed to load {}", path.display()))
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
        self.word_at(row as usize * self.bin_words + word)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
