//! FASTA query reading — wraps `paraseq` for batched reading.
//!
//! Produces chunks of `(id, sequence)` records for the search pipeline.
//! Input files are transparently decompressed via niffler (gzip, zstd, …).

use anyhow::{Context, Result};
use std::path::Path;

pub use paraseq::Record;
pub use paraseq::fasta;

/// Chunk cap in records. Chunks bound how much query data is resident while
/// a single index pass runs; the final chunk of a file may be smaller.
pub const MAX_CHUNK_RECORDS: usize = 10 * (1 << 20);

// ---------------------------------------------------------------------------
// QueryRecord
// ---------------------------------------------------------------------------

/// One query with an owned id and sequence buffer.
#[derive(Debug, Clone)]
pub struct QueryRecord {
    /// Header text as read from the file.
    pub id: String,
    /// Nucleotide sequence bytes.
    pub seq: Vec<u8>,
}

/// A chunk of queries for batch processing.
pub type QueryChunk = Vec<QueryRecord>;

// ---------------------------------------------------------------------------
// FastaSource
// ---------------------------------------------------------------------------

/// Sequential FASTA reader that produces chunks of `QueryRecord`.
///
/// Chunks accumulate whole parser batches until `chunk_size` is reached, so
/// a chunk can run over the cap by at most one batch.
pub struct FastaSource {
    reader: fasta::Reader<Box<dyn std::io::Read + Send>>,
    record_set: fasta::RecordSet,
    chunk_size: usize,
}

impl FastaSource {
    /// Open a FASTA file, decompressing if needed.
    pub fn open(path: &Path, chunk_size: usize) -> Result<Self> {
        let (raw, _format) = niffler::send::from_path(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let reader = fasta::Reader::new(raw);
        let record_set = reader.new_record_set();
        Ok(FastaSource {
            reader,
            record_set,
            chunk_size,
        })
    }

    /// Read the next chunk of queries into the provided buffer.
    ///
    /// Returns `Ok(true)` if records were produced, `Ok(false)` at EOF.
    pub fn next_chunk(&mut self, chunk: &mut QueryChunk) -> Result<bool> {
        chunk.clear();
        while chunk.len() < self.chunk_size {
            if !self.record_set.fill(&mut self.reader)? {
                break;
            }
            for record in self.record_set.iter() {
                let record = record?;
                chunk.push(QueryRecord {
                    id: String::from_utf8_lossy(record.id()).into_owned(),
                    seq: record.seq().into_owned(),
                });
            }
        }
        Ok(!chunk.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_fasta(records: &[(&str, &str)]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for (id, seq) in records {
            writeln!(file, ">{}", id).unwrap();
            writeln!(file, "{}", seq).unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn reads_ids_and_sequences() {
        let file = write_fasta(&[("query0", "ACGTACGT"), ("query1", "TTTT")]);
        let mut source = FastaSource::open(file.path(), 100).unwrap();

        let mut chunk = QueryChunk::new();
        assert!(source.next_chunk(&mut chunk).unwrap());
        assert_eq!(chunk.len(), 2);
        assert_eq!(chunk[0].id, "query0");
        assert_eq!(chunk[0].seq, b"ACGTACGT");
        assert_eq!(chunk[1].seq, b"TTTT");

        assert!(!source.next_chunk(&mut chunk).unwrap());
        assert!(chunk.is_empty());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(FastaSource::open(Path::new("/no/such/queries.fa"), 10).is_err());
    }
}
