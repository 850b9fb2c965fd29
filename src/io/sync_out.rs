//! Write-serialized results sink.
//!
//! Worker threads hand in complete lines; the mutex guarantees each line
//! lands contiguously in the output file. Order across producers is
//! whatever the scheduler makes of it.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};

use crate::error::SiftError;

/// Mutex-guarded append-only writer over the results file.
pub struct SyncWriter {
    path: PathBuf,
    file: Mutex<BufWriter<File>>,
}

impl SyncWriter {
    /// Create (truncate) the results file at `path`.
    pub fn create(path: &Path) -> Result<Self> {
        let file =
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        Ok(SyncWriter {
            path: path.to_path_buf(),
            file: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Append one record. The caller supplies the terminating newline.
    pub fn write(&self, record: &str) -> Result<(), SiftError> {
        let mut file = self.file.lock().unwrap();
        file.write_all(record.as_bytes())
            .map_err(|source| SiftError::OutputWrite {
                path: self.path.clone(),
                source,
            })
    }

    /// Flush buffered records to disk.
    pub fn flush(&self) -> Result<(), SiftError> {
        let mut file = self.file.lock().unwrap();
        file.flush().map_err(|source| SiftError::OutputWrite {
            path: self.path.clone(),
            source,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
