//! Completed-tile ledger.
//!
//! An append-only line file recording which tiles have been fully written,
//! used to make interrupted runs resumable. One record per line,
//! `tile_id<TAB>path`, flushed as soon as it is written so a crash can
//! lose at most the record being appended. A tile is only recorded after
//! its raster and sidecar are durably on disk, so replaying the ledger
//! never claims work that did not finish.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors raised by ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Append-only record of completed tiles.
///
/// Reads are lock-free after load; writes are serialized through a single
/// buffered writer so records never interleave.
pub struct JobLedger {
    path: PathBuf,
    completed: RwLock<HashSet<String>>,
    writer: Mutex<BufWriter<File>>,
}

impl JobLedger {
    /// Opens a ledger, loading any existing records and positioning the
    /// writer for appends. The file is created if missing.
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        let io_err = |source| LedgerError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut completed = HashSet::new();
        if path.exists() {
            let file = File::open(path).map_err(io_err)?;
            for (line_no, line) in BufReader::new(file).lines().enumerate() {
                let line = line.map_err(io_err)?;
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match line.split_once('\t') {
                    Some((tile_id, _path)) => {
                        completed.insert(tile_id.to_string());
                    }
                    None => {
                        // Tolerate damage from a torn final write.
                        warn!(
                            path = %path.display(),
                            line = line_no + 1,
                            "skipping malformed ledger record"
                        );
                    }
                }
            }
        }
        debug!(
            path = %path.display(),
            records = completed.len(),
            "ledger loaded"
        );

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(io_err)?;

        Ok(Self {
            path: path.to_path_buf(),
            completed: RwLock::new(completed),
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Whether a tile is already recorded as completed.
    pub fn has_completed(&self, tile_id: &str) -> bool {
        self.completed.read().contains(tile_id)
    }

    /// Number of recorded tiles.
    pub fn len(&self) -> usize {
        self.completed.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.completed.read().is_empty()
    }

    /// Records a completed tile, flushing the line to disk before
    /// returning. Recording the same tile twice is a no-op.
    pub fn record_completed(&self, tile_id: &str, path: &Path) -> Result<(), LedgerError> {
        if !self.completed.write().insert(tile_id.to_string()) {
            return Ok(());
        }

        let io_err = |source| LedgerError::Io {
            path: self.path.clone(),
            source,
        };
        let mut writer = self.writer.lock();
        writeln!(writer, "{}\t{}", tile_id, path.display()).map_err(io_err)?;
        writer.flush().map_err(io_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_empty_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("completed_tiles.lst");
        let ledger = JobLedger::open(&path).unwrap();
        assert!(ledger.is_empty());
        assert!(path.exists());
    }

    #[test]
    fn test_record_and_query() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("completed_tiles.lst");
        let ledger = JobLedger::open(&path).unwrap();

        ledger
            .record_completed("abc123", Path::new("/out/tiles/12090301_abc123.tif"))
            .unwrap();
        assert!(ledger.has_completed("abc123"));
        assert!(!ledger.has_completed("def456"));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_reload_preserves_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("completed_tiles.lst");
        {
            let ledger = JobLedger::open(&path).unwrap();
            ledger
                .record_completed("abc123", Path::new("/out/a.tif"))
                .unwrap();
            ledger
                .record_completed("def456", Path::new("/out/b.tif"))
                .unwrap();
        }

        let reloaded = JobLedger::open(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.has_completed("abc123"));
        assert!(reloaded.has_completed("def456"));
    }

    #[test]
    fn test_duplicate_record_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("completed_tiles.lst");
        let ledger = JobLedger::open(&path).unwrap();

        ledger
            .record_completed("abc123", Path::new("/out/a.tif"))
            .unwrap();
        ledger
            .record_completed("abc123", Path::new("/out/a.tif"))
            .unwrap();
        drop(ledger);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("completed_tiles.lst");
        std::fs::write(&path, "abc123\t/out/a.tif\nnot a record\n\ndef456\t/out/b.tif\n")
            .unwrap();

        let ledger = JobLedger::open(&path).unwrap();
        assert_eq!(ledger.len(), 2);
        assert!(ledger.has_completed("abc123"));
        assert!(ledger.has_completed("def456"));
    }

    #[test]
    fn test_appends_survive_across_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("completed_tiles.lst");
        {
            let ledger = JobLedger::open(&path).unwrap();
            ledger
                .record_completed("abc123", Path::new("/out/a.tif"))
                .unwrap();
        }
        {
            let ledger = JobLedger::open(&path).unwrap();
            ledger
                .record_completed("def456", Path::new("/out/b.tif"))
                .unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("abc123\t/out/a.tif"));
        assert!(contents.contains("def456\t/out/b.tif"));
    }
}
