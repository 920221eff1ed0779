//! Line-delimited static tile URL lists.
//!
//! The static elevation tier is published as a flat set of pre-rendered
//! tiles; the list file (one URL per line) is the interface to it and is
//! what the mosaic step consumes for its coarse last-resort layer.

use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use super::SourceError;

/// An ordered, de-duplicated list of static tile URLs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TileUrlList {
    urls: Vec<String>,
}

impl TileUrlList {
    /// Builds a list from raw entries, dropping blanks and duplicates
    /// while preserving first-seen order.
    pub fn new(entries: impl IntoIterator<Item = String>) -> Self {
        let mut urls = Vec::new();
        for entry in entries {
            let entry = entry.trim();
            if entry.is_empty() || urls.iter().any(|u| u == entry) {
                continue;
            }
            urls.push(entry.to_string());
        }
        Self { urls }
    }

    /// Reads a list file, one URL per line.
    pub fn load(path: &Path) -> Result<Self, SourceError> {
        let file = std::fs::File::open(path)
            .map_err(|e| SourceError::Basemap(format!("{}: {}", path.display(), e)))?;
        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line =
                line.map_err(|e| SourceError::Basemap(format!("{}: {}", path.display(), e)))?;
            entries.push(line);
        }
        Ok(Self::new(entries))
    }

    /// Writes the list back out, one URL per line.
    pub fn save(&self, path: &Path) -> Result<(), SourceError> {
        let file = std::fs::File::create(path)
            .map_err(|e| SourceError::Basemap(format!("{}: {}", path.display(), e)))?;
        let mut writer = BufWriter::new(file);
        for url in &self.urls {
            writeln!(writer, "{url}")
                .map_err(|e| SourceError::Basemap(format!("{}: {}", path.display(), e)))?;
        }
        writer
            .flush()
            .map_err(|e| SourceError::Basemap(format!("{}: {}", path.display(), e)))
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}
