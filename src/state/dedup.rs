//! Append-only record of item URLs that were fully handled

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Newline-delimited URL store, loaded once and appended on every success
///
/// Each recorded URL is written and flushed before `record` returns, so an
/// interrupted run loses at most the item in flight.
#[derive(Debug)]
pub struct DedupStore {
    path: PathBuf,
    urls: HashSet<String>,
}

impl DedupStore {
    /// Loads the store; a missing file is an empty store
    pub fn load(path: &Path) -> io::Result<Self> {
        let mut urls = HashSet::new();

        match File::open(path) {
            Ok(file) => {
                for line in BufReader::new(file).lines() {
                    let line = line?;
                    let url = line.trim();
                    if !url.is_empty() {
                        urls.insert(url.to_string());
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        tracing::debug!("Loaded {} handled URLs from {}", urls.len(), path.display());

        Ok(Self {
            path: path.to_path_buf(),
            urls,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, url: &str) -> bool {
        self.urls.contains(url.trim())
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    /// Records a handled URL
    ///
    /// Returns `Ok(false)` if the URL was already present; nothing is
    /// written in that case.
    pub fn record(&mut self, url: &str) -> io::Result<bool> {
        let url = url.trim();
        if url.is_empty() || self.urls.contains(url) {
            return Ok(false);
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", url)?;
        file.flush()?;
        file.sync_data()?;

        self.urls.insert(url.to_string());
        tracing::info!("Recorded {} in {}", url, self.path.display());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = DedupStore::load(&dir.path().join(".state")).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_record_persists_immediately() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".state");

        let mut store = DedupStore::load(&path).unwrap();
        assert!(store.record("https://example.com/v/1").unwrap());
        assert!(store.contains("https://example.com/v/1"));

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "https://example.com/v/1\n");

        let reloaded = DedupStore::load(&path).unwrap();
        assert!(reloaded.contains("https://example.com/v/1"));
    }

    #[test]
    fn test_record_is_unique() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".state");

        let mut store = DedupStore::load(&path).unwrap();
        assert!(store.record("https://example.com/v/1").unwrap());
        assert!(!store.record("https://example.com/v/1").unwrap());
        assert!(store.record("https://example.com/v/2").unwrap());
        assert_eq!(store.len(), 2);

        let lines = std::fs::read_to_string(&path).unwrap();
        assert_eq!(lines.lines().count(), 2);
    }

    #[test]
    fn test_load_skips_blank_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".state");
        std::fs::write(&path, "https://a.com/1\n\n  \nhttps://a.com/2\n").unwrap();

        let store = DedupStore::load(&path).unwrap();
        assert_eq!(store.len(), 2);
    }
}
