//! JSON-lines checkpoint of finished probe batches.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};
use parking_lot::Mutex;

use crate::models::TestResult;
use crate::utils::file::open_append;

pub struct Checkpoint {
    path: PathBuf,
    file: Mutex<File>,
}

impl Checkpoint {
    /// Start a fresh checkpoint, discarding any previous one.
    pub fn create(path: &Path) -> std::io::Result<Self> {
        let file = File::create(path)?;
        Ok(Checkpoint {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    /// Continue an existing checkpoint.
    pub fn append_to(path: &Path) -> std::io::Result<Self> {
        let file = open_append(path)?;
        Ok(Checkpoint {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    /// Append one batch with a single write, then sync.
    pub fn append(&self, results: &[TestResult]) -> std::io::Result<()> {
        if results.is_empty() {
            return Ok(());
        }
        let mut buf = Vec::new();
        for result in results {
            serde_json::to_writer(&mut buf, result)?;
            buf.push(b'\n');
        }
        let mut file = self.file.lock();
        file.write_all(&buf)?;
        file.sync_data()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back a checkpoint, skipping lines that do not parse
    /// (a torn last line after a crash).
    pub fn load(path: &Path) -> Vec<TestResult> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Cannot read checkpoint '{}': {}", path.display(), e);
                }
                return Vec::new();
            }
        };
        let mut results = Vec::new();
        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!("Checkpoint read stopped at line {}: {}", number + 1, e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TestResult>(&line) {
                Ok(result) => results.push(result),
                Err(e) => debug!("Skipping checkpoint line {}: {}", number + 1, e),
            }
        }
        results
    }

    /// Delete the checkpoint after a complete run.
    pub fn remove(self) -> std::io::Result<()> {
        drop(self.file);
        match std::fs::remove_file(&self.path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ErrorKind;
    use chrono::Utc;
    use std::fs::OpenOptions;
    use tempfile::tempdir;

    #[test]
    fn test_append_and_load_with_torn_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoint.jsonl");
        let now = Utc::now();

        let checkpoint = Checkpoint::create(&path).unwrap();
        checkpoint
            .append(&[
                TestResult::success("a", 12, now),
                TestResult::failure("b", ErrorKind::Refused, now),
            ])
            .unwrap();
        drop(checkpoint);

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"identity\":\"c\",\"succ").unwrap();

        let loaded = Checkpoint::load(&path);
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].identity, "a");
        assert_eq!(loaded[1].error_kind, Some(ErrorKind::Refused));
    }

    #[test]
    fn test_resume_after_torn_line_keeps_new_batch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoint.jsonl");
        let now = Utc::now();

        let checkpoint = Checkpoint::create(&path).unwrap();
        checkpoint.append(&[TestResult::success("a", 12, now)]).unwrap();
        drop(checkpoint);
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"identity\":\"torn\",\"succ").unwrap();
        drop(file);

        let checkpoint = Checkpoint::append_to(&path).unwrap();
        checkpoint
            .append(&[
                TestResult::success("b", 20, now),
                TestResult::failure("c", ErrorKind::Timeout, now),
            ])
            .unwrap();
        drop(checkpoint);

        let identities: Vec<String> = Checkpoint::load(&path)
            .into_iter()
            .map(|r| r.identity)
            .collect();
        assert_eq!(identities, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_remove() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoint.jsonl");
        let checkpoint = Checkpoint::append_to(&path).unwrap();
        checkpoint.remove().unwrap();
        assert!(!path.exists());
        assert!(Checkpoint::load(&path).is_empty());
    }
}
