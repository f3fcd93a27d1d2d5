//! Append-only snapshot history, one JSON Lines file per device.

use crate::battery::Battery;
use crate::Result;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct HistoryStore {
    dir: PathBuf,
}

impl HistoryStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// `70:3E:97:EB:37:16` is stored in `703E97EB3716.jsonl`.
    pub fn path_for(&self, address: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", address.replace(':', "")))
    }

    pub fn append(&self, address: &str, snapshot: &Battery) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(address);
        log::debug!("Appending snapshot to {path:?}");
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut line = serde_json::to_vec(snapshot)?;
        line.push(b'\n');
        file.write_all(&line)?;
        Ok(())
    }

    /// All snapshots of `address` in the order they were appended.
    pub fn load(&self, address: &str) -> Result<Vec<Battery>> {
        let path = self.path_for(address);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(fs::File::open(&path)?);
        let mut snapshots = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            snapshots.push(serde_json::from_str(&line)?);
        }
        Ok(snapshots)
    }
}
