//! Crash log: contained lane panics as JSON lines, with one rotated generation.

use clawd_interfaces::{CrashReport, CrashSink};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum CrashLogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Append-only JSONL record of contained task panics.
///
/// With a size limit set, a write that would push the file past it first
/// moves the file to `<path>.1` (replacing the previous generation).
pub struct CrashLog {
    path: PathBuf,
    max_bytes: Option<u64>,
    file: Mutex<File>,
}

impl CrashLog {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, CrashLogError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = open_append(&path)?;
        Ok(Self {
            path,
            max_bytes: None,
            file: Mutex::new(file),
        })
    }

    /// 0 disables rotation.
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = (max_bytes > 0).then_some(max_bytes);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rotated_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".1");
        PathBuf::from(name)
    }

    pub fn append(&self, report: &CrashReport) -> Result<(), CrashLogError> {
        let mut line = serde_json::to_string(report)?;
        line.push('\n');

        let mut file = self.file.lock();
        if let Some(max) = self.max_bytes {
            let size = file.metadata()?.len();
            if size > 0 && size + line.len() as u64 > max {
                std::fs::rename(&self.path, self.rotated_path())?;
                *file = open_append(&self.path)?;
                info!(path = %self.path.display(), size, "Crash log rotated");
            }
        }
        file.write_all(line.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    /// The newest `limit` reports of the current generation, oldest first.
    /// Lines that no longer parse are skipped.
    pub fn tail(&self, limit: usize) -> Result<Vec<CrashReport>, CrashLogError> {
        let _writer = self.file.lock();
        let reader = BufReader::new(File::open(&self.path)?);

        let mut newest: VecDeque<CrashReport> = VecDeque::with_capacity(limit);
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() || limit == 0 {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(report) => {
                    if newest.len() == limit {
                        newest.pop_front();
                    }
                    newest.push_back(report);
                }
                Err(e) => warn!(path = %self.path.display(), "Skipping crash log line: {}", e),
            }
        }
        Ok(newest.into())
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

impl CrashSink for CrashLog {
    fn record(&self, report: &CrashReport) {
        if let Err(e) = self.append(report) {
            error!(
                lane = %report.lane,
                task = %report.task_id,
                "Failed to write crash log {}: {}",
                self.path.display(),
                e
            );
        }
    }
}
