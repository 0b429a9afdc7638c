//! File-backed log sink.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};
use tracing::{debug, info};

use super::{completion_marker, neutralize, LOG_FILE_NAME};
use crate::error::{Error, Result};
use crate::util::{retry_io, write_all_retrying};

/// Append-only sequence of text lines.
///
/// Safe to share between the batch task and request handlers.
pub struct LogSink {
    writer: Mutex<Option<File>>,
    window: RwLock<VecDeque<String>>,
    retained: usize,
    path: Option<PathBuf>,
}

impl LogSink {
    /// Sink that only keeps the in-memory window.
    pub fn in_memory(retained: usize) -> Self {
        Self {
            writer: Mutex::new(None),
            window: RwLock::new(VecDeque::new()),
            retained: retained.max(1),
            path: None,
        }
    }

    /// Open (or create) the log file at `path`, loading its last `retained`
    /// lines into the tail window.
    pub fn open(path: impl Into<PathBuf>, retained: usize) -> Result<Self> {
        let path = path.into();
        let retained = retained.max(1);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let window = if path.exists() {
            Self::load_window(&path, retained)?
        } else {
            VecDeque::new()
        };
        debug!(path = %path.display(), lines = window.len(), "Opened run log");

        let file = Self::open_append(&path)?;
        Ok(Self {
            writer: Mutex::new(Some(file)),
            window: RwLock::new(window),
            retained,
            path: Some(path),
        })
    }

    /// Append text to the log. Text spanning several lines is stored as
    /// several contiguous lines.
    pub fn append(&self, text: &str) -> Result<()> {
        let lines: Vec<String> = split_lines(text)
            .into_iter()
            .map(|line| neutralize(line).into_owned())
            .collect();
        self.write_lines(lines)
    }

    /// Append the reserved completion marker for a batch of `total` runs.
    pub(crate) fn append_completion_marker(&self, total: u32) -> Result<()> {
        self.write_lines(vec![completion_marker(total)])
    }

    /// Last `n` lines in original order (`n` below 1 is treated as 1).
    pub fn tail(&self, n: usize) -> Vec<String> {
        let n = n.max(1);
        let window = self.window.read().unwrap_or_else(PoisonError::into_inner);
        let skip = window.len().saturating_sub(n);
        window.iter().skip(skip).cloned().collect()
    }

    /// Number of lines currently in the tail window
    pub fn len(&self) -> usize {
        self.window
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Move the current log file into `archive_dir` and start an empty log.
    ///
    /// Returns the archive path, or `None` for an in-memory sink.
    pub fn rotate(&self, archive_dir: &Path) -> Result<Option<PathBuf>> {
        let mut writer = self.writer.lock().map_err(|_| Error::LockPoisoned)?;

        let archived = match &self.path {
            Some(path) if writer.is_some() => {
                if let Some(file) = writer.as_mut() {
                    file.flush()?;
                }
                std::fs::create_dir_all(archive_dir)?;
                let stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S%.3f");
                let target = archive_dir.join(format!("{}.{}", LOG_FILE_NAME, stamp));
                retry_io("archive run log", || std::fs::rename(path, &target))?;
                *writer = Some(Self::open_append(path)?);
                info!(archive = %target.display(), "Rotated run log");
                Some(target)
            }
            _ => None,
        };

        self.window
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(archived)
    }

    fn write_lines(&self, lines: Vec<String>) -> Result<()> {
        let mut writer = self.writer.lock().map_err(|_| Error::LockPoisoned)?;

        if let Some(file) = writer.as_mut() {
            let mut buf = String::new();
            for line in &lines {
                buf.push_str(line);
                buf.push('\n');
            }
            write_all_retrying("append run log", file, buf.as_bytes())?;
        }

        let mut window = self.window.write().unwrap_or_else(PoisonError::into_inner);
        for line in lines {
            window.push_back(line);
        }
        while window.len() > self.retained {
            window.pop_front();
        }
        Ok(())
    }

    fn open_append(path: &Path) -> Result<File> {
        retry_io("open run log", || {
            OpenOptions::new().create(true).append(true).open(path)
        })
    }

    /// Undecodable bytes are replaced rather than failing the open.
    fn load_window(path: &Path, retained: usize) -> Result<VecDeque<String>> {
        let file = retry_io("read run log", || File::open(path))?;
        let mut reader = BufReader::new(file);
        let mut window = VecDeque::with_capacity(retained.min(1024));
        let mut raw = Vec::new();
        loop {
            raw.clear();
            if reader.read_until(b'\n', &mut raw)? == 0 {
                break;
            }
            if raw.last() == Some(&b'\n') {
                raw.pop();
                if raw.last() == Some(&b'\r') {
                    raw.pop();
                }
            }
            window.push_back(String::from_utf8_lossy(&raw).into_owned());
            if window.len() > retained {
                window.pop_front();
            }
        }
        Ok(window)
    }
}

fn split_lines(text: &str) -> Vec<&str> {
    let lines: Vec<&str> = text.lines().collect();
    if lines.is_empty() { vec![""] } else { lines }
}
