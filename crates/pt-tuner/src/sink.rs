//! Metric history sinks
//!
//! A sink keeps an append-only series of [`MetricRecord`]s per pool, retained
//! to the latest `retention` records with the oldest dropped first. History is
//! always returned oldest to newest.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use pt_common::{MetricRecord, METRIC_RECORD_HEADER};
use crate::Result;

pub const DEFAULT_RETENTION: usize = 60;

pub trait MetricsSink: Send + Sync {
    fn append(&self, pool: &str, record: MetricRecord) -> Result<()>;

    /// Retained records of a pool, oldest first. Unknown pools have an empty history.
    fn history(&self, pool: &str) -> Result<Vec<MetricRecord>>;

    fn retention(&self) -> usize;
}

// ============================================================================
// In-memory sink
// ============================================================================

pub struct InMemoryMetricsSink {
    retention: usize,
    series: DashMap<String, Mutex<VecDeque<MetricRecord>>>,
}

impl InMemoryMetricsSink {
    pub fn new(retention: usize) -> Self {
        Self {
            retention: retention.max(1),
            series: DashMap::new(),
        }
    }
}

impl Default for InMemoryMetricsSink {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

impl MetricsSink for InMemoryMetricsSink {
    fn append(&self, pool: &str, record: MetricRecord) -> Result<()> {
        let series = self
            .series
            .entry(pool.to_string())
            .or_insert_with(|| Mutex::new(VecDeque::with_capacity(self.retention)));

        let mut records = series.lock();
        records.push_back(record);
        while records.len() > self.retention {
            records.pop_front();
        }
        Ok(())
    }

    fn history(&self, pool: &str) -> Result<Vec<MetricRecord>> {
        Ok(self
            .series
            .get(pool)
            .map(|series| series.lock().iter().cloned().collect())
            .unwrap_or_default())
    }

    fn retention(&self) -> usize {
        self.retention
    }
}

// ============================================================================
// CSV file sink
// ============================================================================

/// One `<pool>Detail.txt` file per pool: a header line followed by the
/// retained records. Every append rewrites the file with the rotated window.
///
/// Distinct pool names always map to distinct files, see [`pool_file_stem`].
pub struct CsvFileSink {
    log_dir: PathBuf,
    retention: usize,
    file_locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl CsvFileSink {
    pub fn new(log_dir: impl Into<PathBuf>, retention: usize) -> Self {
        Self {
            log_dir: log_dir.into(),
            retention: retention.max(1),
            file_locks: DashMap::new(),
        }
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn file_path(&self, pool: &str) -> PathBuf {
        self.log_dir.join(format!("{}Detail.txt", pool_file_stem(pool)))
    }

    fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        self.file_locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn read_records(&self, path: &Path) -> Result<Vec<MetricRecord>> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line == METRIC_RECORD_HEADER {
                continue;
            }
            match MetricRecord::parse_csv_line(line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    path = %path.display(),
                    line = line_no + 1,
                    error = %e,
                    "Skipping malformed metric record"
                ),
            }
        }
        Ok(records)
    }

    fn write_records(&self, path: &Path, records: &[MetricRecord]) -> Result<()> {
        let mut content = String::with_capacity(64 * (records.len() + 1));
        content.push_str(METRIC_RECORD_HEADER);
        content.push('\n');
        for record in records {
            content.push_str(&record.to_csv_line());
            content.push('\n');
        }

        let tmp = path.with_extension("txt.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl MetricsSink for CsvFileSink {
    fn append(&self, pool: &str, record: MetricRecord) -> Result<()> {
        let path = self.file_path(pool);
        let lock = self.lock_for(&path);
        let _guard = lock.lock();

        fs::create_dir_all(&self.log_dir)?;

        let mut records = self.read_records(&path)?;
        records.push(record);
        if records.len() > self.retention {
            let excess = records.len() - self.retention;
            records.drain(..excess);
        }

        self.write_records(&path, &records)?;
        debug!(pool = %pool, path = %path.display(), records = records.len(), "Metric record persisted");
        Ok(())
    }

    fn history(&self, pool: &str) -> Result<Vec<MetricRecord>> {
        let path = self.file_path(pool);
        let lock = self.lock_for(&path);
        let _guard = lock.lock();
        self.read_records(&path)
    }

    fn retention(&self) -> usize {
        self.retention
    }
}

/// Replace every character outside `[A-Za-z0-9_.-]` with `_`
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') { c } else { '_' })
        .collect()
}

/// File stem of a pool's history file.
///
/// Names that are already file-safe are used as is. Any other name gets the
/// sanitized form plus `~` and a digest of the raw name; `~` never survives
/// sanitizing, so the two forms cannot collide.
pub fn pool_file_stem(name: &str) -> String {
    let sanitized = sanitize_file_name(name);
    if sanitized == name {
        return sanitized;
    }
    let digest = Sha256::digest(name.as_bytes());
    format!("{}~{}", sanitized, hex::encode(&digest[..8]))
}
