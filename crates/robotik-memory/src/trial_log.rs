//! Local trial log: an append-only JSON-lines file plus an optional bounded
//! ring of evidence images.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{SecondsFormat, Utc};
use robotik_types::TrialRecord;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("trial log I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode trial record: {0}")]
    Encode(#[from] serde_json::Error),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> LoggerError + '_ {
    move |source| LoggerError::Io {
        path: path.display().to_string(),
        source,
    }
}

pub struct TrialLogger {
    log_path: PathBuf,
    image_dir: Option<PathBuf>,
    image_max: usize,
}

impl TrialLogger {
    pub fn new(log_path: impl Into<PathBuf>, image_dir: Option<PathBuf>, image_max: usize) -> Self {
        Self {
            log_path: log_path.into(),
            image_dir,
            image_max,
        }
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Append one trial, stamping it with the current time if it has none.
    pub fn log_trial(&self, record: &TrialRecord) -> Result<(), LoggerError> {
        self.append(serde_json::to_value(record)?)
    }

    /// Append an arbitrary JSON object as one line. A missing or null
    /// `timestamp` is filled with the current UTC time.
    pub fn append(&self, mut value: Value) -> Result<(), LoggerError> {
        if let Value::Object(map) = &mut value {
            let missing = map.get("timestamp").is_none_or(Value::is_null);
            if missing {
                map.insert(
                    "timestamp".to_string(),
                    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
                );
            }
        }
        if let Some(parent) = self.log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        let mut line = serde_json::to_string(&value)?;
        line.push('\n');
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .and_then(|mut f| f.write_all(line.as_bytes()))
            .map_err(io_err(&self.log_path))
    }

    /// Store an evidence image as `{unix_ms}_{tag}` in the ring directory and
    /// prune the oldest files so at most `image_max` remain.
    ///
    /// Returns `None` when the ring is disabled (no directory or max 0).
    pub fn log_image(&self, tag: &str, bytes: &[u8]) -> Result<Option<PathBuf>, LoggerError> {
        let Some(dir) = self.image_dir.as_deref().filter(|_| self.image_max > 0) else {
            return Ok(None);
        };
        fs::create_dir_all(dir).map_err(io_err(dir))?;
        let path = dir.join(format!("{}_{}", Utc::now().timestamp_millis(), tag));
        fs::write(&path, bytes).map_err(io_err(&path))?;
        debug!(path = %path.display(), "evidence image stored");
        self.prune(dir)?;
        Ok(Some(path))
    }

    fn prune(&self, dir: &Path) -> Result<(), LoggerError> {
        let mut files: Vec<(SystemTime, PathBuf)> = fs::read_dir(dir)
            .map_err(io_err(dir))?
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let meta = entry.metadata().ok().filter(|m| m.is_file())?;
                Some((meta.modified().unwrap_or(SystemTime::UNIX_EPOCH), entry.path()))
            })
            .collect();
        if files.len() <= self.image_max {
            return Ok(());
        }
        files.sort();
        let excess = files.len() - self.image_max;
        for (_, path) in files.into_iter().take(excess) {
            if let Err(e) = fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "failed to prune evidence image");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use robotik_types::{Context, TerminalFailure, Theta};
    use serde_json::Map;

    fn record() -> TrialRecord {
        TrialRecord {
            trial_id: "trial-1".into(),
            theta_id: "theta-1".into(),
            context: Context::default(),
            theta: Theta::default(),
            outcome: false,
            metrics: Map::new(),
            failure_code: Some(TerminalFailure::Timeout.into()),
            timestamp: None,
        }
    }

    #[test]
    fn appends_lines_with_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let logger = TrialLogger::new(dir.path().join("logs/trials.jsonl"), None, 0);
        logger.log_trial(&record()).unwrap();
        logger.append(serde_json::json!({"timestamp": "keep", "note": 1})).unwrap();

        let raw = fs::read_to_string(logger.log_path()).unwrap();
        let lines: Vec<Value> = raw.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["failure_code"], "TIMEOUT");
        assert!(lines[0]["timestamp"].is_string());
        assert_eq!(lines[1]["timestamp"], "keep");
        let back: TrialRecord = serde_json::from_value(lines[0].clone()).unwrap();
        assert!(back.timestamp.is_some());
    }

    #[test]
    fn image_ring_never_exceeds_max() {
        let dir = tempfile::tempdir().unwrap();
        let ring = dir.path().join("images");
        let logger = TrialLogger::new(dir.path().join("trials.jsonl"), Some(ring.clone()), 3);
        for i in 0..7 {
            let path = logger.log_image(&format!("shot{i}.pgm"), b"P5").unwrap().unwrap();
            assert!(path.exists());
            assert!(fs::read_dir(&ring).unwrap().count() <= 3);
        }
        let names: Vec<String> = fs::read_dir(&ring)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().any(|n| n.ends_with("shot6.pgm")));
    }

    #[test]
    fn ring_disabled_without_dir_or_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let no_dir = TrialLogger::new(dir.path().join("t.jsonl"), None, 10);
        assert!(no_dir.log_image("x.pgm", b"").unwrap().is_none());
        let zero = TrialLogger::new(dir.path().join("t.jsonl"), Some(dir.path().join("img")), 0);
        assert!(zero.log_image("x.pgm", b"").unwrap().is_none());
        assert!(!dir.path().join("img").exists());
    }
}
