use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use crate::worker::{SessionFailure, SessionOutcome, SessionReport};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Completed,
    TimedOutWithData,
    TimedOutNoData,
    Failed,
}

impl From<SessionOutcome> for TransferStatus {
    fn from(outcome: SessionOutcome) -> Self {
        match outcome {
            SessionOutcome::Completed => TransferStatus::Completed,
            SessionOutcome::TimedOutWithData => TransferStatus::TimedOutWithData,
            SessionOutcome::TimedOutNoData => TransferStatus::TimedOutNoData,
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct TransferLogEntry {
    pub timestamp: DateTime<Utc>,
    pub session_id: Uuid,
    pub peer: String,
    pub artifact: PathBuf,
    pub status: TransferStatus,
    pub bytes_received: u64,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

impl TransferLogEntry {
    pub fn from_report(report: &SessionReport) -> Self {
        Self {
            timestamp: Utc::now(),
            session_id: report.session_id,
            peer: report.peer.to_string(),
            artifact: report.artifact.clone(),
            status: report.outcome.into(),
            bytes_received: report.bytes_received,
            elapsed_ms: report.elapsed.as_millis() as u64,
            error: None,
        }
    }

    /// A session that never produced a report. `open` failures pass zero
    /// counters; receive failures pass what the worker had reached.
    pub fn failed(
        session_id: Uuid,
        peer: String,
        artifact: PathBuf,
        bytes_received: u64,
        elapsed: Duration,
        error: String,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            session_id,
            peer,
            artifact,
            status: TransferStatus::Failed,
            bytes_received,
            elapsed_ms: elapsed.as_millis() as u64,
            error: Some(error),
        }
    }

    pub fn from_failure(
        session_id: Uuid,
        peer: String,
        artifact: PathBuf,
        failure: &SessionFailure,
    ) -> Self {
        Self::failed(
            session_id,
            peer,
            artifact,
            failure.bytes_received,
            failure.elapsed,
            format!("{:#}", failure.error),
        )
    }
}

/// Append-only JSONL journal, one line per finished session.
pub struct TransferLog {
    log_file_path: PathBuf,
    write_lock: Mutex<()>,
}

impl TransferLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        TransferLog {
            log_file_path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.log_file_path
    }

    pub fn add_entry(&self, entry: &TransferLogEntry) -> Result<()> {
        let _guard = self.write_lock.lock().map_err(|_| anyhow::anyhow!("journal lock poisoned"))?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file_path)
            .context("Failed to open transfer log file")?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, entry)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    pub fn read_log(&self) -> Result<Vec<TransferLogEntry>> {
        if !self.log_file_path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.log_file_path)
            .context("Failed to open transfer log file for reading")?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: TransferLogEntry = serde_json::from_str(&line)?;
            entries.push(entry);
        }
        Ok(entries)
    }
}
