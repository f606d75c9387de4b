//! Read-only reporting over persisted checkpoints, plus reset.

use super::CheckpointStore;
use crate::models::{JobId, Result, Stage};
use chrono::{DateTime, Utc};
use std::fmt::Write;
use std::path::PathBuf;
use tracing::info;

/// One line of the status report.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckpointStatus {
    Readable {
        job_id: JobId,
        video_name: String,
        stage: Stage,
        last_updated: Option<DateTime<Utc>>,
        error: Option<String>,
    },
    /// File exists but could not be read or parsed
    Unreadable { path: PathBuf, reason: String },
}

/// Status listing and reset over a checkpoint store.
pub struct CheckpointInspector<'a> {
    store: &'a CheckpointStore,
}

impl<'a> CheckpointInspector<'a> {
    pub fn new(store: &'a CheckpointStore) -> Self {
        Self { store }
    }

    /// Status of every persisted checkpoint, unreadable ones included.
    pub fn status(&self) -> Result<Vec<CheckpointStatus>> {
        let entries = self.store.entries()?;
        Ok(entries
            .into_iter()
            .map(|entry| match entry.record {
                Ok(record) => CheckpointStatus::Readable {
                    job_id: record.job_id(),
                    video_name: record.video_name,
                    stage: record.stage,
                    last_updated: record.last_updated,
                    error: record.error,
                },
                Err(e) => CheckpointStatus::Unreadable {
                    path: entry.path,
                    reason: e.to_string(),
                },
            })
            .collect())
    }

    /// Human-readable status report.
    pub fn render_status(&self) -> Result<String> {
        let statuses = self.status()?;
        if statuses.is_empty() {
            return Ok("No checkpoints found.\n".to_string());
        }

        let mut out = String::new();
        let _ = writeln!(out, "\n=== Checkpoint Status ===");
        for status in &statuses {
            match status {
                CheckpointStatus::Readable {
                    job_id,
                    video_name,
                    stage,
                    last_updated,
                    error,
                } => {
                    let updated = last_updated
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "unknown".to_string());
                    let _ = writeln!(out, "\n{video_name} ({job_id}):");
                    let _ = writeln!(out, "  Stage:   {stage}");
                    let _ = writeln!(out, "  Updated: {updated}");
                    if let Some(error) = error {
                        let _ = writeln!(out, "  Error:   {error}");
                    }
                }
                CheckpointStatus::Unreadable { path, reason } => {
                    let name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| path.display().to_string());
                    let _ = writeln!(out, "\n{name}: Unable to read ({reason})");
                }
            }
        }
        Ok(out)
    }

    /// Remove every checkpoint. Returns how many were removed.
    pub fn clear_all(&self) -> Result<usize> {
        let count = self.store.clear()?;
        info!(count, dir = %self.store.dir().display(), "Cleared checkpoints");
        Ok(count)
    }
}
