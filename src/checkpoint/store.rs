//! Per-job checkpoint persistence.
//!
//! - One JSON file per job: `<job_id>.checkpoint.json`
//! - Writes go to a temp file first and are renamed into place
//! - A missing or unreadable checkpoint loads as `None` (fail open)

use crate::models::{BlendrunError, JobId, JobRecord, Result};
use chrono::Utc;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Suffix identifying checkpoint files inside the checkpoint directory.
pub const CHECKPOINT_SUFFIX: &str = ".checkpoint.json";

const TEMP_SUFFIX: &str = ".checkpoint.tmp";

/// A checkpoint file and what could be read from it.
#[derive(Debug)]
pub struct CheckpointEntry {
    pub path: PathBuf,
    pub record: Result<JobRecord>,
}

/// Durable key-value store of job records, one file per job.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    /// Directory for checkpoint files
    dir: PathBuf,
}

impl CheckpointStore {
    /// Create a store rooted at `dir`. The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Get checkpoint directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the checkpoint file for a job.
    pub fn path_for(&self, job_id: &JobId) -> PathBuf {
        self.dir.join(format!("{job_id}{CHECKPOINT_SUFFIX}"))
    }

    /// Load the record for a job, if one exists and can be read.
    pub fn load(&self, job_id: &JobId) -> Option<JobRecord> {
        let path = self.path_for(job_id);
        if !path.exists() {
            return None;
        }

        match read_record(&path) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(
                    job_id = %job_id,
                    path = %path.display(),
                    error = %e,
                    "Unreadable checkpoint, starting fresh"
                );
                None
            }
        }
    }

    /// Persist a record, replacing any previous one for the same job.
    ///
    /// Stamps `last_updated` on the caller's record.
    pub fn save(&self, record: &mut JobRecord) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| BlendrunError::io("creating checkpoint dir", e))?;

        record.last_updated = Some(Utc::now());
        let job_id = record.job_id();

        let temp_path = self.dir.join(format!("{job_id}{TEMP_SUFFIX}"));
        {
            let file = File::create(&temp_path)
                .map_err(|e| BlendrunError::io("creating temp checkpoint", e))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, record)
                .map_err(|e| BlendrunError::Internal(format!("Serializing checkpoint: {e}")))?;
            writer
                .flush()
                .map_err(|e| BlendrunError::io("flushing temp checkpoint", e))?;
        }

        fs::rename(&temp_path, self.path_for(&job_id))
            .map_err(|e| BlendrunError::io("renaming checkpoint", e))?;

        debug!(job_id = %job_id, stage = %record.stage, "Checkpoint saved");
        Ok(())
    }

    /// Remove the record for a job. Missing records are not an error.
    pub fn delete(&self, job_id: &JobId) -> Result<()> {
        let path = self.path_for(job_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BlendrunError::io("removing checkpoint", e)),
        }
    }

    /// Ids of all persisted records, sorted.
    pub fn list_ids(&self) -> Result<Vec<JobId>> {
        let mut ids: Vec<JobId> = self
            .checkpoint_files()?
            .iter()
            .filter_map(|path| job_id_from_path(path))
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Every checkpoint file with its parsed record or read error.
    pub fn entries(&self) -> Result<Vec<CheckpointEntry>> {
        Ok(self
            .checkpoint_files()?
            .into_iter()
            .map(|path| {
                let record = read_record(&path);
                CheckpointEntry { path, record }
            })
            .collect())
    }

    /// Remove every persisted record (and stray temp files).
    ///
    /// Returns the number of records removed.
    pub fn clear(&self) -> Result<usize> {
        let records = self.checkpoint_files()?;
        let temps = self.glob(&format!("*{TEMP_SUFFIX}"))?;
        let count = records.len();

        for path in records.iter().chain(&temps) {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(BlendrunError::io("removing checkpoint", e)),
            }
        }

        debug!(count, dir = %self.dir.display(), "Checkpoints cleared");
        Ok(count)
    }

    fn checkpoint_files(&self) -> Result<Vec<PathBuf>> {
        self.glob(&format!("*{CHECKPOINT_SUFFIX}"))
    }

    fn glob(&self, pattern: &str) -> Result<Vec<PathBuf>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }

        let escaped = glob::Pattern::escape(&self.dir.to_string_lossy());
        let full = format!("{escaped}/{pattern}");

        let mut files: Vec<PathBuf> = glob::glob(&full)
            .map_err(|e| BlendrunError::Internal(format!("Invalid glob pattern: {e}")))?
            .filter_map(|r| r.ok())
            .filter(|p| p.is_file())
            .collect();
        files.sort();
        Ok(files)
    }
}

fn read_record(path: &Path) -> Result<JobRecord> {
    let file = File::open(path).map_err(|e| BlendrunError::io("opening checkpoint", e))?;
    let reader = BufReader::new(file);
    serde_json::from_reader(reader)
        .map_err(|e| BlendrunError::ParseError(format!("Invalid checkpoint: {e}")))
}

fn job_id_from_path(path: &Path) -> Option<JobId> {
    let name = path.file_name()?.to_str()?;
    let id = name.strip_suffix(CHECKPOINT_SUFFIX)?;
    Some(JobId::from_sanitized(id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Preset, Stage};
    use tempfile::TempDir;

    fn record(name: &str) -> JobRecord {
        JobRecord::new(
            &PathBuf::from("/src").join(name),
            Path::new("/out"),
            Preset::Fast.settings(),
        )
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp_dir.path().join("checkpoints"));

        let mut rec = record("clip.mp4");
        rec.stage = Stage::Loading;
        rec.num_frames = Some(10);
        store.save(&mut rec).unwrap();
        assert!(rec.last_updated.is_some());

        let id = JobId::from_file_name("clip.mp4");
        assert!(store.path_for(&id).ends_with("clip_mp4.checkpoint.json"));

        let loaded = store.load(&id).unwrap();
        assert_eq!(loaded, rec);
    }

    #[test]
    fn test_save_overwrites_and_restamps() {
        let temp_dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp_dir.path());

        let mut rec = record("clip.mp4");
        store.save(&mut rec).unwrap();
        let first = rec.last_updated.unwrap();

        rec.stage = Stage::Completed;
        store.save(&mut rec).unwrap();
        assert!(rec.last_updated.unwrap() >= first);

        let loaded = store.load(&rec.job_id()).unwrap();
        assert_eq!(loaded.stage, Stage::Completed);
        assert_eq!(store.list_ids().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_and_corrupt_load_as_none() {
        let temp_dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp_dir.path());
        let id = JobId::from_file_name("clip.mp4");

        assert!(store.load(&id).is_none());

        fs::write(store.path_for(&id), "{ not json").unwrap();
        assert!(store.load(&id).is_none());
    }

    #[test]
    fn test_list_delete_and_clear() {
        let temp_dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp_dir.path().join("cp"));

        assert!(store.list_ids().unwrap().is_empty());
        assert_eq!(store.clear().unwrap(), 0);

        for name in ["b.mp4", "a.mkv", "c d.mov"] {
            store.save(&mut record(name)).unwrap();
        }
        fs::write(store.dir().join("notes.txt"), "unrelated").unwrap();

        let ids: Vec<String> = store
            .list_ids()
            .unwrap()
            .iter()
            .map(|id| id.to_string())
            .collect();
        assert_eq!(ids, vec!["a_mkv", "b_mp4", "c_d_mov"]);

        store.delete(&JobId::from_file_name("b.mp4")).unwrap();
        store.delete(&JobId::from_file_name("never.mp4")).unwrap();
        assert_eq!(store.list_ids().unwrap().len(), 2);

        assert_eq!(store.clear().unwrap(), 2);
        assert!(store.list_ids().unwrap().is_empty());
        assert!(store.dir().join("notes.txt").exists());
    }

    #[test]
    fn test_entries_report_unreadable() {
        let temp_dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp_dir.path());

        store.save(&mut record("good.mp4")).unwrap();
        fs::write(temp_dir.path().join("bad_mp4.checkpoint.json"), "garbage").unwrap();

        let entries = store.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].record.is_err());
        assert!(entries[0].path.ends_with("bad_mp4.checkpoint.json"));
        assert!(entries[1].record.is_ok());
    }
}
