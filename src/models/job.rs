//! Job lifecycle types.
//!
//! A job is one input video taken through the staged pipeline. Its state is
//! captured in a [`JobRecord`], which is what gets checkpointed to disk.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Blending quality/cost tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Fast,
    Balanced,
    Accurate,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fast => "Fast",
            Self::Balanced => "Balanced",
            Self::Accurate => "Accurate",
        };
        f.write_str(name)
    }
}

/// How the engine seeds its patch-match field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Initialize {
    #[default]
    Identity,
    Random,
}

impl fmt::Display for Initialize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identity => f.write_str("identity"),
            Self::Random => f.write_str("random"),
        }
    }
}

/// Blending parameters captured into a job when it is first created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub mode: Mode,
    /// Smoothing window, in frames
    pub window_size: u32,
    /// Frames per engine batch; lower this on memory errors
    pub batch_size: u32,
    /// Only read in Accurate mode
    #[serde(default)]
    pub tracking_window_size: u32,
    pub minimum_patch_size: u32,
    pub num_iter: u32,
    pub guide_weight: f64,
    #[serde(default)]
    pub initialize: Initialize,
}

/// Pipeline stage of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Record created, nothing done yet
    Starting,
    /// Output directories being prepared
    Setup,
    /// Input being probed
    Loading,
    /// Blending engine running
    Processing,
    /// Output video being written
    Encoding,
    /// Output video written; future runs skip this job
    Completed,
    /// Failed for any reason other than memory
    Error,
    /// Failed because memory ran out
    ErrorMemory,
}

impl Stage {
    /// Whether the job ended in one of the failure terminals.
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Error | Self::ErrorMemory)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Setup => "setup",
            Self::Loading => "loading",
            Self::Processing => "processing",
            Self::Encoding => "encoding",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::ErrorMemory => "error_memory",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Frame dimensions, persisted as `"WxH"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once('x')
            .ok_or_else(|| format!("invalid resolution '{s}', expected WxH"))?;
        let width = w
            .trim()
            .parse()
            .map_err(|_| format!("invalid width in resolution '{s}'"))?;
        let height = h
            .trim()
            .parse()
            .map_err(|_| format!("invalid height in resolution '{s}'"))?;
        Ok(Self { width, height })
    }
}

impl TryFrom<String> for Resolution {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Resolution> for String {
    fn from(r: Resolution) -> Self {
        r.to_string()
    }
}

/// Filesystem-safe job identifier derived from an input file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(String);

impl JobId {
    /// Sanitize a file's base name into a job id.
    ///
    /// Dots, whitespace and path-hostile characters become `_`. The mapping
    /// is pure, so the same name always resumes the same checkpoint.
    pub fn from_file_name(name: &str) -> Self {
        let id = name
            .chars()
            .map(|c| match c {
                '.' | '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
                c if c.is_whitespace() => '_',
                c => c,
            })
            .collect();
        Self(id)
    }

    /// Job id for an input path, from its base name.
    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_else(|| path.to_string_lossy());
        Self::from_file_name(&name)
    }

    /// Wrap an already-sanitized id, e.g. one recovered from a file name.
    pub(crate) fn from_sanitized(id: String) -> Self {
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Checkpointed state of one job.
///
/// Every optional field may be missing from an older or partially written
/// checkpoint; missing fields read back as `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Base name of the input file, unsanitized
    pub video_name: String,
    pub video_path: PathBuf,
    pub output_dir: PathBuf,
    pub stage: Stage,
    /// Parameters the job was created with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Settings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_frames: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_video: Option<PathBuf>,
    /// Last failure message, kept until overwritten
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set by the checkpoint store on every save
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Create a fresh record in the `starting` stage.
    pub fn new(video_path: &Path, output_dir: &Path, settings: Settings) -> Self {
        let video_name = video_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| video_path.to_string_lossy().into_owned());

        Self {
            video_name,
            video_path: video_path.to_path_buf(),
            output_dir: output_dir.to_path_buf(),
            stage: Stage::Starting,
            settings: Some(settings),
            num_frames: None,
            resolution: None,
            fps: None,
            output_video: None,
            error: None,
            last_updated: None,
        }
    }

    pub fn job_id(&self) -> JobId {
        JobId::from_file_name(&self.video_name)
    }
}

/// Outcome of one job within a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    pub job_id: JobId,
    /// Input file name as found in the source directory
    pub input: String,
    pub success: bool,
}

/// Per-job results of one batch run, in processing order.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub results: Vec<JobResult>,
}

impl RunSummary {
    pub fn push(&mut self, job_id: JobId, input: String, success: bool) {
        self.results.push(JobResult {
            job_id,
            input,
            success,
        });
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.succeeded()
    }

    /// Names of the inputs that failed, in processing order.
    pub fn failed_inputs(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| !r.success)
            .map(|r| r.input.as_str())
            .collect()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }

    /// Human-readable end-of-run report.
    pub fn report(&self) -> String {
        let mut out = String::new();
        out.push_str("\n=== Processing Complete ===\n");
        out.push_str(&format!("Jobs:        {}\n", self.total()));
        out.push_str(&format!("Successful:  {}\n", self.succeeded()));
        out.push_str(&format!("Failed:      {}\n", self.failed()));

        let failed = self.failed_inputs();
        if !failed.is_empty() {
            out.push_str("\nFailed videos:\n");
            for name in failed {
                out.push_str(&format!("  - {name}\n"));
            }
            out.push_str("\nRe-run the batch to retry failed videos; completed ones are skipped.\n");
        }
        out
    }
}
