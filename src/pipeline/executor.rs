//! Per-job stage machine.
//!
//! Stage flow:
//! starting → setup → loading → processing → encoding → completed
//!
//! Any failure ends in `error` or `error_memory`. The checkpoint is written at
//! every transition, and before each long external call, so a crash leaves the
//! last reached stage on disk. A job is only ever resumed at whole-job
//! granularity: unless it is `completed`, the next attempt starts at `setup`.

use crate::checkpoint::CheckpointStore;
use crate::media::{BlendParams, BlendRunners, FrameSequence, FrameSource, VideoEncoder};
use crate::models::{
    BlendrunError, EngineConfig, FailureKind, JobId, JobRecord, Resolution, Result, Settings,
    Stage,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Name of the intermediate frames directory inside a job's output dir.
pub const FRAMES_DIR: &str = "frames";

/// Name of the final video inside a job's output dir.
pub const OUTPUT_VIDEO: &str = "video.mp4";

/// Result of running one job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Pipeline ran to the end in this attempt
    Completed { output_video: PathBuf },
    /// Checkpoint already said `completed`; nothing was run
    Skipped,
    /// Classified failure, already persisted to the checkpoint
    Failed {
        kind: FailureKind,
        stage_reached: Stage,
        message: String,
    },
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }
}

/// Drives a single job through its stages.
pub struct StageExecutor<'a> {
    store: &'a CheckpointStore,
    frame_source: &'a dyn FrameSource,
    blenders: &'a BlendRunners,
    encoder: &'a dyn VideoEncoder,
    /// Used only for jobs whose checkpoint carries no settings
    default_settings: Settings,
    engine: EngineConfig,
}

impl<'a> StageExecutor<'a> {
    pub fn new(
        store: &'a CheckpointStore,
        frame_source: &'a dyn FrameSource,
        blenders: &'a BlendRunners,
        encoder: &'a dyn VideoEncoder,
        default_settings: Settings,
        engine: EngineConfig,
    ) -> Self {
        Self {
            store,
            frame_source,
            blenders,
            encoder,
            default_settings,
            engine,
        }
    }

    /// Run (or skip) the job for `video_path`, writing into `output_dir`.
    ///
    /// Never returns an error: failures are classified, checkpointed and
    /// reported through [`JobOutcome::Failed`].
    pub fn execute(&self, video_path: &Path, output_dir: &Path) -> JobOutcome {
        let job_id = JobId::from_path(video_path);
        let existing = self.store.load(&job_id);

        if let Some(record) = &existing {
            let updated = record
                .last_updated
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "unknown".to_string());
            info!(job_id = %job_id, stage = %record.stage, updated = %updated, "Found checkpoint");

            if record.stage == Stage::Completed {
                info!(job_id = %job_id, "Already processed, skipping");
                return JobOutcome::Skipped;
            }
        }

        let mut record = existing
            .unwrap_or_else(|| JobRecord::new(video_path, output_dir, self.default_settings.clone()));
        // Fresh paths, old parameters
        record.video_path = video_path.to_path_buf();
        record.output_dir = output_dir.to_path_buf();
        let settings = record
            .settings
            .get_or_insert_with(|| self.default_settings.clone())
            .clone();

        info!(
            job_id = %job_id,
            mode = %settings.mode,
            window = settings.window_size,
            iterations = settings.num_iter,
            output = %output_dir.display(),
            "Processing"
        );

        match self.run_stages(&mut record, &settings) {
            Ok(output_video) => {
                info!(job_id = %job_id, output = %output_video.display(), "Job completed");
                JobOutcome::Completed { output_video }
            }
            Err(e) => self.fail(&mut record, e),
        }
    }

    fn run_stages(&self, record: &mut JobRecord, settings: &Settings) -> Result<PathBuf> {
        // Setup
        self.transition(record, Stage::Setup)?;
        settings.validate()?;
        let output_dir = record.output_dir.clone();
        let frames_dir = output_dir.join(FRAMES_DIR);
        fs::create_dir_all(&frames_dir)
            .map_err(|e| BlendrunError::io("creating output directories", e))?;

        // Loading
        self.transition(record, Stage::Loading)?;
        let video_path = record.video_path.clone();
        let guide = self.open_sequence(&video_path)?;
        let style = self.open_sequence(&video_path)?;
        let fps = self.frame_source.fps(&video_path)?;

        info!(
            frames = guide.info.frame_count,
            resolution = %format!("{}x{}", guide.info.width, guide.info.height),
            fps,
            "Video loaded"
        );
        record.num_frames = Some(guide.info.frame_count);
        record.resolution = Some(Resolution {
            width: guide.info.width,
            height: guide.info.height,
        });
        record.fps = Some(fps);
        self.store.save(record)?;

        // Processing
        self.transition(record, Stage::Processing)?;
        let params = BlendParams::new(settings, &self.engine);
        self.blenders.for_mode(settings.mode).run(
            &guide,
            &style,
            settings.batch_size,
            settings.window_size,
            &params,
            &frames_dir,
        )?;

        // Encoding
        self.transition(record, Stage::Encoding)?;
        let output_video = output_dir.join(OUTPUT_VIDEO);
        self.encoder
            .encode(&frames_dir, &output_video, guide.info.frame_count, fps)?;

        // Completed
        record.stage = Stage::Completed;
        record.output_video = Some(output_video.clone());
        record.error = None;
        self.store.save(record)?;

        Ok(output_video)
    }

    fn open_sequence(&self, path: &Path) -> Result<FrameSequence> {
        let info = self.frame_source.open(path)?;
        if info.frame_count == 0 {
            return Err(BlendrunError::NoFrames(path.to_path_buf()));
        }
        Ok(FrameSequence {
            path: path.to_path_buf(),
            info,
        })
    }

    fn transition(&self, record: &mut JobRecord, stage: Stage) -> Result<()> {
        record.stage = stage;
        self.store.save(record)
    }

    /// Classify a failure, persist it and turn it into an outcome.
    fn fail(&self, record: &mut JobRecord, err: BlendrunError) -> JobOutcome {
        let job_id = record.job_id();
        let stage_reached = record.stage;
        let kind = err.failure_kind();
        let message = err.detail();

        record.stage = match kind {
            FailureKind::ResourceExhaustion => Stage::ErrorMemory,
            FailureKind::Generic => Stage::Error,
        };
        record.error = Some(message.clone());

        match kind {
            FailureKind::ResourceExhaustion => {
                error!(job_id = %job_id, stage = %stage_reached, error = %message, "Out of memory");
                warn!(
                    batch_size = record.settings.as_ref().map(|s| s.batch_size),
                    "Try reducing batch_size"
                );
            }
            FailureKind::Generic => {
                error!(job_id = %job_id, stage = %stage_reached, error = %err.chain(), "Job failed");
            }
        }

        if let Err(e) = self.store.save(record) {
            error!(job_id = %job_id, error = %e, "Failed to persist job failure");
        }

        JobOutcome::Failed {
            kind,
            stage_reached,
            message,
        }
    }
}
