//! Batch driver: every recognized video in a source directory, one at a time.
//!
//! Jobs run strictly sequentially. The engine and encoder are heavy on
//! accelerator memory and are not meant to run concurrently in one process.

use super::{JobOutcome, StageExecutor};
use crate::models::{BlendrunError, JobId, Result, RunSummary};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Recognized video container extensions, matched case-insensitively.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "webm"];

/// Runs the stage executor over a directory of inputs.
pub struct BatchDriver<'a> {
    executor: StageExecutor<'a>,
    show_progress: bool,
}

impl<'a> BatchDriver<'a> {
    pub fn new(executor: StageExecutor<'a>) -> Self {
        Self {
            executor,
            show_progress: true,
        }
    }

    /// Disable the progress bar (tests, non-interactive runs).
    pub fn without_progress(mut self) -> Self {
        self.show_progress = false;
        self
    }

    /// Recognized video files directly inside `source_dir`, sorted by name.
    ///
    /// A missing source directory is reported as `NotFound`.
    pub fn discover(source_dir: &Path) -> Result<Vec<PathBuf>> {
        if !source_dir.is_dir() {
            return Err(BlendrunError::NotFound(source_dir.to_path_buf()));
        }

        let entries =
            fs::read_dir(source_dir).map_err(|e| BlendrunError::io("reading source dir", e))?;

        let mut videos = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| BlendrunError::io("reading source dir", e))?;
            let path = entry.path();
            if path.is_file() && is_video(&path) {
                videos.push(path);
            }
        }
        videos.sort();

        for stem in shared_stems(&videos) {
            warn!(
                stem = %stem,
                "Several inputs share this name; later jobs overwrite earlier output"
            );
        }
        Ok(videos)
    }

    /// Process a single video directly into `output_dir`.
    ///
    /// A missing input is reported as `NotFound` and leaves no checkpoint.
    pub fn run_single(&self, video: &Path, output_dir: &Path) -> Result<RunSummary> {
        if !video.is_file() {
            return Err(BlendrunError::NotFound(video.to_path_buf()));
        }

        let name = file_name(video);
        info!(video = %name, output = %output_dir.display(), "Processing single video");

        let outcome = self.executor.execute(video, output_dir);
        if let JobOutcome::Failed { stage_reached, .. } = &outcome {
            warn!(video = %name, stage = %stage_reached, "Video failed");
        }

        let mut summary = RunSummary::default();
        summary.push(JobId::from_path(video), name, outcome.is_success());
        Ok(summary)
    }

    /// Process every video in `source_dir` into `<output_root>/<stem>`.
    ///
    /// A missing or empty source directory is zero work, not an error.
    /// Individual job failures are recorded in the summary and never stop
    /// the batch.
    pub fn run(&self, source_dir: &Path, output_root: &Path) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        let videos = match Self::discover(source_dir) {
            Ok(videos) => videos,
            Err(BlendrunError::NotFound(path)) => {
                warn!(source = %path.display(), "Source directory not found, nothing to do");
                return Ok(summary);
            }
            Err(e) => return Err(e),
        };

        if videos.is_empty() {
            info!(source = %source_dir.display(), "No videos found");
            return Ok(summary);
        }

        fs::create_dir_all(output_root).map_err(|e| BlendrunError::io("creating output root", e))?;

        info!(
            source = %source_dir.display(),
            output = %output_root.display(),
            videos = videos.len(),
            "Starting batch"
        );

        let pb = if self.show_progress {
            let pb = ProgressBar::new(videos.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("##-"),
            );
            pb
        } else {
            ProgressBar::hidden()
        };

        let total = videos.len();
        for (i, video) in videos.iter().enumerate() {
            let name = file_name(video);
            let stem = output_stem(video);

            pb.set_message(name.clone());
            info!("[{}/{}] {}", i + 1, total, name);

            let outcome = self.executor.execute(video, &output_root.join(&stem));
            if let JobOutcome::Failed { stage_reached, .. } = &outcome {
                warn!(video = %name, stage = %stage_reached, "Video failed, continuing");
            }
            summary.push(JobId::from_path(video), name, outcome.is_success());
            pb.inc(1);
        }

        pb.finish_with_message(format!(
            "Done! {} succeeded, {} failed",
            summary.succeeded(),
            summary.failed()
        ));

        info!(
            succeeded = summary.succeeded(),
            failed = summary.failed(),
            "Batch complete"
        );

        Ok(summary)
    }
}

fn is_video(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            VIDEO_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
}

/// Per-job output directory name: the file stem.
fn output_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name(path))
}

/// Stems claimed by more than one input, in input order.
fn shared_stems(videos: &[PathBuf]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut shared = Vec::new();
    for video in videos {
        let stem = output_stem(video);
        if !seen.insert(stem.clone()) && !shared.contains(&stem) {
            shared.push(stem);
        }
    }
    shared
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Preset, Stage};
    use crate::pipeline::executor::tests::{Call, Fixture};

    fn touch(dir: &Path, names: &[&str]) {
        fs::create_dir_all(dir).unwrap();
        for name in names {
            fs::write(dir.join(name), b"").unwrap();
        }
    }

    #[test]
    fn test_is_video() {
        assert!(is_video(Path::new("a.mp4")));
        assert!(is_video(Path::new("a.MKV")));
        assert!(is_video(Path::new("dir/a.WebM")));
        assert!(!is_video(Path::new("a.txt")));
        assert!(!is_video(Path::new("mp4")));
        assert!(!is_video(Path::new("a.mp4.part")));
    }

    #[test]
    fn test_shared_stems() {
        let videos: Vec<PathBuf> = ["clip.mkv", "clip.mp4", "clip.webm", "other.mp4", "x.avi", "x.mov"]
            .iter()
            .map(|n| PathBuf::from("/src").join(n))
            .collect();
        assert_eq!(shared_stems(&videos), vec!["clip", "x"]);
        assert!(shared_stems(&videos[2..4]).is_empty());
    }

    #[test]
    fn test_single_video_runs_into_output_dir() {
        let fx = Fixture::new();
        let source = fx.temp.path().join("sources");
        touch(&source, &["clip.mp4"]);
        let out = fx.temp.path().join("results").join("clip_fast");
        let driver = BatchDriver::new(fx.executor(Preset::Fast.settings())).without_progress();

        let summary = driver.run_single(&source.join("clip.mp4"), &out).unwrap();
        assert_eq!(summary.total(), 1);
        assert!(summary.all_succeeded());
        assert!(out.join("video.mp4").exists());

        let record = fx.store.load(&JobId::from_file_name("clip.mp4")).unwrap();
        assert_eq!(record.stage, Stage::Completed);
        assert_eq!(record.output_dir, out);

        // Second run is a skip through the same checkpoint
        let calls = fx.harness.call_count();
        assert!(driver.run_single(&source.join("clip.mp4"), &out).unwrap().all_succeeded());
        assert_eq!(fx.harness.call_count(), calls);
    }

    #[test]
    fn test_single_missing_video_is_not_found() {
        let fx = Fixture::new();
        let driver = BatchDriver::new(fx.executor(Preset::Fast.settings())).without_progress();
        let missing = fx.input("gone.mp4");

        let err = driver.run_single(&missing, &fx.output("gone")).unwrap_err();
        assert!(matches!(err, BlendrunError::NotFound(ref p) if *p == missing));
        assert_eq!(fx.harness.call_count(), 0);
        assert!(fx.store.list_ids().unwrap().is_empty());
    }

    #[test]
    fn test_single_failure_is_reported_in_summary() {
        let fx = Fixture::new();
        let source = fx.temp.path().join("sources");
        touch(&source, &["big.mp4"]);
        fx.harness.oom_blend.borrow_mut().insert("big.mp4".to_string());
        let driver = BatchDriver::new(fx.executor(Preset::Fast.settings())).without_progress();

        let summary = driver.run_single(&source.join("big.mp4"), &fx.output("big")).unwrap();
        assert!(!summary.all_succeeded());
        assert_eq!(summary.failed_inputs(), vec!["big.mp4"]);
    }

    #[test]
    fn test_processes_only_videos() {
        let fx = Fixture::new();
        let source = fx.temp.path().join("sources");
        touch(&source, &["b.MOV", "a.mp4", "c.webm", "notes.txt", "thumb.jpg", "d.avi.bak"]);
        fs::create_dir_all(source.join("nested.mp4")).unwrap();

        let driver = BatchDriver::new(fx.executor(Preset::Fast.settings())).without_progress();
        let summary = driver.run(&source, &fx.temp.path().join("results")).unwrap();

        let inputs: Vec<&str> = summary.results.iter().map(|r| r.input.as_str()).collect();
        assert_eq!(inputs, vec!["a.mp4", "b.MOV", "c.webm"]);
        assert!(summary.all_succeeded());
        assert_eq!(summary.results[1].job_id.as_str(), "b_MOV");
        assert!(fx.output("b").join("video.mp4").exists());
    }

    #[test]
    fn test_missing_or_empty_source_is_zero_work() {
        let fx = Fixture::new();
        let driver = BatchDriver::new(fx.executor(Preset::Fast.settings())).without_progress();

        let summary = driver
            .run(&fx.temp.path().join("nope"), &fx.temp.path().join("results"))
            .unwrap();
        assert_eq!(summary.total(), 0);
        assert!(summary.all_succeeded());

        let empty = fx.temp.path().join("empty");
        touch(&empty, &["readme.md"]);
        let summary = driver.run(&empty, &fx.temp.path().join("results")).unwrap();
        assert_eq!(summary.total(), 0);
        assert_eq!(fx.harness.call_count(), 0);
    }

    #[test]
    fn test_second_run_skips_completed() {
        let fx = Fixture::new();
        let source = fx.temp.path().join("sources");
        touch(&source, &["clip.mp4"]);
        let results = fx.temp.path().join("results");
        let driver = BatchDriver::new(fx.executor(Preset::Fast.settings())).without_progress();

        let first = driver.run(&source, &results).unwrap();
        assert!(first.all_succeeded());

        let record = fx.store.load(&JobId::from_file_name("clip.mp4")).unwrap();
        assert_eq!(record.stage, Stage::Completed);
        assert_eq!(record.num_frames, Some(10));
        assert_eq!(record.resolution.unwrap().to_string(), "1280x720");
        assert_eq!(record.fps, Some(30.0));
        assert!(record.output_video.unwrap().starts_with(&results));

        let calls_after_first = fx.harness.call_count();
        let second = driver.run(&source, &results).unwrap();
        assert_eq!(fx.harness.call_count(), calls_after_first);
        assert_eq!(second.total(), 1);
        assert!(second.results[0].success);
    }

    #[test]
    fn test_memory_failure_does_not_stop_batch() {
        let fx = Fixture::new();
        let source = fx.temp.path().join("sources");
        touch(&source, &["a.mp4", "b.mp4", "c.mp4"]);
        fx.harness.oom_blend.borrow_mut().insert("b.mp4".to_string());

        let driver = BatchDriver::new(fx.executor(Preset::Fast.settings())).without_progress();
        let summary = driver.run(&source, &fx.temp.path().join("results")).unwrap();

        assert_eq!(summary.succeeded(), 2);
        assert_eq!(summary.failed_inputs(), vec!["b.mp4"]);
        assert!(summary.report().contains("  - b.mp4"));

        let record = fx.store.load(&JobId::from_file_name("b.mp4")).unwrap();
        assert_eq!(record.stage, Stage::ErrorMemory);
        let record = fx.store.load(&JobId::from_file_name("c.mp4")).unwrap();
        assert_eq!(record.stage, Stage::Completed);

        // Only the failed job is redone on the next run
        fx.harness.oom_blend.borrow_mut().clear();
        fx.harness.calls.borrow_mut().clear();
        let retry = driver.run(&source, &fx.temp.path().join("results")).unwrap();
        assert!(retry.all_succeeded());
        let blends = fx
            .harness
            .calls
            .borrow()
            .iter()
            .filter(|c| matches!(c, Call::Blend(..)))
            .count();
        assert_eq!(blends, 1);
    }
}
