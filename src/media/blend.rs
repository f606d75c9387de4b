//! Blending strategies.
//!
//! The engine is opaque and non-resumable: one call processes the whole clip
//! and writes numbered frames into the output directory. The three modes
//! differ only in cost/quality and in whether the tracking window is used.

use super::{FrameSequence, run_streaming, tool_failure};
use crate::models::{BlendrunError, EngineConfig, Initialize, Mode, Result, Settings};
use regex::Regex;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::LazyLock;
use tracing::info;

/// Engine parameters that are not batch/window sizing.
#[derive(Debug, Clone, PartialEq)]
pub struct BlendParams {
    pub minimum_patch_size: u32,
    pub num_iter: u32,
    pub guide_weight: f64,
    pub initialize: Initialize,
    pub tracking_window_size: u32,
    /// Accelerator device index
    pub gpu_id: u32,
    pub threads_per_block: u32,
}

impl BlendParams {
    pub fn new(settings: &Settings, engine: &EngineConfig) -> Self {
        Self {
            minimum_patch_size: settings.minimum_patch_size,
            num_iter: settings.num_iter,
            guide_weight: settings.guide_weight,
            initialize: settings.initialize,
            tracking_window_size: settings.tracking_window_size,
            gpu_id: engine.gpu_id,
            threads_per_block: engine.threads_per_block,
        }
    }
}

/// One quality/cost tier of the smoothing engine.
pub trait BlendStrategy {
    /// Blend `style` guided by `guide`, writing frames into `output_dir`.
    ///
    /// Blocks until the engine finishes; there is no partial progress.
    fn run(
        &self,
        guide: &FrameSequence,
        style: &FrameSequence,
        batch_size: u32,
        window_size: u32,
        params: &BlendParams,
        output_dir: &Path,
    ) -> Result<()>;
}

/// One strategy per mode.
pub struct BlendRunners {
    fast: Box<dyn BlendStrategy>,
    balanced: Box<dyn BlendStrategy>,
    accurate: Box<dyn BlendStrategy>,
}

impl BlendRunners {
    pub fn new(
        fast: Box<dyn BlendStrategy>,
        balanced: Box<dyn BlendStrategy>,
        accurate: Box<dyn BlendStrategy>,
    ) -> Self {
        Self {
            fast,
            balanced,
            accurate,
        }
    }

    /// Runners that invoke the configured engine executable.
    pub fn external(engine: &EngineConfig) -> Self {
        Self::new(
            Box::new(ExternalRunner::new(&engine.program, Mode::Fast)),
            Box::new(ExternalRunner::new(&engine.program, Mode::Balanced)),
            Box::new(ExternalRunner::new(&engine.program, Mode::Accurate)),
        )
    }

    pub fn for_mode(&self, mode: Mode) -> &dyn BlendStrategy {
        match mode {
            Mode::Fast => self.fast.as_ref(),
            Mode::Balanced => self.balanced.as_ref(),
            Mode::Accurate => self.accurate.as_ref(),
        }
    }
}

static MEMORY_EXHAUSTED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(out of memory|memoryerror|outofmemory|cuda_error_out_of_memory|cannot allocate memory|std::bad_alloc)",
    )
    .expect("memory pattern is valid")
});

/// Whether engine stderr reports memory exhaustion.
pub fn reports_memory_exhaustion(stderr: &str) -> bool {
    MEMORY_EXHAUSTED_RE.is_match(stderr)
}

/// Runs the blending engine as a child process.
#[derive(Debug, Clone)]
pub struct ExternalRunner {
    program: PathBuf,
    mode: Mode,
}

impl ExternalRunner {
    pub fn new(program: impl Into<PathBuf>, mode: Mode) -> Self {
        Self {
            program: program.into(),
            mode,
        }
    }

    /// Command-line arguments for one engine invocation.
    pub fn command_args(
        &self,
        guide: &FrameSequence,
        style: &FrameSequence,
        batch_size: u32,
        window_size: u32,
        params: &BlendParams,
        output_dir: &Path,
    ) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        let mut flag = |name: &str, value: OsString| {
            args.push(OsString::from(name));
            args.push(value);
        };

        flag("--mode", self.mode.to_string().into());
        flag("--guide", guide.path.clone().into_os_string());
        flag("--style", style.path.clone().into_os_string());
        flag("--batch-size", batch_size.to_string().into());
        flag("--window-size", window_size.to_string().into());
        flag("--minimum-patch-size", params.minimum_patch_size.to_string().into());
        flag("--num-iter", params.num_iter.to_string().into());
        flag("--guide-weight", params.guide_weight.to_string().into());
        flag("--initialize", params.initialize.to_string().into());
        if self.mode == Mode::Accurate {
            flag(
                "--tracking-window-size",
                params.tracking_window_size.to_string().into(),
            );
        }
        flag("--gpu-id", params.gpu_id.to_string().into());
        flag("--threads-per-block", params.threads_per_block.to_string().into());
        flag("--output", output_dir.as_os_str().to_owned());

        args
    }
}

impl BlendStrategy for ExternalRunner {
    fn run(
        &self,
        guide: &FrameSequence,
        style: &FrameSequence,
        batch_size: u32,
        window_size: u32,
        params: &BlendParams,
        output_dir: &Path,
    ) -> Result<()> {
        info!(
            mode = %self.mode,
            frames = guide.info.frame_count,
            batch_size,
            window_size,
            "Starting blending engine"
        );

        let mut cmd = Command::new(&self.program);
        cmd.args(self.command_args(guide, style, batch_size, window_size, params, output_dir))
            .stdin(Stdio::null())
            .stdout(Stdio::inherit());

        // Stderr carries the engine's progress; the last OOM line classifies a crash
        let mut memory_line = None;
        let run = run_streaming("blending engine", &mut cmd, |line| {
            if reports_memory_exhaustion(line) {
                memory_line = Some(line.to_string());
            }
        })?;
        if run.status.success() {
            return Ok(());
        }
        if let Some(line) = memory_line {
            return Err(BlendrunError::ResourceExhausted(line));
        }
        Err(tool_failure("blending engine", run.status, run.stderr_tail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::VideoInfo;
    use crate::models::Preset;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn sequence() -> FrameSequence {
        FrameSequence {
            path: PathBuf::from("/src/clip.mp4"),
            info: VideoInfo {
                frame_count: 10,
                width: 1280,
                height: 720,
            },
        }
    }

    struct Named(&'static str, Rc<RefCell<Vec<&'static str>>>);

    impl BlendStrategy for Named {
        fn run(
            &self,
            _: &FrameSequence,
            _: &FrameSequence,
            _: u32,
            _: u32,
            _: &BlendParams,
            _: &Path,
        ) -> Result<()> {
            self.1.borrow_mut().push(self.0);
            Ok(())
        }
    }

    #[test]
    fn test_for_mode_selects_matching_runner() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let runners = BlendRunners::new(
            Box::new(Named("fast", Rc::clone(&calls))),
            Box::new(Named("balanced", Rc::clone(&calls))),
            Box::new(Named("accurate", Rc::clone(&calls))),
        );
        let params = BlendParams::new(&Preset::Fast.settings(), &EngineConfig::default());
        let seq = sequence();

        for mode in [Mode::Accurate, Mode::Fast, Mode::Balanced] {
            runners
                .for_mode(mode)
                .run(&seq, &seq, 2, 5, &params, Path::new("/out"))
                .unwrap();
        }
        assert_eq!(*calls.borrow(), vec!["accurate", "fast", "balanced"]);
    }

    #[test]
    fn test_command_args() {
        let engine = EngineConfig::default();
        let params = BlendParams::new(&Preset::Quality.settings(), &engine);
        let seq = sequence();

        let runner = ExternalRunner::new("fastblend", Mode::Accurate);
        let args: Vec<String> = runner
            .command_args(&seq, &seq, 2, 15, &params, Path::new("/out/clip/frames"))
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        let value = |flag: &str| {
            let i = args.iter().position(|a| a == flag).unwrap();
            args[i + 1].clone()
        };
        assert_eq!(value("--mode"), "Accurate");
        assert_eq!(value("--guide"), "/src/clip.mp4");
        assert_eq!(value("--window-size"), "15");
        assert_eq!(value("--minimum-patch-size"), "7");
        assert_eq!(value("--tracking-window-size"), "1");
        assert_eq!(value("--initialize"), "identity");
        assert_eq!(value("--threads-per-block"), "8");
        assert_eq!(value("--output"), "/out/clip/frames");

        let fast = ExternalRunner::new("fastblend", Mode::Fast);
        let args = fast.command_args(&seq, &seq, 2, 5, &params, Path::new("/out"));
        assert!(!args.iter().any(|a| a == "--tracking-window-size"));
    }

    #[test]
    fn test_memory_exhaustion_detection() {
        assert!(reports_memory_exhaustion(
            "cupy.cuda.memory.OutOfMemoryError: Out of memory allocating 2,147,483,648 bytes"
        ));
        assert!(reports_memory_exhaustion("MemoryError"));
        assert!(reports_memory_exhaustion("CUDA_ERROR_OUT_OF_MEMORY"));
        assert!(!reports_memory_exhaustion("FileNotFoundError: clip.mp4"));
    }
}
