//! `ffprobe`/`ffmpeg` adapters for frame probing and video encoding.

use super::{FrameSource, VideoEncoder, VideoInfo, check_status, run_tool};
use crate::models::{BlendrunError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::info;

/// File name pattern of frames written by the blending engine.
pub const FRAME_PATTERN: &str = "%05d.png";

/// Probes videos with `ffprobe`.
#[derive(Debug, Clone)]
pub struct FfprobeSource {
    program: PathBuf,
}

impl FfprobeSource {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn probe(&self, path: &Path, entries: &str, count_frames: bool) -> Result<ProbeStream> {
        if !path.is_file() {
            return Err(BlendrunError::NotFound(path.to_path_buf()));
        }

        let mut cmd = Command::new(&self.program);
        cmd.args(["-v", "error", "-select_streams", "v:0"]);
        if count_frames {
            cmd.arg("-count_frames");
        }
        cmd.args(["-show_entries", entries, "-of", "json"]).arg(path);

        let output = run_tool("ffprobe", &mut cmd)?;
        check_status("ffprobe", &output)?;
        parse_probe(path, &output.stdout)
    }
}

impl FrameSource for FfprobeSource {
    fn open(&self, path: &Path) -> Result<VideoInfo> {
        let stream = self.probe(path, "stream=width,height,nb_read_frames", true)?;
        let (width, height) = match (stream.width, stream.height) {
            (Some(w), Some(h)) => (w, h),
            _ => {
                return Err(BlendrunError::Probe {
                    path: path.to_path_buf(),
                    message: "missing frame dimensions".to_string(),
                });
            }
        };

        let frame_count = stream
            .nb_read_frames
            .as_deref()
            .and_then(|n| n.trim().parse().ok())
            .unwrap_or(0);

        Ok(VideoInfo {
            frame_count,
            width,
            height,
        })
    }

    fn fps(&self, path: &Path) -> Result<f64> {
        let stream = self.probe(path, "stream=r_frame_rate", false)?;
        let raw = stream.r_frame_rate.unwrap_or_default();
        parse_frame_rate(&raw).ok_or_else(|| BlendrunError::Probe {
            path: path.to_path_buf(),
            message: format!("invalid frame rate '{raw}'"),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    nb_read_frames: Option<String>,
}

fn parse_probe(path: &Path, stdout: &[u8]) -> Result<ProbeStream> {
    let parsed: ProbeOutput = serde_json::from_slice(stdout).map_err(|e| BlendrunError::Probe {
        path: path.to_path_buf(),
        message: format!("unexpected ffprobe output: {e}"),
    })?;

    parsed
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| BlendrunError::Probe {
            path: path.to_path_buf(),
            message: "no video stream".to_string(),
        })
}

/// Parse `30000/1001` or `29.97` into frames per second.
fn parse_frame_rate(raw: &str) -> Option<f64> {
    let fps = match raw.trim().split_once('/') {
        Some((num, den)) => {
            let n: f64 = num.trim().parse().ok()?;
            let d: f64 = den.trim().parse().ok()?;
            if d == 0.0 {
                return None;
            }
            n / d
        }
        None => raw.trim().parse().ok()?,
    };
    (fps.is_finite() && fps > 0.0).then_some(fps)
}

/// Encodes numbered PNG frames to H.264 MP4 with `ffmpeg`.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    program: PathBuf,
}

impl FfmpegEncoder {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl VideoEncoder for FfmpegEncoder {
    fn encode(&self, frames_dir: &Path, output_path: &Path, frame_count: u64, fps: f64) -> Result<()> {
        let mut cmd = Command::new(&self.program);
        cmd.args(["-y", "-v", "error", "-framerate"])
            .arg(format!("{fps}"))
            .arg("-i")
            .arg(frames_dir.join(FRAME_PATTERN))
            .arg("-frames:v")
            .arg(frame_count.to_string())
            .args(["-c:v", "libx264", "-pix_fmt", "yuv420p", "-crf", "18"])
            .arg(output_path);

        let output = run_tool("ffmpeg", &mut cmd)?;
        check_status("ffmpeg", &output)?;

        info!(output = %output_path.display(), frames = frame_count, "Video encoded");
        Ok(())
    }
}
