//! External media collaborators.
//!
//! The orchestrator only sees three seams:
//! - `FrameSource`: probes an input video for frame count, size and rate
//! - `BlendStrategy`: the opaque, long-running smoothing engine, one per mode
//! - `VideoEncoder`: turns a directory of frames back into a video
//!
//! The concrete adapters shell out to `ffprobe`, `ffmpeg` and the configured
//! blending engine executable.

mod blend;
mod ffmpeg;

pub use blend::*;
pub use ffmpeg::*;

use crate::models::{BlendrunError, Result};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Output, Stdio};
use tracing::debug;

/// Basic properties of a decodable video.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoInfo {
    pub frame_count: u64,
    pub width: u32,
    pub height: u32,
}

/// A video opened as a frame sequence for the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSequence {
    pub path: PathBuf,
    pub info: VideoInfo,
}

/// Decodes video metadata.
pub trait FrameSource {
    /// Open a video and report its frame count and resolution.
    fn open(&self, path: &Path) -> Result<VideoInfo>;

    /// Frame rate of a video.
    fn fps(&self, path: &Path) -> Result<f64>;
}

/// Encodes a directory of frames into a video file.
pub trait VideoEncoder {
    fn encode(&self, frames_dir: &Path, output_path: &Path, frame_count: u64, fps: f64) -> Result<()>;
}

/// Number of stderr lines kept in tool failure messages.
const STDERR_TAIL_LINES: usize = 20;

/// Run an external tool to completion and capture its output.
fn run_tool(tool: &str, command: &mut Command) -> Result<Output> {
    debug!(tool, command = ?command, "Running external tool");
    command.output().map_err(|e| BlendrunError::Spawn {
        tool: tool.to_string(),
        source: e,
    })
}

/// Turn a non-zero exit into a `Tool` error carrying the tail of stderr.
fn check_status(tool: &str, output: &Output) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    Err(tool_failure(tool, output.status, stderr_tail(&output.stderr)))
}

fn tool_failure(tool: &str, status: ExitStatus, stderr: String) -> BlendrunError {
    BlendrunError::Tool {
        tool: tool.to_string(),
        status: status.to_string(),
        stderr,
    }
}

/// A finished tool whose stderr was passed through to the terminal.
struct StreamedRun {
    status: ExitStatus,
    stderr_tail: String,
}

/// Run an external tool, echoing its stderr as it arrives.
///
/// Only the last few lines are kept; `on_line` sees every line.
fn run_streaming(tool: &str, command: &mut Command, mut on_line: impl FnMut(&str)) -> Result<StreamedRun> {
    debug!(tool, command = ?command, "Running external tool");
    let mut child = command
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| BlendrunError::Spawn {
            tool: tool.to_string(),
            source: e,
        })?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| BlendrunError::Internal(format!("{tool} stderr was not captured")))?;

    let mut tail = StderrTail::default();
    let mut echo = io::stderr();
    let mut buf = [0u8; 4096];
    loop {
        let n = match stderr.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(BlendrunError::io(format!("reading {tool} stderr"), e)),
        };
        // Echo failures must not kill the run
        let _ = echo.write_all(&buf[..n]);
        tail.feed(&buf[..n], &mut on_line);
    }
    let _ = echo.flush();

    let status = child
        .wait()
        .map_err(|e| BlendrunError::io(format!("waiting for {tool}"), e))?;
    Ok(StreamedRun {
        status,
        stderr_tail: tail.finish(&mut on_line),
    })
}

/// Bounded tail of a byte stream, split into lines on `\n` or `\r`.
#[derive(Default)]
struct StderrTail {
    lines: VecDeque<String>,
    pending: Vec<u8>,
}

impl StderrTail {
    fn feed(&mut self, chunk: &[u8], on_line: &mut impl FnMut(&str)) {
        for &byte in chunk {
            if byte == b'\n' || byte == b'\r' {
                self.flush_pending(on_line);
            } else {
                self.pending.push(byte);
            }
        }
    }

    fn flush_pending(&mut self, on_line: &mut impl FnMut(&str)) {
        let line = String::from_utf8_lossy(&self.pending).trim().to_string();
        self.pending.clear();
        if line.is_empty() {
            return;
        }
        on_line(&line);
        if self.lines.len() == STDERR_TAIL_LINES {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    fn finish(mut self, on_line: &mut impl FnMut(&str)) -> String {
        self.flush_pending(on_line);
        Vec::from(self.lines).join("\n")
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stderr_tail_keeps_last_lines() {
        let input: String = (0..30).map(|i| format!("line {i}\n\n")).collect();
        let tail = stderr_tail(input.as_bytes());
        let lines: Vec<&str> = tail.lines().collect();
        assert_eq!(lines.len(), STDERR_TAIL_LINES);
        assert_eq!(lines[0], "line 10");
        assert_eq!(lines[STDERR_TAIL_LINES - 1], "line 29");
    }

    #[test]
    fn test_stderr_tail_splits_progress_updates() {
        let mut seen = Vec::new();
        let mut on_line = |l: &str| seen.push(l.to_string());
        let mut tail = StderrTail::default();
        tail.feed(b"loading\nblend 1", &mut on_line);
        tail.feed(b"0%\rblend 100%\r\nOut of me", &mut on_line);
        tail.feed(b"mory", &mut on_line);
        let text = tail.finish(&mut on_line);

        assert_eq!(seen, vec!["loading", "blend 10%", "blend 100%", "Out of memory"]);
        assert_eq!(text, "loading\nblend 10%\nblend 100%\nOut of memory");
    }

    #[cfg(unix)]
    #[test]
    fn test_run_streaming_keeps_bounded_tail() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg("i=0; while [ $i -lt 30 ]; do i=$((i+1)); echo \"line $i\" >&2; done; exit 3");

        let mut count = 0;
        let run = run_streaming("sh", &mut cmd, |_| count += 1).unwrap();
        assert_eq!(count, 30);
        assert_eq!(run.status.code(), Some(3));
        let lines: Vec<&str> = run.stderr_tail.lines().collect();
        assert_eq!(lines.len(), STDERR_TAIL_LINES);
        assert_eq!(lines[0], "line 11");
        assert_eq!(lines[STDERR_TAIL_LINES - 1], "line 30");
    }

    #[test]
    fn test_missing_tool_is_spawn_error() {
        let mut cmd = Command::new("/nonexistent/definitely-not-a-tool");
        let err = run_tool("ghost", &mut cmd).unwrap_err();
        assert!(matches!(err, BlendrunError::Spawn { ref tool, .. } if tool == "ghost"));
    }
}
