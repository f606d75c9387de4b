//! Error types for blendrun.
//!
//! Failure taxonomy:
//! - Resource exhaustion: the engine or the OS ran out of memory
//! - Not found: a source path is missing, no job identity exists yet
//! - Generic: everything else a job can hit (I/O, external tools, bad input)

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for blendrun.
#[derive(Debug, Error)]
pub enum BlendrunError {
    // ═══════════════════════════════════════════════════════════════════
    // Expected failures (bad input, missing files)
    // ═══════════════════════════════════════════════════════════════════

    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("Not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("No decodable frames in {}", .0.display())]
    NoFrames(PathBuf),

    #[error("Cannot probe {}: {message}", path.display())]
    Probe { path: PathBuf, message: String },

    #[error("Parse error: {0}")]
    ParseError(String),

    // ═══════════════════════════════════════════════════════════════════
    // Infrastructure failures (external tools, filesystem, memory)
    // ═══════════════════════════════════════════════════════════════════

    #[error("Out of memory: {0}")]
    ResourceExhausted(String),

    #[error("Failed to launch {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with {status}: {stderr}")]
    Tool {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // ═══════════════════════════════════════════════════════════════════
    // Invariant violations (bugs, should not happen)
    // ═══════════════════════════════════════════════════════════════════

    #[error("Internal error: {0}")]
    Internal(String),
}

/// How a job failure is recorded in its checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Memory exhaustion, persisted as `error_memory`
    ResourceExhaustion,
    /// Any other failure, persisted as `error`
    Generic,
}

impl BlendrunError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Classify this error for the job checkpoint.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::ResourceExhausted(_) => FailureKind::ResourceExhaustion,
            Self::Io { source, .. } | Self::Spawn { source, .. }
                if source.kind() == std::io::ErrorKind::OutOfMemory =>
            {
                FailureKind::ResourceExhaustion
            }
            _ => FailureKind::Generic,
        }
    }

    /// Full diagnostic including every `source()` in the chain.
    pub fn chain(&self) -> String {
        let mut out = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            out.push_str(&format!("\n  caused by: {err}"));
            source = err.source();
        }
        out
    }

    /// One-line message with every distinct cause appended, for checkpoints.
    pub fn detail(&self) -> String {
        let mut out = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            let cause = err.to_string();
            if !out.contains(&cause) {
                out.push_str(": ");
                out.push_str(&cause);
            }
            source = err.source();
        }
        out
    }
}

/// Result type alias for blendrun.
pub type Result<T> = std::result::Result<T, BlendrunError>;
