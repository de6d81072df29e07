//! Error types for speedbench
//!
//! One error enum covers the whole pipeline:
//! - Build step failures
//! - Benchmark process failures (non-zero exit)
//! - Malformed record lines on the benchmark's stdout
//! - Profiler lifecycle failures
//! - IO and configuration errors
//!
//! Profiler *parse* anomalies (placeholder or missing counter values) are not
//! errors; they are folded into the samples as zero.

use std::path::PathBuf;

/// Main speedbench error type
#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    /// Build step exited non-zero
    #[error("build failed ({status}):\n{output}")]
    BuildFailed {
        /// Exit status description
        status: String,
        /// Combined stdout and stderr of the build
        output: String,
    },

    /// A child process could not be started
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        /// Program that failed to start
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Benchmark process exited non-zero
    #[error("benchmark failed ({status}):\n{stderr}")]
    ProcessFailed {
        /// Exit status description
        status: String,
        /// Exit code, if the process was not killed by a signal
        code: Option<i32>,
        /// Captured stderr, verbatim
        stderr: String,
    },

    /// A stdout line did not match the record format
    #[error("malformed record on line {line_number}: {reason} (`{line}`)")]
    MalformedLine {
        /// 1-based line number in the child's stdout
        line_number: usize,
        /// The offending line, trimmed
        line: String,
        /// What was wrong with it
        reason: String,
    },

    /// Profiler could not be started or stopped
    #[error("profiler error: {0}")]
    Profiler(String),

    /// IO failure outside of process spawning
    #[error("io error while {context}: {source}")]
    Io {
        /// What was being done
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// File-level IO failure
    #[error("io error on {path}: {source}")]
    File {
        /// Path involved
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Export serialization failed
    #[error("export failed: {0}")]
    Export(String),
}

/// Error category, one per failure class of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Build step
    Build,
    /// Benchmark process lifecycle (spawn or exit)
    BenchmarkProcess,
    /// Malformed stdout record
    MalformedRecord,
    /// Profiler lifecycle
    Profiler,
    /// IO and export
    Io,
    /// Configuration
    Config,
}

impl BenchError {
    /// Classify the error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BuildFailed { .. } => ErrorKind::Build,
            Self::Spawn { .. } | Self::ProcessFailed { .. } => ErrorKind::BenchmarkProcess,
            Self::MalformedLine { .. } => ErrorKind::MalformedRecord,
            Self::Profiler(_) => ErrorKind::Profiler,
            Self::Io { .. } | Self::File { .. } | Self::Export(_) => ErrorKind::Io,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Create a malformed-line error
    pub fn malformed(line_number: usize, line: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedLine {
            line_number,
            line: line.into(),
            reason: reason.into(),
        }
    }

    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a file IO error for path
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::File {
            path: path.into(),
            source,
        }
    }
}

impl From<csv::Error> for BenchError {
    fn from(err: csv::Error) -> Self {
        Self::Export(err.to_string())
    }
}

impl From<serde_json::Error> for BenchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Export(err.to_string())
    }
}

/// Result alias used across the crate
pub type Result<T, E = BenchError> = std::result::Result<T, E>;
