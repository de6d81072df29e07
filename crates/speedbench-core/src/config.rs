//! Sweep configuration file
//!
//! A TOML file describes the benchmark command, the optional build step, the
//! sweep axes, the profiler and the analysis settings. Every field has a
//! default so a minimal file only names what differs.
//!
//! ```toml
//! [benchmark]
//! program = "dotnet"
//! args = ["run", "--project", "src/MicroBenchmarks", "--no-build", "-c", "Release", "--", "inference"]
//! duration_secs = 8.0
//! warmup_secs = 2.0
//!
//! [sweep]
//! models = ["dbnet"]
//! max_cores = 12
//!
//! [profiler]
//! scope = "whole-sweep"
//! ```

use crate::correlate::TimeSeriesCorrelator;
use crate::cores::CoreTopology;
use crate::error::{BenchError, Result};
use crate::process::CommandSpec;
use crate::profiler::ProfilerConfig;
use crate::stream::{LineFormat, StreamOptions};
use crate::sweep::{ProfilerScope, SweepAxes, SweepSettings};
use crate::types::Metric;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Benchmark executable and timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkSection {
    /// Executable
    pub program: String,
    /// Leading arguments
    pub args: Vec<String>,
    /// Measured seconds per configuration
    pub duration_secs: f64,
    /// Warmup seconds per configuration
    pub warmup_secs: f64,
    /// Stdout line layout
    pub line_format: LineFormat,
    /// Read poll interval
    pub poll_interval_ms: u64,
    /// File collecting per-configuration stderr
    pub diagnostic_log: Option<PathBuf>,
}

impl Default for BenchmarkSection {
    fn default() -> Self {
        Self {
            program: "dotnet".to_string(),
            args: [
                "run",
                "--project",
                "src/MicroBenchmarks",
                "--no-build",
                "-c",
                "Release",
                "--",
                "inference",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            duration_secs: 8.0,
            warmup_secs: 2.0,
            line_format: LineFormat::default(),
            poll_interval_ms: 100,
            diagnostic_log: None,
        }
    }
}

/// Sweep axes; `core_sets` wins over `max_cores` when given
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepSection {
    /// Models
    pub models: Vec<String>,
    /// Batch sizes
    pub batch_sizes: Vec<u32>,
    /// Intra-op thread counts
    pub intra_threads: Vec<u32>,
    /// Inter-op thread counts
    pub inter_threads: Vec<u32>,
    /// Explicit core sets
    pub core_sets: Option<Vec<Vec<usize>>>,
    /// Prioritized core sets `1..=max_cores`
    pub max_cores: usize,
    /// Core layout used for prioritization and per-core-kind stats
    pub topology: CoreTopology,
}

impl Default for SweepSection {
    fn default() -> Self {
        Self {
            models: vec!["dbnet".to_string()],
            batch_sizes: vec![1],
            intra_threads: vec![1],
            inter_threads: vec![1],
            core_sets: None,
            max_cores: 1,
            topology: CoreTopology::default(),
        }
    }
}

/// Profiler switch and placement
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilerSection {
    /// When the profiler runs
    pub scope: ProfilerScope,
    /// Invocation details
    #[serde(flatten)]
    pub command: ProfilerConfig,
}

/// Resampling and statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSection {
    /// Bucket width in seconds
    pub bucket_secs: f64,
    /// Metrics to resample
    pub metrics: Vec<Metric>,
    /// Metric averaged into the stats table
    pub stats_metric: Metric,
}

impl Default for AnalysisSection {
    fn default() -> Self {
        Self {
            bucket_secs: 1.0,
            metrics: Metric::ALL.to_vec(),
            stats_metric: Metric::BandwidthGbps,
        }
    }
}

/// Whole configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Benchmark executable and timing
    pub benchmark: BenchmarkSection,
    /// Build step run once before the sweep
    pub build: Option<CommandSpec>,
    /// Sweep axes
    pub sweep: SweepSection,
    /// Profiler
    pub profiler: ProfilerSection,
    /// Analysis
    pub analysis: AnalysisSection,
}

impl BenchConfig {
    /// Parse TOML text
    ///
    /// # Errors
    /// `BenchError::Config` on syntax or validation failure
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| BenchError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    ///
    /// # Errors
    /// `BenchError::File` if unreadable, `BenchError::Config` if invalid
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| BenchError::file(path, e))?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Self::from_toml(&text)
    }

    /// Reject configurations that cannot produce a meaningful sweep
    ///
    /// # Errors
    /// `BenchError::Config` naming the first problem found
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(BenchError::Config(msg.to_string()));
        if self.benchmark.program.trim().is_empty() {
            return fail("benchmark.program is empty");
        }
        if !(self.benchmark.duration_secs > 0.0) {
            return fail("benchmark.duration_secs must be positive");
        }
        if !(self.benchmark.warmup_secs >= 0.0) {
            return fail("benchmark.warmup_secs must not be negative");
        }
        if self.benchmark.poll_interval_ms == 0 {
            return fail("benchmark.poll_interval_ms must be positive");
        }
        if self.sweep.models.is_empty()
            || self.sweep.batch_sizes.is_empty()
            || self.sweep.intra_threads.is_empty()
            || self.sweep.inter_threads.is_empty()
        {
            return fail("every sweep axis needs at least one value");
        }
        if self.core_sets().is_empty() {
            return fail("sweep has no core sets");
        }
        if self.core_sets().iter().any(Vec::is_empty) {
            return fail("core sets must not be empty");
        }
        if !(self.analysis.bucket_secs > 0.0) {
            return fail("analysis.bucket_secs must be positive");
        }
        Ok(())
    }

    /// Core sets the sweep will use
    #[must_use]
    pub fn core_sets(&self) -> Vec<Vec<usize>> {
        match &self.sweep.core_sets {
            Some(sets) => sets.clone(),
            None => self.sweep.topology.prioritized_cores(self.sweep.max_cores),
        }
    }

    /// Sweep axes
    #[must_use]
    pub fn axes(&self) -> SweepAxes {
        SweepAxes {
            models: self.sweep.models.clone(),
            batch_sizes: self.sweep.batch_sizes.clone(),
            intra_threads: self.sweep.intra_threads.clone(),
            inter_threads: self.sweep.inter_threads.clone(),
            core_sets: self.core_sets(),
        }
    }

    /// Benchmark command
    #[must_use]
    pub fn command(&self) -> CommandSpec {
        CommandSpec::new(&self.benchmark.program).with_args(self.benchmark.args.clone())
    }

    /// Runner settings
    #[must_use]
    pub fn sweep_settings(&self) -> SweepSettings {
        SweepSettings {
            duration: Duration::from_secs_f64(self.benchmark.duration_secs),
            warmup: Duration::from_secs_f64(self.benchmark.warmup_secs),
            stream: StreamOptions {
                format: self.benchmark.line_format,
                poll_interval: Duration::from_millis(self.benchmark.poll_interval_ms),
            },
            profiler_scope: self.profiler.scope,
            diagnostic_log: self.benchmark.diagnostic_log.clone(),
        }
    }

    /// Correlator for the analysis section
    #[must_use]
    pub fn correlator(&self) -> TimeSeriesCorrelator {
        TimeSeriesCorrelator::new()
            .with_bucket_width(Duration::from_secs_f64(self.analysis.bucket_secs))
            .with_metrics(self.analysis.metrics.clone())
    }
}
