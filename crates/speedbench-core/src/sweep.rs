//! Sequential benchmark sweeps
//!
//! Expands sweep axes into configurations and runs each one to completion
//! before starting the next. Profiler counters are system-wide, so two
//! configurations must never overlap in time.

use crate::error::{BenchError, Result};
use crate::process::CommandSpec;
use crate::profiler::{ProfilerConfig, ProfilerHandle, SystemProfiler};
use crate::report::format_duration;
use crate::stream::{ProcessStreamReader, StreamOptions};
use crate::types::{BenchmarkRecord, Configuration, ProfilerSample};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Lists of values to sweep over
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepAxes {
    /// Models
    pub models: Vec<String>,
    /// Batch sizes
    pub batch_sizes: Vec<u32>,
    /// Intra-op thread counts
    pub intra_threads: Vec<u32>,
    /// Inter-op thread counts
    pub inter_threads: Vec<u32>,
    /// Core sets, usually from `prioritized_cores`
    pub core_sets: Vec<Vec<usize>>,
}

impl SweepAxes {
    /// Single model on the given core sets, other axes at 1
    #[must_use]
    pub fn for_model(model: impl Into<String>, core_sets: Vec<Vec<usize>>) -> Self {
        Self {
            models: vec![model.into()],
            batch_sizes: vec![1],
            intra_threads: vec![1],
            inter_threads: vec![1],
            core_sets,
        }
    }

    /// Cartesian product; core sets vary fastest
    #[must_use]
    pub fn configurations(&self) -> Vec<Configuration> {
        let mut configs = Vec::new();
        for model in &self.models {
            for &batch_size in &self.batch_sizes {
                for &intra in &self.intra_threads {
                    for &inter in &self.inter_threads {
                        for cores in &self.core_sets {
                            configs.push(
                                Configuration::new(model.clone(), cores.clone())
                                    .with_batch_size(batch_size)
                                    .with_threads(intra, inter),
                            );
                        }
                    }
                }
            }
        }
        configs
    }
}

/// When the profiler runs relative to the sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProfilerScope {
    /// One profiler run around each configuration
    PerConfiguration,
    /// One profiler run around the whole sweep
    #[default]
    WholeSweep,
    /// No profiling
    Disabled,
}

/// Progress snapshot handed to a [`ProgressSink`]
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    /// Index of the running configuration
    pub config_index: usize,
    /// Total configurations
    pub config_count: usize,
    /// Time since the sweep started
    pub elapsed: Duration,
    /// Estimated total time
    pub estimated_total: Duration,
}

impl Progress {
    /// Percent complete, capped at 99 until the sweep returns
    #[must_use]
    pub fn percent(&self) -> u32 {
        let total = self.estimated_total.as_secs_f64();
        if total <= 0.0 {
            return 0;
        }
        ((self.elapsed.as_secs_f64() / total) * 100.0).min(99.0) as u32
    }

    /// Estimated time left
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.estimated_total.saturating_sub(self.elapsed)
    }
}

/// Receives progress while a sweep runs
pub trait ProgressSink: Send {
    /// Called on every poll tick
    fn update(&mut self, progress: &Progress);
}

/// Sink that only logs through tracing
#[derive(Debug)]
pub struct LogProgress {
    every: Duration,
    last: Option<Instant>,
}

impl LogProgress {
    /// Log at most once per `every`
    #[must_use]
    pub fn new(every: Duration) -> Self {
        Self { every, last: None }
    }
}

impl ProgressSink for LogProgress {
    fn update(&mut self, progress: &Progress) {
        let now = Instant::now();
        if self.last.is_some_and(|t| now.duration_since(t) < self.every) {
            return;
        }
        self.last = Some(now);
        tracing::info!(
            config = progress.config_index + 1,
            of = progress.config_count,
            percent = progress.percent(),
            remaining = %format_duration(progress.remaining().as_secs_f64()),
            "sweep progress"
        );
    }
}

/// Everything a sweep collected
#[derive(Debug, Clone, Default)]
pub struct SweepOutcome {
    /// Configurations in run order
    pub configurations: Vec<Arc<Configuration>>,
    /// Tagged records, in stdout order within each configuration
    pub records: Vec<BenchmarkRecord>,
    /// Profiler samples from every profiler run, time-ordered
    pub samples: Vec<ProfilerSample>,
}

/// Timing and output settings for a sweep
#[derive(Debug, Clone)]
pub struct SweepSettings {
    /// Measured duration per configuration
    pub duration: Duration,
    /// Warmup per configuration
    pub warmup: Duration,
    /// Reader options
    pub stream: StreamOptions,
    /// Profiler placement
    pub profiler_scope: ProfilerScope,
    /// Where per-configuration stderr is collected, if anywhere
    pub diagnostic_log: Option<PathBuf>,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(8),
            warmup: Duration::from_secs(2),
            stream: StreamOptions::default(),
            profiler_scope: ProfilerScope::default(),
            diagnostic_log: None,
        }
    }
}

/// Runs configurations one at a time
#[derive(Debug, Clone)]
pub struct SweepRunner {
    command: CommandSpec,
    settings: SweepSettings,
    profiler: ProfilerConfig,
}

impl SweepRunner {
    /// Create a runner for a base benchmark command
    #[must_use]
    pub fn new(command: CommandSpec, settings: SweepSettings) -> Self {
        Self {
            command,
            settings,
            profiler: ProfilerConfig::default(),
        }
    }

    /// With profiler configuration
    #[must_use]
    pub fn with_profiler(mut self, profiler: ProfilerConfig) -> Self {
        self.profiler = profiler;
        self
    }

    /// Settings in use
    #[must_use]
    pub fn settings(&self) -> &SweepSettings {
        &self.settings
    }

    /// Estimated wall time for `config_count` configurations
    #[must_use]
    pub fn estimated_total(&self, config_count: usize) -> Duration {
        let per_config = self.settings.warmup + self.settings.duration + Duration::from_secs(1);
        per_config * u32::try_from(config_count).unwrap_or(u32::MAX)
    }

    /// Run every configuration in order
    ///
    /// # Errors
    /// The first failing configuration aborts the sweep; any running profiler
    /// is shut down and its output removed before the error is returned.
    pub async fn run(
        &self,
        configs: &[Configuration],
        progress: &mut dyn ProgressSink,
    ) -> Result<SweepOutcome> {
        tracing::info!(
            configurations = configs.len(),
            scope = ?self.settings.profiler_scope,
            estimated = %format_duration(self.estimated_total(configs.len()).as_secs_f64()),
            "starting sweep"
        );

        let mut outcome = SweepOutcome::default();
        let mut diagnostics = String::new();
        let started = Instant::now();
        let estimated_total = self.estimated_total(configs.len());

        let mut sweep_profiler = match self.settings.profiler_scope {
            ProfilerScope::WholeSweep => Some(SystemProfiler::start(self.profiler.clone()).await?),
            _ => None,
        };

        for (index, config) in configs.iter().enumerate() {
            let config = Arc::new(config.clone());

            let mut config_profiler = match self.settings.profiler_scope {
                ProfilerScope::PerConfiguration => {
                    match SystemProfiler::start(self.profiler.clone()).await {
                        Ok(handle) => Some(handle),
                        Err(e) => {
                            abort_profiler(sweep_profiler.take()).await;
                            return Err(e);
                        }
                    }
                }
                _ => None,
            };

            let mut report = || {
                progress.update(&Progress {
                    config_index: index,
                    config_count: configs.len(),
                    elapsed: started.elapsed(),
                    estimated_total,
                });
            };

            tracing::info!(index = index + 1, %config, "running configuration");
            let run = self
                .run_one(&config, &mut report, &mut outcome.records)
                .await;

            match run {
                Ok(stderr) => {
                    let _ = writeln!(diagnostics, "=== Config: {config} ===\n{stderr}");
                    if let Some(handle) = config_profiler.take() {
                        match handle.stop().await {
                            Ok(samples) => outcome.samples.extend(samples),
                            Err(e) => {
                                abort_profiler(sweep_profiler.take()).await;
                                return Err(e);
                            }
                        }
                    }
                    outcome.configurations.push(config);
                }
                Err(e) => {
                    tracing::error!(%config, error = %e, "configuration failed, aborting sweep");
                    abort_profiler(config_profiler.take()).await;
                    abort_profiler(sweep_profiler.take()).await;
                    return Err(e);
                }
            }
        }

        if let Some(handle) = sweep_profiler.take() {
            outcome.samples.extend(handle.stop().await?);
        }
        outcome.samples.sort_by_key(|s| s.timestamp);

        if let Some(path) = &self.settings.diagnostic_log {
            tokio::fs::write(path, diagnostics)
                .await
                .map_err(|e| BenchError::file(path, e))?;
            tracing::info!(path = %path.display(), "diagnostic log written");
        }

        tracing::info!(
            records = outcome.records.len(),
            samples = outcome.samples.len(),
            elapsed = %format_duration(started.elapsed().as_secs_f64()),
            "sweep finished"
        );
        Ok(outcome)
    }

    /// Drain one configuration's reader; returns its stderr
    async fn run_one(
        &self,
        config: &Arc<Configuration>,
        on_tick: &mut dyn FnMut(),
        records: &mut Vec<BenchmarkRecord>,
    ) -> Result<String> {
        let mut command = self.command.clone();
        command.args.extend(config.to_args());

        let mut reader = ProcessStreamReader::spawn(
            &command,
            self.settings.duration,
            self.settings.warmup,
            self.settings.stream,
        )?;

        let before = records.len();
        while let Some(raw) = reader.next_record_with_tick(on_tick).await? {
            records.push(BenchmarkRecord::tagged(raw, Arc::clone(config)));
        }
        tracing::debug!(records = records.len() - before, "configuration drained");

        Ok(reader.stderr().unwrap_or_default().to_string())
    }
}

async fn abort_profiler(handle: Option<ProfilerHandle>) {
    if let Some(handle) = handle {
        handle.abort().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cartesian_product_order() {
        let axes = SweepAxes {
            models: vec!["dbnet".into(), "svtr".into()],
            batch_sizes: vec![1, 4],
            intra_threads: vec![1],
            inter_threads: vec![1],
            core_sets: vec![vec![0], vec![0, 2]],
        };
        let configs = axes.configurations();
        assert_eq!(configs.len(), 8);
        assert_eq!(configs[0].model, "dbnet");
        assert_eq!(configs[0].cores, vec![0]);
        assert_eq!(configs[1].cores, vec![0, 2]);
        assert_eq!(configs[2].batch_size, 4);
        assert_eq!(configs[4].model, "svtr");
    }

    #[test]
    fn empty_axis_yields_no_configurations() {
        let mut axes = SweepAxes::for_model("dbnet", vec![vec![0]]);
        axes.batch_sizes.clear();
        assert!(axes.configurations().is_empty());
    }

    #[test]
    fn progress_percent_is_capped() {
        let p = Progress {
            config_index: 0,
            config_count: 1,
            elapsed: Duration::from_secs(20),
            estimated_total: Duration::from_secs(10),
        };
        assert_eq!(p.percent(), 99);
        assert_eq!(p.remaining(), Duration::ZERO);
    }

    #[test]
    fn estimate_adds_a_second_per_config() {
        let runner = SweepRunner::new(CommandSpec::new("bench"), SweepSettings::default());
        assert_eq!(runner.estimated_total(3), Duration::from_secs(33));
    }
}
