//! System-wide hardware profiler
//!
//! Runs `perf stat` (or a compatible tool) as a background co-process that
//! writes interval CSV output to a temporary file. The profiler samples on its
//! own clock; each row carries seconds relative to when it started, and those
//! are anchored to the wall-clock instant captured at [`SystemProfiler::start`].

use crate::error::{BenchError, Result};
use crate::process::{self, ShutdownPolicy};
use crate::types::ProfilerSample;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempPath;
use tokio::process::{Child, Command};

const BANDWIDTH_METRIC: &str = "tma_info_system_dram_bw_use";

/// Profiler invocation and timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilerConfig {
    /// Profiler executable
    pub program: String,
    /// Arguments before the generated ones
    pub base_args: Vec<String>,
    /// Raw counter events (`-e`)
    pub events: Vec<String>,
    /// Derived metrics (`-M`)
    pub metrics: Vec<String>,
    /// Sampling interval in milliseconds (`-I`)
    pub interval_ms: u64,
    /// Time given to the profiler to initialize after spawn
    pub startup_delay_ms: u64,
    /// Bounded wait for exit after the interrupt
    pub stop_timeout_ms: u64,
    /// Grace period for buffered output to land on disk
    pub flush_grace_ms: u64,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            program: "perf".to_string(),
            base_args: vec!["stat".to_string(), "-a".to_string()],
            events: vec!["instructions".to_string(), "cycles".to_string()],
            metrics: vec![
                BANDWIDTH_METRIC.to_string(),
                "tma_memory_bound".to_string(),
                "tma_l1_bound".to_string(),
                "tma_l2_bound".to_string(),
                "tma_l3_bound".to_string(),
                "tma_dram_bound".to_string(),
            ],
            interval_ms: 250,
            startup_delay_ms: 100,
            stop_timeout_ms: 5_000,
            flush_grace_ms: 200,
        }
    }
}

impl ProfilerConfig {
    /// Full argument list for an output path
    #[must_use]
    pub fn command_args(&self, output: &str) -> Vec<String> {
        let mut args = self.base_args.clone();
        if !self.events.is_empty() {
            args.push("-e".to_string());
            args.push(self.events.join(","));
        }
        if !self.metrics.is_empty() {
            args.push("-M".to_string());
            args.push(self.metrics.join(","));
        }
        args.extend([
            "-I".to_string(),
            self.interval_ms.to_string(),
            "-x".to_string(),
            ",".to_string(),
            "-o".to_string(),
            output.to_string(),
        ]);
        args
    }

    fn shutdown_policy(&self) -> ShutdownPolicy {
        ShutdownPolicy {
            timeout: Duration::from_millis(self.stop_timeout_ms),
        }
    }
}

/// Entry point for starting profiler runs
#[derive(Debug, Clone, Copy)]
pub struct SystemProfiler;

impl SystemProfiler {
    /// Start a background profiler writing to a fresh temporary file
    ///
    /// # Errors
    /// - `BenchError::Profiler` if the temp file cannot be created or the
    ///   profiler cannot be started
    pub async fn start(config: ProfilerConfig) -> Result<ProfilerHandle> {
        let output = tempfile::Builder::new()
            .prefix("speedbench-perf-")
            .suffix(".csv")
            .tempfile()
            .map_err(|e| BenchError::Profiler(format!("creating output file: {e}")))?
            .into_temp_path();

        let path = output.to_string_lossy().into_owned();
        let start_time = Utc::now();
        let child = Command::new(&config.program)
            .args(config.command_args(&path))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                BenchError::Profiler(format!("failed to spawn `{}`: {e}", config.program))
            })?;

        tracing::info!(
            pid = child.id(),
            interval_ms = config.interval_ms,
            output = %path,
            "profiler started"
        );

        tokio::time::sleep(Duration::from_millis(config.startup_delay_ms)).await;

        Ok(ProfilerHandle {
            child,
            output,
            start_time,
            config,
        })
    }
}

/// A running profiler; owns its output file exclusively
#[derive(Debug)]
pub struct ProfilerHandle {
    child: Child,
    output: TempPath,
    start_time: DateTime<Utc>,
    config: ProfilerConfig,
}

impl ProfilerHandle {
    /// Wall-clock anchor for relative timestamps
    #[must_use]
    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// Temporary file the profiler writes to; removed by `stop` and `abort`
    #[must_use]
    pub fn output_path(&self) -> &Path {
        &self.output
    }

    /// Stop, parse and delete the output
    ///
    /// # Errors
    /// - `BenchError::Profiler` if the profiler cannot be stopped or its
    ///   output cannot be read or removed
    pub async fn stop(mut self) -> Result<Vec<ProfilerSample>> {
        let outcome = process::shutdown(&mut self.child, self.config.shutdown_policy())
            .await
            .map_err(|e| BenchError::Profiler(format!("stopping profiler: {e}")))?;
        tracing::debug!(?outcome, "profiler stopped");

        tokio::time::sleep(Duration::from_millis(self.config.flush_grace_ms)).await;

        let text = tokio::fs::read_to_string(&self.output)
            .await
            .map_err(|e| BenchError::Profiler(format!("reading {}: {e}", self.output.display())))?;
        let samples = parse_perf_output(&text, self.start_time);

        self.output
            .close()
            .map_err(|e| BenchError::Profiler(format!("removing output file: {e}")))?;

        tracing::info!(samples = samples.len(), "profiler output parsed");
        Ok(samples)
    }

    /// Stop and delete the output without parsing
    pub async fn abort(mut self) {
        if let Err(e) = process::shutdown(&mut self.child, self.config.shutdown_policy()).await {
            tracing::warn!(error = %e, "profiler shutdown failed during abort");
        }
        if let Err(e) = self.output.close() {
            tracing::warn!(error = %e, "profiler output not removed");
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Accumulator {
    instructions: f64,
    cycles: f64,
    bandwidth_gbps: f64,
    memory_bound_pct: f64,
    l1_bound_pct: f64,
    l2_bound_pct: f64,
    l3_bound_pct: f64,
    dram_bound_pct: f64,
}

impl Accumulator {
    fn into_sample(self, timestamp: DateTime<Utc>) -> ProfilerSample {
        let ipc = if self.cycles > 0.0 {
            self.instructions / self.cycles
        } else {
            0.0
        };
        ProfilerSample {
            timestamp,
            bandwidth_gbps: self.bandwidth_gbps,
            memory_bound_pct: self.memory_bound_pct,
            l1_bound_pct: self.l1_bound_pct,
            l2_bound_pct: self.l2_bound_pct,
            l3_bound_pct: self.l3_bound_pct,
            dram_bound_pct: self.dram_bound_pct,
            ipc,
        }
    }
}

/// Counter value, treating placeholders like `<not counted>` as zero
fn counter_value(field: &str) -> f64 {
    let field = field.trim();
    if field.is_empty() || field.starts_with('<') {
        return 0.0;
    }
    field.parse().unwrap_or(0.0)
}

/// Parse interval-mode `perf stat -x ,` output into time-ordered samples
///
/// Rows sharing a relative timestamp are folded into one sample. Values that
/// cannot be read contribute zero.
#[must_use]
pub fn parse_perf_output(text: &str, start_time: DateTime<Utc>) -> Vec<ProfilerSample> {
    let mut grouped: BTreeMap<i64, Accumulator> = BTreeMap::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let parts: Vec<&str> = line.split(',').collect();
        if parts.len() < 4 {
            continue;
        }
        let Ok(relative_secs) = parts[0].trim().parse::<f64>() else {
            tracing::debug!(line, "skipping profiler line without timestamp");
            continue;
        };

        let key = (relative_secs * 1e9).round() as i64;
        let acc = grouped.entry(key).or_default();

        let value = counter_value(parts[1]);
        let event = parts[3].trim().to_lowercase();
        if event.contains("instructions") {
            acc.instructions += value;
        } else if event.contains("cycles") && !event.contains("unhalted") {
            acc.cycles += value;
        }

        for i in (4..parts.len()).rev() {
            let mut name = parts[i].trim();
            if let Some(rest) = name.strip_prefix('%') {
                name = rest.trim();
            }
            if !name.starts_with("tma_") {
                continue;
            }
            let Ok(derived) = parts[i - 1].trim().parse::<f64>() else {
                break;
            };
            match name {
                BANDWIDTH_METRIC => acc.bandwidth_gbps = derived,
                "tma_memory_bound" => acc.memory_bound_pct += derived,
                "tma_l1_bound" => acc.l1_bound_pct += derived,
                "tma_l2_bound" => acc.l2_bound_pct += derived,
                "tma_l3_bound" => acc.l3_bound_pct += derived,
                "tma_dram_bound" => acc.dram_bound_pct += derived,
                _ => {}
            }
            break;
        }
    }

    grouped
        .into_iter()
        .map(|(nanos, acc)| acc.into_sample(start_time + chrono::Duration::nanoseconds(nanos)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SAMPLE: &str = "\
# started on Mon Jan  1 00:00:00 2024

     0.250112,1000000,,cpu_core/instructions/,250000000,100.00,,
     0.250112,500000,,cpu_atom/instructions/,250000000,100.00,,
     0.250112,800000,,cpu_core/cycles/,250000000,100.00,,
     0.250112,200000,,cpu_atom/cycles/,250000000,100.00,,
     0.250112,123,,cpu_core/topdown-mem-bound/,250000000,100.00,20.5,%  tma_memory_bound
     0.250112,456,,cpu_atom/topdown-mem-bound/,250000000,100.00,4.5,%  tma_memory_bound
     0.250112,789,,cpu_core/topdown-l1/,250000000,100.00,3.0,%  tma_l1_bound
     0.250112,12,,uncore_imc/cas_count_read/,250000000,100.00,14.2,tma_info_system_dram_bw_use
     0.500220,<not counted>,,cpu_core/instructions/,0,0.00,,
     0.500220,400000,,cpu_core/cycles/,250000000,100.00,,
     0.500220,12,,uncore_imc/cas_count_read/,250000000,100.00,9.8,tma_info_system_dram_bw_use
garbage line
     0.750000,1,,cpu_core/cpu_clk_unhalted.thread/,250000000,100.00,,
";

    fn anchor() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn groups_rows_by_timestamp() {
        let samples = parse_perf_output(SAMPLE, anchor());
        assert_eq!(samples.len(), 3);
        assert_eq!(
            samples[0].timestamp,
            anchor() + chrono::Duration::microseconds(250_112)
        );
        assert!(samples.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn sums_across_core_types() {
        let s = parse_perf_output(SAMPLE, anchor())[0];
        assert!((s.ipc - 1.5).abs() < 1e-9);
        assert!((s.memory_bound_pct - 25.0).abs() < 1e-9);
        assert!((s.l1_bound_pct - 3.0).abs() < 1e-9);
        assert!((s.bandwidth_gbps - 14.2).abs() < 1e-9);
    }

    #[test]
    fn placeholders_count_as_zero() {
        let s = parse_perf_output(SAMPLE, anchor())[1];
        assert_eq!(s.ipc, 0.0);
        assert!((s.bandwidth_gbps - 9.8).abs() < 1e-9);
    }

    #[test]
    fn unhalted_cycles_are_ignored() {
        let s = parse_perf_output(SAMPLE, anchor())[2];
        assert_eq!(s.ipc, 0.0);
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(parse_perf_output("", anchor()).is_empty());
        assert!(parse_perf_output("# only a comment\n", anchor()).is_empty());
    }

    #[test]
    fn command_args_layout() {
        let cfg = ProfilerConfig::default();
        let args = cfg.command_args("/tmp/out.csv");
        assert_eq!(&args[..2], ["stat", "-a"]);
        assert!(args.windows(2).any(|w| w == ["-I", "250"]));
        assert!(args.windows(2).any(|w| w == ["-x", ","]));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/out.csv"));
        assert!(args.contains(&"instructions,cycles".to_string()));
    }
}
