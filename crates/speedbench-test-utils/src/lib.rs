//! Testing utilities for the speedbench workspace
//!
//! Shell-script stand-ins for the benchmark and the profiler, plus record
//! and sample builders anchored at a fixed instant.

#![allow(missing_docs)]

use chrono::{DateTime, TimeZone, Utc};
use speedbench_core::{BenchmarkRecord, CommandSpec, Configuration, ProfilerConfig, ProfilerSample};
use std::sync::Arc;

/// Fixed anchor all builders offset from
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0)
        .single()
        .unwrap_or_default()
}

pub fn at_ms(ms: i64) -> DateTime<Utc> {
    epoch() + chrono::Duration::milliseconds(ms)
}

pub fn ts(secs: f64) -> DateTime<Utc> {
    at_ms((secs * 1000.0).round() as i64)
}

/// `2024-01-01T12:00:00.000000Z`-style text for an offset
pub fn iso_ms(ms: i64) -> String {
    at_ms(ms).to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// A benchmark stand-in; the sweep's generated arguments land in `$@`
pub fn fake_benchmark(script: &str) -> CommandSpec {
    CommandSpec::new("sh").with_args(["-c", script, "sh"])
}

/// Script printing `count` records `core,start,end`, one every `step_ms`
pub fn record_script(count: usize, step_ms: i64) -> String {
    let lines: Vec<String> = (0..count)
        .map(|i| {
            let start = i as i64 * step_ms;
            format!("echo '{},{},{}'", i % 4, iso_ms(start), iso_ms(start + step_ms))
        })
        .collect();
    lines.join("; ")
}

/// Profiler stand-in that writes `csv` to its `-o` path and exits on SIGINT
pub fn fake_profiler(csv: &str) -> ProfilerConfig {
    let script = format!(
        "for a; do out=$a; done; printf '%s' '{csv}' > \"$out\"; \
         trap 'exit 0' INT; while :; do sleep 0.05; done"
    );
    ProfilerConfig {
        program: "sh".to_string(),
        base_args: vec!["-c".to_string(), script, "sh".to_string()],
        startup_delay_ms: 50,
        stop_timeout_ms: 2_000,
        flush_grace_ms: 20,
        ..ProfilerConfig::default()
    }
}

pub fn config(model: &str, cores: Vec<usize>) -> Arc<Configuration> {
    Arc::new(Configuration::new(model, cores))
}

pub fn record(config: &Arc<Configuration>, start_ms: i64, duration_ms: i64) -> BenchmarkRecord {
    BenchmarkRecord {
        core_id: config.cores.first().copied(),
        start_time: at_ms(start_ms),
        end_time: at_ms(start_ms + duration_ms),
        config: Arc::clone(config),
    }
}

/// `count` back-to-back records starting at `start_ms`
pub fn records(
    config: &Arc<Configuration>,
    start_ms: i64,
    count: usize,
    duration_ms: i64,
) -> Vec<BenchmarkRecord> {
    (0..count)
        .map(|i| record(config, start_ms + i as i64 * duration_ms, duration_ms))
        .collect()
}

pub fn bandwidth_sample(ms: i64, gbps: f64) -> ProfilerSample {
    ProfilerSample::zeroed(at_ms(ms)).with(speedbench_core::Metric::BandwidthGbps, gbps)
}
