//! Core types for speedbench
//!
//! Defines the data that flows through the pipeline:
//! - Sweep configurations
//! - Raw and tagged benchmark records
//! - Profiler samples and their metrics
//! - Resampled time buckets

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// One point of a sweep's cartesian product
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Configuration {
    /// Model name passed to the benchmark (`-m`)
    pub model: String,
    /// Batch size (`-b`)
    pub batch_size: u32,
    /// Intra-op thread count
    pub intra_threads: u32,
    /// Inter-op thread count
    pub inter_threads: u32,
    /// OS core ids the benchmark binds to (`-c`)
    pub cores: Vec<usize>,
}

impl Configuration {
    /// Create a configuration with single-threaded defaults
    #[inline]
    #[must_use]
    pub fn new(model: impl Into<String>, cores: Vec<usize>) -> Self {
        Self {
            model: model.into(),
            batch_size: 1,
            intra_threads: 1,
            inter_threads: 1,
            cores,
        }
    }

    /// With batch size
    #[inline]
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// With intra/inter thread counts
    #[inline]
    #[must_use]
    pub fn with_threads(mut self, intra: u32, inter: u32) -> Self {
        self.intra_threads = intra;
        self.inter_threads = inter;
        self
    }

    /// Number of cores the run is bound to
    #[inline]
    #[must_use]
    pub fn parallelism(&self) -> usize {
        self.cores.len()
    }

    /// Benchmark CLI flags for this configuration
    #[must_use]
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "-m".to_string(),
            self.model.clone(),
            "-b".to_string(),
            self.batch_size.to_string(),
            "--intra-threads".to_string(),
            self.intra_threads.to_string(),
            "--inter-threads".to_string(),
            self.inter_threads.to_string(),
            "-c".to_string(),
        ];
        args.extend(self.cores.iter().map(ToString::to_string));
        args
    }

    /// Cores as a space-separated list
    #[must_use]
    pub fn cores_label(&self) -> String {
        self.cores
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "model={} batch={} intra={} inter={} cores={:?}",
            self.model, self.batch_size, self.intra_threads, self.inter_threads, self.cores
        )
    }
}

/// One parsed line of benchmark stdout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawRecord {
    /// Logical core the work ran on, when the line format carries it
    pub core_id: Option<usize>,
    /// Start of the unit of work
    pub start_time: DateTime<Utc>,
    /// End of the unit of work (never before `start_time`)
    pub end_time: DateTime<Utc>,
}

impl RawRecord {
    /// Duration of the unit of work
    #[inline]
    #[must_use]
    pub fn duration(&self) -> chrono::Duration {
        self.end_time - self.start_time
    }

    /// Midpoint between start and end
    #[inline]
    #[must_use]
    pub fn midpoint(&self) -> DateTime<Utc> {
        self.start_time + self.duration() / 2
    }
}

/// A record tagged with the configuration that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkRecord {
    /// Logical core id, if reported
    pub core_id: Option<usize>,
    /// Start of work
    pub start_time: DateTime<Utc>,
    /// End of work
    pub end_time: DateTime<Utc>,
    /// Configuration active when this record was produced
    pub config: Arc<Configuration>,
}

impl BenchmarkRecord {
    /// Tag a raw record with its configuration
    #[inline]
    #[must_use]
    pub fn tagged(raw: RawRecord, config: Arc<Configuration>) -> Self {
        Self {
            core_id: raw.core_id,
            start_time: raw.start_time,
            end_time: raw.end_time,
            config,
        }
    }

    /// Duration of the unit of work
    #[inline]
    #[must_use]
    pub fn duration(&self) -> chrono::Duration {
        self.end_time - self.start_time
    }

    /// Duration in fractional milliseconds
    #[inline]
    #[must_use]
    pub fn duration_ms(&self) -> f64 {
        duration_secs(self.duration()) * 1000.0
    }

    /// Midpoint between start and end
    #[inline]
    #[must_use]
    pub fn midpoint(&self) -> DateTime<Utc> {
        self.start_time + self.duration() / 2
    }
}

/// Hardware metrics derived from profiler output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// DRAM bandwidth in GB/s
    BandwidthGbps,
    /// Memory-bound cycles (P+E cores)
    MemoryBoundPct,
    /// L1-bound cycles (P-core only)
    L1BoundPct,
    /// L2-bound cycles (P-core only)
    L2BoundPct,
    /// L3-bound cycles (P-core only)
    L3BoundPct,
    /// DRAM-bound cycles (P-core only)
    DramBoundPct,
    /// Instructions per cycle (P+E cores)
    Ipc,
}

impl Metric {
    /// All metrics in column order
    pub const ALL: [Metric; 7] = [
        Metric::BandwidthGbps,
        Metric::MemoryBoundPct,
        Metric::L1BoundPct,
        Metric::L2BoundPct,
        Metric::L3BoundPct,
        Metric::DramBoundPct,
        Metric::Ipc,
    ];

    /// Column name
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Metric::BandwidthGbps => "bandwidth_gbps",
            Metric::MemoryBoundPct => "memory_bound_pct",
            Metric::L1BoundPct => "l1_bound_pct",
            Metric::L2BoundPct => "l2_bound_pct",
            Metric::L3BoundPct => "l3_bound_pct",
            Metric::DramBoundPct => "dram_bound_pct",
            Metric::Ipc => "ipc",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Metric::ALL
            .into_iter()
            .find(|m| m.name() == s)
            .ok_or_else(|| format!("unknown metric: {s}"))
    }
}

/// One timestamped profiler reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfilerSample {
    /// Wall-clock time of the sample
    pub timestamp: DateTime<Utc>,
    /// DRAM bandwidth (GB/s)
    pub bandwidth_gbps: f64,
    /// Memory bound (%)
    pub memory_bound_pct: f64,
    /// L1 bound (%)
    pub l1_bound_pct: f64,
    /// L2 bound (%)
    pub l2_bound_pct: f64,
    /// L3 bound (%)
    pub l3_bound_pct: f64,
    /// DRAM bound (%)
    pub dram_bound_pct: f64,
    /// Instructions per cycle
    pub ipc: f64,
}

impl ProfilerSample {
    /// Sample with all metrics zero
    #[must_use]
    pub fn zeroed(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            bandwidth_gbps: 0.0,
            memory_bound_pct: 0.0,
            l1_bound_pct: 0.0,
            l2_bound_pct: 0.0,
            l3_bound_pct: 0.0,
            dram_bound_pct: 0.0,
            ipc: 0.0,
        }
    }

    /// Read one metric
    #[must_use]
    pub fn get(&self, metric: Metric) -> f64 {
        match metric {
            Metric::BandwidthGbps => self.bandwidth_gbps,
            Metric::MemoryBoundPct => self.memory_bound_pct,
            Metric::L1BoundPct => self.l1_bound_pct,
            Metric::L2BoundPct => self.l2_bound_pct,
            Metric::L3BoundPct => self.l3_bound_pct,
            Metric::DramBoundPct => self.dram_bound_pct,
            Metric::Ipc => self.ipc,
        }
    }

    /// Builder-style metric setter
    #[must_use]
    pub fn with(mut self, metric: Metric, value: f64) -> Self {
        let slot = match metric {
            Metric::BandwidthGbps => &mut self.bandwidth_gbps,
            Metric::MemoryBoundPct => &mut self.memory_bound_pct,
            Metric::L1BoundPct => &mut self.l1_bound_pct,
            Metric::L2BoundPct => &mut self.l2_bound_pct,
            Metric::L3BoundPct => &mut self.l3_bound_pct,
            Metric::DramBoundPct => &mut self.dram_bound_pct,
            Metric::Ipc => &mut self.ipc,
        };
        *slot = value;
        self
    }
}

/// Which series a bucket belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SeriesKind {
    /// Completed records per bucket
    Throughput,
    /// Mean of a profiler metric per bucket
    Metric(Metric),
}

impl fmt::Display for SeriesKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeriesKind::Throughput => f.write_str("throughput"),
            SeriesKind::Metric(m) => write!(f, "{m}"),
        }
    }
}

/// One fixed-width time window relative to a configuration's own start
#[derive(Debug, Clone, PartialEq)]
pub struct ResampledBucket {
    /// Configuration the bucket belongs to
    pub config: Arc<Configuration>,
    /// Series the value belongs to
    pub series: SeriesKind,
    /// Bucket start, seconds after the series' first bucket
    pub time_offset_secs: f64,
    /// Count (throughput) or mean (metric)
    pub value: f64,
}

/// Fractional seconds of a chrono duration
#[inline]
#[must_use]
pub fn duration_secs(d: chrono::Duration) -> f64 {
    match d.num_nanoseconds() {
        Some(ns) => ns as f64 / 1e9,
        None => d.num_milliseconds() as f64 / 1e3,
    }
}
