//! SpeedBench Core - benchmark sweeps for the SpeedReader OCR engine
//!
//! The pipeline:
//! - Builds the benchmark once and sweeps it over model, batch, thread and
//!   core configurations, strictly one configuration at a time
//! - Streams per-unit timing records from each benchmark process as they
//!   are printed, with a 100ms poll driving progress callbacks
//! - Captures system-wide hardware counters with an external profiler
//! - Resamples throughput and profiler metrics onto a shared time axis
//! - Summarizes each configuration and the marginal value of extra cores
//!
//! # Example
//!
//! ```rust,ignore
//! use speedbench_core::prelude::*;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BenchConfig::load("speedbench.toml")?;
//! let runner = SweepRunner::new(config.command(), config.sweep_settings())
//!     .with_profiler(config.profiler.command.clone());
//!
//! let configs = config.axes().configurations();
//! let outcome = runner.run(&configs, &mut LogProgress::new(Duration::from_secs(5))).await?;
//!
//! let series = config.correlator().correlate(&outcome.records, &outcome.samples);
//! let rows = StatsAggregator::new().aggregate(&outcome.records, &outcome.samples);
//! println!("{} buckets, {} configurations", series.throughput.len(), rows.len());
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

// Core modules
pub mod config;
pub mod cores;
pub mod correlate;
pub mod error;
pub mod process;
pub mod profiler;
pub mod report;
pub mod stats;
pub mod stream;
pub mod sweep;
pub mod types;

// Re-exports for convenience
pub use config::BenchConfig;
pub use cores::{physical_p_cores, prioritized_cores, CoreKind, CoreTopology};
pub use correlate::{CorrelatedSeries, TimeSeriesCorrelator};
pub use error::{BenchError, ErrorKind, Result};
pub use process::{run_build, CommandSpec, Shutdown, ShutdownPolicy};
pub use profiler::{parse_perf_output, ProfilerConfig, ProfilerHandle, SystemProfiler};
pub use stats::{
    marginal_efficiency, ConfigStats, CoreAnalysis, CoreKindStats, CoreKindThroughput, CoreSpread,
    StatsAggregator, VarianceBreakdown,
};
pub use stream::{LineFormat, ProcessStreamReader, StreamOptions};
pub use sweep::{
    LogProgress, Progress, ProfilerScope, ProgressSink, SweepAxes, SweepOutcome, SweepRunner,
    SweepSettings,
};
pub use types::{
    BenchmarkRecord, Configuration, Metric, ProfilerSample, RawRecord, ResampledBucket, SeriesKind,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::BenchConfig;
    pub use crate::correlate::TimeSeriesCorrelator;
    pub use crate::error::{BenchError, Result};
    pub use crate::process::CommandSpec;
    pub use crate::stats::StatsAggregator;
    pub use crate::sweep::{LogProgress, ProgressSink, SweepRunner};
    pub use crate::types::{BenchmarkRecord, Configuration, Metric, ProfilerSample, SeriesKind};
    pub use std::time::Duration;
}
