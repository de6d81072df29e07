//! Time-series correlation
//!
//! Benchmark records and profiler samples come from two unsynchronized clocks.
//! For each configuration the records define a wall-clock window
//! `[min start, max end]`; profiler samples inside it are attributed to that
//! configuration. Both series are then resampled onto fixed-width buckets,
//! the partial boundary buckets are dropped, and every configuration is cut to
//! the shortest common duration so comparisons cover the same elapsed time.

use crate::types::{
    duration_secs, BenchmarkRecord, Configuration, Metric, ProfilerSample, ResampledBucket,
    SeriesKind,
};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::sync::Arc;
use std::time::Duration;

/// Records grouped by configuration, in first-appearance order
#[must_use]
pub fn group_by_config(
    records: &[BenchmarkRecord],
) -> IndexMap<Arc<Configuration>, Vec<&BenchmarkRecord>> {
    let mut groups: IndexMap<Arc<Configuration>, Vec<&BenchmarkRecord>> = IndexMap::new();
    for record in records {
        groups
            .entry(Arc::clone(&record.config))
            .or_default()
            .push(record);
    }
    groups
}

/// Wall-clock window covered by a configuration's records
#[must_use]
pub fn time_window(records: &[&BenchmarkRecord]) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let start = records.iter().map(|r| r.start_time).min()?;
    let end = records.iter().map(|r| r.end_time).max()?;
    Some((start, end))
}

/// Samples with `start <= timestamp <= end`
#[must_use]
pub fn samples_in_window(
    samples: &[ProfilerSample],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<&ProfilerSample> {
    samples
        .iter()
        .filter(|s| s.timestamp >= start && s.timestamp <= end)
        .collect()
}

fn bucket_index(ts: DateTime<Utc>, width_nanos: i64) -> i64 {
    let nanos = ts
        .timestamp_nanos_opt()
        .unwrap_or_else(|| ts.timestamp_micros().saturating_mul(1_000));
    nanos.div_euclid(width_nanos)
}

fn width_nanos(width: Duration) -> i64 {
    i64::try_from(width.as_nanos()).unwrap_or(i64::MAX).max(1)
}

/// Count timestamps per bucket
///
/// Buckets are aligned to multiples of `width`; the first bucket is the one
/// holding the earliest timestamp and sits at offset 0. Empty buckets in
/// between count as 0.
#[must_use]
pub fn resample_counts(timestamps: &[DateTime<Utc>], width: Duration) -> Vec<(f64, f64)> {
    let w = width_nanos(width);
    let Some(first) = timestamps.iter().map(|&t| bucket_index(t, w)).min() else {
        return Vec::new();
    };
    let last = timestamps
        .iter()
        .map(|&t| bucket_index(t, w))
        .max()
        .unwrap_or(first);

    let mut counts = vec![0usize; usize::try_from(last - first + 1).unwrap_or(0)];
    for &t in timestamps {
        let idx = usize::try_from(bucket_index(t, w) - first).unwrap_or(0);
        counts[idx] += 1;
    }

    let step = width.as_secs_f64();
    counts
        .into_iter()
        .enumerate()
        .map(|(i, c)| (i as f64 * step, c as f64))
        .collect()
}

/// Mean value per bucket; empty buckets have no value
#[must_use]
pub fn resample_means(points: &[(DateTime<Utc>, f64)], width: Duration) -> Vec<(f64, Option<f64>)> {
    let w = width_nanos(width);
    let Some(first) = points.iter().map(|&(t, _)| bucket_index(t, w)).min() else {
        return Vec::new();
    };
    let last = points
        .iter()
        .map(|&(t, _)| bucket_index(t, w))
        .max()
        .unwrap_or(first);

    let mut sums = vec![(0.0f64, 0usize); usize::try_from(last - first + 1).unwrap_or(0)];
    for &(t, v) in points {
        let idx = usize::try_from(bucket_index(t, w) - first).unwrap_or(0);
        sums[idx].0 += v;
        sums[idx].1 += 1;
    }

    let step = width.as_secs_f64();
    sums.into_iter()
        .enumerate()
        .map(|(i, (sum, n))| (i as f64 * step, (n > 0).then(|| sum / n as f64)))
        .collect()
}

/// Drop the first and last bucket
#[must_use]
pub fn trim_boundaries<T>(mut buckets: Vec<T>) -> Vec<T> {
    if buckets.len() <= 2 {
        return Vec::new();
    }
    buckets.pop();
    buckets.remove(0);
    buckets
}

/// Cut every configuration's series to the shortest common duration
///
/// Operates per [`SeriesKind`]; configurations without buckets in a series do
/// not constrain it.
pub fn truncate_to_common_duration(buckets: &mut Vec<ResampledBucket>) {
    let mut max_offset: IndexMap<(SeriesKind, Arc<Configuration>), f64> = IndexMap::new();
    for b in buckets.iter() {
        let entry = max_offset
            .entry((b.series, Arc::clone(&b.config)))
            .or_insert(f64::NEG_INFINITY);
        *entry = entry.max(b.time_offset_secs);
    }

    let mut common: IndexMap<SeriesKind, f64> = IndexMap::new();
    for ((series, _), max) in max_offset {
        let entry = common.entry(series).or_insert(f64::INFINITY);
        *entry = entry.min(max);
    }

    buckets.retain(|b| b.time_offset_secs <= common[&b.series]);
}

/// Resampled, aligned series for every configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorrelatedSeries {
    /// Completed records per bucket
    pub throughput: Vec<ResampledBucket>,
    /// Per-bucket means of the requested metrics
    pub metrics: Vec<ResampledBucket>,
}

impl CorrelatedSeries {
    /// Buckets of one series for one configuration
    pub fn series<'a>(
        &'a self,
        kind: SeriesKind,
        config: &'a Configuration,
    ) -> impl Iterator<Item = &'a ResampledBucket> + 'a {
        let source = match kind {
            SeriesKind::Throughput => &self.throughput,
            SeriesKind::Metric(_) => &self.metrics,
        };
        source
            .iter()
            .filter(move |b| b.series == kind && *b.config == *config)
    }
}

/// Aligns benchmark records with profiler samples
#[derive(Debug, Clone)]
pub struct TimeSeriesCorrelator {
    bucket_width: Duration,
    metrics: Vec<Metric>,
}

impl Default for TimeSeriesCorrelator {
    fn default() -> Self {
        Self {
            bucket_width: Duration::from_secs(1),
            metrics: Metric::ALL.to_vec(),
        }
    }
}

impl TimeSeriesCorrelator {
    /// One-second buckets over every metric
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With bucket width
    #[must_use]
    pub fn with_bucket_width(mut self, width: Duration) -> Self {
        self.bucket_width = width;
        self
    }

    /// With the metrics to resample
    #[must_use]
    pub fn with_metrics(mut self, metrics: Vec<Metric>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Bucket width in use
    #[must_use]
    pub fn bucket_width(&self) -> Duration {
        self.bucket_width
    }

    /// Resample and align both series for every configuration
    #[must_use]
    pub fn correlate(
        &self,
        records: &[BenchmarkRecord],
        samples: &[ProfilerSample],
    ) -> CorrelatedSeries {
        let mut out = CorrelatedSeries::default();

        for (config, group) in group_by_config(records) {
            let Some((t_start, t_end)) = time_window(&group) else {
                continue;
            };

            let midpoints: Vec<DateTime<Utc>> = group.iter().map(|r| r.midpoint()).collect();
            let counts = trim_boundaries(resample_counts(&midpoints, self.bucket_width));
            tracing::debug!(
                %config,
                buckets = counts.len(),
                window_s = duration_secs(t_end - t_start),
                "throughput resampled"
            );
            out.throughput
                .extend(counts.into_iter().map(|(offset, count)| ResampledBucket {
                    config: Arc::clone(&config),
                    series: SeriesKind::Throughput,
                    time_offset_secs: offset,
                    value: count,
                }));

            let window = samples_in_window(samples, t_start, t_end);
            if window.is_empty() {
                continue;
            }
            for &metric in &self.metrics {
                let points: Vec<(DateTime<Utc>, f64)> =
                    window.iter().map(|s| (s.timestamp, s.get(metric))).collect();
                let means = trim_boundaries(resample_means(&points, self.bucket_width));
                out.metrics.extend(means.into_iter().filter_map(|(offset, mean)| {
                    mean.map(|value| ResampledBucket {
                        config: Arc::clone(&config),
                        series: SeriesKind::Metric(metric),
                        time_offset_secs: offset,
                        value,
                    })
                }));
            }
        }

        truncate_to_common_duration(&mut out.throughput);
        truncate_to_common_duration(&mut out.metrics);
        out
    }
}
