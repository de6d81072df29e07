//! Per-configuration summary statistics
//!
//! Besides the headline [`ConfigStats`] rows, [`StatsAggregator`] breaks
//! per-record durations down by core: where the variance comes from, how much
//! throughput each kind of core contributes, and how far apart the fastest and
//! slowest P-cores drift.

use crate::correlate::{group_by_config, samples_in_window, time_window};
use crate::cores::{CoreKind, CoreTopology};
use crate::types::{duration_secs, BenchmarkRecord, Configuration, Metric, ProfilerSample};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Summary of one configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigStats {
    /// Configuration
    pub config: Arc<Configuration>,
    /// Completed units of work
    pub records: usize,
    /// Records per second over `[min start, max end]`
    pub avg_throughput: f64,
    /// Mean per-record duration
    pub avg_duration_ms: f64,
    /// Sample standard deviation of per-record duration
    pub std_duration_ms: Option<f64>,
    /// Mean of the selected metric over the configuration's window
    pub avg_metric: Option<f64>,
    /// Forward difference of throughput over the baseline throughput
    pub marginal_efficiency: Option<f64>,
}

/// Duration spread for one kind of core
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoreKindStats {
    /// Core kind
    pub kind: CoreKind,
    /// Records run on this kind of core
    pub records: usize,
    /// Mean duration
    pub avg_duration_ms: f64,
    /// Sample standard deviation
    pub std_duration_ms: Option<f64>,
}

/// Where per-record duration variance comes from, for one configuration
///
/// Total variance splits into the mean within-core variance and the rest,
/// which is attributed to cores running at different speeds.
#[derive(Debug, Clone, PartialEq)]
pub struct VarianceBreakdown {
    /// Configuration
    pub config: Arc<Configuration>,
    /// Sample standard deviation over every record
    pub total_std_ms: f64,
    /// Mean of the per-core sample standard deviations
    pub intra_core_std_ms: f64,
    /// Square root of the variance not explained within cores
    pub heterogeneity_std_ms: f64,
    /// Share of total variance not explained within cores, in percent
    pub heterogeneity_pct: f64,
    /// Lowest per-core mean duration
    pub core_mean_min_ms: f64,
    /// Highest per-core mean duration
    pub core_mean_max_ms: f64,
    /// `core_mean_max_ms - core_mean_min_ms`
    pub core_mean_spread_ms: f64,
}

/// Throughput contributed by one kind of core in one configuration
#[derive(Debug, Clone, PartialEq)]
pub struct CoreKindThroughput {
    /// Configuration
    pub config: Arc<Configuration>,
    /// Core kind
    pub kind: CoreKind,
    /// Records on this kind of core per second of the configuration's window
    pub throughput: f64,
}

/// Fastest and slowest P-core by mean duration
#[derive(Debug, Clone, PartialEq)]
pub struct CoreSpread {
    /// Configuration
    pub config: Arc<Configuration>,
    /// Core with the lowest mean duration
    pub fastest_core: usize,
    /// Its mean duration
    pub fastest_mean_ms: f64,
    /// Core with the highest mean duration
    pub slowest_core: usize,
    /// Its mean duration
    pub slowest_mean_ms: f64,
    /// `slowest_mean_ms - fastest_mean_ms`
    pub spread_ms: f64,
}

/// Every per-core breakdown of a sweep
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoreAnalysis {
    /// Duration spread per core kind over the whole sweep
    pub duration_by_kind: Vec<CoreKindStats>,
    /// Variance breakdown per configuration
    pub variance: Vec<VarianceBreakdown>,
    /// Throughput per configuration and core kind
    pub throughput_by_kind: Vec<CoreKindThroughput>,
    /// P-core spread for configurations that fit on physical P-cores
    pub p_core_spread: Vec<CoreSpread>,
}

const ALL_KINDS: [CoreKind; 3] = [
    CoreKind::PerformancePhysical,
    CoreKind::Efficiency,
    CoreKind::PerformanceSmt,
];

/// Arithmetic mean
#[must_use]
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Sample standard deviation (n - 1 denominator)
#[must_use]
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

/// Durations per core id, for records that report one
fn durations_by_core<'a, I>(records: I) -> BTreeMap<usize, Vec<f64>>
where
    I: IntoIterator<Item = &'a BenchmarkRecord>,
{
    let mut by_core: BTreeMap<usize, Vec<f64>> = BTreeMap::new();
    for record in records {
        if let Some(core) = record.core_id {
            by_core.entry(core).or_default().push(record.duration_ms());
        }
    }
    by_core
}

/// `(t[i] - t[i-1]) / t[0]`; the first entry has no predecessor
///
/// The denominator is always the baseline, not the previous row.
#[must_use]
pub fn marginal_efficiency(throughputs: &[f64]) -> Vec<Option<f64>> {
    let Some(&baseline) = throughputs.first() else {
        return Vec::new();
    };
    let mut out = Vec::with_capacity(throughputs.len());
    out.push(None);
    for pair in throughputs.windows(2) {
        out.push((baseline > 0.0).then(|| (pair[1] - pair[0]) / baseline));
    }
    out
}

/// Computes [`ConfigStats`] rows
#[derive(Debug, Clone)]
pub struct StatsAggregator {
    metric: Metric,
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self {
            metric: Metric::BandwidthGbps,
        }
    }
}

impl StatsAggregator {
    /// Aggregate bandwidth alongside throughput
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With the metric to average per configuration
    #[must_use]
    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metric = metric;
        self
    }

    /// Metric being averaged
    #[must_use]
    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// One row per configuration, in sweep order
    ///
    /// Marginal efficiency runs along each series of configurations sharing
    /// model, batch size and thread counts; the first row of a series is its
    /// baseline.
    #[must_use]
    pub fn aggregate(
        &self,
        records: &[BenchmarkRecord],
        samples: &[ProfilerSample],
    ) -> Vec<ConfigStats> {
        let mut rows: Vec<ConfigStats> = group_by_config(records)
            .into_iter()
            .filter_map(|(config, group)| {
                let (start, end) = time_window(&group)?;
                let span = duration_secs(end - start);
                let avg_throughput = if span > 0.0 {
                    group.len() as f64 / span
                } else {
                    0.0
                };

                let durations: Vec<f64> = group.iter().map(|r| r.duration_ms()).collect();
                let window: Vec<f64> = samples_in_window(samples, start, end)
                    .into_iter()
                    .map(|s| s.get(self.metric))
                    .collect();

                Some(ConfigStats {
                    config,
                    records: group.len(),
                    avg_throughput,
                    avg_duration_ms: mean(&durations).unwrap_or(0.0),
                    std_duration_ms: sample_std(&durations),
                    avg_metric: mean(&window),
                    marginal_efficiency: None,
                })
            })
            .collect();

        let mut series: IndexMap<(String, u32, u32, u32), Vec<usize>> = IndexMap::new();
        for (i, row) in rows.iter().enumerate() {
            let c = &row.config;
            series
                .entry((c.model.clone(), c.batch_size, c.intra_threads, c.inter_threads))
                .or_default()
                .push(i);
        }
        for indices in series.values() {
            let throughputs: Vec<f64> = indices.iter().map(|&i| rows[i].avg_throughput).collect();
            for (&i, eff) in indices.iter().zip(marginal_efficiency(&throughputs)) {
                rows[i].marginal_efficiency = eff;
            }
        }
        rows
    }

    /// Duration spread per core kind, over records that report a core id
    #[must_use]
    pub fn duration_by_core_kind(
        &self,
        records: &[BenchmarkRecord],
        topology: &CoreTopology,
    ) -> Vec<CoreKindStats> {
        let mut by_kind: BTreeMap<CoreKind, Vec<f64>> = BTreeMap::new();
        for record in records {
            let Some(kind) = record.core_id.and_then(|id| topology.kind_of(id)) else {
                continue;
            };
            by_kind.entry(kind).or_default().push(record.duration_ms());
        }
        by_kind
            .into_iter()
            .map(|(kind, durations)| CoreKindStats {
                kind,
                records: durations.len(),
                avg_duration_ms: mean(&durations).unwrap_or(0.0),
                std_duration_ms: sample_std(&durations),
            })
            .collect()
    }

    /// Variance breakdown per configuration
    ///
    /// Configurations with fewer than two records carrying a core id are
    /// skipped. Cores with a single record contribute a mean but no
    /// within-core spread.
    #[must_use]
    pub fn variance_breakdown(&self, records: &[BenchmarkRecord]) -> Vec<VarianceBreakdown> {
        group_by_config(records)
            .into_iter()
            .filter_map(|(config, group)| {
                let by_core = durations_by_core(group.iter().copied());
                let all: Vec<f64> = by_core.values().flatten().copied().collect();
                let total_std = sample_std(&all)?;
                let total_var = total_std.powi(2);

                let core_stds: Vec<f64> = by_core.values().filter_map(|d| sample_std(d)).collect();
                let core_vars: Vec<f64> = core_stds.iter().map(|s| s.powi(2)).collect();
                let intra_var = mean(&core_vars).unwrap_or(0.0);
                let heterogeneity_var = (total_var - intra_var).max(0.0);

                let core_means: Vec<f64> = by_core.values().filter_map(|d| mean(d)).collect();
                let min = core_means.iter().copied().fold(f64::INFINITY, f64::min);
                let max = core_means.iter().copied().fold(f64::NEG_INFINITY, f64::max);

                Some(VarianceBreakdown {
                    config,
                    total_std_ms: total_std,
                    intra_core_std_ms: mean(&core_stds).unwrap_or(0.0),
                    heterogeneity_std_ms: heterogeneity_var.sqrt(),
                    heterogeneity_pct: if total_var > 0.0 {
                        100.0 * heterogeneity_var / total_var
                    } else {
                        0.0
                    },
                    core_mean_min_ms: min,
                    core_mean_max_ms: max,
                    core_mean_spread_ms: max - min,
                })
            })
            .collect()
    }

    /// Throughput each kind of core contributes, per configuration
    ///
    /// Every kind gets a row, zero when the configuration never ran on it.
    /// The denominator is the whole configuration's window.
    #[must_use]
    pub fn throughput_by_core_kind(
        &self,
        records: &[BenchmarkRecord],
        topology: &CoreTopology,
    ) -> Vec<CoreKindThroughput> {
        let mut rows = Vec::new();
        for (config, group) in group_by_config(records) {
            let Some((start, end)) = time_window(&group) else {
                continue;
            };
            let span = duration_secs(end - start);
            let mut counts: BTreeMap<CoreKind, usize> = BTreeMap::new();
            for record in &group {
                if let Some(kind) = record.core_id.and_then(|id| topology.kind_of(id)) {
                    *counts.entry(kind).or_default() += 1;
                }
            }
            for kind in ALL_KINDS {
                let count = counts.get(&kind).copied().unwrap_or(0);
                rows.push(CoreKindThroughput {
                    config: Arc::clone(&config),
                    kind,
                    throughput: if span > 0.0 { count as f64 / span } else { 0.0 },
                });
            }
        }
        rows
    }

    /// Fastest and slowest P-core per configuration
    ///
    /// Only configurations no wider than the physical P-core count are
    /// considered, and only records on P-core threads count.
    #[must_use]
    pub fn p_core_spread(
        &self,
        records: &[BenchmarkRecord],
        topology: &CoreTopology,
    ) -> Vec<CoreSpread> {
        let max_parallelism = topology.performance.len();
        group_by_config(records)
            .into_iter()
            .filter(|(config, _)| config.parallelism() <= max_parallelism)
            .filter_map(|(config, group)| {
                let p_core = group.iter().copied().filter(|r| {
                    matches!(
                        r.core_id.and_then(|id| topology.kind_of(id)),
                        Some(CoreKind::PerformancePhysical | CoreKind::PerformanceSmt)
                    )
                });
                let means: Vec<(usize, f64)> = durations_by_core(p_core)
                    .into_iter()
                    .filter_map(|(core, d)| Some((core, mean(&d)?)))
                    .collect();
                let &(fastest_core, fastest_mean_ms) =
                    means.iter().min_by(|a, b| a.1.total_cmp(&b.1))?;
                let &(slowest_core, slowest_mean_ms) =
                    means.iter().max_by(|a, b| a.1.total_cmp(&b.1))?;
                Some(CoreSpread {
                    config,
                    fastest_core,
                    fastest_mean_ms,
                    slowest_core,
                    slowest_mean_ms,
                    spread_ms: slowest_mean_ms - fastest_mean_ms,
                })
            })
            .collect()
    }

    /// All per-core breakdowns at once
    #[must_use]
    pub fn core_analysis(
        &self,
        records: &[BenchmarkRecord],
        topology: &CoreTopology,
    ) -> CoreAnalysis {
        CoreAnalysis {
            duration_by_kind: self.duration_by_core_kind(records, topology),
            variance: self.variance_breakdown(records),
            throughput_by_kind: self.throughput_by_core_kind(records, topology),
            p_core_spread: self.p_core_spread(records, topology),
        }
    }
}
