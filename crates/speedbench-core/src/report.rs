//! Reporting boundary
//!
//! Flattens pipeline output into CSV/JSON files and a plain-text table.
//! Presentation choices live in an explicit [`ReportStyle`] passed by the
//! caller.

use crate::error::{BenchError, Result};
use crate::cores::CoreKind;
use crate::stats::{ConfigStats, CoreAnalysis, CoreKindStats};
use crate::types::{BenchmarkRecord, Configuration, Metric, ProfilerSample, ResampledBucket};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use std::io::Write;
use std::path::Path;

/// Human-readable duration: `42s`, `3m 5s`, `2h 7m`
#[must_use]
pub fn format_duration(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    if seconds < 60.0 {
        format!("{seconds:.0}s")
    } else if seconds < 3600.0 {
        let total = seconds as u64;
        format!("{}m {}s", total / 60, total % 60)
    } else {
        let total = seconds as u64;
        format!("{}h {}m", total / 3600, (total % 3600) / 60)
    }
}

/// Table rendering options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportStyle {
    /// Decimals for throughput, durations and metric averages
    pub value_precision: usize,
    /// Decimals for marginal efficiency
    pub efficiency_precision: usize,
    /// Metric averaged in the stats table
    pub metric: Metric,
}

impl Default for ReportStyle {
    fn default() -> Self {
        Self {
            value_precision: 2,
            efficiency_precision: 3,
            metric: Metric::BandwidthGbps,
        }
    }
}

fn opt(value: Option<f64>, precision: usize) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.precision$}"))
}

/// Plain-text stats table
#[must_use]
pub fn render_stats_table(rows: &[ConfigStats], style: &ReportStyle) -> String {
    let p = style.value_precision;
    let metric_header = format!("avg_{}", style.metric.name());
    let headers = [
        "model",
        "batch",
        "parallelism",
        "records",
        "avg_throughput",
        "avg_duration_ms",
        "std_duration_ms",
        metric_header.as_str(),
        "marginal_eff",
    ];
    let body: Vec<[String; 9]> = rows
        .iter()
        .map(|r| {
            [
                r.config.model.clone(),
                r.config.batch_size.to_string(),
                r.config.parallelism().to_string(),
                r.records.to_string(),
                format!("{:.p$}", r.avg_throughput),
                format!("{:.p$}", r.avg_duration_ms),
                opt(r.std_duration_ms, p),
                opt(r.avg_metric, p),
                opt(r.marginal_efficiency, style.efficiency_precision),
            ]
        })
        .collect();

    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &body {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.len());
        }
    }

    let mut out = String::new();
    render_line(&mut out, headers.iter().copied(), &widths);
    for row in &body {
        render_line(&mut out, row.iter().map(String::as_str), &widths);
    }
    out
}

fn render_line<'a>(out: &mut String, cells: impl Iterator<Item = &'a str>, widths: &[usize]) {
    let rendered: Vec<String> = cells
        .zip(widths.iter().copied())
        .map(|(c, w)| format!("{c:>w$}"))
        .collect();
    let _ = writeln!(out, "{}", rendered.join("  ").trim_end());
}

fn iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[derive(Debug, Serialize)]
struct ConfigColumns<'a> {
    model: &'a str,
    batch_size: u32,
    intra_threads: u32,
    inter_threads: u32,
    cores: String,
    parallelism: usize,
}

impl<'a> From<&'a Configuration> for ConfigColumns<'a> {
    fn from(c: &'a Configuration) -> Self {
        Self {
            model: &c.model,
            batch_size: c.batch_size,
            intra_threads: c.intra_threads,
            inter_threads: c.inter_threads,
            cores: c.cores_label(),
            parallelism: c.parallelism(),
        }
    }
}

#[derive(Debug, Serialize)]
struct StatsRow<'a> {
    #[serde(flatten)]
    config: ConfigColumns<'a>,
    records: usize,
    avg_throughput: f64,
    avg_duration_ms: f64,
    std_duration_ms: Option<f64>,
    avg_metric: Option<f64>,
    marginal_efficiency: Option<f64>,
}

#[derive(Debug, Serialize)]
struct SampleRow {
    timestamp: String,
    bandwidth_gbps: f64,
    memory_bound_pct: f64,
    l1_bound_pct: f64,
    l2_bound_pct: f64,
    l3_bound_pct: f64,
    dram_bound_pct: f64,
    ipc: f64,
}

fn write_rows<W, I>(writer: W, header: &[&str], rows: I) -> Result<()>
where
    W: Write,
    I: IntoIterator<Item = Vec<String>>,
{
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(header)?;
    for row in rows {
        csv.write_record(&row)?;
    }
    csv.flush().map_err(|e| BenchError::io("flushing csv", e))?;
    Ok(())
}

const CONFIG_HEADER: [&str; 6] = [
    "model",
    "batch_size",
    "intra_threads",
    "inter_threads",
    "cores",
    "parallelism",
];

fn config_cells(c: &Configuration) -> Vec<String> {
    let cols = ConfigColumns::from(c);
    vec![
        cols.model.to_string(),
        cols.batch_size.to_string(),
        cols.intra_threads.to_string(),
        cols.inter_threads.to_string(),
        cols.cores,
        cols.parallelism.to_string(),
    ]
}

fn cell(v: Option<f64>) -> String {
    v.map(|v| v.to_string()).unwrap_or_default()
}

/// Records as CSV
pub fn write_records_csv<W: Write>(writer: W, records: &[BenchmarkRecord]) -> Result<()> {
    let header: Vec<&str> = CONFIG_HEADER
        .iter()
        .copied()
        .chain(["core_id", "start_time", "end_time", "duration_ms"])
        .collect();
    write_rows(
        writer,
        &header,
        records.iter().map(|r| {
            let mut row = config_cells(&r.config);
            row.extend([
                r.core_id.map(|c| c.to_string()).unwrap_or_default(),
                iso(r.start_time),
                iso(r.end_time),
                r.duration_ms().to_string(),
            ]);
            row
        }),
    )
}

/// Resampled buckets as CSV
pub fn write_buckets_csv<W: Write>(writer: W, buckets: &[ResampledBucket]) -> Result<()> {
    let header: Vec<&str> = CONFIG_HEADER
        .iter()
        .copied()
        .chain(["series", "time_s", "value"])
        .collect();
    write_rows(
        writer,
        &header,
        buckets.iter().map(|b| {
            let mut row = config_cells(&b.config);
            row.extend([
                b.series.to_string(),
                b.time_offset_secs.to_string(),
                b.value.to_string(),
            ]);
            row
        }),
    )
}

/// Stats rows as CSV
pub fn write_stats_csv<W: Write>(writer: W, rows: &[ConfigStats]) -> Result<()> {
    let header: Vec<&str> = CONFIG_HEADER
        .iter()
        .copied()
        .chain([
            "records",
            "avg_throughput",
            "avg_duration_ms",
            "std_duration_ms",
            "avg_metric",
            "marginal_efficiency",
        ])
        .collect();
    write_rows(
        writer,
        &header,
        rows.iter().map(|r| {
            let mut row = config_cells(&r.config);
            row.extend([
                r.records.to_string(),
                r.avg_throughput.to_string(),
                r.avg_duration_ms.to_string(),
                cell(r.std_duration_ms),
                cell(r.avg_metric),
                cell(r.marginal_efficiency),
            ]);
            row
        }),
    )
}

/// Profiler samples as CSV
pub fn write_samples_csv<W: Write>(writer: W, samples: &[ProfilerSample]) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    for s in samples {
        csv.serialize(SampleRow {
            timestamp: iso(s.timestamp),
            bandwidth_gbps: s.bandwidth_gbps,
            memory_bound_pct: s.memory_bound_pct,
            l1_bound_pct: s.l1_bound_pct,
            l2_bound_pct: s.l2_bound_pct,
            l3_bound_pct: s.l3_bound_pct,
            dram_bound_pct: s.dram_bound_pct,
            ipc: s.ipc,
        })?;
    }
    csv.flush().map_err(|e| BenchError::io("flushing csv", e))?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct VarianceRow<'a> {
    #[serde(flatten)]
    config: ConfigColumns<'a>,
    total_std_ms: f64,
    intra_core_std_ms: f64,
    heterogeneity_std_ms: f64,
    heterogeneity_pct: f64,
    core_mean_min_ms: f64,
    core_mean_max_ms: f64,
    core_mean_spread_ms: f64,
}

#[derive(Debug, Serialize)]
struct KindThroughputRow<'a> {
    #[serde(flatten)]
    config: ConfigColumns<'a>,
    kind: CoreKind,
    throughput: f64,
}

#[derive(Debug, Serialize)]
struct SpreadRow<'a> {
    #[serde(flatten)]
    config: ConfigColumns<'a>,
    fastest_core: usize,
    fastest_mean_ms: f64,
    slowest_core: usize,
    slowest_mean_ms: f64,
    spread_ms: f64,
}

/// JSON summary of stats and every per-core breakdown
///
/// `physical_p_cores` is the host's detected P-core count, if known.
pub fn write_summary_json<W: Write>(
    writer: W,
    rows: &[ConfigStats],
    analysis: &CoreAnalysis,
    physical_p_cores: Option<usize>,
) -> Result<()> {
    #[derive(Serialize)]
    struct Summary<'a> {
        physical_p_cores: Option<usize>,
        configurations: Vec<StatsRow<'a>>,
        core_kinds: &'a [CoreKindStats],
        variance: Vec<VarianceRow<'a>>,
        throughput_by_core_kind: Vec<KindThroughputRow<'a>>,
        p_core_spread: Vec<SpreadRow<'a>>,
    }

    let summary = Summary {
        configurations: rows
            .iter()
            .map(|r| StatsRow {
                config: ConfigColumns::from(&*r.config),
                records: r.records,
                avg_throughput: r.avg_throughput,
                avg_duration_ms: r.avg_duration_ms,
                std_duration_ms: r.std_duration_ms,
                avg_metric: r.avg_metric,
                marginal_efficiency: r.marginal_efficiency,
            })
            .collect(),
        core_kinds: &analysis.duration_by_kind,
        variance: analysis
            .variance
            .iter()
            .map(|v| VarianceRow {
                config: ConfigColumns::from(&*v.config),
                total_std_ms: v.total_std_ms,
                intra_core_std_ms: v.intra_core_std_ms,
                heterogeneity_std_ms: v.heterogeneity_std_ms,
                heterogeneity_pct: v.heterogeneity_pct,
                core_mean_min_ms: v.core_mean_min_ms,
                core_mean_max_ms: v.core_mean_max_ms,
                core_mean_spread_ms: v.core_mean_spread_ms,
            })
            .collect(),
        throughput_by_core_kind: analysis
            .throughput_by_kind
            .iter()
            .map(|t| KindThroughputRow {
                config: ConfigColumns::from(&*t.config),
                kind: t.kind,
                throughput: t.throughput,
            })
            .collect(),
        p_core_spread: analysis
            .p_core_spread
            .iter()
            .map(|p| SpreadRow {
                config: ConfigColumns::from(&*p.config),
                fastest_core: p.fastest_core,
                fastest_mean_ms: p.fastest_mean_ms,
                slowest_core: p.slowest_core,
                slowest_mean_ms: p.slowest_mean_ms,
                spread_ms: p.spread_ms,
            })
            .collect(),
        physical_p_cores,
    };
    serde_json::to_writer_pretty(writer, &summary)?;
    Ok(())
}

/// Serialize into a file, creating parent directories
pub fn write_file<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(std::io::BufWriter<std::fs::File>) -> Result<()>,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| BenchError::file(parent, e))?;
    }
    let file = std::fs::File::create(path).map_err(|e| BenchError::file(path, e))?;
    write(std::io::BufWriter::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{CoreKindThroughput, CoreSpread, VarianceBreakdown};
    use crate::types::SeriesKind;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn stats_row(cores: Vec<usize>, tp: f64, eff: Option<f64>) -> ConfigStats {
        ConfigStats {
            config: Arc::new(Configuration::new("dbnet", cores)),
            records: 10,
            avg_throughput: tp,
            avg_duration_ms: 99.5,
            std_duration_ms: None,
            avg_metric: Some(12.5),
            marginal_efficiency: eff,
        }
    }

    #[test]
    fn durations_are_humanized() {
        assert_eq!(format_duration(0.0), "0s");
        assert_eq!(format_duration(42.4), "42s");
        assert_eq!(format_duration(185.0), "3m 5s");
        assert_eq!(format_duration(7_620.0), "2h 7m");
    }

    #[test]
    fn table_uses_style_precision() {
        let rows = vec![
            stats_row(vec![0], 10.0, None),
            stats_row(vec![0, 2], 15.0, Some(0.5)),
        ];
        let table = render_stats_table(&rows, &ReportStyle::default());
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("marginal_eff"));
        assert!(lines[0].contains("avg_bandwidth_gbps"));
        assert!(lines[1].contains("10.00"));
        assert!(lines[1].trim_end().ends_with('-'));
        assert!(lines[2].contains("0.500"));
        assert!(lines[2].contains("12.50"));

        let coarse = ReportStyle {
            value_precision: 0,
            ..ReportStyle::default()
        };
        assert!(render_stats_table(&rows, &coarse).contains(" 15 "));

        let ipc = ReportStyle {
            metric: Metric::Ipc,
            ..ReportStyle::default()
        };
        assert!(render_stats_table(&rows, &ipc).contains("avg_ipc"));
    }

    #[test]
    fn records_csv_flattens_configuration() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let records = vec![BenchmarkRecord {
            core_id: Some(2),
            start_time: t,
            end_time: t + chrono::Duration::milliseconds(250),
            config: Arc::new(Configuration::new("svtr", vec![0, 2])),
        }];
        let mut out = Vec::new();
        write_records_csv(&mut out, &records).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "model,batch_size,intra_threads,inter_threads,cores,parallelism,core_id,start_time,end_time,duration_ms"
        );
        assert_eq!(
            lines.next().unwrap(),
            "svtr,1,1,1,0 2,2,2,2024-01-01T00:00:00.000000Z,2024-01-01T00:00:00.250000Z,250"
        );
    }

    #[test]
    fn buckets_csv_names_series() {
        let buckets = vec![ResampledBucket {
            config: Arc::new(Configuration::new("dbnet", vec![0])),
            series: SeriesKind::Metric(crate::types::Metric::Ipc),
            time_offset_secs: 1.0,
            value: 1.25,
        }];
        let mut out = Vec::new();
        write_buckets_csv(&mut out, &buckets).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.lines().nth(1).unwrap().ends_with("ipc,1,1.25"));
    }

    #[test]
    fn summary_json_is_parseable() {
        let rows = vec![stats_row(vec![0], 10.0, None)];
        let mut out = Vec::new();
        write_summary_json(&mut out, &rows, &CoreAnalysis::default(), None).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["configurations"][0]["model"], "dbnet");
        assert_eq!(value["configurations"][0]["cores"], "0");
        assert!(value["configurations"][0]["marginal_efficiency"].is_null());
        assert!(value["physical_p_cores"].is_null());
        assert_eq!(value["variance"], serde_json::json!([]));
    }

    #[test]
    fn summary_json_carries_core_breakdowns() {
        let config = Arc::new(Configuration::new("svtr", vec![0, 16]));
        let analysis = CoreAnalysis {
            duration_by_kind: Vec::new(),
            variance: vec![VarianceBreakdown {
                config: Arc::clone(&config),
                total_std_ms: 50.0,
                intra_core_std_ms: 10.0,
                heterogeneity_std_ms: 48.0,
                heterogeneity_pct: 92.2,
                core_mean_min_ms: 100.0,
                core_mean_max_ms: 200.0,
                core_mean_spread_ms: 100.0,
            }],
            throughput_by_kind: vec![CoreKindThroughput {
                config: Arc::clone(&config),
                kind: CoreKind::Efficiency,
                throughput: 4.5,
            }],
            p_core_spread: vec![CoreSpread {
                config: Arc::clone(&config),
                fastest_core: 0,
                fastest_mean_ms: 100.0,
                slowest_core: 0,
                slowest_mean_ms: 100.0,
                spread_ms: 0.0,
            }],
        };
        let mut out = Vec::new();
        write_summary_json(&mut out, &[], &analysis, Some(8)).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();

        assert_eq!(value["physical_p_cores"], 8);
        assert_eq!(value["variance"][0]["cores"], "0 16");
        assert_eq!(value["variance"][0]["heterogeneity_pct"], 92.2);
        assert_eq!(value["throughput_by_core_kind"][0]["kind"], "efficiency");
        assert_eq!(value["throughput_by_core_kind"][0]["parallelism"], 2);
        assert_eq!(value["p_core_spread"][0]["spread_ms"], 0.0);
    }

    #[test]
    fn write_file_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out/stats.csv");
        write_file(&path, |w| write_stats_csv(w, &[])).unwrap();
        assert!(path.exists());
    }
}
