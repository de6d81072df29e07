//! `speedbench` binary

use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use speedbench_core::report::{self, ReportStyle};
use speedbench_core::stream::parse_timestamp;
use speedbench_core::{
    parse_perf_output, physical_p_cores, run_build, BenchConfig, CoreTopology, LogProgress,
    ProfilerScope, StatsAggregator, SweepRunner,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("speedbench")
        .version(speedbench_core::VERSION)
        .about("Benchmark sweeps and hardware-counter correlation for SpeedReader")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("run")
                .about("Build, sweep every configuration and write the analysis")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .short('c')
                        .value_parser(value_parser!(PathBuf))
                        .help("TOML sweep file; defaults apply when omitted"),
                )
                .arg(
                    Arg::new("out")
                        .long("out")
                        .short('o')
                        .default_value("results")
                        .value_parser(value_parser!(PathBuf))
                        .help("Output directory"),
                )
                .arg(
                    Arg::new("model")
                        .long("model")
                        .short('m')
                        .action(ArgAction::Append)
                        .help("Model to sweep; repeat for several"),
                )
                .arg(
                    Arg::new("duration")
                        .long("duration")
                        .short('d')
                        .value_parser(value_parser!(f64))
                        .help("Measured seconds per configuration"),
                )
                .arg(
                    Arg::new("warmup")
                        .long("warmup")
                        .short('w')
                        .value_parser(value_parser!(f64))
                        .help("Warmup seconds per configuration"),
                )
                .arg(
                    Arg::new("max-cores")
                        .long("max-cores")
                        .value_parser(value_parser!(usize))
                        .help("Sweep prioritized core sets 1..=N"),
                )
                .arg(
                    Arg::new("skip-build")
                        .long("skip-build")
                        .action(ArgAction::SetTrue)
                        .help("Do not run the build step"),
                )
                .arg(
                    Arg::new("no-profiler")
                        .long("no-profiler")
                        .action(ArgAction::SetTrue)
                        .help("Run without hardware counters"),
                ),
        )
        .subcommand(
            Command::new("cores")
                .about("Print prioritized core sets")
                .arg(
                    Arg::new("max")
                        .long("max")
                        .default_value("8")
                        .value_parser(value_parser!(usize))
                        .help("Largest set size"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
        .subcommand(
            Command::new("parse-perf")
                .about("Convert a saved perf stat CSV into metric samples")
                .arg(
                    Arg::new("file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("perf stat -x , output"),
                )
                .arg(
                    Arg::new("start")
                        .long("start")
                        .required(true)
                        .help("Wall-clock time the profiler started (RFC 3339)"),
                )
                .arg(
                    Arg::new("out")
                        .long("out")
                        .short('o')
                        .value_parser(value_parser!(PathBuf))
                        .help("Write CSV here instead of stdout"),
                ),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("json-logs"));

    let result = match matches.subcommand() {
        Some(("run", args)) => run(args).await,
        Some(("cores", args)) => cores(args),
        Some(("parse-perf", args)) => parse_perf(args),
        _ => Ok(()),
    };

    if let Err(e) = result {
        eprintln!("Fatal: {e:#}");
        std::process::exit(1);
    }
}

fn apply_overrides(config: &mut BenchConfig, args: &ArgMatches) {
    if let Some(models) = args.get_many::<String>("model") {
        config.sweep.models = models.cloned().collect();
    }
    if let Some(&secs) = args.get_one::<f64>("duration") {
        config.benchmark.duration_secs = secs;
    }
    if let Some(&secs) = args.get_one::<f64>("warmup") {
        config.benchmark.warmup_secs = secs;
    }
    if let Some(&max) = args.get_one::<usize>("max-cores") {
        config.sweep.core_sets = None;
        config.sweep.max_cores = max;
    }
    if args.get_flag("no-profiler") {
        config.profiler.scope = ProfilerScope::Disabled;
    }
}

async fn run(args: &ArgMatches) -> Result<()> {
    let mut config = match args.get_one::<PathBuf>("config") {
        Some(path) => BenchConfig::load(path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => BenchConfig::default(),
    };
    apply_overrides(&mut config, args);
    config.validate()?;

    let out_dir = args
        .get_one::<PathBuf>("out")
        .cloned()
        .unwrap_or_else(|| PathBuf::from("results"));
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("creating output directory {}", out_dir.display()))?;
    if config.benchmark.diagnostic_log.is_none() {
        config.benchmark.diagnostic_log = Some(out_dir.join("diagnostics.log"));
    }

    match (&config.build, args.get_flag("skip-build")) {
        (Some(build), false) => run_build(build).await.context("build step")?,
        (Some(_), true) => tracing::info!("build step skipped"),
        (None, _) => {}
    }

    let configs = config.axes().configurations();
    let runner = SweepRunner::new(config.command(), config.sweep_settings())
        .with_profiler(config.profiler.command.clone());
    let mut progress = LogProgress::new(Duration::from_secs(5));

    // Dropping the sweep future kills the benchmark and profiler children.
    let outcome = tokio::select! {
        outcome = runner.run(&configs, &mut progress) => outcome.context("sweep")?,
        _ = tokio::signal::ctrl_c() => bail!("interrupted"),
    };

    let series = config
        .correlator()
        .correlate(&outcome.records, &outcome.samples);
    let aggregator = StatsAggregator::new().with_metric(config.analysis.stats_metric);
    let rows = aggregator.aggregate(&outcome.records, &outcome.samples);
    let analysis = aggregator.core_analysis(&outcome.records, &config.sweep.topology);
    let p_cores = physical_p_cores();
    if let Some(detected) = p_cores {
        if detected != config.sweep.topology.performance.len() {
            tracing::warn!(
                detected,
                configured = config.sweep.topology.performance.len(),
                "host P-core count differs from the configured topology"
            );
        }
    }

    let style = ReportStyle {
        metric: config.analysis.stats_metric,
        ..ReportStyle::default()
    };
    println!("{}", report::render_stats_table(&rows, &style));

    write_outputs(&out_dir, &outcome, &series, &rows, &analysis, p_cores)?;
    tracing::info!(dir = %out_dir.display(), "results written");
    Ok(())
}

fn write_outputs(
    dir: &Path,
    outcome: &speedbench_core::SweepOutcome,
    series: &speedbench_core::CorrelatedSeries,
    rows: &[speedbench_core::ConfigStats],
    analysis: &speedbench_core::CoreAnalysis,
    p_cores: Option<usize>,
) -> Result<()> {
    report::write_file(&dir.join("records.csv"), |w| {
        report::write_records_csv(w, &outcome.records)
    })?;
    report::write_file(&dir.join("samples.csv"), |w| {
        report::write_samples_csv(w, &outcome.samples)
    })?;
    report::write_file(&dir.join("throughput.csv"), |w| {
        report::write_buckets_csv(w, &series.throughput)
    })?;
    report::write_file(&dir.join("metrics.csv"), |w| {
        report::write_buckets_csv(w, &series.metrics)
    })?;
    report::write_file(&dir.join("stats.csv"), |w| report::write_stats_csv(w, rows))?;
    report::write_file(&dir.join("summary.json"), |w| {
        report::write_summary_json(w, rows, analysis, p_cores)
    })?;
    Ok(())
}

fn cores(args: &ArgMatches) -> Result<()> {
    let max = args.get_one::<usize>("max").copied().unwrap_or(8);
    let topology = CoreTopology::default();
    let sets = topology.prioritized_cores(max);

    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&sets)?);
        return Ok(());
    }
    match physical_p_cores() {
        Some(n) => println!("host P-cores: {n}"),
        None => println!("host P-cores: unknown"),
    }
    for set in &sets {
        let kinds: Vec<&str> = set
            .iter()
            .filter_map(|&id| topology.kind_of(id).map(|k| k.label()))
            .collect();
        let ids: Vec<String> = set.iter().map(ToString::to_string).collect();
        println!("{:>2}: [{}]  ({})", set.len(), ids.join(" "), kinds.join(", "));
    }
    Ok(())
}

fn parse_perf(args: &ArgMatches) -> Result<()> {
    let Some(path) = args.get_one::<PathBuf>("file") else {
        bail!("missing perf output file");
    };
    let Some(start) = args.get_one::<String>("start") else {
        bail!("missing --start");
    };
    let start = parse_timestamp(start).map_err(|e| anyhow::anyhow!("--start: {e}"))?;
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;

    let samples = parse_perf_output(&text, start);
    tracing::info!(samples = samples.len(), "parsed profiler output");

    match args.get_one::<PathBuf>("out") {
        Some(out) => report::write_file(out, |w| report::write_samples_csv(w, &samples))?,
        None => report::write_samples_csv(std::io::stdout().lock(), &samples)?,
    }
    Ok(())
}
