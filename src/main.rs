use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use cachebench_analysis::config::AnalysisConfig;
use cachebench_analysis::pipeline::{Pipeline, RunSummary};
use cachebench_analysis::plot::plot_html::PlotlyRenderer;

#[derive(Parser)]
#[command(
    name = "cachebench-analysis",
    about = "Aggregate cache benchmark logs into load-curve charts",
    version
)]
struct Args {
    /// JSON config file. Built-in defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the benchmark logs (overrides the config).
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Directory charts and exports are written to (overrides the config).
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Increase logging verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors.
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Cache and DB latency from `.log.stats` reports.
    Latency,
    /// CPU, network, disk and RPC usage from run logs.
    Resources,
    /// Sketch tracker accuracy and overhead.
    Tracker,
    /// Latency and resources, plus tracker when its directory exists.
    All,
}

fn init_logging(verbose: u8, quiet: bool) -> Result<()> {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("cachebench_analysis={}", level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet)?;

    let mut config = AnalysisConfig::load(args.config.as_deref()).context("loading config")?;
    if let Some(dir) = args.log_dir {
        config.log_directory = dir;
    }
    if let Some(dir) = args.output_dir {
        config.output_directory = dir;
    }
    config.validate()?;

    let mut renderer = PlotlyRenderer::new(&config.output_directory)
        .with_legend_names(config.benchmark_display_name.clone())
        .with_legend_names(config.sketch_display_name.clone());
    let mut pipeline = Pipeline::new(&config, &mut renderer);

    let mut summaries: Vec<RunSummary> = Vec::new();
    if matches!(args.command, Command::Latency | Command::All) {
        summaries.push(pipeline.run_latency().context("latency analysis")?);
    }
    if matches!(args.command, Command::Resources | Command::All) {
        summaries.push(pipeline.run_resources().context("resource analysis")?);
    }
    match args.command {
        Command::Tracker => summaries.push(pipeline.run_tracker().context("tracker analysis")?),
        Command::All if config.tracker_directory.is_dir() => {
            summaries.push(pipeline.run_tracker().context("tracker analysis")?)
        }
        Command::All => warn!(
            "{} not found, skipping tracker analysis",
            config.tracker_directory.display()
        ),
        _ => {}
    }

    for summary in &summaries {
        summary.print();
    }
    let charts: usize = summaries.iter().map(|s| s.charts.len()).sum();
    info!("done: {} charts in {}", charts, config.output_directory.display());
    Ok(())
}
