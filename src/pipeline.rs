//! End-to-end analysis runs.
//!
//! Each run scans the log directory once, keeps the newest file per requested
//! coordinate, extracts and aggregates on the rayon pool and hands one table
//! per (dataset, metric) to the renderer. Per-coordinate failures are
//! collected in the [`RunSummary`]; only IO on directories and outputs aborts.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;

use comfy_table::{presets::UTF8_FULL, Table};
use itertools::{iproduct, Itertools};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::AnalysisConfig;
use crate::data::columnar::ColumnarTable;
use crate::data::index::{scan_sketch_reports, CoordinateKey, FilenameGrammar, LogIndex};
use crate::data::loader::load_parallel;
use crate::error::{AggregateError, AnalysisError, ExtractError, Result};
use crate::metrics::aggregate::{
    aggregate_latency, aggregate_resources, aggregate_sketch, by_dataset, group_and_sort, names,
    AggregatedPoint, SketchPoint,
};
use crate::metrics::schema::{self, Schema};
use crate::plot::plot_html::{ChartSpec, ReportRenderer};

/// One load-curve chart drawn for every dataset.
#[derive(Debug, Clone, Copy)]
pub struct MetricChart {
    pub metric: &'static str,
    pub y_title: &'static str,
    pub log_y: bool,
}

pub const LATENCY_CHARTS: &[MetricChart] = &[
    MetricChart {
        metric: names::CACHE_LATENCY,
        y_title: "Read Latency (ms)",
        log_y: false,
    },
    MetricChart {
        metric: names::DB_LATENCY,
        y_title: "Write Latency (ms)",
        log_y: false,
    },
];

pub const RESOURCE_CHARTS: &[MetricChart] = &[
    MetricChart {
        metric: names::CPU,
        y_title: "Avg. CPU Util. (%)",
        log_y: false,
    },
    MetricChart {
        metric: names::NETWORK,
        y_title: "Avg. NW Usage (MB/s)",
        log_y: false,
    },
    MetricChart {
        metric: names::DISK,
        y_title: "Avg. Disk Usage (MB/s)",
        log_y: false,
    },
    MetricChart {
        metric: names::DB_RPCS,
        y_title: "# ongoing RPCs (to DB)",
        log_y: false,
    },
    MetricChart {
        metric: names::CACHE_RPCS,
        y_title: "# ongoing RPCs (to cache)",
        log_y: true,
    },
];

/// Grouped bar chart over the sketch tracker reports.
#[derive(Clone, Copy)]
pub struct SketchChart {
    pub file_stem: &'static str,
    pub y_title: &'static str,
    pub log_y: bool,
    pub value: fn(&SketchPoint) -> f64,
}

pub const SKETCH_CHARTS: &[SketchChart] = &[
    SketchChart {
        file_stem: "tracker_pred_rate_multiple_sketches",
        y_title: "Accuracy Rate (%)",
        log_y: false,
        value: |p| p.pred_rate_pct,
    },
    SketchChart {
        file_stem: "tracker_storage_saving_multiple_sketches",
        y_title: "Storage Saving (x)",
        log_y: true,
        value: |p| p.storage_saving,
    },
    SketchChart {
        file_stem: "tracker_benchmark_write_time_multiple_sketches",
        y_title: "Overhead (us/req)",
        log_y: true,
        value: |p| p.write_us,
    },
    SketchChart {
        file_stem: "tracker_benchmark_read_time_multiple_sketches",
        y_title: "Overhead (us/req)",
        log_y: true,
        value: |p| p.read_us,
    },
    SketchChart {
        file_stem: "tracker_benchmark_ew_time_multiple_sketches",
        y_title: "Overhead (us/req)",
        log_y: true,
        value: |p| p.get_ew_us,
    },
];

const SKETCH_X_TITLE: &str = "Workloads";

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// No file for the coordinate, or it vanished before it was read.
    MissingFile,
    Extract(ExtractError),
    Aggregate(AggregateError),
}

impl SkipReason {
    fn label(&self) -> &'static str {
        match self {
            SkipReason::MissingFile => "missing file",
            SkipReason::Extract(ExtractError::NoMatch { .. }) => "no match",
            SkipReason::Extract(ExtractError::MalformedNumber { .. }) => "malformed number",
            SkipReason::Aggregate(AggregateError::EmptySeries) => "empty series",
            SkipReason::Aggregate(AggregateError::DegenerateRun(_)) => "degenerate run",
            SkipReason::Aggregate(AggregateError::MissingField(_)) => "missing field",
            SkipReason::Aggregate(AggregateError::UnknownDataset(_)) => "unknown dataset",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MissingFile => f.write_str("missing file"),
            SkipReason::Extract(e) => write!(f, "{e}"),
            SkipReason::Aggregate(e) => write!(f, "{e}"),
        }
    }
}

impl From<ExtractError> for SkipReason {
    fn from(e: ExtractError) -> Self {
        SkipReason::Extract(e)
    }
}

impl From<AggregateError> for SkipReason {
    fn from(e: AggregateError) -> Self {
        SkipReason::Aggregate(e)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Skipped {
    /// Coordinate key or report file name.
    pub item: String,
    pub reason: SkipReason,
}

/// What one analysis produced.
#[derive(Debug)]
pub struct RunSummary {
    pub analysis: &'static str,
    pub points: usize,
    pub charts: Vec<PathBuf>,
    pub export: Option<PathBuf>,
    pub skipped: Vec<Skipped>,
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl RunSummary {
    fn new(analysis: &'static str) -> Self {
        Self {
            analysis,
            points: 0,
            charts: Vec::new(),
            export: None,
            skipped: Vec::new(),
            header: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn table(&self) -> Table {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(self.header.clone());
        for row in &self.rows {
            table.add_row(row.clone());
        }
        table
    }

    fn skip(&mut self, item: impl ToString, reason: SkipReason) {
        let item = item.to_string();
        match &reason {
            SkipReason::MissingFile => debug!("{item}: no log file"),
            SkipReason::Extract(ExtractError::NoMatch { .. }) => debug!("{item}: {reason}"),
            SkipReason::Extract(ExtractError::MalformedNumber { .. }) => error!("{item}: {reason}"),
            SkipReason::Aggregate(_) => warn!("{item}: {reason}"),
        }
        self.skipped.push(Skipped { item, reason });
    }

    /// Skip counts per reason, in a stable order.
    pub fn skip_counts(&self) -> BTreeMap<&'static str, usize> {
        self.skipped.iter().map(|s| s.reason.label()).counts().into_iter().collect()
    }

    pub fn skipped_with(&self, label: &str) -> impl Iterator<Item = &Skipped> + '_ {
        let label = label.to_string();
        self.skipped.iter().filter(move |s| s.reason.label() == label)
    }

    /// Print the point table and the skip report to stdout.
    pub fn print(&self) {
        println!("== {} ({} points) ==", self.analysis, self.points);
        if !self.rows.is_empty() {
            println!("{}", self.table());
        }
        for chart in &self.charts {
            println!("chart  {}", chart.display());
        }
        if let Some(export) = &self.export {
            println!("export {}", export.display());
        }
        if self.skipped.is_empty() {
            return;
        }
        let counts = self.skip_counts();
        println!(
            "skipped {}: {}",
            self.skipped.len(),
            counts.iter().map(|(k, v)| format!("{k} {v}")).join(", ")
        );
        // missing coordinates are expected in sparse sweeps; list the rest
        for s in self.skipped.iter().filter(|s| s.reason != SkipReason::MissingFile) {
            println!("  {}: {}", s.item, s.reason);
        }
    }
}

pub struct Pipeline<'a, R: ReportRenderer> {
    config: &'a AnalysisConfig,
    renderer: &'a mut R,
}

impl<'a, R: ReportRenderer> Pipeline<'a, R> {
    pub fn new(config: &'a AnalysisConfig, renderer: &'a mut R) -> Self {
        Self { config, renderer }
    }

    /// Every (benchmark, dataset, scale) the config asks for, dataset-major.
    pub fn requested(&self) -> Vec<CoordinateKey> {
        let scales: Vec<u32> = self.config.scales.iter().collect();
        iproduct!(&self.config.datasets, &self.config.benchmarks, &scales)
            .map(|(dataset, benchmark, scale)| CoordinateKey::new(benchmark, dataset, *scale))
            .collect()
    }

    /// Cache/DB latency vs. normalized load, from `.log.stats` reports.
    pub fn run_latency(&mut self) -> Result<RunSummary> {
        let grammar = FilenameGrammar::new(&self.config.stats_suffix)?;
        let schema = Schema::compile(schema::latency_report())?;
        let statistic = self.config.latency_statistic;

        let mut summary = RunSummary::new("latency");
        let points = self.collect_points(&grammar, &mut summary, |key, text| {
            let record = schema.extract(text)?;
            Ok(aggregate_latency(key, &record, statistic)?)
        })?;
        self.finish_load_curves(&mut summary, points, LATENCY_CHARTS)?;
        Ok(summary)
    }

    /// Trimmed resource usage vs. normalized load, from per-run tracker logs.
    pub fn run_resources(&mut self) -> Result<RunSummary> {
        let grammar = FilenameGrammar::new(&self.config.run_log_suffix)?;
        let schema = Schema::compile(schema::resource_sample())?;
        let config = self.config;

        let mut summary = RunSummary::new("resources");
        let points = self.collect_points(&grammar, &mut summary, |key, text| {
            let total = *config
                .dataset_to_total_requests
                .get(&key.dataset)
                .ok_or_else(|| AggregateError::UnknownDataset(key.dataset.clone()))?;
            let extraction = schema.extract_lines(text);
            if extraction.unmatched > 0 {
                debug!("{key}: {} lines did not match", extraction.unmatched);
            }
            Ok(aggregate_resources(
                key,
                &extraction.series,
                total,
                &config.trim,
                config.rpc_floor,
            )?)
        })?;
        self.finish_load_curves(&mut summary, points, RESOURCE_CHARTS)?;
        Ok(summary)
    }

    /// Accuracy and overhead of the sketch trackers, as grouped bars.
    pub fn run_tracker(&mut self) -> Result<RunSummary> {
        let schema = Schema::compile(schema::sketch_report())?;
        let reports = scan_sketch_reports(&self.config.tracker_directory)?;
        info!(
            "found {} sketch reports in {}",
            reports.len(),
            self.config.tracker_directory.display()
        );

        let mut summary = RunSummary::new("tracker");
        let loaded = load_parallel(reports, |report, text| -> Result<SketchPoint, SkipReason> {
            let record = schema.extract(text)?;
            Ok(aggregate_sketch(report, &record)?)
        })?;

        let mut points = BTreeMap::new();
        for (report, outcome) in loaded {
            match outcome {
                Some(Ok(point)) => {
                    points.insert((point.dataset.clone(), point.sketch.clone()), point);
                }
                Some(Err(reason)) => summary.skip(report.path.display(), reason),
                None => summary.skip(report.path.display(), SkipReason::MissingFile),
            }
        }
        summary.points = points.len();

        summary.header = [
            "dataset", "sketch", "requests", "pred rate (%)", "saving (x)", "write (us)",
            "read (us)", "ew (us)",
        ]
        .map(String::from)
        .to_vec();
        for p in points.values() {
            summary.rows.push(vec![
                p.dataset.clone(),
                self.config.sketch_label(&p.sketch).to_string(),
                p.total_requests.to_string(),
                format!("{:.2}", p.pred_rate_pct),
                format!("{:.2}", p.storage_saving),
                format!("{:.3}", p.write_us),
                format!("{:.3}", p.read_us),
                format!("{:.3}", p.get_ew_us),
            ]);
        }

        let exported: Vec<&SketchPoint> = points.values().collect();
        summary.export = Some(self.export(summary.analysis, &exported)?);

        for chart in SKETCH_CHARTS {
            let Some(table) = ColumnarTable::sketch_bars(&points, chart.value)? else {
                continue;
            };
            let spec =
                ChartSpec::grouped_bar(chart.file_stem, SKETCH_X_TITLE, chart.y_title, chart.log_y);
            if let Some(path) = self.renderer.render(&spec, &table)? {
                summary.charts.push(path);
            }
        }
        Ok(summary)
    }

    /// Scan, select, then load and aggregate chosen logs in parallel.
    fn collect_points<F>(
        &self,
        grammar: &FilenameGrammar,
        summary: &mut RunSummary,
        aggregate: F,
    ) -> Result<Vec<AggregatedPoint>>
    where
        F: Fn(&CoordinateKey, &str) -> Result<AggregatedPoint, SkipReason> + Sync,
    {
        let index = LogIndex::scan(&self.config.log_directory, grammar)?;
        let selection = index.select(self.requested());
        info!(
            "{}: {} of {} requested coordinates have a *.{} log",
            summary.analysis,
            selection.chosen.len(),
            selection.chosen.len() + selection.missing.len(),
            grammar.suffix()
        );
        for key in selection.missing {
            summary.skip(key, SkipReason::MissingFile);
        }

        let loaded = load_parallel(selection.chosen, |file, text| aggregate(file.key(), text))?;
        let mut points = Vec::with_capacity(loaded.len());
        for (file, outcome) in loaded {
            match outcome {
                Some(Ok(point)) => points.push(point),
                Some(Err(reason)) => summary.skip(file.file_name(), reason),
                None => summary.skip(file.key(), SkipReason::MissingFile),
            }
        }
        Ok(points)
    }

    fn finish_load_curves(
        &mut self,
        summary: &mut RunSummary,
        points: Vec<AggregatedPoint>,
        charts: &[MetricChart],
    ) -> Result<()> {
        summary.points = points.len();
        summary.export = Some(self.export(summary.analysis, &points)?);

        let metrics: Vec<&str> = charts.iter().map(|c| c.metric).collect();
        summary.header = ["benchmark", "dataset", "scale", "throughput (req/s)"]
            .iter()
            .chain(&metrics)
            .map(|h| h.to_string())
            .collect();

        let groups = by_dataset(group_and_sort(points));
        for group in &groups {
            for point in group.series.iter().flat_map(|s| &s.points) {
                let mut row = vec![
                    self.config.benchmark_label(&point.benchmark).to_string(),
                    point.dataset.clone(),
                    point.scale.to_string(),
                    format!("{:.1}", point.throughput),
                ];
                row.extend(metrics.iter().map(|m| {
                    point
                        .metric(m)
                        .map(|v| format!("{v:.3}"))
                        .unwrap_or_else(|| "-".to_string())
                }));
                summary.rows.push(row);
            }
        }

        for group in &groups {
            if group.max_throughput().map_or(true, |max| max <= 0.0) {
                warn!("{}: no positive throughput, nothing to plot", group.dataset);
                continue;
            }
            for chart in charts {
                let Some(table) = ColumnarTable::load_curve(group, chart.metric)? else {
                    debug!("{}: no points carry '{}'", group.dataset, chart.metric);
                    continue;
                };
                let spec =
                    ChartSpec::load_curve(&group.dataset, chart.metric, chart.y_title, chart.log_y);
                if let Some(path) = self.renderer.render(&spec, &table)? {
                    summary.charts.push(path);
                }
            }
        }
        Ok(())
    }

    fn export<T: Serialize>(&self, analysis: &str, points: &[T]) -> Result<PathBuf> {
        let dir = &self.config.output_directory;
        fs::create_dir_all(dir).map_err(|e| AnalysisError::io(dir, e))?;
        let path = dir.join(format!("{analysis}_points.json"));
        let json = serde_json::to_string_pretty(points)?;
        fs::write(&path, json).map_err(|e| AnalysisError::io(&path, e))?;
        Ok(path)
    }
}
