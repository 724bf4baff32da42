//! Rendering of aggregated tables as standalone plotly HTML pages.
//!
//! All presentation state (sizes, fonts, markers, legend names) lives here;
//! the aggregation side only hands over [`ColumnarTable`]s.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use itertools::Itertools;
use plotly::common::{Font, Marker, MarkerSymbol, Mode, Position, TextPosition, Title};
use plotly::layout::{Axis, AxisType, BarMode, Layout};
use plotly::{Bar, Plot, Scatter};
use tracing::info;

use crate::data::columnar::{self, ColumnarTable};
use crate::error::{AnalysisError, Result};

pub const NORMALIZED_LOAD_TITLE: &str = "Norm. Offered Load (%)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartKind {
    /// One line per benchmark, normalized throughput on x.
    LoadCurve,
    /// One bar per group, categories on x.
    GroupedBar,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartSpec {
    /// Output file name without extension.
    pub file_stem: String,
    pub kind: ChartKind,
    pub x_title: String,
    pub y_title: String,
    pub log_y: bool,
}

impl ChartSpec {
    /// `<dataset>_Throughput_vs_<metric>` load curve.
    pub fn load_curve(dataset: &str, metric: &str, y_title: &str, log_y: bool) -> Self {
        Self {
            file_stem: format!("{dataset}_Throughput_vs_{metric}"),
            kind: ChartKind::LoadCurve,
            x_title: NORMALIZED_LOAD_TITLE.to_string(),
            y_title: y_title.to_string(),
            log_y,
        }
    }

    pub fn grouped_bar(file_stem: &str, x_title: &str, y_title: &str, log_y: bool) -> Self {
        Self {
            file_stem: file_stem.to_string(),
            kind: ChartKind::GroupedBar,
            x_title: x_title.to_string(),
            y_title: y_title.to_string(),
            log_y,
        }
    }
}

/// Consumer of finished tables.
pub trait ReportRenderer {
    /// Draw one chart. Returns where it was written, if anywhere.
    fn render(&mut self, chart: &ChartSpec, table: &ColumnarTable) -> Result<Option<PathBuf>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlotStyle {
    pub width: usize,
    pub height: usize,
    pub font_size: usize,
    pub label_font_size: usize,
}

impl Default for PlotStyle {
    fn default() -> Self {
        // 5in x 2/3 aspect at 100 px/in
        Self {
            width: 500,
            height: 333,
            font_size: 12,
            label_font_size: 8,
        }
    }
}

fn marker_symbol(i: usize) -> MarkerSymbol {
    match i % 9 {
        0 => MarkerSymbol::Circle,
        1 => MarkerSymbol::Square,
        2 => MarkerSymbol::Diamond,
        3 => MarkerSymbol::TriangleDown,
        4 => MarkerSymbol::TriangleUp,
        5 => MarkerSymbol::Pentagon,
        6 => MarkerSymbol::Star,
        7 => MarkerSymbol::Cross,
        _ => MarkerSymbol::X,
    }
}

pub struct PlotlyRenderer {
    output_dir: PathBuf,
    style: PlotStyle,
    legend_names: BTreeMap<String, String>,
}

impl PlotlyRenderer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            style: PlotStyle::default(),
            legend_names: BTreeMap::new(),
        }
    }

    pub fn with_style(mut self, style: PlotStyle) -> Self {
        self.style = style;
        self
    }

    /// Human labels for benchmark or sketch keys. Unknown keys are shown as is.
    pub fn with_legend_names(mut self, names: BTreeMap<String, String>) -> Self {
        self.legend_names.extend(names);
        self
    }

    fn legend<'a>(&'a self, key: &'a str) -> &'a str {
        self.legend_names.get(key).map(String::as_str).unwrap_or(key)
    }

    fn layout(&self, chart: &ChartSpec) -> Layout {
        let mut y_axis = Axis::new().title(Title::new(&chart.y_title));
        if chart.log_y {
            y_axis = y_axis.type_(AxisType::Log);
        }
        Layout::new()
            .width(self.style.width)
            .height(self.style.height)
            .font(Font::new().size(self.style.font_size))
            .x_axis(Axis::new().title(Title::new(&chart.x_title)))
            .y_axis(y_axis)
            .show_legend(true)
    }

    fn load_curve_plot(&self, chart: &ChartSpec, table: &ColumnarTable) -> Result<Plot> {
        let missing = |col: &str| AnalysisError::Render {
            chart: chart.file_stem.clone(),
            reason: format!("table has no '{col}' column"),
        };
        let benchmarks = table
            .column_str(columnar::BENCHMARK)
            .ok_or_else(|| missing(columnar::BENCHMARK))?;
        let scales = table
            .column_u32(columnar::SCALE)
            .ok_or_else(|| missing(columnar::SCALE))?;
        let xs = table
            .column_f64(columnar::NORMALIZED_THROUGHPUT)
            .ok_or_else(|| missing(columnar::NORMALIZED_THROUGHPUT))?;
        let ys = table
            .column_f64(columnar::METRIC_VALUE)
            .ok_or_else(|| missing(columnar::METRIC_VALUE))?;

        let mut plot = Plot::new();
        let rows = benchmarks.iter().zip(scales).zip(xs.into_iter().zip(ys));
        let curves = rows.group_by(|((benchmark, _), _)| *benchmark);
        for (i, (benchmark, curve)) in curves.into_iter().enumerate() {
            let (labels, points): (Vec<String>, Vec<(f64, f64)>) = curve
                .map(|((_, scale), xy)| (scale.to_string(), xy))
                .unzip();
            let (x, y): (Vec<f64>, Vec<f64>) = points.into_iter().unzip();
            let trace = Scatter::new(x, y)
                .mode(Mode::LinesMarkersText)
                .name(self.legend(benchmark))
                .marker(Marker::new().symbol(marker_symbol(i)))
                .text_array(labels)
                .text_position(Position::TopCenter)
                .text_font(Font::new().size(self.style.label_font_size));
            plot.add_trace(trace);
        }
        plot.set_layout(self.layout(chart));
        Ok(plot)
    }

    fn grouped_bar_plot(&self, chart: &ChartSpec, table: &ColumnarTable) -> Result<Plot> {
        let missing = |col: &str| AnalysisError::Render {
            chart: chart.file_stem.clone(),
            reason: format!("table has no '{col}' column"),
        };
        let categories = table
            .column_str(columnar::CATEGORY)
            .ok_or_else(|| missing(columnar::CATEGORY))?;
        let groups = table
            .column_str(columnar::GROUP)
            .ok_or_else(|| missing(columnar::GROUP))?;
        let values = table
            .column_f64(columnar::VALUE)
            .ok_or_else(|| missing(columnar::VALUE))?;

        let mut plot = Plot::new();
        let rows = groups.iter().zip(categories).zip(values);
        let bars = rows.group_by(|((group, _), _)| *group);
        for (group, bar) in &bars {
            let (x, y): (Vec<String>, Vec<f64>) = bar.map(|((_, c), v)| (c, v)).unzip();
            let text: Vec<String> = y.iter().map(|v| format!("{v:.1}")).collect();
            let trace = Bar::new(x, y)
                .name(self.legend(group))
                .text_array(text)
                .text_position(TextPosition::Outside);
            plot.add_trace(trace);
        }
        plot.set_layout(self.layout(chart).bar_mode(BarMode::Group));
        Ok(plot)
    }

    fn write(&self, chart: &ChartSpec, plot: &Plot) -> Result<PathBuf> {
        fs::create_dir_all(&self.output_dir).map_err(|e| AnalysisError::io(&self.output_dir, e))?;
        let path = self.output_dir.join(format!("{}.html", chart.file_stem));
        fs::write(&path, standalone_html(&chart.file_stem, plot))
            .map_err(|e| AnalysisError::io(&path, e))?;
        Ok(path)
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

impl ReportRenderer for PlotlyRenderer {
    fn render(&mut self, chart: &ChartSpec, table: &ColumnarTable) -> Result<Option<PathBuf>> {
        if table.is_empty() {
            return Ok(None);
        }
        let plot = match chart.kind {
            ChartKind::LoadCurve => self.load_curve_plot(chart, table)?,
            ChartKind::GroupedBar => self.grouped_bar_plot(chart, table)?,
        };
        let path = self.write(chart, &plot)?;
        info!("wrote {}", path.display());
        Ok(Some(path))
    }
}

fn standalone_html(title: &str, plot: &Plot) -> String {
    // already contains <div id="..."> + <script>...</script>
    let plot_html = plot.to_inline_html(None);
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{title}</title>
<script src="https://cdn.plot.ly/plotly-latest.min.js"></script>
</head>
<body>
{plot_html}
</body>
</html>
"#
    )
}
