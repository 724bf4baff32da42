use std::collections::{BTreeMap, BTreeSet};

use polars::prelude::{DataFrame, NamedFrom, Series};

use crate::error::Result;
use crate::metrics::aggregate::{normalized_throughput, DatasetGroup, SketchPoint};

pub const BENCHMARK: &str = "benchmark";
pub const SCALE: &str = "scale";
pub const NORMALIZED_THROUGHPUT: &str = "normalized_throughput";
pub const METRIC_VALUE: &str = "metric_value";

pub const CATEGORY: &str = "category";
pub const GROUP: &str = "group";
pub const VALUE: &str = "value";

/// A small polars frame handed to the renderer.
///
/// Load curves carry `benchmark, scale, normalized_throughput, metric_value`,
/// rows grouped by benchmark and ascending by scale within each group.
/// Bar tables carry `category, group, value`.
#[derive(Clone, Debug)]
pub struct ColumnarTable {
    pub df: DataFrame,
}

impl ColumnarTable {
    pub fn new(df: DataFrame) -> Self {
        Self { df }
    }

    /// Load-curve table of one metric over a dataset. `None` when nothing in
    /// the group carries the metric or no positive throughput exists to
    /// normalize against.
    pub fn load_curve(group: &DatasetGroup, metric: &str) -> Result<Option<Self>> {
        let Some(max) = group.max_throughput().filter(|m| *m > 0.0) else {
            return Ok(None);
        };

        let mut benchmarks = Vec::new();
        let mut scales = Vec::new();
        let mut normalized = Vec::new();
        let mut values = Vec::new();
        for series in &group.series {
            for point in &series.points {
                let Some(value) = point.metric(metric) else {
                    continue;
                };
                benchmarks.push(point.benchmark.clone());
                scales.push(point.scale);
                normalized.push(normalized_throughput(point.throughput, max));
                values.push(value);
            }
        }
        if values.is_empty() {
            return Ok(None);
        }

        let df = DataFrame::new(vec![
            Series::new(BENCHMARK, benchmarks),
            Series::new(SCALE, scales),
            Series::new(NORMALIZED_THROUGHPUT, normalized),
            Series::new(METRIC_VALUE, values),
        ])?;
        Ok(Some(Self::new(df)))
    }

    /// Dataset-by-sketch table of one sketch metric. Pairs without a report
    /// are filled with zero.
    pub fn sketch_bars(
        points: &BTreeMap<(String, String), SketchPoint>,
        value: fn(&SketchPoint) -> f64,
    ) -> Result<Option<Self>> {
        if points.is_empty() {
            return Ok(None);
        }
        let datasets: BTreeSet<&str> = points.keys().map(|(d, _)| d.as_str()).collect();
        let sketches: BTreeSet<&str> = points.keys().map(|(_, s)| s.as_str()).collect();

        let mut categories = Vec::new();
        let mut groups = Vec::new();
        let mut values = Vec::new();
        for sketch in &sketches {
            for dataset in &datasets {
                let v = points
                    .get(&(dataset.to_string(), sketch.to_string()))
                    .map(value)
                    .unwrap_or(0.0);
                categories.push(dataset.to_string());
                groups.push(sketch.to_string());
                values.push(v);
            }
        }

        let df = DataFrame::new(vec![
            Series::new(CATEGORY, categories),
            Series::new(GROUP, groups),
            Series::new(VALUE, values),
        ])?;
        Ok(Some(Self::new(df)))
    }

    /// Extract a column as Vec<f64>
    pub fn column_f64(&self, col: &str) -> Option<Vec<f64>> {
        self.df.column(col).ok()?.f64().ok().map(|s| s.into_no_null_iter().collect())
    }

    pub fn column_u32(&self, col: &str) -> Option<Vec<u32>> {
        self.df.column(col).ok()?.u32().ok().map(|s| s.into_no_null_iter().collect())
    }

    pub fn column_str(&self, col: &str) -> Option<Vec<String>> {
        self.df
            .column(col)
            .ok()?
            .utf8()
            .ok()
            .map(|s| s.into_no_null_iter().map(str::to_string).collect())
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.df.height()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::index::CoordinateKey;
    use crate::metrics::aggregate::{by_dataset, group_and_sort, names, AggregatedPoint};

    fn point(benchmark: &str, scale: u32, throughput: f64, latency: Option<f64>) -> AggregatedPoint {
        let key = CoordinateKey::new(benchmark, "Tencent", scale);
        AggregatedPoint {
            benchmark: key.benchmark,
            dataset: key.dataset,
            scale: key.scale,
            throughput,
            metrics: latency
                .map(|l| (names::CACHE_LATENCY.to_string(), l))
                .into_iter()
                .collect(),
        }
    }

    #[test]
    fn load_curve_is_sorted_and_normalized() {
        let groups = by_dataset(group_and_sort(vec![
            point("ttl_bench", 30, 400.0, Some(3.0)),
            point("ttl_bench", 10, 100.0, Some(1.0)),
            point("update_bench", 10, 800.0, Some(0.5)),
            point("update_bench", 20, 200.0, None),
        ]));

        let table = ColumnarTable::load_curve(&groups[0], names::CACHE_LATENCY)
            .unwrap()
            .unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(
            table.column_str(BENCHMARK).unwrap(),
            vec!["ttl_bench", "ttl_bench", "update_bench"]
        );
        assert_eq!(table.column_u32(SCALE).unwrap(), vec![10, 30, 10]);
        assert_eq!(
            table.column_f64(NORMALIZED_THROUGHPUT).unwrap(),
            vec![12.5, 50.0, 100.0]
        );
        assert_eq!(table.column_f64(METRIC_VALUE).unwrap(), vec![1.0, 3.0, 0.5]);
    }

    #[test]
    fn missing_metric_gives_no_table() {
        let groups = by_dataset(group_and_sort(vec![point("ttl_bench", 1, 10.0, None)]));
        assert!(ColumnarTable::load_curve(&groups[0], names::CACHE_LATENCY)
            .unwrap()
            .is_none());
    }

    #[test]
    fn zero_throughput_group_is_not_normalized() {
        let groups = by_dataset(group_and_sort(vec![point("ttl_bench", 1, 0.0, Some(1.0))]));
        assert!(ColumnarTable::load_curve(&groups[0], names::CACHE_LATENCY)
            .unwrap()
            .is_none());
    }

    #[test]
    fn sketch_bars_fill_missing_pairs_with_zero() {
        let sketch = |dataset: &str, sketch: &str, rate: f64| SketchPoint {
            dataset: dataset.into(),
            sketch: sketch.into(),
            total_requests: 1,
            pred_rate_pct: rate,
            storage_saving: 1.0,
            write_us: 1.0,
            read_us: 1.0,
            get_ew_us: 1.0,
        };
        let mut points = BTreeMap::new();
        for p in [sketch("IBM", "ExactRW", 90.0), sketch("Meta", "MinSketch", 70.0)] {
            points.insert((p.dataset.clone(), p.sketch.clone()), p);
        }

        let table = ColumnarTable::sketch_bars(&points, |p| p.pred_rate_pct)
            .unwrap()
            .unwrap();
        assert_eq!(
            table.column_str(CATEGORY).unwrap(),
            vec!["IBM", "Meta", "IBM", "Meta"]
        );
        assert_eq!(
            table.column_str(GROUP).unwrap(),
            vec!["ExactRW", "ExactRW", "MinSketch", "MinSketch"]
        );
        assert_eq!(table.column_f64(VALUE).unwrap(), vec![90.0, 0.0, 0.0, 70.0]);
    }
}
