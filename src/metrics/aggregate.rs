//! Turning extracted records into plot points.

use std::collections::{BTreeMap, HashMap};

use ordered_float::OrderedFloat;
use serde::Serialize;

use crate::config::{LatencyStatistic, TrimPolicy};
use crate::data::index::{CoordinateKey, SketchReport};
use crate::error::AggregateError;
use crate::metrics::schema::{fields, MetricRecord, SampleSeries};

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// Metric column names shared by the aggregator, the tables and the charts.
pub mod names {
    pub const CACHE_LATENCY: &str = "Cache Latency";
    pub const DB_LATENCY: &str = "DB Latency";
    pub const END_TO_END_LATENCY: &str = "End-to-End Latency";
    pub const CPU: &str = "CPU";
    pub const NETWORK: &str = "NW";
    pub const DISK: &str = "Disk";
    pub const DB_RPCS: &str = "db_current_rpcs";
    pub const CACHE_RPCS: &str = "cache_current_rpcs";
}

/// One row per surviving coordinate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedPoint {
    pub benchmark: String,
    pub dataset: String,
    pub scale: u32,
    /// Requests per second.
    pub throughput: f64,
    pub metrics: BTreeMap<String, f64>,
}

impl AggregatedPoint {
    fn new(key: &CoordinateKey, throughput: f64) -> Self {
        Self {
            benchmark: key.benchmark.clone(),
            dataset: key.dataset.clone(),
            scale: key.scale,
            throughput,
            metrics: BTreeMap::new(),
        }
    }

    fn with(mut self, name: &str, value: f64) -> Self {
        self.metrics.insert(name.to_string(), value);
        self
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    pub fn series_key(&self) -> SeriesKey {
        SeriesKey {
            benchmark: self.benchmark.clone(),
            dataset: self.dataset.clone(),
        }
    }
}

/// `num_operations / seconds`, or `None` when the run took no time.
pub fn throughput_from_latency(num_operations: u64, end_to_end_ms: f64) -> Option<f64> {
    if !(end_to_end_ms.is_finite() && end_to_end_ms > 0.0) {
        return None;
    }
    Some(num_operations as f64 / (end_to_end_ms / 1000.0))
}

/// Point for a `.log.stats` report. Cache and DB latencies are reported in
/// microseconds and plotted in milliseconds.
pub fn aggregate_latency(
    key: &CoordinateKey,
    record: &MetricRecord,
    statistic: LatencyStatistic,
) -> Result<AggregatedPoint, AggregateError> {
    let (cache_field, db_field) = match statistic {
        LatencyStatistic::Average => (fields::AVG_CACHE_LATENCY_US, fields::AVG_DB_LATENCY_US),
        LatencyStatistic::Median => (
            fields::MEDIAN_CACHE_LATENCY_US,
            fields::MEDIAN_DB_LATENCY_US,
        ),
    };
    let require = |name: &str| {
        record
            .float(name)
            .ok_or_else(|| AggregateError::MissingField(name.to_string()))
    };
    let cache_us = require(cache_field)?;
    let db_us = require(db_field)?;
    let end_to_end_ms = require(fields::END_TO_END_LATENCY_MS)?;
    let operations = record
        .integer(fields::NUM_OPERATIONS)
        .ok_or_else(|| AggregateError::MissingField(fields::NUM_OPERATIONS.to_string()))?;

    let throughput = throughput_from_latency(operations, end_to_end_ms).ok_or_else(|| {
        AggregateError::DegenerateRun(format!("end-to-end latency {end_to_end_ms} ms"))
    })?;

    Ok(AggregatedPoint::new(key, throughput)
        .with(names::CACHE_LATENCY, cache_us / 1000.0)
        .with(names::DB_LATENCY, db_us / 1000.0)
        .with(names::END_TO_END_LATENCY, end_to_end_ms))
}

/// Mean of `values` after dropping the configured edge samples. Falls back to
/// the full slice when too little would survive. `None` only for no input.
pub fn trimmed_mean(values: &[f64], policy: &TrimPolicy) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let end = values.len().saturating_sub(policy.trailing);
    let window = if policy.leading < end && end - policy.leading >= policy.min_window {
        &values[policy.leading..end]
    } else {
        values
    };
    Some(window.iter().sum::<f64>() / window.len() as f64)
}

fn combined_mib(series: &SampleSeries, a: &str, b: &str) -> Vec<f64> {
    series
        .samples()
        .iter()
        .filter_map(|s| Some((s.float(a)? + s.float(b)?) / BYTES_PER_MIB))
        .collect()
}

/// Point for a resource tracker log.
///
/// Throughput is the dataset's fixed request count over the wall time between
/// the first and last sample. Edge trimming only applies to the averaged
/// magnitudes, never to the elapsed time.
pub fn aggregate_resources(
    key: &CoordinateKey,
    series: &SampleSeries,
    total_requests: u64,
    trim: &TrimPolicy,
    rpc_floor: f64,
) -> Result<AggregatedPoint, AggregateError> {
    let (Some(first), Some(last)) = (
        series.first_timestamp(fields::TIMESTAMP),
        series.last_timestamp(fields::TIMESTAMP),
    ) else {
        return Err(AggregateError::EmptySeries);
    };

    let elapsed = (last - first).num_milliseconds() as f64 / 1000.0;
    if elapsed <= 0.0 {
        return Err(AggregateError::DegenerateRun(format!(
            "{} samples spanning {elapsed}s",
            series.len()
        )));
    }
    let throughput = total_requests as f64 / elapsed;

    let mean = |values: Vec<f64>| trimmed_mean(&values, trim).ok_or(AggregateError::EmptySeries);
    let cpu = mean(series.column(fields::CPU_PCT))?;
    let network = mean(combined_mib(
        series,
        fields::NET_RECV_BYTES,
        fields::NET_SEND_BYTES,
    ))?;
    let disk = mean(combined_mib(
        series,
        fields::DISK_READ_BYTES,
        fields::DISK_WRITE_BYTES,
    ))?;
    let db_rpcs = mean(series.column(fields::DB_RPCS))?.max(rpc_floor);
    let cache_rpcs = mean(series.column(fields::CACHE_RPCS))?.max(rpc_floor);

    Ok(AggregatedPoint::new(key, throughput)
        .with(names::CPU, cpu)
        .with(names::NETWORK, network)
        .with(names::DISK, disk)
        .with(names::DB_RPCS, db_rpcs)
        .with(names::CACHE_RPCS, cache_rpcs))
}

/// Tracker accuracy and overhead for one (dataset, sketch) report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SketchPoint {
    pub dataset: String,
    pub sketch: String,
    pub total_requests: u64,
    /// Percent of correct predictions.
    pub pred_rate_pct: f64,
    pub storage_saving: f64,
    /// Per-request overheads in microseconds.
    pub write_us: f64,
    pub read_us: f64,
    pub get_ew_us: f64,
}

pub fn aggregate_sketch(
    report: &SketchReport,
    record: &MetricRecord,
) -> Result<SketchPoint, AggregateError> {
    let require = |name: &str| {
        record
            .float(name)
            .ok_or_else(|| AggregateError::MissingField(name.to_string()))
    };
    Ok(SketchPoint {
        dataset: report.dataset.clone(),
        sketch: report.sketch.clone(),
        total_requests: record
            .integer(fields::TOTAL_REQUESTS)
            .ok_or_else(|| AggregateError::MissingField(fields::TOTAL_REQUESTS.to_string()))?,
        pred_rate_pct: require(fields::CORRECT_PRED_RATE)? * 100.0,
        storage_saving: require(fields::STORAGE_SERVING)?,
        write_us: require(fields::AVG_WRITE_LATENCY)? * 1000.0,
        read_us: require(fields::AVG_READ_LATENCY)? * 1000.0,
        get_ew_us: require(fields::AVG_GET_EW_LATENCY)? * 1000.0,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesKey {
    pub benchmark: String,
    pub dataset: String,
}

/// Points of one benchmark on one dataset, ascending by scale.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub key: SeriesKey,
    pub points: Vec<AggregatedPoint>,
}

/// Bucket points by `(benchmark, dataset)` and sort each bucket by scale.
///
/// Buckets come out in the order their first point was seen. The sort is
/// stable and duplicates are kept.
pub fn group_and_sort(points: Vec<AggregatedPoint>) -> Vec<Series> {
    let mut slots: HashMap<SeriesKey, usize> = HashMap::new();
    let mut out: Vec<Series> = Vec::new();
    for point in points {
        let key = point.series_key();
        let slot = *slots.entry(key.clone()).or_insert_with(|| {
            out.push(Series {
                key,
                points: Vec::new(),
            });
            out.len() - 1
        });
        out[slot].points.push(point);
    }
    for series in &mut out {
        series.points.sort_by_key(|p| p.scale);
    }
    out
}

/// Every series of one dataset, sharing one throughput maximum.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetGroup {
    pub dataset: String,
    pub series: Vec<Series>,
}

impl DatasetGroup {
    /// Highest finite throughput across all benchmarks of the dataset.
    pub fn max_throughput(&self) -> Option<f64> {
        self.series
            .iter()
            .flat_map(|s| &s.points)
            .map(|p| p.throughput)
            .filter(|t| t.is_finite())
            .map(OrderedFloat)
            .max()
            .map(|t| t.into_inner())
    }

    pub fn is_empty(&self) -> bool {
        self.series.iter().all(|s| s.points.is_empty())
    }
}

pub fn by_dataset(series: Vec<Series>) -> Vec<DatasetGroup> {
    let mut out: Vec<DatasetGroup> = Vec::new();
    for s in series {
        match out.iter_mut().find(|g| g.dataset == s.key.dataset) {
            Some(group) => group.series.push(s),
            None => out.push(DatasetGroup {
                dataset: s.key.dataset.clone(),
                series: vec![s],
            }),
        }
    }
    out
}

/// Throughput as a percentage of the dataset maximum.
pub fn normalized_throughput(throughput: f64, max_throughput: f64) -> f64 {
    throughput / max_throughput * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::schema::MetricValue;
    use chrono::{Duration, NaiveDate};

    fn key(benchmark: &str, scale: u32) -> CoordinateKey {
        CoordinateKey::new(benchmark, "IBM", scale)
    }

    fn point(benchmark: &str, dataset: &str, scale: u32, throughput: f64) -> AggregatedPoint {
        AggregatedPoint::new(&CoordinateKey::new(benchmark, dataset, scale), throughput)
    }

    fn latency_record(e2e_ms: f64, ops: u64) -> MetricRecord {
        let mut r = MetricRecord::default();
        r.insert(fields::AVG_CACHE_LATENCY_US, MetricValue::Float(900.0));
        r.insert(fields::AVG_DB_LATENCY_US, MetricValue::Float(3000.0));
        r.insert(fields::MEDIAN_CACHE_LATENCY_US, MetricValue::Float(500.0));
        r.insert(fields::MEDIAN_DB_LATENCY_US, MetricValue::Float(2500.0));
        r.insert(fields::END_TO_END_LATENCY_MS, MetricValue::Float(e2e_ms));
        r.insert(fields::NUM_OPERATIONS, MetricValue::Integer(ops));
        r
    }

    fn resource_series(cpu: &[f64]) -> SampleSeries {
        let start = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        let samples = cpu
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                let mut r = MetricRecord::default();
                r.insert(
                    fields::TIMESTAMP,
                    MetricValue::Timestamp(start + Duration::seconds(i as i64)),
                );
                r.insert(fields::CPU_PCT, MetricValue::Float(c));
                r.insert(fields::NET_RECV_BYTES, MetricValue::Integer(1024 * 1024));
                r.insert(fields::NET_SEND_BYTES, MetricValue::Integer(1024 * 1024));
                r.insert(fields::DISK_READ_BYTES, MetricValue::Integer(0));
                r.insert(fields::DISK_WRITE_BYTES, MetricValue::Integer(512 * 1024));
                r.insert(fields::DB_RPCS, MetricValue::Integer(0));
                r.insert(fields::CACHE_RPCS, MetricValue::Integer(8));
                r
            })
            .collect();
        SampleSeries::new(samples)
    }

    #[test]
    fn throughput_is_operations_per_second() {
        assert_eq!(throughput_from_latency(5000, 1000.0), Some(5000.0));
        assert_eq!(throughput_from_latency(5000, 0.0), None);
    }

    #[test]
    fn latency_point_uses_median_in_milliseconds() {
        let p = aggregate_latency(&key("ttl_bench", 10), &latency_record(1000.0, 5000), LatencyStatistic::Median)
            .unwrap();
        assert_eq!(p.throughput, 5000.0);
        assert_eq!(p.metric(names::CACHE_LATENCY), Some(0.5));
        assert_eq!(p.metric(names::DB_LATENCY), Some(2.5));
        assert_eq!(p.metric(names::END_TO_END_LATENCY), Some(1000.0));

        let avg = aggregate_latency(&key("ttl_bench", 10), &latency_record(1000.0, 5000), LatencyStatistic::Average)
            .unwrap();
        assert_eq!(avg.metric(names::CACHE_LATENCY), Some(0.9));
    }

    #[test]
    fn zero_duration_report_is_degenerate() {
        let err = aggregate_latency(&key("ttl_bench", 10), &latency_record(0.0, 10), LatencyStatistic::Median)
            .unwrap_err();
        assert!(matches!(err, AggregateError::DegenerateRun(_)));
    }

    #[test]
    fn trimmed_mean_drops_two_samples_each_side() {
        let values = [10.0, 1.0, 1.0, 1.0, 5.0, 1.0, 1.0, 1.0, 10.0];
        assert_eq!(trimmed_mean(&values, &TrimPolicy::default()), Some(1.8));
    }

    #[test]
    fn short_series_fall_back_to_all_samples() {
        let policy = TrimPolicy::default();
        assert_eq!(trimmed_mean(&[3.0, 6.0, 9.0], &policy), Some(6.0));
        // five samples leave a single-sample window
        assert_eq!(trimmed_mean(&[0.0, 0.0, 10.0, 0.0, 0.0], &policy), Some(2.0));
        assert_eq!(trimmed_mean(&[4.0], &policy), Some(4.0));
        assert_eq!(trimmed_mean(&[], &policy), None);
    }

    #[test]
    fn resource_point_averages_trimmed_window() {
        let series = resource_series(&[90.0, 90.0, 10.0, 20.0, 30.0, 90.0, 90.0]);
        let p = aggregate_resources(&key("adaptive_bench", 20), &series, 30_000, &TrimPolicy::default(), 1.0)
            .unwrap();

        // six seconds between first and last sample, trimming notwithstanding
        assert_eq!(p.throughput, 5000.0);
        assert_eq!(p.metric(names::CPU), Some(20.0));
        assert_eq!(p.metric(names::NETWORK), Some(2.0));
        assert_eq!(p.metric(names::DISK), Some(0.5));
        assert_eq!(p.metric(names::DB_RPCS), Some(1.0));
        assert_eq!(p.metric(names::CACHE_RPCS), Some(8.0));
    }

    #[test]
    fn resource_point_with_three_samples_still_averages() {
        let series = resource_series(&[10.0, 20.0, 60.0]);
        let p = aggregate_resources(&key("ttl_bench", 1), &series, 200, &TrimPolicy::default(), 1.0).unwrap();
        assert_eq!(p.metric(names::CPU), Some(30.0));
        assert_eq!(p.throughput, 100.0);
    }

    #[test]
    fn resource_series_needs_elapsed_time() {
        let policy = TrimPolicy::default();
        assert_eq!(
            aggregate_resources(&key("ttl_bench", 1), &SampleSeries::default(), 10, &policy, 1.0),
            Err(AggregateError::EmptySeries)
        );
        assert!(matches!(
            aggregate_resources(&key("ttl_bench", 1), &resource_series(&[5.0]), 10, &policy, 1.0),
            Err(AggregateError::DegenerateRun(_))
        ));
    }

    #[test]
    fn group_and_sort_orders_by_scale() {
        let series = group_and_sort(vec![
            point("ttl_bench", "IBM", 30, 1.0),
            point("ttl_bench", "IBM", 10, 2.0),
            point("ttl_bench", "IBM", 20, 3.0),
        ]);
        assert_eq!(series.len(), 1);
        let scales: Vec<u32> = series[0].points.iter().map(|p| p.scale).collect();
        assert_eq!(scales, vec![10, 20, 30]);
    }

    #[test]
    fn group_and_sort_keeps_duplicates_in_encounter_order() {
        let series = group_and_sort(vec![
            point("update_bench", "Meta", 5, 1.0),
            point("ttl_bench", "Meta", 7, 9.0),
            point("update_bench", "Meta", 5, 2.0),
            point("update_bench", "Meta", 1, 3.0),
        ]);
        assert_eq!(series[0].key.benchmark, "update_bench");
        assert_eq!(series[1].key.benchmark, "ttl_bench");
        let throughputs: Vec<f64> = series[0].points.iter().map(|p| p.throughput).collect();
        assert_eq!(throughputs, vec![3.0, 1.0, 2.0]);
    }

    #[test]
    fn normalization_spans_all_benchmarks_of_a_dataset() {
        let groups = by_dataset(group_and_sort(vec![
            point("ttl_bench", "IBM", 10, 250.0),
            point("update_bench", "IBM", 10, 1000.0),
            point("update_bench", "IBM", 20, 750.0),
            point("ttl_bench", "Meta", 10, 40.0),
        ]));
        assert_eq!(groups.len(), 2);

        let ibm = &groups[0];
        let max = ibm.max_throughput().unwrap();
        assert_eq!(max, 1000.0);
        for p in ibm.series.iter().flat_map(|s| &s.points) {
            let n = normalized_throughput(p.throughput, max);
            if p.throughput == max {
                assert_eq!(n, 100.0);
            } else {
                assert!((0.0..100.0).contains(&n));
            }
        }
        assert_eq!(groups[1].max_throughput(), Some(40.0));
    }

    #[test]
    fn sketch_point_converts_units() {
        let mut r = MetricRecord::default();
        r.insert(fields::TOTAL_REQUESTS, MetricValue::Integer(100));
        r.insert(fields::CORRECT_PRED_RATE, MetricValue::Float(0.5));
        r.insert(fields::STORAGE_SERVING, MetricValue::Float(12.0));
        r.insert(fields::AVG_WRITE_LATENCY, MetricValue::Float(0.25));
        r.insert(fields::AVG_READ_LATENCY, MetricValue::Float(0.5));
        r.insert(fields::AVG_GET_EW_LATENCY, MetricValue::Float(2.0));
        let report = SketchReport {
            dataset: "IBM".into(),
            sketch: "MinSketchTracker".into(),
            path: "IBM_MinSketchTracker.log".into(),
        };

        let p = aggregate_sketch(&report, &r).unwrap();
        assert_eq!(p.pred_rate_pct, 50.0);
        assert_eq!(p.write_us, 250.0);
        assert_eq!(p.read_us, 500.0);
        assert_eq!(p.get_ew_us, 2000.0);
    }
}
