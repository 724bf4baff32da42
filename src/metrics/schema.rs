//! Schema-driven extraction of numbers from benchmark report text.
//!
//! A schema is an ordered list of labelled fields. Block schemas look for
//! their labels anywhere in a file, in order, with arbitrary text in between.
//! Line schemas match each line on its own against a strict template.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::{error, trace};

use crate::error::{AnalysisError, ExtractError, Result};

const SAMPLE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Integer,
    Float,
    /// `YYYY-MM-DD HH:MM:SS`
    Timestamp,
    /// A number that must be present but is not kept.
    Ignored,
    /// Label only, no value follows.
    Anchor,
}

impl ValueKind {
    fn pattern(self) -> &'static str {
        match self {
            ValueKind::Integer => r"(\d+)",
            ValueKind::Float => r"(\d+(?:\.\d+)?(?:[eE][-+]?\d+)?)",
            ValueKind::Timestamp => r"(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2})",
            ValueKind::Ignored => r"(?:\d+(?:\.\d+)?)",
            ValueKind::Anchor => "",
        }
    }

    fn is_captured(self) -> bool {
        matches!(
            self,
            ValueKind::Integer | ValueKind::Float | ValueKind::Timestamp
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    Block,
    Line,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub label: String,
    pub kind: ValueKind,
    #[serde(default)]
    pub unit: String,
}

impl FieldSpec {
    pub fn new(name: &str, label: &str, kind: ValueKind, unit: &str) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            kind,
            unit: unit.to_string(),
        }
    }

    fn pattern(&self) -> String {
        let mut out = regex::escape(&self.label);
        if self.kind != ValueKind::Anchor {
            out.push_str(r"\s*");
            out.push_str(self.kind.pattern());
        }
        if !self.unit.is_empty() {
            out.push_str(r"\s*");
            out.push_str(&regex::escape(&self.unit));
        }
        out
    }
}

/// Declarative form of a schema, as it would appear in a config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDef {
    pub name: String,
    pub layout: Layout,
    pub fields: Vec<FieldSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Integer(u64),
    Float(f64),
    Timestamp(NaiveDateTime),
}

/// Values captured by one schema match, keyed by field name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetricRecord {
    values: BTreeMap<String, MetricValue>,
}

impl MetricRecord {
    pub fn insert(&mut self, name: impl Into<String>, value: MetricValue) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<MetricValue> {
        self.values.get(name).copied()
    }

    /// Numeric value as `f64`; integers are widened.
    pub fn float(&self, name: &str) -> Option<f64> {
        match self.get(name)? {
            MetricValue::Float(v) => Some(v),
            MetricValue::Integer(v) => Some(v as f64),
            MetricValue::Timestamp(_) => None,
        }
    }

    pub fn integer(&self, name: &str) -> Option<u64> {
        match self.get(name)? {
            MetricValue::Integer(v) => Some(v),
            _ => None,
        }
    }

    pub fn timestamp(&self, name: &str) -> Option<NaiveDateTime> {
        match self.get(name)? {
            MetricValue::Timestamp(t) => Some(t),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Per-line samples of one log, in file order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SampleSeries {
    samples: Vec<MetricRecord>,
}

impl SampleSeries {
    pub fn new(samples: Vec<MetricRecord>) -> Self {
        Self { samples }
    }

    /// One field across all samples. Samples lacking it are skipped.
    pub fn column(&self, name: &str) -> Vec<f64> {
        self.samples.iter().filter_map(|s| s.float(name)).collect()
    }

    pub fn first_timestamp(&self, name: &str) -> Option<NaiveDateTime> {
        self.samples.first()?.timestamp(name)
    }

    pub fn last_timestamp(&self, name: &str) -> Option<NaiveDateTime> {
        self.samples.last()?.timestamp(name)
    }

    pub fn samples(&self) -> &[MetricRecord] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct LineExtraction {
    pub series: SampleSeries,
    pub unmatched: usize,
}

/// A compiled schema.
#[derive(Debug, Clone)]
pub struct Schema {
    def: SchemaDef,
    pattern: Regex,
}

impl Schema {
    pub fn compile(def: SchemaDef) -> Result<Self> {
        let pieces: Vec<String> = def.fields.iter().map(FieldSpec::pattern).collect();
        let body = match def.layout {
            Layout::Block => pieces.join(r"(?s:.*?)"),
            Layout::Line => format!("^{}", pieces.join(r"\s*")),
        };
        let pattern = Regex::new(&body)
            .map_err(|e| AnalysisError::Config(format!("schema '{}': {e}", def.name)))?;
        Ok(Self { def, pattern })
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn layout(&self) -> Layout {
        self.def.layout
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.def.fields
    }

    /// Number of fields a successful match yields.
    pub fn captured_len(&self) -> usize {
        self.def.fields.iter().filter(|f| f.kind.is_captured()).count()
    }

    /// Match the whole text once. All labels must be present, in order.
    pub fn extract(&self, text: &str) -> Result<MetricRecord, ExtractError> {
        let caps = self
            .pattern
            .captures(text)
            .ok_or_else(|| ExtractError::NoMatch {
                schema: self.def.name.clone(),
            })?;
        self.decode(&caps)
    }

    /// Match every line independently. Lines that do not fit are counted and
    /// left out of the series.
    pub fn extract_lines(&self, text: &str) -> LineExtraction {
        let mut samples = Vec::new();
        let mut unmatched = 0;
        for line in text.lines() {
            let decoded = match self.pattern.captures(line) {
                Some(caps) => self.decode(&caps),
                None => Err(ExtractError::NoMatch {
                    schema: self.def.name.clone(),
                }),
            };
            match decoded {
                Ok(record) => samples.push(record),
                Err(ExtractError::NoMatch { .. }) => {
                    trace!(schema = %self.def.name, line, "unmatched line");
                    unmatched += 1;
                }
                Err(e) => {
                    error!("{e}");
                    unmatched += 1;
                }
            }
        }
        LineExtraction {
            series: SampleSeries::new(samples),
            unmatched,
        }
    }

    fn decode(&self, caps: &Captures<'_>) -> Result<MetricRecord, ExtractError> {
        let mut record = MetricRecord::default();
        let captured = self.def.fields.iter().filter(|f| f.kind.is_captured());
        for (group, field) in captured.enumerate() {
            let token = caps.get(group + 1).map(|m| m.as_str()).unwrap_or_default();
            let malformed = || ExtractError::MalformedNumber {
                schema: self.def.name.clone(),
                field: field.name.clone(),
                token: token.to_string(),
            };
            let value = match field.kind {
                ValueKind::Integer => MetricValue::Integer(token.parse().map_err(|_| malformed())?),
                ValueKind::Float => MetricValue::Float(token.parse().map_err(|_| malformed())?),
                ValueKind::Timestamp => MetricValue::Timestamp(
                    NaiveDateTime::parse_from_str(token, SAMPLE_TIME_FORMAT)
                        .map_err(|_| malformed())?,
                ),
                ValueKind::Ignored | ValueKind::Anchor => continue,
            };
            record.insert(field.name.clone(), value);
        }
        Ok(record)
    }

    /// Write a record back out in the schema's own format.
    pub fn render(&self, record: &MetricRecord) -> String {
        let pieces: Vec<String> = self
            .def
            .fields
            .iter()
            .map(|field| {
                let value = match (field.kind, record.get(&field.name)) {
                    (ValueKind::Anchor, _) => String::new(),
                    (ValueKind::Ignored, _) => "0".to_string(),
                    (_, Some(MetricValue::Integer(v))) => v.to_string(),
                    (_, Some(MetricValue::Float(v))) => v.to_string(),
                    (_, Some(MetricValue::Timestamp(t))) => {
                        t.format(SAMPLE_TIME_FORMAT).to_string()
                    }
                    (_, None) => String::new(),
                };
                [field.label.as_str(), value.as_str(), field.unit.as_str()]
                    .iter()
                    .filter(|s| !s.is_empty())
                    .copied()
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect();
        match self.def.layout {
            Layout::Block => pieces.join("\n"),
            Layout::Line => pieces.join(" "),
        }
    }
}

pub mod fields {
    pub const AVG_CACHE_LATENCY_US: &str = "avg_cache_latency_us";
    pub const AVG_DB_LATENCY_US: &str = "avg_db_latency_us";
    pub const MEDIAN_CACHE_LATENCY_US: &str = "median_cache_latency_us";
    pub const MEDIAN_DB_LATENCY_US: &str = "median_db_latency_us";
    pub const END_TO_END_LATENCY_MS: &str = "end_to_end_latency_ms";
    pub const NUM_OPERATIONS: &str = "num_operations";

    pub const TIMESTAMP: &str = "timestamp";
    pub const CPU_PCT: &str = "cpu_pct";
    pub const NET_RECV_BYTES: &str = "net_recv_bytes";
    pub const NET_SEND_BYTES: &str = "net_send_bytes";
    pub const DISK_READ_BYTES: &str = "disk_read_bytes";
    pub const DISK_WRITE_BYTES: &str = "disk_write_bytes";
    pub const DB_RPCS: &str = "db_rpcs";
    pub const CACHE_RPCS: &str = "cache_rpcs";

    pub const TOTAL_REQUESTS: &str = "total_requests";
    pub const CORRECT_PRED_RATE: &str = "correct_pred_rate";
    pub const STORAGE_SERVING: &str = "storage_serving";
    pub const AVG_WRITE_LATENCY: &str = "avg_write_latency";
    pub const AVG_READ_LATENCY: &str = "avg_read_latency";
    pub const AVG_GET_EW_LATENCY: &str = "avg_get_ew_latency";
}

/// The `.log.stats` report a client writes at the end of a run.
pub fn latency_report() -> SchemaDef {
    use fields::*;
    SchemaDef {
        name: "latency_report".to_string(),
        layout: Layout::Block,
        fields: vec![
            FieldSpec::new(AVG_CACHE_LATENCY_US, "Average cache latency:", ValueKind::Float, "us"),
            FieldSpec::new(AVG_DB_LATENCY_US, "Average DB latency:", ValueKind::Float, "us"),
            FieldSpec::new(MEDIAN_CACHE_LATENCY_US, "Median cache latency:", ValueKind::Float, "us"),
            FieldSpec::new(MEDIAN_DB_LATENCY_US, "Median DB latency:", ValueKind::Float, "us"),
            FieldSpec::new(END_TO_END_LATENCY_MS, "End-to-End Latency:", ValueKind::Float, "ms"),
            FieldSpec::new(NUM_OPERATIONS, "Num operations:", ValueKind::Integer, ""),
        ],
    }
}

/// One line of the resource tracker log, sampled roughly every second.
pub fn resource_sample() -> SchemaDef {
    use fields::*;
    SchemaDef {
        name: "resource_sample".to_string(),
        layout: Layout::Line,
        fields: vec![
            FieldSpec::new(TIMESTAMP, "", ValueKind::Timestamp, ""),
            FieldSpec::new(CPU_PCT, "- CPU Utilization:", ValueKind::Float, "%"),
            FieldSpec::new("cpu_usr_pct", "| usr:", ValueKind::Ignored, "%"),
            FieldSpec::new("cpu_sys_pct", ", sys:", ValueKind::Ignored, "%"),
            FieldSpec::new("cpu_idle_pct", ", idle:", ValueKind::Ignored, "%"),
            FieldSpec::new("cpu_iowait_pct", ", iowait:", ValueKind::Ignored, "%"),
            FieldSpec::new("cpu_steal_pct", ", steal:", ValueKind::Ignored, "%"),
            FieldSpec::new(NET_RECV_BYTES, "| Network recv:", ValueKind::Integer, "bytes"),
            FieldSpec::new(NET_SEND_BYTES, ", send:", ValueKind::Integer, "bytes"),
            FieldSpec::new(DISK_READ_BYTES, "| Disk read:", ValueKind::Integer, "bytes"),
            FieldSpec::new(DISK_WRITE_BYTES, ", write:", ValueKind::Integer, "bytes"),
            FieldSpec::new(DB_RPCS, ", DB current_rpcs:", ValueKind::Integer, ""),
            FieldSpec::new(CACHE_RPCS, ", Cache current_rpcs:", ValueKind::Integer, ""),
        ],
    }
}

/// Summary printed by the sketch tracker benchmark.
pub fn sketch_report() -> SchemaDef {
    use fields::*;
    let anchor = |label: &str| FieldSpec::new("", label, ValueKind::Anchor, "");
    SchemaDef {
        name: "sketch_report".to_string(),
        layout: Layout::Block,
        fields: vec![
            FieldSpec::new(TOTAL_REQUESTS, "Total requests:", ValueKind::Integer, ""),
            anchor("Read Ratio:"),
            anchor("Average Value Size:"),
            anchor("Min Value Size:"),
            anchor("Max Value Size:"),
            anchor("Average Interval:"),
            anchor("Min Interval:"),
            anchor("Max Interval:"),
            anchor("Correct rate:"),
            FieldSpec::new(CORRECT_PRED_RATE, "Correct pred rate:", ValueKind::Float, ""),
            FieldSpec::new(STORAGE_SERVING, "Storage serving:", ValueKind::Float, ""),
            FieldSpec::new(AVG_WRITE_LATENCY, "Average write latency:", ValueKind::Float, ""),
            FieldSpec::new(AVG_READ_LATENCY, "Average read latency:", ValueKind::Float, ""),
            FieldSpec::new(AVG_GET_EW_LATENCY, "Average get_ew latency:", ValueKind::Float, ""),
            anchor("gold_tracker:"),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::fields::*;
    use super::*;

    const STATS: &str = "\
Benchmark finished after warmup
Average cache latency: 812.5 us
Average DB latency: 2301.75 us
Median cache latency: 640 us
Median DB latency: 1999.5 us
  (p99 omitted)
End-to-End Latency: 1000 ms
Num operations: 5000
";

    const SAMPLE_LINE: &str = "2024-05-01 10:00:03 - CPU Utilization: 37.5% | usr: 20.0%, sys: 15.5%, idle: 62.5%, iowait: 0.0%, steal: 2.0% | Network recv: 1048576 bytes, send: 2097152 bytes | Disk read: 0 bytes, write: 4096 bytes, DB current_rpcs: 3, Cache current_rpcs: 17";

    fn compile(def: SchemaDef) -> Schema {
        Schema::compile(def).unwrap()
    }

    #[test]
    fn block_schema_reads_every_field() {
        let schema = compile(latency_report());
        let record = schema.extract(STATS).unwrap();

        assert_eq!(record.len(), schema.captured_len());
        assert_eq!(record.float(AVG_CACHE_LATENCY_US), Some(812.5));
        assert_eq!(record.float(AVG_DB_LATENCY_US), Some(2301.75));
        assert_eq!(record.float(MEDIAN_CACHE_LATENCY_US), Some(640.0));
        assert_eq!(record.float(MEDIAN_DB_LATENCY_US), Some(1999.5));
        assert_eq!(record.float(END_TO_END_LATENCY_MS), Some(1000.0));
        assert_eq!(record.integer(NUM_OPERATIONS), Some(5000));
    }

    #[test]
    fn block_schema_fails_whole_on_missing_or_reordered_label() {
        let schema = compile(latency_report());
        let missing = STATS.replace("Median DB latency: 1999.5 us\n", "");
        assert!(matches!(
            schema.extract(&missing),
            Err(ExtractError::NoMatch { .. })
        ));

        let reordered = "Num operations: 5000\nAverage cache latency: 1 us\nAverage DB latency: 1 us\n\
            Median cache latency: 1 us\nMedian DB latency: 1 us\nEnd-to-End Latency: 1 ms\n";
        assert!(schema.extract(reordered).is_err());
    }

    #[test]
    fn labels_are_case_sensitive() {
        let schema = compile(latency_report());
        let lowered = STATS.replace("Num operations", "num operations");
        assert!(schema.extract(&lowered).is_err());
    }

    #[test]
    fn rendered_record_extracts_to_itself() {
        let schema = compile(latency_report());
        let record = schema.extract(STATS).unwrap();
        let text = schema.render(&record);
        assert_eq!(schema.extract(&text).unwrap(), record);
    }

    #[test]
    fn oversized_integer_is_reported_as_malformed() {
        let schema = compile(latency_report());
        let text = STATS.replace("5000", "99999999999999999999999");
        assert!(matches!(
            schema.extract(&text),
            Err(ExtractError::MalformedNumber { ref field, .. }) if field == NUM_OPERATIONS
        ));
    }

    #[test]
    fn line_schema_parses_sample_lines_and_skips_noise() {
        let schema = compile(resource_sample());
        let text = format!(
            "tracker started\n{SAMPLE_LINE}\nWARN: something odd\n{}\n",
            SAMPLE_LINE.replace("10:00:03", "10:00:04")
        );

        let out = schema.extract_lines(&text);
        assert_eq!(out.unmatched, 2);
        assert_eq!(out.series.len(), 2);

        let first = &out.series.samples()[0];
        assert_eq!(first.len(), schema.captured_len());
        assert_eq!(first.float(CPU_PCT), Some(37.5));
        assert_eq!(first.integer(NET_RECV_BYTES), Some(1_048_576));
        assert_eq!(first.integer(NET_SEND_BYTES), Some(2_097_152));
        assert_eq!(first.integer(DISK_WRITE_BYTES), Some(4096));
        assert_eq!(first.integer(DB_RPCS), Some(3));
        assert_eq!(first.integer(CACHE_RPCS), Some(17));
        assert_eq!(
            out.series.last_timestamp(TIMESTAMP).unwrap().to_string(),
            "2024-05-01 10:00:04"
        );
    }

    #[test]
    fn rendered_sample_line_extracts_to_itself() {
        let schema = compile(resource_sample());
        let sample = schema.extract_lines(SAMPLE_LINE).series.samples()[0].clone();
        let out = schema.extract_lines(&schema.render(&sample));
        assert_eq!(out.series.samples(), &[sample]);
    }

    #[test]
    fn line_schema_is_anchored_at_line_start() {
        let schema = compile(resource_sample());
        let out = schema.extract_lines(&format!("prefix {SAMPLE_LINE}"));
        assert!(out.series.is_empty());
        assert_eq!(out.unmatched, 1);
    }

    #[test]
    fn empty_text_yields_empty_series() {
        let out = compile(resource_sample()).extract_lines("");
        assert!(out.series.is_empty());
        assert_eq!(out.unmatched, 0);
    }

    #[test]
    fn sketch_report_requires_anchor_labels() {
        let text = "Total requests: 30000\nRead Ratio: 0.9\nAverage Value Size: 12\n\
            Min Value Size: 1\nMax Value Size: 90\nAverage Interval: 3.5\nMin Interval: 0\n\
            Max Interval: 100\nCorrect rate: 0.7\nCorrect pred rate: 0.875\n\
            Storage serving: 42.5\nAverage write latency: 0.0125\nAverage read latency: 1.5e-05\n\
            Average get_ew latency: 0.002\ngold_tracker: done\n";
        let schema = compile(sketch_report());
        let record = schema.extract(text).unwrap();
        assert_eq!(record.integer(TOTAL_REQUESTS), Some(30000));
        assert_eq!(record.float(CORRECT_PRED_RATE), Some(0.875));
        assert_eq!(record.float(AVG_READ_LATENCY), Some(1.5e-05));

        let without_anchor = text.replace("Min Interval: 0\n", "");
        assert!(schema.extract(&without_anchor).is_err());
    }

    #[test]
    fn schema_definitions_load_from_json() {
        let def: SchemaDef = serde_json::from_str(
            r#"{"name": "ops", "layout": "block",
                "fields": [{"name": "ops", "label": "Ops:", "kind": "integer"}]}"#,
        )
        .unwrap();
        let record = compile(def).extract("noise\nOps: 12\n").unwrap();
        assert_eq!(record.integer("ops"), Some(12));
    }
}
