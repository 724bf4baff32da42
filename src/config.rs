use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};

/// Which latency pair of the stats report feeds the latency charts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LatencyStatistic {
    Average,
    #[default]
    Median,
}

/// Half-open range of scales to look for, `start..end` by `step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleRange {
    pub start: u32,
    pub end: u32,
    #[serde(default = "default_step")]
    pub step: u32,
}

fn default_step() -> u32 {
    1
}

impl ScaleRange {
    pub fn iter(&self) -> impl Iterator<Item = u32> {
        (self.start..self.end).step_by(self.step.max(1) as usize)
    }
}

impl Default for ScaleRange {
    fn default() -> Self {
        Self {
            start: 0,
            end: 200,
            step: 1,
        }
    }
}

/// Edge trimming applied to per-line samples before averaging.
///
/// `leading` and `trailing` samples are dropped as startup/cooldown noise.
/// When fewer than `min_window` samples survive, the whole series is averaged
/// instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrimPolicy {
    pub leading: usize,
    pub trailing: usize,
    pub min_window: usize,
}

impl Default for TrimPolicy {
    fn default() -> Self {
        Self {
            leading: 2,
            trailing: 2,
            min_window: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub log_directory: PathBuf,
    pub output_directory: PathBuf,
    pub tracker_directory: PathBuf,
    pub benchmarks: Vec<String>,
    pub datasets: Vec<String>,
    pub scales: ScaleRange,
    pub dataset_to_total_requests: BTreeMap<String, u64>,
    pub benchmark_display_name: BTreeMap<String, String>,
    pub sketch_display_name: BTreeMap<String, String>,
    pub latency_statistic: LatencyStatistic,
    pub stats_suffix: String,
    pub run_log_suffix: String,
    pub trim: TrimPolicy,
    pub rpc_floor: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        let benchmarks = [
            ("stale_bench", "TTL (Inf.)"),
            ("ttl_bench", "TTL (1s)"),
            ("invalidate_bench", "Inv."),
            ("update_bench", "Upd."),
            ("adaptive_bench", "Adpt."),
            ("oracle_bench", "Oracle"),
        ];
        let requests = [
            ("Meta", 500_000),
            ("Twitter", 5_000_000),
            ("IBM", 30_000),
            ("Tencent", 100_000),
            ("Alibaba", 300_000),
            ("Poisson", 200_000),
            ("PoissonWrite", 200_000),
            ("PoissonMix", 200_000),
        ];
        let sketches = [
            ("MinSketchTracker", "MinSketch"),
            ("ExactRWTracker", "ExactRW"),
            ("MinSketchConsTracker", "MinSketch (Cons.)"),
            ("TopKSketchTracker", "TopKSketch"),
            ("TopKSketchSampleTracker", "TopKSketchSample"),
        ];

        Self {
            log_directory: PathBuf::from("logs"),
            output_directory: PathBuf::from("figures"),
            tracker_directory: PathBuf::from("sketches"),
            benchmarks: benchmarks.iter().map(|(k, _)| k.to_string()).collect(),
            datasets: ["PoissonMix", "Poisson", "PoissonWrite", "Tencent", "IBM", "Alibaba"]
                .iter()
                .map(|d| d.to_string())
                .collect(),
            scales: ScaleRange::default(),
            dataset_to_total_requests: requests
                .iter()
                .map(|(d, n)| (d.to_string(), *n))
                .collect(),
            benchmark_display_name: benchmarks
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            sketch_display_name: sketches
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            latency_statistic: LatencyStatistic::default(),
            stats_suffix: "log.stats".to_string(),
            run_log_suffix: "log".to_string(),
            trim: TrimPolicy::default(),
            rpc_floor: 1.0,
        }
    }
}

impl AnalysisConfig {
    /// Load a JSON config file, or the built-in defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = fs::read_to_string(path).map_err(|e| AnalysisError::io(path, e))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| AnalysisError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scales.step == 0 {
            return Err(AnalysisError::Config("scales.step must be positive".into()));
        }
        if !self.rpc_floor.is_finite() {
            return Err(AnalysisError::Config("rpc_floor must be finite".into()));
        }
        Ok(())
    }

    /// Legend label for a benchmark key.
    pub fn benchmark_label<'a>(&'a self, benchmark: &'a str) -> &'a str {
        self.benchmark_display_name
            .get(benchmark)
            .map(String::as_str)
            .unwrap_or(benchmark)
    }

    pub fn sketch_label<'a>(&'a self, sketch: &'a str) -> &'a str {
        self.sketch_display_name
            .get(sketch)
            .map(String::as_str)
            .unwrap_or(sketch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"log_directory": "/data/logs", "scales": {"start": 10, "end": 50, "step": 10}}"#,
        )
        .unwrap();

        let config = AnalysisConfig::load(Some(&path)).unwrap();
        assert_eq!(config.log_directory, PathBuf::from("/data/logs"));
        assert_eq!(config.scales.iter().collect::<Vec<_>>(), vec![10, 20, 30, 40]);
        assert_eq!(config.dataset_to_total_requests["IBM"], 30_000);
        assert_eq!(config.trim, TrimPolicy::default());
        assert_eq!(config.latency_statistic, LatencyStatistic::Median);
    }

    #[test]
    fn zero_step_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"scales": {"start": 0, "end": 5, "step": 0}}"#).unwrap();

        assert!(matches!(
            AnalysisConfig::load(Some(&path)),
            Err(AnalysisError::Config(_))
        ));
    }

    #[test]
    fn unknown_benchmark_label_falls_back_to_key() {
        let config = AnalysisConfig::default();
        assert_eq!(config.benchmark_label("ttl_bench"), "TTL (1s)");
        assert_eq!(config.benchmark_label("mystery_bench"), "mystery_bench");
    }
}
