//! Discovery of benchmark logs on disk.
//!
//! Run logs are named `<benchmark>_<dataset>_scale<N>_<YYYYMMDD>_<HHMMSS>.<suffix>`.
//! Several runs of the same experiment may sit side by side; only the newest
//! one per `(benchmark, dataset, scale)` is ever analysed.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use regex::Regex;
use tracing::{debug, trace};

use crate::error::{AnalysisError, Result};

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// The `(benchmark, dataset, scale)` triple a run belongs to, regardless of
/// when it ran.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoordinateKey {
    pub benchmark: String,
    pub dataset: String,
    pub scale: u32,
}

impl CoordinateKey {
    pub fn new(benchmark: impl Into<String>, dataset: impl Into<String>, scale: u32) -> Self {
        Self {
            benchmark: benchmark.into(),
            dataset: dataset.into(),
            scale,
        }
    }
}

impl fmt::Display for CoordinateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/scale{}", self.benchmark, self.dataset, self.scale)
    }
}

/// One candidate log: its coordinate plus the run timestamp from the name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentCoordinate {
    pub key: CoordinateKey,
    pub timestamp: NaiveDateTime,
}

/// Filename grammar for run logs with a fixed literal suffix
/// (`log.stats` for stats reports, `log` for resource tracker logs).
#[derive(Debug, Clone)]
pub struct FilenameGrammar {
    suffix: String,
    pattern: Regex,
}

impl FilenameGrammar {
    pub fn new(suffix: &str) -> Result<Self> {
        let pattern = format!(
            r"^(\w+)_([^_]+)_scale(\d+)_(\d{{8}}_\d{{6}})\.{}$",
            regex::escape(suffix)
        );
        let pattern = Regex::new(&pattern)
            .map_err(|e| AnalysisError::Config(format!("bad log suffix '{suffix}': {e}")))?;
        Ok(Self {
            suffix: suffix.to_string(),
            pattern,
        })
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Parse a bare file name. Names that do not fit the grammar, or carry an
    /// impossible date, yield `None`.
    pub fn parse(&self, file_name: &str) -> Option<ExperimentCoordinate> {
        let caps = self.pattern.captures(file_name)?;
        let scale = caps[3].parse::<u32>().ok()?;
        let timestamp = NaiveDateTime::parse_from_str(&caps[4], TIMESTAMP_FORMAT).ok()?;
        Some(ExperimentCoordinate {
            key: CoordinateKey::new(&caps[1], &caps[2], scale),
            timestamp,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFile {
    pub coordinate: ExperimentCoordinate,
    pub path: PathBuf,
}

impl LogFile {
    pub fn key(&self) -> &CoordinateKey {
        &self.coordinate.key
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Result of looking up a batch of requested coordinates.
#[derive(Debug, Default)]
pub struct Selection {
    pub chosen: Vec<LogFile>,
    pub missing: Vec<CoordinateKey>,
}

/// Newest log per coordinate within one directory snapshot.
///
/// Two files with the same coordinate and the same timestamp are not ordered
/// by anything but directory iteration; whichever is offered last is kept.
#[derive(Debug, Default)]
pub struct LogIndex {
    latest: HashMap<CoordinateKey, LogFile>,
}

impl LogIndex {
    /// Scan `dir` once. Failing to list the directory is fatal; files that do
    /// not fit the grammar are ignored.
    pub fn scan(dir: &Path, grammar: &FilenameGrammar) -> Result<Self> {
        let entries = fs::read_dir(dir).map_err(|e| AnalysisError::io(dir, e))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| AnalysisError::io(dir, e))?;
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(raw) => trace!(name = ?raw, "skipping non-utf8 file name"),
            }
        }

        let index = Self::from_file_names(dir, names, grammar);
        debug!(
            dir = %dir.display(),
            suffix = grammar.suffix(),
            coordinates = index.len(),
            "indexed log directory"
        );
        Ok(index)
    }

    pub fn from_file_names<I, S>(dir: &Path, names: I, grammar: &FilenameGrammar) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut index = Self::default();
        for name in names {
            let name = name.as_ref();
            match grammar.parse(name) {
                Some(coordinate) => {
                    index.offer(LogFile {
                        coordinate,
                        path: dir.join(name),
                    });
                }
                None => trace!(file = name, "file name does not match grammar"),
            }
        }
        index
    }

    /// Keep `file` if it is at least as new as the current pick for its
    /// coordinate. Returns whether it was kept.
    pub fn offer(&mut self, file: LogFile) -> bool {
        match self.latest.get(file.key()) {
            Some(current) if current.coordinate.timestamp > file.coordinate.timestamp => false,
            _ => {
                self.latest.insert(file.key().clone(), file);
                true
            }
        }
    }

    pub fn latest(&self, benchmark: &str, dataset: &str, scale: u32) -> Option<&LogFile> {
        self.latest.get(&CoordinateKey::new(benchmark, dataset, scale))
    }

    /// Resolve requested coordinates in order, splitting them into the
    /// chosen files and the ones with no candidate at all.
    pub fn select<I>(&self, requested: I) -> Selection
    where
        I: IntoIterator<Item = CoordinateKey>,
    {
        let mut selection = Selection::default();
        for key in requested {
            match self.latest.get(&key) {
                Some(file) => selection.chosen.push(file.clone()),
                None => selection.missing.push(key),
            }
        }
        selection
    }

    pub fn len(&self) -> usize {
        self.latest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }
}

/// A sketch tracker report, named `<dataset>_<sketch>[...].log`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SketchReport {
    pub dataset: String,
    pub sketch: String,
    pub path: PathBuf,
}

/// List sketch reports in `dir`, sorted by file name.
pub fn scan_sketch_reports(dir: &Path) -> Result<Vec<SketchReport>> {
    let pattern = Regex::new(r"^([^_]+)_([^_.]+).*\.log$")
        .map_err(|e| AnalysisError::Config(e.to_string()))?;

    let entries = fs::read_dir(dir).map_err(|e| AnalysisError::io(dir, e))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| AnalysisError::io(dir, e))?;
        if let Ok(name) = entry.file_name().into_string() {
            names.push(name);
        }
    }
    names.sort();

    Ok(names
        .into_iter()
        .filter_map(|name| {
            let caps = pattern.captures(&name)?;
            Some(SketchReport {
                dataset: caps[1].to_string(),
                sketch: caps[2].to_string(),
                path: dir.join(&name),
            })
        })
        .collect())
}
