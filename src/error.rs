use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures that abort a whole analysis run.
///
/// Parsing-level outcomes never end up here: a filename or log body that does
/// not fit its grammar is reported through [`ExtractError`] or
/// [`AggregateError`] and the coordinate is skipped.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("cannot access '{}': {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("failed to build table: {0}")]
    Frame(#[from] polars::prelude::PolarsError),
    #[error("failed to serialize results: {0}")]
    Json(#[from] serde_json::Error),
    #[error("renderer failed on '{chart}': {reason}")]
    Render { chart: String, reason: String },
}

impl AnalysisError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Why a schema could not produce a record from a log body.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractError {
    #[error("schema '{schema}' did not match")]
    NoMatch { schema: String },
    #[error("schema '{schema}' captured malformed number '{token}' for field '{field}'")]
    MalformedNumber {
        schema: String,
        field: String,
        token: String,
    },
}

/// Why an extracted record could not be turned into a plot point.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AggregateError {
    #[error("no samples matched")]
    EmptySeries,
    #[error("run has no usable duration ({0})")]
    DegenerateRun(String),
    #[error("record is missing field '{0}'")]
    MissingField(String),
    #[error("no total request count configured for dataset '{0}'")]
    UnknownDataset(String),
}

pub type Result<T, E = AnalysisError> = std::result::Result<T, E>;
