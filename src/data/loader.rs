use std::fs;
use std::io;
use std::path::Path;

use rayon::prelude::*;

use crate::data::index::{LogFile, SketchReport};
use crate::error::{AnalysisError, Result};

/// Anything backed by one log file on disk.
pub trait LogSource {
    fn path(&self) -> &Path;
}

impl LogSource for LogFile {
    fn path(&self) -> &Path {
        &self.path
    }
}

impl LogSource for SketchReport {
    fn path(&self) -> &Path {
        &self.path
    }
}

/// Read a whole log into memory.
///
/// A file that vanished since the directory was scanned gives `Ok(None)`.
/// Invalid UTF-8 is replaced rather than rejected.
pub fn read_text(path: &Path) -> Result<Option<String>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(AnalysisError::io(path, e)),
    }
}

/// Read and parse every source on the rayon pool. Output keeps input order;
/// `None` marks a file that disappeared before it could be read.
pub fn load_parallel<S, T, F>(sources: Vec<S>, parse: F) -> Result<Vec<(S, Option<T>)>>
where
    S: LogSource + Send,
    T: Send,
    F: Fn(&S, &str) -> T + Sync,
{
    sources
        .into_par_iter()
        .map(|source| {
            let parsed = read_text(source.path())?.map(|text| parse(&source, &text));
            Ok((source, parsed))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::index::{FilenameGrammar, LogIndex};

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_text(&dir.path().join("gone.log")).unwrap(), None);
    }

    #[test]
    fn non_utf8_bytes_are_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.log");
        fs::write(&path, b"Num operations: 7\xff\n").unwrap();
        let text = read_text(&path).unwrap().unwrap();
        assert!(text.starts_with("Num operations: 7"));
    }

    #[test]
    fn parallel_load_keeps_order_and_flags_vanished_files() {
        let dir = tempfile::tempdir().unwrap();
        let names = [
            "ttl_bench_IBM_scale1_20240101_000000.log",
            "ttl_bench_IBM_scale2_20240101_000000.log",
            "ttl_bench_IBM_scale3_20240101_000000.log",
        ];
        for (i, name) in names.iter().enumerate() {
            fs::write(dir.path().join(name), format!("run {i}")).unwrap();
        }
        let grammar = FilenameGrammar::new("log").unwrap();
        let index = LogIndex::scan(dir.path(), &grammar).unwrap();
        let keys = names.iter().map(|n| grammar.parse(n).unwrap().key);
        let chosen = index.select(keys).chosen;
        fs::remove_file(dir.path().join(names[1])).unwrap();

        let loaded = load_parallel(chosen, |_, text| text.len()).unwrap();
        let scales: Vec<u32> = loaded.iter().map(|(f, _)| f.key().scale).collect();
        assert_eq!(scales, vec![1, 2, 3]);
        assert_eq!(loaded[0].1, Some(5));
        assert_eq!(loaded[1].1, None);
    }
}
