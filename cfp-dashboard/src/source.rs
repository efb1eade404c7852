//! Feature record sources
//!
//! A source is an ordered sequence of feature vectors addressed by position.
//! Two kinds exist:
//! - a finite dataset (CSV file) loaded once, normally replayed one-shot
//! - an append-only list file (JSON lines), re-read on every access so rows
//!   appended by `cfp-dashboard import` show up while streaming, normally cyclic
//!
//! The replay policy (`SourceMode`) travels with the source; the stream driver
//! reads it to decide between wrapping and stopping at the end.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use cfp_common::types::FEATURE_NAMES;
use cfp_common::{Error, FeatureVector, Result, SourceMode};

/// Ordered, position-addressed feature records
#[async_trait]
pub trait FeatureSource: Send + Sync {
    /// Replay policy
    fn mode(&self) -> SourceMode;

    /// Human-readable origin, shown in session snapshots
    fn describe(&self) -> String;

    /// Number of records currently available
    async fn len(&self) -> Result<usize>;

    /// Record at `index`, or `None` past the end
    async fn get(&self, index: usize) -> Result<Option<FeatureVector>>;
}

// ========================================
// In-memory dataset
// ========================================

/// Fixed set of records held in memory
#[derive(Debug, Clone)]
pub struct MemorySource {
    records: Vec<FeatureVector>,
    mode: SourceMode,
    label: String,
}

impl MemorySource {
    pub fn new(records: Vec<FeatureVector>, mode: SourceMode) -> Self {
        Self {
            records,
            mode,
            label: "memory".to_string(),
        }
    }

    /// Source with no records; every tick reports "no data"
    pub fn empty() -> Self {
        Self {
            records: Vec::new(),
            mode: SourceMode::OneShot,
            label: "none".to_string(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn records(&self) -> &[FeatureVector] {
        &self.records
    }
}

#[async_trait]
impl FeatureSource for MemorySource {
    fn mode(&self) -> SourceMode {
        self.mode
    }

    fn describe(&self) -> String {
        self.label.clone()
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.records.len())
    }

    async fn get(&self, index: usize) -> Result<Option<FeatureVector>> {
        Ok(self.records.get(index).copied())
    }
}

// ========================================
// CSV dataset
// ========================================

/// Rows read from a CSV file
#[derive(Debug, Clone, PartialEq)]
pub struct CsvRecords {
    pub records: Vec<FeatureVector>,
    /// Rows dropped for missing or non-numeric values
    pub skipped: usize,
}

/// Parse a CSV file with a header naming at least the four feature columns
///
/// Extra columns are ignored. Rows that fail to parse or validate are skipped
/// with a warning; a header without the feature columns is an error.
pub fn read_csv(path: &Path) -> Result<CsvRecords> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| csv_error(path, e))?;

    let headers = reader.headers().map_err(|e| csv_error(path, e))?.clone();
    let missing: Vec<&str> = FEATURE_NAMES
        .iter()
        .copied()
        .filter(|name| !headers.iter().any(|h| h == *name))
        .collect();
    if !missing.is_empty() {
        return Err(Error::Csv(format!(
            "{}: missing column(s) {}",
            path.display(),
            missing.join(", ")
        )));
    }

    let mut records = Vec::new();
    let mut skipped = 0;
    for (row, result) in reader.deserialize::<FeatureVector>().enumerate() {
        let parsed = result
            .map_err(|e| e.to_string())
            .and_then(|fv| fv.validate().map(|_| fv).map_err(|e| e.to_string()));
        match parsed {
            Ok(fv) => records.push(fv),
            Err(e) => {
                // +2: header line and 1-based numbering
                warn!(path = %path.display(), line = row + 2, error = %e, "Skipping CSV row");
                skipped += 1;
            }
        }
    }

    debug!(path = %path.display(), rows = records.len(), skipped, "Read CSV");
    Ok(CsvRecords { records, skipped })
}

/// Load a CSV file as a source with the given replay policy
pub fn open_csv(path: &Path, mode: SourceMode) -> Result<MemorySource> {
    let CsvRecords { records, skipped } = read_csv(path)?;
    info!(
        "Loaded {} records from {} ({} skipped, {})",
        records.len(),
        path.display(),
        skipped,
        mode
    );
    Ok(MemorySource::new(records, mode).with_label(path.display().to_string()))
}

fn csv_error(path: &Path, err: csv::Error) -> Error {
    match err.into_kind() {
        csv::ErrorKind::Io(io) => Error::Io(io),
        other => Error::Csv(format!("{}: {:?}", path.display(), other)),
    }
}

// ========================================
// Append-only list file
// ========================================

/// Growing list of records, one JSON `FeatureVector` per line
///
/// The file is re-read on every access, so the length can grow between ticks.
/// A missing file is an empty list.
#[derive(Debug, Clone)]
pub struct ListSource {
    path: PathBuf,
    mode: SourceMode,
}

impl ListSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mode: SourceMode::Cyclic,
        }
    }

    pub fn with_mode(mut self, mode: SourceMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn lines(&self) -> Result<Vec<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Every valid record currently in the file; malformed lines are skipped
    pub async fn snapshot(&self) -> Result<Vec<FeatureVector>> {
        let lines = self.lines().await?;
        let mut records = Vec::with_capacity(lines.len());
        for (index, line) in lines.iter().enumerate() {
            match parse_line(line) {
                Ok(fv) => records.push(fv),
                Err(e) => {
                    warn!(path = %self.path.display(), index, error = %e, "Skipping list record");
                }
            }
        }
        Ok(records)
    }
}

fn parse_line(line: &str) -> Result<FeatureVector> {
    let fv: FeatureVector = serde_json::from_str(line)?;
    fv.validate()?;
    Ok(fv)
}

#[async_trait]
impl FeatureSource for ListSource {
    fn mode(&self) -> SourceMode {
        self.mode
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.lines().await?.len())
    }

    async fn get(&self, index: usize) -> Result<Option<FeatureVector>> {
        let lines = self.lines().await?;
        let Some(line) = lines.get(index) else {
            return Ok(None);
        };
        parse_line(line).map(Some)
    }
}

/// Append records to a list file, creating it if needed
pub async fn append_to_list(path: &Path, records: &[FeatureVector]) -> Result<usize> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut buffer = String::new();
    for record in records {
        buffer.push_str(&serde_json::to_string(record)?);
        buffer.push('\n');
    }

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(buffer.as_bytes()).await?;
    file.flush().await?;

    Ok(records.len())
}

/// Open the source for a data-source selection
///
/// `.csv` files are loaded once with the requested policy. Anything else is
/// treated as a list file: re-read live when cyclic, snapshotted when one-shot.
pub async fn open_source(mode: SourceMode, path: &Path) -> Result<std::sync::Arc<dyn FeatureSource>> {
    let is_csv = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));

    if is_csv {
        let path = path.to_path_buf();
        let source = tokio::task::spawn_blocking(move || open_csv(&path, mode))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))??;
        return Ok(std::sync::Arc::new(source));
    }

    if !tokio::fs::try_exists(path).await? {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} does not exist", path.display()),
        )));
    }

    let list = ListSource::new(path).with_mode(mode);
    match mode {
        SourceMode::Cyclic => Ok(std::sync::Arc::new(list)),
        SourceMode::OneShot => {
            let records = list.snapshot().await?;
            Ok(std::sync::Arc::new(
                MemorySource::new(records, mode).with_label(path.display().to_string()),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn csv_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_read_csv_ignores_extra_columns() {
        let file = csv_file(
            "time,cpu_request,memory_request,priority,scheduling_class,failed\n\
             100,0.5,0.25,9,2,1\n\
             101,0.1,0.05,0.0,1.0,0\n",
        );
        let parsed = read_csv(file.path()).unwrap();
        assert_eq!(parsed.skipped, 0);
        assert_eq!(
            parsed.records,
            vec![
                FeatureVector::new(0.5, 0.25, 9, 2),
                FeatureVector::new(0.1, 0.05, 0, 1),
            ]
        );
    }

    #[test]
    fn test_read_csv_skips_bad_rows() {
        let file = csv_file(
            "cpu_request,memory_request,priority,scheduling_class\n\
             0.5,0.25,9,2\n\
             ,0.25,9,2\n\
             0.5,NaN,9,2\n\
             0.5,0.25,9.5,2\n\
             0.3,0.2,1,0\n",
        );
        let parsed = read_csv(file.path()).unwrap();
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.skipped, 3);
    }

    #[test]
    fn test_read_csv_missing_column() {
        let file = csv_file("cpu_request,memory_request,priority\n0.5,0.25,9\n");
        let err = read_csv(file.path()).unwrap_err();
        assert!(matches!(err, Error::Csv(ref msg) if msg.contains("scheduling_class")));
    }

    #[test]
    fn test_read_csv_missing_file_is_io() {
        let err = read_csv(Path::new("/nonexistent/rows.csv")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[tokio::test]
    async fn test_memory_source_access() {
        let source = MemorySource::new(
            vec![FeatureVector::new(1.0, 1.0, 0, 0)],
            SourceMode::Cyclic,
        );
        assert_eq!(source.len().await.unwrap(), 1);
        assert!(source.get(0).await.unwrap().is_some());
        assert!(source.get(1).await.unwrap().is_none());
        assert_eq!(source.mode(), SourceMode::Cyclic);
    }

    #[tokio::test]
    async fn test_list_source_sees_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("list").join("features.jsonl");
        let list = ListSource::new(&path);

        // Missing file is an empty list
        assert_eq!(list.len().await.unwrap(), 0);

        append_to_list(&path, &[FeatureVector::new(0.1, 0.2, 0, 1)])
            .await
            .unwrap();
        assert_eq!(list.len().await.unwrap(), 1);

        append_to_list(
            &path,
            &[
                FeatureVector::new(0.3, 0.4, 2, 0),
                FeatureVector::new(0.5, 0.6, 9, 3),
            ],
        )
        .await
        .unwrap();
        assert_eq!(list.len().await.unwrap(), 3);
        assert_eq!(
            list.get(2).await.unwrap(),
            Some(FeatureVector::new(0.5, 0.6, 9, 3))
        );
        assert_eq!(list.mode(), SourceMode::Cyclic);
    }

    #[tokio::test]
    async fn test_list_source_malformed_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.jsonl");
        std::fs::write(&path, "{\"cpu_request\":1}\n").unwrap();

        let err = ListSource::new(&path).get(0).await.unwrap_err();
        assert!(matches!(err, Error::Deserialization(_)));
    }

    #[tokio::test]
    async fn test_open_source_by_extension() {
        let file = csv_file("cpu_request,memory_request,priority,scheduling_class\n0.5,0.25,9,2\n");
        let source = open_source(SourceMode::OneShot, file.path()).await.unwrap();
        assert_eq!(source.len().await.unwrap(), 1);
        assert_eq!(source.mode(), SourceMode::OneShot);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.jsonl");
        append_to_list(&path, &[FeatureVector::new(0.1, 0.2, 0, 1)])
            .await
            .unwrap();
        let source = open_source(SourceMode::Cyclic, &path).await.unwrap();
        assert_eq!(source.mode(), SourceMode::Cyclic);
        assert_eq!(source.describe(), path.display().to_string());
    }

    #[tokio::test]
    async fn test_open_one_shot_list_skips_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.jsonl");
        append_to_list(&path, &[FeatureVector::new(0.1, 0.2, 0, 1)])
            .await
            .unwrap();
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{\"cpu_request\":1}}").unwrap();
        writeln!(file, "not json").unwrap();
        drop(file);
        append_to_list(&path, &[FeatureVector::new(0.3, 0.4, 9, 2)])
            .await
            .unwrap();

        let source = open_source(SourceMode::OneShot, &path).await.unwrap();
        assert_eq!(source.len().await.unwrap(), 2);
        assert_eq!(
            source.get(1).await.unwrap(),
            Some(FeatureVector::new(0.3, 0.4, 9, 2))
        );
    }

    #[tokio::test]
    async fn test_open_source_missing_list() {
        let err = open_source(SourceMode::Cyclic, Path::new("/nonexistent/list.jsonl"))
            .await
            .err()
            .expect("expected open_source to fail");
        assert!(matches!(err, Error::Io(ref e) if e.kind() == std::io::ErrorKind::NotFound));
    }
}
