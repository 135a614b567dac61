// crates/server/src/results/mod.rs
//! Gateway to the tabular artifacts the crawler leaves in the data directory.
//!
//! Stateless with respect to the job registry: everything is derived from
//! the file system at query time.

pub mod decode;
pub mod record;

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use ts_rs::TS;

pub use decode::DecodeError;
pub use record::TweetRecord;

/// Artifact encodings the gateway recognizes, by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFormat {
    Csv,
    Xlsx,
}

impl ArtifactFormat {
    pub fn from_filename(filename: &str) -> Option<Self> {
        if filename.ends_with(".csv") {
            Some(Self::Csv)
        } else if filename.ends_with(".xlsx") {
            Some(Self::Xlsx)
        } else {
            None
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Csv => "text/csv; charset=utf-8",
            Self::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        }
    }
}

/// Listing entry for one artifact.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../web/client/src/types/generated/"))]
#[serde(rename_all = "camelCase")]
pub struct DataFile {
    pub filename: String,
    #[ts(type = "number")]
    pub size: u64,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum ResultStoreError {
    #[error("Invalid filename: {0:?}")]
    InvalidFilename(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("IO error on {filename}: {source}")]
    Io {
        filename: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decode {filename}: {source}")]
    Decode {
        filename: String,
        #[source]
        source: DecodeError,
    },
}

impl ResultStoreError {
    fn io(filename: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            filename: filename.into(),
            source,
        }
    }
}

/// Filename -> modification time, as seen by one listing.
pub type ArtifactSnapshot = HashMap<String, DateTime<Utc>>;

/// An opened artifact, ready to stream to a client.
#[derive(Debug)]
pub struct Download {
    pub filename: String,
    pub size: u64,
    pub format: Option<ArtifactFormat>,
    pub file: tokio::fs::File,
}

/// Accept only a bare file name: one normal path component, no separators.
pub fn validate_filename(filename: &str) -> Result<(), ResultStoreError> {
    let invalid = || ResultStoreError::InvalidFilename(filename.to_string());

    if filename.is_empty() || filename.contains(|c: char| matches!(c, '/' | '\\' | '\0')) {
        return Err(invalid());
    }
    let mut components = Path::new(filename).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(invalid()),
    }
}

/// Reads, streams and deletes artifacts in one directory.
#[derive(Debug, Clone)]
pub struct ResultStore {
    dir: PathBuf,
}

impl ResultStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Recognized artifacts, most recently modified first. A missing
    /// directory is an empty listing.
    pub async fn list(&self) -> Result<Vec<DataFile>, ResultStoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ResultStoreError::io(self.dir.display().to_string(), e)),
        };

        let mut files = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => return Err(ResultStoreError::io(self.dir.display().to_string(), e)),
            };
            let Ok(filename) = entry.file_name().into_string() else {
                continue;
            };
            if ArtifactFormat::from_filename(&filename).is_none() {
                continue;
            }
            // Entries can vanish between read_dir and stat.
            let metadata = match entry.metadata().await {
                Ok(m) if m.is_file() => m,
                Ok(_) => continue,
                Err(e) => {
                    tracing::debug!(filename = %filename, error = %e, "Skipping unreadable artifact");
                    continue;
                }
            };
            files.push(data_file(filename, &metadata));
        }

        files.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));
        Ok(files)
    }

    /// Decode an artifact into rows.
    pub async fn read(&self, filename: &str) -> Result<Vec<TweetRecord>, ResultStoreError> {
        let path = self.existing(filename).await?;
        let format = ArtifactFormat::from_filename(filename)
            .ok_or_else(|| ResultStoreError::UnsupportedFormat(filename.to_string()))?;

        let name = filename.to_string();
        let decoded = tokio::task::spawn_blocking(move || match format {
            ArtifactFormat::Csv => std::fs::File::open(&path)
                .map_err(|e| ResultStoreError::io(&name, e))
                .and_then(|file| {
                    decode::decode_csv(std::io::BufReader::new(file))
                        .map_err(|source| ResultStoreError::Decode { filename: name, source })
                }),
            ArtifactFormat::Xlsx => decode::decode_xlsx(&path)
                .map_err(|source| ResultStoreError::Decode { filename: name, source }),
        })
        .await
        .map_err(|e| ResultStoreError::io(filename, std::io::Error::other(e)))??;

        tracing::debug!(filename = %filename, rows = decoded.len(), "Artifact decoded");
        Ok(decoded)
    }

    /// Open an artifact for streaming.
    pub async fn open(&self, filename: &str) -> Result<Download, ResultStoreError> {
        let path = self.existing(filename).await?;
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| not_found_or_io(filename, e))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| ResultStoreError::io(filename, e))?
            .len();

        Ok(Download {
            filename: filename.to_string(),
            size,
            format: ArtifactFormat::from_filename(filename),
            file,
        })
    }

    /// Delete an artifact. Irrecoverable.
    pub async fn remove(&self, filename: &str) -> Result<(), ResultStoreError> {
        let path = self.existing(filename).await?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| not_found_or_io(filename, e))?;
        tracing::info!(filename = %filename, "Artifact deleted");
        Ok(())
    }

    /// Modification time of every recognized artifact, keyed by filename.
    pub async fn snapshot(&self) -> Result<ArtifactSnapshot, ResultStoreError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .map(|f| (f.filename, f.modified_at))
            .collect())
    }

    /// Artifacts created or rewritten since `before` was taken.
    pub async fn changed_since(
        &self,
        before: &ArtifactSnapshot,
    ) -> Result<Vec<DataFile>, ResultStoreError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|f| before.get(&f.filename) != Some(&f.modified_at))
            .collect())
    }

    /// Validate `filename` and resolve it to an existing regular file.
    async fn existing(&self, filename: &str) -> Result<PathBuf, ResultStoreError> {
        validate_filename(filename)?;
        let path = self.dir.join(filename);
        match tokio::fs::metadata(&path).await {
            Ok(m) if m.is_file() => Ok(path),
            Ok(_) => Err(ResultStoreError::NotFound(filename.to_string())),
            Err(e) => Err(not_found_or_io(filename, e)),
        }
    }
}

fn not_found_or_io(filename: &str, e: std::io::Error) -> ResultStoreError {
    if e.kind() == ErrorKind::NotFound {
        ResultStoreError::NotFound(filename.to_string())
    } else {
        ResultStoreError::io(filename, e)
    }
}

fn data_file(filename: String, metadata: &std::fs::Metadata) -> DataFile {
    let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
    // Not every file system records a birth time.
    let created = metadata.created().unwrap_or(modified);
    DataFile {
        filename,
        size: metadata.len(),
        created_at: created.into(),
        modified_at: modified.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn store_with(files: &[(&str, &str)]) -> (TempDir, ResultStore) {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            std::fs::write(dir.path().join(name), content).unwrap();
        }
        let store = ResultStore::new(dir.path());
        (dir, store)
    }

    fn set_mtime(path: &Path, secs_ago: u64) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(secs_ago))
            .unwrap();
    }

    #[test]
    fn test_validate_filename() {
        for ok in ["tweets.csv", "a b.xlsx", "..hidden.csv", "x"] {
            assert!(validate_filename(ok).is_ok(), "{ok} should be accepted");
        }
        for bad in ["", ".", "..", "../etc/passwd", "a/b.csv", "a\\b.csv", "/abs.csv", "nul\0.csv"] {
            assert!(
                matches!(validate_filename(bad), Err(ResultStoreError::InvalidFilename(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_list_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path().join("does-not-exist"));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_filters_extensions_and_sorts_newest_first() {
        let (dir, store) = store_with(&[
            ("old.csv", "a\n1\n"),
            ("new.xlsx", "not really xlsx"),
            ("notes.txt", "ignored"),
            ("data.CSV", "case-sensitive, ignored"),
        ]);
        std::fs::create_dir(dir.path().join("folder.csv")).unwrap();
        set_mtime(&dir.path().join("old.csv"), 3600);

        let files = store.list().await.unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(names, vec!["new.xlsx", "old.csv"]);
        assert_eq!(files[1].size, 4);
    }

    #[tokio::test]
    async fn test_read_csv_rows() {
        let (_dir, store) = store_with(&[("t.csv", "a,b\n1,2\n")]);
        let rows = store.read("t.csv").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(
            serde_json::to_value(&rows[0]).unwrap(),
            serde_json::json!({"a": "1", "b": "2"})
        );
    }

    #[tokio::test]
    async fn test_read_errors() {
        let (_dir, store) = store_with(&[("notes.txt", "x"), ("bad.xlsx", "garbage")]);

        assert!(matches!(
            store.read("missing.csv").await,
            Err(ResultStoreError::NotFound(_))
        ));
        assert!(matches!(
            store.read("notes.txt").await,
            Err(ResultStoreError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            store.read("bad.xlsx").await,
            Err(ResultStoreError::Decode { .. })
        ));
        assert!(matches!(
            store.read("../notes.txt").await,
            Err(ResultStoreError::InvalidFilename(_))
        ));
    }

    #[tokio::test]
    async fn test_open_reports_size_and_format() {
        let (_dir, store) = store_with(&[("t.csv", "a,b\n1,2\n")]);
        let download = store.open("t.csv").await.unwrap();
        assert_eq!(download.size, 8);
        assert_eq!(download.format, Some(ArtifactFormat::Csv));
        assert!(matches!(
            store.open("nope.csv").await,
            Err(ResultStoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_remove() {
        let (dir, store) = store_with(&[("t.csv", "a\n1\n")]);
        store.remove("t.csv").await.unwrap();
        assert!(!dir.path().join("t.csv").exists());
        assert!(matches!(
            store.remove("t.csv").await,
            Err(ResultStoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_cannot_escape_directory() {
        let outer = tempfile::tempdir().unwrap();
        let inner = outer.path().join("data");
        std::fs::create_dir(&inner).unwrap();
        std::fs::write(outer.path().join("secret.csv"), "a\n1\n").unwrap();

        let store = ResultStore::new(&inner);
        assert!(matches!(
            store.remove("../secret.csv").await,
            Err(ResultStoreError::InvalidFilename(_))
        ));
        assert!(outer.path().join("secret.csv").exists());
    }

    #[tokio::test]
    async fn test_changed_since_snapshot() {
        let (dir, store) = store_with(&[("old.csv", "a\n1\n"), ("rewritten.csv", "a\n1\n")]);
        set_mtime(&dir.path().join("old.csv"), 3600);
        set_mtime(&dir.path().join("rewritten.csv"), 3600);
        let before = store.snapshot().await.unwrap();
        assert_eq!(before.len(), 2);
        assert!(store.changed_since(&before).await.unwrap().is_empty());

        std::fs::write(dir.path().join("fresh.csv"), "a\n1\n").unwrap();
        std::fs::write(dir.path().join("rewritten.csv"), "a\n2\n").unwrap();
        let mut changed: Vec<String> = store
            .changed_since(&before)
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.filename)
            .collect();
        changed.sort();
        assert_eq!(changed, vec!["fresh.csv", "rewritten.csv"]);
    }
}
