//! File sink: writes one JSON line per event to a path, stdout, or stderr

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::adapters::{Adapter, BoxedAdapter};
use crate::error::AdapterError;

/// Where a [`FileAdapter`] writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileTarget {
    /// Append to a file on disk
    Path(PathBuf),

    /// Write to the process's standard output
    Stdout,

    /// Write to the process's standard error
    Stderr,
}

/// Writes each emitted payload plus a trailing newline. Path targets are
/// opened on `open`, fsynced on `flush`, and released on `close`.
#[derive(Debug)]
pub struct FileAdapter {
    target: FileTarget,
    file: Option<File>,
    closed: bool,
}

impl FileAdapter {
    /// Create an adapter appending to the given path
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self {
            target: FileTarget::Path(path.into()),
            file: None,
            closed: true,
        }
    }

    /// Create an adapter writing to stdout
    pub fn stdout() -> Self {
        Self {
            target: FileTarget::Stdout,
            file: None,
            closed: true,
        }
    }

    /// Create an adapter writing to stderr
    pub fn stderr() -> Self {
        Self {
            target: FileTarget::Stderr,
            file: None,
            closed: true,
        }
    }

    async fn write_line(&mut self, payload: &str) -> std::result::Result<(), AdapterError> {
        let line = format!("{payload}\n");
        match &self.target {
            FileTarget::Path(_) => match self.file.as_mut() {
                Some(file) => file
                    .write_all(line.as_bytes())
                    .await
                    .map_err(|e| AdapterError::emit(e.to_string())),
                None => Err(AdapterError::closed("file is not open")),
            },
            FileTarget::Stdout => tokio::io::stdout()
                .write_all(line.as_bytes())
                .await
                .map_err(|e| AdapterError::emit(e.to_string())),
            FileTarget::Stderr => tokio::io::stderr()
                .write_all(line.as_bytes())
                .await
                .map_err(|e| AdapterError::emit(e.to_string())),
        }
    }
}

#[async_trait]
impl Adapter for FileAdapter {
    async fn open(&mut self) -> std::result::Result<(), AdapterError> {
        if let FileTarget::Path(path) = &self.target {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
                .map_err(|e| AdapterError::closed(e.to_string()))?;
            self.file = Some(file);
        }
        self.closed = false;
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut file) = self.file.take() {
            if let Err(error) = file.flush().await {
                tracing::warn!(%error, "file adapter flush on close failed");
            }
        }
        self.closed = true;
    }

    async fn flush(&mut self, _timeout: Duration) -> std::result::Result<(), AdapterError> {
        if self.closed {
            return Err(AdapterError::closed("file adapter is closed"));
        }
        match &self.target {
            FileTarget::Path(_) => {
                if let Some(file) = self.file.as_mut() {
                    file.flush()
                        .await
                        .map_err(|e| AdapterError::emit(e.to_string()))?;
                    file.sync_all()
                        .await
                        .map_err(|e| AdapterError::emit(e.to_string()))?;
                }
                Ok(())
            }
            FileTarget::Stdout => tokio::io::stdout()
                .flush()
                .await
                .map_err(|e| AdapterError::emit(e.to_string())),
            FileTarget::Stderr => tokio::io::stderr()
                .flush()
                .await
                .map_err(|e| AdapterError::emit(e.to_string())),
        }
    }

    async fn emit(&mut self, payload: &str) -> std::result::Result<(), AdapterError> {
        if self.closed {
            return Err(AdapterError::closed("file adapter is closed"));
        }
        self.write_line(payload).await
    }

    fn closed(&self) -> bool {
        self.closed
    }

    fn clone_adapter(&self) -> BoxedAdapter {
        Box::new(Self {
            target: self.target.clone(),
            file: None,
            closed: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");

        let mut adapter = FileAdapter::path(&path);
        adapter.open().await.unwrap();
        adapter.emit(r#"{"name":"one"}"#).await.unwrap();
        adapter.emit(r#"{"name":"two"}"#).await.unwrap();
        adapter.flush(Duration::from_secs(1)).await.unwrap();
        adapter.close().await;

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "{\"name\":\"one\"}\n{\"name\":\"two\"}\n");
    }

    #[tokio::test]
    async fn test_emit_requires_open() {
        let dir = tempfile::tempdir().unwrap();
        let mut adapter = FileAdapter::path(dir.path().join("events.jsonl"));

        assert!(matches!(
            adapter.emit("{}").await,
            Err(AdapterError::Closed { .. })
        ));
    }

    #[tokio::test]
    async fn test_open_failure_reports_closed() {
        let mut adapter = FileAdapter::path("/nonexistent-dir/events.jsonl");
        assert!(matches!(
            adapter.open().await,
            Err(AdapterError::Closed { .. })
        ));
        assert!(adapter.closed());
        // Close after a failed open is safe.
        adapter.close().await;
    }

    #[tokio::test]
    async fn test_reopen_after_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");

        let mut adapter = FileAdapter::path(&path);
        adapter.open().await.unwrap();
        adapter.emit("a").await.unwrap();
        adapter.close().await;

        adapter.open().await.unwrap();
        adapter.emit("b").await.unwrap();
        adapter.close().await;

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "a\nb\n");
    }

    #[tokio::test]
    async fn test_clone_adapter_starts_closed() {
        let dir = tempfile::tempdir().unwrap();
        let mut adapter = FileAdapter::path(dir.path().join("events.jsonl"));
        adapter.open().await.unwrap();

        let copy = adapter.clone_adapter();
        assert!(copy.closed());
    }

    #[tokio::test]
    async fn test_stdout_adapter_opens_without_handle() {
        let mut adapter = FileAdapter::stdout();
        adapter.open().await.unwrap();
        assert!(!adapter.closed());
        adapter.close().await;
    }
}
