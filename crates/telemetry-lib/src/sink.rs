//! Record storage
//!
//! Records are appended one per line to `<dataset_dir>/<vm>.dat`.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to write record to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid VM identifier '{0}'")]
    InvalidIdentifier(String),
}

/// Destination for serialized records
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Append one record for `vm`, creating the underlying artifact if absent
    async fn append(&self, vm: &str, record: &str) -> Result<(), SinkError>;
}

/// Appends records to per-VM `.dat` files under a dataset directory
#[derive(Debug, Clone)]
pub struct FileRecordSink {
    dataset_dir: PathBuf,
}

impl FileRecordSink {
    pub fn new(dataset_dir: impl Into<PathBuf>) -> Self {
        Self {
            dataset_dir: dataset_dir.into(),
        }
    }

    pub fn dataset_dir(&self) -> &Path {
        &self.dataset_dir
    }

    /// Path of the dataset file for a VM
    pub fn path_for(&self, vm: &str) -> Result<PathBuf, SinkError> {
        // VM names become file names; refuse anything that could leave the directory
        if vm.is_empty() || vm.contains('/') || vm.contains('\\') || vm == "." || vm == ".." {
            return Err(SinkError::InvalidIdentifier(vm.to_string()));
        }
        Ok(self.dataset_dir.join(format!("{}.dat", vm)))
    }
}

#[async_trait]
impl RecordSink for FileRecordSink {
    async fn append(&self, vm: &str, record: &str) -> Result<(), SinkError> {
        let path = self.path_for(vm)?;
        let write_err = |source: std::io::Error| SinkError::Write {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(&self.dataset_dir)
            .await
            .map_err(write_err)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(write_err)?;

        let mut line = String::with_capacity(record.len() + 1);
        line.push_str(record);
        line.push('\n');

        file.write_all(line.as_bytes()).await.map_err(write_err)?;
        file.flush().await.map_err(write_err)?;

        debug!(path = %path.display(), bytes = line.len(), "Appended record");
        Ok(())
    }
}

/// Keeps records in memory, keyed by VM
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<HashMap<String, Vec<String>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records appended so far for `vm`
    pub async fn records(&self, vm: &str) -> Vec<String> {
        self.records
            .lock()
            .await
            .get(vm)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn append(&self, vm: &str, record: &str) -> Result<(), SinkError> {
        self.records
            .lock()
            .await
            .entry(vm.to_string())
            .or_default()
            .push(record.to_string());
        Ok(())
    }
}
