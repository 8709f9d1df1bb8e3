//! # Resume State
//!
//! Durable checkpoints of upload progress. The uploader writes a [`ResumeRecord`] after staging
//! chunks and removes it once the object is committed; a record found at startup means a prior
//! session did not finish.
//!
//! The on-disk layout is a small JSON document:
//!
//! ```json
//! {"blob_name": "videos/big.mp4", "uploaded_size": 209715200, "block_ids": ["...", "..."]}
//! ```
//!
//! Recovery tooling may depend on these field names.
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use crate::block_client::BlockId;
use crate::errors::Result;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeRecord {
    #[serde(rename = "blob_name", alias = "object_name")]
    pub object_name: String,
    pub uploaded_size: u64,
    pub block_ids: Vec<String>,
}

impl ResumeRecord {
    pub fn new(object_name: &str, uploaded_size: u64, block_ids: &[BlockId]) -> Self {
        Self {
            object_name: object_name.to_string(),
            uploaded_size,
            block_ids: block_ids.iter().map(String::from).collect(),
        }
    }

    /// Check that the record can describe a prefix of a file of `file_size` bytes staged in
    /// blocks of at most `chunk_size` bytes.
    pub fn is_consistent_with(&self, file_size: u64, chunk_size: u64) -> bool {
        let capacity = (self.block_ids.len() as u64).saturating_mul(chunk_size);
        self.uploaded_size <= file_size
            && self.uploaded_size <= capacity
            && (self.uploaded_size == 0) == self.block_ids.is_empty()
    }

    pub fn block_ids(&self) -> Vec<BlockId> {
        self.block_ids.iter().cloned().map(BlockId::from).collect()
    }
}

/// Persists [`ResumeRecord`]s.
///
/// `load` never fails: a record that cannot be read or parsed is logged and reported as absent
/// so that a torn write degrades to a fresh upload instead of a stuck one.
#[async_trait]
pub trait ResumeStateStore: Send + Sync + 'static {
    /// Overwrite the stored record for `record.object_name`.
    async fn save(&self, record: &ResumeRecord) -> Result<()>;

    async fn load(&self, object_name: &str) -> Option<ResumeRecord>;

    /// Remove the stored record, tolerating its absence.
    async fn clear(&self, object_name: &str) -> Result<()>;
}

/// Where a [`FileResumeStore`] keeps its records.
#[derive(Clone, Debug)]
pub enum ResumeLocation {
    /// One file per object name under the given directory.
    PerObject(PathBuf),
    /// A single well-known file shared by every object name.
    Single(PathBuf),
}

#[derive(Clone, Debug)]
pub struct FileResumeStore {
    location: ResumeLocation,
}

impl FileResumeStore {
    pub fn new(location: ResumeLocation) -> Self {
        Self { location }
    }

    pub fn path_for(&self, object_name: &str) -> PathBuf {
        match &self.location {
            ResumeLocation::Single(path) => path.clone(),
            ResumeLocation::PerObject(dir) => {
                let digest = Sha256::digest(object_name.as_bytes());
                dir.join(format!("{:x}.json", digest))
            }
        }
    }
}

#[async_trait]
impl ResumeStateStore for FileResumeStore {
    async fn save(&self, record: &ResumeRecord) -> Result<()> {
        let path = self.path_for(&record.object_name);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let data = serde_json::to_vec(record).map_err(std::io::Error::from)?;

        // write the whole record next to the target and rename it into place so that readers
        // only ever see the previous record or the new one
        let tmp = tmp_path(&path);
        let mut f = tokio::fs::File::create(&tmp).await?;
        f.write_all(&data).await?;
        f.sync_all().await?;
        drop(f);
        tokio::fs::rename(&tmp, &path).await?;

        tracing::trace!(
            object = %record.object_name,
            uploaded_size = record.uploaded_size,
            blocks = record.block_ids.len(),
            path = %path.display(),
            "saved resume record",
        );
        Ok(())
    }

    async fn load(&self, object_name: &str) -> Option<ResumeRecord> {
        let path = self.path_for(object_name);
        let data = match tokio::fs::read(&path).await {
            Ok(d) => d,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %path.display(), "unreadable resume record, ignoring: {e}");
                return None;
            }
        };

        match serde_json::from_slice::<ResumeRecord>(&data) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(path = %path.display(), "corrupt resume record, ignoring: {e}");
                None
            }
        }
    }

    async fn clear(&self, object_name: &str) -> Result<()> {
        let path = self.path_for(object_name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
