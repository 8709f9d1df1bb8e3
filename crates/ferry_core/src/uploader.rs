//! # Upload Orchestrator
//!
//! [`Uploader`] transfers one local file to a remote object as a sequence of staged blocks:
//!
//! 1. load a [`ResumeRecord`] for the object, if one exists and can be trusted
//! 2. read the file from the recorded offset in `chunk_size` pieces
//! 3. stage every chunk under a fresh [`BlockId`], retrying transient failures
//! 4. checkpoint the ordered block list after staged chunks
//! 5. commit the block list, then remove the local file and the checkpoint
//!
//! A crash or failure anywhere before the commit leaves a checkpoint that lets the next call
//! for the same object name skip the chunks that were already staged.
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::block_client::{BlockClient, BlockId};
use crate::chunk_reader::ChunkReader;
use crate::errors::{BlockError, Error, Result, UploadError, UploadFailure};
use crate::progress::{Progress, ProgressReporter};
use crate::resume::{ResumeRecord, ResumeStateStore};
use crate::retry::{BackoffConfig, RetryPolicy};

pub const DEFAULT_CHUNK_SIZE: u64 = 100 * 1024 * 1024;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024 * 1024;

/// Tunables for a single upload. Every field can be overridden per call.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct UploadOptions {
    /// Maximum bytes per staged block.
    pub chunk_size: u64,
    /// Retry ceiling per chunk.
    pub max_retries: u32,
    /// Largest source file accepted.
    pub max_file_size: u64,
    /// Persist the resume record every this many staged chunks.
    pub checkpoint_interval: u32,
    pub backoff: BackoffConfig,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            checkpoint_interval: 1,
            backoff: BackoffConfig::default(),
        }
    }
}

impl UploadOptions {
    pub fn retry_policy(&self) -> RetryPolicy {
        self.backoff.policy(self.max_retries)
    }

    /// Reject options the given client cannot work with.
    pub fn validate(&self, client: &dyn BlockClient) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Validation("chunk_size must be greater than 0".into()));
        }
        if usize::try_from(self.chunk_size).is_err() {
            return Err(Error::Validation(format!(
                "chunk_size {} does not fit in memory",
                self.chunk_size
            )));
        }
        let min = client.min_block_size();
        if self.chunk_size < min {
            return Err(Error::Validation(format!(
                "chunk_size {} is below the backend minimum of {min} bytes",
                self.chunk_size
            )));
        }
        if self.checkpoint_interval == 0 {
            return Err(Error::Validation(
                "checkpoint_interval must be greater than 0".into(),
            ));
        }
        if self.backoff.base_delay_ms > self.backoff.max_delay_ms {
            return Err(Error::Validation(
                "backoff base_delay_ms must not exceed max_delay_ms".into(),
            ));
        }
        Ok(())
    }
}

/// Outcome of a completed upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadSummary {
    pub object_name: String,
    pub bytes: u64,
    pub blocks: usize,
    /// Offset the session resumed from, `0` for a fresh upload.
    pub resumed_from: u64,
}

/// In-memory state of the active session.
struct UploadSession<'a> {
    object_name: &'a str,
    file_size: u64,
    uploaded_size: u64,
    block_ids: Vec<BlockId>,
    unsaved_chunks: u32,
}

impl UploadSession<'_> {
    fn record(&self) -> ResumeRecord {
        ResumeRecord::new(self.object_name, self.uploaded_size, &self.block_ids)
    }

    fn upload_error(&self, cause: UploadFailure) -> Error {
        Error::Upload(UploadError {
            object_name: self.object_name.to_string(),
            uploaded_size: self.uploaded_size,
            cause,
        })
    }

    fn cancelled(&self) -> Error {
        Error::Cancelled {
            object_name: self.object_name.to_string(),
            uploaded_size: self.uploaded_size,
        }
    }
}

/// Drives one upload session at a time against a [`BlockClient`].
///
/// Sessions are serialized by `&mut self`; run several uploads concurrently by giving each its
/// own `Uploader` (they can share the client and the resume store as long as the store keys
/// records by object name).
pub struct Uploader {
    client: Arc<dyn BlockClient>,
    store: Arc<dyn ResumeStateStore>,
    options: UploadOptions,
    progress: Progress,
    cancel: CancellationToken,
}

impl Uploader {
    pub fn new(
        client: Arc<dyn BlockClient>,
        store: Arc<dyn ResumeStateStore>,
        options: UploadOptions,
    ) -> Result<Self> {
        options.validate(client.as_ref())?;
        Ok(Self {
            client,
            store,
            options,
            progress: Progress::default(),
            cancel: CancellationToken::new(),
        })
    }

    /// Stop at the next chunk boundary (or during a backoff wait) once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn options(&self) -> &UploadOptions {
        &self.options
    }

    /// Handle for reading this uploader's progress from elsewhere.
    pub fn progress(&self) -> ProgressReporter {
        self.progress.reporter()
    }

    pub async fn upload(&mut self, local_source_path: &Path, object_name: &str) -> Result<UploadSummary> {
        let options = self.options.clone();
        self.upload_with(local_source_path, object_name, &options).await
    }

    pub async fn upload_with(
        &mut self,
        local_source_path: &Path,
        object_name: &str,
        options: &UploadOptions,
    ) -> Result<UploadSummary> {
        if object_name.is_empty() {
            return Err(Error::Validation("object name must not be empty".into()));
        }
        self.client
            .check_object_name(object_name)
            .map_err(|e| Error::Validation(format!("invalid object name {object_name:?}: {e}")))?;
        options.validate(self.client.as_ref())?;
        self.progress.reset();

        let file_size = tokio::fs::metadata(local_source_path).await?.len();
        tracing::info!(
            object = %object_name,
            path = %local_source_path.display(),
            file_size,
            "starting upload",
        );
        if file_size > options.max_file_size {
            tracing::error!(
                object = %object_name,
                file_size,
                max = options.max_file_size,
                "file exceeds maximum size",
            );
            return Err(Error::FileTooLarge {
                size: file_size,
                max: options.max_file_size,
            });
        }

        let mut session = UploadSession {
            object_name,
            file_size,
            uploaded_size: 0,
            block_ids: Vec::new(),
            unsaved_chunks: 0,
        };
        self.restore(&mut session, options.chunk_size).await;
        let resumed_from = session.uploaded_size;

        let started = Instant::now();
        match self.stage_all(&mut session, local_source_path, options).await {
            Ok(()) => {}
            Err(e) => {
                // keep whatever was staged before the failure
                if session.unsaved_chunks > 0 {
                    if let Err(save_err) = self.store.save(&session.record()).await {
                        tracing::warn!(object = %object_name, "failed to save resume record: {save_err}");
                    }
                }
                return Err(e);
            }
        }

        tracing::debug!(object = %object_name, blocks = session.block_ids.len(), "committing block list");
        if let Err(source) = self
            .client
            .commit_block_list(object_name, &session.block_ids)
            .await
        {
            tracing::error!(
                object = %object_name,
                blocks = session.block_ids.len(),
                "commit failed, keeping resume record: {source}",
            );
            let blocks = session.block_ids.len();
            return Err(session.upload_error(UploadFailure::CommitFailed { blocks, source }));
        }
        self.progress.complete();
        tracing::info!(
            object = %object_name,
            bytes = session.uploaded_size,
            blocks = session.block_ids.len(),
            elapsed = ?started.elapsed(),
            "upload completed",
        );

        self.cleanup(local_source_path, object_name).await;

        Ok(UploadSummary {
            object_name: object_name.to_string(),
            bytes: session.uploaded_size,
            blocks: session.block_ids.len(),
            resumed_from,
        })
    }

    /// Resume from a stored record when it belongs to this object and fits the file. A record
    /// whose blocks cannot hold its byte count at `chunk_size` is discarded; resuming with a
    /// smaller chunk size than before therefore starts over.
    async fn restore(&self, session: &mut UploadSession<'_>, chunk_size: u64) {
        let Some(record) = self.store.load(session.object_name).await else {
            return;
        };

        if record.object_name != session.object_name {
            tracing::warn!(
                object = %session.object_name,
                recorded = %record.object_name,
                "resume record belongs to another object, starting fresh",
            );
            return;
        }
        if !record.is_consistent_with(session.file_size, chunk_size) {
            tracing::warn!(
                object = %session.object_name,
                uploaded_size = record.uploaded_size,
                blocks = record.block_ids.len(),
                file_size = session.file_size,
                chunk_size,
                "resume record does not match source file, starting fresh",
            );
            return;
        }

        session.uploaded_size = record.uploaded_size;
        session.block_ids = record.block_ids();
        self.progress.update(session.uploaded_size, session.file_size);
        tracing::info!(
            object = %session.object_name,
            offset = session.uploaded_size,
            file_size = session.file_size,
            progress = self.progress.reporter().percentage(),
            "resuming upload",
        );
    }

    async fn stage_all(
        &self,
        session: &mut UploadSession<'_>,
        path: &Path,
        options: &UploadOptions,
    ) -> Result<()> {
        let policy = options.retry_policy();
        let chunk_size = options.chunk_size as usize;
        let mut reader = ChunkReader::open(path, session.uploaded_size, chunk_size).await?;

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!(object = %session.object_name, offset = session.uploaded_size, "upload cancelled");
                return Err(session.cancelled());
            }

            let offset = reader.offset();
            let Some(chunk) = reader.next_chunk().await? else {
                break;
            };
            let len = chunk.len() as u64;

            let block_id = BlockId::generate();
            self.stage_with_retry(session, &policy, &block_id, offset, chunk)
                .await?;

            session.block_ids.push(block_id);
            session.uploaded_size += len;
            session.unsaved_chunks += 1;
            self.progress.update(session.uploaded_size, session.file_size);
            tracing::info!(
                object = %session.object_name,
                offset,
                len,
                uploaded_size = session.uploaded_size,
                file_size = session.file_size,
                progress = self.progress.reporter().percentage(),
                "staged block",
            );

            if session.unsaved_chunks >= options.checkpoint_interval {
                self.checkpoint(session).await?;
            }
        }

        if session.unsaved_chunks > 0 {
            self.checkpoint(session).await?;
        }
        Ok(())
    }

    async fn checkpoint(&self, session: &mut UploadSession<'_>) -> Result<()> {
        self.store.save(&session.record()).await?;
        session.unsaved_chunks = 0;
        Ok(())
    }

    async fn stage_with_retry(
        &self,
        session: &UploadSession<'_>,
        policy: &RetryPolicy,
        block_id: &BlockId,
        offset: u64,
        chunk: bytes::Bytes,
    ) -> Result<()> {
        let mut retries = 0;
        loop {
            let result = self
                .client
                .stage_block(session.object_name, block_id, chunk.clone())
                .await;
            let source = match result {
                Ok(()) => return Ok(()),
                Err(source @ BlockError::Fatal(_)) => {
                    tracing::error!(
                        object = %session.object_name,
                        block = %block_id,
                        offset,
                        retry = retries,
                        "staging failed: {source}",
                    );
                    return Err(session.upload_error(UploadFailure::StageFailed {
                        block_id: block_id.to_string(),
                        offset,
                        source,
                    }));
                }
                Err(source) => source,
            };

            retries += 1;
            if !policy.allows(retries) {
                tracing::error!(
                    object = %session.object_name,
                    block = %block_id,
                    offset,
                    retry = retries,
                    "maximum number of retries exceeded: {source}",
                );
                return Err(session.upload_error(UploadFailure::RetriesExhausted {
                    block_id: block_id.to_string(),
                    offset,
                    retries: policy.max_retries,
                    source,
                }));
            }

            let delay = policy.delay_for(retries);
            tracing::warn!(
                object = %session.object_name,
                block = %block_id,
                offset,
                retry = retries,
                max_retries = policy.max_retries,
                ?delay,
                "transient staging error, retrying: {source}",
            );
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!(object = %session.object_name, offset, "upload cancelled during backoff");
                    return Err(session.cancelled());
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Remove the source file and the resume record. Either step may fail without affecting the
    /// committed object.
    async fn cleanup(&self, path: &Path, object_name: &str) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            tracing::warn!(object = %object_name, path = %path.display(), "failed to remove source file: {e}");
        }
        if let Err(e) = self.store.clear(object_name).await {
            tracing::warn!(object = %object_name, "failed to clear resume record: {e}");
        }
    }
}
