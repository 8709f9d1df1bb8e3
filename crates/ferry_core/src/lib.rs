//! # Ferry Core
//!
//! Resumable staged-block uploads. A large local file is read in fixed-size chunks, each chunk
//! is staged as a named block against a remote object through a [`BlockClient`], progress is
//! checkpointed through a [`ResumeStateStore`] and the object is materialized by committing the
//! ordered block list.
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use ferry_core::{FileResumeStore, MemoryBlockClient, ResumeLocation, UploadOptions, Uploader};
//!
//! # async fn run() -> ferry_core::Result<()> {
//! let client = Arc::new(MemoryBlockClient::new());
//! let store = Arc::new(FileResumeStore::new(ResumeLocation::PerObject("./state".into())));
//! let mut uploader = Uploader::new(client, store, UploadOptions::default())?;
//!
//! let progress = uploader.progress();
//! uploader.upload(Path::new("/tmp/big.iso"), "images/big.iso").await?;
//! assert_eq!(progress.percentage(), 100.0);
//! # Ok(())
//! # }
//! ```
pub mod block_client;
pub use block_client::{BlockClient, BlockId};

mod chunk_reader;
pub use chunk_reader::ChunkReader;

pub mod errors;
pub use errors::{BlockError, BoxError, Error, Result, UploadError, UploadFailure};

mod memory;
pub use memory::MemoryBlockClient;

mod progress;
pub use progress::ProgressReporter;

pub mod resume;
pub use resume::{FileResumeStore, ResumeLocation, ResumeRecord, ResumeStateStore};

mod retry;
pub use retry::{BackoffConfig, RetryPolicy};

mod uploader;
pub use uploader::{
    UploadOptions, UploadSummary, Uploader, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_FILE_SIZE,
    DEFAULT_MAX_RETRIES,
};
