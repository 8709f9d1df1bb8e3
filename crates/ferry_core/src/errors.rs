use thiserror;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers of [`crate::Uploader`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Validation(String),

    #[error("file size {size} exceeds the maximum limit of {max} bytes")]
    FileTooLarge { size: u64, max: u64 },

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("upload of {object_name} cancelled after {uploaded_size} bytes")]
    Cancelled {
        object_name: String,
        uploaded_size: u64,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// An upload attempt that failed after it started talking to the remote service.
///
/// The resume record is left at its last persisted state, so the same call can be repeated
/// later to pick up where this one stopped.
#[derive(thiserror::Error, Debug)]
#[error("upload of {object_name} failed after {uploaded_size} bytes: {cause}")]
pub struct UploadError {
    pub object_name: String,
    pub uploaded_size: u64,
    #[source]
    pub cause: UploadFailure,
}

#[derive(thiserror::Error, Debug)]
pub enum UploadFailure {
    #[error("staging block {block_id} at offset {offset} failed after {retries} retries")]
    RetriesExhausted {
        block_id: String,
        offset: u64,
        retries: u32,
        #[source]
        source: BlockError,
    },

    #[error("staging block {block_id} at offset {offset} failed")]
    StageFailed {
        block_id: String,
        offset: u64,
        #[source]
        source: BlockError,
    },

    #[error("committing {blocks} blocks failed")]
    CommitFailed {
        blocks: usize,
        #[source]
        source: BlockError,
    },
}

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure reported by a [`crate::BlockClient`].
///
/// Transient failures are retried by the uploader up to its retry ceiling, fatal ones abort the
/// upload immediately.
#[derive(thiserror::Error, Debug)]
pub enum BlockError {
    #[error("transient block client error: {0}")]
    Transient(#[source] BoxError),

    #[error("block client error: {0}")]
    Fatal(#[source] BoxError),
}

impl BlockError {
    pub fn transient<E: Into<BoxError>>(e: E) -> Self {
        BlockError::Transient(e.into())
    }

    pub fn fatal<E: Into<BoxError>>(e: E) -> Self {
        BlockError::Fatal(e.into())
    }

    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, BlockError::Transient(_))
    }
}
