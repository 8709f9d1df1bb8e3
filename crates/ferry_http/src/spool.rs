use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use axum::extract::multipart::Field;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use uuid::Uuid;

use crate::errors::{Error, Result};

pub(crate) const FILE_FIELD: &str = "file";
const SPOOL_BUFFER_SIZE: usize = 1024 * 1024;

/// A request body written out to local disk.
#[derive(Debug)]
pub(crate) struct SpooledFile {
    pub(crate) path: PathBuf,
    pub(crate) size: u64,
}

/// Removes a spool file that never made it to a finished upload, including when the request
/// future is dropped halfway through writing it.
struct PartialSpool<'a> {
    path: &'a Path,
    keep: bool,
}

impl Drop for PartialSpool<'_> {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        match std::fs::remove_file(self.path) {
            Err(e) if e.kind() != ErrorKind::NotFound => {
                tracing::warn!(path = %self.path.display(), "failed to remove partial spool file: {e}");
            }
            _ => {}
        }
    }
}

/// Write `field` to a fresh file under `spool_dir`, failing once more than `max_size` bytes
/// arrive.
pub(crate) async fn spool_field(
    field: &mut Field<'_>,
    spool_dir: &Path,
    max_size: u64,
) -> Result<SpooledFile> {
    tokio::fs::create_dir_all(spool_dir).await?;
    let path = spool_dir.join(format!("{}.upload", Uuid::new_v4()));

    let mut partial = PartialSpool {
        path: &path,
        keep: false,
    };
    let size = write_field(field, &path, max_size).await?;
    partial.keep = true;
    drop(partial);

    tracing::debug!(path = %path.display(), size, "spooled upload");
    Ok(SpooledFile { path, size })
}

async fn write_field(field: &mut Field<'_>, path: &Path, max_size: u64) -> Result<u64> {
    let mut file = BufWriter::with_capacity(SPOOL_BUFFER_SIZE, File::create(path).await?);
    let mut size: u64 = 0;
    while let Some(chunk) = field.chunk().await? {
        size += chunk.len() as u64;
        if size > max_size {
            return Err(Error::FileTooLarge { max: max_size });
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.into_inner().sync_all().await?;
    Ok(size)
}
