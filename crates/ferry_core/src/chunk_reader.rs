use std::io::SeekFrom;
use std::path::Path;

use bytes::{Bytes, BytesMut};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::errors::Result;

/// Reads a local file sequentially in fixed-size chunks, starting from a byte offset.
///
/// Every chunk is exactly `chunk_size` bytes except the last one. Short reads from the OS are
/// accumulated until the chunk is full or the file ends.
pub struct ChunkReader {
    file: File,
    chunk_size: usize,
    offset: u64,
}

impl ChunkReader {
    pub async fn open(path: &Path, offset: u64, chunk_size: usize) -> Result<ChunkReader> {
        let mut file = File::open(path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        Ok(ChunkReader {
            file,
            chunk_size,
            offset,
        })
    }

    /// Byte offset of the next chunk.
    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read the next chunk, or `None` once the end of the file is reached.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        let mut buf = BytesMut::with_capacity(self.chunk_size);
        while buf.len() < self.chunk_size {
            let remaining = (self.chunk_size - buf.len()) as u64;
            let n = (&mut self.file).take(remaining).read_buf(&mut buf).await?;
            if n == 0 {
                break;
            }
        }

        if buf.is_empty() {
            return Ok(None);
        }

        self.offset += buf.len() as u64;
        Ok(Some(buf.freeze()))
    }
}
