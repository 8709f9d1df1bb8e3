use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

use crate::block_client::{BlockClient, BlockId};
use crate::errors::BlockError;

#[derive(thiserror::Error, Debug)]
enum MemoryError {
    #[error("block {0} is not staged for {1}")]
    UnknownBlock(String, String),
}

/// [`BlockClient`] that keeps staged blocks and committed objects in memory.
#[derive(Default)]
pub struct MemoryBlockClient {
    staged: Mutex<HashMap<String, HashMap<String, Bytes>>>,
    committed: Mutex<HashMap<String, Bytes>>,
    stage_calls: AtomicUsize,
}

impl MemoryBlockClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Contents of a committed object.
    pub fn committed(&self, object_name: &str) -> Option<Bytes> {
        self.committed
            .lock()
            .expect("memory block client lock poisoned")
            .get(object_name)
            .cloned()
    }

    /// Number of staged, uncommitted blocks held for an object.
    pub fn staged_count(&self, object_name: &str) -> usize {
        self.staged
            .lock()
            .expect("memory block client lock poisoned")
            .get(object_name)
            .map(|blocks| blocks.len())
            .unwrap_or(0)
    }

    /// Total number of `stage_block` calls received.
    pub fn stage_calls(&self) -> usize {
        self.stage_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlockClient for MemoryBlockClient {
    async fn stage_block(
        &self,
        object_name: &str,
        block_id: &BlockId,
        bytes: Bytes,
    ) -> Result<(), BlockError> {
        self.stage_calls.fetch_add(1, Ordering::SeqCst);
        self.staged
            .lock()
            .expect("memory block client lock poisoned")
            .entry(object_name.to_string())
            .or_default()
            .insert(block_id.to_string(), bytes);
        Ok(())
    }

    async fn commit_block_list(
        &self,
        object_name: &str,
        block_ids: &[BlockId],
    ) -> Result<(), BlockError> {
        let mut staged = self.staged.lock().expect("memory block client lock poisoned");
        let blocks = staged.get(object_name);

        let mut object = BytesMut::new();
        for id in block_ids {
            let bytes = blocks.and_then(|b| b.get(id.as_str())).ok_or_else(|| {
                BlockError::fatal(MemoryError::UnknownBlock(
                    id.to_string(),
                    object_name.to_string(),
                ))
            })?;
            object.extend_from_slice(bytes);
        }

        staged.remove(object_name);
        self.committed
            .lock()
            .expect("memory block client lock poisoned")
            .insert(object_name.to_string(), object.freeze());
        Ok(())
    }
}
