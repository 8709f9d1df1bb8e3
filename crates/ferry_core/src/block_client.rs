//! # Remote Block Client
//!
//! The narrow contract the uploader needs from a remote storage service: stage an opaque byte
//! buffer under a block identifier against a named object, then commit an ordered list of block
//! identifiers to materialize the object.
//!
//! ## Known Implementations
//!
//! * [`crate::MemoryBlockClient`] keeps staged blocks and committed objects in process memory.
//! * `ferry_objectstore::S3` stages each block as a temporary object and composes the final
//!   object with a multipart upload on commit.
use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use crate::errors::BlockError;

/// Identifier of a staged block.
///
/// Identifiers must be unique within an object: the remote service indexes staged blocks by
/// identifier, so reusing one would overwrite another chunk's staged data.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BlockId(String);

impl BlockId {
    /// Generate a fresh, globally unique identifier.
    pub fn generate() -> Self {
        BlockId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for BlockId {
    fn from(s: String) -> BlockId {
        BlockId(s)
    }
}

impl From<&BlockId> for String {
    fn from(b: &BlockId) -> String {
        b.0.clone()
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[async_trait]
pub trait BlockClient: Send + Sync + 'static {
    /// Stage `bytes` under `block_id` against `object_name`. Staging the same identifier twice
    /// replaces the previously staged bytes.
    async fn stage_block(
        &self,
        object_name: &str,
        block_id: &BlockId,
        bytes: Bytes,
    ) -> std::result::Result<(), BlockError>;

    /// Materialize `object_name` as the concatenation of the given blocks in order.
    async fn commit_block_list(
        &self,
        object_name: &str,
        block_ids: &[BlockId],
    ) -> std::result::Result<(), BlockError>;

    /// Smallest block the backend can compose, the last block of an object excepted.
    fn min_block_size(&self) -> u64 {
        0
    }

    /// Reject object names the backend cannot store, before anything is staged.
    fn check_object_name(&self, _object_name: &str) -> std::result::Result<(), String> {
        Ok(())
    }
}
