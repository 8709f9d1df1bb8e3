use std::sync::Arc;

use serde::Deserialize;

use ferry_core::{BlockClient, MemoryBlockClient};

use super::Result;

/// Remote storage backend selection.
#[derive(Clone, Deserialize)]
#[serde(tag = "type")]
pub enum Config {
    S3(super::s3::S3Config),
    /// Keeps everything in process memory; for development only.
    Memory,
}

impl Config {
    pub async fn new_client(&self) -> Result<Arc<dyn BlockClient>> {
        match self {
            Self::S3(cfg) => Ok(Arc::new(cfg.new_objects().await?)),
            Self::Memory => {
                tracing::warn!("using in-memory block client, uploaded objects are not persisted");
                Ok(Arc::new(MemoryBlockClient::new()))
            }
        }
    }
}
