use std::net::SocketAddr;
use std::path::PathBuf;

use serde::Deserialize;

use ferry_core::{ResumeLocation, UploadOptions};

#[derive(Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    #[serde(default = "default_spool_dir")]
    pub spool_dir: PathBuf,
    pub resume: ResumeConfig,
    #[serde(default)]
    pub upload: UploadOptions,
    pub backend: ferry_objectstore::Config,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 13030))
}

fn default_spool_dir() -> PathBuf {
    std::env::temp_dir().join("ferry")
}

#[derive(Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ResumeConfig {
    PerObject { path: PathBuf },
    Single { path: PathBuf },
}

impl From<ResumeConfig> for ResumeLocation {
    fn from(cfg: ResumeConfig) -> Self {
        match cfg {
            ResumeConfig::PerObject { path } => ResumeLocation::PerObject(path),
            ResumeConfig::Single { path } => ResumeLocation::Single(path),
        }
    }
}
