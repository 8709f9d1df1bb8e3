//! # Ferry HTTP
//!
//! `ferry_http` accepts large files as multipart form uploads, spools them to local disk and
//! hands them to a [`ferry_core::Uploader`] that transfers them to remote storage in resumable
//! staged blocks.
//!
//! ## Routes
//!
//! * `POST /upload/` uploads the `file` form field. The object name defaults to the part's file
//!   name; `object_name`, `chunk_size` and `max_retries` query parameters override it and the
//!   configured upload options.
//! * `GET /upload/progress` reports the most recently started upload and every active one.
//! * `GET /upload/progress/*object_name` reports a single active upload.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ferry_core::{FileResumeStore, MemoryBlockClient, ResumeLocation, UploadOptions};
//! use ferry_http::Ferry;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let ferry = Ferry::new(
//!     Arc::new(MemoryBlockClient::new()),
//!     Arc::new(FileResumeStore::new(ResumeLocation::PerObject("./state".into()))),
//!     UploadOptions::default(),
//!     "/tmp/ferry",
//! )?;
//!
//! axum::Server::bind(&"0.0.0.0:13030".parse()?)
//!     .serve(ferry.router().into_make_service())
//!     .await?;
//! # Ok(())
//! # }
//! ```
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use serde::{de, Deserialize, Deserializer};
use tokio_util::sync::CancellationToken;
use tower_http::trace::{self, TraceLayer};

use ferry_core::{BlockClient, ResumeStateStore, UploadOptions};

mod errors;
pub use errors::Error;
pub(crate) use errors::Result;

mod sessions;
mod spool;
mod uploads;

use sessions::ActiveSessions;

/// Serde deserialization decorator to map empty Strings to None,
fn empty_string_as_none<'de, D, T>(de: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let opt = Option::<String>::deserialize(de)?;
    match opt.as_deref() {
        None | Some("") => Ok(None),
        Some(s) => FromStr::from_str(s).map_err(de::Error::custom).map(Some),
    }
}

/// Shared state behind the upload routes.
#[derive(Clone)]
pub struct Ferry {
    client: Arc<dyn BlockClient>,
    store: Arc<dyn ResumeStateStore>,
    options: UploadOptions,
    spool_dir: PathBuf,
    sessions: ActiveSessions,
    shutdown: CancellationToken,
}

impl Ferry {
    /// Fails if `options` cannot be used with `client`.
    pub fn new(
        client: Arc<dyn BlockClient>,
        store: Arc<dyn ResumeStateStore>,
        options: UploadOptions,
        spool_dir: impl Into<PathBuf>,
    ) -> std::result::Result<Self, ferry_core::Error> {
        options.validate(client.as_ref())?;
        Ok(Self {
            client,
            store,
            options,
            spool_dir: spool_dir.into(),
            sessions: ActiveSessions::default(),
            shutdown: CancellationToken::new(),
        })
    }

    /// Uploads in flight stop at their next chunk boundary once `shutdown` fires.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    async fn discard_spool(&self, path: &Path) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            tracing::warn!(path = %path.display(), "failed to remove spool file: {e}");
        }
    }

    /// Return an [`axum::Router`] serving the upload routes.
    pub fn router(&self) -> axum::Router {
        uploads::router()
            // spooling enforces the configured maximum file size instead
            .layer(DefaultBodyLimit::disable())
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(trace::DefaultMakeSpan::new().include_headers(true))
                    .on_response(trace::DefaultOnResponse::new())
                    .on_request(trace::DefaultOnRequest::new()),
            )
            .with_state(self.clone())
    }
}
