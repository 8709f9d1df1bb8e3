use std::time::Instant;

use axum::extract::{Multipart, Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use http::StatusCode;
use serde::Deserialize;
use serde_json::json;

use ferry_core::Uploader;

use super::empty_string_as_none;
use crate::errors::{Error, Result};
use crate::spool::{spool_field, FILE_FIELD};
use crate::Ferry;

pub(crate) fn router() -> Router<Ferry> {
    Router::new()
        .route("/upload/", post(upload_post))
        .route("/upload/progress", get(progress_get))
        .route("/upload/progress/*object_name", get(object_progress_get))
}

#[derive(Debug, Deserialize)]
struct UploadParams {
    #[serde(default, deserialize_with = "empty_string_as_none")]
    object_name: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    chunk_size: Option<u64>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    max_retries: Option<u32>,
}

async fn upload_post(
    State(ferry): State<Ferry>,
    Query(params): Query<UploadParams>,
    mut multipart: Multipart,
) -> Result<Response> {
    let started = Instant::now();

    let mut options = ferry.options.clone();
    if let Some(chunk_size) = params.chunk_size {
        options.chunk_size = chunk_size;
    }
    if let Some(max_retries) = params.max_retries {
        options.max_retries = max_retries;
    }
    let max_file_size = options.max_file_size;

    let uploader = Uploader::new(ferry.client.clone(), ferry.store.clone(), options)?
        .with_cancellation(ferry.shutdown.child_token());

    // claim the object name as soon as the part headers arrive, before reading the body
    let (object_name, guard, spooled) = loop {
        let Some(mut field) = multipart.next_field().await? else {
            return Err(Error::MissingFormField(FILE_FIELD));
        };
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let object_name = params
            .object_name
            .clone()
            .or_else(|| field.file_name().map(String::from))
            .ok_or(Error::MissingObjectName)?;
        let guard = ferry.sessions.register(&object_name, uploader.progress())?;
        let spooled = spool_field(&mut field, &ferry.spool_dir, max_file_size).await?;
        break (object_name, guard, spooled);
    };

    tracing::info!(object = %object_name, size = spooled.size, "accepted upload");

    // the session keeps going even if the client hangs up, so it also owns the spool file
    let task = tokio::spawn(async move {
        let _guard = guard;
        let mut uploader = uploader;
        let result = uploader.upload(&spooled.path, &object_name).await;
        if result.is_err() {
            // a retry spools the body again, the resume record is what survives
            ferry.discard_spool(&spooled.path).await;
        }
        result
    });

    let result = task.await?;

    let elapsed = started.elapsed().as_secs_f64();
    tracing::info!(
        seconds = elapsed,
        minutes = elapsed / 60.0,
        "upload request finished"
    );

    let summary = result?;
    tracing::info!(
        object = %summary.object_name,
        bytes = summary.bytes,
        blocks = summary.blocks,
        resumed_from = summary.resumed_from,
        "upload completed"
    );
    Ok((
        StatusCode::OK,
        Json(json!({ "message": "Upload completed successfully." })),
    )
        .into_response())
}

fn format_percentage(p: f64) -> String {
    format!("{p:.2}%")
}

async fn progress_get(State(ferry): State<Ferry>) -> Result<Response> {
    let progress = ferry
        .sessions
        .latest()
        .map(|p| p.percentage())
        .unwrap_or(0.0);
    let sessions: serde_json::Map<String, serde_json::Value> = ferry
        .sessions
        .snapshot()
        .into_iter()
        .map(|(name, p)| (name, format_percentage(p).into()))
        .collect();

    Ok(Json(json!({
        "progress": format_percentage(progress),
        "sessions": sessions,
    }))
    .into_response())
}

async fn object_progress_get(
    State(ferry): State<Ferry>,
    Path(object_name): Path<String>,
) -> Result<Response> {
    let object_name = object_name.trim_start_matches('/');
    match ferry.sessions.get(object_name) {
        Some(p) => Ok(Json(json!({ "progress": format_percentage(p.percentage()) })).into_response()),
        None => Err(Error::UploadUnknown(object_name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use rstest::*;

    use super::*;

    #[rstest]
    #[case(0.0, "0.00%")]
    #[case(12.346, "12.35%")]
    #[case(99.99, "99.99%")]
    #[case(100.0, "100.00%")]
    fn percentages(#[case] p: f64, #[case] expected: &str) {
        assert_eq!(format_percentage(p), expected);
    }
}
