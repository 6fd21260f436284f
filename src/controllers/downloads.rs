use std::convert::Infallible;

use async_stream::try_stream;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive};
use axum::response::Sse;
use axum::Json;
use futures::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, warn};

use crate::errors::Error;
use crate::jobs::engine::JobEngine;
use crate::models::{DownloadOptions, JobId};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DownloadBody {
    url: Option<String>,
    options: Option<DownloadOptions>,
}

impl DownloadBody {
    fn into_parts(self) -> (String, DownloadOptions) {
        (
            self.url.unwrap_or_default(),
            self.options.unwrap_or_default(),
        )
    }
}

pub async fn start(
    State(engine): State<JobEngine>,
    body: Result<Json<DownloadBody>, JsonRejection>,
) -> Result<Json<Value>, Error> {
    let Json(body) = body?;
    let (url, options) = body.into_parts();
    let id = engine.start_download(&url, options)?;
    Ok(Json(json!({ "success": true, "download_id": id })))
}

pub async fn start_season(
    State(engine): State<JobEngine>,
    body: Result<Json<DownloadBody>, JsonRejection>,
) -> Result<Json<Value>, Error> {
    let Json(body) = body?;
    let (url, options) = body.into_parts();
    let id = engine.start_season_download(&url, options)?;
    Ok(Json(json!({ "success": true, "download_id": id })))
}

pub async fn list(State(engine): State<JobEngine>) -> Json<Value> {
    Json(json!({ "success": true, "downloads": engine.get_all() }))
}

/// Ids that are not valid UUIDs can never name a job, so they are reported as missing.
pub async fn status(
    Path(id): Path<String>,
    State(engine): State<JobEngine>,
) -> Result<Json<Value>, Error> {
    let id: JobId = id.parse().map_err(|_| Error::DownloadNotFound)?;
    let job = engine.get_status(&id)?;
    Ok(Json(json!({ "success": true, "download": job })))
}

pub async fn events(
    State(engine): State<JobEngine>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = engine.registry().subscribe();
    let stream = try_stream! {
        loop {
            match rx.recv().await {
                Ok(job) => match Event::default().event("download").json_data(job) {
                    Ok(event) => yield event,
                    Err(e) => error!(error = ?e, "failed to serialize"),
                },
                Err(RecvError::Lagged(skipped)) => warn!("event stream lagged, skipped {skipped} updates"),
                Err(RecvError::Closed) => break,
            }
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::new())
}
