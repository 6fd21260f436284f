use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::errors::Error;
use crate::jobs::engine::JobEngine;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UrlBody {
    url: String,
}

pub async fn get_info(
    State(engine): State<JobEngine>,
    body: Result<Json<UrlBody>, JsonRejection>,
) -> Result<Json<Value>, Error> {
    let Json(body) = body?;
    let info = engine.get_info(&body.url).await?;
    Ok(Json(json!({ "success": true, "info": info })))
}

pub async fn list_episodes(
    State(engine): State<JobEngine>,
    body: Result<Json<UrlBody>, JsonRejection>,
) -> Result<Json<Value>, Error> {
    let Json(body) = body?;
    let episodes = engine.list_episodes(&body.url).await?;
    Ok(Json(json!({
        "success": true,
        "count": episodes.len(),
        "episodes": episodes,
    })))
}
