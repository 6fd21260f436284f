use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::Config;
use crate::errors::Error;
use crate::models::ProfileInput;
use crate::profiles::ProfileStore;

pub async fn list(State(store): State<ProfileStore>) -> Json<Value> {
    Json(json!({ "success": true, "profiles": store.all().await }))
}

pub async fn save(
    State(store): State<ProfileStore>,
    State(config): State<Arc<Config>>,
    body: Result<Json<ProfileInput>, JsonRejection>,
) -> Result<Json<Value>, Error> {
    let Json(input) = body?;
    let profile = store.save(input, &config.download_dir).await?;
    Ok(Json(json!({ "success": true, "profile": profile })))
}

pub async fn get(
    Path(id): Path<String>,
    State(store): State<ProfileStore>,
) -> Result<Json<Value>, Error> {
    let profile = store.get(&id).await?;
    Ok(Json(json!({ "success": true, "profile": profile })))
}

pub async fn delete(
    Path(id): Path<String>,
    State(store): State<ProfileStore>,
) -> Result<Json<Value>, Error> {
    store.delete(&id).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SearchQuery {
    q: String,
}

pub async fn search(
    Query(params): Query<SearchQuery>,
    State(store): State<ProfileStore>,
) -> Json<Value> {
    Json(json!({ "success": true, "profiles": store.search(&params.q).await }))
}
