use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use axum::body::Body;
use axum::extract::{Path as UrlPath, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use itertools::Itertools;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::Serialize;
use serde_json::{json, Value};
use tokio_util::io::ReaderStream;

use crate::config::Config;
use crate::errors::Error;

#[derive(Debug, Serialize)]
pub struct FileEntry {
    name: String,
    size: u64,
    /// Seconds since the Unix epoch.
    modified: f64,
}

pub async fn list(State(config): State<Arc<Config>>) -> Result<Json<Value>, Error> {
    let files = list_dir(&config.download_dir).await?;
    Ok(Json(json!({ "success": true, "files": files })))
}

/// A download root that does not exist yet lists as empty.
async fn list_dir(dir: &Path) -> Result<Vec<FileEntry>, Error> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0.0, |d| d.as_secs_f64());
        files.push(FileEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            size: metadata.len(),
            modified,
        });
    }
    Ok(files
        .into_iter()
        .sorted_by(|a, b| a.name.cmp(&b.name))
        .collect())
}

/// Joins a client supplied relative path onto `root`, rejecting anything that could escape it.
fn safe_join(root: &Path, name: &str) -> Option<PathBuf> {
    let relative = Path::new(name);
    let mut components = relative.components().peekable();
    components.peek()?;
    if components.all(|c| matches!(c, Component::Normal(_))) {
        Some(root.join(relative))
    } else {
        None
    }
}

pub async fn download(
    UrlPath(name): UrlPath<String>,
    State(config): State<Arc<Config>>,
) -> Result<Response, Error> {
    let path = safe_join(&config.download_dir, name.trim_start_matches('/'))
        .ok_or(Error::InvalidFileName)?;
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Err(Error::FileNotFound),
        Err(err) => return Err(err.into()),
    };
    let metadata = file.metadata().await?;
    if !metadata.is_file() {
        return Err(Error::FileNotFound);
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let disposition = format!(
        "attachment; filename*=UTF-8''{}",
        utf8_percent_encode(&file_name, NON_ALPHANUMERIC)
    );
    let headers = [
        (header::CONTENT_TYPE, "application/octet-stream".to_string()),
        (header::CONTENT_LENGTH, metadata.len().to_string()),
        (header::CONTENT_DISPOSITION, disposition),
    ];
    Ok((headers, Body::from_stream(ReaderStream::new(file))).into_response())
}
