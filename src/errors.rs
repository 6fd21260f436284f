use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("URL is required")]
    UrlRequired,
    #[error("Name and URL are required")]
    ProfileFieldsRequired,
    #[error("Invalid file name")]
    InvalidFileName,
    #[error("Download not found")]
    DownloadNotFound,
    #[error("Profile not found")]
    ProfileNotFound,
    #[error("File not found")]
    FileNotFound,
    #[error("{}", .0.body_text())]
    InvalidBody(#[from] JsonRejection),
    #[error(transparent)]
    Svtplay(#[from] svtplay::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    Internal(#[from] InternalError),
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::UrlRequired | Self::ProfileFieldsRequired | Self::InvalidFileName => {
                StatusCode::BAD_REQUEST
            }
            Self::InvalidBody(rejection) => rejection.status(),
            Self::DownloadNotFound | Self::ProfileNotFound | Self::FileNotFound => {
                StatusCode::NOT_FOUND
            }
            Self::Svtplay(svtplay::Error::TimedOut) => StatusCode::GATEWAY_TIMEOUT,
            Self::Svtplay(svtplay::Error::Failed(_) | svtplay::Error::ParseInfo(_)) => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("request failed with {self}");
        }
        let body = Json(json!({
            "success": false,
            "error": self.to_string(),
        }));
        (status, body).into_response()
    }
}

pub type InternalError = anyhow::Error;
