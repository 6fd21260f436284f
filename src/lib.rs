use anyhow::Result;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::compression::predicate::NotForContentType;
use tower_http::compression::{CompressionLayer, DefaultPredicate, Predicate};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use state::AppState;

use crate::controllers::{downloads, files, metadata};

pub mod config;
pub mod controllers;
pub mod errors;
pub mod jobs;
pub mod models;
pub mod profiles;
pub mod state;

pub fn router(app_state: AppState) -> Router {
    let compression_predicate =
        DefaultPredicate::new().and(NotForContentType::const_new("text/event-stream"));
    let static_files = ServeDir::new(&app_state.config.static_dir);

    Router::new()
        .route("/api/info", post(metadata::get_info))
        .route("/api/episodes", post(metadata::list_episodes))
        .route("/api/download", post(downloads::start))
        .route("/api/download/season", post(downloads::start_season))
        .route("/api/downloads", get(downloads::list))
        .route("/api/downloads/events", get(downloads::events))
        .route("/api/downloads/files", get(files::list))
        .route("/api/downloads/:id", get(downloads::status))
        .route("/downloads/*filename", get(files::download))
        .route(
            "/api/profiles",
            get(controllers::profiles::list).post(controllers::profiles::save),
        )
        .route("/api/profiles/search", get(controllers::profiles::search))
        .route(
            "/api/profiles/:id",
            get(controllers::profiles::get).delete(controllers::profiles::delete),
        )
        .fallback_service(static_files)
        .with_state(app_state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(CompressionLayer::new().compress_when(compression_predicate)),
        )
}

/// Serves until ctrl-c, then waits for running downloads.
pub async fn serve(app_state: AppState) -> Result<()> {
    let addr = app_state.config.socket_addr();
    let engine = app_state.engine.clone();
    let listener = TcpListener::bind(addr).await?;
    info!("listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(app_state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    engine.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
