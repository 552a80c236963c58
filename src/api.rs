//! Query surface: read-only views of every source's snapshot and the banner board, plus
//! source removal and banner dismissal.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;

use crate::alert::Alert;
use crate::notify::{Banner, BannerBoard};
use crate::supervisor::{SourceDirectory, SourceSummary, Supervisor};

#[derive(Clone)]
pub struct AppState {
    pub directory: SourceDirectory,
    pub banners: BannerBoard,
    pub supervisor: Option<Arc<Mutex<Supervisor>>>,
}

impl AppState {
    /// Read-only state without a supervisor; removal answers 503.
    pub fn read_only(directory: SourceDirectory, banners: BannerBoard) -> Self {
        Self {
            directory,
            banners,
            supervisor: None,
        }
    }

    pub fn with_supervisor(supervisor: Supervisor, banners: BannerBoard) -> Self {
        Self {
            directory: supervisor.directory().clone(),
            banners,
            supervisor: Some(Arc::new(Mutex::new(supervisor))),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/sources", get(list_sources))
        .route("/sources/{id}", get(source_state).delete(remove_source))
        .route("/sources/{id}/alerts", get(source_alerts))
        .route("/banners", get(list_banners))
        .route("/banners/{source}/{tag}", delete(dismiss_banner))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct SourceState {
    count: usize,
    last_updated: DateTime<Utc>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn not_found(what: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody {
            error: format!("{what} not found"),
        }),
    )
        .into_response()
}

async fn list_sources(State(state): State<AppState>) -> Json<Vec<SourceSummary>> {
    Json(state.directory.list().iter().map(|e| e.summary()).collect())
}

async fn source_state(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.directory.get(&id) {
        Some(entry) => {
            let snap = entry.snapshot.current();
            Json(SourceState {
                count: snap.count,
                last_updated: snap.last_updated,
            })
            .into_response()
        }
        None => not_found("source"),
    }
}

async fn source_alerts(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.directory.get(&id) {
        Some(entry) => {
            let alerts: Vec<Alert> = entry.snapshot.current().alerts.clone();
            Json(alerts).into_response()
        }
        None => not_found("source"),
    }
}

async fn remove_source(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let Some(sup) = state.supervisor.as_ref() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "source management disabled").into_response();
    };
    let result = sup.lock().await.remove(&id).await;
    match result {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => not_found("source"),
        Err(e) => {
            tracing::warn!(source = %id, error = ?e, "source removal failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody {
                    error: format!("{e:#}"),
                }),
            )
                .into_response()
        }
    }
}

async fn list_banners(State(state): State<AppState>) -> Json<Vec<Banner>> {
    Json(state.banners.list())
}

async fn dismiss_banner(
    State(state): State<AppState>,
    Path((source, tag)): Path<(String, String)>,
) -> Response {
    if state.banners.dismiss(&source, &tag) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        not_found("banner")
    }
}
