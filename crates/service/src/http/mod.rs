//! HTTP surface for clipsqueeze
//!
//! Upload form, compression endpoint, health, and metrics, behind request
//! tracing, CORS, security headers, and an upload size limit.

pub mod error;
pub mod upload;

pub use error::{ApiError, ErrorResponse};
pub use upload::UploadForm;

use crate::config::ServerConfig;
use crate::controller::JobController;
use crate::metrics::{snapshot_now, MetricsSnapshot, SharedMetrics};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{header, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

const INDEX_HTML: &str = include_str!("index.html");

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<JobController>,
    pub metrics: SharedMetrics,
    pub default_target_size_mb: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

pub fn create_router(state: AppState, server: &ServerConfig) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let body_limit = usize::try_from(server.max_upload_mb.saturating_mul(1024 * 1024))
        .unwrap_or(usize::MAX);

    Router::new()
        .route("/", get(index_handler))
        .route("/compress-mp4", post(compress_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(trace_layer)
        .layer(cors_layer(&server.cors_origins))
        .with_state(state)
}

/// CORS restricted to the configured origins, with credentials
///
/// Credentials rule out wildcard headers, so the request headers are listed.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::AUTHORIZATION])
        .allow_credentials(true)
        .expose_headers([header::CONTENT_DISPOSITION])
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
        }),
    )
}

async fn metrics_handler(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(snapshot_now(&state.metrics))
}

/// Compress the uploaded video and stream it back as an attachment
///
/// The job runs on its own task. If the client disconnects, this future is
/// dropped, the drop guard cancels the token, and the job kills its encoder
/// and cleans up.
#[tracing::instrument(skip(state, multipart))]
async fn compress_handler(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let form = UploadForm::read(multipart, state.default_target_size_mb).await?;
    let download = upload::download_name(form.file_name.as_deref());

    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let controller = state.controller.clone();
    let UploadForm {
        content,
        extension,
        target_size_mb,
        maintain_aspect_ratio,
        ..
    } = form;
    let job = tokio::spawn(async move {
        controller
            .submit_job(
                &content,
                extension,
                target_size_mb,
                maintain_aspect_ratio,
                &cancel,
            )
            .await
    });

    let asset = job
        .await
        .map_err(|e| ApiError::Internal(format!("compression task failed: {}", e)))??;

    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", download))
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let job_id = HeaderValue::from_str(&asset.job_id.to_string())
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("video/mp4")),
            (header::CONTENT_DISPOSITION, disposition),
            (HeaderName::from_static("x-job-id"), job_id),
        ],
        asset.bytes,
    )
        .into_response())
}
